pub mod api;
pub mod buffer;
pub mod config;
pub mod device;
pub mod error;
pub mod store;

pub use api::SyncApi;
pub use buffer::{BatchTransport, FlushOutcome, QueuedChange, WriteBuffer};
pub use config::ClientConfig;
pub use device::DeviceAgent;
pub use error::{AgentError, ApiError, BufferError, StoreError};
pub use store::catalog::{BlobRecord, HealthState};
pub use store::{ContentStore, HealthReport, PutMeta, ScanReport};
