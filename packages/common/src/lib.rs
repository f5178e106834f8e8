pub mod change;
pub mod hash;
pub mod retry;

pub use change::{
    BatchRequest, BatchResponse, ChangeRejection, ChangeStatus, DeviceBlobStatus, SyncTable,
    WriteChange, WriteOp,
};
pub use hash::ContentHash;
