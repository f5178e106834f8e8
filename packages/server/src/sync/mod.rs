mod engine;
mod tables;

pub use engine::apply_batch;
pub use tables::{ApplierRegistry, ChangeError, TableApplier};
