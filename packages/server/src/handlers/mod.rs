pub mod device;
pub mod sync;
