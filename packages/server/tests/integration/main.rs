mod common;
mod device;
mod sync;
