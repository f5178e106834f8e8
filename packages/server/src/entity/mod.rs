pub mod annotation;
pub mod applied_change;
pub mod asset;
pub mod blob_meta;
pub mod device_blob;
pub mod note;
pub mod tombstone;
pub mod work;
