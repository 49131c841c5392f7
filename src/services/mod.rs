//! Store implementations and the cache-aside orchestration built on them.

pub mod disk_store;
pub mod error_translation;
pub mod lazy_store;
pub mod memory_store;
pub mod namespace;
pub mod remote_store;
pub mod s3_xml;
pub mod sigv4;
pub mod store;
