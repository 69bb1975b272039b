//! Object-storage file adapter.
//!
//! [`QiniuAdapter`] implements the uniform
//! [`FileStorage`](kodofs_common::storage::FileStorage) contract over a
//! set of configured buckets. Backend calls go through the handle traits
//! in `kodofs_common::backend`; [`backend`] provides HTTP and in-memory
//! implementations of them.

pub mod adapter;
pub mod auth;
pub mod backend;
pub mod bucket;
pub mod config;

pub use adapter::{Clients, Endpoints, QiniuAdapter};
pub use auth::Auth;
pub use backend::from_disk_config;
pub use bucket::{BucketConfig, BucketRegistry};
pub use config::DiskConfig;
