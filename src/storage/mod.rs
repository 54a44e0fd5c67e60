//! Object-store port for raw extracts and normalized artifacts.
//!
//! Keys are forward-slash paths: `raw/{period}/{file}` for incoming
//! spreadsheets, `normalized/{period}/{table}.csv` for pipeline output.
//! The filesystem implementation backs production runs; the in-memory one
//! backs tests.

mod fs;
mod memory;

pub use fs::FsObjectStore;
pub use memory::InMemoryObjectStore;

use crate::error::Result;
use async_trait::async_trait;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Vec<u8>>;
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()>;
    async fn exists(&self, key: &str) -> Result<bool>;
    /// All object keys under the prefix, sorted ascending.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}
