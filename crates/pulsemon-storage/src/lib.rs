pub mod error;
pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use pulsemon_common::model::Metric;
use std::collections::HashMap;
use std::path::Path;

pub use error::{Result, StorageError};
pub use memory::MemStorage;
pub use sqlite::SqliteStorage;

/// Metric storage capability set shared by the in-memory and relational
/// variants.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Upserts a single metric. Counter writes accumulate onto the stored
    /// delta and the caller's metric is updated to the accumulated total;
    /// gauge writes replace the stored value.
    async fn save(&self, metric: &mut Metric) -> Result<()>;

    /// Upserts a batch atomically: either every metric is visible or none.
    /// Accumulated counter totals are written back into the slice.
    async fn save_batch(&self, metrics: &mut [Metric]) -> Result<()>;

    /// Returns the stored metric for `id`, or [`StorageError::NotFound`].
    async fn get(&self, id: &str) -> Result<Metric>;

    /// Returns a caller-owned snapshot of the whole store keyed by id.
    async fn get_all(&self) -> Result<HashMap<String, Metric>>;

    /// Liveness of the underlying resource.
    async fn ping(&self) -> Result<()>;

    /// File snapshot capability, when the variant supports it. Discovered
    /// by inspection at startup rather than by downcasting.
    fn file_backed(&self) -> Option<&dyn FileBacked> {
        None
    }
}

/// Whole-store file snapshotting.
#[async_trait]
pub trait FileBacked: Send + Sync {
    /// Overwrites `path` with a pretty-printed JSON object mapping id to
    /// metric. An empty store writes nothing.
    async fn save_to_file(&self, path: &Path) -> Result<()>;

    /// Replays a snapshot file through `save`. A missing file is not an
    /// error. Counters loaded over existing counters accumulate.
    async fn load_from_file(&self, path: &Path) -> Result<()>;
}
