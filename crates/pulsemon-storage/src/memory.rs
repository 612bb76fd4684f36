use crate::error::Result;
use crate::{FileBacked, Storage, StorageError};
use async_trait::async_trait;
use pulsemon_common::model::{Metric, MetricType};
use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

/// In-memory metric store: a map behind a read/write lock. Writers take the
/// exclusive lock; `get_all` takes the shared lock and hands out a fresh
/// shallow copy.
#[derive(Default)]
pub struct MemStorage {
    metrics: RwLock<HashMap<String, Metric>>,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one write to the map and leaves the accumulated counter
    /// total in the caller's metric. Must run under the exclusive lock.
    fn apply(map: &mut HashMap<String, Metric>, metric: &mut Metric) {
        match metric.mtype {
            MetricType::Gauge => {
                map.insert(metric.id.clone(), metric.clone());
            }
            MetricType::Counter => {
                let previous = map
                    .get(&metric.id)
                    .and_then(|stored| stored.delta)
                    .unwrap_or(0);
                let total = previous + metric.delta.unwrap_or(0);
                metric.delta = Some(total);
                map.insert(metric.id.clone(), metric.clone());
            }
        }
    }
}

#[async_trait]
impl Storage for MemStorage {
    async fn save(&self, metric: &mut Metric) -> Result<()> {
        let mut map = self
            .metrics
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Self::apply(&mut map, metric);
        Ok(())
    }

    async fn save_batch(&self, metrics: &mut [Metric]) -> Result<()> {
        // One lock for the whole batch: all metrics become visible together.
        let mut map = self
            .metrics
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for metric in metrics {
            Self::apply(&mut map, metric);
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Metric> {
        let map = self
            .metrics
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        map.get(id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(id.to_string()))
    }

    async fn get_all(&self) -> Result<HashMap<String, Metric>> {
        let map = self
            .metrics
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(map.clone())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn file_backed(&self) -> Option<&dyn FileBacked> {
        Some(self)
    }
}

#[async_trait]
impl FileBacked for MemStorage {
    async fn save_to_file(&self, path: &Path) -> Result<()> {
        let snapshot = self.get_all().await?;
        if snapshot.is_empty() {
            return Ok(());
        }
        let data = serde_json::to_vec_pretty(&snapshot)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, data)?;
        tracing::debug!(path = %path.display(), metrics = snapshot.len(), "snapshot written");
        Ok(())
    }

    /// Replays the file through `save`, so counters restored on top of
    /// already-accumulated counters add up again. Restoring the same
    /// snapshot twice therefore doubles counter totals.
    async fn load_from_file(&self, path: &Path) -> Result<()> {
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        let snapshot: HashMap<String, Metric> = serde_json::from_slice(&data)?;
        let mut map = self
            .metrics
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for (_, mut metric) in snapshot {
            Self::apply(&mut map, &mut metric);
        }
        tracing::debug!(path = %path.display(), "snapshot restored");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn gauge_write_replaces() {
        let store = MemStorage::new();
        store.save(&mut Metric::gauge("g", 1.0)).await.unwrap();
        store.save(&mut Metric::gauge("g", 2.5)).await.unwrap();
        assert_eq!(store.get("g").await.unwrap().value, Some(2.5));
    }

    #[tokio::test]
    async fn counter_write_accumulates_and_echoes_total() {
        let store = MemStorage::new();
        let mut first = Metric::counter("c", 1);
        store.save(&mut first).await.unwrap();
        assert_eq!(first.delta, Some(1));

        let mut second = Metric::counter("c", 2);
        store.save(&mut second).await.unwrap();
        assert_eq!(second.delta, Some(3));
        assert_eq!(store.get("c").await.unwrap().delta, Some(3));
    }

    #[tokio::test]
    async fn missing_id_is_not_found() {
        let store = MemStorage::new();
        assert!(matches!(
            store.get("nope").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn batch_composes_deltas_for_the_same_id() {
        let store = MemStorage::new();
        let mut batch = vec![
            Metric::counter("c", 1),
            Metric::gauge("g", 9.0),
            Metric::counter("c", 2),
        ];
        store.save_batch(&mut batch).await.unwrap();
        assert_eq!(batch[2].delta, Some(3));
        assert_eq!(store.get("c").await.unwrap().delta, Some(3));
        assert_eq!(store.get("g").await.unwrap().value, Some(9.0));
    }

    #[tokio::test]
    async fn get_all_returns_an_independent_snapshot() {
        let store = MemStorage::new();
        store.save(&mut Metric::gauge("g", 1.0)).await.unwrap();
        let mut snapshot = store.get_all().await.unwrap();
        snapshot.insert("other".to_string(), Metric::gauge("other", 2.0));
        assert!(matches!(
            store.get("other").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn snapshot_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics-db.json");

        let store = MemStorage::new();
        store.save(&mut Metric::gauge("g", 1.5)).await.unwrap();
        store.save(&mut Metric::counter("c", 4)).await.unwrap();
        store.save_to_file(&path).await.unwrap();

        let restored = MemStorage::new();
        restored.load_from_file(&path).await.unwrap();
        assert_eq!(restored.get("g").await.unwrap().value, Some(1.5));
        assert_eq!(restored.get("c").await.unwrap().delta, Some(4));
    }

    #[tokio::test]
    async fn snapshot_is_pretty_printed_json_object() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics-db.json");

        let store = MemStorage::new();
        store.save(&mut Metric::gauge("g", 1.0)).await.unwrap();
        store.save_to_file(&path).await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with('{'));
        assert!(text.contains("\n  \"g\""));
    }

    #[tokio::test]
    async fn empty_store_writes_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics-db.json");
        MemStorage::new().save_to_file(&path).await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn loading_a_missing_file_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        MemStorage::new()
            .load_from_file(&dir.path().join("absent.json"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn restore_replays_additively() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics-db.json");

        let store = MemStorage::new();
        store.save(&mut Metric::counter("c", 5)).await.unwrap();
        store.save_to_file(&path).await.unwrap();

        // A second restore over live state accumulates again.
        store.load_from_file(&path).await.unwrap();
        assert_eq!(store.get("c").await.unwrap().delta, Some(10));
    }

    #[tokio::test]
    async fn file_capability_is_discoverable() {
        let store = MemStorage::new();
        assert!(Storage::file_backed(&store).is_some());
    }
}
