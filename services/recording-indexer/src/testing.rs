//! In-memory catalog and bucket used by unit tests.

use crate::catalog::{Recording, RecordingQuery, SegmentCatalog};
use crate::error::IndexerError;
use crate::object_store::{ListedObject, ObjectLister, ObjectPage};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Catalog keyed by (`camera_id`, `started_at`), like the unique constraint
#[derive(Default)]
pub struct MemoryCatalog {
    rows: Mutex<BTreeMap<(String, DateTime<Utc>), Recording>>,
    fail_writes: AtomicBool,
    stall: AtomicBool,
}

impl MemoryCatalog {
    pub fn rows(&self) -> Vec<Recording> {
        self.rows.lock().unwrap().values().cloned().collect()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make every upsert hang forever
    pub fn set_stall(&self, stall: bool) {
        self.stall.store(stall, Ordering::SeqCst);
    }
}

#[async_trait]
impl SegmentCatalog for MemoryCatalog {
    async fn upsert(&self, recording: &Recording) -> Result<(), IndexerError> {
        if self.stall.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(IndexerError::Store {
                s3_key: recording.s3_key.clone(),
                reason: "catalog unavailable".to_string(),
            });
        }

        self.rows.lock().unwrap().insert(
            (recording.camera_id.clone(), recording.started_at),
            recording.clone(),
        );
        Ok(())
    }

    async fn recordings_for_camera(
        &self,
        query: &RecordingQuery,
    ) -> Result<Vec<Recording>, IndexerError> {
        let rows = self.rows.lock().unwrap();
        let limit = query.limit.map(|l| l as usize).unwrap_or(usize::MAX);

        Ok(rows
            .values()
            .filter(|r| r.camera_id == query.camera_id)
            .filter(|r| r.started_at >= query.from && r.started_at < query.to)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn ping(&self) -> Result<(), IndexerError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(IndexerError::Query("catalog unavailable".to_string()));
        }
        Ok(())
    }
}

/// Bucket listed in fixed-size pages; tokens are page offsets
pub struct MemoryBucket {
    objects: Mutex<Vec<ListedObject>>,
    page_size: usize,
    pages_served: AtomicUsize,
}

impl MemoryBucket {
    pub fn new(page_size: usize) -> Self {
        Self {
            objects: Mutex::new(Vec::new()),
            page_size,
            pages_served: AtomicUsize::new(0),
        }
    }

    pub fn with_objects(page_size: usize, objects: &[(&str, i64)]) -> Self {
        let bucket = Self::new(page_size);
        for (key, size) in objects {
            bucket.put(key, *size);
        }
        bucket
    }

    pub fn put(&self, key: &str, size_bytes: i64) {
        let mut objects = self.objects.lock().unwrap();
        objects.retain(|o| o.key != key);
        objects.push(ListedObject {
            key: key.to_string(),
            size_bytes,
        });
        objects.sort_by(|a, b| a.key.cmp(&b.key));
    }

    pub fn pages_served(&self) -> usize {
        self.pages_served.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectLister for MemoryBucket {
    async fn list_page(
        &self,
        continuation_token: Option<String>,
    ) -> Result<ObjectPage, IndexerError> {
        self.pages_served.fetch_add(1, Ordering::SeqCst);

        let start = match continuation_token {
            Some(token) => token.parse::<usize>().map_err(|_| IndexerError::Listing {
                bucket: "memory-bucket".to_string(),
                reason: format!("bad continuation token {token}"),
            })?,
            None => 0,
        };

        let objects = self.objects.lock().unwrap();
        let end = (start + self.page_size).min(objects.len());
        let page = objects.get(start..end).unwrap_or_default().to_vec();
        let next_token = (end < objects.len()).then(|| end.to_string());

        Ok(ObjectPage {
            objects: page,
            next_token,
        })
    }
}
