use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use futures::{StreamExt, stream::BoxStream};

use super::{ObjectStore, StoreError};

/// In-memory store paginating like S3: pages of `page_size` keys in key order, resumed after
/// the last key of the previous page.
#[derive(Debug)]
pub struct MemoryStore {
    page_size: usize,
    latency: Option<Duration>,
    fail_deletes: bool,
    buckets: Mutex<BTreeMap<String, BTreeSet<String>>>,
    create_calls: AtomicUsize,
    delete_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size,
            latency: None,
            fail_deletes: false,
            buckets: Mutex::default(),
            create_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_bucket(self, bucket: &str, objects: usize) -> Self {
        self.buckets
            .lock()
            .unwrap()
            .insert(bucket.to_owned(), BTreeSet::new());
        self.put_objects(bucket, objects);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn failing_deletes(mut self) -> Self {
        self.fail_deletes = true;
        self
    }

    pub fn put_objects(&self, bucket: &str, count: usize) {
        let mut buckets = self.buckets.lock().unwrap();
        let objects = buckets.get_mut(bucket).expect("bucket exists");
        let offset = objects.len();
        objects.extend((offset..offset + count).map(|i| format!("chunks/{i:06}")));
    }

    pub fn object_count(&self, bucket: &str) -> Option<usize> {
        self.buckets.lock().unwrap().get(bucket).map(BTreeSet::len)
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn page_after(&self, bucket: &str, marker: &str) -> Result<(Vec<String>, bool), StoreError> {
        let buckets = self.buckets.lock().unwrap();
        let objects = buckets.get(bucket).ok_or(StoreError::NotFound)?;
        let mut remaining = objects.iter().filter(|key| key.as_str() > marker);
        let page: Vec<String> = remaining.by_ref().take(self.page_size).cloned().collect();
        let truncated = remaining.next().is_some();
        Ok((page, truncated))
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, StoreError> {
        self.delay().await;
        Ok(self.buckets.lock().unwrap().contains_key(bucket))
    }

    async fn create_bucket(&self, bucket: &str) -> Result<Option<String>, StoreError> {
        self.delay().await;
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.buckets
            .lock()
            .unwrap()
            .entry(bucket.to_owned())
            .or_default();
        Ok(None)
    }

    fn object_pages<'a>(
        &'a self,
        bucket: &'a str,
    ) -> BoxStream<'a, Result<Vec<String>, StoreError>> {
        futures::stream::try_unfold(Some(String::new()), move |marker| async move {
            let Some(marker) = marker else {
                return Ok(None);
            };
            self.delay().await;
            let (page, truncated) = self.page_after(bucket, &marker)?;
            let next = if truncated { page.last().cloned() } else { None };
            Ok(Some((page, next)))
        })
        .boxed()
    }

    async fn delete_objects(&self, bucket: &str, keys: Vec<String>) -> Result<(), StoreError> {
        self.delay().await;
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_deletes {
            return Err(StoreError::request("access denied"));
        }
        let mut buckets = self.buckets.lock().unwrap();
        let objects = buckets.get_mut(bucket).ok_or(StoreError::NotFound)?;
        for key in keys {
            objects.remove(&key);
        }
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<(), StoreError> {
        self.delay().await;
        let mut buckets = self.buckets.lock().unwrap();
        let Some(objects) = buckets.get(bucket) else {
            return Err(StoreError::NotFound);
        };
        if !objects.is_empty() {
            return Err(StoreError::UnexpectedStatus {
                status: http::StatusCode::CONFLICT,
                body: "BucketNotEmpty".to_owned(),
            });
        }
        buckets.remove(bucket);
        Ok(())
    }
}
