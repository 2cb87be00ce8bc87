use metrics::counter;

use super::InternalEvent;
use crate::storage::{StorageError, StorageType};

#[derive(Debug)]
pub struct BucketCreated<'a> {
    pub backend: StorageType,
    pub bucket: &'a str,
    pub location: Option<&'a str>,
}

impl InternalEvent for BucketCreated<'_> {
    fn emit(self) {
        info!(
            message = "Bucket created.",
            backend = %self.backend,
            bucket = %self.bucket,
            location = ?self.location,
        );
        counter!("buckets_created_total", "backend" => self.backend.as_str()).increment(1);
    }
}

#[derive(Debug)]
pub struct BucketEmptied<'a> {
    pub backend: StorageType,
    pub bucket: &'a str,
    pub objects_deleted: usize,
    pub pages: usize,
}

impl InternalEvent for BucketEmptied<'_> {
    fn emit(self) {
        info!(
            message = "Bucket emptied.",
            backend = %self.backend,
            bucket = %self.bucket,
            objects_deleted = %self.objects_deleted,
            pages = %self.pages,
        );
        counter!("bucket_objects_deleted_total", "backend" => self.backend.as_str())
            .increment(self.objects_deleted as u64);
    }
}

#[derive(Debug)]
pub struct BucketDeleted<'a> {
    pub backend: StorageType,
    pub bucket: &'a str,
}

impl InternalEvent for BucketDeleted<'_> {
    fn emit(self) {
        info!(
            message = "Bucket deleted.",
            backend = %self.backend,
            bucket = %self.bucket,
        );
        counter!("buckets_deleted_total", "backend" => self.backend.as_str()).increment(1);
    }
}

#[derive(Debug)]
pub struct BucketAlreadyAbsent<'a> {
    pub backend: StorageType,
    pub bucket: &'a str,
}

impl InternalEvent for BucketAlreadyAbsent<'_> {
    fn emit(self) {
        debug!(
            message = "Bucket does not exist, nothing to delete.",
            backend = %self.backend,
            bucket = %self.bucket,
        );
    }
}

#[derive(Debug)]
pub struct StorageSecretCreated<'a> {
    pub backend: StorageType,
    pub namespace: &'a str,
    pub name: &'a str,
}

impl InternalEvent for StorageSecretCreated<'_> {
    fn emit(self) {
        info!(
            message = "Storage secret created.",
            backend = %self.backend,
            namespace = %self.namespace,
            secret = %self.name,
        );
        counter!("storage_secrets_created_total", "backend" => self.backend.as_str())
            .increment(1);
    }
}

#[derive(Debug)]
pub struct StorageSecretDeleted<'a> {
    pub namespace: &'a str,
    pub name: &'a str,
    pub existed: bool,
}

impl InternalEvent for StorageSecretDeleted<'_> {
    fn emit(self) {
        if self.existed {
            info!(
                message = "Storage secret deleted.",
                namespace = %self.namespace,
                secret = %self.name,
            );
            counter!("storage_secrets_deleted_total").increment(1);
        } else {
            debug!(
                message = "Storage secret does not exist, nothing to delete.",
                namespace = %self.namespace,
                secret = %self.name,
            );
        }
    }
}

#[derive(Debug)]
pub struct StorageCredentialUnavailable<'a> {
    pub backend: StorageType,
    pub error: &'a StorageError,
}

impl InternalEvent for StorageCredentialUnavailable<'_> {
    fn emit(self) {
        warn!(
            message = "Storage credentials are not available on this cluster.",
            backend = %self.backend,
            error = %self.error,
        );
        counter!("storage_credentials_unavailable_total", "backend" => self.backend.as_str())
            .increment(1);
    }
}

#[derive(Debug)]
pub struct StorageTypeDetected<'a> {
    pub platform: &'a str,
    pub storage_type: Option<StorageType>,
}

impl InternalEvent for StorageTypeDetected<'_> {
    fn emit(self) {
        match self.storage_type {
            Some(storage_type) => info!(
                message = "Detected object storage for cluster.",
                platform = %self.platform,
                storage_type = %storage_type,
            ),
            None => warn!(
                message = "No object storage available for cluster.",
                platform = %self.platform,
            ),
        }
    }
}
