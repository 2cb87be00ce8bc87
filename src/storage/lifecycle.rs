//! Backend independent bucket lifecycle: ensure, empty, delete.
//!
//! "Ensure" resets an existing bucket to empty instead of failing, and deleting a bucket
//! that is already gone succeeds, so every operation here can be re-run after a partial
//! failure.

use std::future::Future;

use futures::StreamExt;

use super::{ObjectStore, StorageError, StorageType, StoreError};
use crate::{
    context::OperationContext,
    internal_events::{BucketAlreadyAbsent, BucketCreated, BucketDeleted, BucketEmptied},
};

async fn step<T, F>(
    ctx: &OperationContext,
    backend: StorageType,
    operation: &'static str,
    bucket: &str,
    fut: F,
) -> Result<T, StorageError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match ctx.run(fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(source)) => Err(StorageError::BucketOperationFailed {
            backend,
            bucket: bucket.to_owned(),
            operation,
            source,
        }),
        Err(interrupted) => Err(StorageError::interrupted(
            interrupted,
            backend,
            operation,
            format!("bucket {bucket}"),
        )),
    }
}

/// Makes sure `bucket` exists and is empty.
pub async fn ensure_bucket(
    backend: StorageType,
    store: &dyn ObjectStore,
    bucket: &str,
    ctx: &OperationContext,
) -> Result<(), StorageError> {
    if step(ctx, backend, "look up", bucket, store.bucket_exists(bucket)).await? {
        debug!(
            message = "Bucket already exists, emptying it.",
            backend = %backend,
            bucket = %bucket,
        );
        empty_bucket(backend, store, bucket, ctx).await?;
        return Ok(());
    }

    let location = step(ctx, backend, "create", bucket, store.create_bucket(bucket)).await?;
    emit!(BucketCreated {
        backend,
        bucket,
        location: location.as_deref(),
    });
    Ok(())
}

/// Deletes every object in `bucket`, page by page, until the listing is exhausted.
///
/// Returns the number of objects deleted.
pub async fn empty_bucket(
    backend: StorageType,
    store: &dyn ObjectStore,
    bucket: &str,
    ctx: &OperationContext,
) -> Result<usize, StorageError> {
    let mut pages = store.object_pages(bucket);
    let mut page_count = 0;
    let mut objects_deleted = 0;

    loop {
        let page = match ctx.run(pages.next()).await {
            Ok(None) => break,
            Ok(Some(Ok(page))) => page,
            Ok(Some(Err(source))) => {
                return Err(StorageError::BucketOperationFailed {
                    backend,
                    bucket: bucket.to_owned(),
                    operation: "list objects of",
                    source,
                });
            }
            Err(interrupted) => {
                return Err(StorageError::interrupted(
                    interrupted,
                    backend,
                    "list objects",
                    format!("bucket {bucket}"),
                ));
            }
        };

        page_count += 1;
        if page.is_empty() {
            continue;
        }

        let count = page.len();
        trace!(
            message = "Deleting page of objects.",
            backend = %backend,
            bucket = %bucket,
            page = page_count,
            count,
        );
        step(
            ctx,
            backend,
            "delete objects of",
            bucket,
            store.delete_objects(bucket, page),
        )
        .await?;
        objects_deleted += count;
    }

    emit!(BucketEmptied {
        backend,
        bucket,
        objects_deleted,
        pages: page_count,
    });
    Ok(objects_deleted)
}

/// Empties and deletes `bucket`. A bucket that does not exist counts as deleted.
pub async fn delete_bucket(
    backend: StorageType,
    store: &dyn ObjectStore,
    bucket: &str,
    ctx: &OperationContext,
) -> Result<(), StorageError> {
    match empty_bucket(backend, store, bucket, ctx).await {
        Err(error) if error.is_bucket_not_found() => {
            emit!(BucketAlreadyAbsent { backend, bucket });
            return Ok(());
        }
        result => {
            result?;
        }
    }

    match step(ctx, backend, "delete", bucket, store.delete_bucket(bucket)).await {
        Ok(()) => {
            emit!(BucketDeleted { backend, bucket });
            Ok(())
        }
        Err(error) if error.is_bucket_not_found() => {
            emit!(BucketAlreadyAbsent { backend, bucket });
            Ok(())
        }
        Err(error) => Err(error),
    }
}
