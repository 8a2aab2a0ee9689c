//! Create-if-absent bucket provisioning.

use serde::Serialize;
use tracing::{error, info};

use crate::contract::ObjectStore;
use crate::error::{BucketError, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketState {
    AlreadyExists,
    Created,
}

/// Make sure `name` exists, creating it if the listing does not show it.
///
/// A name collision with another owner is permanent and returned as
/// [`BucketError::NameTaken`]; callers must not retry it.
pub async fn ensure_bucket<S>(store: &S, name: &str) -> Result<BucketState, BucketError>
where
    S: ObjectStore + ?Sized,
{
    let buckets = store.list_buckets().await.map_err(|e| {
        error!(bucket = name, error = %e, "[BUCKET] Failed to list buckets");
        BucketError::Store {
            bucket: name.to_string(),
            source: e,
        }
    })?;

    if buckets.iter().any(|b| b == name) {
        info!(bucket = name, "[BUCKET] Bucket already exists");
        return Ok(BucketState::AlreadyExists);
    }

    match store.create_bucket(name).await {
        Ok(()) => {
            info!(bucket = name, "[BUCKET] Created bucket");
            Ok(BucketState::Created)
        }
        Err(StoreError::NameTaken(_)) => {
            error!(
                bucket = name,
                "[BUCKET] Bucket name already taken, pick a different name"
            );
            Err(BucketError::NameTaken(name.to_string()))
        }
        Err(e) => {
            error!(bucket = name, error = %e, "[BUCKET] Failed to create bucket");
            Err(BucketError::Store {
                bucket: name.to_string(),
                source: e,
            })
        }
    }
}
