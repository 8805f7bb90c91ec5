//! Replica comparison by object metadata.

use crate::objects::{ObjectHead, ObjectStore};
use crate::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicaStatus {
    /// No object at the key in the replica.
    Missing,
    Matching,
    /// Present but different in size or checksum.
    Mismatch { source: ObjectHead, target: ObjectHead },
}

impl ReplicaStatus {
    pub fn is_matching(&self) -> bool {
        matches!(self, Self::Matching)
    }
}

/// Sizes must agree; checksums must agree when both sides report one.
pub fn heads_match(source: &ObjectHead, target: &ObjectHead) -> bool {
    if source.size != target.size {
        return false;
    }
    match (&source.checksum, &target.checksum) {
        (Some(a), Some(b)) => a == b,
        _ => true,
    }
}

/// Compare the object at `key` in `target` against `source`.
///
/// The source object must exist.
pub async fn compare_replica(
    source: &dyn ObjectStore,
    target: &dyn ObjectStore,
    key: &str,
) -> Result<ReplicaStatus, StoreError> {
    let source_head = source
        .head(key)
        .await?
        .ok_or_else(|| StoreError::not_found(source.bucket(), key))?;
    let Some(target_head) = target.head(key).await? else {
        return Ok(ReplicaStatus::Missing);
    };
    if heads_match(&source_head, &target_head) {
        Ok(ReplicaStatus::Matching)
    } else {
        Ok(ReplicaStatus::Mismatch {
            source: source_head,
            target: target_head,
        })
    }
}
