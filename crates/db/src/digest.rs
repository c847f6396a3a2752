//! Digest responses: folding a read result into a comparable hash.
//!
//! A digest must be bit-comparable across replicas running the same
//! digest version, so the fold is defined entirely by stream order and
//! fixed field encodings. Version 2 added domain-separation tags per
//! element kind; version 1 is kept for mixed-version clusters.

use borsh::{BorshDeserialize, BorshSerialize};
use futures_util::StreamExt;
use sha2::{Digest as _, Sha256};
use tessera_primitives::Hash;

use crate::error::ReadError;
use crate::partition::{PartitionStream, Row, Unfiltered};

/// Version of the digest algorithm, negotiated with the peer and encoded
/// separately from the general protocol version.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, BorshSerialize, BorshDeserialize,
)]
pub enum DigestVersion {
    V1,
    V2,
}

impl DigestVersion {
    /// Wire ordinal of this version.
    #[must_use]
    pub const fn ordinal(self) -> u32 {
        match self {
            Self::V1 => 0,
            Self::V2 => 1,
        }
    }

    #[must_use]
    pub const fn from_ordinal(ordinal: u32) -> Option<Self> {
        match ordinal {
            0 => Some(Self::V1),
            1 => Some(Self::V2),
            _ => None,
        }
    }
}

/// Fold a fully-transformed partition stream into a single digest.
pub async fn digest_partitions(
    mut partitions: PartitionStream,
    version: DigestVersion,
) -> Result<Hash, ReadError> {
    let mut hasher = Sha256::new();
    while let Some(partition) = partitions.next().await {
        let mut partition = partition?;
        if version >= DigestVersion::V2 {
            hasher.update(b"pk");
        }
        update_var(&mut hasher, &partition.key.key);
        hasher.update(partition.key.token.0.to_le_bytes());
        hasher.update(partition.partition_deletion.marked_for_delete_at.to_le_bytes());
        hasher.update(partition.partition_deletion.local_deletion_time.to_le_bytes());
        digest_row(&mut hasher, &partition.static_row, version);
        while let Some(unfiltered) = partition.content.next().await {
            match unfiltered? {
                Unfiltered::Row(row) => digest_row(&mut hasher, &row, version),
                Unfiltered::Marker(marker) => {
                    if version >= DigestVersion::V2 {
                        hasher.update(b"marker");
                    }
                    update_var(&mut hasher, &marker.clustering.0);
                    hasher.update(marker.deletion.marked_for_delete_at.to_le_bytes());
                    hasher.update(marker.deletion.local_deletion_time.to_le_bytes());
                }
            }
        }
    }
    let bytes: [u8; 32] = hasher.finalize().into();
    Ok(Hash::from_bytes(bytes))
}

/// Variable-length fields carry their length, so bytes can never migrate
/// between adjacent fields of the encoding.
fn update_var(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u32).to_le_bytes());
    hasher.update(bytes);
}

fn digest_row(hasher: &mut Sha256, row: &Row, version: DigestVersion) {
    if version >= DigestVersion::V2 {
        hasher.update(b"row");
    }
    update_var(hasher, &row.clustering.0);
    hasher.update(row.primary_key_liveness.timestamp.to_le_bytes());
    hasher.update(row.deletion.marked_for_delete_at.to_le_bytes());
    hasher.update(row.deletion.local_deletion_time.to_le_bytes());
    for cell in &row.cells {
        update_var(hasher, cell.column.as_bytes());
        hasher.update(cell.timestamp.to_le_bytes());
        match cell.local_deletion_time {
            Some(deleted_at) => {
                hasher.update([1]);
                hasher.update(deleted_at.to_le_bytes());
            }
            None => hasher.update([0]),
        }
        update_var(hasher, &cell.value);
    }
}
