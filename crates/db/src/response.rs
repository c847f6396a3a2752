//! Materialized read responses.

use borsh::{BorshDeserialize, BorshSerialize};
use futures_util::stream::{self, StreamExt};
use tessera_primitives::Hash;

use crate::digest::DigestVersion;
use crate::error::ReadError;
use crate::partition::{
    DeletionTime, Partition, PartitionKey, PartitionStream, Row, Unfiltered,
};

/// One partition of a materialized data result.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct PartitionData {
    pub key: PartitionKey,
    pub partition_deletion: DeletionTime,
    pub static_row: Row,
    pub content: Vec<Unfiltered>,
}

impl PartitionData {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.content.is_empty() && self.static_row.is_empty() && self.partition_deletion.is_live()
    }

    /// Re-enter the stream form, for feeding a materialized result back
    /// through pipeline stages.
    #[must_use]
    pub fn into_partition(self) -> Partition {
        Partition::from_content(self.key, self.partition_deletion, self.static_row, self.content)
    }
}

/// The result of a local read: full data, or a digest for cross-replica
/// comparison.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum ReadResponse {
    Data {
        partitions: Vec<PartitionData>,
    },
    Digest {
        digest: Hash,
        version: DigestVersion,
    },
}

impl ReadResponse {
    #[must_use]
    pub fn is_digest(&self) -> bool {
        matches!(self, Self::Digest { .. })
    }

    /// Whether two responses agree for consistency purposes. Digests
    /// compare byte-exact and only within the same digest version.
    #[must_use]
    pub fn matches(&self, other: &Self) -> bool {
        match (self, other) {
            (
                Self::Digest { digest: a, version: va },
                Self::Digest { digest: b, version: vb },
            ) => va == vb && a == b,
            (Self::Data { partitions: a }, Self::Data { partitions: b }) => a == b,
            _ => false,
        }
    }
}

/// Drain a fully-transformed stream into a data response, dropping
/// partitions that carry nothing.
pub async fn materialize(mut partitions: PartitionStream) -> Result<Vec<PartitionData>, ReadError> {
    let mut out = Vec::new();
    while let Some(partition) = partitions.next().await {
        let Partition {
            key,
            partition_deletion,
            static_row,
            mut content,
        } = partition?;
        let mut collected = Vec::new();
        while let Some(unfiltered) = content.next().await {
            collected.push(unfiltered?);
        }
        let data = PartitionData {
            key,
            partition_deletion,
            static_row,
            content: collected,
        };
        if !data.is_empty() {
            out.push(data);
        }
    }
    Ok(out)
}

/// Lift materialized partitions back into a stream.
#[must_use]
pub fn into_stream(partitions: Vec<PartitionData>) -> PartitionStream {
    stream::iter(
        partitions
            .into_iter()
            .map(|data| Ok(data.into_partition())),
    )
    .boxed()
}
