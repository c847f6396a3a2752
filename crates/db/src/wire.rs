//! Wire encoding of read queries and responses.
//!
//! The protocol version is negotiated per connection. Digest versions
//! ride inside query and response frames with a historical quirk: legacy
//! peers (protocol V1) encode the digest version as the handshake number
//! `8` rather than an ordinal, and only understand digest V1. Newer
//! peers exchange plain ordinals.

use borsh::{BorshDeserialize, BorshSerialize};
use tessera_primitives::{Hash, TableRef};
use tracing::warn;

use crate::digest::DigestVersion;
use crate::error::ReadError;
use crate::filter::{ColumnFilter, DataLimits, RowFilter};
use crate::pipeline::IndexRegistry;
use crate::query::{IndexId, QueryDescriptor};
use crate::response::{PartitionData, ReadResponse};

/// Negotiated framing version for peer connections.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProtocolVersion {
    V1 = 1,
    V2 = 2,
}

/// Digest-version value legacy peers put on the wire. Pre-ordinal peers
/// sent their handshake number here; `8` is the last such number and
/// always meant digest V1.
pub const LEGACY_HANDSHAKE_VERSION: u32 = 8;

impl ProtocolVersion {
    pub const CURRENT: Self = Self::V2;

    #[must_use]
    pub const fn number(self) -> u32 {
        self as u32
    }

    #[must_use]
    pub const fn from_number(number: u32) -> Option<Self> {
        match number {
            1 => Some(Self::V1),
            2 => Some(Self::V2),
            _ => None,
        }
    }

    const fn encodes_digest_ordinal(self) -> bool {
        self.number() >= Self::V2.number()
    }
}

mod flags {
    /// The query requests a digest rather than data.
    pub const DIGEST: u8 = 0x01;
    /// Encoding used by retired clients; always rejected.
    pub const UNSUPPORTED: u8 = 0x02;
    /// The query names a secondary index.
    pub const INDEX: u8 = 0x04;

    pub const KNOWN: u8 = DIGEST | UNSUPPORTED | INDEX;
}

/// Map a digest version to its on-wire integer for the given peer.
pub fn digest_version_int(
    version: DigestVersion,
    protocol: ProtocolVersion,
) -> Result<u32, ReadError> {
    if protocol.encodes_digest_ordinal() {
        return Ok(version.ordinal());
    }
    match version {
        DigestVersion::V1 => Ok(LEGACY_HANDSHAKE_VERSION),
        DigestVersion::V2 => Err(ReadError::Protocol(format!(
            "digest version {version:?} is not expressible to a protocol V1 peer"
        ))),
    }
}

/// Inverse of [`digest_version_int`].
pub fn from_digest_version_int(
    raw: u32,
    protocol: ProtocolVersion,
) -> Result<DigestVersion, ReadError> {
    if protocol.encodes_digest_ordinal() {
        return DigestVersion::from_ordinal(raw)
            .ok_or_else(|| ReadError::Protocol(format!("unknown digest version ordinal {raw}")));
    }
    if raw == LEGACY_HANDSHAKE_VERSION {
        Ok(DigestVersion::V1)
    } else {
        Err(ReadError::Protocol(format!(
            "unexpected digest version {raw} from a protocol V1 peer"
        )))
    }
}

fn resolve_index(id: IndexId, registry: &dyn IndexRegistry) -> Result<IndexId, ReadError> {
    if registry.lookup(id).is_some() {
        Ok(id)
    } else {
        Err(ReadError::UnknownIndex { index: id })
    }
}

#[derive(BorshSerialize, BorshDeserialize)]
struct WireQuery {
    table: TableRef,
    now_in_sec: u32,
    column_filter: ColumnFilter,
    row_filter: RowFilter,
    limits: DataLimits,
}

fn wire_err(err: std::io::Error) -> ReadError {
    ReadError::Protocol(err.to_string())
}

/// Encode a query for the given peer version.
pub fn serialize_query(
    query: &QueryDescriptor,
    protocol: ProtocolVersion,
) -> Result<Vec<u8>, ReadError> {
    let mut out = Vec::new();
    let mut head = 0_u8;
    if query.digest_version.is_some() {
        head |= flags::DIGEST;
    }
    if query.index.is_some() {
        head |= flags::INDEX;
    }
    out.push(head);

    let body = WireQuery {
        table: query.table.clone(),
        now_in_sec: query.now_in_sec,
        column_filter: query.column_filter.clone(),
        row_filter: query.row_filter.clone(),
        limits: query.limits,
    };
    body.serialize(&mut out).map_err(wire_err)?;

    if let Some(version) = query.digest_version {
        digest_version_int(version, protocol)?
            .serialize(&mut out)
            .map_err(wire_err)?;
    }
    if let Some(index) = query.index {
        index.0.serialize(&mut out).map_err(wire_err)?;
    }
    Ok(out)
}

/// Decode a query from a peer. An index id the registry cannot resolve
/// is dropped with a warning rather than failing the frame; schema
/// changes race with in-flight messages.
pub fn deserialize_query(
    mut buf: &[u8],
    protocol: ProtocolVersion,
    registry: &dyn IndexRegistry,
) -> Result<QueryDescriptor, ReadError> {
    let head = u8::deserialize(&mut buf).map_err(wire_err)?;
    if head & flags::UNSUPPORTED != 0 {
        return Err(ReadError::Protocol(
            "query uses a retired legacy encoding".to_owned(),
        ));
    }
    if head & !flags::KNOWN != 0 {
        return Err(ReadError::Protocol(format!(
            "unknown query flags {head:#04x}"
        )));
    }

    let body = WireQuery::deserialize(&mut buf).map_err(wire_err)?;

    let digest_version = if head & flags::DIGEST != 0 {
        let raw = u32::deserialize(&mut buf).map_err(wire_err)?;
        Some(from_digest_version_int(raw, protocol)?)
    } else {
        None
    };

    let index = if head & flags::INDEX != 0 {
        let id = IndexId(u32::deserialize(&mut buf).map_err(wire_err)?);
        match resolve_index(id, registry) {
            Ok(id) => Some(id),
            Err(err) => {
                warn!(
                    table = %body.table,
                    %err,
                    "continuing without index acceleration"
                );
                None
            }
        }
    } else {
        None
    };

    if !buf.is_empty() {
        return Err(ReadError::Protocol(format!(
            "{} trailing bytes after query frame",
            buf.len()
        )));
    }

    Ok(QueryDescriptor {
        table: body.table,
        now_in_sec: body.now_in_sec,
        column_filter: body.column_filter,
        row_filter: body.row_filter,
        limits: body.limits,
        index,
        digest_version,
    })
}

const RESPONSE_DATA: u8 = 0;
const RESPONSE_DIGEST: u8 = 1;

/// Encode a response for the given peer version.
pub fn serialize_response(
    response: &ReadResponse,
    protocol: ProtocolVersion,
) -> Result<Vec<u8>, ReadError> {
    let mut out = Vec::new();
    match response {
        ReadResponse::Data { partitions } => {
            out.push(RESPONSE_DATA);
            partitions.serialize(&mut out).map_err(wire_err)?;
        }
        ReadResponse::Digest { digest, version } => {
            out.push(RESPONSE_DIGEST);
            digest.serialize(&mut out).map_err(wire_err)?;
            digest_version_int(*version, protocol)?
                .serialize(&mut out)
                .map_err(wire_err)?;
        }
    }
    Ok(out)
}

/// Decode a response from a peer.
pub fn deserialize_response(
    mut buf: &[u8],
    protocol: ProtocolVersion,
) -> Result<ReadResponse, ReadError> {
    let kind = u8::deserialize(&mut buf).map_err(wire_err)?;
    let response = match kind {
        RESPONSE_DATA => ReadResponse::Data {
            partitions: Vec::<PartitionData>::deserialize(&mut buf).map_err(wire_err)?,
        },
        RESPONSE_DIGEST => {
            let digest = Hash::deserialize(&mut buf).map_err(wire_err)?;
            let raw = u32::deserialize(&mut buf).map_err(wire_err)?;
            ReadResponse::Digest {
                digest,
                version: from_digest_version_int(raw, protocol)?,
            }
        }
        other => {
            return Err(ReadError::Protocol(format!(
                "unknown response kind {other}"
            )))
        }
    };
    if !buf.is_empty() {
        return Err(ReadError::Protocol(format!(
            "{} trailing bytes after response frame",
            buf.len()
        )));
    }
    Ok(response)
}
