//! Byte encodings of [`StateSnapshot`] for transport and storage.
//!
//! `Binary` is bincode with fixed-width little-endian integers and no trailing bytes, so equal
//! snapshots always encode to equal bytes. `Json` is human-readable: payloads and hashes are hex
//! and each reference travels as an 8-byte hex blob (`from` then `to`, little-endian).

use std::fs;
use std::path::Path;

use bincode::Options;
use serde::{Deserialize, Serialize};
use state_dag::{CellKind, ContentKind, Slice, StateKey};
use tracing::debug;

use crate::error::SnapshotError;
use crate::snapshot::{SnapshotCell, StateSnapshot};

pub const FRAME_MAGIC: [u8; 4] = *b"CDAG";
pub const FRAME_VERSION: u8 = 1;
const FRAME_HEADER_LEN: usize = FRAME_MAGIC.len() + 2;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireEncoding {
    #[default]
    Binary,
    Json,
}

impl WireEncoding {
    pub fn to_byte(self) -> u8 {
        match self {
            WireEncoding::Binary => 0,
            WireEncoding::Json => 1,
        }
    }

    pub fn from_byte(value: u8) -> Result<Self, SnapshotError> {
        match value {
            0 => Ok(WireEncoding::Binary),
            1 => Ok(WireEncoding::Json),
            other => Err(SnapshotError::UnknownEncoding(other)),
        }
    }
}

fn bincode_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
        .reject_trailing_bytes()
}

pub fn serialize(snapshot: &StateSnapshot, encoding: WireEncoding) -> Result<Vec<u8>, SnapshotError> {
    let bytes = match encoding {
        WireEncoding::Binary => bincode_options()
            .serialize(snapshot)
            .map_err(|err| SnapshotError::Encode(err.to_string()))?,
        WireEncoding::Json => serde_json::to_vec(&JsonSnapshot::from(snapshot))
            .map_err(|err| SnapshotError::Encode(err.to_string()))?,
    };
    debug!(?encoding, cells = snapshot.cells.len(), len = bytes.len(), "encoded snapshot");
    Ok(bytes)
}

/// Decodes and checks a snapshot. A present `hash` must match the recomputed root, and ids,
/// edges, roots and bindings must be structurally consistent.
pub fn deserialize(bytes: &[u8], encoding: WireEncoding) -> Result<StateSnapshot, SnapshotError> {
    let snapshot = match encoding {
        WireEncoding::Binary => bincode_options().deserialize::<StateSnapshot>(bytes)?,
        WireEncoding::Json => {
            serde_json::from_slice::<JsonSnapshot>(bytes)?.into_snapshot()?
        }
    };
    snapshot.validate()?;
    snapshot.verify_hash()?;
    Ok(snapshot)
}

/// `CDAG`, format version, encoding tag, then the encoded body.
pub fn encode_framed(snapshot: &StateSnapshot, encoding: WireEncoding) -> Result<Vec<u8>, SnapshotError> {
    let body = serialize(snapshot, encoding)?;
    let mut framed = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
    framed.extend_from_slice(&FRAME_MAGIC);
    framed.push(FRAME_VERSION);
    framed.push(encoding.to_byte());
    framed.extend_from_slice(&body);
    Ok(framed)
}

pub fn decode_framed(bytes: &[u8]) -> Result<StateSnapshot, SnapshotError> {
    if bytes.len() < FRAME_HEADER_LEN || bytes[..FRAME_MAGIC.len()] != FRAME_MAGIC {
        return Err(SnapshotError::BadMagic);
    }
    let version = bytes[FRAME_MAGIC.len()];
    if version != FRAME_VERSION {
        return Err(SnapshotError::UnsupportedVersion(version));
    }
    let encoding = WireEncoding::from_byte(bytes[FRAME_MAGIC.len() + 1])?;
    deserialize(&bytes[FRAME_HEADER_LEN..], encoding)
}

pub fn write_snapshot(
    path: impl AsRef<Path>,
    snapshot: &StateSnapshot,
    encoding: WireEncoding,
) -> Result<(), SnapshotError> {
    let path = path.as_ref();
    let framed = encode_framed(snapshot, encoding)?;
    fs::write(path, &framed)?;
    debug!(path = %path.display(), len = framed.len(), "wrote snapshot");
    Ok(())
}

pub fn read_snapshot(path: impl AsRef<Path>) -> Result<StateSnapshot, SnapshotError> {
    let bytes = fs::read(path.as_ref())?;
    decode_framed(&bytes)
}

#[derive(Serialize, Deserialize)]
struct JsonCell {
    id: u32,
    kind: CellKind,
    content: ContentKind,
    version: u32,
    payload: String,
    libraries: String,
    slice: Option<Slice>,
}

#[derive(Serialize, Deserialize)]
struct JsonSnapshot {
    cells: Vec<JsonCell>,
    references: Vec<String>,
    roots: Vec<u32>,
    bindings: Vec<(StateKey, u32)>,
    hash: Option<String>,
}

impl From<&StateSnapshot> for JsonSnapshot {
    fn from(snapshot: &StateSnapshot) -> Self {
        Self {
            cells: snapshot
                .cells
                .iter()
                .map(|cell| JsonCell {
                    id: cell.id,
                    kind: cell.kind,
                    content: cell.content,
                    version: cell.version,
                    payload: hex::encode(&cell.payload),
                    libraries: hex::encode(&cell.libraries),
                    slice: cell.slice,
                })
                .collect(),
            references: snapshot
                .references
                .iter()
                .map(|(from, to)| {
                    let mut blob = [0u8; 8];
                    blob[..4].copy_from_slice(&from.to_le_bytes());
                    blob[4..].copy_from_slice(&to.to_le_bytes());
                    hex::encode(blob)
                })
                .collect(),
            roots: snapshot.roots.clone(),
            bindings: snapshot.bindings.clone(),
            hash: snapshot.hash.map(hex::encode),
        }
    }
}

fn decode_hex(field: &str, value: &str) -> Result<Vec<u8>, SnapshotError> {
    hex::decode(value).map_err(|err| SnapshotError::Decode(format!("{field}: {err}")))
}

impl JsonSnapshot {
    fn into_snapshot(self) -> Result<StateSnapshot, SnapshotError> {
        let cells = self
            .cells
            .into_iter()
            .map(|cell| {
                Ok(SnapshotCell {
                    id: cell.id,
                    kind: cell.kind,
                    content: cell.content,
                    version: cell.version,
                    payload: decode_hex("payload", &cell.payload)?,
                    libraries: decode_hex("libraries", &cell.libraries)?,
                    slice: cell.slice,
                })
            })
            .collect::<Result<Vec<_>, SnapshotError>>()?;

        let references = self
            .references
            .iter()
            .map(|blob| {
                let raw: [u8; 8] = decode_hex("reference", blob)?
                    .try_into()
                    .map_err(|_| SnapshotError::Decode("reference blob must be 8 bytes".into()))?;
                let from = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
                let to = u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]);
                Ok((from, to))
            })
            .collect::<Result<Vec<_>, SnapshotError>>()?;

        let hash = match self.hash {
            Some(value) => Some(
                decode_hex("hash", &value)?
                    .try_into()
                    .map_err(|_| SnapshotError::Decode("hash must be 32 bytes".into()))?,
            ),
            None => None,
        };

        Ok(StateSnapshot {
            cells,
            references,
            roots: self.roots,
            bindings: self.bindings,
            hash,
        })
    }
}
