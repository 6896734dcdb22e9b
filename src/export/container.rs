//! GLB container encoding and decoding.
//!
//! A container is a 12-byte header (`glTF`, version 2, total length) followed
//! by length-prefixed chunks: the JSON document, the binary buffer, and for
//! avatars a `VRMH` chunk holding the humanoid block.

use super::scene::SceneDocument;
use super::vrm::VrmHumanoid;
use crate::error::{ExportError, Result};
use gltf_json as json;

pub const GLB_MAGIC: &[u8; 4] = b"glTF";
pub const GLB_VERSION: u32 = 2;
pub const CHUNK_JSON: u32 = 0x4E4F534A;
pub const CHUNK_BIN: u32 = 0x004E4942;
/// Sibling chunk carrying the humanoid block of avatar exports.
pub const CHUNK_HUMANOID: u32 = u32::from_le_bytes(*b"VRMH");

const HEADER_LEN: usize = 12;
const CHUNK_HEADER_LEN: usize = 8;

/// Serializes a [`SceneDocument`] into its final byte form.
#[derive(Debug, Clone)]
pub struct BinaryEncoder {
    container_limit: u64,
}

impl Default for BinaryEncoder {
    fn default() -> Self {
        Self {
            container_limit: u32::MAX as u64,
        }
    }
}

/// A text document with its buffer in a separate artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct SeparateOutput {
    /// The `.gltf` JSON text; its buffer `uri` names the sidecar.
    pub gltf: Vec<u8>,
    pub bin: Vec<u8>,
}

impl BinaryEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Largest container, in bytes, [`encode_glb`](Self::encode_glb) will produce.
    /// Clamped to the 32-bit length field of the header.
    pub fn with_container_limit(mut self, limit: u64) -> Self {
        self.container_limit = limit.min(u32::MAX as u64);
        self
    }

    pub fn container_limit(&self) -> u64 {
        self.container_limit
    }

    /// Total length of the container `doc` would encode to.
    pub fn glb_length(&self, doc: &SceneDocument) -> Result<u64> {
        let chunks = Self::chunks(doc)?;
        Ok(container_length(&chunks))
    }

    /// Whether `doc` fits in a single container.
    pub fn fits(&self, doc: &SceneDocument) -> Result<bool> {
        Ok(self.glb_length(doc)? <= self.container_limit)
    }

    /// Encode `doc` as one binary container.
    pub fn encode_glb(&self, doc: &SceneDocument) -> Result<Vec<u8>> {
        check_views(doc)?;
        let chunks = Self::chunks(doc)?;
        let total = container_length(&chunks);
        if total > self.container_limit {
            return Err(ExportError::EncodingFailure(format!(
                "container of {} bytes exceeds the {} byte limit",
                total, self.container_limit
            )));
        }

        let mut glb = Vec::with_capacity(total as usize);
        glb.extend_from_slice(GLB_MAGIC);
        glb.extend_from_slice(&GLB_VERSION.to_le_bytes());
        glb.extend_from_slice(&(total as u32).to_le_bytes());

        for chunk in &chunks {
            let padded = padded_len(chunk.data.len());
            glb.extend_from_slice(&(padded as u32).to_le_bytes());
            glb.extend_from_slice(&chunk.kind.to_le_bytes());
            glb.extend_from_slice(&chunk.data);
            glb.resize(glb.len() + (padded - chunk.data.len()), chunk.pad_byte());
            if glb.len() % 4 != 0 {
                return Err(ExportError::AlignmentViolation(format!(
                    "chunk {:#010x} ends at unaligned offset {}",
                    chunk.kind,
                    glb.len()
                )));
            }
        }

        if glb.len() as u64 != total {
            return Err(ExportError::AlignmentViolation(format!(
                "wrote {} bytes but header declares {}",
                glb.len(),
                total
            )));
        }

        log::debug!("encoded {} byte container in {} chunks", total, chunks.len());
        Ok(glb)
    }

    /// Encode `doc` as a `.gltf` text document whose buffer lives at `bin_uri`.
    pub fn encode_separate(&self, doc: &SceneDocument, bin_uri: &str) -> Result<SeparateOutput> {
        check_views(doc)?;
        let mut separate = doc.clone();
        if let Some(buffer) = separate.root.buffers.first_mut() {
            buffer.uri = Some(bin_uri.to_string());
        }
        let gltf = serde_json::to_vec_pretty(&separate.to_json_value()?)?;

        let mut bin = doc.buffer.clone();
        super::buffer::align_buffer(&mut bin);

        log::debug!(
            "encoded separate document: {} bytes of JSON, {} byte buffer",
            gltf.len(),
            bin.len()
        );
        Ok(SeparateOutput { gltf, bin })
    }

    fn chunks(doc: &SceneDocument) -> Result<Vec<Chunk>> {
        let mut chunks = vec![
            Chunk {
                kind: CHUNK_JSON,
                data: serde_json::to_vec(&doc.to_json_value()?)?,
            },
            Chunk {
                kind: CHUNK_BIN,
                data: doc.buffer.clone(),
            },
        ];
        if let Some(vrm) = &doc.vrm {
            chunks.push(Chunk {
                kind: CHUNK_HUMANOID,
                data: serde_json::to_vec(&vrm.humanoid)?,
            });
        }
        Ok(chunks)
    }
}

/// One chunk of a container.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub kind: u32,
    pub data: Vec<u8>,
}

impl Chunk {
    /// JSON-bearing chunks pad with spaces, binary ones with zeros.
    fn pad_byte(&self) -> u8 {
        if self.kind == CHUNK_BIN {
            0
        } else {
            0x20
        }
    }

    /// The chunk type as its four ASCII characters.
    pub fn tag(&self) -> String {
        String::from_utf8_lossy(&self.kind.to_le_bytes())
            .trim_end_matches('\0')
            .to_string()
    }
}

fn padded_len(len: usize) -> usize {
    (len + 3) & !3
}

fn container_length(chunks: &[Chunk]) -> u64 {
    HEADER_LEN as u64
        + chunks
            .iter()
            .map(|c| (CHUNK_HEADER_LEN + padded_len(c.data.len())) as u64)
            .sum::<u64>()
}

/// Every buffer view must lie inside the buffer and start 4-byte aligned.
fn check_views(doc: &SceneDocument) -> Result<()> {
    if doc.buffer.len() % 4 != 0 {
        return Err(ExportError::AlignmentViolation(format!(
            "buffer length {} is not a multiple of 4",
            doc.buffer.len()
        )));
    }
    for (index, view) in doc.root.buffer_views.iter().enumerate() {
        let offset = view.byte_offset.map(|o| o.0).unwrap_or(0);
        if offset % 4 != 0 {
            return Err(ExportError::AlignmentViolation(format!(
                "buffer view {} starts at unaligned offset {}",
                index, offset
            )));
        }
        if offset + view.byte_length.0 > doc.buffer.len() as u64 {
            return Err(ExportError::AlignmentViolation(format!(
                "buffer view {} ends past the {} byte buffer",
                index,
                doc.buffer.len()
            )));
        }
    }
    Ok(())
}

/// A parsed container.
#[derive(Debug, Clone)]
pub struct DecodedContainer {
    pub version: u32,
    pub root: json::Root,
    /// The raw JSON chunk, including any extensions the typed root drops.
    pub json: serde_json::Value,
    pub bin: Option<Vec<u8>>,
    /// Chunks other than JSON and BIN, in file order.
    pub extra_chunks: Vec<Chunk>,
}

impl DecodedContainer {
    pub fn node_count(&self) -> usize {
        self.root.nodes.len()
    }

    pub fn accessor_count(&self) -> usize {
        self.root.accessors.len()
    }

    pub fn buffer_len(&self) -> usize {
        self.root
            .buffers
            .first()
            .map(|b| b.byte_length.0 as usize)
            .unwrap_or(0)
    }

    /// The humanoid block from the `VRMH` chunk, if present.
    pub fn humanoid(&self) -> Result<Option<VrmHumanoid>> {
        match self.extra_chunks.iter().find(|c| c.kind == CHUNK_HUMANOID) {
            Some(chunk) => Ok(Some(serde_json::from_slice(&chunk.data)?)),
            None => Ok(None),
        }
    }
}

fn read_u32(data: &[u8], offset: usize) -> Result<u32> {
    data.get(offset..offset + 4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_le_bytes)
        .ok_or_else(|| {
            ExportError::MalformedContainer(format!("truncated at byte {}", offset))
        })
}

/// Parse a binary container produced by [`BinaryEncoder::encode_glb`].
pub fn read_container(data: &[u8]) -> Result<DecodedContainer> {
    if data.len() < HEADER_LEN || &data[0..4] != GLB_MAGIC {
        return Err(ExportError::MalformedContainer(
            "missing glTF magic".to_string(),
        ));
    }
    let version = read_u32(data, 4)?;
    if version != GLB_VERSION {
        return Err(ExportError::MalformedContainer(format!(
            "unsupported container version {}",
            version
        )));
    }
    let declared = read_u32(data, 8)? as usize;
    if declared != data.len() {
        return Err(ExportError::MalformedContainer(format!(
            "header declares {} bytes but container has {}",
            declared,
            data.len()
        )));
    }

    let mut offset = HEADER_LEN;
    let mut json_value = None;
    let mut bin = None;
    let mut extra_chunks = Vec::new();
    while offset < data.len() {
        let length = read_u32(data, offset)? as usize;
        let kind = read_u32(data, offset + 4)?;
        let start = offset + CHUNK_HEADER_LEN;
        let body = data.get(start..start + length).ok_or_else(|| {
            ExportError::MalformedContainer(format!(
                "chunk at byte {} runs past the end of the container",
                offset
            ))
        })?;
        if length % 4 != 0 {
            return Err(ExportError::MalformedContainer(format!(
                "chunk at byte {} has unaligned length {}",
                offset, length
            )));
        }

        match kind {
            CHUNK_JSON if json_value.is_none() => {
                json_value = Some(serde_json::from_slice::<serde_json::Value>(body)?);
            }
            CHUNK_BIN if bin.is_none() => bin = Some(body.to_vec()),
            _ => extra_chunks.push(Chunk {
                kind,
                data: body.to_vec(),
            }),
        }
        offset = start + length;
    }

    let json_value = json_value
        .ok_or_else(|| ExportError::MalformedContainer("no JSON chunk".to_string()))?;
    let root: json::Root = serde_json::from_value(json_value.clone())?;

    Ok(DecodedContainer {
        version,
        root,
        json: json_value,
        bin,
        extra_chunks,
    })
}
