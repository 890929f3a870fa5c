//! Installer Container Format
//!
//! Vendor installers are `FORM` containers: an 8-byte outer header followed by
//! chunks of 4-byte ASCII name + 4-byte big-endian length + payload. Chunks are
//! consumed in file order, nothing in the file is trusted as an index.
//!
//! The firmware sub-image found inside an installer uses the same chunk scheme
//! one level deeper. Its chunks carry the actual payload in 35-byte records,
//! in one of two encodings:
//! - Variant A: reserved byte, 2-byte big-endian byte offset, 32 payload bytes,
//!   two trailing bytes after the last record (`len % 35 == 2`)
//! - Variant B: chunk id byte, 1-byte running counter, reserved byte,
//!   32 payload bytes (`len % 35 == 0`)

use crate::{Result, SynthError};
use log::debug;
use nom::bytes::complete::take;
use nom::number::complete::be_u32;
use nom::IResult;

/// Magic of the outer container header
pub const CONTAINER_MAGIC: &[u8; 4] = b"FORM";

/// Name of the chunk holding the installer's file table
pub const FILE_TABLE_CHUNK: &[u8; 4] = b"TABL";

/// Size of one encoded payload record
pub const RECORD_SIZE: usize = 35;

/// Payload bytes carried per record
pub const PAYLOAD_SIZE: usize = 32;

/// Trailing bytes after the last variant A record
const VARIANT_A_TRAILER: usize = 2;

/// Named, sized byte blob inside a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerChunk {
    /// 4-byte chunk name
    pub name: [u8; 4],
    /// Chunk payload
    pub data: Vec<u8>,
}

impl ContainerChunk {
    /// Chunk name as text (lossy)
    pub fn name_str(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }

    /// First name byte, identifies which firmware part a chunk belongs to
    pub fn file_id(&self) -> u8 {
        self.name[0]
    }
}

/// Payload record encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordVariant {
    /// Reserved byte + 2-byte byte offset
    IndexedWide,
    /// Chunk id + 1-byte counter + reserved byte
    IndexedNarrow,
}

impl RecordVariant {
    /// Detect the record encoding from the chunk size
    pub fn detect(chunk_size: usize) -> Option<Self> {
        match chunk_size % RECORD_SIZE {
            VARIANT_A_TRAILER => Some(RecordVariant::IndexedWide),
            0 => Some(RecordVariant::IndexedNarrow),
            _ => None,
        }
    }
}

/// Check for the `FORM` magic
pub fn is_installer(data: &[u8]) -> bool {
    data.len() >= 4 && &data[0..4] == CONTAINER_MAGIC
}

fn chunk_header(input: &[u8]) -> IResult<&[u8], ([u8; 4], u32)> {
    let (input, name) = take(4usize)(input)?;
    let (input, size) = be_u32(input)?;
    Ok((input, ([name[0], name[1], name[2], name[3]], size)))
}

/// Split a container into its chunks
///
/// The first 8 bytes are the container's own header and are skipped. Empty
/// chunks are dropped, a chunk whose length runs past the end of the data is a
/// format error.
pub fn parse_chunks(data: &[u8]) -> Result<Vec<ContainerChunk>> {
    let (mut input, (form, form_size)) = chunk_header(data)
        .map_err(|_| SynthError::Format("Container too small for header".into()))?;

    debug!(
        "Container {} size {}",
        String::from_utf8_lossy(&form),
        form_size
    );

    let mut chunks = Vec::new();

    while input.len() >= 8 {
        let (rest, (name, size)) = chunk_header(input)
            .map_err(|_| SynthError::Format("Truncated chunk header".into()))?;

        let size = size as usize;
        if size > rest.len() {
            return Err(SynthError::Format(format!(
                "Chunk '{}' claims {} bytes but only {} remain",
                String::from_utf8_lossy(&name),
                size,
                rest.len()
            )));
        }

        let (payload, rest) = rest.split_at(size);
        if size > 0 {
            chunks.push(ContainerChunk {
                name,
                data: payload.to_vec(),
            });
        }
        input = rest;
    }

    Ok(chunks)
}

/// Read the NUL-separated file table (1-byte count followed by names)
pub fn parse_file_table(table: &ContainerChunk) -> Result<Vec<String>> {
    if &table.name != FILE_TABLE_CHUNK {
        return Err(SynthError::Format("Installer file table not found".into()));
    }

    let Some((&count, names)) = table.data.split_first() else {
        return Err(SynthError::Format("Installer file table is empty".into()));
    };

    let filenames: Vec<String> = names
        .split(|&b| b == 0)
        .filter(|name| !name.is_empty())
        .map(|name| String::from_utf8_lossy(name).into_owned())
        .collect();

    if filenames.len() != count as usize {
        debug!(
            "File table declares {} entries, found {}",
            count,
            filenames.len()
        );
    }

    Ok(filenames)
}

/// Locate the sub-image for `filename` in an installer's chunk list
///
/// Entry `i` of the file table names chunk `i + 1`.
pub fn find_sub_image<'a>(chunks: &'a [ContainerChunk], filename: &str) -> Result<&'a [u8]> {
    let table = chunks
        .first()
        .ok_or_else(|| SynthError::Format("Installer contains no chunks".into()))?;

    let filenames = parse_file_table(table)?;

    for (i, name) in filenames.iter().enumerate() {
        let Some(chunk) = chunks.get(i + 1) else {
            break;
        };
        debug!(
            "Chunk {} = {} (size=0x{:x})",
            chunk.name_str(),
            name,
            chunk.data.len()
        );
        if name == filename {
            return Ok(&chunk.data);
        }
    }

    Err(SynthError::Format(format!(
        "Installer has no sub-image named '{filename}'"
    )))
}

/// Decode one record-encoded chunk payload
pub fn unpack_payload(data: &[u8]) -> Result<Vec<u8>> {
    match RecordVariant::detect(data.len()) {
        Some(RecordVariant::IndexedWide) => unpack_variant_a(data),
        Some(RecordVariant::IndexedNarrow) => unpack_variant_b(data),
        None => Err(SynthError::Format(format!(
            "Chunk size {} matches no record encoding",
            data.len()
        ))),
    }
}

fn unpack_variant_a(data: &[u8]) -> Result<Vec<u8>> {
    let records = &data[..data.len() - VARIANT_A_TRAILER];
    let mut content = Vec::with_capacity(records.len() / RECORD_SIZE * PAYLOAD_SIZE);
    let mut expected: u16 = 0;

    for record in records.chunks_exact(RECORD_SIZE) {
        let index = u16::from_be_bytes([record[1], record[2]]);
        if index != expected {
            return Err(SynthError::Format(format!(
                "Record offset mismatch: expected 0x{expected:04x}, found 0x{index:04x}"
            )));
        }
        content.extend_from_slice(&record[3..]);
        expected = expected.wrapping_add(PAYLOAD_SIZE as u16);
    }

    Ok(content)
}

fn unpack_variant_b(data: &[u8]) -> Result<Vec<u8>> {
    let mut content = Vec::with_capacity(data.len() / RECORD_SIZE * PAYLOAD_SIZE);
    let mut expected: u8 = 0;

    for record in data.chunks_exact(RECORD_SIZE) {
        if record[1] != expected {
            return Err(SynthError::Format(format!(
                "Record counter mismatch: expected {}, found {}",
                expected, record[1]
            )));
        }
        content.extend_from_slice(&record[3..]);
        expected = expected.wrapping_add(1);
    }

    Ok(content)
}

/// Concatenate the decoded payload of every chunk whose name starts with `file_id`
///
/// Returns an empty vector when no chunk belongs to the part.
pub fn unpack_part(chunks: &[ContainerChunk], file_id: u8) -> Result<Vec<u8>> {
    let mut content = Vec::new();
    for chunk in chunks.iter().filter(|c| c.file_id() == file_id) {
        content.extend(unpack_payload(&chunk.data)?);
    }
    Ok(content)
}

/// Encode `payload` as variant A records
///
/// The last record is zero-padded to 32 bytes.
pub fn pack_variant_a(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len().div_ceil(PAYLOAD_SIZE) * RECORD_SIZE + 2);
    for (i, window) in payload.chunks(PAYLOAD_SIZE).enumerate() {
        let offset = ((i * PAYLOAD_SIZE) as u16).to_be_bytes();
        out.extend_from_slice(&[0, offset[0], offset[1]]);
        out.extend_from_slice(window);
        out.resize(out.len() + PAYLOAD_SIZE - window.len(), 0);
    }
    out.extend_from_slice(&[0; VARIANT_A_TRAILER]);
    out
}

/// Encode `payload` as variant B records tagged with `chunk_id`
///
/// The last record is zero-padded to 32 bytes.
pub fn pack_variant_b(payload: &[u8], chunk_id: u8) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len().div_ceil(PAYLOAD_SIZE) * RECORD_SIZE);
    for (i, window) in payload.chunks(PAYLOAD_SIZE).enumerate() {
        out.extend_from_slice(&[chunk_id, i as u8, 0]);
        out.extend_from_slice(window);
        out.resize(out.len() + PAYLOAD_SIZE - window.len(), 0);
    }
    out
}

/// Serialize chunks into a container with the given outer magic
pub fn build_container(magic: &[u8; 4], chunks: &[ContainerChunk]) -> Vec<u8> {
    let body_len: usize = chunks.iter().map(|c| 8 + c.data.len()).sum();
    let mut out = Vec::with_capacity(8 + body_len);
    out.extend_from_slice(magic);
    out.extend_from_slice(&(body_len as u32).to_be_bytes());
    for chunk in chunks {
        out.extend_from_slice(&chunk.name);
        out.extend_from_slice(&(chunk.data.len() as u32).to_be_bytes());
        out.extend_from_slice(&chunk.data);
    }
    out
}
