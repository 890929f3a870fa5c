//! Chunked DSP Word Format
//!
//! Both bare ROM dumps and the firmware part of an installer store the DSP
//! program as a run of chunks. Each chunk starts with a 3-byte header
//! (`id`, `size_hi`, `size_lo`) followed by `((size_hi - 1) << 8) | size_lo`
//! big-endian 24-bit words. Chunk ids count down to zero.
//!
//! In a bare ROM the chunks sit at a fixed offset with a fixed 0x8000 stride,
//! selected by the total file size. In an installer they follow each other
//! back to back from offset 0.

use crate::{ChipWord, Result, SynthError};
use log::{debug, info};
use nom::multi::count;
use nom::number::complete::{be_u24, u8 as nom_u8};
use nom::sequence::tuple;
use nom::IResult;

/// Distance between chunk starts inside a bare ROM dump
pub const CHUNK_STRIDE: usize = 0x8000;

/// Fixed placement of DSP chunks inside a bare ROM dump of a given size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RomLayout {
    /// Total file size selecting this layout
    pub file_size: usize,
    /// Byte offset of the first chunk
    pub first_chunk_offset: usize,
    /// Number of chunks
    pub chunk_count: u8,
}

/// Older ABC dump: five chunks
pub const LAYOUT_ABC: RomLayout = RomLayout {
    file_size: 0x80000,
    first_chunk_offset: 0x18000,
    chunk_count: 5,
};

/// Newer dump with one additional chunk
pub const LAYOUT_EXTENDED: RomLayout = RomLayout {
    file_size: 0x100000,
    first_chunk_offset: 0x18000,
    chunk_count: 6,
};

const KNOWN_LAYOUTS: [RomLayout; 2] = [LAYOUT_ABC, LAYOUT_EXTENDED];

impl RomLayout {
    /// Select the layout for a dump of `size` bytes
    pub fn for_size(size: usize) -> Option<RomLayout> {
        KNOWN_LAYOUTS.iter().copied().find(|l| l.file_size == size)
    }

    /// Id carried by the first chunk
    pub fn last_chunk_id(&self) -> u8 {
        self.chunk_count - 1
    }
}

/// One decoded chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DspChunk {
    /// Chunk id as found in the header
    pub id: u8,
    /// 24-bit words
    pub words: Vec<ChipWord>,
}

impl DspChunk {
    /// Encoded size in bytes, header included
    pub fn encoded_len(&self) -> usize {
        3 + self.words.len() * 3
    }

    /// Serialize back into the on-disk representation
    pub fn encode(&self) -> Vec<u8> {
        let size = self.words.len() as u16;
        let mut out = Vec::with_capacity(self.encoded_len());
        out.push(self.id);
        out.push(((size >> 8) as u8).wrapping_add(1));
        out.push(size as u8);
        for word in &self.words {
            out.extend_from_slice(&[(word >> 16) as u8, (word >> 8) as u8, *word as u8]);
        }
        out
    }
}

/// Boot code and command stream recovered from a chunk run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DspProgram {
    /// Program words loaded before execution starts
    pub boot_code: Vec<ChipWord>,
    /// Program memory address of `boot_code`
    pub boot_offset: ChipWord,
    /// Words replayed through the host port after boot
    pub command_stream: Vec<ChipWord>,
}

fn chunk_header(input: &[u8]) -> IResult<&[u8], (u8, u8, u8)> {
    tuple((nom_u8, nom_u8, nom_u8))(input)
}

/// Read the chunk starting at `offset`
pub fn read_chunk(data: &[u8], offset: usize) -> Result<DspChunk> {
    let input = data.get(offset..).ok_or_else(|| {
        SynthError::Format(format!("Chunk offset 0x{offset:x} beyond end of image"))
    })?;

    let (input, (id, size_hi, size_lo)) = chunk_header(input)
        .map_err(|_| SynthError::Format(format!("Truncated chunk header at 0x{offset:x}")))?;

    if size_hi == 0 {
        return Err(SynthError::Format(format!(
            "Invalid size byte in chunk {id} at 0x{offset:x}"
        )));
    }

    let len = (((size_hi - 1) as usize) << 8) | size_lo as usize;

    let (_, words) = count(be_u24::<&[u8], nom::error::Error<&[u8]>>, len)(input).map_err(|_| {
        SynthError::Format(format!(
            "Chunk {id} at 0x{offset:x} declares {len} words past the end of the image"
        ))
    })?;

    Ok(DspChunk { id, words })
}

fn check_id(chunk: &DspChunk, expected: u8) -> Result<()> {
    if chunk.id != expected {
        return Err(SynthError::Format(format!(
            "Chunk id mismatch: expected {expected}, found {}",
            chunk.id
        )));
    }
    Ok(())
}

/// Read all chunks of a bare ROM dump
///
/// Any chunk id mismatch rejects the whole image.
pub fn parse_rom_chunks(data: &[u8]) -> Result<Vec<DspChunk>> {
    let layout = RomLayout::for_size(data.len()).ok_or_else(|| {
        SynthError::Format(format!("Unknown ROM dump size 0x{:x}", data.len()))
    })?;

    debug!(
        "ROM layout: {} chunks from 0x{:x}",
        layout.chunk_count, layout.first_chunk_offset
    );

    let mut chunks = Vec::with_capacity(layout.chunk_count as usize);
    for n in 0..layout.chunk_count {
        let offset = layout.first_chunk_offset + n as usize * CHUNK_STRIDE;
        let chunk = read_chunk(data, offset)?;
        check_id(&chunk, layout.last_chunk_id() - n)?;
        chunks.push(chunk);
    }
    Ok(chunks)
}

/// Read back-to-back chunks starting at offset 0 until the chunk with id 0
pub fn parse_contiguous_chunks(data: &[u8]) -> Result<Vec<DspChunk>> {
    let first = read_chunk(data, 0)?;
    let last_id = first.id;
    let mut offset = first.encoded_len();
    let mut chunks = vec![first];

    for n in 1..=last_id {
        let chunk = read_chunk(data, offset)?;
        check_id(&chunk, last_id - n)?;
        offset += chunk.encoded_len();
        chunks.push(chunk);
    }

    if offset < data.len() {
        debug!("{} bytes after last firmware chunk", data.len() - offset);
    }
    Ok(chunks)
}

/// Split a chunk run into boot code and command stream
///
/// The first two words of the first chunk are the boot code size and load
/// address, followed by the boot code. Everything after it, including all
/// later chunks, forms the command stream.
pub fn assemble(chunks: &[DspChunk]) -> Result<DspProgram> {
    let first = chunks
        .first()
        .ok_or_else(|| SynthError::Format("No DSP chunks".into()))?;

    if first.words.len() < 2 {
        return Err(SynthError::Format("Boot chunk too short".into()));
    }

    let boot_size = first.words[0] as usize;
    let boot_offset = first.words[1];
    let boot_end = boot_size + 2;

    if boot_end > first.words.len() {
        return Err(SynthError::Format(format!(
            "Boot code size {} exceeds first chunk ({} words)",
            boot_size,
            first.words.len() - 2
        )));
    }

    let boot_code = first.words[2..boot_end].to_vec();
    let mut command_stream = first.words[boot_end..].to_vec();
    for chunk in &chunks[1..] {
        command_stream.extend_from_slice(&chunk.words);
    }

    info!(
        "Boot code: 0x{:x} words at 0x{:x}, command stream: 0x{:x} words",
        boot_code.len(),
        boot_offset,
        command_stream.len()
    );

    Ok(DspProgram {
        boot_code,
        boot_offset,
        command_stream,
    })
}

/// Build a chunk run for `program`, splitting the command stream over
/// `chunk_count` chunks with descending ids
///
/// Used to synthesize firmware fixtures.
pub fn split_program(program: &DspProgram, chunk_count: u8) -> Vec<DspChunk> {
    let mut first = vec![program.boot_code.len() as ChipWord, program.boot_offset];
    first.extend_from_slice(&program.boot_code);

    let rest = chunk_count.saturating_sub(1) as usize;
    let per_chunk = if rest == 0 {
        0
    } else {
        program.command_stream.len().div_ceil(rest)
    };

    let mut chunks = Vec::with_capacity(chunk_count as usize);
    if rest == 0 {
        first.extend_from_slice(&program.command_stream);
    }
    chunks.push(DspChunk {
        id: chunk_count - 1,
        words: first,
    });

    for n in 0..rest {
        let start = (n * per_chunk).min(program.command_stream.len());
        let end = (start + per_chunk).min(program.command_stream.len());
        chunks.push(DspChunk {
            id: (rest - 1 - n) as u8,
            words: program.command_stream[start..end].to_vec(),
        });
    }
    chunks
}

/// Place chunks into a zero-filled bare ROM image of the given layout
pub fn build_rom(layout: &RomLayout, chunks: &[DspChunk]) -> Vec<u8> {
    let mut rom = vec![0u8; layout.file_size];
    for (n, chunk) in chunks.iter().enumerate() {
        let offset = layout.first_chunk_offset + n * CHUNK_STRIDE;
        let encoded = chunk.encode();
        rom[offset..offset + encoded.len()].copy_from_slice(&encoded);
    }
    rom
}

#[cfg(test)]
mod tests {
    use super::*;

    fn program() -> DspProgram {
        DspProgram {
            boot_code: (0..40).map(|i| 0x0a0000 | i).collect(),
            boot_offset: 0x100,
            command_stream: (0..300).map(|i| 0x0c0000 + i * 3).collect(),
        }
    }

    #[test]
    fn test_chunk_size_encoding() {
        let chunk = DspChunk {
            id: 3,
            words: vec![0x123456; 0x1ff],
        };
        let encoded = chunk.encode();
        assert_eq!(&encoded[..3], &[3, 0x02, 0xff]);
        assert_eq!(read_chunk(&encoded, 0).unwrap(), chunk);
    }

    #[test]
    fn test_zero_size_byte_rejected() {
        assert!(matches!(
            read_chunk(&[1, 0, 4, 0, 0, 0], 0),
            Err(SynthError::Format(_))
        ));
    }

    #[test]
    fn test_rom_roundtrip() {
        let program = program();
        let rom = build_rom(&LAYOUT_ABC, &split_program(&program, LAYOUT_ABC.chunk_count));
        let chunks = parse_rom_chunks(&rom).unwrap();
        assert_eq!(chunks.len(), 5);
        assert_eq!(chunks[0].id, 4);
        assert_eq!(assemble(&chunks).unwrap(), program);
    }

    #[test]
    fn test_extended_layout() {
        let program = program();
        let rom = build_rom(
            &LAYOUT_EXTENDED,
            &split_program(&program, LAYOUT_EXTENDED.chunk_count),
        );
        let chunks = parse_rom_chunks(&rom).unwrap();
        assert_eq!(chunks.len(), 6);
        assert_eq!(assemble(&chunks).unwrap(), program);
    }

    #[test]
    fn test_id_mismatch_rejects_image() {
        let mut rom = build_rom(&LAYOUT_ABC, &split_program(&program(), 5));
        rom[LAYOUT_ABC.first_chunk_offset + 2 * CHUNK_STRIDE] = 7;
        assert!(matches!(parse_rom_chunks(&rom), Err(SynthError::Format(_))));
    }

    #[test]
    fn test_unknown_size() {
        assert!(parse_rom_chunks(&[0u8; 1234]).is_err());
    }

    #[test]
    fn test_contiguous_chunks() {
        let program = program();
        let mut data = Vec::new();
        for chunk in split_program(&program, 3) {
            data.extend(chunk.encode());
        }
        // padding after the run is tolerated
        data.extend_from_slice(&[0; 5]);
        let chunks = parse_contiguous_chunks(&data).unwrap();
        assert_eq!(chunks.iter().map(|c| c.id).collect::<Vec<_>>(), vec![2, 1, 0]);
        assert_eq!(assemble(&chunks).unwrap(), program);
    }

    #[test]
    fn test_boot_size_overrun() {
        let chunk = DspChunk {
            id: 0,
            words: vec![10, 0, 1, 2],
        };
        assert!(assemble(&[chunk]).is_err());
    }
}
