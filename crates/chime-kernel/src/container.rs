//! RIFF/WAVE container parsing.
//!
//! Turns a byte stream into validated PCM bytes. The layout is:
//!
//! ```text
//! 0      4      8      12
//! ┌──────┬──────┬──────┬──────────────────────────────────────────┐
//! │ RIFF │ size │ WAVE │ chunk, chunk, ... (each padded to even)   │
//! └──────┴──────┴──────┴──────────────────────────────────────────┘
//!                       chunk = id (4) │ size (4) │ payload (size)
//! ```
//!
//! The format chunk is compared field by field against the device format;
//! there is no conversion of any kind.
//!
//! All integer fields are read in native byte order. RIFF is little-endian,
//! so parsing is only correct on little-endian targets.

use std::io::{Read, Seek, SeekFrom};

use chime_common::{FormatDescriptor, FormatError, FourCc, LoadResult};
use tracing::debug;

/// Offset of the first chunk header (after tag, size and form type).
pub const FIRST_CHUNK_OFFSET: usize = 12;

/// Smallest declared container size accepted.
pub const MIN_DECLARED_SIZE: u32 = 16;

/// Bytes in a chunk header (id + size).
const CHUNK_HEADER_SIZE: usize = 8;

/// One chunk found while walking a container buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk<'a> {
    /// Chunk id
    pub id: FourCc,
    /// Offset of the chunk header in the buffer
    pub offset: usize,
    /// Payload bytes (exactly the declared size, without padding)
    pub payload: &'a [u8],
}

/// Iterator over the chunks of a RIFF buffer.
///
/// Yields `Err` once and then stops when a chunk claims more bytes than the
/// buffer holds. A trailing fragment too short for a chunk header ends the
/// walk silently.
#[derive(Debug, Clone)]
pub struct ChunkWalker<'a> {
    buf: &'a [u8],
    offset: usize,
    done: bool,
}

impl<'a> ChunkWalker<'a> {
    /// Starts walking `buf` at the first chunk after the form type.
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self::starting_at(buf, FIRST_CHUNK_OFFSET)
    }

    /// Starts walking `buf` at an arbitrary chunk header offset.
    #[must_use]
    pub fn starting_at(buf: &'a [u8], offset: usize) -> Self {
        Self {
            buf,
            offset,
            done: false,
        }
    }

    /// Finds the first chunk with the given id.
    pub fn find(buf: &'a [u8], id: FourCc) -> Result<Option<Chunk<'a>>, FormatError> {
        for chunk in Self::new(buf) {
            let chunk = chunk?;
            if chunk.id == id {
                return Ok(Some(chunk));
            }
        }
        Ok(None)
    }
}

impl<'a> Iterator for ChunkWalker<'a> {
    type Item = Result<Chunk<'a>, FormatError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let header_end = self.offset.checked_add(CHUNK_HEADER_SIZE)?;
        let Some(header) = self.buf.get(self.offset..header_end) else {
            self.done = true;
            return None;
        };

        let id = FourCc([header[0], header[1], header[2], header[3]]);
        let size = u32::from_ne_bytes([header[4], header[5], header[6], header[7]]);

        let payload_end = header_end.checked_add(size as usize);
        let Some(payload) = payload_end.and_then(|end| self.buf.get(header_end..end)) else {
            self.done = true;
            return Some(Err(FormatError::ChunkOverrun {
                id,
                offset: self.offset,
                size,
            }));
        };

        let chunk = Chunk {
            id,
            offset: self.offset,
            payload,
        };

        // Word alignment: odd payloads carry one pad byte.
        let padded = (size as usize).saturating_add(size as usize & 1);
        match header_end.checked_add(padded) {
            Some(next) => self.offset = next,
            None => self.done = true,
        }

        Some(Ok(chunk))
    }
}

/// PCM bytes extracted from a validated container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPcm {
    /// Format as declared by the container (equal to the required format)
    pub format: FormatDescriptor,
    /// Payload of the `data` chunk
    pub data: Vec<u8>,
}

/// Reads a whole container from `reader` and validates it against `required`.
///
/// The reader is positioned at the start of the container: the tag and size
/// are read first, then the stream is rewound and the full declared span is
/// read again into one buffer.
pub fn read_container<R: Read + Seek>(
    mut reader: R,
    required: &FormatDescriptor,
) -> LoadResult<DecodedPcm> {
    let start = reader.stream_position()?;

    let mut header = [0u8; 8];
    read_fully(&mut reader, &mut header, 8)?;
    let declared = check_header(&header)?;

    // The declared size is untrusted; never reserve more than the stream holds.
    let remaining = reader.seek(SeekFrom::End(0))?.saturating_sub(start);
    reader.seek(SeekFrom::Start(start))?;
    let span = span_of(declared);
    let mut buf = Vec::with_capacity(usize::try_from(span.min(remaining)).unwrap_or(0));
    let read = reader.by_ref().take(span).read_to_end(&mut buf)? as u64;
    if read < span {
        return Err(FormatError::Truncated {
            declared: span,
            available: read,
        }
        .into());
    }

    parse_buffer(&buf, required)
}

/// Validates an in-memory container against `required`.
///
/// Bytes past the declared span are ignored.
pub fn parse_container(bytes: &[u8], required: &FormatDescriptor) -> LoadResult<DecodedPcm> {
    let header = bytes.get(..8).ok_or(FormatError::Truncated {
        declared: 8,
        available: bytes.len() as u64,
    })?;
    let declared = check_header(header)?;

    let span = span_of(declared);
    let end = usize::try_from(span)
        .ok()
        .filter(|&end| end <= bytes.len())
        .ok_or(FormatError::Truncated {
            declared: span,
            available: bytes.len() as u64,
        })?;

    parse_buffer(&bytes[..end], required)
}

/// Checks tag and declared size, returning the declared size.
fn check_header(header: &[u8]) -> Result<u32, FormatError> {
    let tag = FourCc([header[0], header[1], header[2], header[3]]);
    if tag != FourCc::RIFF {
        return Err(FormatError::BadContainerTag { found: tag });
    }

    let declared = u32::from_ne_bytes([header[4], header[5], header[6], header[7]]);
    if declared < MIN_DECLARED_SIZE {
        return Err(FormatError::DeclaredSizeTooSmall {
            declared,
            minimum: MIN_DECLARED_SIZE,
        });
    }
    Ok(declared)
}

/// Bytes covered by a container of the given declared size.
fn span_of(declared: u32) -> u64 {
    u64::from(declared) + 8
}

/// Validates form type, format and data chunks of a complete buffer.
fn parse_buffer(buf: &[u8], required: &FormatDescriptor) -> LoadResult<DecodedPcm> {
    let form = FourCc::from_slice(&buf[8..]).ok_or(FormatError::Truncated {
        declared: FIRST_CHUNK_OFFSET as u64,
        available: buf.len() as u64,
    })?;
    if form != FourCc::WAVE {
        return Err(FormatError::BadFormType { found: form }.into());
    }

    let fmt_chunk = ChunkWalker::find(buf, FourCc::FMT)?.ok_or(FormatError::FmtNotFound)?;
    let format = FormatDescriptor::from_fmt_payload(fmt_chunk.payload).ok_or(
        FormatError::FmtTooShort {
            len: fmt_chunk.payload.len(),
        },
    )?;
    format.ensure_matches(required)?;

    let data_chunk = ChunkWalker::find(buf, FourCc::DATA)?.ok_or(FormatError::DataNotFound)?;

    debug!(
        "Parsed container: {} ({} data bytes at offset {})",
        format,
        data_chunk.payload.len(),
        data_chunk.offset
    );

    Ok(DecodedPcm {
        format,
        data: data_chunk.payload.to_vec(),
    })
}

/// Reads exactly `len` bytes, reporting a short stream as truncation.
fn read_fully<R: Read>(reader: &mut R, buf: &mut [u8], len: usize) -> LoadResult<()> {
    let mut filled = 0;
    while filled < len {
        match reader.read(&mut buf[filled..len]) {
            Ok(0) => {
                return Err(FormatError::Truncated {
                    declared: len as u64,
                    available: filled as u64,
                }
                .into())
            },
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {},
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Builders for synthetic containers used by tests across the crate.
#[cfg(test)]
pub(crate) mod testing {
    use chime_common::{FormatDescriptor, FourCc};

    /// Assembles a RIFF container from raw chunks.
    #[derive(Debug, Default)]
    pub(crate) struct WaveBuilder {
        body: Vec<u8>,
    }

    impl WaveBuilder {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        /// Appends a chunk, padding odd payloads with `pad`.
        pub(crate) fn chunk_padded(mut self, id: &[u8; 4], payload: &[u8], pad: u8) -> Self {
            self.body.extend_from_slice(id);
            self.body
                .extend_from_slice(&(payload.len() as u32).to_ne_bytes());
            self.body.extend_from_slice(payload);
            if payload.len() % 2 == 1 {
                self.body.push(pad);
            }
            self
        }

        pub(crate) fn chunk(self, id: &[u8; 4], payload: &[u8]) -> Self {
            self.chunk_padded(id, payload, 0)
        }

        pub(crate) fn fmt(self, format: &FormatDescriptor) -> Self {
            self.chunk(&FourCc::FMT.0, &format.to_fmt_payload())
        }

        pub(crate) fn data(self, pcm: &[u8]) -> Self {
            self.chunk(&FourCc::DATA.0, pcm)
        }

        /// Appends bytes verbatim.
        pub(crate) fn raw(mut self, bytes: &[u8]) -> Self {
            self.body.extend_from_slice(bytes);
            self
        }

        pub(crate) fn build(self) -> Vec<u8> {
            self.build_with_form(*b"WAVE")
        }

        pub(crate) fn build_with_form(self, form: [u8; 4]) -> Vec<u8> {
            let mut out = Vec::with_capacity(self.body.len() + 12);
            out.extend_from_slice(b"RIFF");
            out.extend_from_slice(&(self.body.len() as u32 + 4).to_ne_bytes());
            out.extend_from_slice(&form);
            out.extend_from_slice(&self.body);
            out
        }
    }

    /// A minimal valid container in `format` holding `pcm`.
    pub(crate) fn wave(format: &FormatDescriptor, pcm: &[u8]) -> Vec<u8> {
        WaveBuilder::new().fmt(format).data(pcm).build()
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{wave, WaveBuilder};
    use super::*;
    use chime_common::{FormatField, LoadError};
    use proptest::prelude::*;
    use std::io::Cursor;

    const DEVICE: FormatDescriptor = FormatDescriptor::CD_QUALITY;

    fn format_err(result: LoadResult<DecodedPcm>) -> FormatError {
        match result {
            Err(LoadError::Format(e)) => e,
            other => panic!("expected format error, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_valid_container() {
        let pcm: Vec<u8> = (0..64u8).collect();
        let decoded = parse_container(&wave(&DEVICE, &pcm), &DEVICE).expect("valid");
        assert_eq!(decoded.format, DEVICE);
        assert_eq!(decoded.data, pcm);
    }

    #[test]
    fn test_read_container_from_stream() {
        let pcm = vec![7u8; 400];
        let decoded = read_container(Cursor::new(wave(&DEVICE, &pcm)), &DEVICE).expect("valid");
        assert_eq!(decoded.data.len(), 400);
        assert_eq!(decoded.data, pcm);
    }

    #[test]
    fn test_read_container_honours_stream_position() {
        let mut bytes = b"junkjunk".to_vec();
        bytes.extend(wave(&DEVICE, &[1, 2, 3, 4]));
        let mut cursor = Cursor::new(bytes);
        cursor.set_position(8);
        let decoded = read_container(cursor, &DEVICE).expect("valid");
        assert_eq!(decoded.data, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_bad_container_tag() {
        let mut bytes = wave(&DEVICE, &[0; 4]);
        bytes[..4].copy_from_slice(b"RIFX");
        assert_eq!(
            format_err(parse_container(&bytes, &DEVICE)),
            FormatError::BadContainerTag {
                found: FourCc(*b"RIFX")
            }
        );
        assert!(matches!(
            read_container(Cursor::new(bytes), &DEVICE),
            Err(LoadError::Format(FormatError::BadContainerTag { .. }))
        ));
    }

    #[test]
    fn test_declared_size_too_small() {
        let mut bytes = wave(&DEVICE, &[0; 4]);
        bytes[4..8].copy_from_slice(&15u32.to_ne_bytes());
        assert_eq!(
            format_err(read_container(Cursor::new(bytes), &DEVICE)),
            FormatError::DeclaredSizeTooSmall {
                declared: 15,
                minimum: 16
            }
        );
    }

    #[test]
    fn test_truncated_stream() {
        let mut bytes = wave(&DEVICE, &[0; 40]);
        bytes.truncate(bytes.len() - 10);
        assert!(matches!(
            format_err(read_container(Cursor::new(bytes.clone()), &DEVICE)),
            FormatError::Truncated { .. }
        ));
        assert!(matches!(
            format_err(parse_container(&bytes, &DEVICE)),
            FormatError::Truncated { .. }
        ));
        assert!(matches!(
            format_err(read_container(Cursor::new(b"RIF".to_vec()), &DEVICE)),
            FormatError::Truncated { .. }
        ));
    }

    #[test]
    fn test_huge_declared_size_is_truncation() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&u32::MAX.to_ne_bytes());
        bytes.extend_from_slice(b"WAVE");
        bytes.extend_from_slice(&[0; 12]);

        let expected = FormatError::Truncated {
            declared: u64::from(u32::MAX) + 8,
            available: 24,
        };
        assert_eq!(format_err(read_container(Cursor::new(bytes.clone()), &DEVICE)), expected);
        assert_eq!(format_err(parse_container(&bytes, &DEVICE)), expected);
    }

    #[test]
    fn test_bad_form_type() {
        let bytes = WaveBuilder::new()
            .fmt(&DEVICE)
            .data(&[0; 4])
            .build_with_form(*b"AVI ");
        assert_eq!(
            format_err(parse_container(&bytes, &DEVICE)),
            FormatError::BadFormType {
                found: FourCc(*b"AVI ")
            }
        );
    }

    #[test]
    fn test_missing_fmt_chunk() {
        let bytes = WaveBuilder::new()
            .chunk(b"LIST", &[0; 10])
            .data(&[1, 2, 3, 4])
            .build();
        assert_eq!(
            format_err(parse_container(&bytes, &DEVICE)),
            FormatError::FmtNotFound
        );
    }

    #[test]
    fn test_missing_data_chunk() {
        let bytes = WaveBuilder::new()
            .fmt(&DEVICE)
            .chunk(b"fact", &[0; 4])
            .build();
        assert_eq!(
            format_err(parse_container(&bytes, &DEVICE)),
            FormatError::DataNotFound
        );
    }

    #[test]
    fn test_fmt_chunk_too_short() {
        let bytes = WaveBuilder::new()
            .chunk(b"fmt ", &[1, 0, 2, 0])
            .data(&[0; 4])
            .build();
        assert_eq!(
            format_err(parse_container(&bytes, &DEVICE)),
            FormatError::FmtTooShort { len: 4 }
        );
    }

    #[test]
    fn test_chunk_overrun() {
        let bytes = WaveBuilder::new()
            .fmt(&DEVICE)
            .raw(b"data")
            .raw(&1000u32.to_ne_bytes())
            .raw(&[0; 8])
            .build();
        assert!(matches!(
            format_err(parse_container(&bytes, &DEVICE)),
            FormatError::ChunkOverrun { id, .. } if id == FourCc::DATA
        ));
    }

    #[test]
    fn test_extended_fmt_chunk_is_accepted() {
        // WAVEFORMATEX with cbSize = 0 appended.
        let mut payload = DEVICE.to_fmt_payload().to_vec();
        payload.extend_from_slice(&[0, 0]);
        let bytes = WaveBuilder::new()
            .chunk(b"fmt ", &payload)
            .data(&[9; 8])
            .build();
        let decoded = parse_container(&bytes, &DEVICE).expect("valid");
        assert_eq!(decoded.data, vec![9; 8]);
    }

    #[test]
    fn test_each_field_mismatch_is_named() {
        let cases = [
            (FormatField::Channels, FormatDescriptor { channels: 1, ..DEVICE }),
            (FormatField::BitsPerSample, FormatDescriptor { bits_per_sample: 8, ..DEVICE }),
            (FormatField::SampleRate, FormatDescriptor { sample_rate: 48_000, ..DEVICE }),
            (FormatField::FormatTag, FormatDescriptor { format_tag: 3, ..DEVICE }),
            (FormatField::BlockAlign, FormatDescriptor { block_align: 8, ..DEVICE }),
            (FormatField::AvgBytesPerSec, FormatDescriptor { avg_bytes_per_sec: 1, ..DEVICE }),
        ];

        for (field, format) in cases {
            let result = parse_container(&wave(&format, &[0; 8]), &DEVICE);
            match result {
                Err(LoadError::Mismatch(err)) => {
                    assert_eq!(err.field, field, "wrong field for {format:?}");
                    assert_eq!(err.expected, DEVICE.field(field));
                    assert_eq!(err.found, format.field(field));
                },
                other => panic!("expected mismatch on {field}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_walker_skips_padding_after_odd_chunk() {
        let bytes = WaveBuilder::new()
            .chunk(b"odd1", &[1, 2, 3])
            .chunk(b"evn2", &[4, 5])
            .chunk(b"odd3", &[6])
            .build();
        let ids: Vec<_> = ChunkWalker::new(&bytes)
            .map(|c| c.expect("chunk").id)
            .collect();
        assert_eq!(
            ids,
            vec![FourCc(*b"odd1"), FourCc(*b"evn2"), FourCc(*b"odd3")]
        );
    }

    #[test]
    #[cfg(target_endian = "little")]
    fn test_padding_decoy_is_not_found() {
        // After the odd chunk, a walker that forgets the pad byte starts one
        // byte early and reads: "data" | size 2 | payload [0, 'd'].
        // A correct walker reads: "ata\x02" | size 0 | then the real "data".
        let real_pcm = [0x11u8, 0x22, 0x33, 0x44];
        let bytes = WaveBuilder::new()
            .fmt(&DEVICE)
            .chunk_padded(b"odd ", &[1, 2, 3], b'd')
            .raw(b"ata\x02")
            .raw(&[0, 0, 0, 0])
            .data(&real_pcm)
            .build();

        let decoded = parse_container(&bytes, &DEVICE).expect("valid");
        assert_eq!(decoded.data, real_pcm);

        // Sanity check: the unpadded view really does collide.
        let odd_offset = 12 + 8 + 16;
        let unpadded_next = odd_offset + 8 + 3;
        assert_eq!(&bytes[unpadded_next..unpadded_next + 4], b"data");
    }

    #[test]
    fn test_data_chunk_byte_length_exact() {
        let pcm = vec![0xAB; 1001 * 4];
        let decoded = parse_container(&wave(&DEVICE, &pcm), &DEVICE).expect("valid");
        assert_eq!(decoded.data.len(), pcm.len());
    }

    proptest! {
        #[test]
        fn prop_data_survives_arbitrary_leading_chunks(
            junk in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..9), 0..5),
            frames in prop::collection::vec(any::<[u8; 4]>(), 0..64),
        ) {
            let pcm: Vec<u8> = frames.concat();
            let mut builder = WaveBuilder::new();
            for payload in &junk {
                builder = builder.chunk_padded(b"junk", payload, 0xFF);
            }
            let bytes = builder.fmt(&DEVICE).data(&pcm).build();

            let decoded = parse_container(&bytes, &DEVICE).expect("valid");
            prop_assert_eq!(decoded.data, pcm);
        }
    }
}
