//! PCM format description and container tags.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FormatField, FormatMismatchError};

/// Four-character code used to tag RIFF chunks.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCc(pub [u8; 4]);

impl FourCc {
    /// Outer container tag.
    pub const RIFF: Self = Self(*b"RIFF");

    /// Form type of a wave container.
    pub const WAVE: Self = Self(*b"WAVE");

    /// Format description chunk.
    pub const FMT: Self = Self(*b"fmt ");

    /// Sample data chunk.
    pub const DATA: Self = Self(*b"data");

    /// Reads a code from the first four bytes of `bytes`.
    #[must_use]
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        bytes.get(..4).and_then(|b| b.try_into().ok()).map(Self)
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in &self.0 {
            if b.is_ascii_graphic() || b == b' ' {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{b:02x}")?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCc(\"{self}\")")
    }
}

/// Format tag for integer PCM.
pub const WAVE_FORMAT_PCM: u16 = 1;

/// Size of the PCM part of a `fmt ` chunk payload.
pub const FMT_PCM_SIZE: usize = 16;

/// Layout of uncompressed PCM audio.
///
/// Mirrors the first 16 bytes of a WAVE `fmt ` chunk. Only used to check that
/// an asset can be fed to the device unchanged; nothing is ever converted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FormatDescriptor {
    /// Encoding tag (1 = integer PCM)
    pub format_tag: u16,
    /// Interleaved channel count
    pub channels: u16,
    /// Frames per second
    pub sample_rate: u32,
    /// Bytes per second
    pub avg_bytes_per_sec: u32,
    /// Bytes per frame
    pub block_align: u16,
    /// Bits per sample
    pub bits_per_sample: u16,
}

impl FormatDescriptor {
    /// 16-bit stereo PCM at 44.1 kHz.
    pub const CD_QUALITY: Self = Self::pcm(2, 44_100, 16);

    /// Describes integer PCM, deriving block align and byte rate.
    #[must_use]
    pub const fn pcm(channels: u16, sample_rate: u32, bits_per_sample: u16) -> Self {
        let block_align = channels * bits_per_sample.div_ceil(8);
        Self {
            format_tag: WAVE_FORMAT_PCM,
            channels,
            sample_rate,
            avg_bytes_per_sec: sample_rate * block_align as u32,
            block_align,
            bits_per_sample,
        }
    }

    /// Parses the PCM part of a `fmt ` chunk payload.
    ///
    /// Fields are read in native byte order, so the result is only meaningful
    /// on little-endian targets.
    #[must_use]
    pub fn from_fmt_payload(payload: &[u8]) -> Option<Self> {
        let b = payload.get(..FMT_PCM_SIZE)?;
        let u16_at = |i: usize| u16::from_ne_bytes([b[i], b[i + 1]]);
        let u32_at = |i: usize| u32::from_ne_bytes([b[i], b[i + 1], b[i + 2], b[i + 3]]);
        Some(Self {
            format_tag: u16_at(0),
            channels: u16_at(2),
            sample_rate: u32_at(4),
            avg_bytes_per_sec: u32_at(8),
            block_align: u16_at(12),
            bits_per_sample: u16_at(14),
        })
    }

    /// Serializes into a 16-byte `fmt ` payload (native byte order).
    #[must_use]
    pub fn to_fmt_payload(&self) -> [u8; FMT_PCM_SIZE] {
        let mut out = [0u8; FMT_PCM_SIZE];
        out[0..2].copy_from_slice(&self.format_tag.to_ne_bytes());
        out[2..4].copy_from_slice(&self.channels.to_ne_bytes());
        out[4..8].copy_from_slice(&self.sample_rate.to_ne_bytes());
        out[8..12].copy_from_slice(&self.avg_bytes_per_sec.to_ne_bytes());
        out[12..14].copy_from_slice(&self.block_align.to_ne_bytes());
        out[14..16].copy_from_slice(&self.bits_per_sample.to_ne_bytes());
        out
    }

    /// Value of one checked field, widened to `u32`.
    #[must_use]
    pub const fn field(&self, field: FormatField) -> u32 {
        match field {
            FormatField::Channels => self.channels as u32,
            FormatField::BitsPerSample => self.bits_per_sample as u32,
            FormatField::SampleRate => self.sample_rate,
            FormatField::FormatTag => self.format_tag as u32,
            FormatField::BlockAlign => self.block_align as u32,
            FormatField::AvgBytesPerSec => self.avg_bytes_per_sec,
        }
    }

    /// Checks that this format matches `required` exactly.
    ///
    /// Fields are compared one by one in [`FormatField::ALL`] order and the
    /// first difference is reported.
    pub fn ensure_matches(&self, required: &Self) -> Result<(), FormatMismatchError> {
        for field in FormatField::ALL {
            let (expected, found) = (required.field(field), self.field(field));
            if expected != found {
                return Err(FormatMismatchError {
                    field,
                    expected,
                    found,
                });
            }
        }
        Ok(())
    }

    /// Playback time of `bytes` bytes in this format.
    #[must_use]
    pub fn duration_of(&self, bytes: usize) -> Duration {
        if self.avg_bytes_per_sec == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(bytes as f64 / f64::from(self.avg_bytes_per_sec))
    }
}

impl Default for FormatDescriptor {
    fn default() -> Self {
        Self::CD_QUALITY
    }
}

impl fmt::Display for FormatDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ch, {} Hz, {} bit (tag {})",
            self.channels, self.sample_rate, self.bits_per_sample, self.format_tag
        )
    }
}
