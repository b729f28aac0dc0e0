//! Error types for Chime.

use std::fmt;

use thiserror::Error;

use crate::format::FourCc;

/// Structural problems with a RIFF/WAVE container.
///
/// Every variant is fatal to asset construction. Retrying with the same input
/// will fail the same way.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    /// The outer container tag is not `RIFF`.
    #[error("bad container tag: expected RIFF, found {found}")]
    BadContainerTag {
        /// Tag found at offset 0
        found: FourCc,
    },

    /// The declared container size cannot hold even a minimal header.
    #[error("declared container size {declared} is smaller than the {minimum} byte minimum")]
    DeclaredSizeTooSmall {
        /// Size field as read from the stream
        declared: u32,
        /// Smallest size accepted
        minimum: u32,
    },

    /// The stream ended before the declared span was read.
    #[error("container truncated: declared {declared} bytes, only {available} available")]
    Truncated {
        /// Bytes the header promised (including the 8 header bytes)
        declared: u64,
        /// Bytes actually read
        available: u64,
    },

    /// The form type at offset 8 is not `WAVE`.
    #[error("form type is not WAVE (found {found})")]
    BadFormType {
        /// Tag found at offset 8
        found: FourCc,
    },

    /// A chunk header claims more payload than the buffer holds.
    #[error("chunk {id} at offset {offset} overruns the container ({size} byte payload)")]
    ChunkOverrun {
        /// Chunk id
        id: FourCc,
        /// Offset of the chunk header
        offset: usize,
        /// Declared payload size
        size: u32,
    },

    /// The format chunk is too short to describe a PCM layout.
    #[error("fmt chunk too short: {len} bytes")]
    FmtTooShort {
        /// Payload length of the `fmt ` chunk
        len: usize,
    },

    /// No `fmt ` chunk before the end of the container.
    #[error("fmt not found")]
    FmtNotFound,

    /// No `data` chunk before the end of the container.
    #[error("data not found")]
    DataNotFound,
}

/// A field of [`FormatDescriptor`](crate::format::FormatDescriptor) that is
/// checked against the device format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatField {
    /// Number of interleaved channels
    Channels,
    /// Bit depth of one sample
    BitsPerSample,
    /// Frames per second
    SampleRate,
    /// Encoding tag (1 = integer PCM)
    FormatTag,
    /// Bytes per frame
    BlockAlign,
    /// Bytes per second
    AvgBytesPerSec,
}

impl FormatField {
    /// All checked fields, in validation order.
    pub const ALL: [Self; 6] = [
        Self::Channels,
        Self::BitsPerSample,
        Self::SampleRate,
        Self::FormatTag,
        Self::BlockAlign,
        Self::AvgBytesPerSec,
    ];

    /// Field name as it appears in the WAVE format chunk.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Channels => "nChannels",
            Self::BitsPerSample => "wBitsPerSample",
            Self::SampleRate => "nSamplesPerSec",
            Self::FormatTag => "wFormatTag",
            Self::BlockAlign => "nBlockAlign",
            Self::AvgBytesPerSec => "nAvgBytesPerSec",
        }
    }
}

impl fmt::Display for FormatField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The parsed PCM layout disagrees with the device format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("bad wave format ({field}): expected {expected}, found {found}")]
pub struct FormatMismatchError {
    /// The first field that differs
    pub field: FormatField,
    /// Value required by the device format
    pub expected: u32,
    /// Value found in the container
    pub found: u32,
}

/// Failure to turn a container into a playable asset.
#[derive(Debug, Error)]
pub enum LoadError {
    /// Container is structurally invalid
    #[error("invalid container: {0}")]
    Format(#[from] FormatError),

    /// Container is valid but not in the device format
    #[error(transparent)]
    Mismatch(#[from] FormatMismatchError),

    /// Reading the input failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LoadError {
    /// The mismatched field, if this is a format mismatch.
    #[must_use]
    pub fn mismatched_field(&self) -> Option<FormatField> {
        match self {
            Self::Mismatch(err) => Some(err.field),
            _ => None,
        }
    }
}

/// Errors reported by an audio output backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// Output device could not be opened
    #[error("audio device unavailable: {0}")]
    Device(String),

    /// A voice could not be created
    #[error("failed to create voice: {0}")]
    VoiceCreation(String),

    /// The backend cannot play this PCM layout
    #[error("unsupported device format: {0}")]
    UnsupportedFormat(String),

    /// Buffer submission was rejected
    #[error("buffer submission failed: {0}")]
    Submit(String),

    /// Voice refused to start
    #[error("failed to start voice: {0}")]
    Start(String),
}

/// Result type alias for asset loading.
pub type LoadResult<T> = Result<T, LoadError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mismatch_message_names_field() {
        let err = FormatMismatchError {
            field: FormatField::SampleRate,
            expected: 44_100,
            found: 48_000,
        };
        let msg = err.to_string();
        assert!(msg.contains("nSamplesPerSec"));
        assert!(msg.contains("48000"));
    }

    #[test]
    fn test_load_error_mismatched_field() {
        let err = LoadError::from(FormatMismatchError {
            field: FormatField::BlockAlign,
            expected: 4,
            found: 2,
        });
        assert_eq!(err.mismatched_field(), Some(FormatField::BlockAlign));
        assert_eq!(LoadError::from(FormatError::FmtNotFound).mismatched_field(), None);
    }

    #[test]
    fn test_format_error_display() {
        assert_eq!(FormatError::FmtNotFound.to_string(), "fmt not found");
        assert_eq!(FormatError::DataNotFound.to_string(), "data not found");
        let err = FormatError::BadContainerTag {
            found: FourCc(*b"RIFX"),
        };
        assert!(err.to_string().contains("RIFX"));
    }
}
