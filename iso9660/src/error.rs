//! Error types produced while decoding an ISO 9660 image.

use std::fmt;

use display_bytes::DisplayBytes;


/// Failures while decoding bytes out of a [`Source`](crate::source::Source).
#[derive(Debug)]
pub enum SourceError {
    /// The underlying block fetcher failed.
    Io(std::io::Error),

    /// A read was attempted past the end of the currently loaded window.
    BufferUnderrun { wanted: usize, available: usize },

    /// A rewind would have moved the cursor before the start of the window.
    RewindUnderrun { cursor: usize, amount: usize },

    /// A both-endian field's two halves disagreed.
    EndianMismatch { little_endian: u64, big_endian: u64 },

    /// A volume descriptor's standard identifier was not `CD001`.
    BadStandardIdentifier { found: DisplayBytes<5> },

    /// A volume descriptor's version was not the expected value.
    BadDescriptorVersion { found: u8 },

    /// A volume descriptor's type byte did not match any known variant.
    UnknownDescriptorType { found: u8 },

    /// The descriptor set contained a terminator but no primary volume descriptor.
    NoPrimaryDescriptor,

    /// A SUSP entry's declared length did not match the bytes it consumed.
    SuspLengthMismatch { signature: [u8; 2], declared: u8, consumed: usize },
}
impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e)
                => write!(f, "I/O error: {}", e),
            Self::BufferUnderrun { wanted, available }
                => write!(f, "attempted to read {} bytes with only {} available in the window", wanted, available),
            Self::RewindUnderrun { cursor, amount }
                => write!(f, "attempted to rewind {} bytes from cursor {}", amount, cursor),
            Self::EndianMismatch { little_endian, big_endian }
                => write!(f, "both-endian field mismatch: little-endian says {}, big-endian says {}", little_endian, big_endian),
            Self::BadStandardIdentifier { found }
                => write!(f, "expected standard identifier \"CD001\", found {}", found),
            Self::BadDescriptorVersion { found }
                => write!(f, "unexpected volume descriptor version {}", found),
            Self::UnknownDescriptorType { found }
                => write!(f, "unknown volume descriptor type {:#04X}", found),
            Self::NoPrimaryDescriptor
                => write!(f, "no primary volume descriptor found before the set terminator"),
            Self::SuspLengthMismatch { signature, declared, consumed }
                => write!(
                    f, "SUSP entry {:?} declared length {} but its decoder consumed {} bytes",
                    String::from_utf8_lossy(signature), declared, consumed,
                ),
        }
    }
}
impl std::error::Error for SourceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}
impl From<std::io::Error> for SourceError {
    fn from(value: std::io::Error) -> Self { Self::Io(value) }
}


/// A path or child name could not be resolved within the directory hierarchy.
#[derive(Debug)]
pub enum NotFoundError {
    /// A component of a path had no matching child in its parent directory.
    NoSuchChild { name: String },

    /// The path table contained no entry for the requested directory prefix.
    NoSuchPathTableEntry,

    /// A decoding error occurred while walking toward the requested entry.
    Source(SourceError),
}
impl fmt::Display for NotFoundError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSuchChild { name }
                => write!(f, "no such child: {:?}", name),
            Self::NoSuchPathTableEntry
                => write!(f, "no matching path table entry"),
            Self::Source(e)
                => write!(f, "decode error while resolving path: {}", e),
        }
    }
}
impl std::error::Error for NotFoundError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Source(e) => Some(e),
            _ => None,
        }
    }
}
impl From<SourceError> for NotFoundError {
    fn from(value: SourceError) -> Self { Self::Source(value) }
}
