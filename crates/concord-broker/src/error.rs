//! Error types for the fabric layer.

use std::fmt;
use std::io;

/// Errors raised while encoding or decoding wire frames.
#[derive(Debug)]
pub enum WireError {
    /// A frame could not be decoded (truncated or corrupt data).
    MalformedFrame {
        /// Human-readable description of what went wrong.
        detail: String,
    },
    /// A frame type tag is not recognized.
    UnknownTag {
        /// The unrecognized tag.
        tag: u8,
    },
    /// A value kind code is not recognized.
    UnknownValueKind {
        /// The unrecognized code.
        code: u8,
    },
    /// The peer speaks a protocol version this build does not.
    UnsupportedVersion {
        /// The version announced by the peer.
        found: u8,
    },
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedFrame { detail } => write!(f, "malformed frame: {detail}"),
            Self::UnknownTag { tag } => write!(f, "unknown frame tag {tag}"),
            Self::UnknownValueKind { code } => write!(f, "unknown value kind code {code}"),
            Self::UnsupportedVersion { found } => {
                write!(f, "unsupported protocol version {found}")
            }
        }
    }
}

impl std::error::Error for WireError {}

impl From<io::Error> for WireError {
    fn from(e: io::Error) -> Self {
        Self::MalformedFrame {
            detail: e.to_string(),
        }
    }
}

/// Errors raised by a transport link.
#[derive(Debug, PartialEq, Eq)]
pub enum LinkError {
    /// The far side of the link is gone.
    Disconnected,
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "link disconnected"),
        }
    }
}

impl std::error::Error for LinkError {}
