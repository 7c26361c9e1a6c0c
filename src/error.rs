// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::coding::{DecodeError, EncodeError};

/// Represents errors that can occur in the fetch storage engine (§7).
#[derive(Debug)]
pub enum Error {
    /// I/O error talking to the backing random-access file.
    Io(std::io::Error),

    /// Serialization of an on-disk record failed.
    Encode(EncodeError),

    /// Deserialization of an on-disk record failed.
    Decode(DecodeError),

    /// A candidate block's ciphertext did not match its expected content key.
    VerifyFailed,

    /// A verified ciphertext block could not be decrypted into plaintext.
    DecodeFailed,

    /// The key list's trailing CRC-32 did not match its contents.
    KeysCorrupt,

    /// The FEC codec could not reconstruct missing blocks.
    FecFailure(String),

    /// The segment (or the whole splitfile) is terminally unrecoverable.
    Unrecoverable,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Encode(e) => write!(f, "encode error: {e}"),
            Self::Decode(e) => write!(f, "decode error: {e}"),
            Self::VerifyFailed => write!(f, "block verification failed"),
            Self::DecodeFailed => write!(f, "block decode failed"),
            Self::KeysCorrupt => write!(f, "segment key list is corrupt"),
            Self::FecFailure(msg) => write!(f, "FEC failure: {msg}"),
            Self::Unrecoverable => write!(f, "segment is unrecoverable"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Encode(e) => Some(e),
            Self::Decode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<EncodeError> for Error {
    fn from(value: EncodeError) -> Self {
        Self::Encode(value)
    }
}

impl From<DecodeError> for Error {
    fn from(value: DecodeError) -> Self {
        Self::Decode(value)
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;
