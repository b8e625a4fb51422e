// SPDX-License-Identifier: LGPL-2.1
// Copyright 2021 Daniel Vogelbacher <daniel@chaospixel.com>

use thiserror::Error;

use crate::codecs::CodecError;

/// Error variants for reading and writing TIFF containers
#[derive(Debug, Error)]
pub enum TiffError {
  /// Overflow of input, size constraints...
  #[error("Overflow error: {}", _0)]
  Overflow(String),

  #[error("General error: {}", _0)]
  General(String),

  /// Stream does not look like a TIFF container
  #[error("Format mismatch: {}", _0)]
  FormatMismatch(String),

  #[error("Unsupported feature: {}", _0)]
  Unsupported(String),

  /// Writer protocol misuse, e.g. a missing prepare call
  #[error("Illegal state: {}", _0)]
  IllegalState(String),

  /// Precondition violation detected before any I/O
  #[error("Illegal argument: {}", _0)]
  IllegalArgument(String),

  #[error("Index out of bounds: {}", _0)]
  IndexOutOfBounds(String),

  #[error("Codec error: {}", _0)]
  Codec(#[from] CodecError),

  /// Error on internal cursor type
  #[error("I/O error: {:?}", _0)]
  Io(#[from] std::io::Error),
}

impl TiffError {
  /// True for errors caused by a stream that ended early
  pub fn is_eof(&self) -> bool {
    matches!(self, Self::Io(err) if err.kind() == std::io::ErrorKind::UnexpectedEof)
  }
}

impl From<std::num::TryFromIntError> for TiffError {
  fn from(value: std::num::TryFromIntError) -> Self {
    Self::Overflow(value.to_string())
  }
}

/// Result type for TIFF operations
pub type Result<T> = std::result::Result<T, TiffError>;
