//! Library to read, write and incrementally update TIFF image containers.
//!
//! The crate covers the self-describing directory (IFD) model, the
//! strip/tile geometry, the incremental writer protocol (sequences,
//! insertion, empty images and in-place pixel replacement) and the
//! LZW, CCITT fax, PackBits, Deflate and JPEG codecs.
//!
//! # Example
//! ```rust,no_run
//! use std::fs::File;
//! use tiffio::pixels::Raster;
//! use tiffio::writer::{TiffWriter, WriteParam};
//! use tiffio::CompressionMethod;
//!
//! fn main() -> tiffio::Result<()> {
//!   let raster = Raster::new_u8(64, 64, 1, vec![0x80; 64 * 64]);
//!   let mut file = File::options().read(true).write(true).create(true).truncate(true).open("gray.tif")?;
//!   let mut writer = TiffWriter::new(&mut file)?;
//!   let param = WriteParam {
//!     compression: CompressionMethod::LZW,
//!     ..Default::default()
//!   };
//!   writer.write(None, &raster, &param)?;
//!   Ok(())
//! }
//! ```

#![deny(
    //missing_docs,
    //missing_debug_implementations,
    //missing_copy_implementations,
    //unsafe_code,
    unstable_features,
    //unused_import_braces,
    //unused_qualifications
  )]

pub mod bits;
pub mod codecs;
pub mod entry;
pub mod error;
pub mod ifd;
pub mod pixels;
pub mod reader;
pub mod tags;
pub mod tiles;
pub mod value;
pub mod writer;

pub use entry::Entry;
pub use error::{Result, TiffError};
pub use ifd::IFD;
pub use reader::{DecodeStatus, DecodedImage, ReadParam, ReaderOptions, TiffReader};
pub use value::{FieldType, Rational, SRational, TiffAscii, Value};
pub use writer::{ImageSpec, ReplaceParam, ReplaceSession, TiffWriter, WriteParam, WriterOptions};

pub(crate) const TIFF_MAGIC: u16 = 42;

/// Size of the file header: byte order mark, magic and first IFD offset
pub(crate) const HEADER_SIZE: u64 = 8;

/// Size of a single directory entry on disk
pub(crate) const ENTRY_SIZE: u64 = 12;

#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, num_enum::TryFromPrimitive, num_enum::IntoPrimitive)]
#[repr(u16)]
pub enum CompressionMethod {
  None = 1,
  /// CCITT modified Huffman RLE
  Huffman = 2,
  Fax3 = 3,
  Fax4 = 4,
  LZW = 5,
  JPEG = 6,
  // "Extended JPEG" or "new JPEG" style
  ModernJPEG = 7,
  Deflate = 8,
  OldDeflate = 0x80B2,
  PackBits = 0x8005,
}

impl Default for CompressionMethod {
  fn default() -> Self {
    Self::None
  }
}

impl From<CompressionMethod> for Value {
  fn from(value: CompressionMethod) -> Self {
    Value::Short(vec![value.into()])
  }
}

#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, num_enum::TryFromPrimitive, num_enum::IntoPrimitive)]
#[repr(u16)]
pub enum PhotometricInterpretation {
  WhiteIsZero = 0,
  BlackIsZero = 1,
  RGB = 2,
  RGBPalette = 3,
  TransparencyMask = 4,
  CMYK = 5,
  YCbCr = 6,
  CIELab = 8,
}

impl From<PhotometricInterpretation> for Value {
  fn from(value: PhotometricInterpretation) -> Self {
    Value::Short(vec![value.into()])
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, num_enum::TryFromPrimitive, num_enum::IntoPrimitive)]
#[repr(u16)]
pub enum PlanarConfiguration {
  Chunky = 1,
  Planar = 2,
}

impl Default for PlanarConfiguration {
  fn default() -> Self {
    Self::Chunky
  }
}

impl From<PlanarConfiguration> for Value {
  fn from(value: PlanarConfiguration) -> Self {
    Value::Short(vec![value.into()])
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, num_enum::TryFromPrimitive, num_enum::IntoPrimitive)]
#[repr(u16)]
pub enum Predictor {
  None = 1,
  Horizontal = 2,
}

impl Default for Predictor {
  fn default() -> Self {
    Self::None
  }
}

impl From<Predictor> for Value {
  fn from(value: Predictor) -> Self {
    Value::Short(vec![value.into()])
  }
}

/// Bit order of compressed data inside a byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, num_enum::TryFromPrimitive, num_enum::IntoPrimitive)]
#[repr(u16)]
pub enum FillOrder {
  MsbFirst = 1,
  LsbFirst = 2,
}

impl Default for FillOrder {
  fn default() -> Self {
    Self::MsbFirst
  }
}

impl From<FillOrder> for Value {
  fn from(value: FillOrder) -> Self {
    Value::Short(vec![value.into()])
  }
}

/// Type to represent resolution units
#[derive(Debug, Clone, Copy, PartialEq, Eq, num_enum::TryFromPrimitive, num_enum::IntoPrimitive)]
#[repr(u16)]
pub enum ResolutionUnit {
  None = 1,
  Inch = 2,
  Centimeter = 3,
}

impl From<ResolutionUnit> for Value {
  fn from(value: ResolutionUnit) -> Self {
    Value::Short(vec![value.into()])
  }
}

#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, num_enum::TryFromPrimitive, num_enum::IntoPrimitive)]
#[repr(u16)]
pub enum SampleFormat {
  Uint = 1,
  Int = 2,
  IEEEFP = 3,
  Void = 4,
}

impl Default for SampleFormat {
  fn default() -> Self {
    Self::Uint
  }
}

impl From<SampleFormat> for Value {
  fn from(value: SampleFormat) -> Self {
    Value::Short(vec![value.into()])
  }
}

#[cfg(test)]
pub(crate) fn init_test_logger() {
  let _ = env_logger::builder().is_test(true).try_init();
}
