// SPDX-License-Identifier: LGPL-2.1
// Copyright 2021 Daniel Vogelbacher <daniel@chaospixel.com>

//! Pixel data compression schemes.
//!
//! A codec works on one tile or strip at a time. Uncompressed rows are
//! described by a [`CodecConfig`], rows in the caller buffer are
//! `stride` bytes apart and each row holds [`CodecConfig::row_bytes`]
//! bytes of packed samples.

use thiserror::Error;

use crate::{CompressionMethod, FillOrder, Predictor, SampleFormat, bits::Endian, bits::flip_bits};

pub mod deflate;
pub mod fax;
pub mod jpeg;
pub mod lzw;
pub mod null;
pub mod packbits;

#[derive(Debug, Error)]
pub enum CodecError {
  #[error("Invalid compressed data: {}", _0)]
  InvalidData(String),

  #[error("Unsupported by codec: {}", _0)]
  Unsupported(String),

  #[error("JPEG engine error: {}", _0)]
  Jpeg(String),

  #[error("I/O error: {:?}", _0)]
  Io(#[from] std::io::Error),
}

pub type CodecResult<T> = std::result::Result<T, CodecError>;

/// Shape and options of the data handed to a codec
#[derive(Debug, Clone)]
pub struct CodecConfig {
  pub width: usize,
  pub height: usize,
  /// Bits of each sample present in the buffer (a single entry for planar data)
  pub bits_per_sample: Vec<u16>,
  pub sample_format: SampleFormat,
  pub predictor: Predictor,
  pub fill_order: FillOrder,
  /// Byte order of multi-byte samples
  pub endian: Endian,
  pub t4_options: u32,
  /// Every k-th row is coded one-dimensional in T.4 2D mode
  pub t4_k: u32,
  pub t6_options: u32,
  pub jpeg_tables: Option<Vec<u8>>,
  pub jpeg_quality: u8,
}

impl Default for CodecConfig {
  fn default() -> Self {
    Self {
      width: 0,
      height: 0,
      bits_per_sample: vec![8],
      sample_format: SampleFormat::Uint,
      predictor: Predictor::None,
      fill_order: FillOrder::MsbFirst,
      endian: Endian::default(),
      t4_options: 0,
      t4_k: fax::DEFAULT_K,
      t6_options: 0,
      jpeg_tables: None,
      jpeg_quality: 90,
    }
  }
}

impl CodecConfig {
  pub fn samples(&self) -> usize {
    self.bits_per_sample.len()
  }

  pub fn bits_per_pixel(&self) -> usize {
    self.bits_per_sample.iter().map(|b| *b as usize).sum()
  }

  /// Bytes of one packed row
  pub fn row_bytes(&self) -> usize {
    (self.width * self.bits_per_pixel()).div_ceil(8)
  }

  /// Bytes of the whole uncompressed tile
  pub fn tile_bytes(&self) -> usize {
    self.row_bytes() * self.height
  }

  pub fn is_bilevel(&self) -> bool {
    self.bits_per_sample.len() == 1 && self.bits_per_sample[0] == 1
  }

  /// Horizontal differencing is only defined for 8 bit samples here
  pub fn check_predictor(&self) -> CodecResult<()> {
    if self.predictor == Predictor::Horizontal && self.bits_per_sample.iter().any(|b| *b != 8) {
      return Err(CodecError::Unsupported(format!(
        "Horizontal predictor requires 8 bits per sample, got {:?}",
        self.bits_per_sample
      )));
    }
    Ok(())
  }
}

pub trait Compressor {
  /// Compress `cfg.height` rows from `src` and append the result to `out`.
  /// Returns the number of bytes appended.
  fn encode(&mut self, cfg: &CodecConfig, src: &[u8], stride: usize, out: &mut Vec<u8>) -> CodecResult<usize>;
}

pub trait Decompressor {
  /// Decompress `src` into `dst`, row `y` starts at `offset + y * stride`.
  fn decode(&mut self, cfg: &CodecConfig, src: &[u8], dst: &mut [u8], offset: usize, stride: usize) -> CodecResult<()>;
}

pub fn new_compressor(method: CompressionMethod) -> CodecResult<Box<dyn Compressor>> {
  Ok(match method {
    CompressionMethod::None => Box::new(null::NullCodec),
    CompressionMethod::Huffman | CompressionMethod::Fax3 | CompressionMethod::Fax4 => Box::new(fax::FaxCodec::new(method)?),
    CompressionMethod::LZW => Box::new(lzw::LzwCodec),
    CompressionMethod::PackBits => Box::new(packbits::PackBitsCodec),
    CompressionMethod::Deflate | CompressionMethod::OldDeflate => Box::new(deflate::DeflateCodec),
    CompressionMethod::ModernJPEG => Box::new(jpeg::JpegCodec),
    CompressionMethod::JPEG => return Err(CodecError::Unsupported("Old-style JPEG compression".into())),
  })
}

pub fn new_decompressor(method: CompressionMethod) -> CodecResult<Box<dyn Decompressor>> {
  Ok(match method {
    CompressionMethod::None => Box::new(null::NullCodec),
    CompressionMethod::Huffman | CompressionMethod::Fax3 | CompressionMethod::Fax4 => Box::new(fax::FaxCodec::new(method)?),
    CompressionMethod::LZW => Box::new(lzw::LzwCodec),
    CompressionMethod::PackBits => Box::new(packbits::PackBitsCodec),
    CompressionMethod::Deflate | CompressionMethod::OldDeflate => Box::new(deflate::DeflateCodec),
    CompressionMethod::ModernJPEG => Box::new(jpeg::JpegCodec),
    CompressionMethod::JPEG => return Err(CodecError::Unsupported("Old-style JPEG compression".into())),
  })
}

/// Compress one tile and honor the fill order of the output
pub fn encode_tile(codec: &mut dyn Compressor, cfg: &CodecConfig, src: &[u8], stride: usize) -> CodecResult<Vec<u8>> {
  let mut out = Vec::with_capacity(cfg.tile_bytes() / 2);
  codec.encode(cfg, src, stride, &mut out)?;
  if cfg.fill_order == FillOrder::LsbFirst {
    flip_bits(&mut out);
  }
  Ok(out)
}

/// Decompress one tile, compressed data in LSB-first fill order
/// is bit reversed before the codec sees it.
pub fn decode_tile(codec: &mut dyn Decompressor, cfg: &CodecConfig, src: &[u8], dst: &mut [u8], offset: usize, stride: usize) -> CodecResult<()> {
  if cfg.fill_order == FillOrder::LsbFirst {
    let mut flipped = src.to_vec();
    flip_bits(&mut flipped);
    codec.decode(cfg, &flipped, dst, offset, stride)
  } else {
    codec.decode(cfg, src, dst, offset, stride)
  }
}

/// Replace samples by their difference to the sample `spp` bytes before
pub(crate) fn apply_horizontal_predictor(row: &mut [u8], spp: usize) {
  for i in (spp..row.len()).rev() {
    row[i] = row[i].wrapping_sub(row[i - spp]);
  }
}

pub(crate) fn undo_horizontal_predictor(row: &mut [u8], spp: usize) {
  for i in spp..row.len() {
    row[i] = row[i].wrapping_add(row[i - spp]);
  }
}

/// Gather the rows of a strided buffer into one contiguous buffer,
/// applying the predictor if requested.
pub(crate) fn gather_rows(cfg: &CodecConfig, src: &[u8], stride: usize) -> CodecResult<Vec<u8>> {
  let row_bytes = cfg.row_bytes();
  let mut data = Vec::with_capacity(cfg.tile_bytes());
  for y in 0..cfg.height {
    let start = y * stride;
    let row = src
      .get(start..start + row_bytes)
      .ok_or_else(|| CodecError::InvalidData(format!("Source buffer too small for row {}", y)))?;
    data.extend_from_slice(row);
  }
  if cfg.predictor == Predictor::Horizontal {
    cfg.check_predictor()?;
    for row in data.chunks_exact_mut(row_bytes.max(1)) {
      apply_horizontal_predictor(row, cfg.samples());
    }
  }
  Ok(data)
}

/// Scatter contiguous decoded rows into a strided buffer, undoing
/// the predictor if requested. Missing data is left untouched.
pub(crate) fn scatter_rows(cfg: &CodecConfig, data: &mut [u8], dst: &mut [u8], offset: usize, stride: usize) -> CodecResult<()> {
  let row_bytes = cfg.row_bytes();
  if row_bytes == 0 {
    return Ok(());
  }
  if cfg.predictor == Predictor::Horizontal {
    cfg.check_predictor()?;
  }
  for (y, row) in data.chunks_mut(row_bytes).take(cfg.height).enumerate() {
    if cfg.predictor == Predictor::Horizontal {
      undo_horizontal_predictor(row, cfg.samples());
    }
    let start = offset + y * stride;
    let target = dst
      .get_mut(start..start + row.len())
      .ok_or_else(|| CodecError::InvalidData(format!("Destination buffer too small for row {}", y)))?;
    target.copy_from_slice(row);
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn predictor_deltas() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let mut row = vec![10, 20, 30, 40];
    apply_horizontal_predictor(&mut row, 1);
    assert_eq!(row, vec![10, 10, 10, 10]);
    undo_horizontal_predictor(&mut row, 1);
    assert_eq!(row, vec![10, 20, 30, 40]);

    let mut rgb = vec![1, 2, 3, 4, 6, 8];
    apply_horizontal_predictor(&mut rgb, 3);
    assert_eq!(rgb, vec![1, 2, 3, 3, 4, 5]);
    Ok(())
  }

  #[test]
  fn predictor_rejects_16bit() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let cfg = CodecConfig {
      width: 2,
      height: 1,
      bits_per_sample: vec![16],
      predictor: Predictor::Horizontal,
      ..Default::default()
    };
    assert!(cfg.check_predictor().is_err());
    Ok(())
  }

  #[test]
  fn fill_order_roundtrip_all_codecs() -> std::result::Result<(), Box<dyn std::error::Error>> {
    crate::init_test_logger();
    let data: Vec<u8> = (0..64).map(|i| (i * 7 % 13) as u8).collect();
    for method in [CompressionMethod::None, CompressionMethod::LZW, CompressionMethod::PackBits, CompressionMethod::Deflate] {
      let cfg = CodecConfig {
        width: 8,
        height: 8,
        fill_order: FillOrder::LsbFirst,
        ..Default::default()
      };
      let mut enc = new_compressor(method)?;
      let packed = encode_tile(enc.as_mut(), &cfg, &data, 8)?;
      let mut dec = new_decompressor(method)?;
      let mut out = vec![0; 64];
      decode_tile(dec.as_mut(), &cfg, &packed, &mut out, 0, 8)?;
      assert_eq!(out, data, "{:?}", method);
    }
    Ok(())
  }
}
