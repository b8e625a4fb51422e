// SPDX-License-Identifier: LGPL-2.1
// Copyright 2021 Daniel Vogelbacher <daniel@chaospixel.com>

//! CCITT bilevel codecs: modified Huffman RLE (compression 2),
//! T.4 / Group 3 (3) and T.6 / Group 4 (4).
//!
//! Rows are 1 bit per pixel, MSB first, a zero bit is white.

use crate::CompressionMethod;

use super::{CodecConfig, CodecError, CodecResult, Compressor, Decompressor, gather_rows, scatter_rows};

pub mod decoder;
pub mod encoder;
pub mod tables;

/// T.4 option: rows may be 2D coded
pub const T4_2D: u32 = 1;
/// T.4/T.6 option: uncompressed mode allowed
pub const T4_UNCOMPRESSED: u32 = 2;
/// T.4 option: fill bits before EOL so every EOL ends on a byte boundary
pub const T4_FILL_BITS: u32 = 4;

/// In T.4 2D mode every K-th row is coded one-dimensional
pub const DEFAULT_K: u32 = 4;

/// Coding scheme of a fax stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaxMode {
  /// Modified Huffman, byte aligned rows without EOL
  Huffman,
  /// T.4 with EOL codes, 1D or mixed 1D/2D
  T4 { two_d: bool, fill_bits: bool, k: u32 },
  /// T.6, pure 2D terminated by EOFB
  T6,
}

impl FaxMode {
  pub fn from_config(method: CompressionMethod, cfg: &CodecConfig) -> CodecResult<Self> {
    match method {
      CompressionMethod::Huffman => Ok(Self::Huffman),
      CompressionMethod::Fax3 => {
        if cfg.t4_options & T4_UNCOMPRESSED != 0 {
          return Err(CodecError::Unsupported("T.4 uncompressed mode".into()));
        }
        Ok(Self::T4 {
          two_d: cfg.t4_options & T4_2D != 0,
          fill_bits: cfg.t4_options & T4_FILL_BITS != 0,
          k: cfg.t4_k.max(1),
        })
      }
      CompressionMethod::Fax4 => {
        if cfg.t6_options & T4_UNCOMPRESSED != 0 {
          return Err(CodecError::Unsupported("T.6 uncompressed mode".into()));
        }
        Ok(Self::T6)
      }
      _ => Err(CodecError::Unsupported(format!("{:?} is not a fax compression", method))),
    }
  }
}

/// Positions where the color changes, starting from an imaginary
/// white pixel left of the row.
pub fn changing_elements(row: &[u8], width: usize) -> Vec<usize> {
  let mut out = Vec::new();
  let mut prev = 0;
  for x in 0..width {
    let bit = (row[x >> 3] >> (7 - (x & 7))) & 1;
    if bit != prev {
      out.push(x);
      prev = bit;
    }
  }
  out
}

/// b1 and b2 for the reference row: b1 is the first changing element
/// right of `a0` with the opposite color of `color`, b2 the next one.
pub(crate) fn reference_elements(reference: &[usize], a0: isize, color: u8, width: usize) -> (usize, usize) {
  // Change k turns the row black for even k
  let want = if color == 0 { 0 } else { 1 };
  let mut idx = reference.partition_point(|c| (*c as isize) <= a0);
  if idx % 2 != want {
    idx += 1;
  }
  let b1 = reference.get(idx).copied().unwrap_or(width);
  let b2 = reference.get(idx + 1).copied().unwrap_or(width);
  (b1.min(width), b2.min(width))
}

#[derive(Debug, Clone, Copy)]
pub struct FaxCodec {
  method: CompressionMethod,
}

impl FaxCodec {
  pub fn new(method: CompressionMethod) -> CodecResult<Self> {
    match method {
      CompressionMethod::Huffman | CompressionMethod::Fax3 | CompressionMethod::Fax4 => Ok(Self { method }),
      _ => Err(CodecError::Unsupported(format!("{:?} is not a fax compression", method))),
    }
  }
}

fn check_bilevel(cfg: &CodecConfig) -> CodecResult<()> {
  if !cfg.is_bilevel() {
    return Err(CodecError::Unsupported(format!(
      "Fax compression needs 1 bit samples, got {:?}",
      cfg.bits_per_sample
    )));
  }
  Ok(())
}

impl Compressor for FaxCodec {
  fn encode(&mut self, cfg: &CodecConfig, src: &[u8], stride: usize, out: &mut Vec<u8>) -> CodecResult<usize> {
    check_bilevel(cfg)?;
    let mode = FaxMode::from_config(self.method, cfg)?;
    let data = gather_rows(cfg, src, stride)?;
    let packed = encoder::encode(&data, cfg.width, cfg.height, mode)?;
    out.extend_from_slice(&packed);
    Ok(packed.len())
  }
}

impl Decompressor for FaxCodec {
  fn decode(&mut self, cfg: &CodecConfig, src: &[u8], dst: &mut [u8], offset: usize, stride: usize) -> CodecResult<()> {
    check_bilevel(cfg)?;
    let mode = FaxMode::from_config(self.method, cfg)?;
    let mut data = decoder::decode(src, cfg.width, cfg.height, mode)?;
    scatter_rows(cfg, &mut data, dst, offset, stride)
  }
}

#[cfg(test)]
mod tests {
  use proptest::prelude::*;

  use super::*;
  use crate::FillOrder;
  use crate::codecs::{decode_tile, encode_tile};

  fn sample_rows(width: usize, height: usize) -> Vec<u8> {
    let row_bytes = width.div_ceil(8);
    let mut data = vec![0; row_bytes * height];
    for y in 0..height {
      for x in 0..width {
        let black = match y % 5 {
          0 => false,
          1 => true,
          2 => x % 2 == 0,
          3 => x == y % width,
          _ => (x / 7 + y) % 3 == 0,
        };
        if black {
          data[y * row_bytes + x / 8] |= 0x80 >> (x % 8);
        }
      }
    }
    data
  }

  #[test]
  fn changing_elements_of_row() -> std::result::Result<(), Box<dyn std::error::Error>> {
    assert_eq!(changing_elements(&[0b0011_0001], 8), vec![2, 4, 7]);
    assert_eq!(changing_elements(&[0xFF], 8), vec![0]);
    assert_eq!(changing_elements(&[0x00], 8), Vec::<usize>::new());
    let reference = vec![2, 4, 7];
    assert_eq!(reference_elements(&reference, -1, 0, 8), (2, 4));
    assert_eq!(reference_elements(&reference, 2, 1, 8), (4, 7));
    assert_eq!(reference_elements(&reference, 4, 0, 8), (7, 8));
    Ok(())
  }

  #[test]
  fn all_modes_roundtrip() -> std::result::Result<(), Box<dyn std::error::Error>> {
    crate::init_test_logger();
    let modes = [
      (CompressionMethod::Huffman, 0),
      (CompressionMethod::Fax3, 0),
      (CompressionMethod::Fax3, T4_2D),
      (CompressionMethod::Fax3, T4_2D | T4_FILL_BITS),
      (CompressionMethod::Fax3, T4_FILL_BITS),
      (CompressionMethod::Fax4, 0),
    ];
    for width in [1, 7, 8, 33, 200, 3000] {
      let height = 12;
      let data = sample_rows(width, height);
      for (method, options) in modes {
        for fill_order in [FillOrder::MsbFirst, FillOrder::LsbFirst] {
          let cfg = CodecConfig {
            width,
            height,
            bits_per_sample: vec![1],
            fill_order,
            t4_options: options,
            ..Default::default()
          };
          let mut codec = FaxCodec::new(method)?;
          let packed = encode_tile(&mut codec, &cfg, &data, cfg.row_bytes())?;
          let mut out = vec![0; data.len()];
          decode_tile(&mut codec, &cfg, &packed, &mut out, 0, cfg.row_bytes())?;
          assert_eq!(out, data, "{:?} options {} width {}", method, options, width);
        }
      }
    }
    Ok(())
  }

  #[test]
  fn uncompressed_mode_rejected() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let cfg = CodecConfig {
      width: 8,
      height: 1,
      bits_per_sample: vec![1],
      t4_options: T4_UNCOMPRESSED,
      ..Default::default()
    };
    let mut out = Vec::new();
    assert!(FaxCodec::new(CompressionMethod::Fax3)?.encode(&cfg, &[0], 1, &mut out).is_err());
    Ok(())
  }

  proptest! {
    #[test]
    fn random_rows_survive(width in 1_usize..300, height in 1_usize..10, seed: u64, options in 0_u32..3) {
      let row_bytes = width.div_ceil(8);
      let mut state = seed;
      let mut data: Vec<u8> = (0..row_bytes * height)
        .map(|_| {
          state = state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
          // mostly white
          if (state >> 60) < 10 { 0 } else { (state >> 33) as u8 }
        })
        .collect();
      let pad = (row_bytes * 8 - width) as u32;
      for row in data.chunks_mut(row_bytes) {
        if let Some(last) = row.last_mut() {
          *last &= 0xff_u8.checked_shl(pad).unwrap_or(0);
        }
      }
      let (method, t4_options) = match options {
        0 => (CompressionMethod::Huffman, 0),
        1 => (CompressionMethod::Fax3, T4_2D),
        _ => (CompressionMethod::Fax4, 0),
      };
      let cfg = CodecConfig {
        width,
        height,
        bits_per_sample: vec![1],
        t4_options,
        ..Default::default()
      };
      let mut codec = FaxCodec::new(method).map_err(|e| TestCaseError::fail(e.to_string()))?;
      let packed = encode_tile(&mut codec, &cfg, &data, row_bytes).map_err(|e| TestCaseError::fail(e.to_string()))?;
      let mut out = vec![0; data.len()];
      decode_tile(&mut codec, &cfg, &packed, &mut out, 0, row_bytes).map_err(|e| TestCaseError::fail(e.to_string()))?;
      prop_assert_eq!(out, data);
    }
  }
}
