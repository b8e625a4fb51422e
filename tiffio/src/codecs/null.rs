// SPDX-License-Identifier: LGPL-2.1
// Copyright 2021 Daniel Vogelbacher <daniel@chaospixel.com>

//! Uncompressed passthrough. Bit order reversal for FillOrder 2 is
//! applied around every codec, so this codec only copies rows.

use super::{CodecConfig, CodecError, CodecResult, Compressor, Decompressor, gather_rows, scatter_rows};

#[derive(Debug, Default, Clone, Copy)]
pub struct NullCodec;

impl Compressor for NullCodec {
  fn encode(&mut self, cfg: &CodecConfig, src: &[u8], stride: usize, out: &mut Vec<u8>) -> CodecResult<usize> {
    if cfg.predictor != crate::Predictor::None {
      return Err(CodecError::Unsupported("Predictor without compression".into()));
    }
    let data = gather_rows(cfg, src, stride)?;
    out.extend_from_slice(&data);
    Ok(data.len())
  }
}

impl Decompressor for NullCodec {
  fn decode(&mut self, cfg: &CodecConfig, src: &[u8], dst: &mut [u8], offset: usize, stride: usize) -> CodecResult<()> {
    let len = src.len().min(cfg.tile_bytes());
    let mut data = src[..len].to_vec();
    scatter_rows(cfg, &mut data, dst, offset, stride)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn copies_strided_rows() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let cfg = CodecConfig {
      width: 2,
      height: 2,
      ..Default::default()
    };
    let src = [1, 2, 99, 3, 4, 99];
    let mut out = Vec::new();
    assert_eq!(NullCodec.encode(&cfg, &src, 3, &mut out)?, 4);
    assert_eq!(out, vec![1, 2, 3, 4]);

    let mut dst = [0; 6];
    NullCodec.decode(&cfg, &out, &mut dst, 1, 3)?;
    assert_eq!(dst, [0, 1, 2, 0, 3, 4]);
    Ok(())
  }

  #[test]
  fn short_input_is_partial() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let cfg = CodecConfig {
      width: 4,
      height: 2,
      ..Default::default()
    };
    let mut dst = [0; 8];
    NullCodec.decode(&cfg, &[5, 6, 7, 8, 9], &mut dst, 0, 4)?;
    assert_eq!(dst, [5, 6, 7, 8, 9, 0, 0, 0]);
    Ok(())
  }
}
