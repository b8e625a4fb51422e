// SPDX-License-Identifier: LGPL-2.1
// Copyright 2021 Daniel Vogelbacher <daniel@chaospixel.com>

//! Deflate compression (8 and the legacy 32946), stored as zlib streams.

use std::io::{Read, Write};

use libflate::zlib::{Decoder, Encoder};
use log::warn;

use super::{CodecConfig, CodecError, CodecResult, Compressor, Decompressor, gather_rows, scatter_rows};

#[derive(Debug, Default, Clone, Copy)]
pub struct DeflateCodec;

impl Compressor for DeflateCodec {
  fn encode(&mut self, cfg: &CodecConfig, src: &[u8], stride: usize, out: &mut Vec<u8>) -> CodecResult<usize> {
    let data = gather_rows(cfg, src, stride)?;
    let mut encoder = Encoder::new(Vec::with_capacity(data.len() / 2))?;
    encoder.write_all(&data)?;
    let packed = encoder.finish().into_result()?;
    out.extend_from_slice(&packed);
    Ok(packed.len())
  }
}

impl Decompressor for DeflateCodec {
  fn decode(&mut self, cfg: &CodecConfig, src: &[u8], dst: &mut [u8], offset: usize, stride: usize) -> CodecResult<()> {
    cfg.check_predictor()?;
    let mut decoder = Decoder::new(src).map_err(|err| CodecError::InvalidData(format!("Invalid zlib header: {}", err)))?;
    let expected = cfg.tile_bytes();
    let mut data = Vec::with_capacity(expected);
    if let Err(err) = decoder.by_ref().take(expected as u64).read_to_end(&mut data) {
      // Keep what was inflated so far
      warn!("Deflate stream ended with error after {} bytes: {}", data.len(), err);
    }
    scatter_rows(cfg, &mut data, dst, offset, stride)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::Predictor;

  #[test]
  fn roundtrip_with_predictor() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let cfg = CodecConfig {
      width: 16,
      height: 4,
      bits_per_sample: vec![8, 8, 8],
      predictor: Predictor::Horizontal,
      ..Default::default()
    };
    let data: Vec<u8> = (0..cfg.tile_bytes()).map(|i| (i / 3) as u8).collect();
    let mut packed = Vec::new();
    DeflateCodec.encode(&cfg, &data, cfg.row_bytes(), &mut packed)?;
    let mut out = vec![0; data.len()];
    DeflateCodec.decode(&cfg, &packed, &mut out, 0, cfg.row_bytes())?;
    assert_eq!(out, data);
    Ok(())
  }
}
