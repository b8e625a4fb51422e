// SPDX-License-Identifier: LGPL-2.1
// Copyright 2021 Daniel Vogelbacher <daniel@chaospixel.com>

//! LZW with the TIFF conventions: MSB-first codes of 9 to 12 bits,
//! code width switching one code early, 256 = clear, 257 = end of
//! information.

use log::{debug, warn};

use super::{CodecConfig, CodecError, CodecResult, Compressor, Decompressor, gather_rows, scatter_rows};
use crate::bits::BitPumpMSB;

const CLEAR_CODE: u16 = 256;
const EOI_CODE: u16 = 257;
const FIRST_FREE: usize = 258;
const TABLE_SIZE: usize = 4096;

#[derive(Debug, Default, Clone, Copy)]
pub struct LzwCodec;

/// Compress a complete strip or tile
pub fn compress(data: &[u8]) -> CodecResult<Vec<u8>> {
  weezl::encode::Encoder::with_tiff_size_switch(weezl::BitOrder::Msb, 8)
    .encode(data)
    .map_err(|err| CodecError::InvalidData(format!("LZW encoder failed: {}", err)))
}

/// Decompress up to `expected` bytes. The fast decoder is tried first,
/// any failure is retried with the table decoder.
pub fn decompress(src: &[u8], expected: usize) -> CodecResult<Vec<u8>> {
  let mut decoder = weezl::decode::Decoder::with_tiff_size_switch(weezl::BitOrder::Msb, 8);
  match decoder.decode(src) {
    Ok(mut bytes) if bytes.len() >= expected => {
      bytes.truncate(expected);
      Ok(bytes)
    }
    Ok(bytes) => {
      debug!("Fast LZW decoder returned {} of {} bytes, retry with table decoder", bytes.len(), expected);
      decompress_table(src, expected)
    }
    Err(err) => {
      warn!("Fast LZW decoder failed: {}, retry with table decoder", err);
      decompress_table(src, expected)
    }
  }
}

/// String table with prefix links, strings are emitted back to front
struct StringTable {
  prefix: Vec<u16>,
  suffix: Vec<u8>,
  first: Vec<u8>,
  length: Vec<u16>,
  next: usize,
}

impl StringTable {
  fn new() -> Self {
    let mut table = Self {
      prefix: vec![0; TABLE_SIZE],
      suffix: vec![0; TABLE_SIZE],
      first: vec![0; TABLE_SIZE],
      length: vec![0; TABLE_SIZE],
      next: FIRST_FREE,
    };
    for i in 0..256 {
      table.suffix[i] = i as u8;
      table.first[i] = i as u8;
      table.length[i] = 1;
    }
    table
  }

  fn reset(&mut self) {
    self.next = FIRST_FREE;
  }

  fn contains(&self, code: u16) -> bool {
    (code as usize) < 256 || ((code as usize) >= FIRST_FREE && (code as usize) < self.next)
  }

  fn add(&mut self, prefix: u16, byte: u8) {
    if self.next >= TABLE_SIZE {
      return;
    }
    let n = self.next;
    self.prefix[n] = prefix;
    self.suffix[n] = byte;
    self.first[n] = self.first[prefix as usize];
    self.length[n] = self.length[prefix as usize] + 1;
    self.next += 1;
  }

  fn emit(&self, code: u16, out: &mut Vec<u8>) {
    let len = self.length[code as usize] as usize;
    let start = out.len();
    out.resize(start + len, 0);
    let mut c = code as usize;
    for i in (start..start + len).rev() {
      out[i] = self.suffix[c];
      c = self.prefix[c] as usize;
    }
  }

  /// Width of the next code, switching one code early
  fn code_width(&self) -> u32 {
    match self.next {
      0..=510 => 9,
      511..=1022 => 10,
      1023..=2046 => 11,
      _ => 12,
    }
  }
}

/// Table driven decoder. The end of the buffer acts as an implicit
/// end of information code.
pub fn decompress_table(src: &[u8], expected: usize) -> CodecResult<Vec<u8>> {
  let mut pump = BitPumpMSB::new(src);
  let mut table = StringTable::new();
  let mut out = Vec::with_capacity(expected);
  let mut old: Option<u16> = None;

  while out.len() < expected {
    let width = table.code_width();
    if pump.bits_left() < width as isize {
      break;
    }
    let code = pump.get_bits(width) as u16;
    match code {
      EOI_CODE => break,
      CLEAR_CODE => {
        table.reset();
        old = None;
      }
      _ => match old {
        None => {
          if code >= CLEAR_CODE {
            return Err(CodecError::InvalidData(format!("LZW code {} without prior string", code)));
          }
          table.emit(code, &mut out);
          old = Some(code);
        }
        Some(prev) => {
          if table.contains(code) {
            table.emit(code, &mut out);
            table.add(prev, table.first[code as usize]);
          } else if code as usize == table.next {
            // The string being defined is referenced right away
            let byte = table.first[prev as usize];
            table.add(prev, byte);
            table.emit(code, &mut out);
          } else {
            return Err(CodecError::InvalidData(format!("LZW code {} out of table range {}", code, table.next)));
          }
          old = Some(code);
        }
      },
    }
  }
  out.truncate(expected);
  Ok(out)
}

impl Compressor for LzwCodec {
  fn encode(&mut self, cfg: &CodecConfig, src: &[u8], stride: usize, out: &mut Vec<u8>) -> CodecResult<usize> {
    let data = gather_rows(cfg, src, stride)?;
    let packed = compress(&data)?;
    out.extend_from_slice(&packed);
    Ok(packed.len())
  }
}

impl Decompressor for LzwCodec {
  fn decode(&mut self, cfg: &CodecConfig, src: &[u8], dst: &mut [u8], offset: usize, stride: usize) -> CodecResult<()> {
    cfg.check_predictor()?;
    let mut data = decompress(src, cfg.tile_bytes())?;
    scatter_rows(cfg, &mut data, dst, offset, stride)
  }
}

#[cfg(test)]
mod tests {
  use proptest::prelude::*;

  use super::*;
  use crate::Predictor;
  use crate::codecs::{decode_tile, encode_tile};

  fn noise(len: usize, seed: u32) -> Vec<u8> {
    let mut state = seed;
    (0..len)
      .map(|_| {
        state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        (state >> 16) as u8
      })
      .collect()
  }

  #[test]
  fn table_decoder_matches_input() -> std::result::Result<(), Box<dyn std::error::Error>> {
    // Enough distinct strings to pass all code width switches
    let data = noise(20_000, 7);
    let packed = compress(&data)?;
    assert_eq!(decompress_table(&packed, data.len())?, data);
    assert_eq!(decompress(&packed, data.len())?, data);
    Ok(())
  }

  #[test]
  fn kwkwk_sequence() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let data = vec![b'a'; 100];
    let packed = compress(&data)?;
    assert_eq!(decompress_table(&packed, data.len())?, data);
    Ok(())
  }

  #[test]
  fn missing_eoi_is_tolerated() -> std::result::Result<(), Box<dyn std::error::Error>> {
    // clear, 'A', 'B', 'C' as 9 bit codes without EOI
    let mut bits: u64 = 0;
    for code in [256_u64, 65, 66, 67] {
      bits = (bits << 9) | code;
    }
    bits <<= 64 - 36;
    let src = bits.to_be_bytes()[..5].to_vec();
    assert_eq!(decompress_table(&src, 3)?, b"ABC".to_vec());
    assert_eq!(decompress_table(&src, 10)?, b"ABC".to_vec());
    Ok(())
  }

  #[test]
  fn predictor_row() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let cfg = CodecConfig {
      width: 4,
      height: 1,
      bits_per_sample: vec![8],
      predictor: Predictor::Horizontal,
      ..Default::default()
    };
    let mut out = Vec::new();
    LzwCodec.encode(&cfg, &[10, 20, 30, 40], 4, &mut out)?;
    assert_eq!(decompress_table(&out, 4)?, vec![10, 10, 10, 10]);
    let mut dst = [0; 4];
    LzwCodec.decode(&cfg, &out, &mut dst, 0, 4)?;
    assert_eq!(dst, [10, 20, 30, 40]);
    Ok(())
  }

  #[test]
  fn predictor_rejects_other_depths() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let cfg = CodecConfig {
      width: 2,
      height: 1,
      bits_per_sample: vec![16],
      predictor: Predictor::Horizontal,
      ..Default::default()
    };
    let packed = compress(&[0; 4])?;
    let mut dst = [0; 4];
    assert!(LzwCodec.decode(&cfg, &packed, &mut dst, 0, 4).is_err());
    Ok(())
  }

  proptest! {
    #[test]
    fn any_input_survives(data in proptest::collection::vec(any::<u8>(), 0..6000)) {
      let packed = compress(&data).map_err(|e| TestCaseError::fail(e.to_string()))?;
      let table = decompress_table(&packed, data.len()).map_err(|e| TestCaseError::fail(e.to_string()))?;
      prop_assert_eq!(&table, &data);
      let fast = decompress(&packed, data.len()).map_err(|e| TestCaseError::fail(e.to_string()))?;
      prop_assert_eq!(&fast, &data);
    }

    #[test]
    fn any_tile_survives_with_predictor(
      (width, height, spp, data) in (1_usize..40, 1_usize..20, 1_usize..5)
        .prop_flat_map(|(w, h, spp)| (Just(w), Just(h), Just(spp), proptest::collection::vec(any::<u8>(), w * h * spp))),
      horizontal in any::<bool>(),
    ) {
      let cfg = CodecConfig {
        width,
        height,
        bits_per_sample: vec![8; spp],
        predictor: if horizontal { Predictor::Horizontal } else { Predictor::None },
        ..Default::default()
      };
      let stride = width * spp;
      let packed = encode_tile(&mut LzwCodec, &cfg, &data, stride).map_err(|e| TestCaseError::fail(e.to_string()))?;
      let mut dst = vec![0; data.len()];
      decode_tile(&mut LzwCodec, &cfg, &packed, &mut dst, 0, stride).map_err(|e| TestCaseError::fail(e.to_string()))?;
      prop_assert_eq!(&dst, &data);
    }
  }
}
