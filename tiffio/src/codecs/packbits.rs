// SPDX-License-Identifier: LGPL-2.1
// Copyright 2021 Daniel Vogelbacher <daniel@chaospixel.com>

//! Byte oriented run length encoding (PackBits, compression 32773).
//! Every row is packed separately.

use log::warn;

use super::{CodecConfig, CodecResult, Compressor, Decompressor, gather_rows, scatter_rows};

const MAX_RUN: usize = 128;

#[derive(Debug, Default, Clone, Copy)]
pub struct PackBitsCodec;

/// Append the packed form of `row` to `out`
pub fn pack_row(row: &[u8], out: &mut Vec<u8>) {
  let mut i = 0;
  while i < row.len() {
    // Length of the run of equal bytes starting at i
    let mut run = 1;
    while i + run < row.len() && run < MAX_RUN && row[i + run] == row[i] {
      run += 1;
    }
    if run >= 2 {
      out.push((1 - run as i16) as i8 as u8);
      out.push(row[i]);
      i += run;
      continue;
    }
    // Literal block until the next run of at least 3 equal bytes
    let start = i;
    while i < row.len() && i - start < MAX_RUN {
      if i + 2 < row.len() && row[i] == row[i + 1] && row[i] == row[i + 2] {
        break;
      }
      i += 1;
    }
    if i == start {
      continue;
    }
    out.push((i - start - 1) as u8);
    out.extend_from_slice(&row[start..i]);
  }
}

/// Unpack into `out` until `expected` bytes are produced or input ends
pub fn unpack(src: &[u8], expected: usize) -> Vec<u8> {
  let mut out = Vec::with_capacity(expected);
  let mut i = 0;
  while i < src.len() && out.len() < expected {
    let n = src[i] as i8;
    i += 1;
    match n {
      0..=127 => {
        let len = n as usize + 1;
        let end = (i + len).min(src.len());
        out.extend_from_slice(&src[i..end]);
        i = end;
      }
      -127..=-1 => {
        if let Some(b) = src.get(i) {
          out.extend(std::iter::repeat_n(*b, (1 - n as isize) as usize));
        }
        i += 1;
      }
      // -128 is a no-op
      _ => {}
    }
  }
  if out.len() < expected {
    warn!("PackBits data ended early, got {} of {} bytes", out.len(), expected);
  }
  out.truncate(expected);
  out
}

impl Compressor for PackBitsCodec {
  fn encode(&mut self, cfg: &CodecConfig, src: &[u8], stride: usize, out: &mut Vec<u8>) -> CodecResult<usize> {
    let data = gather_rows(cfg, src, stride)?;
    let before = out.len();
    for row in data.chunks(cfg.row_bytes().max(1)) {
      pack_row(row, out);
    }
    Ok(out.len() - before)
  }
}

impl Decompressor for PackBitsCodec {
  fn decode(&mut self, cfg: &CodecConfig, src: &[u8], dst: &mut [u8], offset: usize, stride: usize) -> CodecResult<()> {
    let mut data = unpack(src, cfg.tile_bytes());
    scatter_rows(cfg, &mut data, dst, offset, stride)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn apple_sample() -> std::result::Result<(), Box<dyn std::error::Error>> {
    // Sample from the TIFF 6.0 reference
    let packed = [0xFE, 0xAA, 0x02, 0x80, 0x00, 0x2A, 0xFD, 0xAA, 0x03, 0x80, 0x00, 0x2A, 0x22, 0xF7, 0xAA];
    let unpacked = unpack(&packed, 24);
    assert_eq!(
      unpacked,
      vec![
        0xAA, 0xAA, 0xAA, 0x80, 0x00, 0x2A, 0xAA, 0xAA, 0xAA, 0xAA, 0x80, 0x00, 0x2A, 0x22, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA,
        0xAA, 0xAA
      ]
    );
    let mut repacked = Vec::new();
    pack_row(&unpacked, &mut repacked);
    assert_eq!(unpack(&repacked, 24), unpacked);
    Ok(())
  }

  #[test]
  fn long_runs_split() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let row = vec![7; 300];
    let mut packed = Vec::new();
    pack_row(&row, &mut packed);
    assert_eq!(packed.len(), 6);
    assert_eq!(unpack(&packed, 300), row);

    let literal: Vec<u8> = (0..=255).chain(0..=255).collect();
    let mut packed = Vec::new();
    pack_row(&literal, &mut packed);
    assert_eq!(unpack(&packed, literal.len()), literal);
    Ok(())
  }
}
