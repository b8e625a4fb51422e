// SPDX-License-Identifier: LGPL-2.1
// Copyright 2021 Daniel Vogelbacher <daniel@chaospixel.com>

use bitstream_io::{BigEndian, BitWrite, BitWriter};

use super::{
  FaxMode, changing_elements, reference_elements,
  tables::{self, Code},
};
use crate::codecs::CodecResult;

/// Bit writer keeping track of the number of bits written
struct FaxWriter {
  inner: BitWriter<Vec<u8>, BigEndian>,
  bits: u64,
}

impl FaxWriter {
  fn new() -> Self {
    Self {
      inner: BitWriter::endian(Vec::new(), BigEndian),
      bits: 0,
    }
  }

  fn put(&mut self, (code, len): Code) -> CodecResult<()> {
    for i in (0..len).rev() {
      self.inner.write_bit((code >> i) & 1 == 1)?;
    }
    self.bits += len as u64;
    Ok(())
  }

  fn put_bit(&mut self, bit: bool) -> CodecResult<()> {
    self.inner.write_bit(bit)?;
    self.bits += 1;
    Ok(())
  }

  /// EOL, optionally preceded by zero bits so it ends on a byte boundary
  fn put_eol(&mut self, fill: bool) -> CodecResult<()> {
    if fill {
      while (self.bits + tables::EOL.1 as u64) % 8 != 0 {
        self.put_bit(false)?;
      }
    }
    self.put(tables::EOL)
  }

  fn align(&mut self) -> CodecResult<()> {
    while self.bits % 8 != 0 {
      self.put_bit(false)?;
    }
    Ok(())
  }

  fn finish(mut self) -> CodecResult<Vec<u8>> {
    self.align()?;
    self.inner.byte_align()?;
    Ok(self.inner.into_writer())
  }

  /// Run length as make-up codes followed by one terminating code
  fn put_run(&mut self, mut run: usize, black: bool) -> CodecResult<()> {
    let (terminating, makeup) = if black {
      (&tables::BLACK_TERMINATING, &tables::BLACK_MAKEUP)
    } else {
      (&tables::WHITE_TERMINATING, &tables::WHITE_MAKEUP)
    };
    while run >= tables::MAX_MAKEUP + 64 {
      self.put(tables::EXTENDED_MAKEUP[tables::EXTENDED_MAKEUP.len() - 1])?;
      run -= tables::MAX_MAKEUP;
    }
    if run >= 64 {
      let chunk = run / 64 * 64;
      if chunk <= 1728 {
        self.put(makeup[chunk / 64 - 1])?;
      } else {
        self.put(tables::EXTENDED_MAKEUP[(chunk - 1792) / 64])?;
      }
      run -= chunk;
    }
    self.put(terminating[run])
  }
}

/// One dimensional coding: alternating white and black runs
fn encode_1d(w: &mut FaxWriter, current: &[usize], width: usize) -> CodecResult<()> {
  let mut pos = 0;
  let mut black = false;
  for change in current.iter().copied().chain(std::iter::once(width)) {
    w.put_run(change - pos, black)?;
    pos = change;
    black = !black;
  }
  Ok(())
}

/// Two dimensional coding against the reference row
fn encode_2d(w: &mut FaxWriter, current: &[usize], reference: &[usize], width: usize) -> CodecResult<()> {
  let mut a0: isize = -1;
  let mut color = 0_u8;
  while a0 < width as isize {
    let idx = current.partition_point(|c| (*c as isize) <= a0);
    let a1 = current.get(idx).copied().unwrap_or(width);
    let (b1, b2) = reference_elements(reference, a0, color, width);

    if b2 < a1 {
      w.put(tables::MODE_PASS)?;
      a0 = b2 as isize;
    } else {
      let delta = a1 as isize - b1 as isize;
      if delta.abs() <= 3 {
        w.put(tables::MODE_VERTICAL[(delta + 3) as usize])?;
        a0 = a1 as isize;
        color ^= 1;
      } else {
        let a2 = current.get(idx + 1).copied().unwrap_or(width);
        let start = a0.max(0) as usize;
        w.put(tables::MODE_HORIZONTAL)?;
        w.put_run(a1 - start, color == 1)?;
        w.put_run(a2 - a1, color == 0)?;
        a0 = a2 as isize;
      }
    }
  }
  Ok(())
}

/// Encode `height` packed rows of `width` pixels
pub fn encode(data: &[u8], width: usize, height: usize, mode: FaxMode) -> CodecResult<Vec<u8>> {
  let row_bytes = width.div_ceil(8);
  let mut w = FaxWriter::new();
  let mut reference: Vec<usize> = Vec::new();

  for y in 0..height {
    let row = &data[y * row_bytes..(y + 1) * row_bytes];
    let current = changing_elements(row, width);
    match mode {
      FaxMode::Huffman => {
        encode_1d(&mut w, &current, width)?;
        w.align()?;
      }
      FaxMode::T4 { two_d, fill_bits, k } => {
        w.put_eol(fill_bits)?;
        if two_d {
          let one_d = y as u32 % k == 0;
          w.put_bit(one_d)?;
          if one_d {
            encode_1d(&mut w, &current, width)?;
          } else {
            encode_2d(&mut w, &current, &reference, width)?;
          }
        } else {
          encode_1d(&mut w, &current, width)?;
        }
      }
      FaxMode::T6 => encode_2d(&mut w, &current, &reference, width)?,
    }
    reference = current;
  }

  match mode {
    FaxMode::Huffman => {}
    FaxMode::T4 { two_d, .. } => {
      // RTC
      for _ in 0..6 {
        w.put(tables::EOL)?;
        if two_d {
          w.put_bit(true)?;
        }
      }
    }
    FaxMode::T6 => {
      // EOFB
      w.put(tables::EOL)?;
      w.put(tables::EOL)?;
    }
  }
  w.finish()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn all_white_row_1d() -> std::result::Result<(), Box<dyn std::error::Error>> {
    // white run 8 (10011) + black run 0 is not emitted, pad to byte
    let out = encode(&[0x00], 8, 1, FaxMode::Huffman)?;
    assert_eq!(out, vec![0b1001_1000]);
    Ok(())
  }

  #[test]
  fn long_runs_use_makeup_codes() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let width = 6000;
    let row = vec![0; width / 8];
    let out = encode(&row, width, 1, FaxMode::Huffman)?;
    // 2560 + 2560 + 832 (makeup) + 48 (terminating)
    assert_eq!(out.len(), (12 + 12 + 9 + 8_usize).div_ceil(8));
    Ok(())
  }

  #[test]
  fn t6_all_white_is_v0() -> std::result::Result<(), Box<dyn std::error::Error>> {
    // V0 then EOFB
    let out = encode(&[0x00, 0x00], 16, 1, FaxMode::T6)?;
    assert_eq!(out, vec![0b1000_0000, 0b0000_1000, 0b0000_0000, 0b1000_0000]);
    Ok(())
  }
}
