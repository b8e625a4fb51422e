// SPDX-License-Identifier: LGPL-2.1
// Copyright 2021 Daniel Vogelbacher <daniel@chaospixel.com>

use std::collections::HashMap;

use log::debug;

use super::{
  FaxMode, changing_elements, reference_elements,
  tables::{self, BLACK_DECODE, WHITE_DECODE},
};
use crate::{
  bits::BitPumpMSB,
  codecs::{CodecError, CodecResult},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
  Pass,
  Horizontal,
  Vertical(isize),
}

fn ensure_data(pump: &BitPumpMSB, y: usize) -> CodecResult<()> {
  if pump.bits_left() <= 0 {
    return Err(CodecError::InvalidData(format!("Fax data ended in row {}", y)));
  }
  Ok(())
}

fn read_mode(pump: &mut BitPumpMSB) -> CodecResult<Mode> {
  let p = pump.peek_bits(7);
  let (mode, len) = if p & 0x40 != 0 {
    (Mode::Vertical(0), 1)
  } else {
    match p >> 4 {
      0b011 => (Mode::Vertical(1), 3),
      0b010 => (Mode::Vertical(-1), 3),
      0b001 => (Mode::Horizontal, 3),
      _ => match p >> 3 {
        0b0001 => (Mode::Pass, 4),
        _ => match p >> 1 {
          0b000011 => (Mode::Vertical(2), 6),
          0b000010 => (Mode::Vertical(-2), 6),
          _ => match p {
            0b0000011 => (Mode::Vertical(3), 7),
            0b0000010 => (Mode::Vertical(-3), 7),
            0b0000001 => return Err(CodecError::Unsupported("2D extension codes".into())),
            _ => return Err(CodecError::InvalidData(format!("Invalid 2D mode code {:07b}", p))),
          },
        },
      },
    }
  };
  pump.consume_bits(len);
  Ok(mode)
}

/// Read make-up codes until a terminating code completes the run
fn read_run(pump: &mut BitPumpMSB, black: bool) -> CodecResult<usize> {
  let map: &HashMap<(u8, u16), u16> = if black { &BLACK_DECODE } else { &WHITE_DECODE };
  let mut total = 0;
  loop {
    if pump.bits_left() <= 0 {
      return Err(CodecError::InvalidData("Fax data ended inside a run".into()));
    }
    let mut found = None;
    for len in 1..=tables::MAX_CODE_LEN {
      let code = pump.peek_bits(len as u32) as u16;
      if let Some(run) = map.get(&(len, code)) {
        pump.consume_bits(len as u32);
        found = Some(*run as usize);
        break;
      }
    }
    let run = found.ok_or_else(|| CodecError::InvalidData(format!("Invalid {} run code", if black { "black" } else { "white" })))?;
    total += run;
    if run < 64 {
      return Ok(total);
    }
  }
}

fn fill_black(row: &mut [u8], start: usize, end: usize) {
  for x in start..end {
    row[x >> 3] |= 0x80 >> (x & 7);
  }
}

fn decode_1d(pump: &mut BitPumpMSB, row: &mut [u8], width: usize) -> CodecResult<()> {
  let mut pos = 0;
  let mut black = false;
  while pos < width {
    let run = read_run(pump, black)?;
    let end = pos + run;
    if end > width {
      return Err(CodecError::InvalidData(format!("Run of {} exceeds row width {}", run, width)));
    }
    if black {
      fill_black(row, pos, end);
    }
    pos = end;
    black = !black;
  }
  Ok(())
}

fn decode_2d(pump: &mut BitPumpMSB, row: &mut [u8], reference: &[usize], width: usize) -> CodecResult<()> {
  let mut a0: isize = -1;
  let mut color = 0_u8;
  while a0 < width as isize {
    let (b1, b2) = reference_elements(reference, a0, color, width);
    let start = a0.max(0) as usize;
    match read_mode(pump)? {
      Mode::Pass => {
        if color == 1 {
          fill_black(row, start, b2);
        }
        a0 = b2 as isize;
      }
      Mode::Horizontal => {
        let a1 = start + read_run(pump, color == 1)?;
        let a2 = a1 + read_run(pump, color == 0)?;
        if a2 > width {
          return Err(CodecError::InvalidData(format!("Horizontal runs exceed row width {}", width)));
        }
        if color == 1 {
          fill_black(row, start, a1);
        } else {
          fill_black(row, a1, a2);
        }
        a0 = a2 as isize;
      }
      Mode::Vertical(delta) => {
        let a1 = b1 as isize + delta;
        if a1 <= a0 || a1 > width as isize || a1 < 0 {
          return Err(CodecError::InvalidData(format!("Vertical mode leaves row at {}", a1)));
        }
        if color == 1 {
          fill_black(row, start, a1 as usize);
        }
        a0 = a1;
        color ^= 1;
      }
    }
  }
  Ok(())
}

/// Skip fill bits and an EOL code. Returns false if no EOL is present.
fn skip_eol(pump: &mut BitPumpMSB) -> bool {
  while pump.bits_left() >= 12 && pump.peek_bits(12) == 0 {
    pump.consume_bits(1);
  }
  if pump.bits_left() >= 12 && pump.peek_bits(12) == tables::EOL.0 as u32 {
    pump.consume_bits(12);
    true
  } else {
    false
  }
}

/// Decode `height` rows of `width` pixels into packed rows
pub fn decode(src: &[u8], width: usize, height: usize, mode: FaxMode) -> CodecResult<Vec<u8>> {
  let row_bytes = width.div_ceil(8);
  let mut out = vec![0; row_bytes * height];
  let mut pump = BitPumpMSB::new(src);
  let mut reference: Vec<usize> = Vec::new();

  for y in 0..height {
    let row = &mut out[y * row_bytes..(y + 1) * row_bytes];
    match mode {
      FaxMode::Huffman => {
        ensure_data(&pump, y)?;
        decode_1d(&mut pump, row, width)?;
        pump.align_byte();
      }
      FaxMode::T4 { two_d, .. } => {
        if !skip_eol(&mut pump) {
          debug!("Missing EOL before fax row {}", y);
        }
        ensure_data(&pump, y)?;
        let one_d = !two_d || pump.get_bits(1) == 1;
        if one_d {
          decode_1d(&mut pump, row, width)?;
        } else {
          decode_2d(&mut pump, row, &reference, width)?;
        }
      }
      FaxMode::T6 => {
        ensure_data(&pump, y)?;
        decode_2d(&mut pump, row, &reference, width)?;
      }
    }
    reference = changing_elements(row, width);
  }
  Ok(out)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::codecs::fax::encoder::encode;

  #[test]
  fn decode_known_1d_row() -> std::result::Result<(), Box<dyn std::error::Error>> {
    // white 2 (0111), black 3 (10), white 3 (1000)
    let src = [0b0111_1010, 0b0000_0000];
    let out = decode(&src, 8, 1, FaxMode::Huffman)?;
    assert_eq!(out, vec![0b0011_1000]);
    Ok(())
  }

  #[test]
  fn tolerates_missing_eol() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let src = [0b0111_1010, 0b0000_0000];
    let mode = FaxMode::T4 {
      two_d: false,
      fill_bits: false,
      k: 1,
    };
    assert_eq!(decode(&src, 8, 1, mode)?, vec![0b0011_1000]);
    Ok(())
  }

  #[test]
  fn truncated_stream_fails() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let data = vec![0b1010_1010; 4 * 8];
    let packed = encode(&data, 32, 8, FaxMode::T6)?;
    assert!(decode(&packed[..packed.len() / 2], 32, 8, FaxMode::T6).is_err());
    Ok(())
  }

  #[test]
  fn alternating_pixels_t6() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let mut data = vec![0b1010_1010; 4 * 8];
    data[4..8].copy_from_slice(&[0b0101_0101; 4]);
    let packed = encode(&data, 32, 8, FaxMode::T6)?;
    assert_eq!(decode(&packed, 32, 8, FaxMode::T6)?, data);
    Ok(())
  }
}
