// SPDX-License-Identifier: LGPL-2.1
// Copyright 2021 Daniel Vogelbacher <daniel@chaospixel.com>

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

#[inline(always)]
pub fn clampbits(val: i32, bits: u32) -> u32 {
  let max = ((1_u64 << bits) - 1) as i64;
  (val as i64).clamp(0, max) as u32
}

/// Round a stream position up to the next 4-byte boundary
#[inline(always)]
pub fn align_word(pos: u64) -> u64 {
  (pos + 3) & !3
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Endian {
  Big,
  Little,
}

impl Default for Endian {
  fn default() -> Self {
    Self::Little
  }
}

impl Endian {
  #[inline]
  pub fn big(&self) -> bool {
    matches!(*self, Self::Big)
  }
  #[inline]
  pub fn little(&self) -> bool {
    matches!(*self, Self::Little)
  }

  /// Byte order marker as found in the first two bytes of the header
  pub fn marker(&self) -> [u8; 2] {
    match self {
      Self::Little => *b"II",
      Self::Big => *b"MM",
    }
  }

  #[inline]
  pub fn read_u16(&self, buf: &[u8], offset: usize) -> u16 {
    match *self {
      Self::Little => LittleEndian::read_u16(&buf[offset..]),
      Self::Big => BigEndian::read_u16(&buf[offset..]),
    }
  }

  #[inline]
  pub fn read_u32(&self, buf: &[u8], offset: usize) -> u32 {
    match *self {
      Self::Little => LittleEndian::read_u32(&buf[offset..]),
      Self::Big => BigEndian::read_u32(&buf[offset..]),
    }
  }

  #[inline]
  pub fn write_u16(&self, buf: &mut [u8], offset: usize, val: u16) {
    match *self {
      Self::Little => LittleEndian::write_u16(&mut buf[offset..], val),
      Self::Big => BigEndian::write_u16(&mut buf[offset..], val),
    }
  }

  #[inline]
  pub fn write_u32(&self, buf: &mut [u8], offset: usize, val: u32) {
    match *self {
      Self::Little => LittleEndian::write_u32(&mut buf[offset..], val),
      Self::Big => BigEndian::write_u32(&mut buf[offset..], val),
    }
  }
}

const fn build_flip_table() -> [u8; 256] {
  let mut table = [0_u8; 256];
  let mut i = 0;
  while i < 256 {
    table[i] = (i as u8).reverse_bits();
    i += 1;
  }
  table
}

/// Lookup table mapping every byte to its bit-reversed value
pub static FLIP_TABLE: [u8; 256] = build_flip_table();

/// Reverse the bit order of every byte, converting between
/// MSB-first and LSB-first fill order.
pub fn flip_bits(buf: &mut [u8]) {
  for b in buf.iter_mut() {
    *b = FLIP_TABLE[*b as usize];
  }
}

/// MSB-first bit reader over a byte slice. Reading past the end
/// yields zero bits, callers check `bits_left()` to detect the end.
#[derive(Debug, Copy, Clone)]
pub struct BitPumpMSB<'a> {
  buffer: &'a [u8],
  pos: usize,
  bits: u64,
  nbits: u32,
}

impl<'a> BitPumpMSB<'a> {
  pub fn new(src: &'a [u8]) -> BitPumpMSB<'a> {
    BitPumpMSB {
      buffer: src,
      pos: 0,
      bits: 0,
      nbits: 0,
    }
  }

  #[inline(always)]
  fn fill(&mut self) {
    while self.nbits <= 48 {
      let inbits = self.buffer.get(self.pos).copied().unwrap_or(0);
      self.bits = (self.bits << 8) | inbits as u64;
      self.pos += 1;
      self.nbits += 8;
    }
  }

  #[inline(always)]
  pub fn peek_bits(&mut self, num: u32) -> u32 {
    if num > self.nbits {
      self.fill();
    }
    ((self.bits >> (self.nbits - num)) & ((1 << num) - 1)) as u32
  }

  #[inline(always)]
  pub fn consume_bits(&mut self, num: u32) {
    if num > self.nbits {
      self.fill();
    }
    self.nbits -= num;
    self.bits &= (1 << self.nbits) - 1;
  }

  #[inline(always)]
  pub fn get_bits(&mut self, num: u32) -> u32 {
    if num == 0 {
      return 0;
    }
    let val = self.peek_bits(num);
    self.consume_bits(num);
    val
  }

  /// Number of bits consumed so far
  #[inline(always)]
  pub fn consumed(&self) -> usize {
    self.pos * 8 - self.nbits as usize
  }

  /// Number of real (not padded) bits left
  #[inline(always)]
  pub fn bits_left(&self) -> isize {
    (self.buffer.len() * 8) as isize - self.consumed() as isize
  }

  /// Skip to the next byte boundary
  pub fn align_byte(&mut self) {
    let rem = (self.consumed() % 8) as u32;
    if rem != 0 {
      self.consume_bits(8 - rem);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn flip_table_is_involution() -> std::result::Result<(), Box<dyn std::error::Error>> {
    assert_eq!(FLIP_TABLE[0x01], 0x80);
    assert_eq!(FLIP_TABLE[0xF0], 0x0F);
    for i in 0..=255_u8 {
      assert_eq!(FLIP_TABLE[FLIP_TABLE[i as usize] as usize], i);
    }
    Ok(())
  }

  #[test]
  fn word_alignment() -> std::result::Result<(), Box<dyn std::error::Error>> {
    assert_eq!(align_word(0), 0);
    assert_eq!(align_word(5), 8);
    assert_eq!(align_word(8), 8);
    assert_eq!(clampbits(-4, 8), 0);
    assert_eq!(clampbits(300, 8), 255);
    Ok(())
  }

  #[test]
  fn pump_reads_msb_first() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let mut pump = BitPumpMSB::new(&[0b1010_0000, 0xFF]);
    assert_eq!(pump.get_bits(3), 0b101);
    assert_eq!(pump.bits_left(), 13);
    pump.align_byte();
    assert_eq!(pump.get_bits(8), 0xFF);
    assert_eq!(pump.bits_left(), 0);
    assert_eq!(pump.get_bits(4), 0);
    Ok(())
  }
}
