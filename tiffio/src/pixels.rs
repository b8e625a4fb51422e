// SPDX-License-Identifier: LGPL-2.1
// Copyright 2021 Daniel Vogelbacher <daniel@chaospixel.com>

//! In-memory rasters and the sample conversions between rasters and
//! the packed rows stored in strips and tiles.

use std::{fmt::Debug, sync::Arc};

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::{
  IFD, PhotometricInterpretation, Result, SampleFormat, TiffError,
  bits::{Endian, clampbits},
  tags::TiffCommonTag,
  tiles::Rect,
};

/// Sample storage of a raster, one element per sample
#[derive(Debug, Clone, PartialEq)]
pub enum RasterData {
  U8(Vec<u8>),
  U16(Vec<u16>),
  U32(Vec<u32>),
  F32(Vec<f32>),
}

impl RasterData {
  pub fn len(&self) -> usize {
    match self {
      Self::U8(v) => v.len(),
      Self::U16(v) => v.len(),
      Self::U32(v) => v.len(),
      Self::F32(v) => v.len(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

/// Interleaved image samples. Gray data has BlackIsZero sense,
/// a zero sample is black.
#[derive(Debug, Clone, PartialEq)]
pub struct Raster {
  pub width: usize,
  pub height: usize,
  pub bands: usize,
  /// Significant bits of each sample
  pub bits: u16,
  pub data: RasterData,
}

impl Raster {
  pub fn new_u8(width: usize, height: usize, bands: usize, data: Vec<u8>) -> Self {
    Self {
      width,
      height,
      bands,
      bits: 8,
      data: RasterData::U8(data),
    }
  }

  pub fn new_u16(width: usize, height: usize, bands: usize, data: Vec<u16>) -> Self {
    Self {
      width,
      height,
      bands,
      bits: 16,
      data: RasterData::U16(data),
    }
  }

  pub fn new_u32(width: usize, height: usize, bands: usize, data: Vec<u32>) -> Self {
    Self {
      width,
      height,
      bands,
      bits: 32,
      data: RasterData::U32(data),
    }
  }

  pub fn new_f32(width: usize, height: usize, bands: usize, data: Vec<f32>) -> Self {
    Self {
      width,
      height,
      bands,
      bits: 32,
      data: RasterData::F32(data),
    }
  }

  /// Single band 1-bit raster, one byte (0 or 1) per pixel, 1 is white
  pub fn new_bilevel(width: usize, height: usize, data: Vec<u8>) -> Self {
    Self {
      width,
      height,
      bands: 1,
      bits: 1,
      data: RasterData::U8(data),
    }
  }

  /// Zero filled raster with a storage type fitting `bits`
  pub fn zeroed(width: usize, height: usize, bands: usize, bits: u16, format: SampleFormat) -> Self {
    let len = width * height * bands;
    let data = match (format, bits) {
      (SampleFormat::IEEEFP, _) => RasterData::F32(vec![0.0; len]),
      (_, 0..=8) => RasterData::U8(vec![0; len]),
      (_, 9..=16) => RasterData::U16(vec![0; len]),
      _ => RasterData::U32(vec![0; len]),
    };
    Self {
      width,
      height,
      bands,
      bits,
      data,
    }
  }

  pub fn sample_format(&self) -> SampleFormat {
    match self.data {
      RasterData::F32(_) => SampleFormat::IEEEFP,
      _ => SampleFormat::Uint,
    }
  }

  pub fn rect(&self) -> Rect {
    Rect::with_size(self.width, self.height)
  }

  /// Check storage size and bit depth against the dimensions
  pub fn validate(&self) -> Result<()> {
    if self.width == 0 || self.height == 0 || self.bands == 0 {
      return Err(TiffError::IllegalArgument(format!(
        "Raster {}x{} with {} bands is empty",
        self.width, self.height, self.bands
      )));
    }
    let expected = self.width * self.height * self.bands;
    if self.data.len() != expected {
      return Err(TiffError::IllegalArgument(format!(
        "Raster holds {} samples, {} expected",
        self.data.len(),
        expected
      )));
    }
    let max_bits = match self.data {
      RasterData::U8(_) => 8,
      RasterData::U16(_) => 16,
      RasterData::U32(_) | RasterData::F32(_) => 32,
    };
    if self.bits == 0 || self.bits > max_bits || (matches!(self.data, RasterData::F32(_)) && self.bits != 32) {
      return Err(TiffError::IllegalArgument(format!("Invalid sample depth {} for raster storage", self.bits)));
    }
    Ok(())
  }

  #[inline]
  fn pos(&self, x: usize, y: usize, band: usize) -> usize {
    (y * self.width + x) * self.bands + band
  }

  /// Sample value, float samples as their bit pattern
  #[inline]
  pub fn get(&self, x: usize, y: usize, band: usize) -> u32 {
    let i = self.pos(x, y, band);
    match &self.data {
      RasterData::U8(v) => v[i] as u32,
      RasterData::U16(v) => v[i] as u32,
      RasterData::U32(v) => v[i],
      RasterData::F32(v) => v[i].to_bits(),
    }
  }

  #[inline]
  pub fn set(&mut self, x: usize, y: usize, band: usize, value: u32) {
    let i = self.pos(x, y, band);
    match &mut self.data {
      RasterData::U8(v) => v[i] = value as u8,
      RasterData::U16(v) => v[i] = value as u16,
      RasterData::U32(v) => v[i] = value,
      RasterData::F32(v) => v[i] = f32::from_bits(value),
    }
  }
}

/// Pack one row of samples. Depths of 8, 16 and 32 bits are stored
/// in `endian` byte order, all others as a MSB-first bit stream padded
/// to the next byte.
pub fn pack_row(samples: &[u32], bits: u16, endian: Endian, out: &mut Vec<u8>) {
  match bits {
    8 => out.extend(samples.iter().map(|s| *s as u8)),
    16 => {
      let start = out.len();
      out.resize(start + samples.len() * 2, 0);
      for (i, s) in samples.iter().enumerate() {
        let dst = &mut out[start + i * 2..];
        match endian {
          Endian::Little => LittleEndian::write_u16(dst, *s as u16),
          Endian::Big => BigEndian::write_u16(dst, *s as u16),
        }
      }
    }
    32 => {
      let start = out.len();
      out.resize(start + samples.len() * 4, 0);
      for (i, s) in samples.iter().enumerate() {
        let dst = &mut out[start + i * 4..];
        match endian {
          Endian::Little => LittleEndian::write_u32(dst, *s),
          Endian::Big => BigEndian::write_u32(dst, *s),
        }
      }
    }
    _ => {
      let mask = ((1_u64 << bits) - 1) as u64;
      let mut acc: u64 = 0;
      let mut nbits = 0;
      for s in samples {
        acc = (acc << bits) | (*s as u64 & mask);
        nbits += bits as u32;
        while nbits >= 8 {
          nbits -= 8;
          out.push((acc >> nbits) as u8);
        }
        acc &= (1 << nbits) - 1;
      }
      if nbits > 0 {
        out.push((acc << (8 - nbits)) as u8);
      }
    }
  }
}

/// Unpack `count` samples of one row, the reverse of [`pack_row`]
pub fn unpack_row(src: &[u8], bits: u16, endian: Endian, count: usize, out: &mut Vec<u32>) {
  match bits {
    8 => out.extend(src.iter().take(count).map(|b| *b as u32)),
    16 => out.extend(src.chunks_exact(2).take(count).map(|c| match endian {
      Endian::Little => LittleEndian::read_u16(c) as u32,
      Endian::Big => BigEndian::read_u16(c) as u32,
    })),
    32 => out.extend(src.chunks_exact(4).take(count).map(|c| match endian {
      Endian::Little => LittleEndian::read_u32(c),
      Endian::Big => BigEndian::read_u32(c),
    })),
    _ => {
      let mask = (1_u64 << bits) - 1;
      let mut acc: u64 = 0;
      let mut nbits = 0_u32;
      let mut bytes = src.iter();
      for _ in 0..count {
        while nbits < bits as u32 {
          acc = (acc << 8) | bytes.next().copied().unwrap_or(0) as u64;
          nbits += 8;
        }
        nbits -= bits as u32;
        out.push(((acc >> nbits) & mask) as u32);
        acc &= (1 << nbits) - 1;
      }
    }
  }
}

/// Bytes of a packed row
pub fn row_bytes(width: usize, samples: usize, bits: u16) -> usize {
  (width * samples * bits as usize).div_ceil(8)
}

/// Invert packed bilevel data in place
pub fn invert_bilevel(buf: &mut [u8]) {
  for b in buf.iter_mut() {
    *b ^= 0xFF;
  }
}

/// Rescale a sample from `in_bits` to `out_bits` with rounding
#[inline]
pub fn rescale(value: u32, in_bits: u16, out_bits: u16) -> u32 {
  let max_in = (1_u64 << in_bits) - 1;
  let max_out = (1_u64 << out_bits) - 1;
  ((value as u64 * max_out + max_in / 2) / max_in) as u32
}

#[derive(Debug, Clone)]
enum ScaleLookup {
  /// Output fits in a byte
  Direct(Vec<u8>),
  /// Output of 9 to 16 bits, high and low byte in separate tables
  Split { high: Vec<u8>, low: Vec<u8> },
  /// Input too wide for a table
  Computed,
}

/// Precomputed sample rescaling between two bit depths
#[derive(Debug, Clone)]
pub struct ScaleTable {
  in_bits: u16,
  out_bits: u16,
  lookup: ScaleLookup,
}

impl ScaleTable {
  pub fn new(in_bits: u16, out_bits: u16) -> Self {
    let lookup = if in_bits > 16 || out_bits > 16 {
      ScaleLookup::Computed
    } else {
      let size = 1_usize << in_bits;
      if out_bits <= 8 {
        ScaleLookup::Direct((0..size).map(|s| rescale(s as u32, in_bits, out_bits) as u8).collect())
      } else {
        let mut high = Vec::with_capacity(size);
        let mut low = Vec::with_capacity(size);
        for s in 0..size {
          let v = rescale(s as u32, in_bits, out_bits);
          high.push((v >> 8) as u8);
          low.push(v as u8);
        }
        ScaleLookup::Split { high, low }
      }
    };
    Self { in_bits, out_bits, lookup }
  }

  #[inline]
  pub fn apply(&self, value: u32) -> u32 {
    let max_in = ((1_u64 << self.in_bits) - 1) as u32;
    let value = value.min(max_in);
    match &self.lookup {
      ScaleLookup::Direct(table) => table[value as usize] as u32,
      ScaleLookup::Split { high, low } => ((high[value as usize] as u32) << 8) | low[value as usize] as u32,
      ScaleLookup::Computed => rescale(value, self.in_bits, self.out_bits),
    }
  }
}

/// Pluggable per pixel color transform between RGB and the stored
/// color space. Values are in sample units of the stored depth.
pub trait ColorConverter: Debug + Send + Sync {
  fn from_rgb(&self, r: f32, g: f32, b: f32) -> [f32; 3];
  fn to_rgb(&self, c0: f32, c1: f32, c2: f32) -> [f32; 3];
  /// Photometric interpretation of the converted samples
  fn photometric(&self) -> PhotometricInterpretation;
}

/// YCbCr per CCIR 601 with configurable coefficients and reference
/// black/white levels.
#[derive(Debug, Clone, PartialEq)]
pub struct YCbCrConverter {
  pub luma: [f32; 3],
  pub reference: [f32; 6],
}

impl Default for YCbCrConverter {
  fn default() -> Self {
    Self {
      luma: [0.299, 0.587, 0.114],
      reference: [0.0, 255.0, 128.0, 255.0, 128.0, 255.0],
    }
  }
}

impl YCbCrConverter {
  /// Converter parameterized from YCbCrCoefficients and ReferenceBlackWhite
  pub fn from_ifd(ifd: &IFD) -> Result<Self> {
    let mut conv = Self::default();
    if let Some(entry) = ifd.get_entry(TiffCommonTag::YCbCrCoefficients) {
      for (i, c) in conv.luma.iter_mut().enumerate() {
        if let Some(v) = entry.value.get_f32(i)? {
          *c = v;
        }
      }
    }
    if let Some(entry) = ifd.get_entry(TiffCommonTag::ReferenceBlackWhite) {
      for (i, c) in conv.reference.iter_mut().enumerate() {
        if let Some(v) = entry.value.get_f32(i)? {
          *c = v;
        }
      }
    }
    Ok(conv)
  }

  fn code_range(&self, i: usize) -> (f32, f32) {
    let (black, white) = (self.reference[i * 2], self.reference[i * 2 + 1]);
    (black, (white - black).max(1.0))
  }
}

impl ColorConverter for YCbCrConverter {
  fn from_rgb(&self, r: f32, g: f32, b: f32) -> [f32; 3] {
    let [lr, lg, lb] = self.luma;
    let y = lr * r + lg * g + lb * b;
    let cb = (b - y) / (2.0 - 2.0 * lb);
    let cr = (r - y) / (2.0 - 2.0 * lr);
    let (y_black, y_range) = self.code_range(0);
    let (cb_black, cb_range) = self.code_range(1);
    let (cr_black, cr_range) = self.code_range(2);
    [
      y * y_range / 255.0 + y_black,
      cb * cb_range / 127.0 + cb_black,
      cr * cr_range / 127.0 + cr_black,
    ]
  }

  fn to_rgb(&self, c0: f32, c1: f32, c2: f32) -> [f32; 3] {
    let [lr, lg, lb] = self.luma;
    let (y_black, y_range) = self.code_range(0);
    let (cb_black, cb_range) = self.code_range(1);
    let (cr_black, cr_range) = self.code_range(2);
    let y = (c0 - y_black) * 255.0 / y_range;
    let cb = (c1 - cb_black) * 127.0 / cb_range;
    let cr = (c2 - cr_black) * 127.0 / cr_range;
    let r = cr * (2.0 - 2.0 * lr) + y;
    let b = cb * (2.0 - 2.0 * lb) + y;
    let g = (y - lb * b - lr * r) / lg;
    [r, g, b]
  }

  fn photometric(&self) -> PhotometricInterpretation {
    PhotometricInterpretation::YCbCr
  }
}

/// Per pixel conversion between raster samples and stored samples:
/// color conversion, rescaling and photometric inversion.
#[derive(Debug, Clone, Default)]
pub struct SampleTransform {
  /// Depth of the raster samples
  raster_bits: u16,
  /// Stored depth of each band
  stored_bits: Vec<u16>,
  scales: Vec<Option<(ScaleTable, ScaleTable)>>,
  invert: bool,
  float: bool,
  converter: Option<Arc<dyn ColorConverter>>,
}

impl SampleTransform {
  pub fn new(raster_bits: u16, stored_bits: &[u16], format: SampleFormat, invert: bool, converter: Option<Arc<dyn ColorConverter>>) -> Self {
    let float = format == SampleFormat::IEEEFP;
    let scales = stored_bits
      .iter()
      .map(|b| {
        if *b == raster_bits || float {
          None
        } else {
          Some((ScaleTable::new(raster_bits, *b), ScaleTable::new(*b, raster_bits)))
        }
      })
      .collect();
    let converter = if stored_bits.len() == 3 && !float { converter } else { None };
    Self {
      raster_bits,
      stored_bits: stored_bits.to_vec(),
      scales,
      invert: invert && !float,
      float,
      converter,
    }
  }

  /// True if samples are passed through unchanged
  pub fn is_identity(&self) -> bool {
    self.float || (!self.invert && self.converter.is_none() && self.scales.iter().all(Option::is_none))
  }

  fn convert(&self, pixel: &mut [u32], bits: u16, to_rgb: bool) {
    if let Some(conv) = &self.converter {
      let p = [pixel[0] as f32, pixel[1] as f32, pixel[2] as f32];
      let out = if to_rgb { conv.to_rgb(p[0], p[1], p[2]) } else { conv.from_rgb(p[0], p[1], p[2]) };
      for (dst, v) in pixel.iter_mut().zip(out) {
        *dst = clampbits(v.round() as i32, bits as u32);
      }
    }
  }

  /// Raster samples of one pixel to stored samples
  pub fn to_stored(&self, pixel: &mut [u32]) {
    if self.float {
      return;
    }
    self.convert(pixel, self.raster_bits, false);
    for (i, s) in pixel.iter_mut().enumerate() {
      if let Some(Some((fwd, _))) = self.scales.get(i) {
        *s = fwd.apply(*s);
      }
      if self.invert {
        let max = ((1_u64 << self.stored_bits[i]) - 1) as u32;
        *s = max - (*s).min(max);
      }
    }
  }

  /// Stored samples of one pixel to raster samples
  pub fn to_raster(&self, pixel: &mut [u32]) {
    if self.float {
      return;
    }
    for (i, s) in pixel.iter_mut().enumerate() {
      if self.invert {
        let max = ((1_u64 << self.stored_bits[i]) - 1) as u32;
        *s = max - (*s).min(max);
      }
      if let Some(Some((_, back))) = self.scales.get(i) {
        *s = back.apply(*s);
      }
    }
    self.convert(pixel, self.raster_bits, true);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn pack_sub_byte_depths() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let mut out = Vec::new();
    pack_row(&[1, 0, 1, 1, 0, 0, 0, 1, 1], 1, Endian::Little, &mut out);
    assert_eq!(out, vec![0b1011_0001, 0b1000_0000]);

    out.clear();
    pack_row(&[3, 0, 2], 2, Endian::Little, &mut out);
    assert_eq!(out, vec![0b1100_1000]);

    out.clear();
    pack_row(&[0xA, 0x5, 0xF], 4, Endian::Big, &mut out);
    assert_eq!(out, vec![0xA5, 0xF0]);

    let mut samples = Vec::new();
    unpack_row(&out, 4, Endian::Big, 3, &mut samples);
    assert_eq!(samples, vec![0xA, 0x5, 0xF]);
    Ok(())
  }

  #[test]
  fn pack_honors_byte_order() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let mut le = Vec::new();
    pack_row(&[0x1234], 16, Endian::Little, &mut le);
    assert_eq!(le, vec![0x34, 0x12]);
    let mut be = Vec::new();
    pack_row(&[0x1234_5678], 32, Endian::Big, &mut be);
    assert_eq!(be, vec![0x12, 0x34, 0x56, 0x78]);
    let mut samples = Vec::new();
    unpack_row(&be, 32, Endian::Big, 1, &mut samples);
    assert_eq!(samples, vec![0x1234_5678]);
    Ok(())
  }

  #[test]
  fn pack_odd_depths() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let mut out = Vec::new();
    pack_row(&[0xABC, 0x123], 12, Endian::Little, &mut out);
    assert_eq!(out, vec![0xAB, 0xC1, 0x23]);
    let mut samples = Vec::new();
    unpack_row(&out, 12, Endian::Little, 2, &mut samples);
    assert_eq!(samples, vec![0xABC, 0x123]);
    Ok(())
  }

  #[test]
  fn scale_tables() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let up = ScaleTable::new(8, 16);
    assert_eq!(up.apply(0), 0);
    assert_eq!(up.apply(255), 65535);
    assert_eq!(up.apply(128), 32896);
    let down = ScaleTable::new(16, 8);
    assert_eq!(down.apply(65535), 255);
    assert_eq!(down.apply(32896), 128);
    let bilevel = ScaleTable::new(8, 1);
    assert_eq!(bilevel.apply(127), 0);
    assert_eq!(bilevel.apply(128), 1);
    assert_eq!(ScaleTable::new(32, 8).apply(u32::MAX), 255);
    Ok(())
  }

  #[test]
  fn transform_inverts_and_scales() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let t = SampleTransform::new(8, &[4], SampleFormat::Uint, true, None);
    let mut px = [255];
    t.to_stored(&mut px);
    assert_eq!(px, [0]);
    t.to_raster(&mut px);
    assert_eq!(px, [255]);
    assert!(SampleTransform::new(8, &[8, 8, 8], SampleFormat::Uint, false, None).is_identity());
    Ok(())
  }

  #[test]
  fn ycbcr_roundtrip() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let conv = YCbCrConverter::default();
    for rgb in [[0.0, 0.0, 0.0], [255.0, 255.0, 255.0], [200.0, 30.0, 90.0]] {
      let ycc = conv.from_rgb(rgb[0], rgb[1], rgb[2]);
      let back = conv.to_rgb(ycc[0], ycc[1], ycc[2]);
      for (a, b) in rgb.iter().zip(back) {
        assert!((a - b).abs() < 0.5, "{:?} -> {:?}", rgb, back);
      }
    }
    let white = conv.from_rgb(255.0, 255.0, 255.0);
    assert!((white[0] - 255.0).abs() < 0.01);
    assert!((white[1] - 128.0).abs() < 0.01);
    Ok(())
  }

  #[test]
  fn raster_access() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let mut r = Raster::zeroed(3, 2, 2, 12, SampleFormat::Uint);
    r.set(2, 1, 1, 4000);
    assert_eq!(r.get(2, 1, 1), 4000);
    assert!(matches!(r.data, RasterData::U16(_)));
    r.validate()?;
    assert!(Raster::new_u8(2, 2, 1, vec![0; 3]).validate().is_err());
    Ok(())
  }
}
