// SPDX-License-Identifier: MIT
// Copyright 2021 Daniel Vogelbacher <daniel@chaospixel.com>

use std::{
  collections::HashSet,
  io::{Read, Seek, SeekFrom},
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
};

use byteorder::{BigEndian, LittleEndian, ReadBytesExt};
use log::{debug, warn};

use crate::{
  CompressionMethod, IFD, PhotometricInterpretation, Result, TIFF_MAGIC, TiffError,
  bits::Endian,
  codecs::{CodecConfig, decode_tile, new_decompressor},
  pixels::{ColorConverter, Raster, RasterData, SampleTransform, invert_bilevel, row_bytes, unpack_row},
  tags::{TagSetId, TiffCommonTag},
  tiles::{Rect, RegionMap, Subsampling, TileGrid},
};

pub trait ReadByteOrder {
  fn read_u8(&mut self) -> std::io::Result<u8>;
  fn read_i8(&mut self) -> std::io::Result<i8>;
  fn read_u16(&mut self) -> std::io::Result<u16>;
  fn read_i16(&mut self) -> std::io::Result<i16>;
  fn read_u32(&mut self) -> std::io::Result<u32>;
  fn read_i32(&mut self) -> std::io::Result<i32>;
  fn read_f32(&mut self) -> std::io::Result<f32>;
  fn read_f64(&mut self) -> std::io::Result<f64>;

  fn read_u8_into(&mut self, dst: &mut [u8]) -> std::io::Result<()>;
  fn read_i8_into(&mut self, dst: &mut [i8]) -> std::io::Result<()>;
  fn read_u16_into(&mut self, dst: &mut [u16]) -> std::io::Result<()>;
  fn read_i16_into(&mut self, dst: &mut [i16]) -> std::io::Result<()>;
  fn read_u32_into(&mut self, dst: &mut [u32]) -> std::io::Result<()>;
  fn read_i32_into(&mut self, dst: &mut [i32]) -> std::io::Result<()>;
  fn read_f32_into(&mut self, dst: &mut [f32]) -> std::io::Result<()>;
  fn read_f64_into(&mut self, dst: &mut [f64]) -> std::io::Result<()>;
}

pub struct EndianReader<'a, R: Read + Seek + 'a> {
  endian: Endian,
  inner: &'a mut R,
}

impl<'a, R: Read + Seek + 'a> EndianReader<'a, R> {
  pub fn new(inner: &'a mut R, endian: Endian) -> Self {
    Self { endian, inner }
  }

  pub fn into_inner(self) -> &'a mut R {
    self.inner
  }

  pub fn endian(&self) -> Endian {
    self.endian
  }

  pub fn position(&mut self) -> Result<u64> {
    Ok(self.inner.stream_position()?)
  }

  pub fn goto(&mut self, offset: u32) -> Result<()> {
    self.inner.seek(SeekFrom::Start(offset as u64))?;
    Ok(())
  }

  /// Total stream length, the position is preserved
  pub fn stream_len(&mut self) -> Result<u64> {
    let pos = self.inner.stream_position()?;
    let len = self.inner.seek(SeekFrom::End(0))?;
    self.inner.seek(SeekFrom::Start(pos))?;
    Ok(len)
  }
}

impl<'a, R: Read + Seek + 'a> ReadByteOrder for EndianReader<'a, R> {
  fn read_u8(&mut self) -> std::io::Result<u8> {
    self.inner.read_u8()
  }

  fn read_i8(&mut self) -> std::io::Result<i8> {
    self.inner.read_i8()
  }

  fn read_u16(&mut self) -> std::io::Result<u16> {
    match self.endian {
      Endian::Little => self.inner.read_u16::<LittleEndian>(),
      Endian::Big => self.inner.read_u16::<BigEndian>(),
    }
  }

  fn read_i16(&mut self) -> std::io::Result<i16> {
    match self.endian {
      Endian::Little => self.inner.read_i16::<LittleEndian>(),
      Endian::Big => self.inner.read_i16::<BigEndian>(),
    }
  }

  fn read_u32(&mut self) -> std::io::Result<u32> {
    match self.endian {
      Endian::Little => self.inner.read_u32::<LittleEndian>(),
      Endian::Big => self.inner.read_u32::<BigEndian>(),
    }
  }

  fn read_i32(&mut self) -> std::io::Result<i32> {
    match self.endian {
      Endian::Little => self.inner.read_i32::<LittleEndian>(),
      Endian::Big => self.inner.read_i32::<BigEndian>(),
    }
  }

  fn read_f32(&mut self) -> std::io::Result<f32> {
    match self.endian {
      Endian::Little => self.inner.read_f32::<LittleEndian>(),
      Endian::Big => self.inner.read_f32::<BigEndian>(),
    }
  }

  fn read_f64(&mut self) -> std::io::Result<f64> {
    match self.endian {
      Endian::Little => self.inner.read_f64::<LittleEndian>(),
      Endian::Big => self.inner.read_f64::<BigEndian>(),
    }
  }

  fn read_u8_into(&mut self, dst: &mut [u8]) -> std::io::Result<()> {
    self.inner.read_exact(dst)
  }

  fn read_i8_into(&mut self, dst: &mut [i8]) -> std::io::Result<()> {
    self.inner.read_i8_into(dst)
  }

  fn read_u16_into(&mut self, dst: &mut [u16]) -> std::io::Result<()> {
    match self.endian {
      Endian::Little => self.inner.read_u16_into::<LittleEndian>(dst),
      Endian::Big => self.inner.read_u16_into::<BigEndian>(dst),
    }
  }

  fn read_i16_into(&mut self, dst: &mut [i16]) -> std::io::Result<()> {
    match self.endian {
      Endian::Little => self.inner.read_i16_into::<LittleEndian>(dst),
      Endian::Big => self.inner.read_i16_into::<BigEndian>(dst),
    }
  }

  fn read_u32_into(&mut self, dst: &mut [u32]) -> std::io::Result<()> {
    match self.endian {
      Endian::Little => self.inner.read_u32_into::<LittleEndian>(dst),
      Endian::Big => self.inner.read_u32_into::<BigEndian>(dst),
    }
  }

  fn read_i32_into(&mut self, dst: &mut [i32]) -> std::io::Result<()> {
    match self.endian {
      Endian::Little => self.inner.read_i32_into::<LittleEndian>(dst),
      Endian::Big => self.inner.read_i32_into::<BigEndian>(dst),
    }
  }

  fn read_f32_into(&mut self, dst: &mut [f32]) -> std::io::Result<()> {
    match self.endian {
      Endian::Little => self.inner.read_f32_into::<LittleEndian>(dst),
      Endian::Big => self.inner.read_f32_into::<BigEndian>(dst),
    }
  }

  fn read_f64_into(&mut self, dst: &mut [f64]) -> std::io::Result<()> {
    match self.endian {
      Endian::Little => self.inner.read_f64_into::<LittleEndian>(dst),
      Endian::Big => self.inner.read_f64_into::<BigEndian>(dst),
    }
  }
}

/// Read the 8 byte header, returns byte order and first IFD offset
pub(crate) fn read_header<R: Read + Seek>(file: &mut R) -> Result<(Endian, u32)> {
  file.seek(SeekFrom::Start(0))?;
  let endian = match file.read_u16::<LittleEndian>()? {
    0x4949 => Endian::Little,
    0x4d4d => Endian::Big,
    x => {
      return Err(TiffError::FormatMismatch(format!("Unknown byte order marker 0x{:x}", x)));
    }
  };
  let mut reader = EndianReader::new(file, endian);
  let magic = reader.read_u16()?;
  if magic != TIFF_MAGIC {
    return Err(TiffError::FormatMismatch(format!("Invalid magic marker for TIFF: {}", magic)));
  }
  let first_ifd = reader.read_u32()?;
  Ok((endian, first_ifd))
}

/// Codec parameters for one strip or tile of `ifd`. For planar
/// images `plane` selects the band.
pub fn codec_config(ifd: &IFD, grid: &TileGrid, row: usize, plane: usize) -> Result<CodecConfig> {
  let (width, height) = grid.encoded_size(row);
  let bits = ifd.bits_per_sample()?;
  let bits_per_sample = if grid.is_planar() {
    vec![bits.get(plane).copied().unwrap_or(bits[0])]
  } else {
    bits
  };
  Ok(CodecConfig {
    width,
    height,
    bits_per_sample,
    sample_format: ifd.sample_format()?,
    predictor: ifd.predictor()?,
    fill_order: ifd.fill_order()?,
    endian: ifd.endian,
    t4_options: ifd.t4_options()?,
    t6_options: ifd.t6_options()?,
    jpeg_tables: ifd.jpeg_tables().map(<[u8]>::to_vec),
    ..Default::default()
  })
}

#[derive(Debug, Clone)]
pub struct ReaderOptions {
  /// Skip fields whose tag is not part of the tag sets
  pub ignore_unknown: bool,
  /// Tag sets of top level directories
  pub tag_sets: Vec<TagSetId>,
  /// Directory chains longer than this are cut
  pub max_chain: usize,
}

impl Default for ReaderOptions {
  fn default() -> Self {
    Self {
      ignore_unknown: false,
      tag_sets: vec![TagSetId::Baseline],
      max_chain: 65536,
    }
  }
}

/// Parameters for decoding an image
#[derive(Debug, Clone, Default)]
pub struct ReadParam {
  /// Area of the image to decode, the whole image if None
  pub source_region: Option<Rect>,
  pub subsampling: Subsampling,
  /// Sample depth of the returned raster, the stored depth if None
  pub dest_bits: Option<u16>,
  /// Converts stored 3-band samples to RGB
  pub color_converter: Option<Arc<dyn ColorConverter>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStatus {
  Complete,
  /// Decoding was aborted between tiles, the raster is partially filled
  Aborted,
}

#[derive(Debug, Clone)]
pub struct DecodedImage {
  pub raster: Raster,
  pub status: DecodeStatus,
}

/// Reader for TIFF files
pub struct TiffReader<R: Read + Seek> {
  inner: R,
  endian: Endian,
  first_ifd: u32,
  options: ReaderOptions,
  abort: Arc<AtomicBool>,
}

impl<R: Read + Seek> TiffReader<R> {
  pub fn new(inner: R) -> Result<Self> {
    Self::with_options(inner, ReaderOptions::default())
  }

  pub fn with_options(mut inner: R, options: ReaderOptions) -> Result<Self> {
    let (endian, first_ifd) = read_header(&mut inner)?;
    debug!("TIFF header: {:?} endian, first IFD at {}", endian, first_ifd);
    Ok(Self {
      inner,
      endian,
      first_ifd,
      options,
      abort: Arc::new(AtomicBool::new(false)),
    })
  }

  pub fn endian(&self) -> Endian {
    self.endian
  }

  pub fn into_inner(self) -> R {
    self.inner
  }

  /// Handle to request an abort of a running decode. The flag is
  /// checked between tiles and cleared when honored.
  pub fn abort_handle(&self) -> Arc<AtomicBool> {
    Arc::clone(&self.abort)
  }

  /// Offsets of all directories in the top level chain
  pub fn ifd_offsets(&mut self) -> Result<Vec<u32>> {
    let mut reader = EndianReader::new(&mut self.inner, self.endian);
    let stream_len = reader.stream_len()?;
    let mut offsets = Vec::new();
    let mut seen = HashSet::new();
    let mut next = self.first_ifd;
    while next != 0 {
      if offsets.len() >= self.options.max_chain {
        warn!("Directory chain longer than {}, ignoring the rest", self.options.max_chain);
        break;
      }
      if !seen.insert(next) {
        warn!("Directory chain loops back to {}, stop", next);
        break;
      }
      if next as u64 + 2 > stream_len {
        warn!("Directory offset {} points past end of stream, stop", next);
        break;
      }
      offsets.push(next);
      reader.goto(next)?;
      let count = reader.read_u16()? as u64;
      let pointer_pos = next as u64 + 2 + count * crate::ENTRY_SIZE;
      if pointer_pos + 4 > stream_len {
        warn!("Missing next IFD pointer after directory at {}", next);
        break;
      }
      reader.goto(u32::try_from(pointer_pos)?)?;
      next = reader.read_u32()?;
    }
    Ok(offsets)
  }

  pub fn num_images(&mut self) -> Result<usize> {
    Ok(self.ifd_offsets()?.len())
  }

  pub fn read_ifd(&mut self, index: usize) -> Result<IFD> {
    let offsets = self.ifd_offsets()?;
    let offset = *offsets
      .get(index)
      .ok_or_else(|| TiffError::IndexOutOfBounds(format!("Image {} requested, file has {}", index, offsets.len())))?;
    self.read_ifd_at(offset)
  }

  pub fn read_ifd_at(&mut self, offset: u32) -> Result<IFD> {
    let mut reader = EndianReader::new(&mut self.inner, self.endian);
    IFD::read(&mut reader, offset, &self.options.tag_sets, self.options.ignore_unknown)
  }

  /// All directories of the top level chain
  pub fn read_chain(&mut self) -> Result<Vec<IFD>> {
    self.ifd_offsets()?.into_iter().map(|offset| self.read_ifd_at(offset)).collect()
  }

  /// Decompressed bytes of one strip or tile
  pub fn read_tile(&mut self, ifd: &IFD, index: usize) -> Result<Vec<u8>> {
    let grid = TileGrid::from_ifd(ifd)?;
    let offsets = ifd.data_offsets()?;
    let counts = ifd.data_byte_counts()?;
    self.decode_tile_data(ifd, &grid, &offsets, &counts, index)
  }

  pub(crate) fn decode_tile_data(&mut self, ifd: &IFD, grid: &TileGrid, offsets: &[u32], counts: &[u32], index: usize) -> Result<Vec<u8>> {
    if index >= grid.tile_count() {
      return Err(TiffError::IndexOutOfBounds(format!("Tile {} of {}", index, grid.tile_count())));
    }
    let (offset, count) = match (offsets.get(index), counts.get(index)) {
      (Some(o), Some(c)) => (*o as u64, *c as u64),
      _ => {
        return Err(TiffError::General(format!(
          "Tile {} has no offset or byte count ({} offsets, {} byte counts)",
          index,
          offsets.len(),
          counts.len()
        )));
      }
    };
    let (_, row, plane) = grid.position(index);
    let cfg = codec_config(ifd, grid, row, plane)?;
    let mut dst = vec![0; cfg.tile_bytes()];
    if count == 0 {
      debug!("Tile {} is empty", index);
      return Ok(dst);
    }

    let stream_len = self.inner.seek(SeekFrom::End(0))?;
    if offset >= stream_len {
      warn!("Tile {} starts at {} beyond end of stream, left empty", index, offset);
      return Ok(dst);
    }
    let available = count.min(stream_len - offset);
    if available < count {
      warn!("Tile {} is truncated: {} of {} bytes present", index, available, count);
    }
    let mut src = vec![0; available as usize];
    self.inner.seek(SeekFrom::Start(offset))?;
    self.inner.read_exact(&mut src)?;

    let mut codec = new_decompressor(ifd.compression()?)?;
    let stride = cfg.row_bytes();
    decode_tile(codec.as_mut(), &cfg, &src, &mut dst, 0, stride)?;
    Ok(dst)
  }

  pub fn read_image(&mut self, index: usize, param: &ReadParam) -> Result<DecodedImage> {
    let ifd = self.read_ifd(index)?;
    self.read_image_ifd(&ifd, param)
  }

  /// Decode a region of the image described by `ifd` into a raster.
  /// WhiteIsZero data is normalized so a zero sample is black.
  pub fn read_image_ifd(&mut self, ifd: &IFD, param: &ReadParam) -> Result<DecodedImage> {
    let grid = TileGrid::from_ifd(ifd)?;
    let bits = ifd.bits_per_sample()?;
    let format = ifd.sample_format()?;
    let compression = ifd.compression()?;
    let bands = grid.bands;
    if bits.iter().any(|b| *b == 0 || *b > 32) || bits.iter().any(|b| *b != bits[0]) {
      return Err(TiffError::Unsupported(format!("BitsPerSample {:?}", bits)));
    }
    let stored_bits = bits[0];
    let photometric = match ifd.photometric()? {
      Some(p) => p,
      None => {
        warn!("PhotometricInterpretation missing, assume BlackIsZero");
        PhotometricInterpretation::BlackIsZero
      }
    };
    if photometric == PhotometricInterpretation::YCbCr && compression != CompressionMethod::ModernJPEG {
      if let Some(sub) = ifd.get_entry(TiffCommonTag::YCbCrSubSampling) {
        if sub.value.to_u16_vec()?.iter().any(|v| *v != 1) {
          return Err(TiffError::Unsupported("Subsampled YCbCr data".into()));
        }
      }
    }

    let raster_bits = param.dest_bits.unwrap_or(stored_bits);
    if raster_bits == 0 || raster_bits > 32 || (format == crate::SampleFormat::IEEEFP && raster_bits != 32) {
      return Err(TiffError::IllegalArgument(format!("Destination depth {} not possible", raster_bits)));
    }
    param.subsampling.validate()?;
    let region = param.source_region.unwrap_or(grid.image_rect()).intersect(&grid.image_rect());
    if region.is_empty() {
      return Err(TiffError::IllegalArgument("Source region does not intersect the image".into()));
    }
    let map = RegionMap::new(&region, &param.subsampling, (0, 0));
    let dst = map.forward(&region);
    if dst.is_empty() {
      return Err(TiffError::IllegalArgument("Subsampled region is empty".into()));
    }

    let invert = photometric == PhotometricInterpretation::WhiteIsZero;
    // Bilevel data is inverted on the packed bytes
    let packed_invert = invert && stored_bits == 1 && bands == 1;
    let transform = SampleTransform::new(raster_bits, &vec![stored_bits; bands], format, invert && !packed_invert, param.color_converter.clone());
    let direct = stored_bits == 8 && raster_bits == 8 && transform.is_identity() && param.subsampling.is_identity() && !grid.is_planar();

    let mut raster = Raster::zeroed(dst.width as usize, dst.height as usize, bands, raster_bits, format);
    let offsets = ifd.data_offsets()?;
    let counts = ifd.data_byte_counts()?;
    let spp = grid.samples_per_tile_pixel();
    let mut status = DecodeStatus::Complete;

    let Some((cols, rows)) = grid.tile_range(&region) else {
      return Ok(DecodedImage { raster, status });
    };
    'tiles: for row in rows {
      for col in cols.clone() {
        if self.abort.swap(false, Ordering::SeqCst) {
          warn!("Decoding aborted at tile ({}, {})", col, row);
          status = DecodeStatus::Aborted;
          break 'tiles;
        }
        let tile_rect = grid.tile_rect(col, row);
        let target = map.forward(&tile_rect.intersect(&region));
        if target.is_empty() {
          continue;
        }
        let (ew, _) = grid.encoded_size(row);
        let rb = row_bytes(ew, spp, stored_bits);
        let mut planes = Vec::with_capacity(grid.planes());
        for plane in 0..grid.planes() {
          let mut bytes = self.decode_tile_data(ifd, &grid, &offsets, &counts, grid.index(col, row, plane))?;
          if packed_invert {
            invert_bilevel(&mut bytes);
          }
          planes.push(bytes);
        }
        debug!("Decoded tile ({}, {}) covering {:?}", col, row, target);

        if direct {
          if let RasterData::U8(data) = &mut raster.data {
            let tx = (map.source_x(target.x) - tile_rect.x) as usize;
            let n = target.width as usize * bands;
            for dy in target.y..target.bottom() {
              let ty = (map.source_y(dy) - tile_rect.y) as usize;
              let src = ty * rb + tx * bands;
              let d = ((dy - dst.y) as usize * raster.width + (target.x - dst.x) as usize) * bands;
              data[d..d + n].copy_from_slice(&planes[0][src..src + n]);
            }
          }
          continue;
        }

        let mut samples: Vec<Vec<u32>> = vec![Vec::with_capacity(ew * spp); planes.len()];
        let mut pixel = vec![0_u32; bands];
        for dy in target.y..target.bottom() {
          let ty = (map.source_y(dy) - tile_rect.y) as usize;
          for (plane, bytes) in planes.iter().enumerate() {
            samples[plane].clear();
            unpack_row(&bytes[ty * rb..(ty + 1) * rb], stored_bits, ifd.endian, ew * spp, &mut samples[plane]);
          }
          for dx in target.x..target.right() {
            let tx = (map.source_x(dx) - tile_rect.x) as usize;
            for (b, p) in pixel.iter_mut().enumerate() {
              *p = if grid.is_planar() { samples[b][tx] } else { samples[0][tx * spp + b] };
            }
            transform.to_raster(&mut pixel);
            for (b, p) in pixel.iter().enumerate() {
              raster.set((dx - dst.x) as usize, (dy - dst.y) as usize, b, *p);
            }
          }
        }
      }
    }
    Ok(DecodedImage { raster, status })
  }
}

impl<R: Read + Seek> std::fmt::Debug for TiffReader<R> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("TiffReader")
      .field("endian", &self.endian)
      .field("first_ifd", &self.first_ifd)
      .field("options", &self.options)
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use std::io::Cursor;

  use super::*;
  use crate::{
    CompressionMethod, PhotometricInterpretation,
    pixels::Raster,
    writer::{TiffWriter, WriteParam},
  };

  fn gradient(w: usize, h: usize, bands: usize) -> Raster {
    let data = (0..w * h * bands).map(|i| (i * 3 % 251) as u8).collect();
    Raster::new_u8(w, h, bands, data)
  }

  #[test]
  fn header_is_checked() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let mut bad = Cursor::new(b"XX*\0\x08\0\0\0".to_vec());
    assert!(matches!(read_header(&mut bad), Err(TiffError::FormatMismatch(_))));
    let mut bad_magic = Cursor::new(b"II\x2b\0\x08\0\0\0".to_vec());
    assert!(matches!(read_header(&mut bad_magic), Err(TiffError::FormatMismatch(_))));
    let mut good = Cursor::new(b"MM\0\x2a\0\0\0\x08".to_vec());
    assert_eq!(read_header(&mut good)?, (Endian::Big, 8));
    Ok(())
  }

  #[test]
  fn region_and_subsampling() -> std::result::Result<(), Box<dyn std::error::Error>> {
    crate::init_test_logger();
    let raster = gradient(20, 10, 3);
    let mut buf = Cursor::new(Vec::new());
    let param = WriteParam {
      tile_size: Some((16, 16)),
      compression: CompressionMethod::LZW,
      ..Default::default()
    };
    TiffWriter::new(&mut buf)?.write(None, &raster, &param)?;

    let mut reader = TiffReader::new(&mut buf)?;
    let read = ReadParam {
      source_region: Some(Rect::new(3, 2, 15, 7)),
      subsampling: Subsampling::new(2, 3),
      ..Default::default()
    };
    let img = reader.read_image(0, &read)?;
    assert_eq!(img.status, DecodeStatus::Complete);
    assert_eq!((img.raster.width, img.raster.height), (8, 3));
    for y in 0..3 {
      for x in 0..8 {
        for b in 0..3 {
          assert_eq!(img.raster.get(x, y, b), raster.get(3 + x * 2, 2 + y * 3, b));
        }
      }
    }
    Ok(())
  }

  #[test]
  fn white_is_zero_is_normalized() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let raster = Raster::new_u8(4, 2, 1, vec![0, 50, 100, 255, 1, 2, 3, 4]);
    let mut buf = Cursor::new(Vec::new());
    let param = WriteParam {
      photometric: Some(PhotometricInterpretation::WhiteIsZero),
      ..Default::default()
    };
    TiffWriter::new(&mut buf)?.write(None, &raster, &param)?;
    let mut reader = TiffReader::new(&mut buf)?;
    let ifd = reader.read_ifd(0)?;
    let stored = reader.read_tile(&ifd, 0)?;
    assert_eq!(&stored[..4], &[255, 205, 155, 0]);
    assert_eq!(reader.read_image(0, &ReadParam::default())?.raster, raster);
    Ok(())
  }

  #[test]
  fn rescale_on_read() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let raster = Raster::new_u8(2, 1, 1, vec![0, 255]);
    let mut buf = Cursor::new(Vec::new());
    TiffWriter::new(&mut buf)?.write(None, &raster, &WriteParam::default())?;
    let mut reader = TiffReader::new(&mut buf)?;
    let img = reader.read_image(
      0,
      &ReadParam {
        dest_bits: Some(16),
        ..Default::default()
      },
    )?;
    assert_eq!(img.raster.data, RasterData::U16(vec![0, 65535]));
    Ok(())
  }

  #[test]
  fn abort_between_tiles() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let raster = gradient(32, 32, 1);
    let mut buf = Cursor::new(Vec::new());
    let param = WriteParam {
      tile_size: Some((16, 16)),
      ..Default::default()
    };
    TiffWriter::new(&mut buf)?.write(None, &raster, &param)?;
    let mut reader = TiffReader::new(&mut buf)?;
    reader.abort_handle().store(true, Ordering::SeqCst);
    let img = reader.read_image(0, &ReadParam::default())?;
    assert_eq!(img.status, DecodeStatus::Aborted);
    // The flag is consumed
    assert_eq!(reader.read_image(0, &ReadParam::default())?.status, DecodeStatus::Complete);
    Ok(())
  }

  #[test]
  fn truncated_strip_is_clamped() -> std::result::Result<(), Box<dyn std::error::Error>> {
    crate::init_test_logger();
    let raster = gradient(8, 8, 1);
    let mut buf = Cursor::new(Vec::new());
    TiffWriter::new(&mut buf)?.write(None, &raster, &WriteParam::default())?;
    let mut data = buf.into_inner();
    // Pixel data follows the directory
    data.truncate(data.len() - 10);
    let mut reader = TiffReader::new(Cursor::new(data))?;
    let img = reader.read_image(0, &ReadParam::default())?;
    assert_eq!(img.raster.get(0, 0, 0), raster.get(0, 0, 0));
    assert_eq!(img.raster.get(7, 7, 0), 0);
    Ok(())
  }

  #[test]
  fn chain_loops_are_cut() -> std::result::Result<(), Box<dyn std::error::Error>> {
    // Header and one empty directory pointing to itself
    let data = vec![b'I', b'I', 42, 0, 8, 0, 0, 0, 0, 0, 8, 0, 0, 0];
    let mut reader = TiffReader::new(Cursor::new(data))?;
    assert_eq!(reader.ifd_offsets()?, vec![8]);
    assert!(matches!(reader.read_ifd(1), Err(TiffError::IndexOutOfBounds(_))));
    Ok(())
  }
}
