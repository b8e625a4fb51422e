// SPDX-License-Identifier: MIT
// Copyright 2021 Daniel Vogelbacher <daniel@chaospixel.com>

use std::{
  collections::HashSet,
  io::{Read, Seek, SeekFrom, Write},
  sync::Arc,
};

use byteorder::{BigEndian, LittleEndian, WriteBytesExt};
use log::{debug, info, warn};

use crate::{
  CompressionMethod, FillOrder, HEADER_SIZE, IFD, PhotometricInterpretation, PlanarConfiguration, Predictor, Rational, ResolutionUnit, Result,
  SampleFormat, TIFF_MAGIC, TiffError,
  bits::{Endian, align_word},
  codecs::{CodecConfig, encode_tile, new_compressor, null::NullCodec},
  pixels::{ColorConverter, Raster, RasterData, SampleTransform, pack_row, row_bytes, unpack_row},
  reader::{EndianReader, ReadByteOrder, ReaderOptions, TiffReader, codec_config, read_header},
  tags::{TiffCommonTag, TiffTagEnum},
  tiles::{Rect, RegionMap, Subsampling, TileGrid},
  value::{FieldType, Value},
};

pub trait WriteAndSeek: Write + Seek {}

impl<T> WriteAndSeek for T where T: Write + Seek {}

/// Writer for primitive values in a fixed byte order
pub struct EndianWriter<W: WriteAndSeek> {
  endian: Endian,
  inner: W,
}

impl<W: WriteAndSeek> EndianWriter<W> {
  pub fn new(inner: W, endian: Endian) -> Self {
    Self { endian, inner }
  }

  pub fn endian(&self) -> Endian {
    self.endian
  }

  pub fn into_inner(self) -> W {
    self.inner
  }

  pub fn position(&mut self) -> Result<u64> {
    Ok(self.inner.stream_position()?)
  }

  pub fn goto(&mut self, pos: u64) -> Result<()> {
    self.inner.seek(SeekFrom::Start(pos))?;
    Ok(())
  }

  pub fn pad_word_boundary(&mut self) -> Result<()> {
    let pos = self.position()?;
    if pos % 4 != 0 {
      let padding = [0, 0, 0];
      let padd_len = 4 - (pos % 4);
      self.inner.write_all(&padding[..padd_len as usize])?;
    }
    Ok(())
  }

  pub fn write_all(&mut self, buf: &[u8]) -> Result<()> {
    self.inner.write_all(buf)?;
    Ok(())
  }

  pub fn write_u16(&mut self, value: u16) -> Result<()> {
    match self.endian {
      Endian::Little => self.inner.write_u16::<LittleEndian>(value)?,
      Endian::Big => self.inner.write_u16::<BigEndian>(value)?,
    }
    Ok(())
  }

  pub fn write_u32(&mut self, value: u32) -> Result<()> {
    match self.endian {
      Endian::Little => self.inner.write_u32::<LittleEndian>(value)?,
      Endian::Big => self.inner.write_u32::<BigEndian>(value)?,
    }
    Ok(())
  }

  pub fn write_u64(&mut self, value: u64) -> Result<()> {
    match self.endian {
      Endian::Little => self.inner.write_u64::<LittleEndian>(value)?,
      Endian::Big => self.inner.write_u64::<BigEndian>(value)?,
    }
    Ok(())
  }
}

#[derive(Debug, Clone, Default)]
pub struct WriterOptions {
  /// Byte order of new files. Existing files keep their byte order.
  pub endian: Endian,
}

/// Parameters for encoding an image
#[derive(Debug, Clone)]
pub struct WriteParam {
  pub compression: CompressionMethod,
  pub predictor: Predictor,
  /// Tile width and height, strips are written if None
  pub tile_size: Option<(u32, u32)>,
  /// Rows per strip, a size near 8 KiB per strip if None
  pub rows_per_strip: Option<u32>,
  pub planar: PlanarConfiguration,
  pub fill_order: FillOrder,
  /// T4Options field for Group 3 fax
  pub t4_options: u32,
  /// Every k-th row is coded one-dimensional in T.4 2D mode
  pub t4_k: u32,
  pub jpeg_quality: u8,
  /// Area of the raster to write, the whole raster if None
  pub source_region: Option<Rect>,
  pub subsampling: Subsampling,
  /// Stored bits per sample, the raster depth if None
  pub target_bits: Option<u16>,
  pub photometric: Option<PhotometricInterpretation>,
  /// Converts RGB raster samples to the stored color space
  pub color_converter: Option<Arc<dyn ColorConverter>>,
}

impl Default for WriteParam {
  fn default() -> Self {
    Self {
      compression: CompressionMethod::None,
      predictor: Predictor::None,
      tile_size: None,
      rows_per_strip: None,
      planar: PlanarConfiguration::Chunky,
      fill_order: FillOrder::MsbFirst,
      t4_options: 0,
      t4_k: crate::codecs::fax::DEFAULT_K,
      jpeg_quality: 90,
      source_region: None,
      subsampling: Subsampling::default(),
      target_bits: None,
      photometric: None,
      color_converter: None,
    }
  }
}

/// Parameters for replacing pixels of an existing image
#[derive(Debug, Clone, Default)]
pub struct ReplaceParam {
  /// Area of the raster to use, the whole raster if None
  pub source_region: Option<Rect>,
  pub subsampling: Subsampling,
  /// Position of the first subsampled pixel in the image
  pub dest_offset: (i64, i64),
}

/// Shape of an image reserved without pixel data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSpec {
  pub width: usize,
  pub height: usize,
  pub bands: usize,
  pub bits: u16,
  pub sample_format: SampleFormat,
}

impl ImageSpec {
  pub fn new(width: usize, height: usize, bands: usize, bits: u16) -> Self {
    Self {
      width,
      height,
      bands,
      bits,
      sample_format: SampleFormat::Uint,
    }
  }
}

impl From<&Raster> for ImageSpec {
  fn from(raster: &Raster) -> Self {
    Self {
      width: raster.width,
      height: raster.height,
      bands: raster.bands,
      bits: raster.bits,
      sample_format: raster.sample_format(),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EmptyState {
  Writing,
  Inserting,
}

#[derive(Debug)]
struct ReplaceState {
  ifd: IFD,
  grid: TileGrid,
  region: Rect,
  offsets: Vec<u32>,
  counts: Vec<u32>,
}

/// Fields computed by the writer, never taken from a template directory
const LAYOUT_TAGS: [TiffCommonTag; 22] = [
  TiffCommonTag::ImageWidth,
  TiffCommonTag::ImageLength,
  TiffCommonTag::BitsPerSample,
  TiffCommonTag::Compression,
  TiffCommonTag::PhotometricInterpretation,
  TiffCommonTag::FillOrder,
  TiffCommonTag::StripOffsets,
  TiffCommonTag::SamplesPerPixel,
  TiffCommonTag::RowsPerStrip,
  TiffCommonTag::StripByteCounts,
  TiffCommonTag::PlanarConfiguration,
  TiffCommonTag::T4Options,
  TiffCommonTag::T6Options,
  TiffCommonTag::Predictor,
  TiffCommonTag::TileWidth,
  TiffCommonTag::TileLength,
  TiffCommonTag::TileOffsets,
  TiffCommonTag::TileByteCounts,
  TiffCommonTag::ExtraSamples,
  TiffCommonTag::SampleFormat,
  TiffCommonTag::JPEGTables,
  TiffCommonTag::YCbCrSubSampling,
];

/// Everything needed to encode the strips or tiles of one image
struct ImagePlan {
  ifd: IFD,
  grid: TileGrid,
  map: RegionMap,
  transform: SampleTransform,
  bits: u16,
  /// 8 bit chunky rows can be copied from the raster
  direct: bool,
}

fn is_fax(compression: CompressionMethod) -> bool {
  matches!(compression, CompressionMethod::Huffman | CompressionMethod::Fax3 | CompressionMethod::Fax4)
}

/// Nearest multiple of 16, at least 16
fn round_tile_dim(v: u32) -> u32 {
  ((v + 8) / 16 * 16).max(16)
}

fn default_rows_per_strip(width: usize, samples: usize, bits: u16) -> usize {
  let bytes_per_row = row_bytes(width, samples, bits).max(1);
  (8192 / bytes_per_row).max(1).max(8)
}

fn offsets_tags(tiled: bool) -> (TiffCommonTag, TiffCommonTag) {
  if tiled {
    (TiffCommonTag::TileOffsets, TiffCommonTag::TileByteCounts)
  } else {
    (TiffCommonTag::StripOffsets, TiffCommonTag::StripByteCounts)
  }
}

fn field_type_of(ifd: &IFD, tag: TiffCommonTag) -> FieldType {
  ifd.get_entry(tag).map(|e| e.value.field_type()).unwrap_or(FieldType::Long)
}

/// Overwrite element `index` of an offsets or byte counts array at `base`
fn patch_slot<W: WriteAndSeek>(w: &mut EndianWriter<W>, base: u64, typ: FieldType, index: usize, value: u64) -> Result<()> {
  if typ == FieldType::Short {
    w.goto(base + 2 * index as u64)?;
    w.write_u16(u16::try_from(value)?)
  } else {
    w.goto(base + 4 * index as u64)?;
    w.write_u32(u32::try_from(value)?)
  }
}

/// Stream writer for single images, sequences, insertion into existing
/// files, empty image reservation and in-place pixel replacement.
///
/// `next_space` is the first free byte of the stream. New directories
/// and strip data are always appended there, existing data is only
/// touched by backpatching offsets and links.
pub struct TiffWriter<S: Read + Write + Seek> {
  stream: S,
  endian: Endian,
  next_space: u64,
  /// Position of the next IFD link of the last directory in the sequence
  sequence: Option<u64>,
  empty: Option<EmptyState>,
  replace: Option<ReplaceState>,
}

impl<S: Read + Write + Seek> TiffWriter<S> {
  pub fn new(stream: S) -> Result<Self> {
    Self::with_options(stream, WriterOptions::default())
  }

  /// Writer for `stream`. If the stream already holds a TIFF file,
  /// its byte order is used and new data goes behind its end.
  pub fn with_options(mut stream: S, options: WriterOptions) -> Result<Self> {
    let len = stream.seek(SeekFrom::End(0))?;
    let mut endian = options.endian;
    if len >= HEADER_SIZE {
      if let Ok((file_endian, _)) = read_header(&mut stream) {
        if file_endian != endian {
          info!("Existing file is {:?} endian, ignoring requested byte order", file_endian);
        }
        endian = file_endian;
      }
    }
    Ok(Self {
      stream,
      endian,
      next_space: len,
      sequence: None,
      empty: None,
      replace: None,
    })
  }

  pub fn endian(&self) -> Endian {
    self.endian
  }

  /// First free byte of the stream
  pub fn next_space(&self) -> u64 {
    self.next_space
  }

  pub fn into_inner(self) -> S {
    self.stream
  }

  fn write_header(&mut self) -> Result<()> {
    let mut w = EndianWriter::new(&mut self.stream, self.endian);
    w.goto(0)?;
    w.write_all(&self.endian.marker())?;
    w.write_u16(TIFF_MAGIC)?;
    w.write_u32(0)?;
    self.next_space = HEADER_SIZE;
    Ok(())
  }

  fn check_no_empty(&self) -> Result<()> {
    match self.empty {
      Some(EmptyState::Writing) => Err(TiffError::IllegalState(
        "Previous call to prepare_write_empty() without corresponding call to end_write_empty()".into(),
      )),
      Some(EmptyState::Inserting) => Err(TiffError::IllegalState(
        "Previous call to prepare_insert_empty() without corresponding call to end_insert_empty()".into(),
      )),
      None => Ok(()),
    }
  }

  fn check_no_replace(&self) -> Result<()> {
    if self.replace.is_some() {
      return Err(TiffError::IllegalState(
        "Previous call to prepare_replace_pixels() without corresponding call to end_replace_pixels()".into(),
      ));
    }
    Ok(())
  }

  /// Keep the sequence link on the tail of the chain after an insertion
  fn track_tail(&mut self, ifd: &IFD) {
    if self.sequence.is_some() && ifd.next_ifd == 0 {
      self.sequence = Some(ifd.bookmarks.next_ifd_pos);
    }
  }

  /// Write a complete file holding a single image. The optional
  /// directory contributes all fields not describing the pixel layout.
  pub fn write(&mut self, ifd: Option<&IFD>, raster: &Raster, param: &WriteParam) -> Result<IFD> {
    self.check_no_empty()?;
    self.check_no_replace()?;
    if self.sequence.is_some() {
      return Err(TiffError::IllegalState("Single image write inside a sequence".into()));
    }
    let plan = self.plan_image(ifd, &ImageSpec::from(raster), Some(raster), param)?;
    self.write_header()?;
    self.write_image(plan, Some(raster), param, 4, 0)
  }

  pub fn prepare_write_sequence(&mut self) -> Result<()> {
    if self.sequence.is_some() {
      return Err(TiffError::IllegalState("Sequence already in progress".into()));
    }
    self.check_no_empty()?;
    self.check_no_replace()?;
    self.write_header()?;
    self.sequence = Some(4);
    Ok(())
  }

  /// Append an image to the sequence
  pub fn write_to_sequence(&mut self, ifd: Option<&IFD>, raster: &Raster, param: &WriteParam) -> Result<IFD> {
    let Some(link_pos) = self.sequence else {
      return Err(TiffError::IllegalState("prepare_write_sequence() has not been called".into()));
    };
    self.check_no_empty()?;
    self.check_no_replace()?;
    let plan = self.plan_image(ifd, &ImageSpec::from(raster), Some(raster), param)?;
    self.next_space = align_word(self.next_space.max(link_pos + 4));
    let ifd = self.write_image(plan, Some(raster), param, link_pos, 0)?;
    self.sequence = Some(ifd.bookmarks.next_ifd_pos);
    Ok(ifd)
  }

  pub fn end_write_sequence(&mut self) -> Result<()> {
    if self.sequence.is_none() {
      return Err(TiffError::IllegalState("prepare_write_sequence() has not been called".into()));
    }
    self.sequence = None;
    Ok(())
  }

  /// Insert an image so it becomes image `index` of the file,
  /// -1 appends it at the end of the chain.
  pub fn insert(&mut self, index: i64, ifd: Option<&IFD>, raster: &Raster, param: &WriteParam) -> Result<IFD> {
    self.check_no_empty()?;
    self.check_no_replace()?;
    let plan = self.plan_image(ifd, &ImageSpec::from(raster), Some(raster), param)?;
    let (link_pos, next) = self.locate_ifd(index)?;
    self.next_space = align_word(self.next_space.max(link_pos + 4));
    let ifd = self.write_image(plan, Some(raster), param, link_pos, next)?;
    self.track_tail(&ifd);
    Ok(ifd)
  }

  pub fn can_insert_image(&mut self, index: i64) -> Result<bool> {
    match self.locate_ifd(index) {
      Ok(_) => Ok(true),
      Err(TiffError::IndexOutOfBounds(_)) => Ok(false),
      Err(err) => Err(err),
    }
  }

  /// Find the link a directory inserted at `index` has to be hooked into.
  /// Returns the stream position of that link and its current value,
  /// which becomes the next pointer of the inserted directory.
  pub fn locate_ifd(&mut self, index: i64) -> Result<(u64, u32)> {
    if index < -1 {
      return Err(TiffError::IndexOutOfBounds(format!("Image index {} < -1", index)));
    }
    let (endian, first) = read_header(&mut self.stream)?;
    self.endian = endian;
    let mut link_pos = 4;
    let mut next = first;
    if next == 0 {
      if index > 0 {
        return Err(TiffError::IndexOutOfBounds(format!("Image index {} but file holds no image", index)));
      }
      return Ok((link_pos, next));
    }

    let mut reader = EndianReader::new(&mut self.stream, endian);
    let mut seen = HashSet::new();
    let mut i = 0;
    while index == -1 || i < index {
      if !seen.insert(next) {
        return Err(TiffError::General(format!("Directory chain loops back to {}", next)));
      }
      reader.goto(next)?;
      let count = match reader.read_u16() {
        Ok(count) => count,
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
          warn!("Directory at {} is beyond end of stream, replacing the link", next);
          return Ok((link_pos, 0));
        }
        Err(err) => return Err(err.into()),
      };
      link_pos = next as u64 + 2 + count as u64 * crate::ENTRY_SIZE;
      reader.goto(u32::try_from(link_pos)?)?;
      next = match reader.read_u32() {
        Ok(next) => next,
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
          warn!("Missing next IFD pointer at {}, assume end of chain", link_pos);
          0
        }
        Err(err) => return Err(err.into()),
      };
      if next == 0 {
        if index != -1 && i < index - 1 {
          return Err(TiffError::IndexOutOfBounds(format!("Image index {} is beyond the end of the chain", index)));
        }
        break;
      }
      i += 1;
    }
    Ok((link_pos, next))
  }

  /// Write a new file with a single image directory whose strips or
  /// tiles are empty. Pixels are filled in by pixel replacement.
  pub fn prepare_write_empty(&mut self, ifd: Option<&IFD>, spec: &ImageSpec, param: &WriteParam) -> Result<IFD> {
    self.check_no_empty()?;
    self.check_no_replace()?;
    if self.sequence.is_some() {
      return Err(TiffError::IllegalState("Empty image write inside a sequence".into()));
    }
    let plan = self.plan_image(ifd, spec, None, param)?;
    self.write_header()?;
    let ifd = self.write_image(plan, None, param, 4, 0)?;
    self.empty = Some(EmptyState::Writing);
    Ok(ifd)
  }

  pub fn end_write_empty(&mut self) -> Result<()> {
    match self.empty {
      Some(EmptyState::Writing) => {}
      Some(EmptyState::Inserting) => {
        return Err(TiffError::IllegalState(
          "Previous call to prepare_insert_empty() without corresponding call to end_insert_empty()".into(),
        ));
      }
      None => return Err(TiffError::IllegalState("No previous call to prepare_write_empty()".into())),
    }
    if self.replace.is_some() {
      return Err(TiffError::IllegalState("Pixel replacement still in progress".into()));
    }
    self.empty = None;
    Ok(())
  }

  /// Insert an image directory with empty strips or tiles at `index`
  pub fn prepare_insert_empty(&mut self, index: i64, ifd: Option<&IFD>, spec: &ImageSpec, param: &WriteParam) -> Result<IFD> {
    self.check_no_empty()?;
    self.check_no_replace()?;
    let plan = self.plan_image(ifd, spec, None, param)?;
    let (link_pos, next) = self.locate_ifd(index)?;
    self.next_space = align_word(self.next_space.max(link_pos + 4));
    let ifd = self.write_image(plan, None, param, link_pos, next)?;
    self.track_tail(&ifd);
    self.empty = Some(EmptyState::Inserting);
    Ok(ifd)
  }

  pub fn end_insert_empty(&mut self) -> Result<()> {
    match self.empty {
      Some(EmptyState::Inserting) => {}
      Some(EmptyState::Writing) => {
        return Err(TiffError::IllegalState(
          "Previous call to prepare_write_empty() without corresponding call to end_write_empty()".into(),
        ));
      }
      None => return Err(TiffError::IllegalState("No previous call to prepare_insert_empty()".into())),
    }
    if self.replace.is_some() {
      return Err(TiffError::IllegalState("Pixel replacement still in progress".into()));
    }
    self.empty = None;
    Ok(())
  }

  /// Validate parameters and build the directory, no I/O happens here
  fn plan_image(&self, template: Option<&IFD>, spec: &ImageSpec, source: Option<&Raster>, param: &WriteParam) -> Result<ImagePlan> {
    let (width, height, map) = match source {
      Some(raster) => {
        raster.validate()?;
        param.subsampling.validate()?;
        let region = param.source_region.unwrap_or(raster.rect()).intersect(&raster.rect());
        if region.is_empty() {
          return Err(TiffError::IllegalArgument("Source region does not intersect the raster".into()));
        }
        let map = RegionMap::new(&region, &param.subsampling, (0, 0));
        let dst = map.forward(&region);
        if dst.is_empty() {
          return Err(TiffError::IllegalArgument("Subsampled source region is empty".into()));
        }
        (dst.width as usize, dst.height as usize, map)
      }
      None => {
        if spec.width == 0 || spec.height == 0 || spec.bands == 0 {
          return Err(TiffError::IllegalArgument(format!(
            "Invalid image {}x{} with {} bands",
            spec.width, spec.height, spec.bands
          )));
        }
        (spec.width, spec.height, RegionMap::identity())
      }
    };

    let bands = spec.bands;
    let format = spec.sample_format;
    let float = format == SampleFormat::IEEEFP;
    let bits = param.target_bits.unwrap_or(spec.bits);
    if bits == 0 || bits > 32 || (float && bits != 32) {
      return Err(TiffError::IllegalArgument(format!("Invalid target depth {} for {:?} samples", bits, format)));
    }
    let compression = param.compression;
    match compression {
      c if is_fax(c) && (bands != 1 || bits != 1) => {
        return Err(TiffError::IllegalArgument(format!(
          "{:?} needs bilevel data, got {} bands of {} bits",
          c, bands, bits
        )));
      }
      CompressionMethod::ModernJPEG if bits != 8 || !(bands == 1 || bands == 3) => {
        return Err(TiffError::IllegalArgument("JPEG needs 8 bit gray or RGB data".into()));
      }
      CompressionMethod::JPEG => {
        return Err(TiffError::Unsupported("Old-style JPEG compression".into()));
      }
      _ => {}
    }
    if param.predictor == Predictor::Horizontal
      && (bits != 8 || !matches!(compression, CompressionMethod::LZW | CompressionMethod::Deflate | CompressionMethod::OldDeflate))
    {
      return Err(TiffError::IllegalArgument(format!(
        "Horizontal predictor needs 8 bit samples and LZW or Deflate, got {} bits with {:?}",
        bits, compression
      )));
    }

    let photometric = match (param.photometric, &param.color_converter) {
      (Some(p), _) => p,
      (None, Some(conv)) if bands >= 3 => conv.photometric(),
      _ if is_fax(compression) => PhotometricInterpretation::WhiteIsZero,
      _ if bands >= 3 => PhotometricInterpretation::RGB,
      _ => PhotometricInterpretation::BlackIsZero,
    };
    let invert = photometric == PhotometricInterpretation::WhiteIsZero;
    let converter = if bands >= 3 { param.color_converter.clone() } else { None };
    let transform = SampleTransform::new(spec.bits, &vec![bits; bands], format, invert, converter);

    let planar = if bands > 1 { param.planar } else { PlanarConfiguration::Chunky };
    let grid = match param.tile_size {
      Some((tw, th)) => {
        let (rtw, rth) = (round_tile_dim(tw), round_tile_dim(th));
        if (rtw, rth) != (tw, th) {
          warn!("Tile size {}x{} is not a multiple of 16, using {}x{}", tw, th, rtw, rth);
        }
        TileGrid::new_tiles(width, height, rtw as usize, rth as usize, planar, bands)?
      }
      None => {
        let samples = if planar == PlanarConfiguration::Planar { 1 } else { bands };
        let rows = match param.rows_per_strip {
          Some(rows) => rows as usize,
          None => default_rows_per_strip(width, samples, bits),
        };
        TileGrid::new_strips(width, height, rows, planar, bands)?
      }
    };

    let mut ifd = match template {
      Some(t) => t.shallow_clone(),
      None => IFD::default(),
    };
    for tag in LAYOUT_TAGS {
      ifd.remove_tag(tag);
    }
    ifd.endian = self.endian;
    ifd.add_tag(TiffCommonTag::ImageWidth, u32::try_from(width)?);
    ifd.add_tag(TiffCommonTag::ImageLength, u32::try_from(height)?);
    ifd.add_tag(TiffCommonTag::BitsPerSample, vec![bits; bands]);
    ifd.add_tag(TiffCommonTag::Compression, compression);
    ifd.add_tag(TiffCommonTag::PhotometricInterpretation, photometric);
    ifd.add_tag(TiffCommonTag::SamplesPerPixel, u16::try_from(bands)?);
    if bands > 1 {
      ifd.add_tag(TiffCommonTag::PlanarConfiguration, planar);
    }
    if param.fill_order != FillOrder::MsbFirst {
      ifd.add_tag(TiffCommonTag::FillOrder, param.fill_order);
    }
    if param.predictor != Predictor::None {
      ifd.add_tag(TiffCommonTag::Predictor, param.predictor);
    }
    if format != SampleFormat::Uint {
      ifd.add_tag(TiffCommonTag::SampleFormat, vec![u16::from(format); bands]);
    }
    match compression {
      CompressionMethod::Fax3 => ifd.add_tag(TiffCommonTag::T4Options, param.t4_options),
      CompressionMethod::Fax4 => ifd.add_tag(TiffCommonTag::T6Options, 0_u32),
      _ => {}
    }
    let color_bands = match photometric {
      PhotometricInterpretation::RGB | PhotometricInterpretation::YCbCr | PhotometricInterpretation::CIELab => 3,
      PhotometricInterpretation::CMYK => 4,
      _ => 1,
    };
    if bands > color_bands {
      ifd.add_tag(TiffCommonTag::ExtraSamples, vec![0_u16; bands - color_bands]);
    }
    if photometric == PhotometricInterpretation::YCbCr && compression != CompressionMethod::ModernJPEG {
      ifd.add_tag(TiffCommonTag::YCbCrSubSampling, [1_u16, 1]);
    }
    if !ifd.has_entry(TiffCommonTag::XResolution) {
      ifd.add_tag(TiffCommonTag::XResolution, Rational::new(72, 1));
      ifd.add_tag(TiffCommonTag::YResolution, Rational::new(72, 1));
      ifd.add_tag(TiffCommonTag::ResolutionUnit, ResolutionUnit::Inch);
    }
    let count = grid.tile_count();
    let (offsets_tag, counts_tag) = offsets_tags(grid.tiled);
    if grid.tiled {
      ifd.add_tag(TiffCommonTag::TileWidth, u32::try_from(grid.tile_width)?);
      ifd.add_tag(TiffCommonTag::TileLength, u32::try_from(grid.tile_height)?);
    } else {
      ifd.add_tag(TiffCommonTag::RowsPerStrip, u32::try_from(grid.tile_height)?);
    }
    ifd.add_tag(offsets_tag, vec![0_u32; count]);
    ifd.add_tag(counts_tag, vec![0_u32; count]);

    let direct = bits == 8
      && spec.bits == 8
      && transform.is_identity()
      && !grid.is_planar()
      && param.subsampling.x_period == 1
      && param.subsampling.y_period == 1;
    Ok(ImagePlan {
      ifd,
      grid,
      map,
      transform,
      bits,
      direct,
    })
  }

  /// Write the directory of `plan` at the next free word, link it from
  /// `link_pos` and continue the chain with `next`. Strip data follows
  /// the directory unless `raster` is None.
  fn write_image(&mut self, mut plan: ImagePlan, raster: Option<&Raster>, param: &WriteParam, link_pos: u64, next: u32) -> Result<IFD> {
    let mut ifd = std::mem::take(&mut plan.ifd);
    let pos = align_word(self.next_space);
    let mut w = EndianWriter::new(&mut self.stream, self.endian);
    w.goto(self.next_space)?;
    w.write_all(&[0; 3][..(pos - self.next_space) as usize])?;
    ifd.write_to_stream(&mut w)?;
    w.goto(ifd.bookmarks.next_ifd_pos)?;
    w.write_u32(next)?;
    ifd.next_ifd = next;
    self.next_space = ifd.bookmarks.last_position;
    debug!("Wrote IFD with {} entries at {}, next IFD {}", ifd.entry_count(), pos, next);

    if let Some(raster) = raster {
      self.write_tiles(&mut ifd, &plan, raster, param)?;
    }

    // Link last, so a failed write leaves a valid chain behind
    let mut w = EndianWriter::new(&mut self.stream, self.endian);
    w.goto(link_pos)?;
    w.write_u32(u32::try_from(pos)?)?;
    Ok(ifd)
  }

  fn write_tiles(&mut self, ifd: &mut IFD, plan: &ImagePlan, raster: &Raster, param: &WriteParam) -> Result<()> {
    let grid = &plan.grid;
    let (offsets_tag, counts_tag) = offsets_tags(grid.tiled);
    let (Some(offsets_pos), Some(counts_pos)) = (ifd.bookmarks.offsets_pos, ifd.bookmarks.byte_counts_pos) else {
      return Err(TiffError::General("Directory was written without data offsets".into()));
    };
    let offsets_type = field_type_of(ifd, offsets_tag);
    let counts_type = field_type_of(ifd, counts_tag);

    let mut codec = new_compressor(param.compression)?;
    let mut offsets = vec![0_u32; grid.tile_count()];
    let mut counts = vec![0_u32; grid.tile_count()];
    for index in 0..grid.tile_count() {
      let (col, row, plane) = grid.position(index);
      let cfg = CodecConfig {
        t4_k: param.t4_k,
        jpeg_quality: param.jpeg_quality,
        ..codec_config(ifd, grid, row, plane)?
      };
      let buf = pack_tile(raster, plan, col, row, plane, self.endian);
      let data = encode_tile(codec.as_mut(), &cfg, &buf, cfg.row_bytes())?;

      let pos = self.next_space;
      let mut w = EndianWriter::new(&mut self.stream, self.endian);
      w.goto(pos)?;
      w.write_all(&data)?;
      patch_slot(&mut w, offsets_pos, offsets_type, index, pos)?;
      patch_slot(&mut w, counts_pos, counts_type, index, data.len() as u64)?;
      self.next_space = pos + data.len() as u64;
      offsets[index] = u32::try_from(pos)?;
      counts[index] = u32::try_from(data.len())?;
      debug!("Tile {} ({}, {}, plane {}): {} bytes at {}", index, col, row, plane, data.len(), pos);
    }
    ifd.add_tag(offsets_tag, offsets);
    ifd.add_tag(counts_tag, counts);
    Ok(())
  }

  /// Check whether pixels of image `index` can be replaced
  pub fn can_replace_pixels(&mut self, index: usize) -> Result<bool> {
    let ifd = self.read_ifd(index)?;
    Ok(ifd.compression()? == CompressionMethod::None)
  }

  fn read_ifd(&mut self, index: usize) -> Result<IFD> {
    let options = ReaderOptions {
      ignore_unknown: true,
      ..Default::default()
    };
    TiffReader::with_options(&mut self.stream, options)?.read_ifd(index)
  }

  /// Start replacing pixels of image `index` inside `region`.
  /// Only uncompressed images can be updated in place.
  pub fn prepare_replace_pixels(&mut self, index: usize, region: &Rect) -> Result<()> {
    if self.replace.is_some() {
      return Err(TiffError::IllegalState("Nested call to prepare_replace_pixels()".into()));
    }
    if region.width < 1 || region.height < 1 {
      return Err(TiffError::IllegalArgument(format!("Empty replacement region {:?}", region)));
    }
    let ifd = self.read_ifd(index)?;
    let compression = ifd.compression()?;
    if compression != CompressionMethod::None {
      return Err(TiffError::Unsupported(format!("Pixel replacement in {:?} compressed image", compression)));
    }
    let grid = TileGrid::from_ifd(&ifd)?;
    let region = region.intersect(&grid.image_rect());
    if region.is_empty() {
      return Err(TiffError::IllegalArgument("Region does not intersect image bounds".into()));
    }
    let offsets = ifd.data_offsets()?;
    let counts = ifd.data_byte_counts()?;
    grid.check_count(offsets.len())?;
    grid.check_count(counts.len())?;
    if ifd.bookmarks.offsets_pos.is_none() || ifd.bookmarks.byte_counts_pos.is_none() {
      return Err(TiffError::General("Data offsets of image not found".into()));
    }
    self.endian = ifd.endian;
    debug!("Prepare pixel replacement in image {}, region {:?}", index, region);
    self.replace = Some(ReplaceState {
      ifd,
      grid,
      region,
      offsets,
      counts,
    });
    Ok(())
  }

  /// Merge `raster` into the prepared image. Tiles never written before
  /// are appended, written tiles are overwritten in place.
  pub fn replace_pixels(&mut self, raster: &Raster, param: &ReplaceParam) -> Result<()> {
    let Some(mut state) = self.replace.take() else {
      return Err(TiffError::IllegalState("No previous call to prepare_replace_pixels()".into()));
    };
    let result = self.replace_in(&mut state, raster, param);
    self.replace = Some(state);
    result
  }

  fn replace_in(&mut self, state: &mut ReplaceState, raster: &Raster, param: &ReplaceParam) -> Result<()> {
    let ReplaceState {
      ifd,
      grid,
      region,
      offsets,
      counts,
    } = state;
    raster.validate()?;
    param.subsampling.validate()?;
    if raster.bands != grid.bands {
      return Err(TiffError::IllegalArgument(format!("Raster has {} bands, image has {}", raster.bands, grid.bands)));
    }
    let src = param.source_region.unwrap_or(raster.rect()).intersect(&raster.rect());
    if src.is_empty() {
      return Err(TiffError::IllegalArgument("Source region does not intersect the raster".into()));
    }
    let map = RegionMap::new(&src, &param.subsampling, param.dest_offset);
    let dst = map.forward(&src).intersect(region);
    if dst.is_empty() {
      return Err(TiffError::IllegalArgument("Destination does not intersect the replacement region".into()));
    }

    let bits = ifd.bits_per_sample()?;
    if bits.iter().any(|b| *b != bits[0]) {
      return Err(TiffError::Unsupported(format!("BitsPerSample {:?}", bits)));
    }
    let stored = bits[0];
    let format = ifd.sample_format()?;
    if (format == SampleFormat::IEEEFP) != (raster.sample_format() == SampleFormat::IEEEFP) {
      return Err(TiffError::IllegalArgument("Raster and image sample formats differ".into()));
    }
    let invert = ifd.photometric()? == Some(PhotometricInterpretation::WhiteIsZero);
    let transform = SampleTransform::new(raster.bits, &bits, format, invert, None);
    let endian = ifd.endian;
    let (offsets_tag, counts_tag) = offsets_tags(grid.tiled);
    let offsets_type = field_type_of(ifd, offsets_tag);
    let counts_type = field_type_of(ifd, counts_tag);
    let (Some(offsets_pos), Some(counts_pos)) = (ifd.bookmarks.offsets_pos, ifd.bookmarks.byte_counts_pos) else {
      return Err(TiffError::General("Data offsets of image not found".into()));
    };

    let Some((cols, rows)) = grid.tile_range(&dst) else {
      return Ok(());
    };
    let spp = grid.samples_per_tile_pixel();
    let mut pixel = vec![0_u32; raster.bands];
    let mut samples = Vec::new();
    let mut packed = Vec::new();
    for row in rows {
      for col in cols.clone() {
        let tile_rect = grid.tile_rect(col, row);
        let target = tile_rect.intersect(&dst);
        if target.is_empty() {
          continue;
        }
        let (ew, _) = grid.encoded_size(row);
        for plane in 0..grid.planes() {
          let index = grid.index(col, row, plane);
          let cfg = codec_config(ifd, grid, row, plane)?;
          let rb = cfg.row_bytes();
          let empty = counts[index] == 0;
          let mut buf = if empty {
            vec![0; cfg.tile_bytes()]
          } else {
            TiffReader::new(&mut self.stream)?.decode_tile_data(ifd, grid, offsets, counts, index)?
          };

          for dy in target.y..target.bottom() {
            let ty = (dy - tile_rect.y) as usize;
            let sy = map.source_y(dy) as usize;
            samples.clear();
            unpack_row(&buf[ty * rb..(ty + 1) * rb], stored, endian, ew * spp, &mut samples);
            for dx in target.x..target.right() {
              let tx = (dx - tile_rect.x) as usize;
              let sx = map.source_x(dx) as usize;
              for (b, p) in pixel.iter_mut().enumerate() {
                *p = raster.get(sx, sy, b);
              }
              transform.to_stored(&mut pixel);
              if grid.is_planar() {
                samples[tx] = pixel[plane];
              } else {
                samples[tx * spp..(tx + 1) * spp].copy_from_slice(&pixel);
              }
            }
            packed.clear();
            pack_row(&samples, stored, endian, &mut packed);
            buf[ty * rb..(ty + 1) * rb].copy_from_slice(&packed[..rb]);
          }

          let data = encode_tile(&mut NullCodec, &cfg, &buf, rb)?;
          let mut w = EndianWriter::new(&mut self.stream, endian);
          if empty {
            let pos = self.next_space;
            w.goto(pos)?;
            w.write_all(&data)?;
            patch_slot(&mut w, offsets_pos, offsets_type, index, pos)?;
            patch_slot(&mut w, counts_pos, counts_type, index, data.len() as u64)?;
            self.next_space = pos + data.len() as u64;
            offsets[index] = u32::try_from(pos)?;
            counts[index] = u32::try_from(data.len())?;
            debug!("Filled empty tile {} with {} bytes at {}", index, data.len(), pos);
          } else {
            if data.len() as u64 != counts[index] as u64 {
              return Err(TiffError::General(format!(
                "Tile {} holds {} bytes, replacement needs {}",
                index,
                counts[index],
                data.len()
              )));
            }
            w.goto(offsets[index] as u64)?;
            w.write_all(&data)?;
            debug!("Overwrote tile {} at {}", index, offsets[index]);
          }
        }
      }
    }
    Ok(())
  }

  pub fn end_replace_pixels(&mut self) -> Result<()> {
    if self.replace.take().is_none() {
      return Err(TiffError::IllegalState("No previous call to prepare_replace_pixels()".into()));
    }
    Ok(())
  }

  /// Prepare pixel replacement for the lifetime of the returned session
  pub fn replace_session(&mut self, index: usize, region: &Rect) -> Result<ReplaceSession<'_, S>> {
    self.prepare_replace_pixels(index, region)?;
    Ok(ReplaceSession { writer: self })
  }

  /// Replace the value of an existing field of image `index` in place.
  /// Values that fit the entry stay inline, larger values reuse the old
  /// data area if possible and are appended to the stream otherwise.
  pub fn overwrite_ifd_value<T: TiffTagEnum, V: Into<Value>>(&mut self, index: usize, tag: T, value: V) -> Result<()> {
    let value = value.into();
    if value.is_ifd() {
      return Err(TiffError::IllegalArgument("Nested directories can't be overwritten".into()));
    }
    let tag: u16 = tag.into();
    let (endian, _) = read_header(&mut self.stream)?;
    let offsets = TiffReader::new(&mut self.stream)?.ifd_offsets()?;
    let ifd_offset = *offsets
      .get(index)
      .ok_or_else(|| TiffError::IndexOutOfBounds(format!("Image {} requested, file has {}", index, offsets.len())))?;
    let stream_len = self.stream.seek(SeekFrom::End(0))?;

    let mut reader = EndianReader::new(&mut self.stream, endian);
    reader.goto(ifd_offset)?;
    let count = reader.read_u16()?;
    let mut found = None;
    for i in 0..count as u64 {
      let entry_pos = ifd_offset as u64 + 2 + i * crate::ENTRY_SIZE;
      reader.goto(u32::try_from(entry_pos)?)?;
      if reader.read_u16()? == tag {
        let typ = reader.read_u16()?;
        let cnt = reader.read_u32()?;
        let old_offset = reader.read_u32()?;
        found = Some((entry_pos, typ, cnt, old_offset));
        break;
      }
    }
    let Some((entry_pos, old_type, old_count, old_offset)) = found else {
      return Err(TiffError::IllegalArgument(format!("Tag {} not present in image {}", tag, index)));
    };
    let old_size = old_count as u64 * FieldType::from_code_lossy(old_type).size() as u64;
    let new_size = value.byte_size() as u64;

    let mut w = EndianWriter::new(&mut self.stream, endian);
    w.goto(entry_pos + 2)?;
    w.write_u16(value.value_type())?;
    w.write_u32(u32::try_from(value.count())?)?;
    if new_size <= 4 {
      value.write(&mut w)?;
      w.write_all(&[0; 4][..(4 - new_size) as usize])?;
    } else {
      let reuse = old_size > 4 && (new_size <= old_size || old_offset as u64 + old_size == stream_len);
      let dest = if reuse { old_offset as u64 } else { align_word(stream_len) };
      w.write_u32(u32::try_from(dest)?)?;
      if reuse {
        w.goto(dest)?;
      } else {
        if old_size > 4 {
          debug!("Old value of tag {} at {} is orphaned", tag, old_offset);
        }
        w.goto(stream_len)?;
        w.pad_word_boundary()?;
      }
      value.write(&mut w)?;
    }
    let end = w.position()?;
    self.next_space = self.next_space.max(end);
    debug!("Overwrote tag {} of image {}", tag, index);
    Ok(())
  }

  /// Replace the ImageDescription of the first image
  pub fn overwrite_comment(&mut self, comment: &str) -> Result<()> {
    self.overwrite_ifd_value(0, TiffCommonTag::ImageDescription, comment)
  }
}

/// Exclusive pixel replacement on one image. The replacement state is
/// cleared when the session is finished or dropped.
pub struct ReplaceSession<'a, S: Read + Write + Seek> {
  writer: &'a mut TiffWriter<S>,
}

impl<S: Read + Write + Seek> ReplaceSession<'_, S> {
  pub fn replace(&mut self, raster: &Raster, param: &ReplaceParam) -> Result<()> {
    self.writer.replace_pixels(raster, param)
  }

  pub fn finish(self) -> Result<()> {
    self.writer.end_replace_pixels()
  }
}

impl<S: Read + Write + Seek> Drop for ReplaceSession<'_, S> {
  fn drop(&mut self) {
    self.writer.replace = None;
  }
}

/// Uncompressed buffer of one strip or tile, rows padded to full bytes.
/// Pixels outside the image stay zero.
fn pack_tile(raster: &Raster, plan: &ImagePlan, col: usize, row: usize, plane: usize, endian: Endian) -> Vec<u8> {
  let grid = &plan.grid;
  let map = &plan.map;
  let (ew, eh) = grid.encoded_size(row);
  let spp = grid.samples_per_tile_pixel();
  let rb = row_bytes(ew, spp, plan.bits);
  let mut buf = vec![0; rb * eh];
  let rect = grid.tile_rect(col, row);

  if plan.direct {
    if let RasterData::U8(data) = &raster.data {
      let sx = map.source_x(rect.x) as usize;
      let n = rect.width as usize * spp;
      for y in 0..rect.height as usize {
        let sy = map.source_y(rect.y + y as i64) as usize;
        let src = (sy * raster.width + sx) * raster.bands;
        buf[y * rb..y * rb + n].copy_from_slice(&data[src..src + n]);
      }
      return buf;
    }
  }

  let mut samples = vec![0_u32; ew * spp];
  let mut pixel = vec![0_u32; raster.bands];
  let mut packed = Vec::with_capacity(rb);
  for y in 0..rect.height as usize {
    let sy = map.source_y(rect.y + y as i64) as usize;
    samples.fill(0);
    for x in 0..rect.width as usize {
      let sx = map.source_x(rect.x + x as i64) as usize;
      for (b, p) in pixel.iter_mut().enumerate() {
        *p = raster.get(sx, sy, b);
      }
      plan.transform.to_stored(&mut pixel);
      if grid.is_planar() {
        samples[x] = pixel[plane];
      } else {
        samples[x * spp..(x + 1) * spp].copy_from_slice(&pixel);
      }
    }
    packed.clear();
    pack_row(&samples, plan.bits, endian, &mut packed);
    buf[y * rb..(y + 1) * rb].copy_from_slice(&packed[..rb]);
  }
  buf
}
