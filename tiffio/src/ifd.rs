// SPDX-License-Identifier: MIT
// Copyright 2021 Daniel Vogelbacher <daniel@chaospixel.com>

use std::{
  collections::BTreeMap,
  io::{Read, Seek},
  sync::Arc,
};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::{
  CompressionMethod, ENTRY_SIZE, FillOrder, PhotometricInterpretation, PlanarConfiguration, Predictor, Result, SampleFormat, TiffError,
  bits::{Endian, align_word},
  entry::Entry,
  reader::{EndianReader, ReadByteOrder},
  tags::{self, TagSetId, TiffCommonTag, TiffTagEnum},
  value::{FieldType, IfdValue, Value},
  writer::{EndianWriter, WriteAndSeek},
};

/// Nested directories deeper than this are not followed
const MAX_NESTING: usize = 16;

/// Stream positions captured while a directory is written (or read),
/// used to backpatch strip/tile offsets and byte counts later.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Bookmarks {
  /// Position of the StripOffsets/TileOffsets value
  pub offsets_pos: Option<u64>,
  /// Position of the StripByteCounts/TileByteCounts value
  pub byte_counts_pos: Option<u64>,
  /// Position of the trailing next-IFD pointer
  pub next_ifd_pos: u64,
  /// First byte after the directory and all its out-of-line data
  pub last_position: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IFD {
  pub offset: u32,
  pub next_ifd: u32,
  pub endian: Endian,
  /// Tag of the field in the enclosing directory pointing to this one
  pub parent_tag: Option<u16>,
  pub tag_sets: Vec<TagSetId>,
  // BTreeMap makes sure tags are written in correct order
  pub entries: BTreeMap<u16, Arc<Entry>>,
  #[serde(skip)]
  pub bookmarks: Bookmarks,
}

impl Default for IFD {
  fn default() -> Self {
    Self {
      offset: 0,
      next_ifd: 0,
      endian: Endian::default(),
      parent_tag: None,
      tag_sets: vec![TagSetId::Baseline],
      entries: BTreeMap::new(),
      bookmarks: Bookmarks::default(),
    }
  }
}

impl PartialEq for IFD {
  fn eq(&self, other: &Self) -> bool {
    // Stream positions of values don't matter for equality
    self.entries.len() == other.entries.len()
      && self
        .entries
        .iter()
        .zip(other.entries.iter())
        .all(|((ta, a), (tb, b))| ta == tb && a.value == b.value)
  }
}

fn is_offsets_tag(tag: u16) -> bool {
  tag == TiffCommonTag::StripOffsets.to_u16() || tag == TiffCommonTag::TileOffsets.to_u16()
}

fn is_byte_counts_tag(tag: u16) -> bool {
  tag == TiffCommonTag::StripByteCounts.to_u16() || tag == TiffCommonTag::TileByteCounts.to_u16()
}

impl IFD {
  pub fn new(tag_sets: Vec<TagSetId>) -> Self {
    Self {
      tag_sets,
      ..Default::default()
    }
  }

  /// Read a directory located at `offset`.
  ///
  /// Unknown tags are kept as generic fields unless `ignore_unknown` is set.
  /// Fields pointing to nested directories are resolved immediately.
  pub fn read<R: Read + Seek>(reader: &mut EndianReader<'_, R>, offset: u32, tag_sets: &[TagSetId], ignore_unknown: bool) -> Result<IFD> {
    Self::read_nested(reader, offset, tag_sets, None, ignore_unknown, 0)
  }

  fn read_nested<R: Read + Seek>(
    reader: &mut EndianReader<'_, R>,
    offset: u32,
    tag_sets: &[TagSetId],
    parent_tag: Option<u16>,
    ignore_unknown: bool,
    depth: usize,
  ) -> Result<IFD> {
    let stream_len = reader.stream_len()?;
    reader.goto(offset)?;
    let entry_count = reader.read_u16()?;
    let body_end = offset as u64 + 2 + entry_count as u64 * ENTRY_SIZE;
    // The trailing pointer may be missing, but all entries must be there
    if body_end > stream_len {
      return Err(TiffError::General(format!(
        "Stream too short for directory at {} with {} entries",
        offset, entry_count
      )));
    }
    debug!("Parse {} entries of IFD at {}", entry_count, offset);

    let mut ifd = IFD {
      offset,
      endian: reader.endian(),
      parent_tag,
      tag_sets: tag_sets.to_vec(),
      ..Default::default()
    };

    for i in 0..entry_count as u64 {
      let entry_pos = offset as u64 + 2 + i * ENTRY_SIZE;
      reader.goto(entry_pos as u32)?;
      let tag = reader.read_u16()?;
      let typ = reader.read_u16()?;
      let count = reader.read_u32()?;

      let desc = tags::resolve(tag_sets, tag);
      if !desc.is_known() && ignore_unknown {
        debug!("Skip unknown tag {}", tag);
        continue;
      }

      let field_type = FieldType::from_code_lossy(typ);
      if u16::from(field_type) != typ {
        warn!("Tag {} declares invalid type {}, read as UNDEFINED", desc.name(), typ);
      } else if !desc.accepts(field_type) {
        debug!("Tag {} has unusual type {}", desc.name(), field_type.name());
      }
      let baseline = tag_sets.contains(&TagSetId::Baseline) && tags::is_baseline(tag);

      let size = count as u64 * field_type.size() as u64;
      let value_pos = if size > 4 { reader.read_u32()? as u64 } else { entry_pos + 8 };

      if value_pos + size > stream_len {
        if baseline {
          return Err(TiffError::General(format!(
            "Baseline tag {} value ({} bytes at {}) reaches past end of stream",
            desc.name(),
            size,
            value_pos
          )));
        }
        warn!("Tag {} value reaches past end of stream, field dropped", desc.name());
        continue;
      }

      if is_offsets_tag(tag) {
        ifd.bookmarks.offsets_pos = Some(value_pos);
      } else if is_byte_counts_tag(tag) {
        ifd.bookmarks.byte_counts_pos = Some(value_pos);
      }

      reader.goto(value_pos as u32)?;
      let mut value = match Entry::read_value(reader, field_type, count as usize) {
        Ok(value) => value,
        Err(err) if err.is_eof() && !baseline => {
          warn!("Truncated value for tag {}, field dropped", desc.name());
          continue;
        }
        Err(err) => return Err(err),
      };

      let is_pointer = field_type == FieldType::Ifd || (field_type == FieldType::Long && desc.accepts(FieldType::Ifd) && desc.is_known());
      if is_pointer {
        if depth >= MAX_NESTING {
          warn!("Directory nesting too deep at tag {}, kept as plain offsets", desc.name());
        } else {
          let child_sets = tags::child_tag_sets(tag).unwrap_or_else(|| tag_sets.to_vec());
          let mut ifds = Vec::new();
          let mut failed = false;
          for sub_offset in value.to_u32_vec()? {
            match Self::read_nested(reader, sub_offset, &child_sets, Some(tag), ignore_unknown, depth + 1) {
              Ok(sub) => ifds.push(sub),
              Err(err) => {
                warn!("Failed to read sub IFD for tag {} at {}: {}", desc.name(), sub_offset, err);
                failed = true;
                break;
              }
            }
          }
          if !failed {
            value = Value::Ifd(IfdValue {
              ifds,
              as_long: field_type == FieldType::Long,
            });
          }
        }
      }

      ifd.entries.insert(
        tag,
        Arc::new(Entry {
          tag,
          value,
          offset: Some(value_pos as u32),
        }),
      );
    }

    reader.goto(body_end as u32)?;
    ifd.bookmarks.next_ifd_pos = body_end;
    ifd.next_ifd = match reader.read_u32() {
      Ok(next) => next,
      Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
        warn!("Missing next IFD pointer after directory at {}, assume end of chain", offset);
        0
      }
      Err(err) => return Err(err.into()),
    };
    ifd.bookmarks.last_position = body_end + 4;
    Ok(ifd)
  }

  /// Write the directory at the current stream position.
  ///
  /// Values not fitting into the 4 byte slot are placed after the
  /// directory body, word aligned. The trailing next-IFD pointer is
  /// written as 0, its position is recorded in the bookmarks.
  /// On return the stream is positioned at `bookmarks.last_position`.
  pub fn write_to_stream<W: WriteAndSeek>(&mut self, w: &mut EndianWriter<W>) -> Result<()> {
    let start = w.position()?;
    self.offset = u32::try_from(start)?;
    self.endian = w.endian();
    let count = self.entries.len() as u64;
    w.write_u16(u16::try_from(count)?)?;

    let body_end = start + 2 + count * ENTRY_SIZE;
    let mut next_space = body_end + 4;
    self.bookmarks.offsets_pos = None;
    self.bookmarks.byte_counts_pos = None;

    for (tag, entry) in self.entries.iter_mut() {
      let tag = *tag;
      w.write_u16(tag)?;
      w.write_u16(entry.value.value_type())?;
      w.write_u32(u32::try_from(entry.value.count())?)?;

      let value_pos;
      if entry.value.is_ifd() || entry.value.byte_size() > 4 {
        next_space = align_word(next_space);
        value_pos = next_space;
        w.write_u32(u32::try_from(next_space)?)?;
        let slot_end = w.position()?;
        w.goto(next_space)?;
        if entry.value.is_ifd() {
          if let Value::Ifd(subs) = &mut Arc::make_mut(entry).value {
            next_space = Self::write_sub_ifds(w, &mut subs.ifds, next_space)?;
          }
        } else {
          entry.value.write(w)?;
          next_space = w.position()?;
        }
        w.goto(slot_end)?;
      } else {
        value_pos = w.position()?;
        entry.value.write(w)?;
        let padding = 4 - entry.value.byte_size();
        w.write_all(&[0; 4][..padding])?;
      }

      if is_offsets_tag(tag) {
        self.bookmarks.offsets_pos = Some(value_pos);
      } else if is_byte_counts_tag(tag) {
        self.bookmarks.byte_counts_pos = Some(value_pos);
      }
    }

    self.bookmarks.next_ifd_pos = body_end;
    w.write_u32(0)?;
    self.bookmarks.last_position = next_space;
    w.goto(next_space)?;
    Ok(())
  }

  /// Write nested directories starting at `pos`, returns the new next space.
  /// A single directory is referenced directly by the slot, multiple
  /// directories through an offset array placed first.
  fn write_sub_ifds<W: WriteAndSeek>(w: &mut EndianWriter<W>, ifds: &mut [IFD], pos: u64) -> Result<u64> {
    if let [single] = ifds {
      w.goto(pos)?;
      single.write_to_stream(w)?;
      return Ok(single.bookmarks.last_position);
    }
    let array_pos = pos;
    let mut next_space = pos + 4 * ifds.len() as u64;
    let mut offsets = Vec::with_capacity(ifds.len());
    for sub in ifds.iter_mut() {
      next_space = align_word(next_space);
      w.goto(next_space)?;
      offsets.push(u32::try_from(next_space)?);
      sub.write_to_stream(w)?;
      next_space = sub.bookmarks.last_position;
    }
    w.goto(array_pos)?;
    for off in offsets {
      w.write_u32(off)?;
    }
    Ok(next_space)
  }

  /// Copy of this directory for reuse in another write pass.
  /// Fields of the baseline tag set are deep copied, all others are
  /// shared with the original.
  pub fn shallow_clone(&self) -> IFD {
    let entries = self
      .entries
      .iter()
      .map(|(tag, entry)| {
        let entry = if tags::is_baseline(*tag) {
          Arc::new(Entry::clone(entry))
        } else {
          Arc::clone(entry)
        };
        (*tag, entry)
      })
      .collect();
    IFD {
      offset: 0,
      next_ifd: 0,
      endian: self.endian,
      parent_tag: self.parent_tag,
      tag_sets: self.tag_sets.clone(),
      entries,
      bookmarks: Bookmarks::default(),
    }
  }

  pub fn entry_count(&self) -> u16 {
    self.entries.len() as u16
  }

  pub fn next_ifd(&self) -> u32 {
    self.next_ifd
  }

  pub fn entries(&self) -> &BTreeMap<u16, Arc<Entry>> {
    &self.entries
  }

  pub fn get_entry<T: TiffTagEnum>(&self, tag: T) -> Option<&Entry> {
    self.entries.get(&tag.into()).map(AsRef::as_ref)
  }

  pub fn has_entry<T: TiffTagEnum>(&self, tag: T) -> bool {
    self.get_entry(tag).is_some()
  }

  pub fn add_tag<T: TiffTagEnum, V: Into<Value>>(&mut self, tag: T, value: V) {
    let tag: u16 = tag.into();
    self.entries.insert(tag, Arc::new(Entry::new(tag, value)));
  }

  pub fn add_entry(&mut self, entry: Entry) {
    self.entries.insert(entry.tag, Arc::new(entry));
  }

  pub fn remove_tag<T: TiffTagEnum>(&mut self, tag: T) -> Option<Entry> {
    self.entries.remove(&tag.into()).map(Arc::unwrap_or_clone)
  }

  /// Nested directories of a pointer field
  pub fn get_sub_ifds<T: TiffTagEnum>(&self, tag: T) -> Option<&Vec<IFD>> {
    match self.get_entry(tag).map(|e| &e.value) {
      Some(Value::Ifd(subs)) => Some(&subs.ifds),
      _ => None,
    }
  }

  pub fn sub_ifds(&self) -> impl Iterator<Item = (u16, &Vec<IFD>)> {
    self.entries.iter().filter_map(|(tag, entry)| match &entry.value {
      Value::Ifd(subs) => Some((*tag, &subs.ifds)),
      _ => None,
    })
  }

  fn get_u32<T: TiffTagEnum>(&self, tag: T) -> Result<Option<u32>> {
    match self.get_entry(tag) {
      Some(entry) => entry.value.get_u32(0),
      None => Ok(None),
    }
  }

  fn get_u16<T: TiffTagEnum>(&self, tag: T) -> Result<Option<u16>> {
    match self.get_entry(tag) {
      Some(entry) => entry.value.get_u16(0),
      None => Ok(None),
    }
  }

  pub fn width(&self) -> Result<u32> {
    self
      .get_u32(TiffCommonTag::ImageWidth)?
      .ok_or_else(|| TiffError::General("Directory has no ImageWidth".into()))
  }

  pub fn height(&self) -> Result<u32> {
    self
      .get_u32(TiffCommonTag::ImageLength)?
      .ok_or_else(|| TiffError::General("Directory has no ImageLength".into()))
  }

  /// Bits per sample, one value per sample. A single value
  /// applies to all samples.
  pub fn bits_per_sample(&self) -> Result<Vec<u16>> {
    let spp = self.samples_per_pixel()? as usize;
    let bits = match self.get_entry(TiffCommonTag::BitsPerSample) {
      Some(entry) => entry.value.to_u16_vec()?,
      None => vec![1],
    };
    Ok(match bits.len() {
      0 => vec![1; spp],
      1 => vec![bits[0]; spp],
      n if n < spp => {
        warn!("BitsPerSample has {} values for {} samples, repeating last value", n, spp);
        let mut bits = bits.clone();
        bits.resize(spp, bits[n - 1]);
        bits
      }
      _ => bits[..spp].to_vec(),
    })
  }

  pub fn samples_per_pixel(&self) -> Result<u16> {
    if let Some(spp) = self.get_u16(TiffCommonTag::SamplesPerPixel)? {
      return Ok(spp.max(1));
    }
    match self.get_entry(TiffCommonTag::BitsPerSample).map(|e| e.count()) {
      Some(n) if n > 1 => {
        warn!("SamplesPerPixel missing, inferred {} from BitsPerSample", n);
        Ok(n as u16)
      }
      _ => Ok(1),
    }
  }

  pub fn compression(&self) -> Result<CompressionMethod> {
    match self.get_u16(TiffCommonTag::Compression)? {
      Some(v) => CompressionMethod::try_from(v).map_err(|_| TiffError::Unsupported(format!("Compression {}", v))),
      None => Ok(CompressionMethod::None),
    }
  }

  pub fn photometric(&self) -> Result<Option<PhotometricInterpretation>> {
    match self.get_u16(TiffCommonTag::PhotometricInterpretation)? {
      Some(v) => Ok(Some(
        PhotometricInterpretation::try_from(v).map_err(|_| TiffError::Unsupported(format!("Photometric interpretation {}", v)))?,
      )),
      None => Ok(None),
    }
  }

  pub fn planar_config(&self) -> Result<PlanarConfiguration> {
    match self.get_u16(TiffCommonTag::PlanarConfiguration)? {
      Some(v) => Ok(PlanarConfiguration::try_from(v).unwrap_or_else(|_| {
        warn!("Invalid PlanarConfiguration {}, assume chunky", v);
        PlanarConfiguration::Chunky
      })),
      None => Ok(PlanarConfiguration::Chunky),
    }
  }

  pub fn predictor(&self) -> Result<Predictor> {
    match self.get_u16(TiffCommonTag::Predictor)? {
      Some(v) => Predictor::try_from(v).map_err(|_| TiffError::Unsupported(format!("Predictor {}", v))),
      None => Ok(Predictor::None),
    }
  }

  pub fn fill_order(&self) -> Result<FillOrder> {
    match self.get_u16(TiffCommonTag::FillOrder)? {
      Some(v) => Ok(FillOrder::try_from(v).unwrap_or_else(|_| {
        warn!("Invalid FillOrder {}, assume MSB first", v);
        FillOrder::MsbFirst
      })),
      None => Ok(FillOrder::MsbFirst),
    }
  }

  pub fn sample_format(&self) -> Result<SampleFormat> {
    match self.get_u16(TiffCommonTag::SampleFormat)? {
      Some(v) => SampleFormat::try_from(v).map_err(|_| TiffError::Unsupported(format!("SampleFormat {}", v))),
      None => Ok(SampleFormat::Uint),
    }
  }

  pub fn t4_options(&self) -> Result<u32> {
    Ok(self.get_u32(TiffCommonTag::T4Options)?.unwrap_or(0))
  }

  pub fn t6_options(&self) -> Result<u32> {
    Ok(self.get_u32(TiffCommonTag::T6Options)?.unwrap_or(0))
  }

  pub fn is_tiled(&self) -> bool {
    self.has_entry(TiffCommonTag::TileWidth) && self.has_entry(TiffCommonTag::TileLength)
  }

  /// Tile width and height, for strip images the strip dimensions
  pub fn tile_size(&self) -> Result<(u32, u32)> {
    if self.is_tiled() {
      let tw = self.get_u32(TiffCommonTag::TileWidth)?.unwrap_or_default();
      let th = self.get_u32(TiffCommonTag::TileLength)?.unwrap_or_default();
      if tw == 0 || th == 0 {
        return Err(TiffError::General(format!("Invalid tile size {}x{}", tw, th)));
      }
      Ok((tw, th))
    } else {
      let height = self.height()?;
      let rows = match self.get_u32(TiffCommonTag::RowsPerStrip)? {
        Some(0) | None => {
          warn!("RowsPerStrip missing, assume a single strip");
          height
        }
        Some(rows) => rows.min(height.max(1)),
      };
      Ok((self.width()?, rows.max(1)))
    }
  }

  pub fn data_offsets(&self) -> Result<Vec<u32>> {
    let tag = if self.is_tiled() { TiffCommonTag::TileOffsets } else { TiffCommonTag::StripOffsets };
    match self.get_entry(tag) {
      Some(entry) => entry.value.to_u32_vec(),
      None => Err(TiffError::General(format!("Directory has no {}", tag.name()))),
    }
  }

  pub fn data_byte_counts(&self) -> Result<Vec<u32>> {
    let tag = if self.is_tiled() {
      TiffCommonTag::TileByteCounts
    } else {
      TiffCommonTag::StripByteCounts
    };
    match self.get_entry(tag) {
      Some(entry) => entry.value.to_u32_vec(),
      None => Err(TiffError::General(format!("Directory has no {}", tag.name()))),
    }
  }

  pub fn jpeg_tables(&self) -> Option<&[u8]> {
    match self.get_entry(TiffCommonTag::JPEGTables).map(|e| &e.value) {
      Some(Value::Undefined(v)) | Some(Value::Byte(v)) => Some(v),
      _ => None,
    }
  }

  pub fn image_description(&self) -> Option<&String> {
    self.get_entry(TiffCommonTag::ImageDescription).and_then(|e| e.value.as_string())
  }

  pub fn dump(&self, limit: usize) -> Vec<String> {
    let mut out = Vec::new();
    out.push(format!("IFD entries: {}", self.entries.len()));
    out.push(format!("{0:<34}  | {1:<10} | {2:<6} | {3}", "Tag", "Type", "Count", "Data"));
    for (tag, entry) in &self.entries {
      let mut line = String::new();
      let tag_name = tags::resolve(&self.tag_sets, *tag).name();
      line.push_str(&format!(
        "{0:#06x} : {0:<6} {1:<20}| {2:<10} | {3:<6} | ",
        tag,
        tag_name,
        entry.type_name(),
        entry.count()
      ));
      line.push_str(&entry.visual_rep(limit));
      out.push(line);
    }
    for (tag, subs) in self.sub_ifds() {
      for (i, sub) in subs.iter().enumerate() {
        out.push(format!("SubIFD({}:{})", tags::resolve(&self.tag_sets, tag).name(), i));
        for line in sub.dump(limit) {
          out.push(format!("   {}", line));
        }
      }
    }
    out
  }
}
