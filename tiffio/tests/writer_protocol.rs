use std::io::Cursor;

use tiffio::{
  CompressionMethod, DecodeStatus, IFD, ImageSpec, PlanarConfiguration, ReadParam, ReplaceParam, TiffError, TiffReader, TiffWriter, WriteParam,
  WriterOptions,
  bits::Endian,
  pixels::Raster,
  tags::TiffCommonTag,
  tiles::Rect,
};

type TestResult = std::result::Result<(), Box<dyn std::error::Error>>;

fn init_logger() {
  let _ = env_logger::builder().is_test(true).try_init();
}

fn gradient(w: usize, h: usize, bands: usize, seed: usize) -> Raster {
  let data = (0..w * h * bands).map(|i| ((i * 7 + seed * 13) % 256) as u8).collect();
  Raster::new_u8(w, h, bands, data)
}

fn read_raster(buf: &mut Cursor<Vec<u8>>, index: usize) -> std::result::Result<Raster, TiffError> {
  let img = TiffReader::new(buf)?.read_image(index, &ReadParam::default())?;
  assert_eq!(img.status, DecodeStatus::Complete);
  Ok(img.raster)
}

#[test]
fn minimal_file_layout() -> TestResult {
  init_logger();
  let raster = gradient(4, 4, 1, 0);
  let mut buf = Cursor::new(Vec::new());
  let ifd = TiffWriter::new(&mut buf)?.write(None, &raster, &WriteParam::default())?;

  let bytes = buf.get_ref().clone();
  assert_eq!(&bytes[0..8], &[b'I', b'I', 42, 0, 8, 0, 0, 0]);
  assert_eq!(ifd.offset, 8);
  let count = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
  let next_pos = 8 + 2 + 12 * count;
  assert_eq!(&bytes[next_pos..next_pos + 4], &[0, 0, 0, 0]);

  // Pixel data directly follows the directory
  let offsets = ifd.data_offsets()?;
  assert_eq!(offsets.len(), 1);
  assert_eq!(offsets[0] as u64, ifd.bookmarks.last_position);
  assert_eq!(ifd.data_byte_counts()?, vec![16]);
  assert_eq!(bytes.len(), offsets[0] as usize + 16);
  assert_eq!(read_raster(&mut buf, 0)?, raster);
  Ok(())
}

#[test]
fn codecs_through_the_container() -> TestResult {
  init_logger();
  let raster = gradient(50, 37, 3, 1);
  for compression in [CompressionMethod::None, CompressionMethod::LZW, CompressionMethod::PackBits, CompressionMethod::Deflate] {
    for tile_size in [None, Some((32, 16))] {
      let mut buf = Cursor::new(Vec::new());
      let param = WriteParam {
        compression,
        tile_size,
        rows_per_strip: Some(5),
        ..Default::default()
      };
      TiffWriter::new(&mut buf)?.write(None, &raster, &param)?;
      assert_eq!(read_raster(&mut buf, 0)?, raster, "{:?} {:?}", compression, tile_size);
    }
  }
  Ok(())
}

#[test]
fn jpeg_is_close() -> TestResult {
  init_logger();
  let (w, h) = (64, 48);
  let data = (0..w * h * 3).map(|i| ((i / 3) % w * 3 + (i % 3) * 20) as u8).collect();
  let raster = Raster::new_u8(w, h, 3, data);
  let mut buf = Cursor::new(Vec::new());
  let param = WriteParam {
    compression: CompressionMethod::ModernJPEG,
    tile_size: Some((32, 32)),
    jpeg_quality: 95,
    ..Default::default()
  };
  TiffWriter::new(&mut buf)?.write(None, &raster, &param)?;
  let decoded = read_raster(&mut buf, 0)?;
  let mut diff = 0_u64;
  for y in 0..h {
    for x in 0..w {
      for b in 0..3 {
        diff += (decoded.get(x, y, b) as i64 - raster.get(x, y, b) as i64).unsigned_abs();
      }
    }
  }
  assert!(diff / ((w * h * 3) as u64) < 4, "mean error {}", diff / ((w * h * 3) as u64));
  Ok(())
}

#[test]
fn sequence_of_images() -> TestResult {
  init_logger();
  let images = [gradient(10, 10, 1, 0), gradient(33, 7, 3, 1), gradient(1, 1, 1, 2)];
  let mut buf = Cursor::new(Vec::new());
  let mut writer = TiffWriter::new(&mut buf)?;
  writer.prepare_write_sequence()?;
  for img in &images {
    let param = WriteParam {
      compression: CompressionMethod::LZW,
      ..Default::default()
    };
    writer.write_to_sequence(None, img, &param)?;
  }
  writer.end_write_sequence()?;

  let mut reader = TiffReader::new(&mut buf)?;
  assert_eq!(reader.num_images()?, 3);
  for (i, img) in images.iter().enumerate() {
    assert_eq!(&reader.read_image(i, &ReadParam::default())?.raster, img);
  }
  Ok(())
}

#[test]
fn insert_keeps_existing_bytes() -> TestResult {
  init_logger();
  let first = gradient(8, 8, 1, 0);
  let second = gradient(12, 5, 3, 1);
  let inserted = gradient(6, 6, 1, 2);

  let mut buf = Cursor::new(Vec::new());
  let mut writer = TiffWriter::new(&mut buf)?;
  writer.prepare_write_sequence()?;
  writer.write_to_sequence(None, &first, &WriteParam::default())?;
  writer.write_to_sequence(None, &second, &WriteParam::default())?;
  writer.end_write_sequence()?;
  drop(writer);
  let original = buf.get_ref().clone();
  let old_offsets = TiffReader::new(&mut buf)?.ifd_offsets()?;
  let ifd0 = TiffReader::new(&mut buf)?.read_ifd(0)?;
  let link_pos = ifd0.offset as usize + 2 + 12 * ifd0.entry_count() as usize;

  let mut writer = TiffWriter::new(&mut buf)?;
  assert!(writer.can_insert_image(1)?);
  assert!(writer.can_insert_image(2)?);
  assert!(!writer.can_insert_image(3)?);
  assert!(!writer.can_insert_image(-2)?);
  let new_ifd = writer.insert(1, None, &inserted, &WriteParam::default())?;
  drop(writer);

  let bytes = buf.get_ref();
  assert!(bytes.len() > original.len());
  for (pos, (a, b)) in original.iter().zip(bytes.iter()).enumerate() {
    if !(link_pos..link_pos + 4).contains(&pos) {
      assert_eq!(a, b, "byte {} changed", pos);
    }
  }
  assert_eq!(&bytes[link_pos..link_pos + 4], &new_ifd.offset.to_le_bytes());

  let mut reader = TiffReader::new(&mut buf)?;
  assert_eq!(reader.ifd_offsets()?, vec![old_offsets[0], new_ifd.offset, old_offsets[1]]);
  assert_eq!(reader.read_image(0, &ReadParam::default())?.raster, first);
  assert_eq!(reader.read_image(1, &ReadParam::default())?.raster, inserted);
  assert_eq!(reader.read_image(2, &ReadParam::default())?.raster, second);
  Ok(())
}

#[test]
fn insert_at_head_and_tail() -> TestResult {
  init_logger();
  let mut buf = Cursor::new(Vec::new());
  let a = gradient(4, 4, 1, 0);
  let b = gradient(5, 5, 1, 1);
  let c = gradient(6, 6, 1, 2);
  let mut writer = TiffWriter::new(&mut buf)?;
  writer.write(None, &a, &WriteParam::default())?;
  writer.insert(0, None, &b, &WriteParam::default())?;
  writer.insert(-1, None, &c, &WriteParam::default())?;
  drop(writer);
  let mut reader = TiffReader::new(&mut buf)?;
  let rasters: Vec<Raster> = (0..reader.num_images()?)
    .map(|i| reader.read_image(i, &ReadParam::default()).map(|img| img.raster))
    .collect::<std::result::Result<_, _>>()?;
  assert_eq!(rasters, vec![b, a, c]);
  Ok(())
}

#[test]
fn existing_byte_order_wins() -> TestResult {
  init_logger();
  let mut buf = Cursor::new(Vec::new());
  let options = WriterOptions { endian: Endian::Big };
  TiffWriter::with_options(&mut buf, options)?.write(None, &gradient(4, 4, 1, 0), &WriteParam::default())?;
  let mut writer = TiffWriter::new(&mut buf)?;
  assert_eq!(writer.endian(), Endian::Big);
  writer.insert(-1, None, &gradient(3, 3, 1, 1), &WriteParam::default())?;
  drop(writer);
  let mut reader = TiffReader::new(&mut buf)?;
  assert_eq!(reader.endian(), Endian::Big);
  assert_eq!(reader.read_image(1, &ReadParam::default())?.raster, gradient(3, 3, 1, 1));
  Ok(())
}

#[test]
fn empty_image_filled_by_replacement() -> TestResult {
  init_logger();
  let full = gradient(8, 8, 1, 3);
  let mut direct = Cursor::new(Vec::new());
  let param = WriteParam {
    rows_per_strip: Some(4),
    ..Default::default()
  };
  TiffWriter::new(&mut direct)?.write(None, &full, &param)?;

  let mut buf = Cursor::new(Vec::new());
  let mut writer = TiffWriter::new(&mut buf)?;
  let empty = writer.prepare_write_empty(None, &ImageSpec::new(8, 8, 1, 8), &param)?;
  assert_eq!(empty.data_byte_counts()?, vec![0, 0]);
  writer.prepare_replace_pixels(0, &Rect::new(0, 0, 8, 8))?;
  // Left half fills the empty strips, right half updates them in place
  for x0 in [0_i64, 4] {
    let rp = ReplaceParam {
      source_region: Some(Rect::new(x0, 0, 4, 8)),
      dest_offset: (x0, 0),
      ..Default::default()
    };
    writer.replace_pixels(&full, &rp)?;
  }
  writer.end_replace_pixels()?;
  writer.end_write_empty()?;
  drop(writer);

  assert_eq!(read_raster(&mut buf, 0)?, read_raster(&mut direct, 0)?);
  let ifd = TiffReader::new(&mut buf)?.read_ifd(0)?;
  assert_eq!(ifd.data_byte_counts()?, vec![32, 32]);
  Ok(())
}

#[test]
fn replacement_respects_region() -> TestResult {
  init_logger();
  let mut buf = Cursor::new(Vec::new());
  let mut writer = TiffWriter::new(&mut buf)?;
  writer.write(None, &Raster::new_u8(8, 8, 1, vec![0; 64]), &WriteParam::default())?;
  writer.prepare_replace_pixels(0, &Rect::new(2, 2, 3, 3))?;
  writer.replace_pixels(&Raster::new_u8(8, 8, 1, vec![200; 64]), &ReplaceParam::default())?;
  writer.end_replace_pixels()?;
  drop(writer);

  let raster = read_raster(&mut buf, 0)?;
  for y in 0..8 {
    for x in 0..8 {
      let inside = (2..5).contains(&x) && (2..5).contains(&y);
      assert_eq!(raster.get(x, y, 0), if inside { 200 } else { 0 }, "pixel {} {}", x, y);
    }
  }
  Ok(())
}

#[test]
fn writes_are_refused_during_replacement() -> TestResult {
  init_logger();
  let mut buf = Cursor::new(Vec::new());
  let mut writer = TiffWriter::new(&mut buf)?;
  writer.write(None, &Raster::new_u8(4, 4, 1, vec![0; 16]), &WriteParam::default())?;
  writer.prepare_replace_pixels(0, &Rect::new(0, 0, 4, 4))?;

  let small = gradient(2, 2, 1, 3);
  let param = WriteParam::default();
  let spec = ImageSpec::new(2, 2, 1, 8);
  assert!(matches!(writer.write(None, &small, &param), Err(TiffError::IllegalState(_))));
  assert!(matches!(writer.insert(-1, None, &small, &param), Err(TiffError::IllegalState(_))));
  assert!(matches!(writer.prepare_write_sequence(), Err(TiffError::IllegalState(_))));
  assert!(matches!(writer.prepare_write_empty(None, &spec, &param), Err(TiffError::IllegalState(_))));
  assert!(matches!(writer.prepare_insert_empty(-1, None, &spec, &param), Err(TiffError::IllegalState(_))));
  let len = writer.next_space();

  writer.replace_pixels(&Raster::new_u8(4, 4, 1, vec![99; 16]), &ReplaceParam::default())?;
  writer.end_replace_pixels()?;
  assert_eq!(writer.next_space(), len);
  drop(writer);

  assert_eq!(TiffReader::new(&mut buf)?.num_images()?, 1);
  assert_eq!(read_raster(&mut buf, 0)?, Raster::new_u8(4, 4, 1, vec![99; 16]));
  Ok(())
}

#[test]
fn sequence_follows_inserted_tail() -> TestResult {
  init_logger();
  let images = [gradient(5, 5, 1, 0), gradient(6, 3, 1, 1), gradient(2, 9, 1, 2), gradient(4, 4, 1, 3)];
  let param = WriteParam::default();
  let mut buf = Cursor::new(Vec::new());
  let mut writer = TiffWriter::new(&mut buf)?;
  writer.prepare_write_sequence()?;
  writer.write_to_sequence(None, &images[0], &param)?;
  writer.insert(-1, None, &images[1], &param)?;
  writer.insert(0, None, &images[2], &param)?;
  writer.write_to_sequence(None, &images[3], &param)?;
  writer.end_write_sequence()?;
  drop(writer);

  let mut reader = TiffReader::new(&mut buf)?;
  assert_eq!(reader.num_images()?, 4);
  for (i, expected) in [2, 0, 1, 3].into_iter().enumerate() {
    assert_eq!(reader.read_image(i, &ReadParam::default())?.raster, images[expected]);
  }
  Ok(())
}

#[test]
fn insert_empty_then_fill() -> TestResult {
  init_logger();
  let mut buf = Cursor::new(Vec::new());
  let mut writer = TiffWriter::new(&mut buf)?;
  writer.write(None, &gradient(4, 4, 1, 0), &WriteParam::default())?;
  let param = WriteParam {
    tile_size: Some((16, 16)),
    planar: PlanarConfiguration::Planar,
    ..Default::default()
  };
  writer.prepare_insert_empty(0, None, &ImageSpec::new(20, 18, 3, 8), &param)?;
  let fill = gradient(20, 18, 3, 5);
  {
    let mut session = writer.replace_session(0, &Rect::new(0, 0, 20, 18))?;
    session.replace(&fill, &ReplaceParam::default())?;
    session.finish()?;
  }
  writer.end_insert_empty()?;
  drop(writer);

  let mut reader = TiffReader::new(&mut buf)?;
  assert_eq!(reader.num_images()?, 2);
  assert_eq!(reader.read_image(0, &ReadParam::default())?.raster, fill);
  assert_eq!(reader.read_image(1, &ReadParam::default())?.raster, gradient(4, 4, 1, 0));
  Ok(())
}

#[test]
fn backpatched_offsets_are_consistent() -> TestResult {
  init_logger();
  let raster = gradient(100, 90, 3, 4);
  let mut buf = Cursor::new(Vec::new());
  let param = WriteParam {
    compression: CompressionMethod::LZW,
    tile_size: Some((32, 32)),
    ..Default::default()
  };
  let written = TiffWriter::new(&mut buf)?.write(None, &raster, &param)?;
  let len = buf.get_ref().len() as u64;

  let ifd = TiffReader::new(&mut buf)?.read_ifd(0)?;
  let offsets = ifd.data_offsets()?;
  let counts = ifd.data_byte_counts()?;
  assert_eq!(offsets, written.data_offsets()?);
  assert_eq!(counts, written.data_byte_counts()?);
  assert_eq!(offsets.len(), 4 * 3);
  let mut end = written.bookmarks.last_position;
  for (offset, count) in offsets.iter().zip(counts.iter()) {
    assert!(*count > 0);
    assert_eq!(*offset as u64, end, "tiles are contiguous");
    end = *offset as u64 + *count as u64;
  }
  assert_eq!(end, len);
  Ok(())
}

#[test]
fn template_fields_are_kept() -> TestResult {
  init_logger();
  let mut template = IFD::default();
  template.add_tag(TiffCommonTag::Software, "tiffio");
  template.add_tag(TiffCommonTag::ImageWidth, 9999_u32);
  let mut buf = Cursor::new(Vec::new());
  TiffWriter::new(&mut buf)?.write(Some(&template), &gradient(3, 2, 1, 0), &WriteParam::default())?;
  let ifd = TiffReader::new(&mut buf)?.read_ifd(0)?;
  assert_eq!(ifd.width()?, 3);
  assert_eq!(
    ifd.get_entry(TiffCommonTag::Software).and_then(|e| e.value.as_string()).map(String::as_str),
    Some("tiffio")
  );
  assert!(ifd.has_entry(TiffCommonTag::XResolution));
  Ok(())
}
