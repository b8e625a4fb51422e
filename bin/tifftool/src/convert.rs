// SPDX-License-Identifier: LGPL-2.1
// Copyright 2021 Daniel Vogelbacher <daniel@chaospixel.com>

use std::{
  fs::File,
  io::{Read, Seek, Write},
  path::PathBuf,
  time::Instant,
};

use clap::ArgMatches;
use log::{debug, info, warn};
use tiffio::{
  CompressionMethod, IFD, PlanarConfiguration, Predictor, ReadParam, TiffReader, TiffWriter, WriteParam, WriterOptions, bits::Endian,
};

use crate::AppError;

pub fn compression_by_name(name: &str) -> crate::Result<CompressionMethod> {
  Ok(match name {
    "none" => CompressionMethod::None,
    "lzw" => CompressionMethod::LZW,
    "packbits" => CompressionMethod::PackBits,
    "deflate" => CompressionMethod::Deflate,
    "jpeg" => CompressionMethod::ModernJPEG,
    "huffman" => CompressionMethod::Huffman,
    "fax3" => CompressionMethod::Fax3,
    "fax4" => CompressionMethod::Fax4,
    _ => return Err(AppError::InvalidCmdSwitch(format!("Unknown compression '{}'", name))),
  })
}

/// Write parameters reproducing the layout of an existing image
pub fn param_from_ifd(ifd: &IFD) -> crate::Result<WriteParam> {
  let mut compression = ifd.compression()?;
  if compression == CompressionMethod::JPEG {
    warn!("Old-style JPEG can't be written, storing uncompressed");
    compression = CompressionMethod::None;
  }
  let (tile_size, rows_per_strip) = if ifd.is_tiled() {
    (Some(ifd.tile_size()?), None)
  } else {
    let rows = ifd.get_entry(tiffio::tags::TiffCommonTag::RowsPerStrip).and_then(|e| e.value.get_u32(0).ok().flatten());
    (None, rows)
  };
  Ok(WriteParam {
    compression,
    predictor: ifd.predictor()?,
    tile_size,
    rows_per_strip,
    planar: ifd.planar_config()?,
    fill_order: ifd.fill_order()?,
    t4_options: ifd.t4_options()?,
    photometric: ifd.photometric()?,
    ..Default::default()
  })
}

fn param_from_options(options: &ArgMatches) -> crate::Result<WriteParam> {
  let name: &String = options.get_one("compression").ok_or_else(|| AppError::InvalidCmdSwitch("compression missing".into()))?;
  Ok(WriteParam {
    compression: compression_by_name(name)?,
    predictor: if options.get_flag("predictor") { Predictor::Horizontal } else { Predictor::None },
    tile_size: options.get_one::<u32>("tile").map(|t| (*t, *t)),
    rows_per_strip: options.get_one::<u32>("rows_per_strip").copied(),
    planar: if options.get_flag("planar") {
      PlanarConfiguration::Planar
    } else {
      PlanarConfiguration::Chunky
    },
    jpeg_quality: options.get_one::<u8>("quality").copied().unwrap_or(90),
    ..Default::default()
  })
}

/// Entry point for Clap sub command `convert`
pub fn convert(options: &ArgMatches) -> crate::Result<()> {
  let now = Instant::now();
  let in_file: &PathBuf = options.get_one("INPUT").ok_or_else(|| AppError::InvalidCmdSwitch("INPUT missing".into()))?;
  let out_file: &PathBuf = options.get_one("OUTPUT").ok_or_else(|| AppError::InvalidCmdSwitch("OUTPUT missing".into()))?;
  if !in_file.exists() {
    return Err(AppError::NotFound(in_file.clone()));
  }
  if out_file.exists() && !options.get_flag("override") {
    return Err(AppError::AlreadyExists(out_file.clone()));
  }
  let param = param_from_options(options)?;
  let writer_options = WriterOptions {
    endian: if options.get_flag("big_endian") { Endian::Big } else { Endian::Little },
  };

  let mut reader = TiffReader::new(File::open(in_file)?)?;
  let chain = reader.read_chain()?;
  let mut out = File::options().read(true).write(true).create(true).truncate(true).open(out_file)?;
  convert_chain(&mut reader, &chain, &mut out, writer_options, &param)?;
  out.flush()?;
  info!("Converted {} image(s) in {:.2}s", chain.len(), now.elapsed().as_secs_f32());
  println!("Converted {} image(s) to {}", chain.len(), out_file.display());
  Ok(())
}

fn convert_chain<R, W>(reader: &mut TiffReader<R>, chain: &[IFD], out: &mut W, writer_options: WriterOptions, param: &WriteParam) -> crate::Result<()>
where
  R: Read + Seek,
  W: Read + Write + Seek,
{
  let mut writer = TiffWriter::with_options(out, writer_options)?;
  writer.prepare_write_sequence()?;
  for (i, ifd) in chain.iter().enumerate() {
    let image = reader.read_image_ifd(ifd, &ReadParam::default())?;
    let param = WriteParam {
      photometric: ifd.photometric()?,
      ..param.clone()
    };
    debug!("Image {}: {}x{}, {} band(s)", i, image.raster.width, image.raster.height, image.raster.bands);
    writer.write_to_sequence(Some(ifd), &image.raster, &param)?;
  }
  writer.end_write_sequence()?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use std::io::Cursor;

  use tiffio::pixels::Raster;

  use super::*;

  #[test]
  fn converts_all_images() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let a = Raster::new_u8(5, 4, 1, (0..20).collect());
    let b = Raster::new_u8(3, 3, 3, (0..27).collect());
    let mut src = Cursor::new(Vec::new());
    let mut writer = TiffWriter::new(&mut src)?;
    writer.prepare_write_sequence()?;
    writer.write_to_sequence(None, &a, &WriteParam::default())?;
    writer.write_to_sequence(None, &b, &WriteParam::default())?;
    writer.end_write_sequence()?;

    let mut reader = TiffReader::new(&mut src)?;
    let chain = reader.read_chain()?;
    let mut dst = Cursor::new(Vec::new());
    let param = WriteParam {
      compression: compression_by_name("packbits")?,
      ..Default::default()
    };
    convert_chain(&mut reader, &chain, &mut dst, WriterOptions { endian: Endian::Big }, &param)?;

    let mut reader = TiffReader::new(&mut dst)?;
    assert_eq!(reader.endian(), Endian::Big);
    let ifd = reader.read_ifd(1)?;
    assert_eq!(ifd.compression()?, CompressionMethod::PackBits);
    assert_eq!(reader.read_image(0, &ReadParam::default())?.raster, a);
    assert_eq!(reader.read_image(1, &ReadParam::default())?.raster, b);
    Ok(())
  }

  #[test]
  fn layout_is_reproduced() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let mut buf = Cursor::new(Vec::new());
    let param = WriteParam {
      compression: CompressionMethod::Deflate,
      tile_size: Some((16, 32)),
      ..Default::default()
    };
    let ifd = TiffWriter::new(&mut buf)?.write(None, &Raster::new_u8(20, 20, 1, vec![0; 400]), &param)?;
    let copy = param_from_ifd(&ifd)?;
    assert_eq!(copy.compression, CompressionMethod::Deflate);
    assert_eq!(copy.tile_size, Some((16, 32)));
    assert!(compression_by_name("zip").is_err());
    Ok(())
  }
}
