// SPDX-License-Identifier: LGPL-2.1
// Copyright 2021 Daniel Vogelbacher <daniel@chaospixel.com>

use std::{fs::File, path::PathBuf};

use clap::ArgMatches;
use log::debug;
use tiffio::{ReadParam, TiffReader, TiffWriter};

use crate::{AppError, convert::param_from_ifd};

/// Entry point for Clap sub command `insert`
pub fn insert(options: &ArgMatches) -> crate::Result<()> {
  let source: &PathBuf = options.get_one("SOURCE").ok_or_else(|| AppError::InvalidCmdSwitch("SOURCE missing".into()))?;
  let dest: &PathBuf = options.get_one("DEST").ok_or_else(|| AppError::InvalidCmdSwitch("DEST missing".into()))?;
  let source_index = options.get_one::<usize>("source_index").copied().unwrap_or(0);
  let index = options.get_one::<i64>("index").copied().unwrap_or(-1);
  for path in [source, dest] {
    if !path.exists() {
      return Err(AppError::NotFound(path.clone()));
    }
  }

  let mut reader = TiffReader::new(File::open(source)?)?;
  let ifd = reader.read_ifd(source_index)?;
  let image = reader.read_image_ifd(&ifd, &ReadParam::default())?;
  let param = param_from_ifd(&ifd)?;
  debug!("Inserting {}x{} image with {:?}", image.raster.width, image.raster.height, param.compression);

  let stream = File::options().read(true).write(true).open(dest)?;
  let mut writer = TiffWriter::new(stream)?;
  if !writer.can_insert_image(index)? {
    return Err(AppError::General(format!("Can't insert at index {} of {}", index, dest.display())));
  }
  let written = writer.insert(index, Some(&ifd), &image.raster, &param)?;
  println!("Inserted image at offset {} of {}", written.offset, dest.display());
  Ok(())
}
