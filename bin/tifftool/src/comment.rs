// SPDX-License-Identifier: LGPL-2.1
// Copyright 2021 Daniel Vogelbacher <daniel@chaospixel.com>

use std::{fs::File, path::PathBuf};

use clap::ArgMatches;
use log::info;
use tiffio::TiffWriter;

use crate::AppError;

/// Entry point for Clap sub command `comment`
pub fn comment(options: &ArgMatches) -> crate::Result<()> {
  let file: &PathBuf = options.get_one("FILE").ok_or_else(|| AppError::InvalidCmdSwitch("FILE missing".into()))?;
  let text: &String = options.get_one("TEXT").ok_or_else(|| AppError::InvalidCmdSwitch("TEXT missing".into()))?;
  if !file.exists() {
    return Err(AppError::NotFound(file.clone()));
  }
  let stream = File::options().read(true).write(true).open(file)?;
  let mut writer = TiffWriter::new(stream)?;
  writer.overwrite_comment(text)?;
  info!("Updated description of {}", file.display());
  Ok(())
}
