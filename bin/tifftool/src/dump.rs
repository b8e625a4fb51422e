// SPDX-License-Identifier: LGPL-2.1
// Copyright 2021 Daniel Vogelbacher <daniel@chaospixel.com>

use std::{fs::File, io::BufReader, path::PathBuf};

use clap::ArgMatches;
use log::debug;
use tiffio::TiffReader;

use crate::AppError;

/// Entry point for Clap sub command `dump`
pub fn dump(options: &ArgMatches) -> crate::Result<()> {
  let in_file: &PathBuf = options.get_one("FILE").ok_or_else(|| AppError::InvalidCmdSwitch("FILE missing".into()))?;
  let limit = options.get_one::<usize>("limit").copied().unwrap_or(16);
  debug!("Infile: {:?}", in_file);
  if !in_file.exists() {
    return Err(AppError::NotFound(in_file.clone()));
  }

  let mut reader = TiffReader::new(BufReader::new(File::open(in_file)?))?;
  let chain = reader.read_chain()?;
  if options.get_flag("json") {
    println!("{}", serde_json::to_string_pretty(&chain)?);
    return Ok(());
  }
  println!("{:?} endian, {} image(s)", reader.endian(), chain.len());
  for (i, ifd) in chain.iter().enumerate() {
    println!();
    println!("Image {} at offset {}", i, ifd.offset);
    for line in ifd.dump(limit) {
      println!("{}", line);
    }
  }
  Ok(())
}
