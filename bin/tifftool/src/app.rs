// SPDX-License-Identifier: LGPL-2.1
// Copyright 2021 Daniel Vogelbacher <daniel@chaospixel.com>

use std::path::PathBuf;

use clap::{Arg, ArgAction, Command, builder::PossibleValuesParser, crate_version, value_parser};
use log::debug;

pub const COMPRESSIONS: [&str; 8] = ["none", "lzw", "packbits", "deflate", "jpeg", "huffman", "fax3", "fax4"];

pub fn create_app() -> Command {
  debug!("Creating CLAP app configuration");
  Command::new("tifftool")
    .version(crate_version!())
    .author("Daniel V. <daniel@chaospixel.com>")
    .about("Inspect, convert and update TIFF image containers")
    .subcommand_required(true)
    .arg(
      Arg::new("debug")
        .short('d')
        .action(ArgAction::Count)
        .global(true)
        .help("Sets the level of debugging information"),
    )
    .subcommand(
      Command::new("dump")
        .about("Print the directory chain of a file")
        .arg(Arg::new("json").long("json").action(ArgAction::SetTrue).help("Format directories as JSON"))
        .arg(
          Arg::new("limit")
            .long("limit")
            .value_parser(value_parser!(usize))
            .default_value("16")
            .help("Maximum number of values printed per field"),
        )
        .arg(file_arg("FILE", "Input file")),
    )
    .subcommand(
      Command::new("convert")
        .about("Re-encode all images of a file")
        .arg(
          Arg::new("compression")
            .short('c')
            .long("compression")
            .value_parser(PossibleValuesParser::new(COMPRESSIONS))
            .default_value("lzw")
            .help("Compression of the written images"),
        )
        .arg(Arg::new("predictor").long("predictor").action(ArgAction::SetTrue).help("Use horizontal differencing"))
        .arg(
          Arg::new("tile")
            .long("tile")
            .value_parser(value_parser!(u32))
            .help("Write square tiles of this size instead of strips"),
        )
        .arg(
          Arg::new("rows_per_strip")
            .long("rows-per-strip")
            .value_parser(value_parser!(u32))
            .conflicts_with("tile")
            .help("Rows per strip"),
        )
        .arg(Arg::new("planar").long("planar").action(ArgAction::SetTrue).help("Store bands in separate planes"))
        .arg(Arg::new("big_endian").long("big-endian").action(ArgAction::SetTrue).help("Write Motorola byte order"))
        .arg(
          Arg::new("quality")
            .long("quality")
            .value_parser(value_parser!(u8).range(1..=100))
            .default_value("90")
            .help("JPEG quality"),
        )
        .arg(Arg::new("override").short('f').long("override").action(ArgAction::SetTrue).help("Override existing files"))
        .arg(file_arg("INPUT", "Input file"))
        .arg(file_arg("OUTPUT", "Output file")),
    )
    .subcommand(
      Command::new("insert")
        .about("Insert an image of one file into another")
        .arg(
          Arg::new("source_index")
            .long("source-index")
            .value_parser(value_parser!(usize))
            .default_value("0")
            .help("Image of the source file to insert"),
        )
        .arg(
          Arg::new("index")
            .short('i')
            .long("index")
            .value_parser(value_parser!(i64))
            .allow_negative_numbers(true)
            .default_value("-1")
            .help("Position in the destination chain, -1 appends"),
        )
        .arg(file_arg("SOURCE", "File holding the image"))
        .arg(file_arg("DEST", "File to update in place")),
    )
    .subcommand(
      Command::new("comment")
        .about("Overwrite the ImageDescription of the first image")
        .arg(file_arg("FILE", "File to update in place"))
        .arg(Arg::new("TEXT").required(true).help("New description")),
    )
}

fn file_arg(name: &'static str, help: &'static str) -> Arg {
  Arg::new(name).required(true).value_parser(value_parser!(PathBuf)).help(help)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn app_is_consistent() {
    create_app().debug_assert();
  }

  #[test]
  fn parses_insert() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let matches = create_app().try_get_matches_from(["tifftool", "-dd", "insert", "-i", "-1", "a.tif", "b.tif"])?;
    assert_eq!(matches.get_count("debug"), 2);
    let (name, sc) = matches.subcommand().ok_or("no subcommand")?;
    assert_eq!(name, "insert");
    assert_eq!(sc.get_one::<i64>("index"), Some(&-1));
    assert_eq!(sc.get_one::<usize>("source_index"), Some(&0));
    Ok(())
  }
}
