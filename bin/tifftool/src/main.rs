// SPDX-License-Identifier: LGPL-2.1
// Copyright 2021 Daniel Vogelbacher <daniel@chaospixel.com>

mod app;
mod comment;
mod convert;
mod dump;
mod insert;

use std::path::PathBuf;

use fern::colors::{Color, ColoredLevelConfig};
use thiserror::Error;
use tiffio::TiffError;

/// Main entry function
///
/// We initialize the fern logger here, create a Clap command line
/// parser and dispatch to the subcommand.
fn main() -> anyhow::Result<()> {
  let app = app::create_app();
  let matches = app.try_get_matches().unwrap_or_else(|e| e.exit());

  let colors = ColoredLevelConfig::new().debug(Color::Magenta);
  fern::Dispatch::new()
    .chain(std::io::stderr())
    .level({
      match matches.get_count("debug") {
        0 => log::LevelFilter::Error,
        1 => log::LevelFilter::Warn,
        2 => log::LevelFilter::Info,
        3 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
      }
    })
    .format(move |out, message, record| {
      out.finish(format_args!(
        "[{:6}][{}] {} ({}:{})",
        colors.color(record.level()),
        record.target(),
        message,
        record.file().unwrap_or("<undefined>"),
        record.line().unwrap_or(0)
      ))
    })
    .apply()?;

  match matches.subcommand() {
    Some(("dump", sc)) => dump::dump(sc)?,
    Some(("convert", sc)) => convert::convert(sc)?,
    Some(("insert", sc)) => insert::insert(sc)?,
    Some(("comment", sc)) => comment::comment(sc)?,
    _ => return Err(AppError::InvalidCmdSwitch("Unknown subcommand".into()).into()),
  }
  Ok(())
}

#[derive(Error, Debug)]
pub enum AppError {
  #[error("{}", _0)]
  General(String),
  #[error("Invalid arguments: {}", _0)]
  InvalidCmdSwitch(String),
  #[error("I/O error: {}", _0)]
  Io(#[from] std::io::Error),
  #[error("Not found: {}", _0.display())]
  NotFound(PathBuf),
  #[error("Already exists: {}", _0.display())]
  AlreadyExists(PathBuf),
  #[error("TIFF error: {}", _0)]
  Tiff(#[from] TiffError),
  #[error(transparent)]
  Other(#[from] anyhow::Error),
}

impl From<serde_json::Error> for AppError {
  fn from(value: serde_json::Error) -> Self {
    anyhow::Error::new(value).into()
  }
}

pub type Result<T> = std::result::Result<T, AppError>;
