// SPDX-License-Identifier: LGPL-2.1
// Copyright 2021 Daniel Vogelbacher <daniel@chaospixel.com>

//! JPEG compression (7), delegated to the JPEG engine of the `image` crate.
//! Every tile is a complete interchange stream, shared tables from a
//! JPEGTables field are spliced into abbreviated streams on decode.

use image::{DynamicImage, GrayImage, ImageFormat, RgbImage, codecs::jpeg::JpegEncoder};

use super::{CodecConfig, CodecError, CodecResult, Compressor, Decompressor, gather_rows, scatter_rows};

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

#[derive(Debug, Default, Clone, Copy)]
pub struct JpegCodec;

fn check_layout(cfg: &CodecConfig) -> CodecResult<()> {
  if cfg.bits_per_sample.iter().any(|b| *b != 8) || !(cfg.samples() == 1 || cfg.samples() == 3) {
    return Err(CodecError::Unsupported(format!(
      "JPEG needs 8 bit gray or RGB samples, got {:?}",
      cfg.bits_per_sample
    )));
  }
  Ok(())
}

/// Merge a tables-only stream and an abbreviated image stream
pub fn splice_tables(tables: &[u8], stream: &[u8]) -> Vec<u8> {
  if tables.len() < 4 || !tables.starts_with(&SOI) || !stream.starts_with(&SOI) {
    return stream.to_vec();
  }
  let body = if tables.ends_with(&EOI) { &tables[..tables.len() - 2] } else { tables };
  let mut out = Vec::with_capacity(body.len() + stream.len());
  out.extend_from_slice(body);
  out.extend_from_slice(&stream[2..]);
  out
}

impl Compressor for JpegCodec {
  fn encode(&mut self, cfg: &CodecConfig, src: &[u8], stride: usize, out: &mut Vec<u8>) -> CodecResult<usize> {
    check_layout(cfg)?;
    let data = gather_rows(cfg, src, stride)?;
    let (w, h) = (cfg.width as u32, cfg.height as u32);
    let img = if cfg.samples() == 1 {
      GrayImage::from_raw(w, h, data).map(DynamicImage::ImageLuma8)
    } else {
      RgbImage::from_raw(w, h, data).map(DynamicImage::ImageRgb8)
    }
    .ok_or_else(|| CodecError::InvalidData("Sample buffer does not match tile size".into()))?;
    let before = out.len();
    let encoder = JpegEncoder::new_with_quality(&mut *out, cfg.jpeg_quality.clamp(1, 100));
    img.write_with_encoder(encoder).map_err(|err| CodecError::Jpeg(format!("{:?}", err)))?;
    Ok(out.len() - before)
  }
}

impl Decompressor for JpegCodec {
  fn decode(&mut self, cfg: &CodecConfig, src: &[u8], dst: &mut [u8], offset: usize, stride: usize) -> CodecResult<()> {
    check_layout(cfg)?;
    let stream = match &cfg.jpeg_tables {
      Some(tables) => splice_tables(tables, src),
      None => src.to_vec(),
    };
    let img = image::load_from_memory_with_format(&stream, ImageFormat::Jpeg).map_err(|err| CodecError::Jpeg(format!("{:?}", err)))?;
    let (w, h) = (img.width() as usize, img.height() as usize);
    let samples = cfg.samples();
    let pixels = if samples == 1 { img.to_luma8().into_raw() } else { img.to_rgb8().into_raw() };

    // The engine may return a different size for edge tiles, copy the overlap
    let row_bytes = cfg.row_bytes();
    let copy = w.min(cfg.width) * samples;
    let mut data = vec![0; cfg.tile_bytes()];
    for y in 0..h.min(cfg.height) {
      data[y * row_bytes..y * row_bytes + copy].copy_from_slice(&pixels[y * w * samples..y * w * samples + copy]);
    }
    scatter_rows(cfg, &mut data, dst, offset, stride)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn gray_roundtrip_is_close() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let cfg = CodecConfig {
      width: 16,
      height: 16,
      jpeg_quality: 95,
      ..Default::default()
    };
    let data: Vec<u8> = (0..256).map(|i| ((i % 16) * 8) as u8).collect();
    let mut packed = Vec::new();
    JpegCodec.encode(&cfg, &data, 16, &mut packed)?;
    assert!(packed.starts_with(&SOI));
    let mut out = vec![0; 256];
    JpegCodec.decode(&cfg, &packed, &mut out, 0, 16)?;
    for (a, b) in data.iter().zip(out.iter()) {
      assert!((*a as i32 - *b as i32).abs() < 12);
    }
    Ok(())
  }

  #[test]
  fn splice() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let tables = [0xFF, 0xD8, 0xFF, 0xDB, 0x00, 0x02, 0xFF, 0xD9];
    let stream = [0xFF, 0xD8, 0xFF, 0xDA, 0xFF, 0xD9];
    assert_eq!(splice_tables(&tables, &stream), vec![0xFF, 0xD8, 0xFF, 0xDB, 0x00, 0x02, 0xFF, 0xDA, 0xFF, 0xD9]);
    Ok(())
  }

  #[test]
  fn rejects_16bit() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let cfg = CodecConfig {
      width: 2,
      height: 2,
      bits_per_sample: vec![16],
      ..Default::default()
    };
    let mut out = Vec::new();
    assert!(JpegCodec.encode(&cfg, &[0; 8], 4, &mut out).is_err());
    Ok(())
  }
}
