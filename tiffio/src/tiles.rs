// SPDX-License-Identifier: LGPL-2.1
// Copyright 2021 Daniel Vogelbacher <daniel@chaospixel.com>

//! Tile and strip geometry.
//!
//! Strips are treated as tiles spanning the full image width. Tiles at
//! the right and bottom border are padded to the full tile size, the
//! last strip is clipped to the image height.

use std::ops::RangeInclusive;

use log::warn;

use crate::{IFD, PlanarConfiguration, Result, TiffError};

/// Largest integer not greater than `num / den`, for `den > 0`
#[inline]
pub fn ifloor(num: i64, den: i64) -> i64 {
  if num < 0 { -((-num + den - 1) / den) } else { num / den }
}

/// Smallest integer not less than `num / den`, for `den > 0`
#[inline]
pub fn iceil(num: i64, den: i64) -> i64 {
  if num <= 0 { -((-num) / den) } else { (num + den - 1) / den }
}

/// Index of the tile containing coordinate `x` of a grid starting at `origin`
#[inline]
pub fn x_to_tile(x: i64, origin: i64, tile_width: i64) -> i64 {
  ifloor(x - origin, tile_width)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Rect {
  pub x: i64,
  pub y: i64,
  pub width: i64,
  pub height: i64,
}

impl Rect {
  pub fn new(x: i64, y: i64, width: i64, height: i64) -> Self {
    Self { x, y, width, height }
  }

  pub fn with_size(width: usize, height: usize) -> Self {
    Self::new(0, 0, width as i64, height as i64)
  }

  pub fn right(&self) -> i64 {
    self.x + self.width
  }

  pub fn bottom(&self) -> i64 {
    self.y + self.height
  }

  pub fn is_empty(&self) -> bool {
    self.width <= 0 || self.height <= 0
  }

  pub fn contains(&self, x: i64, y: i64) -> bool {
    x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
  }

  /// Common area, empty rects keep their position but have zero size
  pub fn intersect(&self, other: &Rect) -> Rect {
    let x = self.x.max(other.x);
    let y = self.y.max(other.y);
    let right = self.right().min(other.right());
    let bottom = self.bottom().min(other.bottom());
    Rect::new(x, y, (right - x).max(0), (bottom - y).max(0))
  }
}

/// Subsampling grid: every `x_period`-th column starting at `x_offset`
/// (relative to the source region), the same for rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subsampling {
  pub x_period: u32,
  pub y_period: u32,
  pub x_offset: u32,
  pub y_offset: u32,
}

impl Default for Subsampling {
  fn default() -> Self {
    Self {
      x_period: 1,
      y_period: 1,
      x_offset: 0,
      y_offset: 0,
    }
  }
}

impl Subsampling {
  pub fn new(x_period: u32, y_period: u32) -> Self {
    Self {
      x_period,
      y_period,
      ..Default::default()
    }
  }

  pub fn is_identity(&self) -> bool {
    self.x_period == 1 && self.y_period == 1 && self.x_offset == 0 && self.y_offset == 0
  }

  pub fn validate(&self) -> Result<()> {
    if self.x_period == 0 || self.y_period == 0 {
      return Err(TiffError::IllegalArgument(format!(
        "Subsampling periods must be positive, got {}x{}",
        self.x_period, self.y_period
      )));
    }
    if self.x_offset >= self.x_period || self.y_offset >= self.y_period {
      return Err(TiffError::IllegalArgument("Subsampling offset must be less than the period".into()));
    }
    Ok(())
  }
}

/// Mapping between source pixels and destination pixels.
///
/// Destination pixel `(dx, dy)` takes the source sample at
/// `(origin_x + (dx - dst_x) * period_x, origin_y + (dy - dst_y) * period_y)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionMap {
  pub origin_x: i64,
  pub origin_y: i64,
  pub period_x: i64,
  pub period_y: i64,
  pub dst_x: i64,
  pub dst_y: i64,
}

impl RegionMap {
  pub fn new(source_region: &Rect, sub: &Subsampling, dst_offset: (i64, i64)) -> Self {
    Self {
      origin_x: source_region.x + sub.x_offset as i64,
      origin_y: source_region.y + sub.y_offset as i64,
      period_x: sub.x_period.max(1) as i64,
      period_y: sub.y_period.max(1) as i64,
      dst_x: dst_offset.0,
      dst_y: dst_offset.1,
    }
  }

  pub fn identity() -> Self {
    Self::new(&Rect::default(), &Subsampling::default(), (0, 0))
  }

  #[inline]
  pub fn source_x(&self, dx: i64) -> i64 {
    self.origin_x + (dx - self.dst_x) * self.period_x
  }

  #[inline]
  pub fn source_y(&self, dy: i64) -> i64 {
    self.origin_y + (dy - self.dst_y) * self.period_y
  }

  /// Destination pixels whose source sample lies inside `src`
  pub fn forward(&self, src: &Rect) -> Rect {
    let x0 = iceil(src.x - self.origin_x, self.period_x) + self.dst_x;
    let x1 = iceil(src.right() - self.origin_x, self.period_x) + self.dst_x;
    let y0 = iceil(src.y - self.origin_y, self.period_y) + self.dst_y;
    let y1 = iceil(src.bottom() - self.origin_y, self.period_y) + self.dst_y;
    Rect::new(x0, y0, (x1 - x0).max(0), (y1 - y0).max(0))
  }

  /// Smallest source rectangle holding all samples of `dst`
  pub fn backward(&self, dst: &Rect) -> Rect {
    if dst.is_empty() {
      return Rect::new(self.source_x(dst.x), self.source_y(dst.y), 0, 0);
    }
    let x0 = self.source_x(dst.x);
    let y0 = self.source_y(dst.y);
    let x1 = self.source_x(dst.right() - 1);
    let y1 = self.source_y(dst.bottom() - 1);
    Rect::new(x0, y0, x1 - x0 + 1, y1 - y0 + 1)
  }
}

/// Layout of the strips or tiles of one image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGrid {
  pub image_width: usize,
  pub image_height: usize,
  pub tile_width: usize,
  pub tile_height: usize,
  pub tiled: bool,
  pub planar: PlanarConfiguration,
  pub bands: usize,
}

impl TileGrid {
  pub fn new_strips(width: usize, height: usize, rows_per_strip: usize, planar: PlanarConfiguration, bands: usize) -> Result<Self> {
    Self::check_image(width, height)?;
    Ok(Self {
      image_width: width,
      image_height: height,
      tile_width: width,
      tile_height: rows_per_strip.clamp(1, height),
      tiled: false,
      planar,
      bands: bands.max(1),
    })
  }

  pub fn new_tiles(width: usize, height: usize, tile_width: usize, tile_height: usize, planar: PlanarConfiguration, bands: usize) -> Result<Self> {
    Self::check_image(width, height)?;
    if tile_width == 0 || tile_height == 0 {
      return Err(TiffError::IllegalArgument(format!("Invalid tile size {}x{}", tile_width, tile_height)));
    }
    Ok(Self {
      image_width: width,
      image_height: height,
      tile_width,
      tile_height,
      tiled: true,
      planar,
      bands: bands.max(1),
    })
  }

  fn check_image(width: usize, height: usize) -> Result<()> {
    if width == 0 || height == 0 {
      return Err(TiffError::IllegalArgument(format!("Invalid image size {}x{}", width, height)));
    }
    Ok(())
  }

  /// Grid of an existing directory. A Planar configuration whose
  /// offsets array only covers one plane is reset to Chunky.
  pub fn from_ifd(ifd: &IFD) -> Result<Self> {
    let width = ifd.width()? as usize;
    let height = ifd.height()? as usize;
    let bands = ifd.samples_per_pixel()? as usize;
    let (tw, th) = ifd.tile_size()?;
    let mut planar = ifd.planar_config()?;
    let mut grid = if ifd.is_tiled() {
      Self::new_tiles(width, height, tw as usize, th as usize, planar, bands)?
    } else {
      Self::new_strips(width, height, th as usize, planar, bands)?
    };
    if planar == PlanarConfiguration::Planar && bands > 1 {
      let offsets = ifd.data_offsets()?.len();
      if offsets == grid.tiles_per_image() {
        warn!(
          "PlanarConfiguration Planar is inconsistent with {} data offsets for {} bands, reset to Chunky",
          offsets, bands
        );
        planar = PlanarConfiguration::Chunky;
        grid.planar = planar;
      }
    }
    Ok(grid)
  }

  pub fn is_planar(&self) -> bool {
    self.planar == PlanarConfiguration::Planar && self.bands > 1
  }

  /// Number of separately stored planes
  pub fn planes(&self) -> usize {
    if self.is_planar() { self.bands } else { 1 }
  }

  /// Samples per pixel inside a single tile buffer
  pub fn samples_per_tile_pixel(&self) -> usize {
    if self.is_planar() { 1 } else { self.bands }
  }

  pub fn tiles_across(&self) -> usize {
    self.image_width.div_ceil(self.tile_width)
  }

  pub fn tiles_down(&self) -> usize {
    self.image_height.div_ceil(self.tile_height)
  }

  pub fn tiles_per_image(&self) -> usize {
    self.tiles_across() * self.tiles_down()
  }

  /// Total number of offsets and byte counts
  pub fn tile_count(&self) -> usize {
    self.tiles_per_image() * self.planes()
  }

  pub fn index(&self, col: usize, row: usize, plane: usize) -> usize {
    plane * self.tiles_per_image() + row * self.tiles_across() + col
  }

  /// Inverse of [`TileGrid::index`]: (col, row, plane)
  pub fn position(&self, index: usize) -> (usize, usize, usize) {
    let per_image = self.tiles_per_image();
    let plane = index / per_image;
    let rem = index % per_image;
    (rem % self.tiles_across(), rem / self.tiles_across(), plane)
  }

  /// Area covered by a tile or strip in image coordinates, clipped to the image
  pub fn tile_rect(&self, col: usize, row: usize) -> Rect {
    let r = Rect::new(
      (col * self.tile_width) as i64,
      (row * self.tile_height) as i64,
      self.tile_width as i64,
      self.tile_height as i64,
    );
    r.intersect(&self.image_rect())
  }

  pub fn image_rect(&self) -> Rect {
    Rect::with_size(self.image_width, self.image_height)
  }

  /// Width and height of the uncompressed buffer of a tile or strip
  pub fn encoded_size(&self, row: usize) -> (usize, usize) {
    if self.tiled {
      (self.tile_width, self.tile_height)
    } else {
      let rows = self.tile_height.min(self.image_height - row * self.tile_height);
      (self.image_width, rows)
    }
  }

  /// Column and row ranges of tiles touching `rect`, None if `rect`
  /// lies outside the image.
  pub fn tile_range(&self, rect: &Rect) -> Option<(RangeInclusive<usize>, RangeInclusive<usize>)> {
    let r = rect.intersect(&self.image_rect());
    if r.is_empty() {
      return None;
    }
    let c0 = x_to_tile(r.x, 0, self.tile_width as i64) as usize;
    let c1 = x_to_tile(r.right() - 1, 0, self.tile_width as i64) as usize;
    let r0 = x_to_tile(r.y, 0, self.tile_height as i64) as usize;
    let r1 = x_to_tile(r.bottom() - 1, 0, self.tile_height as i64) as usize;
    Some((c0..=c1, r0..=r1))
  }

  /// Tile (col, row) holding pixel `(x, y)`
  pub fn tile_of(&self, x: i64, y: i64) -> Option<(usize, usize)> {
    if !self.image_rect().contains(x, y) {
      return None;
    }
    Some((
      x_to_tile(x, 0, self.tile_width as i64) as usize,
      x_to_tile(y, 0, self.tile_height as i64) as usize,
    ))
  }

  /// Check an offsets or byte counts array against the grid
  pub fn check_count(&self, len: usize) -> Result<()> {
    if len != self.tile_count() {
      return Err(TiffError::General(format!(
        "Expected {} strip/tile entries, found {}",
        self.tile_count(),
        len
      )));
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use proptest::prelude::*;

  use super::*;
  use crate::tags::TiffCommonTag;

  #[test]
  fn floor_and_ceil_division() -> std::result::Result<(), Box<dyn std::error::Error>> {
    assert_eq!(ifloor(7, 4), 1);
    assert_eq!(ifloor(-1, 4), -1);
    assert_eq!(ifloor(-4, 4), -1);
    assert_eq!(ifloor(-5, 4), -2);
    assert_eq!(iceil(7, 4), 2);
    assert_eq!(iceil(8, 4), 2);
    assert_eq!(iceil(-1, 4), 0);
    assert_eq!(iceil(-5, 4), -1);
    assert_eq!(iceil(0, 4), 0);
    Ok(())
  }

  #[test]
  fn strips_are_clipped() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let grid = TileGrid::new_strips(10, 10, 4, PlanarConfiguration::Chunky, 3)?;
    assert_eq!(grid.tile_count(), 3);
    assert_eq!(grid.encoded_size(2), (10, 2));
    assert_eq!(grid.tile_rect(0, 2), Rect::new(0, 8, 10, 2));
    Ok(())
  }

  #[test]
  fn planar_tiles_are_band_major() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let grid = TileGrid::new_tiles(40, 20, 16, 16, PlanarConfiguration::Planar, 3)?;
    assert_eq!(grid.tiles_across(), 3);
    assert_eq!(grid.tiles_down(), 2);
    assert_eq!(grid.tile_count(), 18);
    assert_eq!(grid.index(1, 1, 2), 2 * 6 + 3 + 1);
    assert_eq!(grid.position(16), (1, 1, 2));
    assert_eq!(grid.encoded_size(1), (16, 16));
    assert_eq!(grid.tile_rect(2, 1), Rect::new(32, 16, 8, 4));
    Ok(())
  }

  #[test]
  fn tile_range_of_region() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let grid = TileGrid::new_tiles(64, 64, 16, 16, PlanarConfiguration::Chunky, 1)?;
    let (cols, rows) = grid.tile_range(&Rect::new(15, 16, 2, 17)).ok_or("empty")?;
    assert_eq!(cols, 0..=1);
    assert_eq!(rows, 1..=2);
    assert!(grid.tile_range(&Rect::new(-10, -10, 5, 5)).is_none());
    Ok(())
  }

  #[test]
  fn subsampled_mapping() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let map = RegionMap::new(&Rect::new(0, 0, 5, 5), &Subsampling::new(2, 2), (0, 0));
    // samples at 0, 2, 4
    assert_eq!(map.forward(&Rect::new(0, 0, 5, 5)), Rect::new(0, 0, 3, 3));
    assert_eq!(map.forward(&Rect::new(1, 1, 1, 1)), Rect::new(1, 1, 0, 0));
    assert_eq!(map.backward(&Rect::new(1, 0, 2, 1)), Rect::new(2, 0, 3, 1));
    Ok(())
  }

  #[test]
  fn planar_self_heal() -> std::result::Result<(), Box<dyn std::error::Error>> {
    crate::init_test_logger();
    let mut ifd = IFD::default();
    ifd.add_tag(TiffCommonTag::ImageWidth, 8_u32);
    ifd.add_tag(TiffCommonTag::ImageLength, 8_u32);
    ifd.add_tag(TiffCommonTag::SamplesPerPixel, 3_u16);
    ifd.add_tag(TiffCommonTag::RowsPerStrip, 4_u32);
    ifd.add_tag(TiffCommonTag::PlanarConfiguration, PlanarConfiguration::Planar);
    ifd.add_tag(TiffCommonTag::StripOffsets, [0_u32, 0]);
    assert_eq!(TileGrid::from_ifd(&ifd)?.planar, PlanarConfiguration::Chunky);

    ifd.add_tag(TiffCommonTag::StripOffsets, [0_u32; 6]);
    assert_eq!(TileGrid::from_ifd(&ifd)?.planar, PlanarConfiguration::Planar);
    Ok(())
  }

  proptest! {
    #[test]
    fn tile_addressing_is_bijective(tw in 1_usize..40, th in 1_usize..40, w in 1_usize..120, h in 1_usize..120, tiled: bool) {
      let grid = if tiled {
        TileGrid::new_tiles(w, h, tw, th, PlanarConfiguration::Planar, 2).map_err(|e| TestCaseError::fail(e.to_string()))?
      } else {
        TileGrid::new_strips(w, h, th, PlanarConfiguration::Planar, 2).map_err(|e| TestCaseError::fail(e.to_string()))?
      };
      let mut covered = vec![0_u8; w * h];
      for index in 0..grid.tile_count() {
        let (col, row, plane) = grid.position(index);
        prop_assert_eq!(grid.index(col, row, plane), index);
        if plane != 0 {
          continue;
        }
        let rect = grid.tile_rect(col, row);
        prop_assert!(!rect.is_empty());
        for y in rect.y..rect.bottom() {
          for x in rect.x..rect.right() {
            covered[y as usize * w + x as usize] += 1;
            prop_assert_eq!(grid.tile_of(x, y), Some((col, row)));
          }
        }
      }
      prop_assert!(covered.iter().all(|c| *c == 1));
    }

    #[test]
    fn forward_and_backward_mapping_agree(
      sx in -20_i64..20, sy in -20_i64..20, sw in 1_i64..40, sh in 1_i64..40,
      px in 1_u32..5, py in 1_u32..5, ox in 0_u32..5, oy in 0_u32..5,
      dx in -5_i64..5, dy in -5_i64..5,
    ) {
      let sub = Subsampling { x_period: px, y_period: py, x_offset: ox % px, y_offset: oy % py };
      let region = Rect::new(sx, sy, sw, sh);
      let map = RegionMap::new(&region, &sub, (dx, dy));
      let dst = map.forward(&region);
      if !dst.is_empty() {
        let back = map.backward(&dst);
        // Every mapped sample lies in the source region
        prop_assert_eq!(back.intersect(&region), back);
        // Mapping the covering source back yields the same destination
        prop_assert_eq!(map.forward(&back), dst);
      }
    }
  }
}
