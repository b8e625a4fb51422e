// SPDX-License-Identifier: LGPL-2.1
// Copyright by image-tiff authors (see https://github.com/image-rs/image-tiff)
// Copyright 2021 Daniel Vogelbacher <daniel@chaospixel.com>

//! Static knowledge about known tags: numbers, names, legal
//! data types and the tag sets they belong to.

use std::collections::HashMap;

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

use crate::value::FieldType;

/// Tags below this bound are resolved through a dense table
const DENSE_BOUND: usize = 1024;

/// Bit mask with every type code set
pub const ANY_TYPE: u16 = 0b0011_1111_1111_1110;

/// Static description of a single tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagInfo {
  pub number: u16,
  pub name: &'static str,
  /// Bit mask of legal type codes (bit n = type code n)
  pub types: u16,
}

impl TagInfo {
  pub fn accepts(&self, typ: FieldType) -> bool {
    self.types & (1 << u16::from(typ)) != 0
  }

  /// A tag is a pointer to nested directories if it accepts the IFD type
  pub fn is_ifd_pointer(&self) -> bool {
    self.accepts(FieldType::Ifd)
  }
}

/// Marker trait for all tag enums, used by directory accessors
pub trait TiffTagEnum: Into<u16> + Copy {}

impl TiffTagEnum for u16 {}

macro_rules! tag_set {
  {
    // Permit arbitrary meta items, which include documentation.
    $( #[$enum_attr:meta] )*
    $vis:vis enum $name:ident in $table:ident {
      // Each of the `Name = Val: TYPE | TYPE,` permitting documentation.
      $($(#[$ident_attr:meta])* $tag:ident = $val:literal : $($ty:ident)|+,)*
    }
  } => {
    $( #[$enum_attr] )*
    #[derive(Clone, Copy, PartialEq, Eq, Debug, Hash, Serialize, Deserialize)]
    #[repr(u16)]
    $vis enum $name {
      $($(#[$ident_attr])* $tag = $val,)*
    }

    impl $name {
      #[inline(always)]
      pub fn from_u16(val: u16) -> Option<Self> {
        match val {
          $( $val => Some($name::$tag), )*
          _ => None,
        }
      }

      #[inline(always)]
      pub fn to_u16(&self) -> u16 {
        *self as u16
      }

      pub fn name(&self) -> &'static str {
        match self {
          $( $name::$tag => stringify!($tag), )*
        }
      }
    }

    impl From<$name> for u16 {
      fn from(tag: $name) -> u16 {
        tag.to_u16()
      }
    }

    impl TryFrom<u16> for $name {
      type Error = u16;

      fn try_from(val: u16) -> std::result::Result<Self, Self::Error> {
        Self::from_u16(val).ok_or(val)
      }
    }

    impl TiffTagEnum for $name {}

    $vis static $table: &[TagInfo] = &[
      $( TagInfo { number: $val, name: stringify!($tag), types: 0 $( | (1 << (FieldType::$ty as u16)) )+ }, )*
    ];
  };
}

// Note: These tags appear in the order they are mentioned in the TIFF reference
tag_set! {
  /// Baseline and extension TIFF tags
  pub enum TiffCommonTag in BASELINE_TAGS {
    NewSubFileType = 254: Long,
    SubFileType = 255: Short,
    ImageWidth = 256: Short | Long,
    ImageLength = 257: Short | Long,
    BitsPerSample = 258: Short,
    Compression = 259: Short,
    PhotometricInterpretation = 262: Short,
    Threshholding = 263: Short,
    CellWidth = 264: Short,
    CellLength = 265: Short,
    FillOrder = 266: Short,
    DocumentName = 269: Ascii,
    ImageDescription = 270: Ascii,
    Make = 271: Ascii,
    Model = 272: Ascii,
    StripOffsets = 273: Short | Long,
    Orientation = 274: Short,
    SamplesPerPixel = 277: Short,
    RowsPerStrip = 278: Short | Long,
    StripByteCounts = 279: Short | Long,
    MinSampleValue = 280: Short,
    MaxSampleValue = 281: Short,
    XResolution = 282: Rational,
    YResolution = 283: Rational,
    PlanarConfiguration = 284: Short,
    PageName = 285: Ascii,
    XPosition = 286: Rational,
    YPosition = 287: Rational,
    FreeOffsets = 288: Long,
    FreeByteCounts = 289: Long,
    GrayResponseUnit = 290: Short,
    GrayResponseCurve = 291: Short,
    T4Options = 292: Long,
    T6Options = 293: Long,
    ResolutionUnit = 296: Short,
    PageNumber = 297: Short,
    TransferFunction = 301: Short,
    Software = 305: Ascii,
    DateTime = 306: Ascii,
    Artist = 315: Ascii,
    HostComputer = 316: Ascii,
    Predictor = 317: Short,
    WhitePoint = 318: Rational,
    PrimaryChromaticities = 319: Rational,
    ColorMap = 320: Short,
    HalftoneHints = 321: Short,
    TileWidth = 322: Short | Long,
    TileLength = 323: Short | Long,
    TileOffsets = 324: Long,
    TileByteCounts = 325: Short | Long,
    SubIFDs = 330: Long | Ifd,
    InkSet = 332: Short,
    InkNames = 333: Ascii,
    NumberOfInks = 334: Short,
    DotRange = 336: Byte | Short,
    TargetPrinter = 337: Ascii,
    ExtraSamples = 338: Short,
    SampleFormat = 339: Short,
    SMinSampleValue = 340: Byte | Short | Long | SByte | SShort | SLong | Float | Double,
    SMaxSampleValue = 341: Byte | Short | Long | SByte | SShort | SLong | Float | Double,
    TransferRange = 342: Short,
    JPEGTables = 347: Undefined,
    JPEGProc = 512: Short,
    JPEGInterchangeFormat = 513: Long,
    JPEGInterchangeFormatLength = 514: Long,
    JPEGRestartInterval = 515: Short,
    JPEGLosslessPredictors = 517: Short,
    JPEGPointTransforms = 518: Short,
    JPEGQTables = 519: Long,
    JPEGDCTables = 520: Long,
    JPEGACTables = 521: Long,
    YCbCrCoefficients = 529: Rational,
    YCbCrSubSampling = 530: Short,
    YCbCrPositioning = 531: Short,
    ReferenceBlackWhite = 532: Rational,
    Copyright = 33432: Ascii,
    ExifIFDPointer = 34665: Long | Ifd,
    ICCProfile = 34675: Undefined,
    GPSInfoIFDPointer = 34853: Long | Ifd,
  }
}

tag_set! {
  /// EXIF private directory tags
  pub enum ExifTag in EXIF_TAGS {
    ExposureTime = 33434: Rational,
    FNumber = 33437: Rational,
    ExposureProgram = 34850: Short,
    SpectralSensitivity = 34852: Ascii,
    ISOSpeedRatings = 34855: Short,
    OECF = 34856: Undefined,
    ExifVersion = 36864: Undefined,
    DateTimeOriginal = 36867: Ascii,
    DateTimeDigitized = 36868: Ascii,
    ComponentsConfiguration = 37121: Undefined,
    CompressedBitsPerPixel = 37122: Rational,
    ShutterSpeedValue = 37377: SRational,
    ApertureValue = 37378: Rational,
    BrightnessValue = 37379: SRational,
    ExposureBiasValue = 37380: SRational,
    MaxApertureValue = 37381: Rational,
    SubjectDistance = 37382: Rational,
    MeteringMode = 37383: Short,
    LightSource = 37384: Short,
    Flash = 37385: Short,
    FocalLength = 37386: Rational,
    SubjectArea = 37396: Short,
    MakerNote = 37500: Undefined,
    UserComment = 37510: Undefined,
    SubSecTime = 37520: Ascii,
    SubSecTimeOriginal = 37521: Ascii,
    SubSecTimeDigitized = 37522: Ascii,
    FlashpixVersion = 40960: Undefined,
    ColorSpace = 40961: Short,
    PixelXDimension = 40962: Short | Long,
    PixelYDimension = 40963: Short | Long,
    RelatedSoundFile = 40964: Ascii,
    InteroperabilityIFDPointer = 40965: Long | Ifd,
    FlashEnergy = 41483: Rational,
    FocalPlaneXResolution = 41486: Rational,
    FocalPlaneYResolution = 41487: Rational,
    FocalPlaneResolutionUnit = 41488: Short,
    SubjectLocation = 41492: Short,
    ExposureIndex = 41493: Rational,
    SensingMethod = 41495: Short,
    FileSource = 41728: Undefined,
    SceneType = 41729: Undefined,
    CFAPattern = 41730: Undefined,
    CustomRendered = 41985: Short,
    ExposureMode = 41986: Short,
    WhiteBalance = 41987: Short,
    DigitalZoomRatio = 41988: Rational,
    FocalLengthIn35mmFilm = 41989: Short,
    SceneCaptureType = 41990: Short,
    GainControl = 41991: Short,
    Contrast = 41992: Short,
    Saturation = 41993: Short,
    Sharpness = 41994: Short,
    SubjectDistanceRange = 41996: Short,
    ImageUniqueID = 42016: Ascii,
  }
}

tag_set! {
  /// EXIF GPS directory tags
  pub enum GpsTag in GPS_TAGS {
    GPSVersionID = 0: Byte,
    GPSLatitudeRef = 1: Ascii,
    GPSLatitude = 2: Rational,
    GPSLongitudeRef = 3: Ascii,
    GPSLongitude = 4: Rational,
    GPSAltitudeRef = 5: Byte,
    GPSAltitude = 6: Rational,
    GPSTimeStamp = 7: Rational,
    GPSSatellites = 8: Ascii,
    GPSStatus = 9: Ascii,
    GPSMeasureMode = 10: Ascii,
    GPSDOP = 11: Rational,
    GPSSpeedRef = 12: Ascii,
    GPSSpeed = 13: Rational,
    GPSTrackRef = 14: Ascii,
    GPSTrack = 15: Rational,
    GPSImgDirectionRef = 16: Ascii,
    GPSImgDirection = 17: Rational,
    GPSMapDatum = 18: Ascii,
    GPSDestLatitudeRef = 19: Ascii,
    GPSDestLatitude = 20: Rational,
    GPSDestLongitudeRef = 21: Ascii,
    GPSDestLongitude = 22: Rational,
    GPSDestBearingRef = 23: Ascii,
    GPSDestBearing = 24: Rational,
    GPSDestDistanceRef = 25: Ascii,
    GPSDestDistance = 26: Rational,
    GPSProcessingMethod = 27: Undefined,
    GPSAreaInformation = 28: Undefined,
    GPSDateStamp = 29: Ascii,
    GPSDifferential = 30: Short,
  }
}

tag_set! {
  /// EXIF interoperability directory tags
  pub enum InteropTag in INTEROP_TAGS {
    InteroperabilityIndex = 1: Ascii,
    InteroperabilityVersion = 2: Undefined,
    RelatedImageFileFormat = 4096: Ascii,
    RelatedImageWidth = 4097: Short | Long,
    RelatedImageLength = 4098: Short | Long,
  }
}

/// Identifies one of the known tag sets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TagSetId {
  Baseline,
  Exif,
  Gps,
  Interop,
}

/// Precomputed lookup structure for one tag set
pub struct TagSet {
  pub id: TagSetId,
  pub name: &'static str,
  pub tags: &'static [TagInfo],
  dense: Vec<Option<usize>>,
  sparse: HashMap<u16, usize>,
}

impl TagSet {
  fn build(id: TagSetId, name: &'static str, tags: &'static [TagInfo]) -> Self {
    let mut dense = vec![None; DENSE_BOUND];
    let mut sparse = HashMap::new();
    for (i, info) in tags.iter().enumerate() {
      if (info.number as usize) < DENSE_BOUND {
        dense[info.number as usize] = Some(i);
      } else {
        sparse.insert(info.number, i);
      }
    }
    Self {
      id,
      name,
      tags,
      dense,
      sparse,
    }
  }

  pub fn get(&self, number: u16) -> Option<&'static TagInfo> {
    let idx = if (number as usize) < DENSE_BOUND {
      self.dense[number as usize]
    } else {
      self.sparse.get(&number).copied()
    };
    idx.map(|i| &self.tags[i])
  }
}

lazy_static! {
  static ref BASELINE_SET: TagSet = TagSet::build(TagSetId::Baseline, "Baseline", BASELINE_TAGS);
  static ref EXIF_SET: TagSet = TagSet::build(TagSetId::Exif, "EXIF", EXIF_TAGS);
  static ref GPS_SET: TagSet = TagSet::build(TagSetId::Gps, "GPS", GPS_TAGS);
  static ref INTEROP_SET: TagSet = TagSet::build(TagSetId::Interop, "Interoperability", INTEROP_TAGS);
}

impl TagSetId {
  pub fn set(&self) -> &'static TagSet {
    match self {
      Self::Baseline => &BASELINE_SET,
      Self::Exif => &EXIF_SET,
      Self::Gps => &GPS_SET,
      Self::Interop => &INTEROP_SET,
    }
  }

  pub fn get(&self, number: u16) -> Option<&'static TagInfo> {
    self.set().get(number)
  }
}

/// Tag sets for the directory a pointer tag refers to
pub fn child_tag_sets(pointer: u16) -> Option<Vec<TagSetId>> {
  match pointer {
    34665 => Some(vec![TagSetId::Exif]),
    34853 => Some(vec![TagSetId::Gps]),
    40965 => Some(vec![TagSetId::Interop]),
    330 => Some(vec![TagSetId::Baseline]),
    _ => None,
  }
}

/// A resolved tag: either a registered one or the placeholder
/// for an unknown number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagDescriptor {
  Known(&'static TagInfo),
  Unknown(u16),
}

impl TagDescriptor {
  pub fn number(&self) -> u16 {
    match self {
      Self::Known(info) => info.number,
      Self::Unknown(n) => *n,
    }
  }

  pub fn name(&self) -> String {
    match self {
      Self::Known(info) => info.name.to_string(),
      Self::Unknown(n) => format!("Tag{}", n),
    }
  }

  pub fn accepts(&self, typ: FieldType) -> bool {
    match self {
      Self::Known(info) => info.accepts(typ),
      Self::Unknown(_) => true,
    }
  }

  pub fn is_known(&self) -> bool {
    matches!(self, Self::Known(_))
  }
}

/// Resolve a tag number against a list of tag sets, first match wins.
pub fn resolve(sets: &[TagSetId], number: u16) -> TagDescriptor {
  sets
    .iter()
    .find_map(|set| set.get(number))
    .map(TagDescriptor::Known)
    .unwrap_or(TagDescriptor::Unknown(number))
}

/// Baseline tags are mandatory for image decoding, truncation
/// while reading them is fatal.
pub fn is_baseline(number: u16) -> bool {
  TagSetId::Baseline.get(number).is_some()
}
