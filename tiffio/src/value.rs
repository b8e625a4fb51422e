// SPDX-License-Identifier: MIT
// Copyright 2021 Daniel Vogelbacher <daniel@chaospixel.com>

use std::fmt::Display;

use itertools::Itertools;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{
  Result, TiffError,
  ifd::IFD,
  writer::{EndianWriter, WriteAndSeek},
};

/// TIFF field data types as stored in the type slot of a directory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, num_enum::TryFromPrimitive, num_enum::IntoPrimitive)]
#[repr(u16)]
pub enum FieldType {
  Byte = 1,
  Ascii = 2,
  Short = 3,
  Long = 4,
  Rational = 5,
  SByte = 6,
  Undefined = 7,
  SShort = 8,
  SLong = 9,
  SRational = 10,
  Float = 11,
  Double = 12,
  /// Offset to a nested directory, 32 bit wide
  Ifd = 13,
}

// 0-1-2-3-4-5-6-7-8-9-10-11-12-13
const TYPE_SIZES: [usize; 14] = [0, 1, 1, 2, 4, 8, 1, 1, 2, 4, 8, 4, 8, 4];

impl FieldType {
  /// Size in bytes of a single element
  pub fn size(&self) -> usize {
    TYPE_SIZES[*self as usize]
  }

  /// Resolve a type code read from a stream. Codes outside of the
  /// known range fall back to `Undefined`.
  pub fn from_code_lossy(code: u16) -> Self {
    Self::try_from(code).unwrap_or(Self::Undefined)
  }

  pub fn name(&self) -> &'static str {
    match self {
      Self::Byte => "BYTE",
      Self::Ascii => "ASCII",
      Self::Short => "SHORT",
      Self::Long => "LONG",
      Self::Rational => "RATIONAL",
      Self::SByte => "SBYTE",
      Self::Undefined => "UNDEF",
      Self::SShort => "SSHORT",
      Self::SLong => "SLONG",
      Self::SRational => "SRATIONAL",
      Self::Float => "FLOAT",
      Self::Double => "DOUBLE",
      Self::Ifd => "IFD",
    }
  }
}

/// Type to represent tiff values of type `RATIONAL`
#[derive(Clone, Debug, Default, PartialEq, Copy)]
pub struct Rational {
  pub n: u32,
  pub d: u32,
}

impl Display for Rational {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_fmt(format_args!("{}/{}", self.n, self.d))
  }
}

impl Display for SRational {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_fmt(format_args!("{}/{}", self.n, self.d))
  }
}

impl From<Rational> for f32 {
  fn from(v: Rational) -> Self {
    (v.n as f32) / (v.d as f32)
  }
}

impl From<SRational> for f32 {
  fn from(v: SRational) -> Self {
    (v.n as f32) / (v.d as f32)
  }
}

impl Rational {
  pub fn new(n: u32, d: u32) -> Self {
    Self { n, d }
  }

  pub fn new_f32(n: f32, d: u32) -> Self {
    Self { n: (n * d as f32) as u32, d }
  }
}

impl Serialize for Rational {
  fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
  where
    S: Serializer,
  {
    let s = format!("{}/{}", self.n, self.d);
    serializer.serialize_str(&s)
  }
}

impl<'de> Deserialize<'de> for Rational {
  fn deserialize<D>(deserializer: D) -> std::result::Result<Rational, D::Error>
  where
    D: Deserializer<'de>,
  {
    use serde::de::Error;
    let s = String::deserialize(deserializer)?;
    let values: Vec<&str> = s.split('/').collect();
    if values.len() != 2 {
      Err(D::Error::custom(format!("Invalid rational value: {}", s)))
    } else {
      Ok(Rational::new(
        values[0].parse::<u32>().map_err(D::Error::custom)?,
        values[1].parse::<u32>().map_err(D::Error::custom)?,
      ))
    }
  }
}

/// Type to represent tiff values of type `SRATIONAL`
#[derive(Clone, Debug, Default, PartialEq, Copy)]
pub struct SRational {
  pub n: i32,
  pub d: i32,
}

impl SRational {
  pub fn new(n: i32, d: i32) -> Self {
    Self { n, d }
  }
}

impl Serialize for SRational {
  fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
  where
    S: Serializer,
  {
    let s = format!("{}/{}", self.n, self.d);
    serializer.serialize_str(&s)
  }
}

impl<'de> Deserialize<'de> for SRational {
  fn deserialize<D>(deserializer: D) -> std::result::Result<SRational, D::Error>
  where
    D: Deserializer<'de>,
  {
    use serde::de::Error;
    let s = String::deserialize(deserializer)?;
    let values: Vec<&str> = s.split('/').collect();
    if values.len() != 2 {
      Err(D::Error::custom(format!("Invalid srational value: {}", s)))
    } else {
      Ok(SRational::new(
        values[0].parse::<i32>().map_err(D::Error::custom)?,
        values[1].parse::<i32>().map_err(D::Error::custom)?,
      ))
    }
  }
}

/// Nested directories referenced by a pointer field.
///
/// `as_long` remembers whether the pointer was declared as `LONG`
/// (e.g. classic EXIF pointers) or with the dedicated `IFD` type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IfdValue {
  pub ifds: Vec<IFD>,
  pub as_long: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
  /// 8-bit unsigned integer
  Byte(Vec<u8>),
  /// 8-bit byte that contains a 7-bit ASCII code; the last byte must be zero
  Ascii(TiffAscii),
  /// 16-bit unsigned integer
  Short(Vec<u16>),
  /// 32-bit unsigned integer
  Long(Vec<u32>),
  /// Fraction stored as two 32-bit unsigned integers
  Rational(Vec<Rational>),
  /// 8-bit signed integer
  SByte(Vec<i8>),
  /// 8-bit byte that may contain anything, depending on the field
  Undefined(Vec<u8>),
  /// 16-bit signed integer
  SShort(Vec<i16>),
  /// 32-bit signed integer
  SLong(Vec<i32>),
  /// Fraction stored as two 32-bit signed integers
  SRational(Vec<SRational>),
  /// 32-bit IEEE floating point
  Float(Vec<f32>),
  /// 64-bit IEEE floating point
  Double(Vec<f64>),
  /// One or more nested directories
  Ifd(IfdValue),
}

impl Value {
  pub fn as_string(&self) -> Option<&String> {
    match self {
      Self::Ascii(v) => v.strings().first(),
      _ => None,
    }
  }

  pub fn get_usize(&self, idx: usize) -> Result<Option<usize>> {
    Ok(self.get_u32(idx)?.map(|v| v as usize))
  }

  pub fn get_u16(&self, idx: usize) -> Result<Option<u16>> {
    match self {
      Value::Byte(v) => Ok(v.get(idx).map(ToOwned::to_owned).map(Into::into)),
      Value::Short(v) => Ok(v.get(idx).map(ToOwned::to_owned)),
      Value::Long(v) => Ok(v.get(idx).map(ToOwned::to_owned).map(|v| v as u16)),
      Value::SByte(v) => Ok(v.get(idx).map(ToOwned::to_owned).map(|v| v as u16)),
      Value::SShort(v) => Ok(v.get(idx).map(ToOwned::to_owned).map(|v| v as u16)),
      Value::SLong(v) => Ok(v.get(idx).map(ToOwned::to_owned).map(|v| v as u16)),
      _ => Err(TiffError::General(format!("Can not use get_u16() for tiff entry value {}", self.value_type_name()))),
    }
  }

  pub fn get_u32(&self, idx: usize) -> Result<Option<u32>> {
    match self {
      Value::Byte(v) => Ok(v.get(idx).map(ToOwned::to_owned).map(Into::into)),
      Value::Short(v) => Ok(v.get(idx).map(ToOwned::to_owned).map(Into::into)),
      Value::Long(v) => Ok(v.get(idx).map(ToOwned::to_owned)),
      Value::SByte(v) => Ok(v.get(idx).map(ToOwned::to_owned).map(|v| v as u32)),
      Value::SShort(v) => Ok(v.get(idx).map(ToOwned::to_owned).map(|v| v as u32)),
      Value::SLong(v) => Ok(v.get(idx).map(ToOwned::to_owned).map(|v| v as u32)),
      _ => Err(TiffError::General(format!("Can not use get_u32() for tiff entry value {}", self.value_type_name()))),
    }
  }

  pub fn get_f32(&self, idx: usize) -> Result<Option<f32>> {
    match self {
      Value::Byte(v) => Ok(v.get(idx).map(ToOwned::to_owned).map(|v| v as f32)),
      Value::Short(v) => Ok(v.get(idx).map(ToOwned::to_owned).map(|v| v as f32)),
      Value::Long(v) => Ok(v.get(idx).map(ToOwned::to_owned).map(|v| v as f32)),
      Value::Rational(v) => Ok(v.get(idx).map(ToOwned::to_owned).map(Into::into)),
      Value::SByte(v) => Ok(v.get(idx).map(ToOwned::to_owned).map(|v| v as f32)),
      Value::SShort(v) => Ok(v.get(idx).map(ToOwned::to_owned).map(|v| v as f32)),
      Value::SLong(v) => Ok(v.get(idx).map(ToOwned::to_owned).map(|v| v as f32)),
      Value::SRational(v) => Ok(v.get(idx).map(ToOwned::to_owned).map(Into::into)),
      Value::Float(v) => Ok(v.get(idx).map(ToOwned::to_owned)),
      Value::Double(v) => Ok(v.get(idx).map(ToOwned::to_owned).map(|v| v as f32)),
      _ => Err(TiffError::General(format!("Can not use get_f32() for tiff entry value {}", self.value_type_name()))),
    }
  }

  /// All elements widened to `u32`, for integer typed values
  pub fn to_u32_vec(&self) -> Result<Vec<u32>> {
    (0..self.count())
      .map(|i| self.get_u32(i).map(|v| v.unwrap_or_default()))
      .collect()
  }

  /// All elements narrowed to `u16`, for integer typed values
  pub fn to_u16_vec(&self) -> Result<Vec<u16>> {
    (0..self.count())
      .map(|i| self.get_u16(i).map(|v| v.unwrap_or_default()))
      .collect()
  }

  pub fn visual_rep(&self, limit: usize) -> String {
    fn join<T: Display>(v: &[T], limit: usize) -> String {
      v.iter().take(limit).join(" ")
    }
    match self {
      Value::Byte(v) | Value::Undefined(v) => v.iter().take(limit).map(|a| format!("{:X}", a)).join(" "),
      Value::Short(v) => join(v, limit),
      Value::Long(v) => join(v, limit),
      Value::Rational(v) => join(v, limit),
      Value::SByte(v) => join(v, limit),
      Value::SShort(v) => join(v, limit),
      Value::SLong(v) => join(v, limit),
      Value::SRational(v) => join(v, limit),
      Value::Float(v) => join(v, limit),
      Value::Double(v) => join(v, limit),
      Value::Ascii(v) => v.strings().join(" | "),
      Value::Ifd(v) => format!("<{} sub IFD(s)>", v.ifds.len()),
    }
  }

  /// Number of elements as written into the count slot.
  /// ASCII values count bytes including all NUL terminators.
  pub fn count(&self) -> usize {
    match self {
      Self::Byte(v) => v.len(),
      Self::Ascii(v) => v.count(),
      Self::Short(v) => v.len(),
      Self::Long(v) => v.len(),
      Self::Rational(v) => v.len(),
      Self::SByte(v) => v.len(),
      Self::Undefined(v) => v.len(),
      Self::SShort(v) => v.len(),
      Self::SLong(v) => v.len(),
      Self::SRational(v) => v.len(),
      Self::Float(v) => v.len(),
      Self::Double(v) => v.len(),
      Self::Ifd(v) => v.ifds.len(),
    }
  }

  pub fn byte_size(&self) -> usize {
    self.count() * self.field_type().size()
  }

  pub fn field_type(&self) -> FieldType {
    match self {
      Self::Byte(_) => FieldType::Byte,
      Self::Ascii(_) => FieldType::Ascii,
      Self::Short(_) => FieldType::Short,
      Self::Long(_) => FieldType::Long,
      Self::Rational(_) => FieldType::Rational,
      Self::SByte(_) => FieldType::SByte,
      Self::Undefined(_) => FieldType::Undefined,
      Self::SShort(_) => FieldType::SShort,
      Self::SLong(_) => FieldType::SLong,
      Self::SRational(_) => FieldType::SRational,
      Self::Float(_) => FieldType::Float,
      Self::Double(_) => FieldType::Double,
      Self::Ifd(v) => {
        if v.as_long {
          FieldType::Long
        } else {
          FieldType::Ifd
        }
      }
    }
  }

  pub fn value_type(&self) -> u16 {
    self.field_type().into()
  }

  pub fn value_type_name(&self) -> &'static str {
    self.field_type().name()
  }

  pub fn is_ifd(&self) -> bool {
    matches!(self, Self::Ifd(_))
  }

  /// Write the raw value data. Nested directories are laid out by the
  /// directory writer and can't be written as plain values.
  pub fn write<W: WriteAndSeek>(&self, w: &mut EndianWriter<W>) -> Result<()> {
    match self {
      Self::Byte(val) | Self::Undefined(val) => {
        w.write_all(val)?;
      }
      Self::Ascii(val) => {
        w.write_all(&val.as_vec_with_nul())?;
      }
      Self::Short(val) => {
        for x in val {
          w.write_u16(*x)?;
        }
      }
      Self::Long(val) => {
        for x in val {
          w.write_u32(*x)?;
        }
      }
      Self::Rational(val) => {
        for x in val {
          w.write_u32(x.n)?;
          w.write_u32(x.d)?;
        }
      }
      Self::SByte(val) => {
        for x in val {
          w.write_all(&[*x as u8])?;
        }
      }
      Self::SShort(val) => {
        for x in val {
          w.write_u16(*x as u16)?;
        }
      }
      Self::SLong(val) => {
        for x in val {
          w.write_u32(*x as u32)?;
        }
      }
      Self::SRational(val) => {
        for x in val {
          w.write_u32(x.n as u32)?;
          w.write_u32(x.d as u32)?;
        }
      }
      Self::Float(val) => {
        for x in val {
          w.write_u32(x.to_bits())?;
        }
      }
      Self::Double(val) => {
        for x in val {
          w.write_u64(x.to_bits())?;
        }
      }
      Self::Ifd(_) => {
        return Err(TiffError::General("IFD values must be written by the directory writer".into()));
      }
    }
    Ok(())
  }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TiffAscii {
  strings: Vec<String>,
}

impl TiffAscii {
  pub fn new<T: AsRef<str>>(value: T) -> Self {
    Self {
      strings: vec![String::from(value.as_ref())],
    }
  }

  pub fn new_from_vec(values: Vec<String>) -> Self {
    Self { strings: values }
  }

  pub fn strings(&self) -> &Vec<String> {
    &self.strings
  }

  pub fn first(&self) -> Option<&String> {
    self.strings.first()
  }

  /// Byte count including one NUL per string
  pub fn count(&self) -> usize {
    self.strings.iter().map(|s| s.len() + 1).sum::<usize>()
  }

  pub fn as_vec_with_nul(&self) -> Vec<u8> {
    let mut out = Vec::with_capacity(self.count());
    for s in &self.strings {
      // Interior NULs would split the string on the next read
      out.extend(s.bytes().filter(|c| *c != 0));
      out.push(0);
    }
    out
  }

  /// Split raw field data into its NUL terminated strings. A value
  /// consisting only of NULs yields a single empty string, trailing
  /// data without terminator becomes the last string.
  pub fn new_from_raw(raw: &[u8]) -> Self {
    let mut strings = Vec::new();
    let mut start = 0;
    for (i, c) in raw.iter().enumerate() {
      if *c == 0 {
        if i > start {
          strings.push(String::from_utf8_lossy(&raw[start..i]).into_owned());
        }
        start = i + 1;
      }
    }
    if start < raw.len() {
      strings.push(String::from_utf8_lossy(&raw[start..]).into_owned());
    }
    if strings.is_empty() {
      strings.push(String::new());
    }
    Self { strings }
  }
}

macro_rules! value_from {
  ($ty:ty, $variant:ident) => {
    impl From<$ty> for Value {
      fn from(value: $ty) -> Self {
        Value::$variant(vec![value])
      }
    }

    impl From<&[$ty]> for Value {
      fn from(value: &[$ty]) -> Self {
        Value::$variant(value.into())
      }
    }

    impl From<Vec<$ty>> for Value {
      fn from(value: Vec<$ty>) -> Self {
        Value::$variant(value)
      }
    }

    impl<const N: usize> From<[$ty; N]> for Value {
      fn from(value: [$ty; N]) -> Self {
        Value::$variant(value.into())
      }
    }
  };
}

value_from!(u8, Byte);
value_from!(u16, Short);
value_from!(u32, Long);
value_from!(i8, SByte);
value_from!(i16, SShort);
value_from!(i32, SLong);
value_from!(f32, Float);
value_from!(f64, Double);
value_from!(Rational, Rational);
value_from!(SRational, SRational);

impl From<&str> for Value {
  fn from(value: &str) -> Self {
    Value::Ascii(TiffAscii::new(value))
  }
}

impl From<&String> for Value {
  fn from(value: &String) -> Self {
    Value::Ascii(TiffAscii::new(value))
  }
}

impl From<String> for Value {
  fn from(value: String) -> Self {
    Value::Ascii(TiffAscii::new(&value))
  }
}

impl From<IFD> for Value {
  fn from(value: IFD) -> Self {
    Value::Ifd(IfdValue {
      ifds: vec![value],
      as_long: false,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn ascii_multiple_strings() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let ascii = TiffAscii::new_from_raw(b"abc\0de\0");
    assert_eq!(ascii.strings(), &vec![String::from("abc"), String::from("de")]);
    assert_eq!(ascii.count(), 7);
    assert_eq!(ascii.as_vec_with_nul(), b"abc\0de\0".to_vec());
    Ok(())
  }

  #[test]
  fn ascii_all_nul() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let ascii = TiffAscii::new_from_raw(b"\0\0\0");
    assert_eq!(ascii.strings(), &vec![String::new()]);
    Ok(())
  }

  #[test]
  fn type_sizes() -> std::result::Result<(), Box<dyn std::error::Error>> {
    assert_eq!(FieldType::Rational.size(), 8);
    assert_eq!(FieldType::Ifd.size(), 4);
    assert_eq!(FieldType::from_code_lossy(0), FieldType::Undefined);
    assert_eq!(FieldType::from_code_lossy(99), FieldType::Undefined);
    assert_eq!(Value::from([1_u16, 2, 3]).byte_size(), 6);
    assert_eq!(Value::from("AT").count(), 3);
    Ok(())
  }
}
