// SPDX-License-Identifier: MIT
// Copyright 2021 Daniel Vogelbacher <daniel@chaospixel.com>

use std::io::{Read, Seek};

use serde::{Deserialize, Serialize};

use crate::{
  Result,
  reader::{EndianReader, ReadByteOrder},
  value::{FieldType, Rational, SRational, TiffAscii, Value},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
  pub tag: u16,
  pub value: Value,
  // Stream position of the value data for entries read from a stream.
  // This is only None when building an IFD for writing.
  pub offset: Option<u32>,
}

impl std::ops::Deref for Entry {
  type Target = Value;

  fn deref(&self) -> &Self::Target {
    &self.value
  }
}

impl Entry {
  pub fn new<V: Into<Value>>(tag: u16, value: V) -> Self {
    Self {
      tag,
      value: value.into(),
      offset: None,
    }
  }

  pub fn value_type(&self) -> u16 {
    self.value.value_type()
  }

  pub fn count(&self) -> u32 {
    self.value.count() as u32
  }

  pub fn type_name(&self) -> &'static str {
    self.value.value_type_name()
  }

  /// Read `count` elements of type `typ` at the current reader position.
  /// Pointer values are read as plain `LONG` offsets, resolving them
  /// into nested directories is up to the directory reader.
  pub fn read_value<R: Read + Seek>(reader: &mut EndianReader<'_, R>, typ: FieldType, count: usize) -> Result<Value> {
    Ok(match typ {
      FieldType::Byte => {
        let mut v = vec![0; count];
        reader.read_u8_into(&mut v)?;
        Value::Byte(v)
      }
      FieldType::Ascii => {
        let mut v = vec![0; count];
        reader.read_u8_into(&mut v)?;
        Value::Ascii(TiffAscii::new_from_raw(&v))
      }
      FieldType::Short => {
        let mut v = vec![0; count];
        reader.read_u16_into(&mut v)?;
        Value::Short(v)
      }
      FieldType::Long | FieldType::Ifd => {
        let mut v = vec![0; count];
        reader.read_u32_into(&mut v)?;
        Value::Long(v)
      }
      FieldType::Rational => {
        let mut tmp = vec![0; count * 2]; // Rational is 2x u32
        reader.read_u32_into(&mut tmp)?;
        Value::Rational(tmp.chunks_exact(2).map(|v| Rational::new(v[0], v[1])).collect())
      }
      FieldType::SByte => {
        let mut v = vec![0; count];
        reader.read_i8_into(&mut v)?;
        Value::SByte(v)
      }
      FieldType::Undefined => {
        let mut v = vec![0; count];
        reader.read_u8_into(&mut v)?;
        Value::Undefined(v)
      }
      FieldType::SShort => {
        let mut v = vec![0; count];
        reader.read_i16_into(&mut v)?;
        Value::SShort(v)
      }
      FieldType::SLong => {
        let mut v = vec![0; count];
        reader.read_i32_into(&mut v)?;
        Value::SLong(v)
      }
      FieldType::SRational => {
        let mut tmp = vec![0; count * 2]; // SRational is 2x i32
        reader.read_i32_into(&mut tmp)?;
        Value::SRational(tmp.chunks_exact(2).map(|v| SRational::new(v[0], v[1])).collect())
      }
      FieldType::Float => {
        let mut v = vec![0.0; count];
        reader.read_f32_into(&mut v)?;
        Value::Float(v)
      }
      FieldType::Double => {
        let mut v = vec![0.0; count];
        reader.read_f64_into(&mut v)?;
        Value::Double(v)
      }
    })
  }
}

impl From<(u16, Value)> for Entry {
  fn from((tag, value): (u16, Value)) -> Self {
    Self { tag, value, offset: None }
  }
}
