////////////////////////////////////////////////////////////////////////////////
// This file is part of "Forma", a runtime type registration and prototype    //
// instancing platform.                                                       //
//                                                                            //
// This work is proprietary software with source-available code.              //
//                                                                            //
// To copy, use, distribute, or contribute to this work, you must agree to    //
// the terms of the General License Agreement:                                //
//                                                                            //
// https://github.com/Eliah-Lakhin/ad-astra/blob/master/EULA.md               //
//                                                                            //
// The agreement grants a Basic Commercial License, allowing you to use       //
// this work in non-commercial and limited commercial products with a total   //
// gross revenue cap. To remove this commercial limit for one of your         //
// products, you must acquire a Full Commercial License.                      //
//                                                                            //
// If you contribute to the source code, documentation, or related materials, //
// you must grant me an exclusive license to these contributions.             //
// Contributions are governed by the "Contributions" section of the General   //
// License Agreement.                                                         //
//                                                                            //
// Copying the work in parts is strictly forbidden, except as permitted       //
// under the General License Agreement.                                       //
//                                                                            //
// If you do not or cannot agree to the terms of this Agreement,              //
// do not use this work.                                                      //
//                                                                            //
// This work is provided "as is", without any warranties, express or implied, //
// except where such disclaimers are legally invalid.                         //
//                                                                            //
// Copyright (c) 2024 Ilya Lakhin (Илья Александрович Лахин).                 //
// All rights reserved.                                                       //
////////////////////////////////////////////////////////////////////////////////

use std::fmt::{Display, Formatter};

use compact_str::CompactString;

use crate::runtime::Object;

/// The declared type of a [Field](crate::runtime::Field).
///
/// Enum and object targets are resolved by name at first use. Struct targets
/// are resolved when the owning type is linked, because the struct size is
/// part of the owner's layout.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// A boolean flag stored in one byte.
    Bool,

    /// An unsigned byte.
    Byte,

    /// A 32-bit signed integer.
    Int,

    /// A 64-bit signed integer.
    Int64,

    /// A 32-bit float.
    Float,

    /// A 64-bit float.
    Double,

    /// A string.
    Str,

    /// A value of the named enumeration, stored as a 64-bit integer.
    Enum(CompactString),

    /// An inline value of the named struct type.
    Struct(CompactString),

    /// A nullable reference to an object of the named class or of any of its
    /// descendants.
    Object(CompactString),
}

impl Display for FieldType {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool => formatter.write_str("bool"),
            Self::Byte => formatter.write_str("byte"),
            Self::Int => formatter.write_str("int"),
            Self::Int64 => formatter.write_str("int64"),
            Self::Float => formatter.write_str("float"),
            Self::Double => formatter.write_str("double"),
            Self::Str => formatter.write_str("str"),
            Self::Enum(name) => formatter.write_fmt(format_args!("enum {name}")),
            Self::Struct(name) => formatter.write_fmt(format_args!("struct {name}")),
            Self::Object(name) => formatter.write_fmt(format_args!("{name} reference")),
        }
    }
}

impl FieldType {
    /// Returns the name of the referred type, if the field type refers to
    /// another registered type.
    #[inline(always)]
    pub fn target_name(&self) -> Option<&str> {
        match self {
            Self::Enum(name) | Self::Struct(name) | Self::Object(name) => Some(name),
            _ => None,
        }
    }
}

/// A typed field value.
///
/// Values are what the [Object](crate::runtime::Object) accessors read and
/// write. Writes accept a few lossless conversions: an `Int` into an `Int64`
/// field, a `Float` into a `Double` field, a `Byte` into integer fields, an
/// integer that fits into an `Int` field, and an enumerator name (`Str`) into
/// an enum field.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// A boolean.
    Bool(bool),

    /// An unsigned byte.
    Byte(u8),

    /// A 32-bit integer.
    Int(i32),

    /// A 64-bit integer.
    Int64(i64),

    /// A 32-bit float.
    Float(f32),

    /// A 64-bit float.
    Double(f64),

    /// A string.
    Str(CompactString),

    /// An enumerator value.
    Enum(i64),

    /// An object reference, or None.
    Object(Option<Object>),

    /// A struct value as a list of `(field name, value)` pairs in the struct's
    /// property order.
    Struct(Vec<(CompactString, Value)>),

    /// All elements of an array field.
    Array(Vec<Value>),
}

impl Display for Value {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(value) => Display::fmt(value, formatter),
            Self::Byte(value) => Display::fmt(value, formatter),
            Self::Int(value) => Display::fmt(value, formatter),
            Self::Int64(value) => Display::fmt(value, formatter),
            Self::Float(value) => Display::fmt(value, formatter),
            Self::Double(value) => Display::fmt(value, formatter),
            Self::Str(value) => formatter.write_fmt(format_args!("{value:?}")),
            Self::Enum(value) => formatter.write_fmt(format_args!("#{value}")),
            Self::Object(None) => formatter.write_str("none"),
            Self::Object(Some(object)) => Display::fmt(object, formatter),

            Self::Struct(fields) => {
                formatter.write_str("{")?;

                for (index, (name, value)) in fields.iter().enumerate() {
                    if index > 0 {
                        formatter.write_str(", ")?;
                    }

                    formatter.write_fmt(format_args!("{name}: {value}"))?;
                }

                formatter.write_str("}")
            }

            Self::Array(items) => {
                formatter.write_str("[")?;

                for (index, item) in items.iter().enumerate() {
                    if index > 0 {
                        formatter.write_str(", ")?;
                    }

                    Display::fmt(item, formatter)?;
                }

                formatter.write_str("]")
            }
        }
    }
}

impl Value {
    /// Returns a short user-facing name of the value kind.
    #[inline(always)]
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Byte(_) => "byte",
            Self::Int(_) => "int",
            Self::Int64(_) => "int64",
            Self::Float(_) => "float",
            Self::Double(_) => "double",
            Self::Str(_) => "str",
            Self::Enum(_) => "enum",
            Self::Object(_) => "object",
            Self::Struct(_) => "struct",
            Self::Array(_) => "array",
        }
    }

    /// Returns the value as a 64-bit integer if it is any integer or
    /// enumerator value.
    #[inline]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Byte(value) => Some(*value as i64),
            Self::Int(value) => Some(*value as i64),
            Self::Int64(value) | Self::Enum(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the value as a 64-bit float if it is a floating-point value.
    #[inline]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(value) => Some(*value as f64),
            Self::Double(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the boolean value.
    #[inline(always)]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the string value.
    #[inline(always)]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the object reference if the value is a non-empty object value.
    #[inline(always)]
    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Self::Object(value) => value.as_ref(),
            _ => None,
        }
    }

    /// Looks up a member of a struct value by name.
    #[inline]
    pub fn member(&self, name: &str) -> Option<&Value> {
        match self {
            Self::Struct(fields) => fields
                .iter()
                .find(|(field, _)| field.as_str() == name)
                .map(|(_, value)| value),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    #[inline(always)]
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<u8> for Value {
    #[inline(always)]
    fn from(value: u8) -> Self {
        Self::Byte(value)
    }
}

impl From<i32> for Value {
    #[inline(always)]
    fn from(value: i32) -> Self {
        Self::Int(value)
    }
}

impl From<i64> for Value {
    #[inline(always)]
    fn from(value: i64) -> Self {
        Self::Int64(value)
    }
}

impl From<f32> for Value {
    #[inline(always)]
    fn from(value: f32) -> Self {
        Self::Float(value)
    }
}

impl From<f64> for Value {
    #[inline(always)]
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<&str> for Value {
    #[inline(always)]
    fn from(value: &str) -> Self {
        Self::Str(value.into())
    }
}

impl From<String> for Value {
    #[inline(always)]
    fn from(value: String) -> Self {
        Self::Str(value.into())
    }
}

impl From<CompactString> for Value {
    #[inline(always)]
    fn from(value: CompactString) -> Self {
        Self::Str(value)
    }
}

impl From<Object> for Value {
    #[inline(always)]
    fn from(value: Object) -> Self {
        Self::Object(Some(value))
    }
}

impl From<Option<Object>> for Value {
    #[inline(always)]
    fn from(value: Option<Object>) -> Self {
        Self::Object(value)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    #[inline(always)]
    fn from(value: Vec<T>) -> Self {
        Self::Array(value.into_iter().map(Into::into).collect())
    }
}
