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

use std::{
    fmt::{Debug, Formatter},
    sync::Arc,
};

use ahash::AHashMap;
use compact_str::CompactString;

use crate::runtime::Value;

/// Configuration of the [TypeSystem](crate::runtime::TypeSystem).
///
/// The [Default] implementation of this object is equivalent to
/// [SystemConfig::new].
#[derive(Clone)]
#[non_exhaustive]
pub struct SystemConfig {
    /// Global switch for deep instancing of owned subobject references.
    ///
    /// When disabled, the instancing graph never creates new objects, and
    /// instanced fields keep the references copied from the template.
    ///
    /// The default value is `true`.
    pub instancing: bool,

    /// Decides what instancing does with a field that is both
    /// [TRANSIENT](crate::runtime::FieldFlags::TRANSIENT) and
    /// [INSTANCED](crate::runtime::FieldFlags::INSTANCED).
    ///
    /// The default value is [TransientInstancedPolicy::LeaveEmpty].
    pub transient_instanced: TransientInstancedPolicy,

    /// The build context used to decide whether an object flagged as
    /// client-only, server-only, or tool-only should be instanced at all.
    ///
    /// The default value is [BuildContext::Tool].
    pub context: BuildContext,

    /// The upper bound of a linked type's instance size in bytes.
    ///
    /// Linking a type whose field layout exceeds this bound fails with the
    /// [LayoutOverflow](crate::runtime::TypeError::LayoutOverflow) error.
    ///
    /// The default value is `i32::MAX`.
    pub max_instance_size: usize,

    /// If set, registration processing builds the default instances of all
    /// newly constructed classes eagerly, grouped by module in module
    /// dependency order. Otherwise, default instances are created on first
    /// request.
    ///
    /// The default value is `true`.
    pub eager_defaults: bool,

    /// The source of values for fields flagged as
    /// [CONFIG](crate::runtime::FieldFlags::CONFIG).
    ///
    /// The default value is None, meaning that config fields keep their
    /// declared defaults.
    pub config_source: Option<Arc<dyn ConfigSource>>,
}

impl Default for SystemConfig {
    #[inline(always)]
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for SystemConfig {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("SystemConfig")
            .field("instancing", &self.instancing)
            .field("transient_instanced", &self.transient_instanced)
            .field("context", &self.context)
            .field("max_instance_size", &self.max_instance_size)
            .field("eager_defaults", &self.eager_defaults)
            .field("config_source", &self.config_source.is_some())
            .finish()
    }
}

impl SystemConfig {
    /// Creates a new config object with all fields set to their default
    /// values.
    #[inline(always)]
    pub const fn new() -> Self {
        Self {
            instancing: true,
            transient_instanced: TransientInstancedPolicy::LeaveEmpty,
            context: BuildContext::Tool,
            max_instance_size: i32::MAX as usize,
            eager_defaults: true,
            config_source: None,
        }
    }

    /// Sets the [config_source](Self::config_source) field.
    #[inline(always)]
    pub fn with_config_source(mut self, source: impl ConfigSource) -> Self {
        self.config_source = Some(Arc::new(source));

        self
    }
}

/// Instancing policy for owned subobject references in transient fields.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TransientInstancedPolicy {
    /// The field of the new object is cleared.
    #[default]
    LeaveEmpty,

    /// The referenced template subobject is deep-instanced like any other
    /// owned reference.
    DeepCopy,

    /// The field keeps the template's reference as-is.
    ShareReference,
}

/// The kind of build the type system runs in.
///
/// Instancing skips template objects whose types are flagged for a
/// different context.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BuildContext {
    /// A client build. Server-only and tool-only objects are skipped.
    Client,

    /// A server build. Client-only and tool-only objects are skipped.
    Server,

    /// A tooling build. Nothing is skipped.
    #[default]
    Tool,
}

/// A provider of configured values for fields flagged as
/// [CONFIG](crate::runtime::FieldFlags::CONFIG).
///
/// The type system queries the source while it builds the default instance
/// of a type.
pub trait ConfigSource: Send + Sync + 'static {
    /// Returns the configured value of the `field` declared in the type `ty`
    /// of the `module`, or None if the source does not configure this field.
    fn value(&self, module: &str, ty: &str, field: &str) -> Option<Value>;
}

/// An in-memory [ConfigSource].
///
/// ```
/// use forma::runtime::{ConfigSource, MapConfigSource, Value};
///
/// let mut source = MapConfigSource::new();
///
/// source.insert("game", "Player", "speed", Value::Float(2.5));
///
/// assert_eq!(source.value("game", "Player", "speed"), Some(Value::Float(2.5)));
/// assert_eq!(source.value("game", "Player", "health"), None);
/// ```
#[derive(Clone, Debug, Default)]
pub struct MapConfigSource {
    values: AHashMap<(CompactString, CompactString, CompactString), Value>,
}

impl ConfigSource for MapConfigSource {
    #[inline]
    fn value(&self, module: &str, ty: &str, field: &str) -> Option<Value> {
        self.values
            .get(&(module.into(), ty.into(), field.into()))
            .cloned()
    }
}

impl MapConfigSource {
    /// Creates an empty source.
    #[inline(always)]
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the value of a field. Returns the previously configured
    /// value, if any.
    #[inline(always)]
    pub fn insert(
        &mut self,
        module: impl Into<CompactString>,
        ty: impl Into<CompactString>,
        field: impl Into<CompactString>,
        value: impl Into<Value>,
    ) -> Option<Value> {
        self.values
            .insert((module.into(), ty.into(), field.into()), value.into())
    }
}
