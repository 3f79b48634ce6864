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

use std::sync::RwLock;

use ahash::AHashMap;
use compact_str::{format_compact, CompactString};

use crate::runtime::{
    FieldFlags,
    FieldType,
    Object,
    ObjectInitializer,
    PostInit,
    TypeFlags,
    TypeResult,
    Value,
};

/// A function that produces the declaration tables of a registered type.
pub type DeclareFn = fn() -> TypeDeclaration;

/// A class constructor.
///
/// The type system calls the constructor of each class level, from the root
/// class to the most derived one, while the object's memory is
/// default-constructed and before the object's fields are initialized from
/// the template. A constructor typically creates default subobjects through
/// the [ObjectInitializer].
pub type ConstructorFn = fn(&mut ObjectInitializer<'_>) -> TypeResult<()>;

/// A post-initialization hook.
///
/// The hook runs once per object after all fields and subobjects have been
/// initialized. It must call [PostInit::super_post_init] exactly once.
pub type PostInitFn = fn(&mut PostInit<'_>) -> TypeResult<()>;

/// A native function bound to a type.
pub type NativeFn = fn(&Object, &[Value]) -> TypeResult<Value>;

/// The declaration tables of a single type, as produced by the code generator.
///
/// The type system consumes a declaration exactly once, when it constructs the
/// type's descriptor. The kind, module and name of the type are supplied by
/// the [registration entry](crate::runtime::RegistrationEntry); the
/// declaration describes the type's body.
///
/// ```
/// use forma::runtime::{FieldDeclaration, FieldFlags, FieldType, TypeDeclaration};
///
/// let declaration = TypeDeclaration::new()
///     .parent("Actor")
///     .field(FieldDeclaration::new("health", FieldType::Int).default(100))
///     .field(
///         FieldDeclaration::new("speed", FieldType::Float)
///             .flags(FieldFlags::CONFIG)
///             .default(1.5f32),
///     )
///     .meta("category", "gameplay");
///
/// assert_eq!(declaration.fields().len(), 2);
/// ```
#[derive(Clone, Debug, Default)]
pub struct TypeDeclaration {
    pub(crate) parent: Option<CompactString>,
    pub(crate) interfaces: Vec<CompactString>,
    pub(crate) flags: TypeFlags,
    pub(crate) fields: Vec<FieldDeclaration>,
    pub(crate) overrides: Vec<(CompactString, DefaultValue)>,
    pub(crate) functions: Vec<FunctionDeclaration>,
    pub(crate) enumerators: Vec<(CompactString, i64)>,
    pub(crate) metadata: Vec<(CompactString, CompactString)>,
    pub(crate) constructor: Option<ConstructorFn>,
    pub(crate) post_init: Option<PostInitFn>,
}

impl TypeDeclaration {
    /// Creates an empty declaration.
    #[inline(always)]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the parent type by name (plain or `module.name` form).
    #[inline(always)]
    pub fn parent(mut self, name: impl Into<CompactString>) -> Self {
        self.parent = Some(name.into());

        self
    }

    /// Adds an implemented interface by name.
    #[inline(always)]
    pub fn implements(mut self, name: impl Into<CompactString>) -> Self {
        self.interfaces.push(name.into());

        self
    }

    /// Adds type flags.
    #[inline(always)]
    pub fn flags(mut self, flags: TypeFlags) -> Self {
        self.flags = self.flags | flags;

        self
    }

    /// Appends a field. Fields keep declaration order.
    #[inline(always)]
    pub fn field(mut self, field: FieldDeclaration) -> Self {
        self.fields.push(field);

        self
    }

    /// Overrides the default value of an inherited field in this type's
    /// default instance.
    #[inline(always)]
    pub fn override_default(mut self, field: impl Into<CompactString>, value: impl Into<Value>) -> Self {
        self.overrides
            .push((field.into(), DefaultValue::Value(value.into())));

        self
    }

    /// Overrides the default value of an inherited enum field by enumerator
    /// name.
    #[inline(always)]
    pub fn override_enumerator(
        mut self,
        field: impl Into<CompactString>,
        enumerator: impl Into<CompactString>,
    ) -> Self {
        self.overrides
            .push((field.into(), DefaultValue::Enumerator(enumerator.into())));

        self
    }

    /// Appends a function.
    #[inline(always)]
    pub fn function(mut self, function: FunctionDeclaration) -> Self {
        self.functions.push(function);

        self
    }

    /// Appends an enumerator. Meaningful for enumerations only.
    #[inline(always)]
    pub fn enumerator(mut self, name: impl Into<CompactString>, value: i64) -> Self {
        self.enumerators.push((name.into(), value));

        self
    }

    /// Attaches a metadata entry.
    #[inline(always)]
    pub fn meta(mut self, key: impl Into<CompactString>, value: impl Into<CompactString>) -> Self {
        self.metadata.push((key.into(), value.into()));

        self
    }

    /// Sets the class constructor.
    #[inline(always)]
    pub fn constructor(mut self, constructor: ConstructorFn) -> Self {
        self.constructor = Some(constructor);

        self
    }

    /// Sets the post-initialization hook.
    #[inline(always)]
    pub fn post_init(mut self, post_init: PostInitFn) -> Self {
        self.post_init = Some(post_init);

        self
    }

    /// Returns the declared fields in declaration order.
    #[inline(always)]
    pub fn fields(&self) -> &[FieldDeclaration] {
        &self.fields
    }

    /// Returns the name of the declared parent type.
    #[inline(always)]
    pub fn parent_name(&self) -> Option<&str> {
        self.parent.as_deref()
    }
}

/// A declaration of a single field.
#[derive(Clone, Debug)]
pub struct FieldDeclaration {
    pub(crate) name: CompactString,
    pub(crate) ty: FieldType,
    pub(crate) dimension: usize,
    pub(crate) flags: FieldFlags,
    pub(crate) default: Option<DefaultValue>,
    pub(crate) metadata: Vec<(CompactString, CompactString)>,
}

impl FieldDeclaration {
    /// Creates a scalar field declaration without flags and without a
    /// declared default (the default is the zero value of the field type).
    #[inline(always)]
    pub fn new(name: impl Into<CompactString>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            ty,
            dimension: 1,
            flags: FieldFlags::EMPTY,
            default: None,
            metadata: Vec::new(),
        }
    }

    /// Turns the field into a fixed-size array. Dimensions below 1 are
    /// treated as 1.
    #[inline(always)]
    pub fn array(mut self, dimension: usize) -> Self {
        self.dimension = dimension.max(1);

        self
    }

    /// Adds field flags.
    #[inline(always)]
    pub fn flags(mut self, flags: FieldFlags) -> Self {
        self.flags = self.flags | flags;

        self
    }

    /// Sets the declared default value.
    #[inline(always)]
    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(DefaultValue::Value(value.into()));

        self
    }

    /// Sets the declared default value of an enum field by enumerator name.
    /// The name is resolved when the default is applied.
    #[inline(always)]
    pub fn default_enumerator(mut self, name: impl Into<CompactString>) -> Self {
        self.default = Some(DefaultValue::Enumerator(name.into()));

        self
    }

    /// Attaches a metadata entry.
    #[inline(always)]
    pub fn meta(mut self, key: impl Into<CompactString>, value: impl Into<CompactString>) -> Self {
        self.metadata.push((key.into(), value.into()));

        self
    }

    /// Returns the field name.
    #[inline(always)]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A declared default value.
#[derive(Clone, Debug, PartialEq)]
pub enum DefaultValue {
    /// A literal value.
    Value(Value),

    /// An enumerator of the field's enumeration, by name.
    Enumerator(CompactString),
}

impl From<Value> for DefaultValue {
    #[inline(always)]
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

/// A declaration of a function.
///
/// A function without a native pointer is bound by the type system from the
/// [NativeTable] or inherited from the nearest ancestor that declares a
/// function with the same name.
#[derive(Clone, Debug)]
pub struct FunctionDeclaration {
    pub(crate) name: CompactString,
    pub(crate) native: Option<NativeFn>,
    pub(crate) metadata: Vec<(CompactString, CompactString)>,
}

impl FunctionDeclaration {
    /// Creates a declaration without an entry point.
    #[inline(always)]
    pub fn new(name: impl Into<CompactString>) -> Self {
        Self {
            name: name.into(),
            native: None,
            metadata: Vec::new(),
        }
    }

    /// Sets the native entry point.
    #[inline(always)]
    pub fn native(mut self, native: NativeFn) -> Self {
        self.native = Some(native);

        self
    }

    /// Attaches a metadata entry.
    #[inline(always)]
    pub fn meta(mut self, key: impl Into<CompactString>, value: impl Into<CompactString>) -> Self {
        self.metadata.push((key.into(), value.into()));

        self
    }
}

/// A name-keyed table of native entry points.
///
/// Constructors are keyed by type name, functions by `Type.function`. The
/// type system consults the table in the
/// [Bound](crate::runtime::ConstructionStage::Bound) stage for entry points
/// that the declaration does not carry.
#[derive(Default)]
pub struct NativeTable {
    constructors: RwLock<AHashMap<CompactString, ConstructorFn>>,
    functions: RwLock<AHashMap<CompactString, NativeFn>>,
}

impl NativeTable {
    /// Creates an empty table.
    #[inline(always)]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a class constructor. Returns false if the type already has
    /// a registered constructor; the previous one stays in place.
    pub fn register_constructor(&self, ty: impl Into<CompactString>, constructor: ConstructorFn) -> bool {
        let mut constructors = self
            .constructors
            .write()
            .unwrap_or_else(|poison| poison.into_inner());

        let ty = ty.into();

        if constructors.contains_key(&ty) {
            return false;
        }

        let _ = constructors.insert(ty, constructor);

        true
    }

    /// Registers a native function. Returns false if the function already
    /// has a registered entry point; the previous one stays in place.
    pub fn register_function(&self, ty: &str, function: &str, native: NativeFn) -> bool {
        let mut functions = self
            .functions
            .write()
            .unwrap_or_else(|poison| poison.into_inner());

        let key = format_compact!("{ty}.{function}");

        if functions.contains_key(&key) {
            return false;
        }

        let _ = functions.insert(key, native);

        true
    }

    /// Looks up a class constructor by type name.
    #[inline]
    pub fn constructor(&self, ty: &str) -> Option<ConstructorFn> {
        self.constructors
            .read()
            .unwrap_or_else(|poison| poison.into_inner())
            .get(ty)
            .copied()
    }

    /// Looks up a native function by type and function name.
    #[inline]
    pub fn function(&self, ty: &str, function: &str) -> Option<NativeFn> {
        self.functions
            .read()
            .unwrap_or_else(|poison| poison.into_inner())
            .get(format_compact!("{ty}.{function}").as_str())
            .copied()
    }
}
