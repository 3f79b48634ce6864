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
    fmt::{Debug, Display, Formatter},
    hash::{Hash, Hasher},
    iter::FusedIterator,
    ptr,
    sync::{
        atomic::{AtomicBool, AtomicU8, Ordering as AtomicOrdering},
        Mutex,
        OnceLock,
    },
};

use compact_str::{format_compact, CompactString};
use log::trace;

use crate::{
    report::debug_unreachable,
    runtime::{
        ConstructorFn,
        Field,
        ModuleMeta,
        NativeFn,
        Object,
        PostInitFn,
        TypeDeclaration,
        TypeError,
        TypeKind,
        TypeResult,
        TypeSystem,
        Value,
        PIPELINE_LOG,
    },
};

macro_rules! flag_set {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident;
        $($(#[doc = $doc:expr])* $flag:ident = $bit:expr;)*
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
        #[repr(transparent)]
        $vis struct $name(u32);

        impl $name {
            /// An empty set of flags.
            pub const EMPTY: Self = Self(0);

            $(
                $(#[doc = $doc])*
                pub const $flag: Self = Self(1 << $bit);
            )*

            /// Returns true if all flags of `other` are set in this set.
            #[inline(always)]
            pub const fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }

            /// Returns true if any flag of `other` is set in this set.
            #[inline(always)]
            pub const fn intersects(self, other: Self) -> bool {
                self.0 & other.0 != 0
            }

            /// Returns true if no flags are set.
            #[inline(always)]
            pub const fn is_empty(self) -> bool {
                self.0 == 0
            }

            /// Returns the raw bit representation.
            #[inline(always)]
            pub const fn bits(self) -> u32 {
                self.0
            }
        }

        impl ::std::ops::BitOr for $name {
            type Output = Self;

            #[inline(always)]
            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }

        impl ::std::ops::BitOrAssign for $name {
            #[inline(always)]
            fn bitor_assign(&mut self, rhs: Self) {
                self.0 |= rhs.0;
            }
        }

        impl ::std::ops::BitAnd for $name {
            type Output = Self;

            #[inline(always)]
            fn bitand(self, rhs: Self) -> Self {
                Self(self.0 & rhs.0)
            }
        }

        impl ::std::fmt::Debug for $name {
            fn fmt(&self, formatter: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                let mut list = formatter.debug_set();

                $(
                    if self.contains(Self::$flag) {
                        let _ = list.entry(&::std::stringify!($flag));
                    }
                )*

                list.finish()
            }
        }
    };
}

pub(crate) use flag_set;

flag_set! {
    /// A set of [TypeDescriptor] flags.
    pub struct TypeFlags;

    /// The class has a default instance, but cannot be instantiated.
    ABSTRACT = 0;

    /// The type is implemented natively. Native types apply their declared
    /// defaults in every construction, and may only derive from native types.
    NATIVE = 1;

    /// The type descriptor has completed the construction pipeline.
    CONSTRUCTED = 2;

    /// The class is an interface: it cannot be instantiated, does not need
    /// a constructor, and can be listed in other classes' `implements`
    /// clauses.
    INTERFACE = 3;

    /// Objects of this class exist in client builds only.
    CLIENT_ONLY = 4;

    /// Objects of this class exist in server builds only.
    SERVER_ONLY = 5;

    /// Objects of this class exist in tooling builds only.
    TOOL_ONLY = 6;
}

/// A stage of the type descriptor construction pipeline.
///
/// The stages are ordered: a descriptor passes through each of them exactly
/// once, in declaration order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum ConstructionStage {
    /// The type is not known to any registry.
    Unregistered = 0,

    /// The type has a registration entry, but the descriptor does not exist.
    Registered = 1,

    /// The descriptor skeleton is allocated and published.
    Allocated = 2,

    /// The parent type and the implemented interfaces are constructed.
    DependenciesResolved = 3,

    /// Fields, functions, enumerators, and metadata are attached.
    PopulatedFields = 4,

    /// All executable entry points are resolved.
    Bound = 5,

    /// Field offsets and field chains are computed.
    Linked = 6,

    /// The descriptor is fully usable.
    Constructed = 7,
}

impl Display for ConstructionStage {
    #[inline(always)]
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(self, formatter)
    }
}

impl ConstructionStage {
    #[inline(always)]
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Unregistered,
            1 => Self::Registered,
            2 => Self::Allocated,
            3 => Self::DependenciesResolved,
            4 => Self::PopulatedFields,
            5 => Self::Bound,
            6 => Self::Linked,
            7 => Self::Constructed,

            // Safety: The stage is only stored from the enum discriminants.
            _ => unsafe { debug_unreachable!("Invalid construction stage.") },
        }
    }
}

/// The memory layout of a linked type, together with the field chains
/// derived from it.
///
/// All chains are views over the same set of fields: the type's own fields
/// followed by the fields of its ancestors.
#[derive(Debug)]
pub struct TypeLayout {
    pub(crate) instance_size: usize,
    pub(crate) alignment: usize,
    pub(crate) properties: Vec<&'static Field>,
    pub(crate) references: Vec<&'static Field>,
    pub(crate) destructors: Vec<&'static Field>,
    pub(crate) post_construct: Vec<&'static Field>,
}

impl TypeLayout {
    /// The total size of an instance in bytes, padded to the alignment.
    #[inline(always)]
    pub fn instance_size(&self) -> usize {
        self.instance_size
    }

    /// The instance alignment in bytes.
    #[inline(always)]
    pub fn alignment(&self) -> usize {
        self.alignment
    }

    /// All fields: the type's own fields in declaration order, followed by
    /// the parent's property chain.
    #[inline(always)]
    pub fn properties(&self) -> &[&'static Field] {
        &self.properties
    }

    /// Fields that may contain an object reference, directly or through an
    /// embedded struct.
    #[inline(always)]
    pub fn references(&self) -> &[&'static Field] {
        &self.references
    }

    /// Fields whose storage requires teardown.
    #[inline(always)]
    pub fn destructors(&self) -> &[&'static Field] {
        &self.destructors
    }

    /// Fields that are copied from the template after construction. Fields
    /// owned by native types are excluded unless they are config fields.
    #[inline(always)]
    pub fn post_construct(&self) -> &[&'static Field] {
        &self.post_construct
    }
}

/// A function bound to its executable entry point.
pub struct Function {
    pub(crate) name: CompactString,
    pub(crate) owner: &'static TypeDescriptor,
    pub(crate) native: NativeFn,
    pub(crate) metadata: Vec<(CompactString, CompactString)>,
}

impl Debug for Function {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_fmt(format_args!("{}.{}", self.owner, self.name))
    }
}

impl Function {
    /// The function name.
    #[inline(always)]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The type that declares the function.
    #[inline(always)]
    pub fn owner(&self) -> &'static TypeDescriptor {
        self.owner
    }

    /// The bound entry point.
    #[inline(always)]
    pub fn native(&self) -> NativeFn {
        self.native
    }

    /// Looks up a metadata entry by key.
    #[inline]
    pub fn metadata(&self, key: &str) -> Option<&str> {
        lookup_meta(&self.metadata, key)
    }
}

/// A named value of an enumeration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Enumerator {
    /// The enumerator name.
    pub name: CompactString,

    /// The enumerator value.
    pub value: i64,
}

/// The runtime representation of a registered class, struct, or enumeration.
///
/// Descriptors are created by the [TypeSystem] from registration entries and
/// live for the rest of the process. The type system publishes a descriptor
/// as soon as its skeleton is allocated, and fills the rest of it stage by
/// stage; the accessors of the not-yet-reached stages return empty data.
/// A descriptor returned by the public lookup functions is always
/// [constructed](ConstructionStage::Constructed).
///
/// Two descriptors are equal if they are the same descriptor.
pub struct TypeDescriptor {
    pub(crate) system: &'static TypeSystem,
    pub(crate) kind: TypeKind,
    pub(crate) module: &'static ModuleMeta,
    pub(crate) name: &'static str,
    pub(crate) qualified: CompactString,
    pub(crate) flags: TypeFlags,
    pub(crate) stage: AtomicU8,
    pub(crate) failed: AtomicBool,
    pub(crate) declaration: TypeDeclaration,
    pub(crate) parent: OnceLock<Option<&'static TypeDescriptor>>,
    pub(crate) interfaces: OnceLock<Vec<&'static TypeDescriptor>>,
    pub(crate) fields: OnceLock<Vec<&'static Field>>,
    pub(crate) functions: OnceLock<Vec<Function>>,
    pub(crate) enumerators: OnceLock<Vec<Enumerator>>,
    pub(crate) constructor: OnceLock<Option<ConstructorFn>>,
    pub(crate) layout: OnceLock<TypeLayout>,
    pub(crate) defaults: Mutex<Option<Object>>,
}

impl PartialEq for TypeDescriptor {
    #[inline(always)]
    fn eq(&self, other: &Self) -> bool {
        ptr::eq(self, other)
    }
}

impl Eq for TypeDescriptor {}

impl Hash for TypeDescriptor {
    #[inline(always)]
    fn hash<H: Hasher>(&self, state: &mut H) {
        (self as *const Self as usize).hash(state)
    }
}

impl Display for TypeDescriptor {
    #[inline(always)]
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.name)
    }
}

impl Debug for TypeDescriptor {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        let mut debug = formatter.debug_struct("TypeDescriptor");

        let _ = debug
            .field("kind", &self.kind)
            .field("name", &self.qualified)
            .field("stage", &self.stage())
            .field("flags", &self.flags());

        if let Some(parent) = self.parent() {
            let _ = debug.field("parent", &parent.qualified);
        }

        if let Some(layout) = self.layout.get() {
            let _ = debug
                .field("instance_size", &layout.instance_size)
                .field("alignment", &layout.alignment);
        }

        debug.finish_non_exhaustive()
    }
}

impl TypeDescriptor {
    pub(crate) fn new(
        system: &'static TypeSystem,
        kind: TypeKind,
        module: &'static ModuleMeta,
        name: &'static str,
        declaration: TypeDeclaration,
    ) -> Self {
        Self {
            system,
            kind,
            module,
            name,
            qualified: format_compact!("{}.{name}", module.name()),
            flags: declaration.flags,
            stage: AtomicU8::new(ConstructionStage::Allocated as u8),
            failed: AtomicBool::new(false),
            declaration,
            parent: OnceLock::new(),
            interfaces: OnceLock::new(),
            fields: OnceLock::new(),
            functions: OnceLock::new(),
            enumerators: OnceLock::new(),
            constructor: OnceLock::new(),
            layout: OnceLock::new(),
            defaults: Mutex::new(None),
        }
    }

    /// The type system that owns this descriptor.
    #[inline(always)]
    pub fn system(&self) -> &'static TypeSystem {
        self.system
    }

    /// The kind of the type.
    #[inline(always)]
    pub fn kind(&self) -> TypeKind {
        self.kind
    }

    /// The type name, unique within its module.
    #[inline(always)]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The `module.name` form of the type name.
    #[inline(always)]
    pub fn qualified_name(&self) -> &str {
        &self.qualified
    }

    /// The module that declares the type.
    #[inline(always)]
    pub fn module(&self) -> &'static ModuleMeta {
        self.module
    }

    /// The type flags. The [CONSTRUCTED](TypeFlags::CONSTRUCTED) flag is set
    /// once the descriptor reaches the final construction stage.
    #[inline(always)]
    pub fn flags(&self) -> TypeFlags {
        match self.is_constructed() {
            true => self.flags | TypeFlags::CONSTRUCTED,
            false => self.flags,
        }
    }

    /// The construction stage the descriptor has reached.
    #[inline(always)]
    pub fn stage(&self) -> ConstructionStage {
        ConstructionStage::from_u8(self.stage.load(AtomicOrdering::Acquire))
    }

    #[inline(always)]
    pub(crate) fn advance(&self, stage: ConstructionStage) {
        trace!(target: PIPELINE_LOG, "{} reached {stage} stage.", self.qualified);

        self.stage.store(stage as u8, AtomicOrdering::Release);
    }

    /// Returns true if the descriptor is fully usable.
    #[inline(always)]
    pub fn is_constructed(&self) -> bool {
        self.stage() == ConstructionStage::Constructed
    }

    /// Returns true if the construction pipeline of this type has failed.
    /// The [stage](Self::stage) of a failed type is the last stage it has
    /// reached.
    #[inline(always)]
    pub fn is_failed(&self) -> bool {
        self.failed.load(AtomicOrdering::Acquire)
    }

    #[inline(always)]
    pub(crate) fn mark_failed(&self) {
        self.failed.store(true, AtomicOrdering::Release);
    }

    /// Returns true if the type is an abstract class.
    #[inline(always)]
    pub fn is_abstract(&self) -> bool {
        self.flags.contains(TypeFlags::ABSTRACT)
    }

    /// Returns true if the type is implemented natively.
    #[inline(always)]
    pub fn is_native(&self) -> bool {
        self.flags.contains(TypeFlags::NATIVE)
    }

    /// Returns true if the type is an interface.
    #[inline(always)]
    pub fn is_interface(&self) -> bool {
        self.flags.contains(TypeFlags::INTERFACE)
    }

    /// The parent type.
    #[inline(always)]
    pub fn parent(&self) -> Option<&'static TypeDescriptor> {
        self.parent.get().copied().flatten()
    }

    /// Iterates over the ancestors of this type, from the parent to the root.
    #[inline(always)]
    pub fn ancestors(&self) -> Ancestors {
        Ancestors {
            next: self.parent(),
        }
    }

    /// Returns the inheritance chain of this type, from the root type to this
    /// type.
    pub(crate) fn lineage(&'static self) -> Vec<&'static TypeDescriptor> {
        let mut lineage = Vec::with_capacity(4);

        lineage.push(self);
        lineage.extend(self.ancestors());
        lineage.reverse();

        lineage
    }

    /// Returns true if this type is `other`, derives from `other`, or
    /// implements the `other` interface.
    pub fn is_a(&self, other: &TypeDescriptor) -> bool {
        if self == other {
            return true;
        }

        if self.ancestors().any(|ancestor| ancestor == other) {
            return true;
        }

        other.is_interface() && self.implements(other)
    }

    /// The interfaces directly implemented by this type.
    #[inline(always)]
    pub fn interfaces(&self) -> &[&'static TypeDescriptor] {
        match self.interfaces.get() {
            Some(interfaces) => interfaces,
            None => &[],
        }
    }

    /// Returns true if this type or any of its ancestors implements the
    /// `interface`, directly or through interface inheritance.
    pub fn implements(&self, interface: &TypeDescriptor) -> bool {
        let mut current = Some(self);

        while let Some(ty) = current {
            for implemented in ty.interfaces() {
                if *implemented == interface || implemented.is_a(interface) {
                    return true;
                }
            }

            current = ty.parent();
        }

        false
    }

    /// The fields declared by this type, in declaration order.
    #[inline(always)]
    pub fn fields(&self) -> &[&'static Field] {
        match self.fields.get() {
            Some(fields) => fields,
            None => &[],
        }
    }

    /// The type's layout, if the type is linked.
    #[inline(always)]
    pub fn layout(&self) -> Option<&TypeLayout> {
        self.layout.get()
    }

    /// The instance size in bytes, or zero if the type is not linked.
    #[inline(always)]
    pub fn instance_size(&self) -> usize {
        self.layout().map(TypeLayout::instance_size).unwrap_or(0)
    }

    /// The instance alignment in bytes, or one if the type is not linked.
    #[inline(always)]
    pub fn alignment(&self) -> usize {
        self.layout().map(TypeLayout::alignment).unwrap_or(1)
    }

    #[inline(always)]
    pub(crate) fn linked_layout(&self) -> &TypeLayout {
        match self.layout.get() {
            Some(layout) => layout,

            // Safety: Objects and field storage exist for linked types only.
            None => unsafe { debug_unreachable!("Type layout is not linked.") },
        }
    }

    /// Looks up a field by name, searching this type's fields first and then
    /// the ancestors' fields.
    pub fn field(&self, name: &str) -> Option<&'static Field> {
        if let Some(layout) = self.layout() {
            return layout
                .properties
                .iter()
                .find(|field| field.name() == name)
                .copied();
        }

        let mut current = Some(self);

        while let Some(ty) = current {
            if let Some(field) = ty.fields().iter().find(|field| field.name() == name) {
                return Some(*field);
            }

            current = ty.parent();
        }

        None
    }

    /// Looks up a field by name, or returns an error with a spelling
    /// suggestion.
    pub fn field_or_error(&self, name: &str) -> TypeResult<&'static Field> {
        if let Some(field) = self.field(name) {
            return Ok(field);
        }

        let candidates = self
            .layout()
            .map(|layout| layout.properties.as_slice())
            .unwrap_or(self.fields());

        Err(TypeError::UnknownField {
            ty: self.qualified.clone(),
            field: name.into(),
            suggestion: crate::runtime::error::suggest(
                name,
                candidates.iter().map(|field| field.name()),
            ),
        })
    }

    /// The bound functions declared by this type.
    #[inline(always)]
    pub fn functions(&self) -> &[Function] {
        match self.functions.get() {
            Some(functions) => functions,
            None => &[],
        }
    }

    /// Looks up a function by name in this type and its ancestors.
    pub fn function(&self, name: &str) -> Option<&Function> {
        let mut current = Some(self);

        while let Some(ty) = current {
            if let Some(function) = ty.functions().iter().find(|function| function.name() == name) {
                return Some(function);
            }

            current = ty.parent();
        }

        None
    }

    /// Calls the function `name` on the `object`.
    ///
    /// The object must be an instance of this type.
    pub fn invoke(&self, name: &str, object: &Object, args: &[Value]) -> TypeResult<Value> {
        let Some(function) = self.function(name) else {
            return Err(TypeError::UnknownFunction {
                ty: self.qualified.clone(),
                function: name.into(),
            });
        };

        if !object.ty().is_a(self) {
            return Err(TypeError::InvalidTemplate {
                ty: self.qualified.clone(),
                template: object.ty().qualified.clone(),
            });
        }

        (function.native)(object, args)
    }

    /// The enumerators of an enumeration, in declaration order.
    #[inline(always)]
    pub fn enumerators(&self) -> &[Enumerator] {
        match self.enumerators.get() {
            Some(enumerators) => enumerators,
            None => &[],
        }
    }

    /// Looks up an enumerator value by name.
    #[inline]
    pub fn enum_value(&self, name: &str) -> Option<i64> {
        self.enumerators()
            .iter()
            .find(|enumerator| enumerator.name.as_str() == name)
            .map(|enumerator| enumerator.value)
    }

    /// Looks up an enumerator name by value.
    #[inline]
    pub fn enum_name(&self, value: i64) -> Option<&str> {
        self.enumerators()
            .iter()
            .find(|enumerator| enumerator.value == value)
            .map(|enumerator| enumerator.name.as_str())
    }

    /// Looks up a metadata entry by key in this type's declaration.
    #[inline]
    pub fn metadata(&self, key: &str) -> Option<&str> {
        lookup_meta(&self.declaration.metadata, key)
    }

    /// The constructor declared by this type itself, if any.
    #[inline(always)]
    pub(crate) fn own_constructor(&self) -> Option<ConstructorFn> {
        self.constructor.get().copied().flatten()
    }

    #[inline(always)]
    pub(crate) fn post_init_hook(&self) -> Option<PostInitFn> {
        self.declaration.post_init
    }
}

/// An iterator over the [ancestors](TypeDescriptor::ancestors) of a type.
pub struct Ancestors {
    next: Option<&'static TypeDescriptor>,
}

impl Iterator for Ancestors {
    type Item = &'static TypeDescriptor;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;

        self.next = current.parent();

        Some(current)
    }
}

impl FusedIterator for Ancestors {}

#[inline]
pub(crate) fn lookup_meta<'a>(metadata: &'a [(CompactString, CompactString)], key: &str) -> Option<&'a str> {
    metadata
        .iter()
        .find(|(entry, _)| entry.as_str() == key)
        .map(|(_, value)| value.as_str())
}
