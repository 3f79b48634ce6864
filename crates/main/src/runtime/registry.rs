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
    fmt::{Display, Formatter},
    ops::Deref,
    sync::Mutex,
};

use ahash::AHashSet;
use lady_deirdre::sync::Lazy;
use log::{trace, warn};

use crate::runtime::{DeclareFn, REGISTRY_LOG};

/// A kind of registered type.
///
/// The kinds are listed in the order in which the
/// [TypeSystem](crate::runtime::TypeSystem) drains their registries: enums
/// and structs are foundational for classes that nest them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TypeKind {
    /// An enumeration: a named set of integer enumerators.
    Enum,

    /// A plain data structure that can be embedded into other types by value.
    Struct,

    /// A class: the only kind of type that can have objects, default
    /// instances, and executable entry points.
    Class,
}

impl Display for TypeKind {
    #[inline(always)]
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Enum => formatter.write_str("enum"),
            Self::Struct => formatter.write_str("struct"),
            Self::Class => formatter.write_str("class"),
        }
    }
}

impl TypeKind {
    /// All type kinds in the registry drain order.
    pub const ALL: [Self; 3] = [Self::Enum, Self::Struct, Self::Class];
}

/// A single registration record of a [DeferredRegistry].
///
/// The record carries the type's identity and a function that produces the
/// type's declaration tables on demand. The declaration function is called
/// exactly once, when the type system constructs the type's descriptor.
#[derive(Clone, Copy, Debug)]
pub struct RegistrationEntry {
    /// The kind of the registered type.
    pub kind: TypeKind,

    /// The name of the module that declares the type.
    pub module: &'static str,

    /// The type name, unique within the module.
    pub name: &'static str,

    /// The declaration tables producer.
    pub declare: DeclareFn,
}

impl RegistrationEntry {
    /// Returns true if `name` refers to this entry either by the plain type
    /// name or by the qualified `module.name` form.
    #[inline]
    pub fn matches(&self, name: &str) -> bool {
        if self.name == name {
            return true;
        }

        match name.split_once('.') {
            Some((module, name)) => self.module == module && self.name == name,
            None => false,
        }
    }
}

/// An append-only list of type registrations of a single [TypeKind].
///
/// Registration is allowed at any time, including while the type system is
/// consuming earlier entries of the same registry. The consumer observes new
/// entries through the [drain_pending](Self::drain_pending) function, which
/// returns the entries added since the previous drain in registration order.
///
/// A registry remembers every `(module, name)` pair it has ever accepted and
/// ignores repeated registrations of the same pair.
pub struct DeferredRegistry {
    kind: TypeKind,
    state: Mutex<RegistryState>,
}

struct RegistryState {
    pending: Vec<RegistrationEntry>,
    known: AHashSet<(&'static str, &'static str)>,
    duplicates: usize,
}

impl DeferredRegistry {
    /// Creates an empty registry of the specified kind.
    #[inline(always)]
    pub fn new(kind: TypeKind) -> Self {
        Self {
            kind,
            state: Mutex::new(RegistryState {
                pending: Vec::new(),
                known: AHashSet::new(),
                duplicates: 0,
            }),
        }
    }

    /// Returns the kind of types this registry accepts.
    #[inline(always)]
    pub fn kind(&self) -> TypeKind {
        self.kind
    }

    /// Appends a new registration entry.
    ///
    /// Returns false if the `(module, name)` pair has been registered before.
    /// In this case the registry ignores the call.
    pub fn register(&self, module: &'static str, name: &'static str, declare: DeclareFn) -> bool {
        let mut state = self.lock();

        if !state.known.insert((module, name)) {
            state.duplicates += 1;

            warn!(
                target: REGISTRY_LOG,
                "Duplicate registration of {} {module}.{name} ignored.", self.kind,
            );

            return false;
        }

        trace!(target: REGISTRY_LOG, "Registered {} {module}.{name}.", self.kind);

        state.pending.push(RegistrationEntry {
            kind: self.kind,
            module,
            name,
            declare,
        });

        true
    }

    /// Removes and returns all entries registered since the previous drain,
    /// in registration order.
    pub fn drain_pending(&self) -> Vec<RegistrationEntry> {
        let drained = std::mem::take(&mut self.lock().pending);

        if !drained.is_empty() {
            trace!(
                target: REGISTRY_LOG,
                "Drained {} pending {} registration(s).",
                drained.len(),
                self.kind,
            );
        }

        drained
    }

    /// Returns true if the registry has entries that have not been drained
    /// yet. This function does not change the registry.
    #[inline(always)]
    pub fn has_pending(&self) -> bool {
        !self.lock().pending.is_empty()
    }

    /// Removes a single pending entry that [matches](RegistrationEntry::matches)
    /// the `name`, if any.
    ///
    /// The type system uses this function to construct a dependency that has
    /// been registered but not drained yet.
    pub fn take(&self, name: &str) -> Option<RegistrationEntry> {
        let mut state = self.lock();

        let index = state.pending.iter().position(|entry| entry.matches(name))?;

        Some(state.pending.remove(index))
    }

    /// Returns true if the `(module, name)` pair has ever been registered.
    #[inline(always)]
    pub fn contains(&self, module: &str, name: &str) -> bool {
        self.lock()
            .known
            .iter()
            .any(|(known_module, known_name)| *known_module == module && *known_name == name)
    }

    /// Returns the number of ignored duplicate registrations since the
    /// previous call of this function, and resets the counter.
    #[inline(always)]
    pub fn take_duplicates(&self) -> usize {
        std::mem::take(&mut self.lock().duplicates)
    }

    #[inline(always)]
    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryState> {
        self.state
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}

/// A set of [deferred registries](DeferredRegistry), one per [TypeKind].
///
/// The process-wide set is available through [Registries::global]. Hosts
/// and tests that need isolation create their own sets with
/// [Registries::leak] and pass them to
/// [TypeSystem::new](crate::runtime::TypeSystem::new).
pub struct Registries {
    enums: DeferredRegistry,
    structs: DeferredRegistry,
    classes: DeferredRegistry,
}

impl Default for Registries {
    #[inline(always)]
    fn default() -> Self {
        Self::new()
    }
}

impl Registries {
    /// Creates a new set of empty registries.
    #[inline(always)]
    pub fn new() -> Self {
        Self {
            enums: DeferredRegistry::new(TypeKind::Enum),
            structs: DeferredRegistry::new(TypeKind::Struct),
            classes: DeferredRegistry::new(TypeKind::Class),
        }
    }

    /// Creates a new set of empty registries with the static lifetime.
    ///
    /// Type descriptors are permanent, and so are the registries that feed
    /// them.
    #[inline(always)]
    pub fn leak() -> &'static Self {
        Box::leak(Box::new(Self::new()))
    }

    /// Returns the process-wide set of registries.
    #[inline(always)]
    pub fn global() -> &'static Self {
        static GLOBAL: Lazy<Registries> = Lazy::new(Registries::new);

        GLOBAL.deref()
    }

    /// Returns the registry of the specified kind.
    #[inline(always)]
    pub fn get(&self, kind: TypeKind) -> &DeferredRegistry {
        match kind {
            TypeKind::Enum => &self.enums,
            TypeKind::Struct => &self.structs,
            TypeKind::Class => &self.classes,
        }
    }

    /// Appends a registration entry to the registry of the specified kind.
    ///
    /// Returns false if the entry is a duplicate.
    #[inline(always)]
    pub fn register(
        &self,
        kind: TypeKind,
        module: &'static str,
        name: &'static str,
        declare: DeclareFn,
    ) -> bool {
        self.get(kind).register(module, name, declare)
    }

    /// Returns true if any registry has entries that have not been drained
    /// yet.
    #[inline(always)]
    pub fn has_pending(&self) -> bool {
        TypeKind::ALL
            .into_iter()
            .any(|kind| self.get(kind).has_pending())
    }

    /// Removes a pending entry that matches the `name` from any registry.
    #[inline]
    pub fn take(&self, name: &str) -> Option<RegistrationEntry> {
        TypeKind::ALL
            .into_iter()
            .find_map(|kind| self.get(kind).take(name))
    }
}

/// Registers a batch of type declarations in a set of
/// [Registries](crate::runtime::Registries).
///
/// Each line has the form `<kind> "<module>"."<name>" = <declaration fn>;`
/// where the kind is `enum`, `struct`, or `class`. The macro evaluates to the
/// number of accepted (non-duplicate) registrations.
///
/// ```
/// use forma::{declare_types, runtime::{Registries, TypeDeclaration}};
///
/// let registries = Registries::leak();
///
/// let accepted = declare_types!(registries => {
///     enum "core"."Color" = || TypeDeclaration::new().enumerator("Red", 0);
///     class "core"."Shape" = || TypeDeclaration::new().constructor(|_| Ok(()));
///     class "core"."Shape" = || TypeDeclaration::new();
/// });
///
/// assert_eq!(accepted, 2);
/// assert!(registries.has_pending());
/// ```
#[macro_export]
macro_rules! declare_types {
    (@kind enum) => { $crate::runtime::TypeKind::Enum };
    (@kind struct) => { $crate::runtime::TypeKind::Struct };
    (@kind class) => { $crate::runtime::TypeKind::Class };

    ($registries:expr => {
        $($kind:tt $module:literal . $name:literal = $declare:expr;)*
    }) => {{
        let registries: &$crate::runtime::Registries = $registries;
        let mut accepted = 0usize;

        $(
            if registries.register(
                $crate::declare_types!(@kind $kind),
                $module,
                $name,
                $declare,
            ) {
                accepted += 1;
            }
        )*

        accepted
    }};
}

#[cfg(test)]
mod tests {
    use crate::runtime::{DeferredRegistry, Registries, TypeDeclaration, TypeKind};

    fn empty() -> TypeDeclaration {
        TypeDeclaration::new()
    }

    #[test]
    fn test_registry_fifo() {
        let registry = DeferredRegistry::new(TypeKind::Class);

        assert!(!registry.has_pending());
        assert!(registry.register("core", "A", empty));
        assert!(registry.register("core", "B", empty));
        assert!(registry.has_pending());

        let drained = registry.drain_pending();

        assert_eq!(
            drained.iter().map(|entry| entry.name).collect::<Vec<_>>(),
            ["A", "B"],
        );

        assert!(!registry.has_pending());
        assert!(registry.drain_pending().is_empty());

        assert!(registry.register("core", "C", empty));
        assert_eq!(registry.drain_pending().len(), 1);
    }

    #[test]
    fn test_registry_duplicates() {
        let registry = DeferredRegistry::new(TypeKind::Struct);

        assert!(registry.register("core", "Vector", empty));
        assert!(!registry.register("core", "Vector", empty));
        assert!(registry.register("physics", "Vector", empty));

        let _ = registry.drain_pending();

        assert!(!registry.register("core", "Vector", empty));
        assert_eq!(registry.take_duplicates(), 2);
        assert_eq!(registry.take_duplicates(), 0);
        assert!(registry.contains("physics", "Vector"));
    }

    #[test]
    fn test_registry_take() {
        let registries = Registries::new();

        registries.register(TypeKind::Class, "core", "Base", empty);
        registries.register(TypeKind::Enum, "core", "Color", empty);

        let entry = registries.take("core.Color").unwrap();

        assert_eq!(entry.kind, TypeKind::Enum);
        assert!(registries.take("Color").is_none());
        assert!(registries.take("Base").is_some());
        assert!(!registries.has_pending());
    }
}
