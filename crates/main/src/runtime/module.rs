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
    ptr,
    sync::{Mutex, MutexGuard, OnceLock},
};

use semver::Version;

use crate::runtime::TypeDescriptor;

/// Metadata of a module: the unit of registration that declares a group of
/// types.
///
/// Modules are created by the [TypeSystem](crate::runtime::TypeSystem) the
/// first time a type of the module is constructed, or when the host
/// [declares](crate::runtime::TypeSystem::declare_module) the module's
/// version. A module that has never been declared has version `0.0.0`.
///
/// The type system records a dependency from module A to module B whenever
/// a type of A derives from, implements, or embeds a type of B. Default
/// instances are built in the order of these dependencies.
pub struct ModuleMeta {
    name: &'static str,
    version: OnceLock<Version>,
    types: Mutex<Vec<&'static TypeDescriptor>>,
    dependencies: Mutex<Vec<&'static ModuleMeta>>,
}

impl PartialEq for ModuleMeta {
    #[inline(always)]
    fn eq(&self, other: &Self) -> bool {
        ptr::eq(self, other)
    }
}

impl Eq for ModuleMeta {}

impl Hash for ModuleMeta {
    #[inline(always)]
    fn hash<H: Hasher>(&self, state: &mut H) {
        (self as *const Self as usize).hash(state)
    }
}

impl Debug for ModuleMeta {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        let alternate = formatter.alternate();
        let mut debug = formatter.debug_struct("ModuleMeta");

        let _ = debug
            .field("name", &self.name)
            .field("version", &self.version().to_string());

        if alternate {
            let types = self
                .types()
                .into_iter()
                .map(|ty| ty.name())
                .collect::<Vec<_>>();

            let _ = debug.field("types", &types);
        }

        debug.finish()
    }
}

impl Display for ModuleMeta {
    #[inline(always)]
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_fmt(format_args!("{}@{}", self.name, self.version()))
    }
}

impl ModuleMeta {
    #[inline(always)]
    pub(crate) fn new(name: &'static str) -> Self {
        Self {
            name,
            version: OnceLock::new(),
            types: Mutex::new(Vec::new()),
            dependencies: Mutex::new(Vec::new()),
        }
    }

    /// The module name.
    #[inline(always)]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The declared module version, or `0.0.0`.
    #[inline(always)]
    pub fn version(&self) -> &Version {
        static UNVERSIONED: Version = Version::new(0, 0, 0);

        self.version.get().unwrap_or(&UNVERSIONED)
    }

    /// Sets the version. Returns false if a different version has been set
    /// before.
    #[inline(always)]
    pub(crate) fn set_version(&self, version: Version) -> bool {
        self.version.get_or_init(|| version.clone()) == &version
    }

    /// The constructed types of the module, in construction order.
    #[inline(always)]
    pub fn types(&self) -> Vec<&'static TypeDescriptor> {
        lock(&self.types).clone()
    }

    /// The modules this module depends on.
    #[inline(always)]
    pub fn dependencies(&self) -> Vec<&'static ModuleMeta> {
        lock(&self.dependencies).clone()
    }

    #[inline(always)]
    pub(crate) fn attach_type(&self, ty: &'static TypeDescriptor) {
        lock(&self.types).push(ty);
    }

    pub(crate) fn depend_on(&self, other: &'static ModuleMeta) {
        if self == other {
            return;
        }

        let mut dependencies = lock(&self.dependencies);

        if !dependencies.contains(&other) {
            dependencies.push(other);
        }
    }
}

#[inline(always)]
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poison| poison.into_inner())
}

#[cfg(test)]
mod tests {
    use crate::runtime::{Registries, SystemConfig, TypeDeclaration, TypeKind, TypeSystem};

    #[test]
    fn test_module_debug() {
        let registries = Registries::leak();

        registries.register(TypeKind::Class, "physics", "Body", || {
            TypeDeclaration::new().constructor(|_| Ok(()))
        });

        let system = TypeSystem::new(SystemConfig::new(), registries);
        let _ = system.process_registrations();
        let module = system.declare_module("physics", "1.4.2").unwrap();

        let compact = format!("{module:?}");
        let detailed = format!("{module:#?}");

        assert!(compact.contains("1.4.2"));
        assert!(!compact.contains("Body"));
        assert!(detailed.contains("types"));
        assert!(detailed.contains("Body"));
    }
}
