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
    collections::VecDeque,
    fmt::{Debug, Formatter},
    ops::Deref,
    sync::{Condvar, Mutex, MutexGuard, RwLock},
    thread::{self, ThreadId},
};

use ahash::{AHashMap, AHashSet};
use compact_str::CompactString;
use lady_deirdre::sync::Lazy;
use log::{debug, error, info, trace, warn};
use semver::{Version, VersionReq};

use crate::runtime::{
    error::suggest,
    ConstructionStage,
    ModuleMeta,
    NativeTable,
    Registries,
    RegistrationEntry,
    SystemConfig,
    TypeDescriptor,
    TypeError,
    TypeKind,
    TypeResult,
    TypeResultExt,
    PIPELINE_LOG,
    REGISTRY_LOG,
};

/// The live type system: the owner of all type descriptors built from a set
/// of [Registries].
///
/// A type system is created once and lives for the rest of the process, as
/// do the descriptors it builds. The process-wide instance over the
/// [global registries](Registries::global) is available through
/// [TypeSystem::global]. Hosts and tests that need isolation create their
/// own systems with [TypeSystem::new].
///
/// The startup sequence is:
///
///  1. Modules register their types in the registries.
///  2. The module loader calls [on_module_loaded](Self::on_module_loaded) (or
///     [process_registrations](Self::process_registrations)) after each
///     module load. The call drains all pending registrations, constructs the
///     descriptors, and builds the default instances of the new classes.
///  3. The program creates objects with [new_object](Self::new_object).
///
/// All pipeline operations are synchronous and serialized by a reentrant
/// lock, so registrations may be processed from any thread.
pub struct TypeSystem {
    config: SystemConfig,
    registries: &'static Registries,
    natives: NativeTable,
    gate: PipelineGate,
    staged: Mutex<VecDeque<RegistrationEntry>>,
    recent: Mutex<Vec<&'static TypeDescriptor>>,
    index: RwLock<TypeIndex>,
    modules: RwLock<AHashMap<&'static str, &'static ModuleMeta>>,
}

#[derive(Default)]
struct TypeIndex {
    qualified: AHashMap<CompactString, &'static TypeDescriptor>,
    plain: AHashMap<&'static str, Vec<&'static TypeDescriptor>>,
    order: Vec<&'static TypeDescriptor>,
}

impl Debug for TypeSystem {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        let index = self.read_index();

        formatter
            .debug_struct("TypeSystem")
            .field("config", &self.config)
            .field("types", &index.order.len())
            .finish_non_exhaustive()
    }
}

/// The outcome of a [registration processing](TypeSystem::try_process_registrations)
/// call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProcessReport {
    /// The number of type descriptors constructed by the call.
    pub constructed: usize,

    /// The number of default instances built by the eager sweep.
    pub defaults: usize,

    /// The number of duplicate registrations ignored by the call.
    pub duplicates: usize,
}

impl TypeSystem {
    /// Creates a new type system over the `registries`.
    ///
    /// Type descriptors refer to their type system, so the system is
    /// allocated for the rest of the process.
    pub fn new(config: SystemConfig, registries: &'static Registries) -> &'static Self {
        Box::leak(Box::new(Self {
            config,
            registries,
            natives: NativeTable::new(),
            gate: PipelineGate::new(),
            staged: Mutex::new(VecDeque::new()),
            recent: Mutex::new(Vec::new()),
            index: RwLock::new(TypeIndex::default()),
            modules: RwLock::new(AHashMap::new()),
        }))
    }

    /// Returns the process-wide type system over the
    /// [global registries](Registries::global), with the default config.
    #[inline(always)]
    pub fn global() -> &'static Self {
        static GLOBAL: Lazy<&'static TypeSystem> =
            Lazy::new(|| TypeSystem::new(SystemConfig::new(), Registries::global()));

        GLOBAL.deref()
    }

    /// The system configuration.
    #[inline(always)]
    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    /// The registries this system consumes.
    #[inline(always)]
    pub fn registries(&self) -> &'static Registries {
        self.registries
    }

    /// The table of native entry points consulted when binding types.
    #[inline(always)]
    pub fn natives(&self) -> &NativeTable {
        &self.natives
    }

    /// Returns true if any registry has entries that have not been processed.
    #[inline(always)]
    pub fn has_pending_registrations(&self) -> bool {
        self.registries.has_pending() || !self.lock_staged().is_empty()
    }

    /// Looks up a constructed type by plain or `module.name` name.
    ///
    /// This function never constructs types.
    pub fn find(&self, name: &str) -> Option<&'static TypeDescriptor> {
        let ty = self.lookup(name)?;

        match ty.is_constructed() {
            true => Some(ty),
            false => None,
        }
    }

    /// Looks up a type by plain or `module.name` name, constructing it from
    /// the pending registrations if necessary.
    pub fn resolve(&'static self, name: &str) -> TypeResult<&'static TypeDescriptor> {
        if let Some(ty) = self.find(name) {
            return Ok(ty);
        }

        let _gate = self.gate.enter();

        if let Some(ty) = self.lookup(name) {
            if ty.is_constructed() {
                return Ok(ty);
            }

            return Err(TypeError::Unconstructed {
                ty: ty.name().into(),
                module: ty.module().name().into(),
                stage: ty.stage(),
            });
        }

        if let Some(entry) = self.take_pending(name) {
            return self.construct(entry);
        }

        let index = self.read_index();

        Err(TypeError::UnknownType {
            name: name.into(),
            suggestion: suggest(name, index.order.iter().map(|ty| ty.name())),
        })
    }

    /// All constructed types, in construction order.
    pub fn types(&self) -> Vec<&'static TypeDescriptor> {
        self.read_index()
            .order
            .iter()
            .copied()
            .filter(|ty| ty.is_constructed())
            .collect()
    }

    /// Returns the module metadata by name, creating an unversioned module
    /// if it does not exist.
    pub fn module(&self, name: &'static str) -> &'static ModuleMeta {
        if let Some(module) = self.read_modules().get(name) {
            return *module;
        }

        let mut modules = self
            .modules
            .write()
            .unwrap_or_else(|poison| poison.into_inner());

        *modules
            .entry(name)
            .or_insert_with(|| &*Box::leak(Box::new(ModuleMeta::new(name))))
    }

    /// Sets the version of the module.
    ///
    /// Fails with [InvalidVersion](TypeError::InvalidVersion) if the version
    /// string is not a valid semantic version, or if the module already has a
    /// different version.
    ///
    /// ```
    /// use forma::runtime::{Registries, SystemConfig, TypeSystem};
    ///
    /// let system = TypeSystem::new(SystemConfig::new(), Registries::leak());
    ///
    /// system.declare_module("physics", "1.4.2").unwrap();
    ///
    /// assert!(system.module_of("physics", "1.4").is_some());
    /// assert!(system.module_of("physics", "2").is_none());
    /// assert!(system.declare_module("physics", "1.5.0").is_err());
    /// ```
    pub fn declare_module(&self, name: &'static str, version: &str) -> TypeResult<&'static ModuleMeta> {
        let invalid = || TypeError::InvalidVersion {
            module: name.into(),
            version: version.into(),
        };

        let parsed = Version::parse(version).map_err(|_| invalid())?;

        let module = self.module(name);

        if !module.set_version(parsed) {
            return Err(invalid());
        }

        info!(target: REGISTRY_LOG, "Module {module} declared.");

        Ok(module)
    }

    /// Looks up a module by name and a version requirement in the
    /// `Cargo.toml` dependency syntax (e.g., `1.4` or `=1.4.2`).
    ///
    /// Returns None if the module does not exist, the requirement cannot be
    /// parsed, or the module version does not match it.
    pub fn module_of(&self, name: &str, version: &str) -> Option<&'static ModuleMeta> {
        let requirement = VersionReq::parse(version).ok()?;

        let module = *self.read_modules().get(name)?;

        match requirement.matches(module.version()) {
            true => Some(module),
            false => None,
        }
    }

    /// All known modules.
    pub fn modules(&self) -> Vec<&'static ModuleMeta> {
        self.read_modules().values().copied().collect()
    }

    /// The module loader entry point: processes all registrations that have
    /// become available, typically after loading a module.
    ///
    /// Panics if a type cannot be constructed.
    pub fn on_module_loaded(&'static self, module: &str) -> ProcessReport {
        info!(target: REGISTRY_LOG, "Processing registrations of module {module}.");

        let report = self.process_registrations();

        info!(
            target: REGISTRY_LOG,
            "Module {module} processed: {} type(s) constructed, {} default instance(s) built, \
            {} duplicate(s) ignored.",
            report.constructed,
            report.defaults,
            report.duplicates,
        );

        report
    }

    /// Processes all pending registrations. Panics if a type cannot be
    /// constructed.
    ///
    /// A failure to construct a type leaves the type system without a type
    /// other types may depend on, so the failure is unrecoverable.
    #[inline(always)]
    pub fn process_registrations(&'static self) -> ProcessReport {
        self.try_process_registrations()
            .expect_blame("Type registration processing failed.")
    }

    /// Processes all pending registrations.
    ///
    /// The function repeatedly drains the registries (enums, then structs,
    /// then classes) and constructs the drained types in registration order,
    /// constructing each type's dependencies first. Construction may register
    /// further types, so the function runs until no registrations remain.
    ///
    /// If [eager_defaults](SystemConfig::eager_defaults) is set, the function
    /// then builds the default instances of the new classes, module by module
    /// in module dependency order.
    pub fn try_process_registrations(&'static self) -> TypeResult<ProcessReport> {
        let _gate = self.gate.enter();

        let mut report = ProcessReport::default();

        loop {
            let mut progress = false;

            while self.registries.has_pending() || !self.lock_staged().is_empty() {
                progress = true;

                for kind in TypeKind::ALL {
                    let registry = self.registries.get(kind);
                    let drained = registry.drain_pending();

                    report.duplicates += registry.take_duplicates();

                    self.lock_staged().extend(drained);
                }

                loop {
                    let Some(entry) = self.lock_staged().pop_front() else {
                        break;
                    };

                    if self.lookup_qualified(entry.module, entry.name).is_some() {
                        report.duplicates += 1;

                        warn!(
                            target: REGISTRY_LOG,
                            "Duplicate {} {}.{} ignored: the name is taken by another type.",
                            entry.kind,
                            entry.module,
                            entry.name,
                        );

                        continue;
                    }

                    let _ = self.construct(entry)?;
                }
            }

            let recent = std::mem::take(&mut *self.lock_recent());

            if !recent.is_empty() {
                progress = true;

                report.constructed += recent.len();

                if self.config.eager_defaults {
                    report.defaults += self.sweep_defaults(&recent)?;
                }
            }

            if !progress {
                break;
            }
        }

        for kind in TypeKind::ALL {
            report.duplicates += self.registries.get(kind).take_duplicates();
        }

        Ok(report)
    }

    // Builds default instances of the classes grouped by module, foundational
    // modules first.
    fn sweep_defaults(&'static self, types: &[&'static TypeDescriptor]) -> TypeResult<usize> {
        let mut groups = AHashMap::<&'static str, Vec<&'static TypeDescriptor>>::new();
        let mut modules = Vec::new();

        for ty in types {
            if ty.kind() != TypeKind::Class || ty.is_interface() {
                continue;
            }

            let module = ty.module();

            if !groups.contains_key(module.name()) {
                modules.push(module);
            }

            groups.entry(module.name()).or_default().push(ty);
        }

        let mut built = 0;

        for module in module_order(&modules) {
            let Some(group) = groups.get(module.name()) else {
                continue;
            };

            debug!(
                target: PIPELINE_LOG,
                "Building {} default instance(s) of module {module}.",
                group.len(),
            );

            for ty in group {
                if ty.existing_default_instance().is_some() {
                    continue;
                }

                let _ = ty.default_instance()?;

                built += 1;
            }
        }

        Ok(built)
    }

    // Returns a constructed dependency, constructing it from the pending
    // registrations if necessary.
    pub(crate) fn require(
        &'static self,
        dependent: &'static TypeDescriptor,
        name: &str,
        stage: ConstructionStage,
        expected: TypeKind,
    ) -> TypeResult<&'static TypeDescriptor> {
        let ty = match self.lookup(name) {
            Some(ty) if ty.is_constructed() => ty,

            Some(ty) if ty.is_failed() => {
                error!(
                    target: PIPELINE_LOG,
                    "{} depends on {} which has failed to construct.",
                    dependent.qualified_name(),
                    ty.qualified_name(),
                );

                return Err(TypeError::FailedDependency {
                    ty: dependent.name().into(),
                    module: dependent.module().name().into(),
                    dependency: ty.qualified_name().into(),
                    stage: ty.stage(),
                });
            }

            Some(ty) => {
                error!(
                    target: PIPELINE_LOG,
                    "{} depends on {} which is under construction.",
                    dependent.qualified_name(),
                    ty.qualified_name(),
                );

                return Err(TypeError::InheritanceCycle {
                    ty: dependent.name().into(),
                    module: dependent.module().name().into(),
                });
            }

            None => match self.take_pending(name) {
                Some(entry) => self.construct(entry)?,

                None => {
                    error!(
                        target: PIPELINE_LOG,
                        "{} depends on unknown type {name}.",
                        dependent.qualified_name(),
                    );

                    return Err(TypeError::UnresolvedDependency {
                        ty: dependent.name().into(),
                        module: dependent.module().name().into(),
                        dependency: name.into(),
                        stage,
                    });
                }
            },
        };

        if ty.kind() != expected {
            return Err(TypeError::KindMismatch {
                ty: dependent.name().into(),
                module: dependent.module().name().into(),
                dependency: name.into(),
                expected,
                actual: ty.kind(),
            });
        }

        dependent.module().depend_on(ty.module());

        Ok(ty)
    }

    // Removes a not yet constructed registration by name, either from the
    // staged entries or from the registries.
    fn take_pending(&self, name: &str) -> Option<RegistrationEntry> {
        {
            let mut staged = self.lock_staged();

            if let Some(position) = staged.iter().position(|entry| entry.matches(name)) {
                return staged.remove(position);
            }
        }

        let entry = self.registries.take(name)?;

        trace!(
            target: REGISTRY_LOG,
            "{} {}.{} taken from its registry on demand.",
            entry.kind,
            entry.module,
            entry.name,
        );

        Some(entry)
    }

    #[inline(always)]
    pub(crate) fn publish(&self, ty: &'static TypeDescriptor) {
        let mut index = self
            .index
            .write()
            .unwrap_or_else(|poison| poison.into_inner());

        let _ = index.qualified.insert(ty.qualified.clone(), ty);
        index.plain.entry(ty.name()).or_default().push(ty);
        index.order.push(ty);
    }

    #[inline(always)]
    pub(crate) fn mark_recent(&self, ty: &'static TypeDescriptor) {
        self.lock_recent().push(ty);
    }

    pub(crate) fn lookup(&self, name: &str) -> Option<&'static TypeDescriptor> {
        let index = self.read_index();

        if let Some(ty) = index.qualified.get(name) {
            return Some(*ty);
        }

        index.plain.get(name)?.first().copied()
    }

    pub(crate) fn lookup_qualified(&self, module: &str, name: &str) -> Option<&'static TypeDescriptor> {
        self.read_index()
            .plain
            .get(name)?
            .iter()
            .find(|ty| ty.module().name() == module)
            .copied()
    }

    #[inline(always)]
    pub(crate) fn enter_pipeline(&self) -> PipelineGuard<'_> {
        self.gate.enter()
    }

    #[inline(always)]
    fn read_index(&self) -> std::sync::RwLockReadGuard<'_, TypeIndex> {
        self.index.read().unwrap_or_else(|poison| poison.into_inner())
    }

    #[inline(always)]
    fn read_modules(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, AHashMap<&'static str, &'static ModuleMeta>> {
        self.modules
            .read()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    #[inline(always)]
    fn lock_staged(&self) -> MutexGuard<'_, VecDeque<RegistrationEntry>> {
        self.staged.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    #[inline(always)]
    fn lock_recent(&self) -> MutexGuard<'_, Vec<&'static TypeDescriptor>> {
        self.recent.lock().unwrap_or_else(|poison| poison.into_inner())
    }
}

// Orders modules so that every module comes after the modules it depends on.
// Dependency cycles between modules are broken at the first revisit.
fn module_order(modules: &[&'static ModuleMeta]) -> Vec<&'static ModuleMeta> {
    fn visit(
        module: &'static ModuleMeta,
        visited: &mut AHashSet<&'static str>,
        order: &mut Vec<&'static ModuleMeta>,
    ) {
        if !visited.insert(module.name()) {
            return;
        }

        for dependency in module.dependencies() {
            visit(dependency, visited, order);
        }

        order.push(module);
    }

    let mut visited = AHashSet::new();
    let mut order = Vec::with_capacity(modules.len());

    for module in modules {
        visit(module, &mut visited, &mut order);
    }

    order
}

// A lock that serializes pipeline work between threads, but lets the owning
// thread reenter it from nested construction steps.
struct PipelineGate {
    state: Mutex<GateState>,
    released: Condvar,
}

struct GateState {
    owner: Option<ThreadId>,
    depth: usize,
}

pub(crate) struct PipelineGuard<'a> {
    gate: &'a PipelineGate,
}

impl<'a> Drop for PipelineGuard<'a> {
    fn drop(&mut self) {
        let mut state = self.gate.lock();

        state.depth -= 1;

        if state.depth == 0 {
            state.owner = None;
            self.gate.released.notify_one();
        }
    }
}

impl PipelineGate {
    #[inline(always)]
    fn new() -> Self {
        Self {
            state: Mutex::new(GateState {
                owner: None,
                depth: 0,
            }),
            released: Condvar::new(),
        }
    }

    fn enter(&self) -> PipelineGuard<'_> {
        let current = thread::current().id();
        let mut state = self.lock();

        loop {
            match state.owner {
                None => {
                    state.owner = Some(current);
                    state.depth = 1;
                    break;
                }

                Some(owner) if owner == current => {
                    state.depth += 1;
                    break;
                }

                Some(_) => {
                    state = self
                        .released
                        .wait(state)
                        .unwrap_or_else(|poison| poison.into_inner());
                }
            }
        }

        PipelineGuard { gate: self }
    }

    #[inline(always)]
    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(|poison| poison.into_inner())
    }
}
