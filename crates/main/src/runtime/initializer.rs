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
    cell::UnsafeCell,
    fmt::{Debug, Formatter},
    mem::take,
    sync::atomic::{AtomicUsize, Ordering as AtomicOrdering},
};

use compact_str::{format_compact, CompactString};
use log::{trace, warn};

use crate::{
    report::debug_unreachable,
    runtime::{
        declaration::DefaultValue,
        Field,
        InstanceGraph,
        Object,
        ObjectFlags,
        TypeDescriptor,
        TypeError,
        TypeKind,
        TypeResult,
        TypeSystem,
        Value,
        OBJECTS_LOG,
    },
};

thread_local! {
    // The stack of open object initializers of this thread.
    static SCOPES: UnsafeCell<Vec<Scope>> = const { UnsafeCell::new(Vec::new()) };

    // The stack of running post-initialization hooks of this thread.
    static CHECKS: UnsafeCell<Vec<PostInitCheck>> = const { UnsafeCell::new(Vec::new()) };
}

/// Parameters of a new object.
///
/// ```
/// # use forma::runtime::{NewObject, Registries, SystemConfig, TypeDeclaration, TypeKind, TypeSystem};
/// let registries = Registries::leak();
///
/// registries.register(TypeKind::Class, "demo", "Node", || {
///     TypeDeclaration::new().constructor(|_| Ok(()))
/// });
///
/// let system = TypeSystem::new(SystemConfig::new(), registries);
/// let _ = system.process_registrations();
///
/// let node = system.find("Node").unwrap();
/// let root = system.new_object(NewObject::new(node).name("Root")).unwrap();
/// let leaf = system.new_object(NewObject::new(node).outer(root.clone())).unwrap();
///
/// assert_eq!(root.name(), "Root");
/// assert_eq!(leaf.outer(), Some(root.clone()));
/// assert_eq!(root.subobjects(), vec![leaf]);
/// ```
pub struct NewObject<'a> {
    ty: &'static TypeDescriptor,
    outer: Option<Object>,
    name: Option<CompactString>,
    template: Option<Object>,
    overrides: SubobjectOverrides,
    graph: Option<&'a mut InstanceGraph>,
    on_initialized: Option<InitializedHook<'a>>,
    default: bool,
}

type InitializedHook<'a> = Box<dyn FnOnce(&Object) -> TypeResult<()> + 'a>;

impl<'a> Debug for NewObject<'a> {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("NewObject")
            .field("ty", &self.ty.qualified_name())
            .field("outer", &self.outer)
            .field("name", &self.name)
            .field("template", &self.template)
            .field("overrides", &self.overrides)
            .finish_non_exhaustive()
    }
}

impl<'a> NewObject<'a> {
    /// Parameters of a new instance of the `ty` class.
    #[inline(always)]
    pub fn new(ty: &'static TypeDescriptor) -> Self {
        Self {
            ty,
            outer: None,
            name: None,
            template: None,
            overrides: SubobjectOverrides::new(),
            graph: None,
            on_initialized: None,
            default: false,
        }
    }

    #[inline(always)]
    pub(crate) fn default_of(ty: &'static TypeDescriptor, template: Option<Object>) -> Self {
        Self {
            template,
            default: true,
            ..Self::new(ty)
        }
    }

    /// The object that owns the new object.
    #[inline(always)]
    pub fn outer(mut self, outer: Object) -> Self {
        self.outer = Some(outer);
        self
    }

    /// The name of the new object. If omitted, the name is generated from the
    /// class name and the object number.
    #[inline(always)]
    pub fn name(mut self, name: impl Into<CompactString>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// The template object the new object copies its field values from.
    ///
    /// The template's class must be related to the new object's class: it
    /// must be the same class, an ancestor, or a descendant. If omitted, the
    /// class's default instance is the template.
    #[inline(always)]
    pub fn template(mut self, template: Object) -> Self {
        self.template = Some(template);
        self
    }

    /// Replaces or skips the default subobjects created by the constructors.
    #[inline(always)]
    pub fn overrides(mut self, overrides: SubobjectOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// The instance graph shared with the enclosing construction. If omitted,
    /// the object gets a graph of its own, rooted at the template.
    #[inline(always)]
    pub fn graph(mut self, graph: &'a mut InstanceGraph) -> Self {
        self.graph = Some(graph);
        self
    }

    /// A hook called after the field values are initialized and before the
    /// subobjects are instanced.
    #[inline(always)]
    pub fn on_initialized(mut self, hook: impl FnOnce(&Object) -> TypeResult<()> + 'a) -> Self {
        self.on_initialized = Some(Box::new(hook));
        self
    }
}

/// A replacement of a default subobject.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubobjectOverride {
    /// Creates the subobject as an instance of this class, which must derive
    /// from the class requested by the constructor.
    Replace(&'static TypeDescriptor),

    /// Does not create the subobject.
    Skip,
}

/// A set of default subobject replacements keyed by subobject name.
///
/// Nested subobjects are addressed with dotted names: `"body.wheel"` is the
/// `wheel` subobject created by the constructor of the `body` subobject.
#[derive(Clone, Debug, Default)]
pub struct SubobjectOverrides {
    entries: Vec<(CompactString, SubobjectOverride)>,
}

impl SubobjectOverrides {
    /// Creates an empty set.
    #[inline(always)]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the `name` subobject as an instance of `ty`.
    #[inline(always)]
    pub fn replace(mut self, name: impl Into<CompactString>, ty: &'static TypeDescriptor) -> Self {
        self.entries.push((name.into(), SubobjectOverride::Replace(ty)));
        self
    }

    /// Does not create the `name` subobject.
    #[inline(always)]
    pub fn skip(mut self, name: impl Into<CompactString>) -> Self {
        self.entries.push((name.into(), SubobjectOverride::Skip));
        self
    }

    /// Looks up the replacement of the `name` subobject.
    pub fn get(&self, name: &str) -> Option<SubobjectOverride> {
        self.entries
            .iter()
            .rev()
            .find(|(candidate, _)| candidate.as_str() == name)
            .map(|(_, entry)| *entry)
    }

    /// Returns true if the set has no replacements.
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn nested(&self, name: &str) -> Self {
        let entries = self
            .entries
            .iter()
            .filter_map(|(candidate, entry)| {
                let rest = candidate.strip_prefix(name)?.strip_prefix('.')?;

                Some((CompactString::from(rest), *entry))
            })
            .collect();

        Self { entries }
    }
}

/// The stage of an [ObjectInitializer].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum InitStage {
    /// The object is allocated, and its constructors are running.
    Created,

    /// The object's field values are copied from the template.
    FieldsInitialized,

    /// The field values of the deferred subobjects are initialized.
    SubobjectsInitialized,

    /// The owned references of the object and its subobjects are resolved.
    Instanced,

    /// The post-initialization hooks have run.
    Finalized,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum InitMode {
    Instance,
    Default,
    Deferred,
}

/// The context of a running class constructor.
///
/// Each object under construction has exactly one initializer. The
/// initializer gives constructors access to the object and its template, and
/// creates the default subobjects. After the constructors return, the
/// initializer finishes the object: it copies the field values from the
/// template, resolves owned references through the instance graph, and runs
/// the post-initialization hooks.
///
/// The initializers of a thread form a stack, with the innermost object
/// under construction on top.
pub struct ObjectInitializer<'g> {
    system: &'static TypeSystem,
    mode: InitMode,
    target: Object,
    template: Option<Object>,
    overrides: SubobjectOverrides,
    pending: Vec<PendingSubobject>,
    graph: GraphSlot<'g>,
    on_initialized: Option<InitializedHook<'g>>,
    serial: usize,
    stage: InitStage,
    closed: bool,
}

impl<'g> Debug for ObjectInitializer<'g> {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ObjectInitializer")
            .field("target", &self.target)
            .field("template", &self.template)
            .field("stage", &self.stage)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl<'g> Drop for ObjectInitializer<'g> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }

        warn!(
            target: OBJECTS_LOG,
            "Initializer of {} discarded at {:?} stage.",
            self.target,
            self.stage,
        );

        let _ = self.close();
    }
}

impl<'g> ObjectInitializer<'g> {
    /// The object under construction.
    #[inline(always)]
    pub fn target(&self) -> &Object {
        &self.target
    }

    /// The template the object copies its field values from.
    #[inline(always)]
    pub fn template(&self) -> Option<&Object> {
        self.template.as_ref()
    }

    /// Returns true if the object under construction is a default instance.
    #[inline(always)]
    pub fn is_default(&self) -> bool {
        self.mode == InitMode::Default
    }

    /// The type system that constructs the object.
    #[inline(always)]
    pub fn system(&self) -> &'static TypeSystem {
        self.system
    }

    /// The current stage of the initializer.
    #[inline(always)]
    pub fn stage(&self) -> InitStage {
        self.stage
    }

    /// The instance graph of the construction.
    #[inline(always)]
    pub fn graph(&mut self) -> &mut InstanceGraph {
        self.graph.get_mut()
    }

    /// Sets a field value of the object under construction by path.
    ///
    /// Values set by constructors are overwritten by the template values of
    /// the same fields unless the fields belong to native classes.
    #[inline(always)]
    pub fn set(&self, path: &str, value: impl Into<Value>) -> TypeResult<()> {
        self.target.set(path, value)
    }

    /// The object constructed by the innermost open initializer of this
    /// thread.
    pub fn current_target() -> Option<Object> {
        SCOPES.with(|scopes| {
            // Safety: Access is localized.
            let scopes = unsafe { &*scopes.get() };

            scopes.last().map(|scope| scope.target.clone())
        })
    }

    /// The number of open initializers of this thread.
    pub fn depth() -> usize {
        SCOPES.with(|scopes| {
            // Safety: Access is localized.
            let scopes = unsafe { &*scopes.get() };

            scopes.len()
        })
    }

    /// Creates a default subobject of the class named `ty`, owned by the
    /// object under construction.
    ///
    /// See [create_default_subobject_of](Self::create_default_subobject_of).
    pub fn create_default_subobject(&mut self, name: &str, ty: &str) -> TypeResult<Option<Object>> {
        let ty = self.system.resolve(ty)?;

        self.create_default_subobject_of(name, ty)
    }

    /// Creates a default subobject of the `ty` class, owned by the object
    /// under construction.
    ///
    /// If the template has a subobject with the same name, references to it
    /// resolve to the new subobject. That subobject is also the template of
    /// the new one, unless the new one is of a more derived class. Otherwise
    /// the new subobject copies the default instance of its class.
    ///
    /// The subobject's constructors run immediately, but its field values are
    /// initialized when the object under construction completes.
    ///
    /// Returns None if the subobject is [skipped](SubobjectOverrides::skip).
    pub fn create_default_subobject_of(
        &mut self,
        name: &str,
        ty: &'static TypeDescriptor,
    ) -> TypeResult<Option<Object>> {
        let ty = match self.overrides.get(name) {
            Some(SubobjectOverride::Skip) => {
                trace!(target: OBJECTS_LOG, "Subobject {name} of {} skipped.", self.target);

                return Ok(None);
            }

            Some(SubobjectOverride::Replace(replacement)) => {
                if !replacement.is_a(ty) {
                    return Err(TypeError::InvalidTemplate {
                        ty: ty.qualified_name().into(),
                        template: replacement.qualified_name().into(),
                    });
                }

                replacement
            }

            None => ty,
        };

        check_instantiable(ty)?;

        let inherited = self
            .template
            .as_ref()
            .and_then(|template| template.find_subobject(name))
            .filter(|subobject| ty.is_a(subobject.ty()) || subobject.ty().is_a(ty));

        let template = match &inherited {
            Some(subobject) if subobject.ty().is_a(ty) => subobject.clone(),
            _ => ty.default_instance()?,
        };

        let child = Object::allocate(
            ty,
            Some(name.into()),
            Some(&self.target),
            Some(template.clone()),
            ObjectFlags::SUBOBJECT,
        );

        let graph = self.graph.get_mut();

        if let Some(inherited) = &inherited {
            if graph.instance_of(inherited).is_none() {
                graph.add_instance(inherited, &child);
            }
        }

        let mut nested = ObjectInitializer::open(
            self.system,
            InitMode::Deferred,
            child.clone(),
            Some(template),
            self.overrides.nested(name),
            GraphSlot::Borrowed(graph),
            None,
        );

        let pending = match nested.run_constructors() {
            Ok(()) => nested.defer(),
            Err(error) => {
                drop(nested);
                Err(error)
            }
        };

        match pending {
            Ok(pending) => self.pending.extend(pending),

            Err(error) => {
                self.target.remove_subobject(&child);
                return Err(error);
            }
        }

        trace!(target: OBJECTS_LOG, "Subobject {child} created.");

        Ok(Some(child))
    }

    /// Registers an object created by a constructor as a nested object whose
    /// initialization completes together with the object under construction.
    ///
    /// If the `template` is omitted, the child copies the default instance of
    /// its class.
    pub fn register_subobject(&mut self, child: Object, template: Option<Object>) -> TypeResult<()> {
        let template = match template {
            Some(template) => template,
            None => child.ty().default_instance()?,
        };

        self.pending.push(PendingSubobject {
            object: child,
            template: Some(template),
        });

        Ok(())
    }

    fn open(
        system: &'static TypeSystem,
        mode: InitMode,
        target: Object,
        template: Option<Object>,
        overrides: SubobjectOverrides,
        graph: GraphSlot<'g>,
        on_initialized: Option<InitializedHook<'g>>,
    ) -> Self {
        static NEXT_SERIAL: AtomicUsize = AtomicUsize::new(1);

        let serial = NEXT_SERIAL.fetch_add(1, AtomicOrdering::Relaxed);

        SCOPES.with(|scopes| {
            // Safety: Access is localized.
            let scopes = unsafe { &mut *scopes.get() };

            scopes.push(Scope {
                serial,
                target: target.clone(),
            });
        });

        trace!(target: OBJECTS_LOG, "Initializer of {target} opened.");

        Self {
            system,
            mode,
            target,
            template,
            overrides,
            pending: Vec::new(),
            graph,
            on_initialized,
            serial,
            stage: InitStage::Created,
            closed: false,
        }
    }

    fn run_constructors(&mut self) -> TypeResult<()> {
        for level in self.target.ty().lineage() {
            if level.is_native() {
                apply_defaults(&self.target, level)?;
            }

            if let Some(constructor) = level.own_constructor() {
                constructor(self)?;
            }
        }

        Ok(())
    }

    fn complete(mut self) -> TypeResult<Object> {
        initialize_fields(&self.target, self.template.as_ref(), self.mode)?;
        self.stage = InitStage::FieldsInitialized;

        for pending in &self.pending {
            initialize_fields(&pending.object, pending.template.as_ref(), InitMode::Deferred)?;
        }

        self.stage = InitStage::SubobjectsInitialized;

        if let Some(hook) = self.on_initialized.take() {
            hook(&self.target)?;
        }

        let graph = self.graph.get_mut();

        graph.instance_subobjects(&self.target)?;

        for pending in &self.pending {
            graph.instance_subobjects(&pending.object)?;
        }

        self.stage = InitStage::Instanced;

        for pending in &self.pending {
            post_initialize(&pending.object)?;
        }

        post_initialize(&self.target)?;

        self.stage = InitStage::Finalized;

        self.close()?;

        trace!(target: OBJECTS_LOG, "{} initialized.", self.target);

        Ok(self.target.clone())
    }

    fn defer(mut self) -> TypeResult<Vec<PendingSubobject>> {
        self.close()?;

        let mut pending = take(&mut self.pending);

        pending.push(PendingSubobject {
            object: self.target.clone(),
            template: self.template.take(),
        });

        Ok(pending)
    }

    fn close(&mut self) -> TypeResult<()> {
        if self.closed {
            return Ok(());
        }

        self.closed = true;

        SCOPES.with(|scopes| {
            // Safety: Access is localized.
            let scopes = unsafe { &mut *scopes.get() };

            let expected = match scopes.last() {
                Some(top) if top.serial == self.serial => {
                    let _ = scopes.pop();

                    return Ok(());
                }

                Some(top) => CompactString::from(top.target.ty().qualified_name()),
                None => CompactString::from("none"),
            };

            if let Some(position) = scopes.iter().rposition(|scope| scope.serial == self.serial) {
                let _ = scopes.remove(position);
            }

            Err(TypeError::ScopeMismatch {
                expected,
                actual: self.target.ty().qualified_name().into(),
            })
        })
    }
}

/// The context of a running post-initialization hook.
///
/// A hook must call [super_post_init](Self::super_post_init) exactly once to
/// run the hook of the nearest ancestor class that declares one.
pub struct PostInit<'a> {
    object: &'a Object,
    level: &'static TypeDescriptor,
}

impl<'a> Debug for PostInit<'a> {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("PostInit")
            .field("object", self.object)
            .field("level", &self.level.qualified_name())
            .finish()
    }
}

impl<'a> PostInit<'a> {
    /// The object being initialized.
    #[inline(always)]
    pub fn object(&self) -> &'a Object {
        self.object
    }

    /// The class that declares the running hook.
    #[inline(always)]
    pub fn level(&self) -> &'static TypeDescriptor {
        self.level
    }

    /// Runs the post-initialization hook of the nearest ancestor that
    /// declares one.
    pub fn super_post_init(&mut self) -> TypeResult<()> {
        let address = self.object.addr();

        CHECKS.with(|checks| {
            // Safety: Access is localized.
            let checks = unsafe { &mut *checks.get() };

            let Some(top) = checks.last_mut() else {
                // Safety: Hooks only run inside run_post_init.
                unsafe { debug_unreachable!("Post-init check stack is empty.") }
            };

            if top.object != address || !std::ptr::eq(top.level, self.level) {
                return Err(TypeError::ScopeMismatch {
                    expected: top.level.qualified_name().into(),
                    actual: self.level.qualified_name().into(),
                });
            }

            if top.reached {
                return Err(TypeError::RepeatedPostInit {
                    ty: self.level.qualified_name().into(),
                });
            }

            top.reached = true;

            Ok(())
        })?;

        match self
            .level
            .ancestors()
            .find(|ancestor| ancestor.post_init_hook().is_some())
        {
            Some(next) => run_post_init(self.object, next),
            None => Ok(()),
        }
    }
}

impl TypeSystem {
    /// Creates a new instance of a class.
    ///
    /// The function allocates the object, runs the constructors of its class
    /// from the root class down, initializes the field values from the
    /// template, deep-copies the subobjects owned by the template that the
    /// object's instanced fields refer to, and runs the post-initialization
    /// hooks.
    ///
    /// Abstract classes and interfaces cannot be instantiated. On failure,
    /// the object is detached from its outer object.
    pub fn new_object(&'static self, parameters: NewObject<'_>) -> TypeResult<Object> {
        let NewObject {
            ty,
            outer,
            name,
            template,
            overrides,
            graph,
            on_initialized,
            default,
        } = parameters;

        match default {
            true => {
                if ty.kind() != TypeKind::Class || ty.is_interface() {
                    return Err(TypeError::AbstractInstantiation {
                        ty: ty.qualified_name().into(),
                    });
                }
            }

            false => check_instantiable(ty)?,
        }

        if !ty.is_constructed() {
            return Err(TypeError::Unconstructed {
                ty: ty.name().into(),
                module: ty.module().name().into(),
                stage: ty.stage(),
            });
        }

        if let Some(template) = &template {
            if !ty.is_a(template.ty()) && !template.ty().is_a(ty) {
                return Err(TypeError::InvalidTemplate {
                    ty: ty.qualified_name().into(),
                    template: template.ty().qualified_name().into(),
                });
            }
        }

        let template = match (default, template) {
            (false, None) => Some(ty.default_instance()?),
            (_, template) => template,
        };

        let flags = match default {
            true => ObjectFlags::DEFAULT_INSTANCE,
            false => ObjectFlags::EMPTY,
        };

        let object = Object::allocate(ty, name, outer.as_ref(), template.clone(), flags);

        let graph = match graph {
            Some(graph) => {
                if let Some(template) = &template {
                    if graph.instance_of(template).is_none() {
                        graph.add_instance(template, &object);
                    }
                }

                if graph.destination_root().is_none() {
                    graph.set_destination_root(object.clone());
                }

                GraphSlot::Borrowed(graph)
            }

            None => GraphSlot::Owned(InstanceGraph::rooted(template.clone(), object.clone())),
        };

        let mode = match default {
            true => InitMode::Default,
            false => InitMode::Instance,
        };

        let mut initializer = ObjectInitializer::open(
            self,
            mode,
            object.clone(),
            template,
            overrides,
            graph,
            on_initialized,
        );

        let result = match initializer.run_constructors() {
            Ok(()) => initializer.complete(),
            Err(error) => {
                drop(initializer);
                Err(error)
            }
        };

        if result.is_err() {
            if let Some(outer) = &outer {
                outer.remove_subobject(&object);
            }
        }

        result
    }

    /// Creates a copy of the `source` object together with all of its owned
    /// subobjects.
    ///
    /// Every object reference in the copied tree that points inside the
    /// source tree is redirected to the corresponding copy.
    pub fn duplicate(&'static self, source: &Object, outer: Option<&Object>) -> TypeResult<Object> {
        let mut graph = InstanceGraph::for_duplication(source.clone());

        let mut parameters = NewObject::new(source.ty())
            .name(format_compact!("{}_copy", source.name()))
            .template(source.clone());

        if let Some(outer) = outer {
            parameters = parameters.outer(outer.clone());
        }

        self.new_object(parameters.graph(&mut graph))
    }

    /// Resolves the owned references of an object
    /// [marked as loaded](Object::mark_needs_load) through the graph.
    ///
    /// Does nothing if the object does not need loading.
    pub fn resolve_loaded(&'static self, object: &Object, graph: &mut InstanceGraph) -> TypeResult<()> {
        if !object.needs_load() {
            return Ok(());
        }

        object.clear_flags(ObjectFlags::NEEDS_LOAD);

        let loading = graph.is_loading();

        graph.set_loading(true);

        let result = graph.instance_subobjects(object);

        graph.set_loading(loading);

        trace!(target: OBJECTS_LOG, "{object} loaded.");

        result
    }
}

enum GraphSlot<'g> {
    Owned(InstanceGraph),
    Borrowed(&'g mut InstanceGraph),
}

impl<'g> GraphSlot<'g> {
    #[inline(always)]
    fn get_mut(&mut self) -> &mut InstanceGraph {
        match self {
            Self::Owned(graph) => graph,
            Self::Borrowed(graph) => &mut **graph,
        }
    }
}

struct Scope {
    serial: usize,
    target: Object,
}

struct PendingSubobject {
    object: Object,
    template: Option<Object>,
}

struct PostInitCheck {
    object: usize,
    level: &'static TypeDescriptor,
    reached: bool,
}

fn check_instantiable(ty: &'static TypeDescriptor) -> TypeResult<()> {
    if ty.kind() != TypeKind::Class || ty.is_abstract() || ty.is_interface() {
        return Err(TypeError::AbstractInstantiation {
            ty: ty.qualified_name().into(),
        });
    }

    Ok(())
}

fn default_value(default: &DefaultValue) -> Value {
    match default {
        DefaultValue::Value(value) => value.clone(),
        DefaultValue::Enumerator(name) => Value::Str(name.clone()),
    }
}

// Writes the defaults declared by the `level` type: the defaults of its own
// fields, then its overrides of the inherited defaults.
fn apply_defaults(object: &Object, level: &'static TypeDescriptor) -> TypeResult<()> {
    for field in level.fields() {
        if let Some(default) = field.default() {
            object.write_field(field, 0, None, default_value(default))?;
        }
    }

    for (name, default) in &level.declaration.overrides {
        let field = level.field_or_error(name)?;

        object.write_field(field, 0, None, default_value(default))?;
    }

    Ok(())
}

fn apply_config(object: &Object) -> TypeResult<()> {
    let ty = object.ty();

    let Some(source) = &ty.system().config().config_source else {
        return Ok(());
    };

    for field in ty.linked_layout().properties() {
        if !field.is_config() {
            continue;
        }

        let Some(value) = source.value(ty.module().name(), ty.name(), field.name()) else {
            continue;
        };

        if let Err(error) = object.write_field(field, 0, None, value) {
            warn!(target: OBJECTS_LOG, "Config value of {object} ignored. {error}");
        }
    }

    Ok(())
}

fn copy_fields<'f>(object: &Object, source: &Object, fields: impl IntoIterator<Item = &'f &'static Field>) {
    if object == source {
        return;
    }

    let source_memory = source.read_memory();
    let mut target_memory = object.write_memory();

    for field in fields {
        // Safety: The source type contains every copied field at the same
        //         offset, since descendants inherit the layout of ancestors.
        unsafe { field.copy(target_memory.as_mut_ptr(), source_memory.as_ptr()) }
    }
}

fn initialize_fields(object: &Object, template: Option<&Object>, mode: InitMode) -> TypeResult<()> {
    let ty = object.ty();
    let layout = ty.linked_layout();

    if mode == InitMode::Default {
        if let Some(template) = template {
            let inherited = layout
                .post_construct()
                .iter()
                .filter(|field| !std::ptr::eq(field.owner(), ty));

            copy_fields(object, template, inherited);
        }

        if !ty.is_native() {
            apply_defaults(object, ty)?;
        }

        return apply_config(object);
    }

    let Some(template) = template else {
        return Ok(());
    };

    if ty.existing_default_instance().as_ref() == Some(template) {
        copy_fields(object, template, layout.post_construct());

        return Ok(());
    }

    let defaults = ty.default_instance()?;
    let template_ty = template.ty();

    let (from_template, from_defaults) = layout
        .properties()
        .iter()
        .partition::<Vec<_>, _>(|field| !field.is_transient() && template_ty.is_a(field.owner()));

    copy_fields(object, template, from_template);
    copy_fields(object, &defaults, from_defaults);

    Ok(())
}

fn post_initialize(object: &Object) -> TypeResult<()> {
    let ty = object.ty();

    let level = std::iter::once(ty)
        .chain(ty.ancestors())
        .find(|level| level.post_init_hook().is_some());

    if let Some(level) = level {
        run_post_init(object, level)?;
    }

    object.set_flags(ObjectFlags::INITIALIZED);

    Ok(())
}

fn run_post_init(object: &Object, level: &'static TypeDescriptor) -> TypeResult<()> {
    let Some(hook) = level.post_init_hook() else {
        return Ok(());
    };

    CHECKS.with(|checks| {
        // Safety: Access is localized.
        let checks = unsafe { &mut *checks.get() };

        checks.push(PostInitCheck {
            object: object.addr(),
            level,
            reached: false,
        });
    });

    let result = hook(&mut PostInit { object, level });

    let reached = CHECKS.with(|checks| {
        // Safety: Access is localized.
        let checks = unsafe { &mut *checks.get() };

        checks.pop().map(|check| check.reached).unwrap_or(false)
    });

    result?;

    if !reached {
        return Err(TypeError::UnchainedPostInit {
            ty: level.qualified_name().into(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::runtime::{
        FieldDeclaration,
        FieldFlags,
        FieldType,
        MapConfigSource,
        NewObject,
        Object,
        ObjectInitializer,
        PostInit,
        Registries,
        SubobjectOverrides,
        SystemConfig,
        TypeDeclaration,
        TypeError,
        TypeFlags,
        TypeKind,
        TypeResult,
        TypeSystem,
        Value,
    };

    fn build_container(init: &mut ObjectInitializer<'_>) -> TypeResult<()> {
        assert_eq!(ObjectInitializer::current_target().as_ref(), Some(init.target()));

        if let Some(widget) = init.create_default_subobject("widget", "Widget")? {
            init.set("widget", widget)?;
        }

        let _ = init.create_default_subobject("helper", "Widget")?;

        Ok(())
    }

    fn append(object: &Object, mark: &str) -> TypeResult<()> {
        let trace = object.get("trace")?;

        object.set("trace", format!("{}{mark}", trace.as_str().unwrap_or_default()))
    }

    fn base_post_init(post: &mut PostInit<'_>) -> TypeResult<()> {
        post.super_post_init()?;
        post.object().set("trace", "B")
    }

    fn mid_post_init(post: &mut PostInit<'_>) -> TypeResult<()> {
        post.super_post_init()?;
        append(post.object(), "M")
    }

    fn leaf_post_init(post: &mut PostInit<'_>) -> TypeResult<()> {
        post.super_post_init()?;
        append(post.object(), "L")
    }

    fn objects(config: SystemConfig) -> &'static TypeSystem {
        let registries = Registries::leak();

        registries.register(TypeKind::Class, "ui", "Widget", || {
            TypeDeclaration::new()
                .constructor(|_| Ok(()))
                .field(FieldDeclaration::new("size", FieldType::Int).default(3))
        });

        registries.register(TypeKind::Class, "ui", "SpecialWidget", || {
            TypeDeclaration::new().parent("Widget").override_default("size", 8)
        });

        registries.register(TypeKind::Class, "ui", "Container", || {
            TypeDeclaration::new().constructor(build_container).field(
                FieldDeclaration::new("widget", FieldType::Object("Widget".into()))
                    .flags(FieldFlags::INSTANCED),
            )
        });

        registries.register(TypeKind::Class, "core", "Base", || {
            TypeDeclaration::new()
                .constructor(|_| Ok(()))
                .post_init(base_post_init)
                .field(FieldDeclaration::new("trace", FieldType::Str))
        });

        registries.register(TypeKind::Class, "core", "Mid", || {
            TypeDeclaration::new()
                .parent("Base")
                .post_init(mid_post_init)
                .field(FieldDeclaration::new("y", FieldType::Int))
        });

        registries.register(TypeKind::Class, "core", "Leaf", || {
            TypeDeclaration::new()
                .parent("Mid")
                .post_init(leaf_post_init)
                .field(FieldDeclaration::new("z", FieldType::Int).default(20))
        });

        registries.register(TypeKind::Class, "core", "Shape", || {
            TypeDeclaration::new()
                .flags(TypeFlags::ABSTRACT)
                .constructor(|_| Ok(()))
        });

        registries.register(TypeKind::Class, "core", "Drawable", || {
            TypeDeclaration::new().flags(TypeFlags::INTERFACE)
        });

        let system = TypeSystem::new(config, registries);

        let _ = system.process_registrations();

        system
    }

    #[test]
    fn test_default_subobjects() {
        let system = objects(SystemConfig::new());
        let container = system.find("Container").unwrap();

        let defaults = container.default_instance().unwrap();
        let default_widget = defaults.find_subobject("widget").unwrap();

        assert_eq!(defaults.get("widget").unwrap(), Value::Object(Some(default_widget.clone())));

        let object = system.new_object(NewObject::new(container)).unwrap();
        let widget = object.find_subobject("widget").unwrap();

        assert_ne!(widget, default_widget);
        assert_eq!(widget.outer(), Some(object.clone()));
        assert_eq!(widget.archetype(), Some(&default_widget));
        assert_eq!(widget.get("size").unwrap(), Value::Int(3));
        assert!(widget.is_initialized());
        assert_eq!(object.get("widget").unwrap(), Value::Object(Some(widget.clone())));
        assert_eq!(object.subobjects().len(), 2);

        widget.set("size", 7).unwrap();

        let copy = system
            .new_object(NewObject::new(container).template(object.clone()))
            .unwrap();

        let copied_widget = copy.get("widget").unwrap().as_object().cloned().unwrap();

        assert_ne!(copied_widget, widget);
        assert!(copied_widget.is_in(&copy));
        assert_eq!(copied_widget.get("size").unwrap(), Value::Int(7));
        assert_eq!(ObjectInitializer::depth(), 0);
        assert!(ObjectInitializer::current_target().is_none());
    }

    #[test]
    fn test_subobject_overrides() {
        let system = objects(SystemConfig::new());
        let container = system.find("Container").unwrap();
        let special = system.find("SpecialWidget").unwrap();

        let object = system
            .new_object(
                NewObject::new(container)
                    .overrides(SubobjectOverrides::new().replace("widget", special).skip("helper")),
            )
            .unwrap();

        let widget = object.find_subobject("widget").unwrap();

        assert_eq!(widget.ty(), special);
        assert_eq!(widget.get("size").unwrap(), Value::Int(8));
        assert_eq!(object.get("widget").unwrap(), Value::Object(Some(widget)));
        assert!(object.find_subobject("helper").is_none());

        let widget = system.find("Widget").unwrap();

        assert!(matches!(
            system.new_object(
                NewObject::new(container)
                    .overrides(SubobjectOverrides::new().replace("widget", container)),
            ),
            Err(TypeError::InvalidTemplate { .. }),
        ));

        assert!(matches!(
            system.new_object(NewObject::new(container).template(widget.default_instance().unwrap())),
            Err(TypeError::InvalidTemplate { .. }),
        ));
    }

    #[test]
    fn test_post_init_once() {
        let system = objects(SystemConfig::new());
        let leaf = system.find("Leaf").unwrap();

        assert_eq!(
            system.find("Mid").unwrap().default_instance().unwrap().get("trace").unwrap(),
            Value::from("BM"),
        );

        for _ in 0..3 {
            let object = system.new_object(NewObject::new(leaf)).unwrap();

            assert_eq!(object.get("trace").unwrap(), Value::from("BML"));
            assert!(object.is_initialized());
        }
    }

    #[test]
    fn test_post_init_chaining() {
        let registries = Registries::leak();

        registries.register(TypeKind::Class, "core", "Root", || {
            TypeDeclaration::new()
                .constructor(|_| Ok(()))
                .post_init(|post| post.super_post_init())
        });

        registries.register(TypeKind::Class, "core", "Broken", || {
            TypeDeclaration::new().parent("Root").post_init(|_| Ok(()))
        });

        registries.register(TypeKind::Class, "core", "Twice", || {
            TypeDeclaration::new().parent("Root").post_init(|post| {
                post.super_post_init()?;
                post.super_post_init()
            })
        });

        let mut config = SystemConfig::new();

        config.eager_defaults = false;

        let system = TypeSystem::new(config, registries);
        let _ = system.process_registrations();

        assert!(system
            .new_object(NewObject::new(system.find("Root").unwrap()))
            .unwrap()
            .is_initialized());

        assert!(matches!(
            system.new_object(NewObject::new(system.find("Broken").unwrap())),
            Err(TypeError::UnchainedPostInit { ty }) if ty.as_str() == "core.Broken",
        ));

        assert!(matches!(
            system.new_object(NewObject::new(system.find("Twice").unwrap())),
            Err(TypeError::RepeatedPostInit { ty }) if ty.as_str() == "core.Twice",
        ));

        assert!(system.find("Broken").unwrap().existing_default_instance().is_none());
        assert_eq!(ObjectInitializer::depth(), 0);
    }

    #[test]
    fn test_instantiation_rules() {
        let system = objects(SystemConfig::new());
        let shape = system.find("Shape").unwrap();
        let drawable = system.find("Drawable").unwrap();

        assert!(matches!(
            system.new_object(NewObject::new(shape)),
            Err(TypeError::AbstractInstantiation { .. }),
        ));

        assert!(shape.default_instance().unwrap().is_default_instance());

        assert!(matches!(
            system.new_object(NewObject::new(drawable)),
            Err(TypeError::AbstractInstantiation { .. }),
        ));

        assert!(drawable.default_instance().is_err());
    }

    #[test]
    fn test_initialized_hook() {
        let system = objects(SystemConfig::new());
        let leaf = system.find("Leaf").unwrap();
        let outer = system.new_object(NewObject::new(leaf)).unwrap();

        let mut calls = 0;

        let object = system
            .new_object(
                NewObject::new(leaf)
                    .outer(outer.clone())
                    .name("Inner")
                    .on_initialized(|object| {
                        calls += 1;
                        object.set("z", 5)
                    }),
            )
            .unwrap();

        assert_eq!(calls, 1);
        assert_eq!(object.name(), "Inner");
        assert_eq!(object.get("z").unwrap(), Value::Int(5));
        assert_eq!(outer.find_subobject("Inner"), Some(object));

        let failed = system.new_object(
            NewObject::new(leaf)
                .outer(outer.clone())
                .name("Failed")
                .on_initialized(|object| object.set("z", "text")),
        );

        assert!(matches!(failed, Err(TypeError::ValueMismatch { .. })));
        assert!(outer.find_subobject("Failed").is_none());
    }

    #[test]
    fn test_config_values() {
        let registries = Registries::leak();

        registries.register(TypeKind::Class, "game", "Car", || {
            TypeDeclaration::new()
                .constructor(|_| Ok(()))
                .field(
                    FieldDeclaration::new("speed", FieldType::Float)
                        .flags(FieldFlags::CONFIG)
                        .default(1.0f32),
                )
                .field(FieldDeclaration::new("seats", FieldType::Int).default(4))
        });

        let mut source = MapConfigSource::new();

        let _ = source.insert("game", "Car", "speed", 9.5f32);
        let _ = source.insert("game", "Car", "seats", 2);

        let system = TypeSystem::new(SystemConfig::new().with_config_source(source), registries);
        let _ = system.process_registrations();

        let car = system.find("Car").unwrap();
        let object = system.new_object(NewObject::new(car)).unwrap();

        assert_eq!(object.get("speed").unwrap(), Value::Float(9.5));
        assert_eq!(object.get("seats").unwrap(), Value::Int(4));
    }

    #[test]
    fn test_duplicate() {
        let system = objects(SystemConfig::new());
        let container = system.find("Container").unwrap();
        let holder = system.new_object(NewObject::new(container)).unwrap();
        let source = system.new_object(NewObject::new(container).outer(holder.clone())).unwrap();

        source.find_subobject("widget").unwrap().set("size", 5).unwrap();

        let copy = system.duplicate(&source, Some(&holder)).unwrap();
        let widget = copy.find_subobject("widget").unwrap();

        assert_ne!(copy, source);
        assert_eq!(copy.outer(), Some(holder.clone()));
        assert_eq!(copy.archetype(), Some(&source));
        assert_eq!(copy.get("widget").unwrap(), Value::Object(Some(widget.clone())));
        assert_eq!(widget.get("size").unwrap(), Value::Int(5));
        assert_eq!(copy.subobjects().len(), 2);
        assert_eq!(holder.subobjects().len(), 4);
    }
}
