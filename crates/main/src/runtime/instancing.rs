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

use ahash::{AHashMap, AHashSet};
use log::trace;

use crate::runtime::{
    BuildContext,
    Field,
    NewObject,
    Object,
    TransientInstancedPolicy,
    TypeDescriptor,
    TypeFlags,
    TypeResult,
    Value,
    OBJECTS_LOG,
};

/// The outcome of an [InstanceGraph] lookup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Instanced {
    /// The reference resolves to this value in the destination tree.
    Resolved(Option<Object>),

    /// The reference must stay as it is: it points outside the source tree,
    /// the field is not subject to instancing, or instancing is disabled.
    Untouched,

    /// The template object has no instance yet, and the lookup did not allow
    /// creating one.
    NoNewInstance,
}

/// Parameters of an [InstanceGraph] lookup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InstanceOptions {
    /// If set, a template object without an instance gets a new one.
    ///
    /// The default value is `true`.
    pub create: bool,

    /// If set, fields that are not [instanced](crate::runtime::FieldFlags::INSTANCED)
    /// are still remapped to the instances that already exist in the graph.
    /// In particular, references to the source root resolve to the
    /// destination root.
    ///
    /// The default value is `false`.
    pub allow_self_reference: bool,
}

impl Default for InstanceOptions {
    #[inline(always)]
    fn default() -> Self {
        Self::new()
    }
}

impl InstanceOptions {
    /// Creates options with default values.
    #[inline(always)]
    pub const fn new() -> Self {
        Self {
            create: true,
            allow_self_reference: false,
        }
    }
}

/// A template-to-instance mapping used to deep-copy a tree of owned
/// subobjects.
///
/// The source tree consists of the source root and every object owned by it,
/// directly or transitively. Instancing never creates instances of objects
/// outside the source tree; references to them are left untouched.
///
/// Within one graph each template object is instanced at most once: all
/// references to the same template resolve to the same instance.
///
/// The graph is passed explicitly through recursive object construction, so
/// independent trees can be instanced concurrently.
#[derive(Debug, Default)]
pub struct InstanceGraph {
    source_root: Option<Object>,
    destination_root: Option<Object>,
    instances: AHashMap<usize, (Object, Object)>,
    excluded: AHashSet<usize>,
    loading: bool,
    disabled: bool,
    duplicating: bool,
}

impl InstanceGraph {
    /// Creates a graph without roots.
    ///
    /// The first object created through the graph becomes the destination
    /// root.
    #[inline(always)]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a graph over the `source_root` tree.
    #[inline(always)]
    pub fn with_source(source_root: Object) -> Self {
        Self {
            source_root: Some(source_root),
            ..Self::default()
        }
    }

    // A graph that maps the source root to the destination root from the
    // start.
    pub(crate) fn rooted(source_root: Option<Object>, destination_root: Object) -> Self {
        let mut graph = Self::default();

        if let Some(source_root) = source_root {
            graph.add_instance(&source_root, &destination_root);
            graph.source_root = Some(source_root);
        }

        graph.destination_root = Some(destination_root);

        graph
    }

    // A graph in duplication mode: every object reference is subject to
    // instancing, and all subobjects of the source tree are copied.
    pub(crate) fn for_duplication(source_root: Object) -> Self {
        Self {
            source_root: Some(source_root),
            duplicating: true,
            ..Self::default()
        }
    }

    /// The root of the template tree.
    #[inline(always)]
    pub fn source_root(&self) -> Option<&Object> {
        self.source_root.as_ref()
    }

    /// The root of the tree under construction.
    #[inline(always)]
    pub fn destination_root(&self) -> Option<&Object> {
        self.destination_root.as_ref()
    }

    /// Sets the root of the tree under construction.
    #[inline(always)]
    pub fn set_destination_root(&mut self, root: Object) {
        self.destination_root = Some(root);
    }

    /// Switches the loading mode. In loading mode, cached instances that
    /// [need loading](Object::needs_load) are resolved before being handed
    /// out.
    #[inline(always)]
    pub fn set_loading(&mut self, loading: bool) {
        self.loading = loading;
    }

    /// Returns true if the graph is in loading mode.
    #[inline(always)]
    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Disables or enables instancing through this graph.
    #[inline(always)]
    pub fn set_disabled(&mut self, disabled: bool) {
        self.disabled = disabled;
    }

    /// Returns true if instancing through this graph is disabled.
    #[inline(always)]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Returns true if the graph duplicates an object tree.
    #[inline(always)]
    pub fn is_duplicating(&self) -> bool {
        self.duplicating
    }

    /// Excludes a field from instancing. References stored in this field are
    /// never deep-copied.
    #[inline(always)]
    pub fn exclude(&mut self, field: &'static Field) {
        let _ = self.excluded.insert(field as *const Field as usize);
    }

    /// Returns true if the field is excluded from instancing.
    #[inline(always)]
    pub fn is_excluded(&self, field: &Field) -> bool {
        self.excluded.contains(&(field as *const Field as usize))
    }

    /// Records that `instance` is the instance of `template`.
    #[inline(always)]
    pub fn add_instance(&mut self, template: &Object, instance: &Object) {
        let _ = self
            .instances
            .insert(template.addr(), (template.clone(), instance.clone()));
    }

    /// Returns the recorded instance of `template`.
    #[inline(always)]
    pub fn instance_of(&self, template: &Object) -> Option<Object> {
        self.instances
            .get(&template.addr())
            .map(|(_, instance)| instance.clone())
    }

    /// The number of recorded template-instance pairs.
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Returns true if the graph has no recorded pairs.
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Returns the object that a reference stored in the `field` of the
    /// `owner` object should point to.
    ///
    /// The `template_value` is the reference stored in the owner's template,
    /// and the `current_value` is the reference currently stored in the owner.
    ///
    /// The function returns [Instanced::Untouched] if instancing is disabled,
    /// or if the field is neither instanced nor allowed to self-reference.
    /// If the template value is absent while the current value is present,
    /// and the owner's archetype stores no reference in the field, the
    /// result is [Instanced::Resolved] with no value. Otherwise the function
    /// resolves the template value with [instance_object](Self::instance_object).
    pub fn instance_property_value(
        &mut self,
        field: &'static Field,
        template_value: Option<&Object>,
        current_value: Option<&Object>,
        owner: &Object,
        options: InstanceOptions,
    ) -> TypeResult<Instanced> {
        let config = owner.ty().system().config();

        if self.disabled || !config.instancing || self.is_excluded(field) {
            return Ok(Instanced::Untouched);
        }

        let instanced = field.is_instanced() || self.duplicating;

        if !instanced && !options.allow_self_reference {
            return Ok(Instanced::Untouched);
        }

        let template_value = match (template_value, current_value) {
            (Some(template_value), _) => template_value,

            (None, Some(current_value)) => {
                if archetype_lacks_value(owner, field) {
                    return Ok(Instanced::Resolved(None));
                }

                current_value
            }

            (None, None) => return Ok(Instanced::Untouched),
        };

        if field.is_transient() && field.is_instanced() && self.is_owned(template_value) {
            match config.transient_instanced {
                TransientInstancedPolicy::LeaveEmpty => return Ok(Instanced::Resolved(None)),
                TransientInstancedPolicy::ShareReference => return Ok(Instanced::Untouched),
                TransientInstancedPolicy::DeepCopy => (),
            }
        }

        let options = match instanced {
            true => options,

            false => InstanceOptions {
                create: false,
                ..options
            },
        };

        self.instance_object(template_value, options)
    }

    // Returns true if the object has an instance or belongs to the source
    // tree.
    fn is_owned(&self, object: &Object) -> bool {
        if self.instances.contains_key(&object.addr()) {
            return true;
        }

        match &self.source_root {
            Some(source_root) => object.is_in(source_root),
            None => false,
        }
    }

    /// Returns the instance of the `template` object in the destination tree,
    /// creating it if necessary.
    ///
    /// Objects outside the source tree and objects that already belong to the
    /// destination tree are [untouched](Instanced::Untouched). Templates whose
    /// class is not needed in the configured
    /// [build context](crate::runtime::SystemConfig::context) resolve to no
    /// value. Before creating an instance, the function resolves the instance
    /// of the template's outer object, recursively.
    pub fn instance_object(&mut self, template: &Object, options: InstanceOptions) -> TypeResult<Instanced> {
        if let Some(instance) = self.instance_of(template) {
            if self.loading && instance.needs_load() {
                instance.ty().system().resolve_loaded(&instance, self)?;
            }

            return Ok(Instanced::Resolved(Some(instance)));
        }

        if let Some(destination_root) = &self.destination_root {
            if template.is_in(destination_root) {
                return Ok(Instanced::Untouched);
            }
        }

        let in_source = match &self.source_root {
            Some(source_root) => template.is_in(source_root),
            None => false,
        };

        if !in_source {
            return Ok(Instanced::Untouched);
        }

        if !options.create {
            return Ok(Instanced::NoNewInstance);
        }

        let system = template.ty().system();

        if !is_needed_in(template.ty(), system.config().context) {
            trace!(
                target: OBJECTS_LOG,
                "{template} skipped: not needed in {:?} context.",
                system.config().context,
            );

            return Ok(Instanced::Resolved(None));
        }

        let outer = match template.outer() {
            None => None,

            Some(outer) => match self.instance_of(&outer) {
                Some(instance) => Some(instance),

                None => match self.instance_object(&outer, options)? {
                    Instanced::Resolved(Some(instance)) => Some(instance),
                    _ => return Ok(Instanced::Untouched),
                },
            },
        };

        if let Some(instance) = self.instance_of(template) {
            return Ok(Instanced::Resolved(Some(instance)));
        }

        let mut parameters = NewObject::new(template.ty())
            .name(template.name())
            .template(template.clone());

        if let Some(outer) = outer {
            parameters = parameters.outer(outer);
        }

        let instance = system.new_object(parameters.graph(self))?;

        trace!(target: OBJECTS_LOG, "{template} instanced as {instance}.");

        Ok(Instanced::Resolved(Some(instance)))
    }

    /// Resolves every object reference stored in the fields of `object`
    /// through this graph, and writes the resolved references back.
    ///
    /// In duplication mode, the function also instances the remaining
    /// subobjects of the object's archetype.
    pub fn instance_subobjects(&mut self, object: &Object) -> TypeResult<()> {
        let config = object.ty().system().config();

        if self.disabled || !config.instancing {
            return Ok(());
        }

        let mut slots = Vec::new();

        for field in object.ty().linked_layout().references() {
            field.visit_references(0, &mut |leaf, offset| slots.push((*field, leaf, offset)));
        }

        for (top, leaf, offset) in slots {
            if self.is_excluded(top) || self.is_excluded(leaf) {
                continue;
            }

            let current = {
                let memory = object.read_memory();

                // Safety: The offset is produced by visit_references for this type.
                unsafe { Field::read_reference(memory.as_ptr(), offset) }
            };

            let Some(current) = current else {
                continue;
            };

            let field = match top.is_instanced() {
                true => top,
                false => leaf,
            };

            let resolved = self.instance_property_value(
                field,
                Some(&current),
                Some(&current),
                object,
                InstanceOptions::new(),
            )?;

            let Instanced::Resolved(value) = resolved else {
                continue;
            };

            if value.as_ref() == Some(&current) {
                continue;
            }

            let mut memory = object.write_memory();

            // Safety: The offset is produced by visit_references for this type.
            unsafe { Field::write_reference(memory.as_mut_ptr(), offset, value) };
        }

        if self.duplicating {
            let Some(archetype) = object.archetype() else {
                return Ok(());
            };

            let in_source = match &self.source_root {
                Some(source_root) => archetype.is_in(source_root),
                None => false,
            };

            if !in_source {
                return Ok(());
            }

            for subobject in archetype.subobjects() {
                if self.instance_of(&subobject).is_none() {
                    let _ = self.instance_object(&subobject, InstanceOptions::new())?;
                }
            }
        }

        Ok(())
    }
}

// Returns true if the owner's archetype stores no reference in the field.
fn archetype_lacks_value(owner: &Object, field: &'static Field) -> bool {
    let Some(archetype) = owner.archetype() else {
        return false;
    };

    if field.dimension() != 1 || !archetype.is_a(field.owner()) {
        return false;
    }

    matches!(field.get(archetype, None), Ok(Value::Object(None)))
}

fn is_needed_in(ty: &TypeDescriptor, context: BuildContext) -> bool {
    let mut flags = ty.flags();

    for ancestor in ty.ancestors() {
        flags |= ancestor.flags();
    }

    match context {
        BuildContext::Tool => true,
        BuildContext::Client => !flags.intersects(TypeFlags::SERVER_ONLY | TypeFlags::TOOL_ONLY),
        BuildContext::Server => !flags.intersects(TypeFlags::CLIENT_ONLY | TypeFlags::TOOL_ONLY),
    }
}

#[cfg(test)]
mod tests {
    use crate::runtime::{
        BuildContext,
        FieldDeclaration,
        FieldFlags,
        FieldType,
        InstanceGraph,
        InstanceOptions,
        Instanced,
        NewObject,
        ObjectInitializer,
        Registries,
        SystemConfig,
        TransientInstancedPolicy,
        TypeDeclaration,
        TypeFlags,
        TypeKind,
        TypeResult,
        TypeSystem,
        Value,
    };

    fn build_holder(init: &mut ObjectInitializer<'_>) -> TypeResult<()> {
        if let Some(cache) = init.create_default_subobject("cache", "Widget")? {
            init.set("cache", cache)?;
        }

        if let Some(widget) = init.create_default_subobject("widget", "Widget")? {
            init.set("widget", widget)?;
        }

        Ok(())
    }

    fn scene(config: SystemConfig) -> &'static TypeSystem {
        let registries = Registries::leak();

        registries.register(TypeKind::Class, "ui", "Widget", || {
            TypeDeclaration::new()
                .constructor(|_| Ok(()))
                .field(FieldDeclaration::new("size", FieldType::Int).default(3))
        });

        registries.register(TypeKind::Class, "ui", "Holder", || {
            TypeDeclaration::new()
                .constructor(build_holder)
                .field(
                    FieldDeclaration::new("cache", FieldType::Object("Widget".into()))
                        .flags(FieldFlags::TRANSIENT | FieldFlags::INSTANCED),
                )
                .field(
                    FieldDeclaration::new("widget", FieldType::Object("Widget".into()))
                        .flags(FieldFlags::INSTANCED),
                )
        });

        registries.register(TypeKind::Class, "fx", "Effect", || {
            TypeDeclaration::new()
                .flags(TypeFlags::CLIENT_ONLY)
                .constructor(|_| Ok(()))
        });

        registries.register(TypeKind::Class, "fx", "Scene", || {
            TypeDeclaration::new()
                .constructor(|_| Ok(()))
                .field(
                    FieldDeclaration::new("fx", FieldType::Object("Effect".into()))
                        .flags(FieldFlags::INSTANCED),
                )
                .field(FieldDeclaration::new("peer", FieldType::Object("Scene".into())))
        });

        registries.register(TypeKind::Class, "deep", "Link", || {
            TypeDeclaration::new().constructor(|_| Ok(()))
        });

        registries.register(TypeKind::Class, "deep", "Leaf", || {
            TypeDeclaration::new()
                .constructor(|_| Ok(()))
                .field(FieldDeclaration::new("v", FieldType::Int))
        });

        registries.register(TypeKind::Class, "deep", "Chain", || {
            TypeDeclaration::new()
                .constructor(|_| Ok(()))
                .field(
                    FieldDeclaration::new("deep", FieldType::Object("Leaf".into()))
                        .flags(FieldFlags::INSTANCED),
                )
        });

        let system = TypeSystem::new(config, registries);

        let _ = system.process_registrations();

        system
    }

    fn with_policy(policy: TransientInstancedPolicy) -> SystemConfig {
        let mut config = SystemConfig::new();

        config.transient_instanced = policy;

        config
    }

    #[test]
    fn test_transient_policies() {
        let system = scene(with_policy(TransientInstancedPolicy::LeaveEmpty));
        let holder = system.find("Holder").unwrap();
        let defaults = holder.default_instance().unwrap();
        let default_cache = defaults.find_subobject("cache").unwrap();

        assert_eq!(defaults.get("cache").unwrap(), Value::Object(Some(default_cache.clone())));

        let object = system.new_object(NewObject::new(holder)).unwrap();

        assert_eq!(object.get("cache").unwrap(), Value::Object(None));
        assert!(object.find_subobject("cache").is_some());
        assert_eq!(
            object.get("widget").unwrap(),
            Value::Object(object.find_subobject("widget")),
        );

        let system = scene(with_policy(TransientInstancedPolicy::ShareReference));
        let holder = system.find("Holder").unwrap();
        let default_cache = holder.default_instance().unwrap().find_subobject("cache");
        let object = system.new_object(NewObject::new(holder)).unwrap();

        assert_eq!(object.get("cache").unwrap(), Value::Object(default_cache));

        let system = scene(with_policy(TransientInstancedPolicy::DeepCopy));
        let holder = system.find("Holder").unwrap();
        let object = system.new_object(NewObject::new(holder)).unwrap();
        let cache = object.find_subobject("cache").unwrap();

        assert!(cache.is_in(&object));
        assert_eq!(object.get("cache").unwrap(), Value::Object(Some(cache)));
    }

    #[test]
    fn test_build_context() {
        let mut config = SystemConfig::new();

        config.context = BuildContext::Server;

        let system = scene(config);
        let scene_ty = system.find("Scene").unwrap();
        let effect = system.find("Effect").unwrap();

        let template = system.new_object(NewObject::new(scene_ty)).unwrap();
        let fx = system
            .new_object(NewObject::new(effect).outer(template.clone()))
            .unwrap();

        template.set("fx", fx.clone()).unwrap();

        let object = system
            .new_object(NewObject::new(scene_ty).template(template.clone()))
            .unwrap();

        assert_eq!(object.get("fx").unwrap(), Value::Object(None));

        let system = scene(SystemConfig::new());
        let scene_ty = system.find("Scene").unwrap();
        let effect = system.find("Effect").unwrap();

        let template = system.new_object(NewObject::new(scene_ty)).unwrap();
        let fx = system
            .new_object(NewObject::new(effect).outer(template.clone()))
            .unwrap();

        template.set("fx", fx.clone()).unwrap();

        let object = system
            .new_object(NewObject::new(scene_ty).template(template))
            .unwrap();

        let copied = object.get("fx").unwrap().as_object().cloned().unwrap();

        assert_ne!(copied, fx);
        assert_eq!(copied.outer(), Some(object.clone()));
        assert_eq!(copied.name(), fx.name());
        assert_eq!(copied.archetype(), Some(&fx));
    }

    #[test]
    fn test_nested_owners() {
        let system = scene(SystemConfig::new());
        let chain = system.find("Chain").unwrap();

        let template = system.new_object(NewObject::new(chain)).unwrap();
        let link = system
            .new_object(
                NewObject::new(system.find("Link").unwrap())
                    .outer(template.clone())
                    .name("link"),
            )
            .unwrap();
        let leaf = system
            .new_object(
                NewObject::new(system.find("Leaf").unwrap())
                    .outer(link.clone())
                    .name("leaf"),
            )
            .unwrap();

        leaf.set("v", 42).unwrap();
        template.set("deep", leaf.clone()).unwrap();

        let object = system
            .new_object(NewObject::new(chain).template(template.clone()))
            .unwrap();

        let deep = object.get("deep").unwrap().as_object().cloned().unwrap();

        assert_ne!(deep, leaf);
        assert_eq!(deep.get("v").unwrap(), Value::Int(42));
        assert_eq!(deep.name(), leaf.name());
        assert_eq!(deep.archetype(), Some(&leaf));

        let owner = deep.outer().unwrap();

        assert_ne!(owner, link);
        assert_eq!(owner.name(), link.name());
        assert_eq!(owner.archetype(), Some(&link));
        assert_eq!(owner.outer(), Some(object.clone()));
        assert_eq!(template.get("deep").unwrap(), Value::Object(Some(leaf)));
    }

    #[test]
    fn test_graph_lookups() {
        let system = scene(SystemConfig::new());
        let scene_ty = system.find("Scene").unwrap();
        let peer = scene_ty.field("peer").unwrap();
        let fx = scene_ty.field("fx").unwrap();

        let source = system.new_object(NewObject::new(scene_ty)).unwrap();
        let destination = system.new_object(NewObject::new(scene_ty)).unwrap();
        let child = system
            .new_object(NewObject::new(scene_ty).outer(source.clone()))
            .unwrap();
        let outsider = system.new_object(NewObject::new(scene_ty)).unwrap();

        let mut graph = InstanceGraph::with_source(source.clone());

        graph.set_destination_root(destination.clone());
        graph.add_instance(&source, &destination);

        let plain = InstanceOptions::new();
        let relaxed = InstanceOptions {
            allow_self_reference: true,
            ..InstanceOptions::new()
        };

        assert_eq!(
            graph.instance_property_value(peer, Some(&source), None, &destination, plain).unwrap(),
            Instanced::Untouched,
        );

        assert_eq!(
            graph.instance_property_value(peer, Some(&source), None, &destination, relaxed).unwrap(),
            Instanced::Resolved(Some(destination.clone())),
        );

        assert_eq!(
            graph.instance_property_value(peer, Some(&child), None, &destination, relaxed).unwrap(),
            Instanced::NoNewInstance,
        );

        assert_eq!(
            graph.instance_property_value(peer, Some(&outsider), None, &destination, relaxed).unwrap(),
            Instanced::Untouched,
        );

        let Instanced::Resolved(Some(instance)) = graph.instance_object(&child, plain).unwrap() else {
            panic!("Child was not instanced.");
        };

        assert_eq!(instance.outer(), Some(destination.clone()));
        assert_eq!(graph.instance_of(&child), Some(instance.clone()));
        assert_eq!(
            graph.instance_object(&child, plain).unwrap(),
            Instanced::Resolved(Some(instance)),
        );
        assert_eq!(graph.len(), 2);

        let effect = system.find("Effect").unwrap();
        let stray = system.new_object(NewObject::new(effect)).unwrap();

        assert_eq!(
            graph.instance_property_value(fx, None, Some(&stray), &destination, plain).unwrap(),
            Instanced::Resolved(None),
        );

        graph.exclude(peer);

        assert!(graph.is_excluded(peer));
        assert_eq!(
            graph.instance_property_value(peer, Some(&source), None, &destination, relaxed).unwrap(),
            Instanced::Untouched,
        );

        graph.set_disabled(true);

        assert_eq!(
            graph.instance_property_value(fx, Some(&child), None, &destination, plain).unwrap(),
            Instanced::Untouched,
        );
    }

    #[test]
    fn test_resolve_loaded() {
        let system = scene(SystemConfig::new());
        let holder = system.find("Holder").unwrap();
        let defaults = holder.default_instance().unwrap();
        let default_widget = defaults.find_subobject("widget").unwrap();

        let object = system.new_object(NewObject::new(holder)).unwrap();
        let widget = object.find_subobject("widget").unwrap();

        object.set("widget", default_widget.clone()).unwrap();
        object.mark_needs_load();

        assert!(object.needs_load());

        let mut graph = InstanceGraph::with_source(defaults.clone());

        graph.set_destination_root(object.clone());
        graph.add_instance(&defaults, &object);
        graph.add_instance(&default_widget, &widget);

        system.resolve_loaded(&object, &mut graph).unwrap();

        assert!(!object.needs_load());
        assert!(!graph.is_loading());
        assert_eq!(object.get("widget").unwrap(), Value::Object(Some(widget)));
    }
}
