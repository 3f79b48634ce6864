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

use std::sync::OnceLock;

use log::{debug, error, trace};

use crate::runtime::{
    field::FieldLayout,
    ConstructionStage,
    Enumerator,
    Field,
    Function,
    RegistrationEntry,
    TypeDescriptor,
    TypeError,
    TypeKind,
    TypeLayout,
    TypeResult,
    TypeSystem,
    PIPELINE_LOG,
};

impl TypeSystem {
    /// Constructs the type descriptor of a registration entry.
    ///
    /// The construction is memoized: if the entry's type has been constructed
    /// already, the function returns the same descriptor and does nothing
    /// else. Dependencies of the type (the parent type, the implemented
    /// interfaces, and the struct types of the fields) are constructed
    /// first, taking their entries from the pending registrations if
    /// necessary.
    pub fn construct(&'static self, entry: RegistrationEntry) -> TypeResult<&'static TypeDescriptor> {
        let _gate = self.enter_pipeline();

        if let Some(existing) = self.lookup_qualified(entry.module, entry.name) {
            if existing.is_constructed() {
                trace!(
                    target: PIPELINE_LOG,
                    "{} is already constructed.",
                    existing.qualified_name(),
                );

                return Ok(existing);
            }

            return Err(TypeError::Unconstructed {
                ty: existing.name().into(),
                module: existing.module().name().into(),
                stage: existing.stage(),
            });
        }

        let ty = self.allocate(entry);

        if let Err(error) = self.advance_pipeline(ty) {
            ty.mark_failed();

            error!(
                target: PIPELINE_LOG,
                "{} {} failed to construct at the {} stage. {error}",
                ty.kind(),
                ty.qualified_name(),
                ty.stage(),
            );

            return Err(error);
        }

        ty.module().attach_type(ty);
        ty.advance(ConstructionStage::Constructed);
        self.mark_recent(ty);

        debug!(
            target: PIPELINE_LOG,
            "{} {} constructed: {} own field(s), instance size {}.",
            ty.kind(),
            ty.qualified_name(),
            ty.fields().len(),
            ty.instance_size(),
        );

        Ok(ty)
    }

    fn advance_pipeline(&'static self, ty: &'static TypeDescriptor) -> TypeResult<()> {
        self.resolve_dependencies(ty)?;
        self.populate(ty)?;
        self.bind(ty)?;
        self.link(ty)
    }

    fn allocate(&'static self, entry: RegistrationEntry) -> &'static TypeDescriptor {
        let declaration = (entry.declare)();
        let module = self.module(entry.module);

        let ty: &'static TypeDescriptor = Box::leak(Box::new(TypeDescriptor::new(
            self,
            entry.kind,
            module,
            entry.name,
            declaration,
        )));

        self.publish(ty);

        trace!(
            target: PIPELINE_LOG,
            "{} {} allocated.",
            ty.kind(),
            ty.qualified_name(),
        );

        ty
    }

    fn resolve_dependencies(&'static self, ty: &'static TypeDescriptor) -> TypeResult<()> {
        let stage = ConstructionStage::DependenciesResolved;

        let parent = match &ty.declaration.parent {
            None => None,

            Some(name) => {
                let parent = self.require(ty, name, stage, ty.kind())?;

                if ty.is_native() && !parent.is_native() {
                    return Err(TypeError::NativeOverScripted {
                        ty: ty.name().into(),
                        module: ty.module().name().into(),
                        parent: parent.qualified_name().into(),
                    });
                }

                Some(parent)
            }
        };

        let _ = ty.parent.set(parent);

        let mut interfaces = Vec::with_capacity(ty.declaration.interfaces.len());

        for name in &ty.declaration.interfaces {
            let interface = self.require(ty, name, stage, TypeKind::Class)?;

            if !interface.is_interface() {
                return Err(TypeError::NotAnInterface {
                    ty: ty.name().into(),
                    module: ty.module().name().into(),
                    interface: interface.qualified_name().into(),
                });
            }

            interfaces.push(interface);
        }

        let _ = ty.interfaces.set(interfaces);

        ty.advance(stage);

        Ok(())
    }

    fn populate(&'static self, ty: &'static TypeDescriptor) -> TypeResult<()> {
        let declaration = &ty.declaration;

        // Interface fields would live outside of the implementing classes'
        // layouts.
        if ty.is_interface() {
            if let Some(field) = declaration.fields.first() {
                return Err(TypeError::InterfaceField {
                    ty: ty.name().into(),
                    module: ty.module().name().into(),
                    field: field.name.clone(),
                });
            }
        }

        let fields = match ty.kind() {
            TypeKind::Enum => Vec::new(),

            TypeKind::Struct | TypeKind::Class => declaration
                .fields
                .iter()
                .enumerate()
                .map(|(index, field)| {
                    &*Box::leak(Box::new(Field {
                        owner: ty,
                        index,
                        name: field.name.clone(),
                        ty: field.ty.clone(),
                        dimension: field.dimension.max(1),
                        flags: field.flags,
                        default: field.default.clone(),
                        metadata: field.metadata.clone(),
                        layout: OnceLock::new(),
                        target: OnceLock::new(),
                    }))
                })
                .collect(),
        };

        let _ = ty.fields.set(fields);

        let enumerators = match ty.kind() {
            TypeKind::Enum => declaration
                .enumerators
                .iter()
                .map(|(name, value)| Enumerator {
                    name: name.clone(),
                    value: *value,
                })
                .collect(),

            _ => Vec::new(),
        };

        let _ = ty.enumerators.set(enumerators);

        ty.advance(ConstructionStage::PopulatedFields);

        Ok(())
    }

    fn bind(&'static self, ty: &'static TypeDescriptor) -> TypeResult<()> {
        let missing = |entry: &str| TypeError::MissingBinding {
            ty: ty.name().into(),
            module: ty.module().name().into(),
            entry: entry.into(),
        };

        let constructor = match ty.kind() == TypeKind::Class && !ty.is_interface() {
            false => None,

            true => {
                let own = ty
                    .declaration
                    .constructor
                    .or_else(|| self.natives().constructor(ty.name()))
                    .or_else(|| self.natives().constructor(ty.qualified_name()));

                if own.is_none()
                    && !ty
                        .ancestors()
                        .any(|ancestor| ancestor.own_constructor().is_some())
                {
                    return Err(missing("constructor"));
                }

                own
            }
        };

        let _ = ty.constructor.set(constructor);

        let mut functions = Vec::with_capacity(ty.declaration.functions.len());

        for declaration in &ty.declaration.functions {
            let native = declaration
                .native
                .or_else(|| self.natives().function(ty.name(), &declaration.name))
                .or_else(|| {
                    ty.ancestors()
                        .find_map(|ancestor| ancestor.function(&declaration.name))
                        .map(|function| function.native())
                });

            let Some(native) = native else {
                return Err(missing(&declaration.name));
            };

            functions.push(Function {
                name: declaration.name.clone(),
                owner: ty,
                native,
                metadata: declaration.metadata.clone(),
            });
        }

        let _ = ty.functions.set(functions);

        ty.advance(ConstructionStage::Bound);

        Ok(())
    }

    // Computes field offsets and the field chains. Repeated calls are no-ops.
    pub(crate) fn link(&'static self, ty: &'static TypeDescriptor) -> TypeResult<()> {
        if ty.layout.get().is_some() {
            return Ok(());
        }

        let limit = self.config().max_instance_size;

        let overflow = |field: &str| {
            error!(
                target: PIPELINE_LOG,
                "{} layout exceeds {limit} bytes at field {field}.",
                ty.qualified_name(),
            );

            TypeError::LayoutOverflow {
                ty: ty.name().into(),
                module: ty.module().name().into(),
                field: field.into(),
            }
        };

        let (mut size, mut alignment) = match ty.parent() {
            Some(parent) => (parent.instance_size(), parent.alignment()),
            None => (0, 1),
        };

        for field in ty.fields() {
            let (element_size, element_alignment, flags) = field.measure()?;

            let offset = align_up(size, element_alignment).ok_or_else(|| overflow(field.name()))?;

            let end = element_size
                .checked_mul(field.dimension())
                .and_then(|total| offset.checked_add(total))
                .filter(|end| *end <= limit)
                .ok_or_else(|| overflow(field.name()))?;

            let _ = field.layout.set(FieldLayout {
                offset,
                element_size,
                alignment: element_alignment,
                flags,
            });

            trace!(
                target: PIPELINE_LOG,
                "{field} linked at offset {offset} ({element_size} x {}).",
                field.dimension(),
            );

            size = end;
            alignment = alignment.max(element_alignment);
        }

        let instance_size = align_up(size, alignment)
            .filter(|size| *size <= limit)
            .ok_or_else(|| overflow(ty.fields().last().map(|field| field.name()).unwrap_or("")))?;

        let mut properties = ty.fields().to_vec();

        if let Some(parent) = ty.parent() {
            properties.extend_from_slice(parent.linked_layout().properties());
        }

        let references = properties
            .iter()
            .copied()
            .filter(|field| field.contains_reference())
            .collect();

        let destructors = properties
            .iter()
            .copied()
            .filter(|field| field.needs_destructor())
            .collect();

        let post_construct = properties
            .iter()
            .copied()
            .filter(|field| !field.owner().is_native() || field.is_config())
            .collect();

        let _ = ty.layout.set(TypeLayout {
            instance_size,
            alignment,
            properties,
            references,
            destructors,
            post_construct,
        });

        ty.advance(ConstructionStage::Linked);

        Ok(())
    }
}

#[inline(always)]
fn align_up(value: usize, alignment: usize) -> Option<usize> {
    let mask = alignment - 1;

    Some(value.checked_add(mask)? & !mask)
}

#[cfg(test)]
mod tests {
    use std::ptr;

    use crate::runtime::{
        FieldDeclaration,
        FieldType,
        FunctionDeclaration,
        NewObject,
        Registries,
        SystemConfig,
        TypeDeclaration,
        TypeError,
        TypeFlags,
        TypeKind,
        TypeSystem,
        Value,
    };

    fn hierarchy() -> &'static TypeSystem {
        let registries = Registries::leak();

        registries.register(TypeKind::Class, "game", "Leaf", || {
            TypeDeclaration::new()
                .parent("Mid")
                .field(FieldDeclaration::new("z", FieldType::Int).default(20))
        });

        registries.register(TypeKind::Class, "core", "Base", || {
            TypeDeclaration::new()
                .constructor(|_| Ok(()))
                .field(FieldDeclaration::new("x", FieldType::Int))
        });

        registries.register(TypeKind::Class, "core", "Mid", || {
            TypeDeclaration::new()
                .parent("Base")
                .field(FieldDeclaration::new("y", FieldType::Int).default(10))
        });

        TypeSystem::new(SystemConfig::new(), registries)
    }

    #[test]
    fn test_inheritance_defaults() {
        let system = hierarchy();
        let report = system.process_registrations();

        assert_eq!(report.constructed, 3);
        assert_eq!(report.defaults, 3);
        assert!(!system.has_pending_registrations());

        let leaf = system.find("Leaf").unwrap();
        let mid = system.find("core.Mid").unwrap();

        assert_eq!(leaf.parent(), Some(mid));
        assert!(leaf.is_a(system.find("Base").unwrap()));

        let defaults = leaf.default_instance().unwrap();

        assert!(defaults.is_default_instance());
        assert_eq!(defaults.name(), "Default__Leaf");
        assert_eq!(defaults.get("x").unwrap(), Value::Int(0));
        assert_eq!(defaults.get("y").unwrap(), Value::Int(10));
        assert_eq!(defaults.get("z").unwrap(), Value::Int(20));
        assert_eq!(defaults.archetype(), Some(&mid.default_instance().unwrap()));

        let template = system.new_object(NewObject::new(mid)).unwrap();

        template.set("y", 99).unwrap();

        let object = system
            .new_object(NewObject::new(leaf).template(template.clone()))
            .unwrap();

        assert_eq!(object.get("x").unwrap(), Value::Int(0));
        assert_eq!(object.get("y").unwrap(), Value::Int(99));
        assert_eq!(object.get("z").unwrap(), Value::Int(20));
        assert_eq!(object.archetype(), Some(&template));
        assert!(object.is_initialized());
        assert!(system
            .module("game")
            .dependencies()
            .contains(&system.module("core")));
    }

    #[test]
    fn test_construct_memoization() {
        let system = hierarchy();

        let first = system.resolve("Leaf").unwrap();
        let second = system.resolve("game.Leaf").unwrap();

        assert!(ptr::eq(first, second));
        assert!(first.is_constructed());
        assert!(system.find("Base").unwrap().is_constructed());

        let entry = crate::runtime::RegistrationEntry {
            kind: TypeKind::Class,
            module: "game",
            name: "Leaf",
            declare: || TypeDeclaration::new(),
        };

        assert!(ptr::eq(system.construct(entry).unwrap(), first));

        let report = system.process_registrations();

        assert_eq!(report.constructed, 3);
        assert_eq!(report.defaults, 3);
        assert_eq!(system.process_registrations().constructed, 0);
        assert_eq!(system.types().len(), 3);
    }

    #[test]
    fn test_layout_offsets() {
        let registries = Registries::leak();

        registries.register(TypeKind::Class, "core", "Base", || {
            TypeDeclaration::new()
                .constructor(|_| Ok(()))
                .field(FieldDeclaration::new("flag", FieldType::Bool))
                .field(FieldDeclaration::new("count", FieldType::Int64))
        });

        registries.register(TypeKind::Class, "core", "Derived", || {
            TypeDeclaration::new()
                .parent("Base")
                .field(FieldDeclaration::new("tag", FieldType::Byte))
                .field(FieldDeclaration::new("values", FieldType::Float).array(3))
                .field(FieldDeclaration::new("label", FieldType::Str))
        });

        let system = TypeSystem::new(SystemConfig::new(), registries);
        let _ = system.process_registrations();

        let base = system.find("Base").unwrap();
        let derived = system.find("Derived").unwrap();

        assert!(derived.instance_size() >= base.instance_size());
        assert_eq!(derived.instance_size() % derived.alignment(), 0);

        let mut end = 0;

        for field in base.fields().iter().chain(derived.fields()) {
            let layout = field.layout().unwrap();

            assert!(layout.offset >= end, "{field} overlaps its predecessor");
            assert_eq!(layout.offset % layout.alignment, 0);

            end = layout.offset + layout.element_size * field.dimension();
        }

        assert!(end <= derived.instance_size());
        assert!(base.instance_size() <= derived.fields()[0].offset().unwrap());

        let layout = derived.layout().unwrap();

        assert_eq!(layout.properties().len(), 5);
        assert_eq!(layout.properties()[0].name(), "tag");
        assert_eq!(layout.destructors().len(), 1);
        assert!(layout.references().is_empty());
        assert_eq!(layout.post_construct().len(), 5);
    }

    #[test]
    fn test_drain_order() {
        let registries = Registries::leak();

        registries.register(TypeKind::Class, "game", "Light", || {
            TypeDeclaration::new()
                .constructor(|_| Ok(()))
                .field(
                    FieldDeclaration::new("color", FieldType::Enum("Color".into()))
                        .default_enumerator("Blue"),
                )
        });

        let mut config = SystemConfig::new();

        config.eager_defaults = false;

        let system = TypeSystem::new(config, registries);

        assert_eq!(system.process_registrations().defaults, 0);

        registries.register(TypeKind::Class, "game", "Lamp", || {
            TypeDeclaration::new().parent("Light")
        });

        registries.register(TypeKind::Enum, "core", "Color", || {
            TypeDeclaration::new()
                .enumerator("Red", 0)
                .enumerator("Green", 1)
                .enumerator("Blue", 2)
        });

        let report = system.on_module_loaded("game");

        assert_eq!(report.constructed, 2);

        let color = system.find("Color").unwrap();

        assert_eq!(color.kind(), TypeKind::Enum);
        assert_eq!(color.enum_value("Green"), Some(1));
        assert_eq!(color.enum_name(2), Some("Blue"));

        let lamp = system.find("Lamp").unwrap();

        assert_eq!(lamp.default_instance().unwrap().get("color").unwrap(), Value::Enum(2));
    }

    #[test]
    fn test_duplicate_registration() {
        let registries = Registries::leak();

        registries.register(TypeKind::Class, "core", "Thing", || {
            TypeDeclaration::new()
                .constructor(|_| Ok(()))
                .field(FieldDeclaration::new("first", FieldType::Int))
        });

        registries.register(TypeKind::Class, "core", "Thing", || {
            TypeDeclaration::new()
                .constructor(|_| Ok(()))
                .field(FieldDeclaration::new("second", FieldType::Int))
        });

        let system = TypeSystem::new(SystemConfig::new(), registries);
        let report = system.process_registrations();

        assert_eq!(report.constructed, 1);
        assert_eq!(report.duplicates, 1);

        let thing = system.find("Thing").unwrap();

        assert!(thing.field("first").is_some());
        assert!(thing.field("second").is_none());
    }

    #[test]
    fn test_missing_constructor() {
        let registries = Registries::leak();

        registries.register(TypeKind::Class, "core", "Orphan", TypeDeclaration::new);

        let system = TypeSystem::new(SystemConfig::new(), registries);

        let Err(error) = system.try_process_registrations() else {
            panic!("Construction succeeded.");
        };

        assert!(matches!(
            &error,
            TypeError::MissingBinding { ty, entry, .. }
                if ty.as_str() == "Orphan" && entry.as_str() == "constructor",
        ));
        assert!(error.is_fatal());
        assert!(system.find("Orphan").is_none());
    }

    #[test]
    #[should_panic(expected = "Type registration processing failed.")]
    fn test_fatal_processing() {
        let registries = Registries::leak();

        registries.register(TypeKind::Class, "core", "Orphan", TypeDeclaration::new);

        let _ = TypeSystem::new(SystemConfig::new(), registries).process_registrations();
    }

    #[test]
    fn test_native_bindings() {
        let registries = Registries::leak();

        registries.register(TypeKind::Class, "core", "Counter", || {
            TypeDeclaration::new()
                .flags(TypeFlags::NATIVE)
                .field(FieldDeclaration::new("value", FieldType::Int).default(1))
                .function(FunctionDeclaration::new("double"))
        });

        registries.register(TypeKind::Class, "core", "Tracker", || {
            TypeDeclaration::new()
                .parent("Counter")
                .flags(TypeFlags::NATIVE)
                .function(FunctionDeclaration::new("double"))
        });

        let system = TypeSystem::new(SystemConfig::new(), registries);

        assert!(system.natives().register_constructor("Counter", |_| Ok(())));

        assert!(system.natives().register_function("Counter", "double", |object, _| {
            let value = object.get("value")?.as_int().unwrap_or_default();

            Ok(Value::Int64(value * 2))
        }));

        let _ = system.process_registrations();

        let tracker = system.find("Tracker").unwrap();
        let object = system.new_object(NewObject::new(tracker)).unwrap();

        object.set("value", 21).unwrap();

        assert_eq!(object.invoke("double", &[]).unwrap(), Value::Int64(42));
        assert!(ptr::eq(tracker.function("double").unwrap().owner(), tracker));
        assert!(matches!(
            object.invoke("triple", &[]),
            Err(TypeError::UnknownFunction { .. }),
        ));
    }

    #[test]
    fn test_dependency_errors() {
        let registries = Registries::leak();

        registries.register(TypeKind::Class, "core", "Lost", || {
            TypeDeclaration::new().parent("Nowhere")
        });

        let system = TypeSystem::new(SystemConfig::new(), registries);

        assert!(matches!(
            system.try_process_registrations(),
            Err(TypeError::UnresolvedDependency { dependency, .. }) if dependency.as_str() == "Nowhere",
        ));

        let registries = Registries::leak();

        registries.register(TypeKind::Struct, "core", "Point", || {
            TypeDeclaration::new().field(FieldDeclaration::new("x", FieldType::Int))
        });

        registries.register(TypeKind::Class, "core", "Shape", || {
            TypeDeclaration::new().parent("Point")
        });

        let system = TypeSystem::new(SystemConfig::new(), registries);

        assert!(matches!(
            system.try_process_registrations(),
            Err(TypeError::KindMismatch { expected: TypeKind::Class, actual: TypeKind::Struct, .. }),
        ));

        let registries = Registries::leak();

        registries.register(TypeKind::Class, "core", "Script", || {
            TypeDeclaration::new().constructor(|_| Ok(()))
        });

        registries.register(TypeKind::Class, "core", "Engine", || {
            TypeDeclaration::new().parent("Script").flags(TypeFlags::NATIVE)
        });

        let system = TypeSystem::new(SystemConfig::new(), registries);

        assert!(matches!(
            system.try_process_registrations(),
            Err(TypeError::NativeOverScripted { .. }),
        ));
    }

    #[test]
    fn test_interface_fields() {
        let registries = Registries::leak();

        registries.register(TypeKind::Class, "core", "Named", || {
            TypeDeclaration::new()
                .flags(TypeFlags::INTERFACE)
                .field(FieldDeclaration::new("a", FieldType::Int64))
                .field(FieldDeclaration::new("label", FieldType::Str))
        });

        let system = TypeSystem::new(SystemConfig::new(), registries);

        assert!(matches!(
            system.try_process_registrations(),
            Err(TypeError::InterfaceField { field, .. }) if field.as_str() == "a",
        ));
        assert!(system.find("Named").is_none());

        let registries = Registries::leak();

        registries.register(TypeKind::Class, "core", "Tagged", || {
            TypeDeclaration::new().flags(TypeFlags::INTERFACE)
        });

        registries.register(TypeKind::Class, "core", "Thing", || {
            TypeDeclaration::new()
                .implements("Tagged")
                .constructor(|_| Ok(()))
                .field(FieldDeclaration::new("count", FieldType::Int))
        });

        registries.register(TypeKind::Class, "core", "Label", || {
            TypeDeclaration::new()
                .implements("Tagged")
                .constructor(|_| Ok(()))
                .field(FieldDeclaration::new("a", FieldType::Int64))
                .field(FieldDeclaration::new("label", FieldType::Str))
        });

        let system = TypeSystem::new(SystemConfig::new(), registries);
        let _ = system.process_registrations();

        let thing = system
            .new_object(NewObject::new(system.find("Thing").unwrap()))
            .unwrap();

        let label = system.find("Label").unwrap().field("label").unwrap();

        assert!(thing.is_a(system.find("Tagged").unwrap()));
        assert!(matches!(
            label.set(&thing, None, "a string that does not fit into a small object"),
            Err(TypeError::UnknownField { .. }),
        ));
        assert!(matches!(label.get(&thing, None), Err(TypeError::UnknownField { .. })));
        assert_eq!(thing.get("count").unwrap(), Value::Int(0));
    }

    #[test]
    fn test_failed_parent_retry() {
        let registries = Registries::leak();

        registries.register(TypeKind::Class, "core", "Base", TypeDeclaration::new);

        let system = TypeSystem::new(SystemConfig::new(), registries);

        assert!(matches!(
            system.try_process_registrations(),
            Err(TypeError::MissingBinding { .. }),
        ));

        registries.register(TypeKind::Class, "game", "Child", || {
            TypeDeclaration::new()
                .parent("Base")
                .constructor(|_| Ok(()))
        });

        let Err(error) = system.try_process_registrations() else {
            panic!("Construction succeeded.");
        };

        assert!(matches!(
            &error,
            TypeError::FailedDependency { ty, dependency, .. }
                if ty.as_str() == "Child" && dependency.as_str() == "core.Base",
        ));
        assert!(error.to_string().contains("failed to construct"));
    }

    #[test]
    fn test_layout_overflow() {
        let registries = Registries::leak();

        registries.register(TypeKind::Class, "core", "Huge", || {
            TypeDeclaration::new()
                .constructor(|_| Ok(()))
                .field(FieldDeclaration::new("small", FieldType::Int))
                .field(FieldDeclaration::new("block", FieldType::Int64).array(4))
        });

        let mut config = SystemConfig::new();

        config.max_instance_size = 16;

        let system = TypeSystem::new(config, registries);

        assert!(matches!(
            system.try_process_registrations(),
            Err(TypeError::LayoutOverflow { field, .. }) if field.as_str() == "block",
        ));
    }
}
