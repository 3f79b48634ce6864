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

use std::{cell::UnsafeCell, sync::MutexGuard};

use log::debug;

use crate::runtime::{
    initializer::NewObject,
    Object,
    TypeDescriptor,
    TypeError,
    TypeKind,
    TypeResult,
    PIPELINE_LOG,
};

thread_local! {
    // Addresses of the types whose default instances are being built by
    // this thread.
    static BUILDING: UnsafeCell<Vec<usize>> = const { UnsafeCell::new(Vec::new()) };
}

impl TypeDescriptor {
    /// Returns the default instance of this class, building it on first
    /// request.
    ///
    /// The default instance is the archetype of every new instance of the
    /// class: it carries the class-level default field values, and its
    /// subobjects are the templates of the default subobjects of new
    /// instances. It is built from the default instance of the parent class,
    /// which is built first.
    ///
    /// Interfaces, structs, and enumerations have no default instances.
    /// Abstract classes do have them, since their descendants inherit their
    /// field values.
    pub fn default_instance(&'static self) -> TypeResult<Object> {
        if let Some(object) = self.existing_default_instance() {
            return Ok(object);
        }

        if self.kind != TypeKind::Class || self.is_interface() {
            return Err(TypeError::AbstractInstantiation {
                ty: self.qualified.clone(),
            });
        }

        if !self.is_constructed() {
            return Err(TypeError::Unconstructed {
                ty: self.name.into(),
                module: self.module.name().into(),
                stage: self.stage(),
            });
        }

        let _guard = self.system.enter_pipeline();

        if let Some(object) = self.existing_default_instance() {
            return Ok(object);
        }

        let _building = BuildingGuard::enter(self)?;

        let template = match self.parent() {
            Some(parent) => Some(parent.default_instance()?),
            None => None,
        };

        let object = self.system.new_object(NewObject::default_of(self, template))?;

        *self.lock_defaults() = Some(object.clone());

        debug!(target: PIPELINE_LOG, "Default instance of {} built.", self.qualified);

        Ok(object)
    }

    /// Returns the default instance of this class if it has already been
    /// built.
    #[inline(always)]
    pub fn existing_default_instance(&self) -> Option<Object> {
        self.lock_defaults().clone()
    }

    #[inline(always)]
    fn lock_defaults(&self) -> MutexGuard<'_, Option<Object>> {
        self.defaults
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}

struct BuildingGuard {
    ty: usize,
}

impl Drop for BuildingGuard {
    fn drop(&mut self) {
        BUILDING.with(|building| {
            // Safety: Access is localized.
            let building = unsafe { &mut *building.get() };

            if let Some(position) = building.iter().rposition(|ty| *ty == self.ty) {
                let _ = building.remove(position);
            }
        });
    }
}

impl BuildingGuard {
    fn enter(ty: &'static TypeDescriptor) -> TypeResult<Self> {
        let address = ty as *const TypeDescriptor as usize;

        BUILDING.with(|building| {
            // Safety: Access is localized.
            let building = unsafe { &mut *building.get() };

            if building.contains(&address) {
                return Err(TypeError::RecursiveDefault {
                    ty: ty.qualified.clone(),
                });
            }

            building.push(address);

            Ok(Self { ty: address })
        })
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use crate::runtime::{
        FieldDeclaration,
        FieldType,
        ObjectInitializer,
        Registries,
        SystemConfig,
        TypeDeclaration,
        TypeError,
        TypeFlags,
        TypeKind,
        TypeResult,
        TypeSystem,
        Value,
    };

    fn build_node(init: &mut ObjectInitializer<'_>) -> TypeResult<()> {
        let _ = init.create_default_subobject("next", "Node")?;

        Ok(())
    }

    fn lazy_system() -> &'static TypeSystem {
        let registries = Registries::leak();

        registries.register(TypeKind::Enum, "core", "Mode", || {
            TypeDeclaration::new().enumerator("On", 1)
        });

        registries.register(TypeKind::Class, "core", "Shape", || {
            TypeDeclaration::new()
                .flags(TypeFlags::ABSTRACT)
                .constructor(|_| Ok(()))
                .field(FieldDeclaration::new("sides", FieldType::Int).default(3))
        });

        registries.register(TypeKind::Class, "core", "Square", || {
            TypeDeclaration::new()
                .parent("Shape")
                .override_default("sides", 4)
        });

        registries.register(TypeKind::Class, "core", "Node", || {
            TypeDeclaration::new().constructor(build_node)
        });

        let mut config = SystemConfig::new();

        config.eager_defaults = false;

        let system = TypeSystem::new(config, registries);
        let report = system.process_registrations();

        assert_eq!(report.defaults, 0);

        system
    }

    #[test]
    fn test_default_lifecycle() {
        let system = lazy_system();

        let shape = system.find("Shape").unwrap();
        let square = system.find("Square").unwrap();

        assert!(shape.existing_default_instance().is_none());
        assert!(square.existing_default_instance().is_none());

        let defaults = square.default_instance().unwrap();

        assert_eq!(defaults.get("sides").unwrap(), Value::Int(4));
        assert_eq!(square.existing_default_instance(), Some(defaults.clone()));
        assert_eq!(square.default_instance().unwrap(), defaults);

        let parent = shape.existing_default_instance().unwrap();

        assert_eq!(parent.get("sides").unwrap(), Value::Int(3));
        assert_eq!(defaults.archetype(), Some(&parent));

        assert!(matches!(
            system.find("Mode").unwrap().default_instance(),
            Err(TypeError::AbstractInstantiation { .. }),
        ));
    }

    #[test]
    fn test_concurrent_defaults() {
        let system = lazy_system();
        let square = system.find("Square").unwrap();

        let instances = thread::scope(|scope| {
            let workers = (0..8)
                .map(|_| scope.spawn(|| square.default_instance().unwrap()))
                .collect::<Vec<_>>();

            workers
                .into_iter()
                .map(|worker| worker.join().unwrap())
                .collect::<Vec<_>>()
        });

        let first = square.existing_default_instance().unwrap();

        assert!(instances.iter().all(|instance| instance == &first));
        assert_eq!(first.get("sides").unwrap(), Value::Int(4));
    }

    #[test]
    fn test_recursive_default() {
        let system = lazy_system();
        let node = system.find("Node").unwrap();

        for _ in 0..2 {
            assert!(matches!(
                node.default_instance(),
                Err(TypeError::RecursiveDefault { .. }),
            ));
        }

        assert!(node.existing_default_instance().is_none());
    }
}
