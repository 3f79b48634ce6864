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

//! # Forma
//!
//! A deferred type registration and prototype-based object instancing
//! runtime.
//!
//! The crate builds a live type system at startup out of declarations that
//! independently compiled modules register before the program's entry point
//! runs, and then constructs objects whose default state and nested owned
//! sub-objects are copied from template objects.
//!
//! The typical lifecycle is:
//!
//!  1. Modules register [type declarations](runtime::TypeDeclaration) in the
//!     [deferred registries](runtime::Registries), either one by one or with
//!     the [declare_types] macro.
//!  2. The host calls [TypeSystem::process_registrations](runtime::TypeSystem::process_registrations)
//!     (or the module loader calls
//!     [TypeSystem::on_module_loaded](runtime::TypeSystem::on_module_loaded)),
//!     which drains the registries and turns every entry into a fully linked
//!     [TypeDescriptor](runtime::TypeDescriptor).
//!  3. Every class descriptor lazily owns a
//!     [default instance](runtime::TypeDescriptor::default_instance) that
//!     serves as the prototype of the class.
//!  4. New [objects](runtime::Object) are built with
//!     [TypeSystem::new_object](runtime::TypeSystem::new_object). The
//!     [ObjectInitializer](runtime::ObjectInitializer) copies field values from
//!     the template and deep-copies owned sub-objects through the
//!     [InstanceGraph](runtime::InstanceGraph).
//!
//! ```
//! use forma::runtime::{
//!     FieldDeclaration,
//!     FieldType,
//!     NewObject,
//!     Registries,
//!     SystemConfig,
//!     TypeDeclaration,
//!     TypeKind,
//!     TypeSystem,
//!     Value,
//! };
//!
//! let registries = Registries::leak();
//!
//! registries.register(TypeKind::Class, "core", "Base", || {
//!     TypeDeclaration::new()
//!         .constructor(|_| Ok(()))
//!         .field(FieldDeclaration::new("x", FieldType::Int))
//! });
//!
//! registries.register(TypeKind::Class, "core", "Mid", || {
//!     TypeDeclaration::new()
//!         .parent("Base")
//!         .field(FieldDeclaration::new("y", FieldType::Int).default(10))
//! });
//!
//! let system = TypeSystem::new(SystemConfig::new(), registries);
//!
//! system.process_registrations();
//!
//! let mid = system.find("Mid").unwrap();
//! let object = system.new_object(NewObject::new(mid)).unwrap();
//!
//! assert_eq!(object.get("x").unwrap(), Value::Int(0));
//! assert_eq!(object.get("y").unwrap(), Value::Int(10));
//! ```

#![deny(unsafe_op_in_unsafe_fn)]

mod report;
pub mod runtime;
