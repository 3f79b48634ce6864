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

//! The type system runtime.
//!
//! The [TypeSystem] turns the entries of the [deferred registries](Registries)
//! into [type descriptors](TypeDescriptor), builds the default instances of
//! classes, and creates [objects](Object) from template objects.

mod config;
mod declaration;
mod defaults;
mod error;
mod field;
mod initializer;
mod instancing;
mod memory;
mod module;
mod object;
mod pipeline;
mod registry;
mod system;
mod ty;
mod value;

pub use crate::runtime::{
    config::{BuildContext, ConfigSource, MapConfigSource, SystemConfig, TransientInstancedPolicy},
    declaration::{
        ConstructorFn,
        DeclareFn,
        DefaultValue,
        FieldDeclaration,
        FunctionDeclaration,
        NativeFn,
        NativeTable,
        PostInitFn,
        TypeDeclaration,
    },
    error::{TypeError, TypeResult, TypeResultExt},
    field::{Field, FieldFlags, FieldLayout},
    initializer::{
        InitStage,
        NewObject,
        ObjectInitializer,
        PostInit,
        SubobjectOverride,
        SubobjectOverrides,
    },
    instancing::{InstanceGraph, InstanceOptions, Instanced},
    module::ModuleMeta,
    object::{Object, ObjectFlags},
    registry::{DeferredRegistry, RegistrationEntry, Registries, TypeKind},
    system::{ProcessReport, TypeSystem},
    ty::{
        Ancestors,
        ConstructionStage,
        Enumerator,
        Function,
        TypeDescriptor,
        TypeFlags,
        TypeLayout,
    },
    value::{FieldType, Value},
};

/// The log target of the deferred registries.
pub const REGISTRY_LOG: &str = "forma-registry";

/// The log target of the type construction pipeline.
pub const PIPELINE_LOG: &str = "forma-pipeline";

/// The log target of object construction and instancing.
pub const OBJECTS_LOG: &str = "forma-objects";
