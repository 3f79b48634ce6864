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
    error::Error as StdError,
    fmt::{Display, Formatter},
    result::Result as StdResult,
};

use compact_str::CompactString;

use crate::runtime::{ConstructionStage, TypeKind};

/// A result of a type system API call, which can either be a normal value or
/// a [TypeError].
pub type TypeResult<T> = StdResult<T, TypeError>;

/// A helper trait for the [TypeResult] object.
///
/// This trait is automatically implemented for TypeResult and provides the
/// [expect_blame](Self::expect_blame) function, which either unwraps the
/// underlying value or panics with a diagnostic that names the offending type,
/// its module and the construction stage.
pub trait TypeResultExt {
    /// The [Ok] type of the underlying [Result].
    type OkType;

    /// If the result is [Ok], returns the underlying data; otherwise, panics
    /// with the `message` followed by the error description.
    fn expect_blame(self, message: &str) -> Self::OkType;
}

impl<T> TypeResultExt for TypeResult<T> {
    type OkType = T;

    #[inline(always)]
    fn expect_blame(self, message: &str) -> Self::OkType {
        match self {
            Ok(ok) => ok,

            Err(error) => {
                log::error!(target: crate::runtime::PIPELINE_LOG, "{message} {error}");

                panic!("{message}\n{error}")
            }
        }
    }
}

/// Represents any error that may occur while the type system constructs type
/// descriptors, builds default instances, or initializes new objects.
///
/// Errors that leave a type descriptor half-constructed are fatal for the
/// type system: the [TypeSystem::process_registrations](crate::runtime::TypeSystem::process_registrations)
/// function turns them into panics. Errors that are confined to a single
/// object under construction are reported to the caller.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum TypeError {
    /// A type lookup by name failed.
    UnknownType {
        /// The requested type name.
        name: CompactString,

        /// The closest known type name, if any.
        suggestion: Option<CompactString>,
    },

    /// A field lookup by name failed.
    UnknownField {
        /// The type that was searched.
        ty: CompactString,

        /// The requested field name or path.
        field: CompactString,

        /// The closest field name of the type, if any.
        suggestion: Option<CompactString>,
    },

    /// A function lookup by name failed.
    UnknownFunction {
        /// The type that was searched.
        ty: CompactString,

        /// The requested function name.
        function: CompactString,
    },

    /// An enumeration does not have the requested enumerator.
    UnknownEnumerator {
        /// The enumeration type.
        ty: CompactString,

        /// The requested enumerator name or value.
        enumerator: CompactString,
    },

    /// The type's parent, interface, or nested struct type is not registered
    /// anywhere, or it has not been constructed when it was required.
    UnresolvedDependency {
        /// The dependent type.
        ty: CompactString,

        /// The module of the dependent type.
        module: CompactString,

        /// The name of the missing dependency.
        dependency: CompactString,

        /// The construction stage at which the dependency was required.
        stage: ConstructionStage,
    },

    /// A dependency of the type has failed to construct earlier.
    FailedDependency {
        /// The dependent type.
        ty: CompactString,

        /// The module of the dependent type.
        module: CompactString,

        /// The qualified name of the failed dependency.
        dependency: CompactString,

        /// The last construction stage the dependency has reached.
        stage: ConstructionStage,
    },

    /// The type inherits (directly or indirectly) from itself.
    InheritanceCycle {
        /// The type that closes the cycle.
        ty: CompactString,

        /// The module of the type.
        module: CompactString,
    },

    /// A dependency has a type kind that cannot be used in its position
    /// (e.g., a class that derives from a struct).
    KindMismatch {
        /// The dependent type.
        ty: CompactString,

        /// The module of the dependent type.
        module: CompactString,

        /// The name of the dependency.
        dependency: CompactString,

        /// The kind required in this position.
        expected: TypeKind,

        /// The actual kind of the dependency.
        actual: TypeKind,
    },

    /// A class lists a type that is not an interface in its `implements`
    /// clause.
    NotAnInterface {
        /// The implementing type.
        ty: CompactString,

        /// The module of the implementing type.
        module: CompactString,

        /// The listed type.
        interface: CompactString,
    },

    /// An interface declares a field.
    InterfaceField {
        /// The interface type.
        ty: CompactString,

        /// The module of the interface.
        module: CompactString,

        /// The name of the first declared field.
        field: CompactString,
    },

    /// A native type attempts to derive from a non-native type.
    NativeOverScripted {
        /// The native type.
        ty: CompactString,

        /// The module of the native type.
        module: CompactString,

        /// The non-native parent type.
        parent: CompactString,
    },

    /// The type system cannot resolve an executable entry point of the type:
    /// neither the declaration, nor the native table, nor any ancestor
    /// provides it.
    MissingBinding {
        /// The unbindable type.
        ty: CompactString,

        /// The module of the type.
        module: CompactString,

        /// The name of the entry point.
        entry: CompactString,
    },

    /// The accumulated field layout of the type exceeds the addressable range.
    LayoutOverflow {
        /// The type being linked.
        ty: CompactString,

        /// The module of the type.
        module: CompactString,

        /// The field at which the overflow was detected.
        field: CompactString,
    },

    /// The type was accessed before it reached the
    /// [Constructed](ConstructionStage::Constructed) stage.
    Unconstructed {
        /// The type.
        ty: CompactString,

        /// The module of the type.
        module: CompactString,

        /// The stage the type has reached.
        stage: ConstructionStage,
    },

    /// A value does not match the type of the field it is assigned to.
    ValueMismatch {
        /// The type that declares the field.
        ty: CompactString,

        /// The field name.
        field: CompactString,

        /// The field type description.
        expected: CompactString,

        /// The description of the provided value.
        actual: CompactString,
    },

    /// An array field element index is out of bounds.
    IndexOutOfBounds {
        /// The type that declares the field.
        ty: CompactString,

        /// The field name.
        field: CompactString,

        /// The requested element index.
        index: usize,

        /// The array dimension of the field.
        dimension: usize,
    },

    /// An attempt to instantiate an abstract class or a non-class type.
    AbstractInstantiation {
        /// The type.
        ty: CompactString,
    },

    /// The template object of a new object is not an instance of the new
    /// object's type or of one of its ancestors.
    InvalidTemplate {
        /// The type of the object under construction.
        ty: CompactString,

        /// The type of the template object.
        template: CompactString,
    },

    /// Building the default instance of the type requires the default instance
    /// of the same type.
    RecursiveDefault {
        /// The type.
        ty: CompactString,
    },

    /// A post-initialization hook did not chain to the hook of its base type.
    UnchainedPostInit {
        /// The type whose hook failed to complete initialization.
        ty: CompactString,
    },

    /// A post-initialization hook chained to its base type more than once.
    RepeatedPostInit {
        /// The type whose hook chained more than once.
        ty: CompactString,
    },

    /// Object initializer scopes were closed out of order on the current
    /// thread.
    ScopeMismatch {
        /// The type of the object whose scope was expected on top of the
        /// thread's scope stack.
        expected: CompactString,

        /// The type of the object whose scope attempted to close.
        actual: CompactString,
    },

    /// A module version string cannot be parsed, or conflicts with a version
    /// declared earlier.
    InvalidVersion {
        /// The module name.
        module: CompactString,

        /// The offending version string.
        version: CompactString,
    },

    /// A native function returned an error.
    Invocation {
        /// The type that declares the function.
        ty: CompactString,

        /// The function name.
        function: CompactString,

        /// The error description.
        message: CompactString,
    },
}

impl Display for TypeError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownType { name, suggestion } => {
                formatter.write_fmt(format_args!("Unknown type \"{name}\"."))?;

                if let Some(suggestion) = suggestion {
                    formatter.write_fmt(format_args!(" Did you mean \"{suggestion}\"?"))?;
                }

                Ok(())
            }

            Self::UnknownField {
                ty,
                field,
                suggestion,
            } => {
                formatter.write_fmt(format_args!("Type {ty} does not have field \"{field}\"."))?;

                if let Some(suggestion) = suggestion {
                    formatter.write_fmt(format_args!(" Did you mean \"{suggestion}\"?"))?;
                }

                Ok(())
            }

            Self::UnknownFunction { ty, function } => formatter.write_fmt(format_args!(
                "Type {ty} does not have function \"{function}\"."
            )),

            Self::UnknownEnumerator { ty, enumerator } => formatter.write_fmt(format_args!(
                "Enumeration {ty} does not have enumerator \"{enumerator}\"."
            )),

            Self::UnresolvedDependency {
                ty,
                module,
                dependency,
                stage,
            } => formatter.write_fmt(format_args!(
                "Type {ty} of module {module} failed at the {stage} stage: dependency \
                \"{dependency}\" cannot be resolved.",
            )),

            Self::FailedDependency {
                ty,
                module,
                dependency,
                stage,
            } => formatter.write_fmt(format_args!(
                "Type {ty} of module {module} depends on {dependency}, which failed to \
                construct at the {stage} stage.",
            )),

            Self::InheritanceCycle { ty, module } => formatter.write_fmt(format_args!(
                "Type {ty} of module {module} inherits from itself.",
            )),

            Self::KindMismatch {
                ty,
                module,
                dependency,
                expected,
                actual,
            } => formatter.write_fmt(format_args!(
                "Type {ty} of module {module} requires {dependency} to be {expected}, \
                but it is {actual}.",
            )),

            Self::NotAnInterface {
                ty,
                module,
                interface,
            } => formatter.write_fmt(format_args!(
                "Type {ty} of module {module} cannot implement {interface}, which is not \
                an interface.",
            )),

            Self::InterfaceField { ty, module, field } => formatter.write_fmt(format_args!(
                "Interface {ty} of module {module} cannot declare field \"{field}\".",
            )),

            Self::NativeOverScripted { ty, module, parent } => formatter.write_fmt(format_args!(
                "Native type {ty} of module {module} cannot derive from non-native type {parent}.",
            )),

            Self::MissingBinding { ty, module, entry } => formatter.write_fmt(format_args!(
                "Type {ty} of module {module} failed at the {} stage: entry point \
                \"{entry}\" cannot be bound.",
                ConstructionStage::Bound,
            )),

            Self::LayoutOverflow { ty, module, field } => formatter.write_fmt(format_args!(
                "Type {ty} of module {module} failed at the {} stage: field \"{field}\" \
                exceeds the addressable instance size.",
                ConstructionStage::Linked,
            )),

            Self::Unconstructed { ty, module, stage } => formatter.write_fmt(format_args!(
                "Type {ty} of module {module} is not constructed yet (current stage: {stage}).",
            )),

            Self::ValueMismatch {
                ty,
                field,
                expected,
                actual,
            } => formatter.write_fmt(format_args!(
                "Field {ty}.{field} of type {expected} cannot hold {actual} value.",
            )),

            Self::IndexOutOfBounds {
                ty,
                field,
                index,
                dimension,
            } => formatter.write_fmt(format_args!(
                "Index {index} is out of bounds of field {ty}.{field} with dimension {dimension}.",
            )),

            Self::AbstractInstantiation { ty } => {
                formatter.write_fmt(format_args!("Type {ty} cannot be instantiated."))
            }

            Self::InvalidTemplate { ty, template } => formatter.write_fmt(format_args!(
                "An object of type {template} cannot serve as a template for type {ty}.",
            )),

            Self::RecursiveDefault { ty } => formatter.write_fmt(format_args!(
                "The default instance of type {ty} depends on itself.",
            )),

            Self::UnchainedPostInit { ty } => formatter.write_fmt(format_args!(
                "Failed to complete initialization in type {ty}. The post-initialization \
                hook must chain to the hook of its base type.",
            )),

            Self::RepeatedPostInit { ty } => formatter.write_fmt(format_args!(
                "The post-initialization hook of type {ty} chained to its base type more \
                than once.",
            )),

            Self::ScopeMismatch { expected, actual } => formatter.write_fmt(format_args!(
                "Object initializer of {actual} closed while the initializer of {expected} \
                was the current one.",
            )),

            Self::InvalidVersion { module, version } => formatter.write_fmt(format_args!(
                "Module {module} cannot be declared with version \"{version}\".",
            )),

            Self::Invocation {
                ty,
                function,
                message,
            } => formatter.write_fmt(format_args!("Function {ty}.{function} failed. {message}")),
        }
    }
}

impl StdError for TypeError {}

impl TypeError {
    /// Returns the construction stage of a pipeline failure, if this error
    /// describes one.
    pub fn stage(&self) -> Option<ConstructionStage> {
        match self {
            Self::UnresolvedDependency { stage, .. } => Some(*stage),
            Self::Unconstructed { stage, .. } => Some(*stage),
            Self::FailedDependency { .. } => Some(ConstructionStage::DependenciesResolved),
            Self::InheritanceCycle { .. } => Some(ConstructionStage::DependenciesResolved),
            Self::KindMismatch { .. } => Some(ConstructionStage::DependenciesResolved),
            Self::NotAnInterface { .. } => Some(ConstructionStage::DependenciesResolved),
            Self::NativeOverScripted { .. } => Some(ConstructionStage::DependenciesResolved),
            Self::InterfaceField { .. } => Some(ConstructionStage::PopulatedFields),
            Self::MissingBinding { .. } => Some(ConstructionStage::Bound),
            Self::LayoutOverflow { .. } => Some(ConstructionStage::Linked),
            _ => None,
        }
    }

    /// Returns true if the error leaves a type descriptor unusable.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::UnknownType { .. }
            | Self::UnknownField { .. }
            | Self::UnknownFunction { .. }
            | Self::UnknownEnumerator { .. }
            | Self::ValueMismatch { .. }
            | Self::IndexOutOfBounds { .. }
            | Self::AbstractInstantiation { .. }
            | Self::InvalidTemplate { .. }
            | Self::Invocation { .. } => false,

            _ => true,
        }
    }
}

// Picks the candidate most similar to `name`, if it is similar enough to be
// a plausible misspelling.
pub(crate) fn suggest<'a>(
    name: &str,
    candidates: impl IntoIterator<Item = &'a str>,
) -> Option<CompactString> {
    const THRESHOLD: f64 = 0.8;

    let mut best: Option<(f64, &'a str)> = None;

    for candidate in candidates {
        let score = strsim::jaro_winkler(name, candidate);

        if score < THRESHOLD {
            continue;
        }

        match best {
            Some((previous, _)) if previous >= score => (),
            _ => best = Some((score, candidate)),
        }
    }

    best.map(|(_, candidate)| CompactString::from(candidate))
}

#[cfg(test)]
mod tests {
    use crate::runtime::{error::suggest, ConstructionStage, TypeError};

    #[test]
    fn test_suggestions() {
        assert_eq!(
            suggest("Widgte", ["Widget", "Container", "Base"]).as_deref(),
            Some("Widget"),
        );

        assert_eq!(suggest("Zzz", ["Widget", "Container"]), None);
    }

    #[test]
    fn test_fatal_diagnostics() {
        let error = TypeError::MissingBinding {
            ty: "Leaf".into(),
            module: "game".into(),
            entry: "constructor".into(),
        };

        assert!(error.is_fatal());
        assert_eq!(error.stage(), Some(ConstructionStage::Bound));

        let message = error.to_string();

        assert!(message.contains("Leaf"));
        assert!(message.contains("game"));
        assert!(message.contains("Bound"));
    }
}
