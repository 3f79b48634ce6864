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
    mem::{align_of, size_of},
    ptr,
    sync::OnceLock,
};

use compact_str::CompactString;

use crate::{
    report::debug_unreachable,
    runtime::{
        ty::{flag_set, lookup_meta},
        ConstructionStage,
        DefaultValue,
        FieldType,
        Object,
        TypeDescriptor,
        TypeError,
        TypeKind,
        TypeResult,
        Value,
    },
};

flag_set! {
    /// A set of [Field] flags.
    ///
    /// The [REFERENCE](FieldFlags::REFERENCE) and
    /// [DESTRUCTOR](FieldFlags::DESTRUCTOR) flags are derived from the field
    /// type when the owning type is linked. The rest are declared.
    pub struct FieldFlags;

    /// The field is not copied from explicit templates. New objects take its
    /// value from the type's default instance.
    TRANSIENT = 0;

    /// The field holds a reference to an owned subobject. Instancing creates
    /// a new subobject for each new owner instead of sharing the template's
    /// subobject.
    INSTANCED = 1;

    /// The field's default value is supplied by the
    /// [ConfigSource](crate::runtime::ConfigSource).
    CONFIG = 2;

    /// The field may contain an object reference.
    REFERENCE = 3;

    /// The field storage requires teardown.
    DESTRUCTOR = 4;
}

/// The computed placement of a [Field] within instances of its owner.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldLayout {
    /// The byte offset of the first element.
    pub offset: usize,

    /// The size of a single element in bytes.
    pub element_size: usize,

    /// The alignment of an element in bytes.
    pub alignment: usize,

    /// Flags derived from the field type.
    pub flags: FieldFlags,
}

/// A named, typed attribute of a [TypeDescriptor].
///
/// Fields are owned by exactly one type and live as long as the type does.
/// The byte [offset](Field::offset) of a field is known only after the
/// owning type is linked.
pub struct Field {
    pub(crate) owner: &'static TypeDescriptor,
    pub(crate) index: usize,
    pub(crate) name: CompactString,
    pub(crate) ty: FieldType,
    pub(crate) dimension: usize,
    pub(crate) flags: FieldFlags,
    pub(crate) default: Option<DefaultValue>,
    pub(crate) metadata: Vec<(CompactString, CompactString)>,
    pub(crate) layout: OnceLock<FieldLayout>,
    pub(crate) target: OnceLock<&'static TypeDescriptor>,
}

impl Debug for Field {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Field")
            .field("owner", &self.owner.qualified_name())
            .field("name", &self.name)
            .field("ty", &self.ty)
            .field("dimension", &self.dimension)
            .field("flags", &self.flags())
            .field("layout", &self.layout.get())
            .finish()
    }
}

impl Display for Field {
    #[inline(always)]
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_fmt(format_args!("{}.{}", self.owner, self.name))
    }
}

impl PartialEq for Field {
    #[inline(always)]
    fn eq(&self, other: &Self) -> bool {
        ptr::eq(self, other)
    }
}

impl Eq for Field {}

impl Field {
    /// The field name.
    #[inline(always)]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The type that declares the field.
    #[inline(always)]
    pub fn owner(&self) -> &'static TypeDescriptor {
        self.owner
    }

    /// The position of the field among its owner's own fields.
    #[inline(always)]
    pub fn index(&self) -> usize {
        self.index
    }

    /// The declared field type.
    #[inline(always)]
    pub fn ty(&self) -> &FieldType {
        &self.ty
    }

    /// The number of array elements; 1 for scalar fields.
    #[inline(always)]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// The declared flags, together with the derived flags if the owner is
    /// linked.
    #[inline(always)]
    pub fn flags(&self) -> FieldFlags {
        match self.layout.get() {
            Some(layout) => self.flags | layout.flags,
            None => self.flags,
        }
    }

    /// Returns true if the field is flagged as transient.
    #[inline(always)]
    pub fn is_transient(&self) -> bool {
        self.flags.contains(FieldFlags::TRANSIENT)
    }

    /// Returns true if the field holds owned subobject references.
    #[inline(always)]
    pub fn is_instanced(&self) -> bool {
        self.flags.contains(FieldFlags::INSTANCED)
    }

    /// Returns true if the field's default comes from the config source.
    #[inline(always)]
    pub fn is_config(&self) -> bool {
        self.flags.contains(FieldFlags::CONFIG)
    }

    /// Returns true if the field may contain an object reference. Consumers
    /// use this predicate to decide whether the field needs cross-object
    /// fix-up.
    #[inline(always)]
    pub fn contains_reference(&self) -> bool {
        self.flags().contains(FieldFlags::REFERENCE)
    }

    /// Returns true if the field storage requires teardown.
    #[inline(always)]
    pub fn needs_destructor(&self) -> bool {
        self.flags().contains(FieldFlags::DESTRUCTOR)
    }

    /// The field placement, if the owner is linked.
    #[inline(always)]
    pub fn layout(&self) -> Option<FieldLayout> {
        self.layout.get().copied()
    }

    /// The byte offset of the field, if the owner is linked.
    #[inline(always)]
    pub fn offset(&self) -> Option<usize> {
        self.layout.get().map(|layout| layout.offset)
    }

    /// The declared default value.
    #[inline(always)]
    pub fn default(&self) -> Option<&DefaultValue> {
        self.default.as_ref()
    }

    /// Looks up a metadata entry by key.
    #[inline]
    pub fn metadata(&self, key: &str) -> Option<&str> {
        lookup_meta(&self.metadata, key)
    }

    /// Reads the field of the `object`. Array fields without an `index` are
    /// read as a whole.
    pub fn get(&self, object: &Object, index: Option<usize>) -> TypeResult<Value> {
        self.check_object(object)?;
        self.check_index(index)?;

        object.read_field(self, 0, index)
    }

    /// Writes the field of the `object`. Array fields without an `index` are
    /// written as a whole from a [Value::Array].
    pub fn set(&self, object: &Object, index: Option<usize>, value: impl Into<Value>) -> TypeResult<()> {
        self.check_object(object)?;
        self.check_index(index)?;

        object.write_field(self, 0, index, value.into())
    }

    /// Resolves the enum, struct, or class the field type refers to.
    ///
    /// Struct targets are resolved when the owner is linked. Enum and object
    /// targets are resolved by name on first use, which may construct the
    /// target type from the pending registrations.
    pub fn target(&self) -> TypeResult<&'static TypeDescriptor> {
        if let Some(target) = self.target.get() {
            return Ok(target);
        }

        let (name, expected) = match &self.ty {
            FieldType::Enum(name) => (name, TypeKind::Enum),
            FieldType::Struct(name) => (name, TypeKind::Struct),
            FieldType::Object(name) => (name, TypeKind::Class),

            _ => {
                return Err(TypeError::ValueMismatch {
                    ty: self.owner.qualified_name().into(),
                    field: self.name.clone(),
                    expected: CompactString::from("type reference"),
                    actual: CompactString::from(self.ty.to_string()),
                })
            }
        };

        let target = self.owner.system().resolve(name)?;

        if target.kind() != expected {
            return Err(TypeError::KindMismatch {
                ty: self.owner.name().into(),
                module: self.owner.module().name().into(),
                dependency: name.clone(),
                expected,
                actual: target.kind(),
            });
        }

        Ok(*self.target.get_or_init(|| target))
    }

    // Computes the element size, alignment and derived flags. Struct targets
    // are constructed on demand.
    pub(crate) fn measure(&self) -> TypeResult<(usize, usize, FieldFlags)> {
        let reference = FieldFlags::REFERENCE | FieldFlags::DESTRUCTOR;

        Ok(match &self.ty {
            FieldType::Bool | FieldType::Byte => (1, 1, FieldFlags::EMPTY),
            FieldType::Int => (size_of::<i32>(), align_of::<i32>(), FieldFlags::EMPTY),
            FieldType::Int64 | FieldType::Enum(_) => {
                (size_of::<i64>(), align_of::<i64>(), FieldFlags::EMPTY)
            }
            FieldType::Float => (size_of::<f32>(), align_of::<f32>(), FieldFlags::EMPTY),
            FieldType::Double => (size_of::<f64>(), align_of::<f64>(), FieldFlags::EMPTY),

            FieldType::Str => (
                size_of::<CompactString>(),
                align_of::<CompactString>(),
                FieldFlags::DESTRUCTOR,
            ),

            FieldType::Object(_) => (
                size_of::<Option<Object>>(),
                align_of::<Option<Object>>(),
                reference,
            ),

            FieldType::Struct(name) => {
                let target = self.owner.system().require(
                    self.owner,
                    name,
                    ConstructionStage::Linked,
                    TypeKind::Struct,
                )?;

                let _ = self.target.set(target);

                let layout = target.linked_layout();

                let mut flags = FieldFlags::EMPTY;

                if !layout.references.is_empty() {
                    flags |= FieldFlags::REFERENCE;
                }

                if !layout.destructors.is_empty() {
                    flags |= FieldFlags::DESTRUCTOR;
                }

                (layout.instance_size, layout.alignment, flags)
            }
        })
    }

    // The field's storage is inside the object's block only if the owner is
    // the object's class or one of its ancestors.
    #[inline(always)]
    fn check_object(&self, object: &Object) -> TypeResult<()> {
        let ty = object.ty();

        if ty != self.owner && !ty.ancestors().any(|ancestor| ancestor == self.owner) {
            return Err(TypeError::UnknownField {
                ty: object.ty().qualified_name().into(),
                field: self.name.clone(),
                suggestion: None,
            });
        }

        Ok(())
    }

    #[inline(always)]
    pub(crate) fn check_index(&self, index: Option<usize>) -> TypeResult<()> {
        if let Some(index) = index {
            if index >= self.dimension {
                return Err(TypeError::IndexOutOfBounds {
                    ty: self.owner.qualified_name().into(),
                    field: self.name.clone(),
                    index,
                    dimension: self.dimension,
                });
            }
        }

        Ok(())
    }

    #[inline(always)]
    pub(crate) fn linked(&self) -> &FieldLayout {
        match self.layout.get() {
            Some(layout) => layout,

            // Safety: Field storage is accessed for linked types only.
            None => unsafe { debug_unreachable!("Field layout is not linked.") },
        }
    }

    #[inline(always)]
    fn linked_target(&self) -> &'static TypeDescriptor {
        match self.target.get() {
            Some(target) => target,

            // Safety: Struct targets are resolved during linking.
            None => unsafe { debug_unreachable!("Struct field target is not resolved.") },
        }
    }

    #[inline(always)]
    fn element(&self, base: usize, index: usize) -> usize {
        let layout = self.linked();

        base + layout.offset + index * layout.element_size
    }

    fn mismatch(&self, value: &Value) -> TypeError {
        TypeError::ValueMismatch {
            ty: self.owner.qualified_name().into(),
            field: self.name.clone(),
            expected: CompactString::from(self.ty.to_string()),
            actual: CompactString::from(value.describe()),
        }
    }

    /// Converts the `value` into the canonical representation of this field
    /// type, resolving enumerator names and checking object types.
    ///
    /// If `whole` is true and the field is an array, the value must be a
    /// [Value::Array] with at most [dimension](Self::dimension) elements.
    pub(crate) fn prepare(&self, value: Value, whole: bool) -> TypeResult<Value> {
        if whole && self.dimension > 1 {
            let Value::Array(items) = value else {
                return Err(self.mismatch(&value));
            };

            if items.len() > self.dimension {
                return Err(TypeError::IndexOutOfBounds {
                    ty: self.owner.qualified_name().into(),
                    field: self.name.clone(),
                    index: items.len() - 1,
                    dimension: self.dimension,
                });
            }

            let mut prepared = Vec::with_capacity(items.len());

            for item in items {
                prepared.push(self.prepare_element(item)?);
            }

            return Ok(Value::Array(prepared));
        }

        self.prepare_element(value)
    }

    fn prepare_element(&self, value: Value) -> TypeResult<Value> {
        Ok(match (&self.ty, value) {
            (FieldType::Bool, value @ Value::Bool(_)) => value,

            (FieldType::Byte, value @ Value::Byte(_)) => value,

            (FieldType::Byte, value @ (Value::Int(_) | Value::Int64(_))) => {
                match value.as_int().and_then(|int| u8::try_from(int).ok()) {
                    Some(byte) => Value::Byte(byte),
                    None => return Err(self.mismatch(&value)),
                }
            }

            (FieldType::Int, value @ Value::Int(_)) => value,

            (FieldType::Int, value @ (Value::Byte(_) | Value::Int64(_))) => {
                match value.as_int().and_then(|int| i32::try_from(int).ok()) {
                    Some(int) => Value::Int(int),
                    None => return Err(self.mismatch(&value)),
                }
            }

            (FieldType::Int64, value @ (Value::Byte(_) | Value::Int(_) | Value::Int64(_))) => {
                match value.as_int() {
                    Some(int) => Value::Int64(int),
                    None => return Err(self.mismatch(&value)),
                }
            }

            (FieldType::Float, Value::Float(float)) => Value::Float(float),
            (FieldType::Float, Value::Double(double)) => Value::Float(double as f32),

            (FieldType::Double, Value::Float(float)) => Value::Double(float as f64),
            (FieldType::Double, Value::Double(double)) => Value::Double(double),

            (FieldType::Str, value @ Value::Str(_)) => value,

            (FieldType::Enum(_), Value::Str(name)) => {
                let target = self.target()?;

                match target.enum_value(&name) {
                    Some(value) => Value::Enum(value),

                    None => {
                        return Err(TypeError::UnknownEnumerator {
                            ty: target.qualified_name().into(),
                            enumerator: name,
                        })
                    }
                }
            }

            (FieldType::Enum(_), value @ (Value::Enum(_) | Value::Int(_) | Value::Int64(_))) => {
                let target = self.target()?;

                let int = match value.as_int() {
                    Some(int) => int,
                    None => return Err(self.mismatch(&value)),
                };

                if target.enum_name(int).is_none() {
                    return Err(TypeError::UnknownEnumerator {
                        ty: target.qualified_name().into(),
                        enumerator: compact_str::format_compact!("{int}"),
                    });
                }

                Value::Enum(int)
            }

            (FieldType::Object(_), Value::Object(None)) => Value::Object(None),

            (FieldType::Object(_), Value::Object(Some(object))) => {
                let target = self.target()?;

                if !object.ty().is_a(target) {
                    return Err(TypeError::ValueMismatch {
                        ty: self.owner.qualified_name().into(),
                        field: self.name.clone(),
                        expected: CompactString::from(self.ty.to_string()),
                        actual: object.ty().qualified_name().into(),
                    });
                }

                Value::Object(Some(object))
            }

            (FieldType::Struct(_), Value::Struct(members)) => {
                let target = self.target()?;
                let mut prepared = Vec::with_capacity(members.len());

                for (name, value) in members {
                    let field = target.field_or_error(&name)?;

                    prepared.push((name, field.prepare(value, true)?));
                }

                Value::Struct(prepared)
            }

            (_, value) => return Err(self.mismatch(&value)),
        })
    }

    /// Default-constructs the storage of every element that requires
    /// teardown. The memory of the field must be zeroed.
    ///
    /// # Safety
    ///
    /// `base` must point to a live block laid out for the owner, and the
    /// field's storage must not be constructed.
    pub(crate) unsafe fn construct(&self, base: *mut u8) {
        for index in 0..self.dimension {
            let element = self.element(base as usize, index) as *mut u8;

            match &self.ty {
                // Safety: The element is aligned and belongs to the block.
                FieldType::Str => unsafe {
                    ptr::write(element as *mut CompactString, CompactString::default())
                },

                // Safety: The element is aligned and belongs to the block.
                FieldType::Object(_) => unsafe {
                    ptr::write(element as *mut Option<Object>, None)
                },

                FieldType::Struct(_) => {
                    for field in &self.linked_target().linked_layout().destructors {
                        // Safety: The struct element is laid out for the target.
                        unsafe { field.construct(element) }
                    }
                }

                _ => (),
            }
        }
    }

    /// Drops the storage of every element that requires teardown.
    ///
    /// # Safety
    ///
    /// The field's storage must be constructed, and must not be used after
    /// this call.
    pub(crate) unsafe fn destroy(&self, base: *mut u8) {
        for index in 0..self.dimension {
            let element = self.element(base as usize, index) as *mut u8;

            match &self.ty {
                // Safety: The element holds a constructed string.
                FieldType::Str => unsafe { ptr::drop_in_place(element as *mut CompactString) },

                // Safety: The element holds a constructed reference.
                FieldType::Object(_) => unsafe {
                    ptr::drop_in_place(element as *mut Option<Object>)
                },

                FieldType::Struct(_) => {
                    for field in &self.linked_target().linked_layout().destructors {
                        // Safety: The struct element is laid out for the target.
                        unsafe { field.destroy(element) }
                    }
                }

                _ => (),
            }
        }
    }

    /// Copies the field's value from the `source` block to the `destination`
    /// block.
    ///
    /// # Safety
    ///
    /// Both blocks must be constructed and laid out for a type that contains
    /// this field, and must not overlap.
    pub(crate) unsafe fn copy(&self, destination: *mut u8, source: *const u8) {
        let layout = self.linked();

        match &self.ty {
            FieldType::Str => {
                for index in 0..self.dimension {
                    let from = self.element(source as usize, index) as *const CompactString;
                    let to = self.element(destination as usize, index) as *mut CompactString;

                    // Safety: Both elements hold constructed strings.
                    unsafe { (*to).clone_from(&*from) }
                }
            }

            FieldType::Object(_) => {
                for index in 0..self.dimension {
                    let from = self.element(source as usize, index) as *const Option<Object>;
                    let to = self.element(destination as usize, index) as *mut Option<Object>;

                    // Safety: Both elements hold constructed references.
                    unsafe { (*to).clone_from(&*from) }
                }
            }

            FieldType::Struct(_) => {
                let properties = &self.linked_target().linked_layout().properties;

                for index in 0..self.dimension {
                    let from = self.element(source as usize, index) as *const u8;
                    let to = self.element(destination as usize, index) as *mut u8;

                    for field in properties {
                        // Safety: The struct elements are laid out for the target.
                        unsafe { field.copy(to, from) }
                    }
                }
            }

            _ => {
                let from = (source as usize + layout.offset) as *const u8;
                let to = (destination as usize + layout.offset) as *mut u8;

                // Safety: Plain data of the same size in distinct blocks.
                unsafe {
                    ptr::copy_nonoverlapping(from, to, layout.element_size * self.dimension)
                }
            }
        }
    }

    /// Reads the field value. Without an `index`, array fields are read as a
    /// whole.
    ///
    /// # Safety
    ///
    /// `base` must point to a constructed block laid out for a type that
    /// contains this field, and the index must be in bounds.
    pub(crate) unsafe fn read(&self, base: *const u8, index: Option<usize>) -> Value {
        match index {
            // Safety: Upheld by the caller.
            Some(index) => unsafe { self.read_element(base, index) },

            None if self.dimension == 1 => {
                // Safety: Upheld by the caller.
                unsafe { self.read_element(base, 0) }
            }

            None => Value::Array(
                (0..self.dimension)
                    // Safety: Upheld by the caller.
                    .map(|index| unsafe { self.read_element(base, index) })
                    .collect(),
            ),
        }
    }

    unsafe fn read_element(&self, base: *const u8, index: usize) -> Value {
        let element = self.element(base as usize, index) as *const u8;

        // Safety: The element is aligned, constructed and typed by the field type.
        unsafe {
            match &self.ty {
                FieldType::Bool => Value::Bool(*element != 0),
                FieldType::Byte => Value::Byte(*element),
                FieldType::Int => Value::Int(ptr::read(element as *const i32)),
                FieldType::Int64 => Value::Int64(ptr::read(element as *const i64)),
                FieldType::Enum(_) => Value::Enum(ptr::read(element as *const i64)),
                FieldType::Float => Value::Float(ptr::read(element as *const f32)),
                FieldType::Double => Value::Double(ptr::read(element as *const f64)),
                FieldType::Str => Value::Str((*(element as *const CompactString)).clone()),
                FieldType::Object(_) => Value::Object((*(element as *const Option<Object>)).clone()),

                FieldType::Struct(_) => Value::Struct(
                    self.linked_target()
                        .linked_layout()
                        .properties
                        .iter()
                        .map(|field| (field.name.clone(), field.read(element, None)))
                        .collect(),
                ),
            }
        }
    }

    /// Stores a [prepared](Self::prepare) value.
    ///
    /// # Safety
    ///
    /// `base` must point to a constructed block laid out for a type that
    /// contains this field, the index must be in bounds, and the value must
    /// be prepared by this field with the matching `whole` argument.
    pub(crate) unsafe fn write(&self, base: *mut u8, index: Option<usize>, value: Value) {
        match (index, value) {
            (None, Value::Array(items)) if self.dimension > 1 => {
                for (index, item) in items.into_iter().enumerate() {
                    // Safety: Upheld by the caller.
                    unsafe { self.write_element(base, index, item) }
                }
            }

            // Safety: Upheld by the caller.
            (index, value) => unsafe { self.write_element(base, index.unwrap_or(0), value) },
        }
    }

    unsafe fn write_element(&self, base: *mut u8, index: usize, value: Value) {
        let element = self.element(base as usize, index) as *mut u8;

        // Safety: The element is aligned, constructed and typed by the field type.
        unsafe {
            match value {
                Value::Bool(value) => *element = value as u8,
                Value::Byte(value) => *element = value,
                Value::Int(value) => ptr::write(element as *mut i32, value),
                Value::Int64(value) | Value::Enum(value) => ptr::write(element as *mut i64, value),
                Value::Float(value) => ptr::write(element as *mut f32, value),
                Value::Double(value) => ptr::write(element as *mut f64, value),
                Value::Str(value) => *(element as *mut CompactString) = value,
                Value::Object(value) => *(element as *mut Option<Object>) = value,

                Value::Struct(members) => {
                    let target = self.linked_target();

                    for (name, value) in members {
                        match target.field(&name) {
                            Some(field) => field.write(element, None, value),
                            None => debug_unreachable!("Unprepared struct member."),
                        }
                    }
                }

                Value::Array(_) => debug_unreachable!("Unprepared array value."),
            }
        }
    }

    /// Reads an object reference stored at a byte offset within a block.
    ///
    /// # Safety
    ///
    /// The offset must be produced by [Field::visit_references] for a block
    /// of the same type.
    pub(crate) unsafe fn read_reference(base: *const u8, offset: usize) -> Option<Object> {
        // Safety: Upheld by the caller.
        unsafe { (*((base as usize + offset) as *const Option<Object>)).clone() }
    }

    /// Replaces an object reference stored at a byte offset within a block.
    ///
    /// # Safety
    ///
    /// The offset must be produced by [Field::visit_references] for a block
    /// of the same type.
    pub(crate) unsafe fn write_reference(base: *mut u8, offset: usize, value: Option<Object>) {
        // Safety: Upheld by the caller.
        unsafe { *((base as usize + offset) as *mut Option<Object>) = value }
    }

    /// Calls `visitor` for every object reference slot of this field, passing
    /// the innermost field that declares the slot and the slot's byte offset
    /// relative to `base`.
    pub(crate) fn visit_references(&'static self, base: usize, visitor: &mut impl FnMut(&'static Field, usize)) {
        match &self.ty {
            FieldType::Object(_) => {
                for index in 0..self.dimension {
                    visitor(self, self.element(base, index));
                }
            }

            FieldType::Struct(_) => {
                let references = &self.linked_target().linked_layout().references;

                for index in 0..self.dimension {
                    let element = self.element(base, index);

                    for field in references {
                        field.visit_references(element, visitor);
                    }
                }
            }

            _ => (),
        }
    }
}

/// A resolved field path such as `transform.position[1].x`.
pub(crate) struct FieldPath {
    pub(crate) field: &'static Field,
    pub(crate) base: usize,
    pub(crate) index: Option<usize>,
}

impl FieldPath {
    pub(crate) fn resolve(ty: &'static TypeDescriptor, path: &str) -> TypeResult<Self> {
        let mut scope = ty;
        let mut base = 0;
        let mut segments = path.split('.').peekable();

        loop {
            let Some(segment) = segments.next() else {
                return Err(TypeError::UnknownField {
                    ty: ty.qualified_name().into(),
                    field: path.into(),
                    suggestion: None,
                });
            };

            let (name, index) = match segment.split_once('[') {
                None => (segment, None),

                Some((name, rest)) => match rest.strip_suffix(']').map(str::parse::<usize>) {
                    Some(Ok(index)) => (name, Some(index)),

                    _ => {
                        return Err(TypeError::UnknownField {
                            ty: ty.qualified_name().into(),
                            field: path.into(),
                            suggestion: None,
                        })
                    }
                },
            };

            let field = scope.field_or_error(name)?;

            field.check_index(index)?;

            if segments.peek().is_none() {
                return Ok(Self { field, base, index });
            }

            let FieldType::Struct(_) = field.ty() else {
                return Err(TypeError::UnknownField {
                    ty: scope.qualified_name().into(),
                    field: path.into(),
                    suggestion: None,
                });
            };

            base = field.element(base, index.unwrap_or(0));
            scope = field.linked_target();
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::runtime::{
        FieldDeclaration,
        FieldFlags,
        FieldType,
        NewObject,
        Object,
        ObjectFlags,
        Registries,
        SystemConfig,
        TypeDeclaration,
        TypeError,
        TypeKind,
        TypeSystem,
        Value,
    };

    fn shape() -> Object {
        let registries = Registries::leak();

        registries.register(TypeKind::Enum, "core", "Color", || {
            TypeDeclaration::new()
                .enumerator("Red", 0)
                .enumerator("Green", 1)
                .enumerator("Blue", 2)
        });

        registries.register(TypeKind::Struct, "core", "Vector", || {
            TypeDeclaration::new()
                .field(FieldDeclaration::new("x", FieldType::Float))
                .field(FieldDeclaration::new("y", FieldType::Float))
        });

        registries.register(TypeKind::Class, "core", "Shape", || {
            TypeDeclaration::new()
                .constructor(|_| Ok(()))
                .field(FieldDeclaration::new("points", FieldType::Struct("Vector".into())).array(3))
                .field(FieldDeclaration::new("tags", FieldType::Int).array(2))
                .field(FieldDeclaration::new("name", FieldType::Str).default("shape"))
                .field(FieldDeclaration::new("color", FieldType::Enum("Color".into())).default_enumerator("Green"))
                .field(FieldDeclaration::new("owner", FieldType::Object("Shape".into())))
                .field(
                    FieldDeclaration::new("children", FieldType::Object("Shape".into()))
                        .array(2)
                        .flags(FieldFlags::INSTANCED),
                )
        });

        let system = TypeSystem::new(SystemConfig::new(), registries);
        let _ = system.process_registrations();

        system
            .new_object(NewObject::new(system.find("Shape").unwrap()))
            .unwrap()
    }

    #[test]
    fn test_field_paths() {
        let object = shape();

        assert_eq!(object.get("points[1].x").unwrap(), Value::Float(0.0));

        object.set("points[1].x", 2.5f32).unwrap();
        object.set("points[2]", Value::Struct(vec![("y".into(), Value::Float(4.0))])).unwrap();

        assert_eq!(object.get("points[1].x").unwrap(), Value::Float(2.5));
        assert_eq!(object.get("points[0].x").unwrap(), Value::Float(0.0));
        assert_eq!(object.get("points[2].y").unwrap(), Value::Float(4.0));
        assert_eq!(object.get("points[1]").unwrap().member("x"), Some(&Value::Float(2.5)));

        assert!(matches!(
            object.get("points[3].x"),
            Err(TypeError::IndexOutOfBounds { index: 3, dimension: 3, .. }),
        ));

        assert!(matches!(object.get("name.x"), Err(TypeError::UnknownField { .. })));
        assert!(matches!(object.get("points[one]"), Err(TypeError::UnknownField { .. })));

        assert!(matches!(
            object.get("nmae"),
            Err(TypeError::UnknownField { suggestion: Some(suggestion), .. })
                if suggestion.as_str() == "name",
        ));
    }

    #[test]
    fn test_flag_sets() {
        let mut flags = FieldFlags::TRANSIENT | FieldFlags::INSTANCED;

        assert!(flags.contains(FieldFlags::INSTANCED));
        assert!(!flags.contains(FieldFlags::CONFIG));
        assert_eq!(flags & FieldFlags::TRANSIENT, FieldFlags::TRANSIENT);

        flags |= FieldFlags::CONFIG;

        assert!(flags.intersects(FieldFlags::CONFIG));
        assert!(format!("{flags:?}").contains("INSTANCED"));

        let state = ObjectFlags::DEFAULT_INSTANCE | ObjectFlags::INITIALIZED;

        assert!(state.contains(ObjectFlags::INITIALIZED));
        assert!((state & ObjectFlags::NEEDS_LOAD).is_empty());
        assert_eq!(format!("{:?}", ObjectFlags::EMPTY), "{}");
    }

    #[test]
    fn test_field_values() {
        let object = shape();

        assert_eq!(object.get("name").unwrap(), Value::from("shape"));
        assert_eq!(object.get("tags").unwrap(), Value::Array(vec![Value::Int(0), Value::Int(0)]));

        object.set_at("tags", 1, 7).unwrap();
        object.set("tags", vec![3]).unwrap();

        assert_eq!(object.get("tags").unwrap(), Value::from(vec![3, 7]));
        assert_eq!(object.get_at("tags", 1).unwrap(), Value::Int(7));

        assert!(matches!(
            object.set_at("tags", 2, 1),
            Err(TypeError::IndexOutOfBounds { .. }),
        ));

        assert!(matches!(
            object.set("tags", vec![1, 2, 3]),
            Err(TypeError::IndexOutOfBounds { .. }),
        ));

        assert!(matches!(object.set("name", 5), Err(TypeError::ValueMismatch { .. })));
        assert!(matches!(object.set("tags[0]", 1i64 << 40), Err(TypeError::ValueMismatch { .. })));

        assert_eq!(object.get("color").unwrap(), Value::Enum(1));

        object.set("color", "Blue").unwrap();

        assert_eq!(object.get("color").unwrap(), Value::Enum(2));
        assert!(matches!(
            object.set("color", "Purple"),
            Err(TypeError::UnknownEnumerator { .. }),
        ));

        object.set("owner", object.clone()).unwrap();

        assert_eq!(object.get("owner").unwrap(), Value::Object(Some(object.clone())));

        object.set("owner", None::<Object>).unwrap();

        assert_eq!(object.get("owner").unwrap(), Value::Object(None));
    }

    #[test]
    fn test_field_layout() {
        let object = shape();
        let ty = object.ty();

        let points = ty.field("points").unwrap();
        let children = ty.field("children").unwrap();
        let name = ty.field("name").unwrap();

        assert_eq!(points.dimension(), 3);
        assert_eq!(points.target().unwrap().name(), "Vector");
        assert!(!points.contains_reference());
        assert!(children.contains_reference());
        assert!(children.needs_destructor());
        assert!(children.is_instanced());
        assert!(name.needs_destructor());
        assert!(!name.contains_reference());
        assert_eq!(ty.linked_layout().references().len(), 2);

        let mut slots = Vec::new();

        children.visit_references(0, &mut |field, offset| slots.push((field.name().to_owned(), offset)));

        let offset = children.offset().unwrap();
        let element_size = children.layout().unwrap().element_size;

        assert_eq!(
            slots,
            [
                ("children".to_owned(), offset),
                ("children".to_owned(), offset + element_size),
            ],
        );
    }
}
