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
    sync::{
        atomic::{AtomicU32, AtomicU64, Ordering as AtomicOrdering},
        Arc,
        Mutex,
        MutexGuard,
        RwLock,
        RwLockReadGuard,
        RwLockWriteGuard,
        Weak,
    },
};

use compact_str::{format_compact, CompactString};

use crate::runtime::{
    field::FieldPath,
    memory::Memory,
    ty::flag_set,
    Field,
    TypeDescriptor,
    TypeResult,
    Value,
};

flag_set! {
    /// A set of [Object] state flags.
    pub struct ObjectFlags;

    /// The object is the default instance of its type.
    DEFAULT_INSTANCE = 0;

    /// The object's owned references have not been resolved after loading.
    NEEDS_LOAD = 1;

    /// The object has completed initialization, including post-init hooks.
    INITIALIZED = 2;

    /// The object was created as a default subobject by its outer's
    /// constructor.
    SUBOBJECT = 3;
}

/// A handle to an instance of a class.
///
/// Cloning the handle is cheap, and two handles are equal if they refer to
/// the same object.
///
/// An object has a name, an optional outer object that owns it, a list of
/// owned subobjects, and a block of field storage laid out according to the
/// object's [type](Object::ty). Objects are created by the
/// [TypeSystem](crate::runtime::TypeSystem) from a template object, which is
/// the type's default instance unless specified otherwise.
#[derive(Clone)]
pub struct Object(Arc<ObjectInner>);

struct ObjectInner {
    id: u64,
    ty: &'static TypeDescriptor,
    name: CompactString,
    outer: Option<Weak<ObjectInner>>,
    archetype: Option<Object>,
    flags: AtomicU32,
    subobjects: Mutex<Vec<Object>>,
    memory: RwLock<Memory>,
}

impl PartialEq for Object {
    #[inline(always)]
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Object {}

impl Hash for Object {
    #[inline(always)]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state)
    }
}

impl Debug for Object {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Object")
            .field("id", &self.0.id)
            .field("ty", &self.0.ty.qualified_name())
            .field("name", &self.0.name)
            .field("flags", &self.flags())
            .finish_non_exhaustive()
    }
}

impl Display for Object {
    #[inline(always)]
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_fmt(format_args!("{} {}", self.0.ty, self.0.name))
    }
}

impl Object {
    pub(crate) fn allocate(
        ty: &'static TypeDescriptor,
        name: Option<CompactString>,
        outer: Option<&Object>,
        archetype: Option<Object>,
        flags: ObjectFlags,
    ) -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);

        let id = NEXT_ID.fetch_add(1, AtomicOrdering::Relaxed);

        let name = match name {
            Some(name) => name,
            None if flags.contains(ObjectFlags::DEFAULT_INSTANCE) => {
                format_compact!("Default__{}", ty.name())
            }
            None => format_compact!("{}_{id}", ty.name()),
        };

        let object = Self(Arc::new(ObjectInner {
            id,
            ty,
            name,
            outer: outer.map(|outer| Arc::downgrade(&outer.0)),
            archetype,
            flags: AtomicU32::new(flags.bits()),
            subobjects: Mutex::new(Vec::new()),
            memory: RwLock::new(Memory::new(ty)),
        }));

        if let Some(outer) = outer {
            outer.lock_subobjects().push(object.clone());
        }

        object
    }

    #[inline(always)]
    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    /// A process-unique object number.
    #[inline(always)]
    pub fn id(&self) -> u64 {
        self.0.id
    }

    /// The object's class.
    #[inline(always)]
    pub fn ty(&self) -> &'static TypeDescriptor {
        self.0.ty
    }

    /// Returns true if the object's class is `ty` or one of its descendants.
    #[inline(always)]
    pub fn is_a(&self, ty: &TypeDescriptor) -> bool {
        self.0.ty.is_a(ty)
    }

    /// The object name. Subobjects are looked up by name within their outer.
    #[inline(always)]
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// The object that owns this object, if it is still alive.
    #[inline(always)]
    pub fn outer(&self) -> Option<Object> {
        self.0.outer.as_ref()?.upgrade().map(Self)
    }

    /// The template this object was initialized from.
    #[inline(always)]
    pub fn archetype(&self) -> Option<&Object> {
        self.0.archetype.as_ref()
    }

    /// The object state flags.
    #[inline(always)]
    pub fn flags(&self) -> ObjectFlags {
        ObjectFlags::from_bits(self.0.flags.load(AtomicOrdering::Acquire))
    }

    #[inline(always)]
    pub(crate) fn set_flags(&self, flags: ObjectFlags) {
        let _ = self.0.flags.fetch_or(flags.bits(), AtomicOrdering::AcqRel);
    }

    #[inline(always)]
    pub(crate) fn clear_flags(&self, flags: ObjectFlags) {
        let _ = self.0.flags.fetch_and(!flags.bits(), AtomicOrdering::AcqRel);
    }

    /// Returns true if the object is the default instance of its class.
    #[inline(always)]
    pub fn is_default_instance(&self) -> bool {
        self.flags().contains(ObjectFlags::DEFAULT_INSTANCE)
    }

    /// Returns true if the object completed initialization.
    #[inline(always)]
    pub fn is_initialized(&self) -> bool {
        self.flags().contains(ObjectFlags::INITIALIZED)
    }

    /// Returns true if the object's owned references await resolution.
    #[inline(always)]
    pub fn needs_load(&self) -> bool {
        self.flags().contains(ObjectFlags::NEEDS_LOAD)
    }

    /// Marks the object as partially loaded. A loading
    /// [InstanceGraph](crate::runtime::InstanceGraph) resolves the owned
    /// references of such objects before handing them out.
    #[inline(always)]
    pub fn mark_needs_load(&self) {
        self.set_flags(ObjectFlags::NEEDS_LOAD);
    }

    /// Returns true if this object is `root` or is owned by `root`, directly
    /// or through a chain of outers.
    pub fn is_in(&self, root: &Object) -> bool {
        if self == root {
            return true;
        }

        let mut current = self.outer();

        while let Some(outer) = current {
            if &outer == root {
                return true;
            }

            current = outer.outer();
        }

        false
    }

    /// The subobjects owned by this object, in creation order.
    #[inline(always)]
    pub fn subobjects(&self) -> Vec<Object> {
        self.lock_subobjects().clone()
    }

    /// Looks up an owned subobject by name.
    #[inline]
    pub fn find_subobject(&self, name: &str) -> Option<Object> {
        self.lock_subobjects()
            .iter()
            .find(|subobject| subobject.name() == name)
            .cloned()
    }

    #[inline(always)]
    pub(crate) fn remove_subobject(&self, subobject: &Object) {
        self.lock_subobjects().retain(|candidate| candidate != subobject);
    }

    /// Reads a field value by path.
    ///
    /// The path is a field name, optionally followed by an element index
    /// (`values[2]`), and continued with `.` into struct fields
    /// (`transform.position.x`).
    pub fn get(&self, path: &str) -> TypeResult<Value> {
        let path = FieldPath::resolve(self.0.ty, path)?;

        self.read_field(path.field, path.base, path.index)
    }

    /// Writes a field value by path. See [get](Self::get) for the path
    /// syntax.
    pub fn set(&self, path: &str, value: impl Into<Value>) -> TypeResult<()> {
        let path = FieldPath::resolve(self.0.ty, path)?;

        self.write_field(path.field, path.base, path.index, value.into())
    }

    /// Reads a single element of an array field.
    #[inline]
    pub fn get_at(&self, field: &str, index: usize) -> TypeResult<Value> {
        let field = self.0.ty.field_or_error(field)?;

        field.get(self, Some(index))
    }

    /// Writes a single element of an array field.
    #[inline]
    pub fn set_at(&self, field: &str, index: usize, value: impl Into<Value>) -> TypeResult<()> {
        let field = self.0.ty.field_or_error(field)?;

        field.set(self, Some(index), value)
    }

    /// Calls a function of the object's class.
    #[inline(always)]
    pub fn invoke(&self, function: &str, args: &[Value]) -> TypeResult<Value> {
        self.0.ty.invoke(function, self, args)
    }

    pub(crate) fn read_field(&self, field: &Field, base: usize, index: Option<usize>) -> TypeResult<Value> {
        let memory = self.read_memory();

        // Safety: The path is resolved against this object's type.
        Ok(unsafe { field.read((memory.as_ptr() as usize + base) as *const u8, index) })
    }

    pub(crate) fn write_field(
        &self,
        field: &Field,
        base: usize,
        index: Option<usize>,
        value: Value,
    ) -> TypeResult<()> {
        let value = field.prepare(value, index.is_none())?;

        let mut memory = self.write_memory();

        // Safety: The path is resolved against this object's type, and the
        //         value is prepared by the field.
        unsafe { field.write((memory.as_mut_ptr() as usize + base) as *mut u8, index, value) };

        Ok(())
    }

    #[inline(always)]
    pub(crate) fn read_memory(&self) -> RwLockReadGuard<'_, Memory> {
        self.0
            .memory
            .read()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    #[inline(always)]
    pub(crate) fn write_memory(&self) -> RwLockWriteGuard<'_, Memory> {
        self.0
            .memory
            .write()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    #[inline(always)]
    fn lock_subobjects(&self) -> MutexGuard<'_, Vec<Object>> {
        self.0
            .subobjects
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}

impl ObjectFlags {
    #[inline(always)]
    const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }
}
