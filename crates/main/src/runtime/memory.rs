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
    alloc::{alloc_zeroed, dealloc, handle_alloc_error, Layout},
    fmt::{Debug, Formatter},
    ptr::NonNull,
};

use crate::{report::system_panic, runtime::TypeDescriptor};

/// A zero-initialized, aligned block of memory laid out for a linked class.
///
/// Creating a block constructs the storage of every field in the type's
/// destructor chain. Dropping the block tears the same fields down.
pub(crate) struct Memory {
    head: NonNull<u8>,
    layout: Layout,
    ty: &'static TypeDescriptor,
}

// Safety: The block is only accessed through the owning object's lock, and
//         all field storage types are Send.
unsafe impl Send for Memory {}

// Safety: The block is only accessed through the owning object's lock, and
//         all field storage types are Sync.
unsafe impl Sync for Memory {}

impl Debug for Memory {
    #[inline(always)]
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Memory")
            .field("ty", &self.ty.qualified_name())
            .field("size", &self.layout.size())
            .finish()
    }
}

impl Drop for Memory {
    fn drop(&mut self) {
        for field in self.ty.linked_layout().destructors() {
            // Safety: The block was constructed for this type in `new`.
            unsafe { field.destroy(self.head.as_ptr()) }
        }

        // Safety: The block was allocated with this layout in `new`.
        unsafe { dealloc(self.head.as_ptr(), self.layout) }
    }
}

impl Memory {
    pub(crate) fn new(ty: &'static TypeDescriptor) -> Self {
        let type_layout = ty.linked_layout();

        let layout = match Layout::from_size_align(
            type_layout.instance_size().max(1),
            type_layout.alignment(),
        ) {
            Ok(layout) => layout,
            Err(_) => system_panic!("Linked type has invalid instance layout."),
        };

        // Safety: The layout has non-zero size.
        let head = match NonNull::new(unsafe { alloc_zeroed(layout) }) {
            Some(head) => head,
            None => handle_alloc_error(layout),
        };

        for field in type_layout.destructors() {
            // Safety: The block is zeroed and laid out for the type.
            unsafe { field.construct(head.as_ptr()) }
        }

        Self { head, layout, ty }
    }

    #[inline(always)]
    pub(crate) fn as_ptr(&self) -> *const u8 {
        self.head.as_ptr()
    }

    #[inline(always)]
    pub(crate) fn as_mut_ptr(&mut self) -> *mut u8 {
        self.head.as_ptr()
    }
}
