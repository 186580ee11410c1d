use std::fmt;
use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;

use crate::deleter::delete::{DefaultDelete, Deleter};

/// Exclusive owner of a payload, released through `D` when dropped.
pub struct Unique<T: ?Sized, D: Deleter<T> = DefaultDelete> {
    ptr: Option<NonNull<T>>,
    deleter: D,
}

unsafe impl<T: ?Sized + Send, D: Deleter<T>> Send for Unique<T, D> {}

unsafe impl<T: ?Sized + Sync, D: Deleter<T>> Sync for Unique<T, D> {}

impl<T> Unique<T> {
    pub fn new(value: T) -> Unique<T> {
        Unique::from_box(Box::new(value))
    }
}

impl<T: ?Sized> Unique<T> {
    pub fn from_box(value: Box<T>) -> Unique<T> {
        Unique {
            ptr: Some(NonNull::from(Box::leak(value))),
            deleter: DefaultDelete,
        }
    }

    /// # Safety
    ///
    /// `ptr` must come from `Box::into_raw` and must not be owned elsewhere.
    pub unsafe fn from_raw(ptr: NonNull<T>) -> Unique<T> {
        Unique {
            ptr: Some(ptr),
            deleter: DefaultDelete,
        }
    }
}

impl<T: ?Sized, D: Deleter<T>> Unique<T, D> {
    /// # Safety
    ///
    /// `ptr` must be live, not owned elsewhere, and releasable by `deleter`.
    pub unsafe fn from_raw_with_deleter(ptr: NonNull<T>, deleter: D) -> Unique<T, D> {
        Unique {
            ptr: Some(ptr),
            deleter,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ptr.is_none()
    }

    pub fn as_ptr(&self) -> Option<NonNull<T>> {
        self.ptr
    }

    pub fn get(&self) -> Option<&T> {
        // Safety: we own the payload for as long as `self` is borrowed.
        self.ptr.map(|p| unsafe { &*p.as_ptr() })
    }

    pub fn get_mut(&mut self) -> Option<&mut T> {
        // Safety: exclusive ownership plus a unique borrow of `self`.
        self.ptr.map(|p| unsafe { &mut *p.as_ptr() })
    }

    pub fn deleter(&self) -> &D {
        &self.deleter
    }

    /// Gives up ownership without releasing the payload.
    pub fn into_raw_parts(self) -> (Option<NonNull<T>>, D) {
        let this = ManuallyDrop::new(self);
        // Safety: `this` is never dropped, so the deleter is moved out exactly once.
        let deleter = unsafe { std::ptr::read(&this.deleter) };
        (this.ptr, deleter)
    }

    /// Releases the current payload, if any, leaving the handle empty.
    pub fn reset(&mut self) {
        if let Some(ptr) = self.ptr.take() {
            // Safety: the pointer was owned by this handle and is now forgotten.
            unsafe { self.deleter.delete(ptr) };
        }
    }
}

impl<T: ?Sized, D: Deleter<T> + Default> Default for Unique<T, D> {
    fn default() -> Self {
        Unique {
            ptr: None,
            deleter: D::default(),
        }
    }
}

impl<T: ?Sized, D: Deleter<T>> Deref for Unique<T, D> {
    type Target = T;

    fn deref(&self) -> &T {
        match self.get() {
            Some(value) => value,
            None => panic!("dereferenced an empty Unique"),
        }
    }
}

impl<T: ?Sized, D: Deleter<T>> DerefMut for Unique<T, D> {
    fn deref_mut(&mut self) -> &mut T {
        match self.get_mut() {
            Some(value) => value,
            None => panic!("dereferenced an empty Unique"),
        }
    }
}

impl<T: ?Sized, D: Deleter<T>> Drop for Unique<T, D> {
    fn drop(&mut self) {
        self.reset();
    }
}

impl<T: ?Sized + fmt::Debug, D: Deleter<T>> fmt::Debug for Unique<T, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(value) => f.debug_tuple("Unique").field(&value).finish(),
            None => f.write_str("Unique(<empty>)"),
        }
    }
}
