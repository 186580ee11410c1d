use std::ptr::NonNull;

/// Knows how to release a payload once its last owner is gone.
///
/// Deleters are stored in control blocks that may be released from any
/// thread, and can be recovered by type later on, hence the bounds.
pub trait Deleter<T: ?Sized>: Send + Sync + 'static {
    /// Releases the payload behind `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live payload this deleter is able to release, and it
    /// must not be used again afterwards.
    unsafe fn delete(&mut self, ptr: NonNull<T>);
}

/// Releases payloads that were allocated through `Box`.
///
/// This covers single objects as well as arrays: a `Box<[E]>` turned into a
/// raw `[E]` pointer is released together with all of its elements.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DefaultDelete;

impl<T: ?Sized> Deleter<T> for DefaultDelete {
    unsafe fn delete(&mut self, ptr: NonNull<T>) {
        // Safety: the caller promises `ptr` came from `Box::into_raw`.
        drop(unsafe { Box::from_raw(ptr.as_ptr()) });
    }
}

impl<T: ?Sized, F> Deleter<T> for F
where
    F: FnMut(NonNull<T>) + Send + Sync + 'static,
{
    unsafe fn delete(&mut self, ptr: NonNull<T>) {
        self(ptr)
    }
}
