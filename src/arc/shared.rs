use std::any::{type_name, TypeId};
use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::ops::Deref;
use std::ptr::NonNull;

use log::trace;

use crate::arc::control_block::{self, BlockHeader, Link, PointerBlock};
use crate::arc::shared_from_this::EnableSharedFromThis;
use crate::arc::weak::Weak;
use crate::deleter::delete::{DefaultDelete, Deleter};
use crate::error::Error;
use crate::unique::unique::Unique;

/// Shared owner of a payload. The payload is released when the last
/// `Shared` pointing at it goes away.
///
/// Like `std::sync::Arc`, most operations are associated functions
/// (`Shared::use_count(&x)`) so they never shadow methods of the payload.
pub struct Shared<T: ?Sized> {
    link: Option<Link<T>>,
    _marker: PhantomData<T>,
}

unsafe impl<T: ?Sized + Send + Sync> Send for Shared<T> {}

unsafe impl<T: ?Sized + Send + Sync> Sync for Shared<T> {}

impl<T> Shared<T> {
    /// Boxes `value` and puts it under a separately allocated control block.
    /// See [`make_shared`](crate::make_shared) for the single allocation path.
    ///
    /// A [`SharedFromThis`](crate::SharedFromThis) anchor in `value` is left
    /// unset; use [`Shared::new_enabled`] to wire it.
    pub fn new(value: T) -> Shared<T> {
        Shared::from_box(Box::new(value))
    }
}

impl<T: ?Sized> Shared<T> {
    pub const fn empty() -> Shared<T> {
        Shared {
            link: None,
            _marker: PhantomData,
        }
    }

    /// Does not wire a [`SharedFromThis`](crate::SharedFromThis) anchor; see
    /// [`Shared::from_box_enabled`].
    pub fn from_box(value: Box<T>) -> Shared<T> {
        Shared::from(Unique::from_box(value))
    }

    /// Does not wire a [`SharedFromThis`](crate::SharedFromThis) anchor; see
    /// [`Shared::from_raw_enabled_with_deleter`].
    ///
    /// # Safety
    ///
    /// `ptr` must come from `Box::into_raw` and must not be owned elsewhere.
    pub unsafe fn from_raw(ptr: NonNull<T>) -> Shared<T> {
        unsafe { Shared::from_raw_with_deleter(ptr, DefaultDelete) }
    }

    /// Takes ownership of `ptr`. If no control block can be allocated the
    /// payload is released right away and the returned handle is empty.
    /// A `SharedFromThis` anchor in the payload is left unset.
    ///
    /// # Safety
    ///
    /// `ptr` must be live, not owned elsewhere, and releasable by `deleter`.
    pub unsafe fn from_raw_with_deleter<D: Deleter<T>>(ptr: NonNull<T>, deleter: D) -> Shared<T> {
        unsafe { Shared::try_from_raw_with_deleter(ptr, deleter) }.unwrap_or_default()
    }

    /// Like [`Shared::from_raw_with_deleter`], but reports allocation failure.
    /// The payload has been released when an error is returned.
    ///
    /// # Safety
    ///
    /// Same as [`Shared::from_raw_with_deleter`].
    pub unsafe fn try_from_raw_with_deleter<D: Deleter<T>>(
        ptr: NonNull<T>,
        deleter: D,
    ) -> Result<Shared<T>, Error> {
        Shared::try_from_unique(unsafe { Unique::from_raw_with_deleter(ptr, deleter) })
    }

    fn try_from_unique<D: Deleter<T>>(hold: Unique<T, D>) -> Result<Shared<T>, Error> {
        let Some(ptr) = hold.as_ptr() else {
            return Ok(Shared::empty());
        };
        // `hold` still owns the payload here and releases it if this fails.
        let block = control_block::allocate::<PointerBlock<T, D>>()?;
        let (_, deleter) = hold.into_raw_parts();
        unsafe { block.as_ptr().write(PointerBlock::new(ptr, deleter)) };
        trace!("created control block for {}", type_name::<T>());
        Ok(unsafe {
            Shared::from_link(Link {
                ptr,
                block: block.cast(),
            })
        })
    }

    /// Wraps a link whose strong reference has already been accounted for.
    pub(crate) unsafe fn from_link(link: Link<T>) -> Shared<T> {
        Shared {
            link: Some(link),
            _marker: PhantomData,
        }
    }

    pub fn is_empty(this: &Self) -> bool {
        this.link.is_none()
    }

    pub fn get(this: &Self) -> Option<&T> {
        // Safety: our strong reference keeps the payload alive.
        this.link.map(|link| unsafe { &*link.ptr.as_ptr() })
    }

    pub fn as_ptr(this: &Self) -> Option<NonNull<T>> {
        this.link.map(|link| link.ptr)
    }

    /// Number of `Shared`s owning the payload, zero for an empty handle.
    pub fn use_count(this: &Self) -> usize {
        this.link.map_or(0, |link| link.header().use_count())
    }

    /// Number of `Weak`s observing the payload.
    pub fn weak_count(this: &Self) -> usize {
        this.link.map_or(0, |link| link.header().weak_count())
    }

    pub fn downgrade(this: &Self) -> Weak<T> {
        match this.link {
            Some(link) => {
                link.header().add_weak();
                unsafe { Weak::from_link(link) }
            }
            None => Weak::new(),
        }
    }

    /// Mutable access, available only when no other `Shared` or `Weak`
    /// refers to the payload.
    pub fn get_mut(this: &mut Self) -> Option<&mut T> {
        let link = this.link?;
        if !link.header().is_unique() {
            return None;
        }
        // Safety: nothing else can access the payload, since there is only
        // one handle of any kind, to which we have exclusive access.
        Some(unsafe { &mut *link.ptr.as_ptr() })
    }

    /// The deleter this handle was created with, if it is a `D`.
    pub fn get_deleter<D: 'static>(this: &Self) -> Option<&D> {
        let link = this.link?;
        let deleter = unsafe { BlockHeader::deleter(link.block, TypeId::of::<D>()) }?;
        // Safety: the block matched `D`'s type id, and it outlives our borrow.
        Some(unsafe { deleter.cast::<D>().as_ref() })
    }

    /// True if both handles share a control block, or are both empty.
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        this.link.map(|link| link.block) == other.link.map(|link| link.block)
    }

    pub fn swap(this: &mut Self, other: &mut Self) {
        mem::swap(&mut this.link, &mut other.link);
    }

    pub fn reset(this: &mut Self) {
        Shared::swap(this, &mut Shared::empty());
    }

    pub fn reset_box(this: &mut Self, value: Box<T>) {
        Shared::swap(this, &mut Shared::from_box(value));
    }

    /// # Safety
    ///
    /// Same as [`Shared::from_raw_with_deleter`].
    pub unsafe fn reset_raw_with_deleter<D: Deleter<T>>(this: &mut Self, ptr: NonNull<T>, deleter: D) {
        let mut replacement = unsafe { Shared::from_raw_with_deleter(ptr, deleter) };
        Shared::swap(this, &mut replacement);
    }
}

impl<T: EnableSharedFromThis> Shared<T> {
    /// Like [`Shared::new`], and lets the value hand out owners of itself.
    pub fn new_enabled(value: T) -> Shared<T> {
        Shared::enable_shared_from_this(Shared::new(value))
    }

    pub fn from_box_enabled(value: Box<T>) -> Shared<T> {
        Shared::enable_shared_from_this(Shared::from_box(value))
    }

    /// # Safety
    ///
    /// Same as [`Shared::from_raw_with_deleter`].
    pub unsafe fn from_raw_enabled_with_deleter<D: Deleter<T>>(
        ptr: NonNull<T>,
        deleter: D,
    ) -> Shared<T> {
        Shared::enable_shared_from_this(unsafe { Shared::from_raw_with_deleter(ptr, deleter) })
    }

    pub(crate) fn enable_shared_from_this(this: Shared<T>) -> Shared<T> {
        if let Some(value) = Shared::get(&this) {
            value.shared_anchor().install(&this);
        }
        this
    }
}

impl<T: ?Sized> Default for Shared<T> {
    fn default() -> Self {
        Shared::empty()
    }
}

impl<T: ?Sized> Clone for Shared<T> {
    fn clone(&self) -> Self {
        if let Some(link) = self.link {
            link.header().add_strong();
        }
        Shared {
            link: self.link,
            _marker: PhantomData,
        }
    }
}

impl<T: ?Sized> Drop for Shared<T> {
    fn drop(&mut self) {
        if let Some(link) = self.link.take() {
            unsafe { BlockHeader::release_strong(link.block) };
        }
    }
}

impl<T: ?Sized> Deref for Shared<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match Shared::get(self) {
            Some(value) => value,
            None => panic!("dereferenced an empty Shared"),
        }
    }
}

impl<T: ?Sized> From<Box<T>> for Shared<T> {
    fn from(value: Box<T>) -> Self {
        Shared::from_box(value)
    }
}

impl<T: ?Sized, D: Deleter<T>> From<Unique<T, D>> for Shared<T> {
    fn from(value: Unique<T, D>) -> Self {
        Shared::try_from_unique(value).unwrap_or_default()
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match Shared::get(self) {
            Some(value) => f.debug_tuple("Shared").field(&value).finish(),
            None => f.write_str("Shared(<empty>)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering::Relaxed;
    use std::sync::Arc;
    use std::thread;

    struct DetectDrop(Arc<AtomicUsize>);

    impl Drop for DetectDrop {
        fn drop(&mut self) {
            self.0.fetch_add(1, Relaxed);
        }
    }

    #[test]
    fn test() {
        let drops = Arc::new(AtomicUsize::new(0));
        // Create two Shareds sharing an object containing a string
        // and a DetectDrop, to detect when it's dropped.
        let x = Shared::new(("hello", DetectDrop(drops.clone())));
        let y = x.clone();
        assert_eq!(Shared::use_count(&y), 2);
        let t = thread::spawn(move || {
            assert_eq!(x.0, "hello");
        });
        assert_eq!(y.0, "hello");
        t.join().unwrap();
        // We still have y, so the object shouldn't have been dropped yet.
        assert_eq!(drops.load(Relaxed), 0);
        assert_eq!(Shared::use_count(&y), 1);
        drop(y);
        assert_eq!(drops.load(Relaxed), 1);
    }

    #[test]
    fn test_empty_handle() {
        let x: Shared<u32> = Shared::default();
        assert!(Shared::is_empty(&x));
        assert_eq!(Shared::use_count(&x), 0);
        assert_eq!(Shared::get(&x), None);
        assert!(Shared::downgrade(&x).expired());
        assert_eq!(format!("{x:?}"), "Shared(<empty>)");
    }

    #[test]
    #[should_panic]
    fn test_deref_empty_panics() {
        let x: Shared<u32> = Shared::empty();
        let _ = *x;
    }

    #[test]
    fn test_move_leaves_single_owner() {
        let drops = Arc::new(AtomicUsize::new(0));
        let mut x = Shared::new(DetectDrop(drops.clone()));
        let y = mem::take(&mut x);
        assert!(Shared::is_empty(&x));
        assert_eq!(Shared::use_count(&y), 1);
        drop(x);
        assert_eq!(drops.load(Relaxed), 0);
        drop(y);
        assert_eq!(drops.load(Relaxed), 1);
    }

    #[test]
    fn test_reset_releases_old_payload() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let mut x = Shared::new(DetectDrop(first.clone()));
        let keep = x.clone();
        Shared::reset_box(&mut x, Box::new(DetectDrop(second.clone())));
        assert_eq!(first.load(Relaxed), 0);
        assert!(!Shared::ptr_eq(&x, &keep));
        drop(keep);
        assert_eq!(first.load(Relaxed), 1);
        Shared::reset(&mut x);
        assert_eq!(second.load(Relaxed), 1);
        assert!(Shared::is_empty(&x));
    }

    #[test]
    fn test_swap() {
        let mut a = Shared::new(1);
        let mut b = Shared::new(2);
        Shared::swap(&mut a, &mut b);
        assert_eq!((*a, *b), (2, 1));
    }

    #[derive(Debug)]
    struct CountingDeleter(Arc<AtomicUsize>);

    impl Deleter<u64> for CountingDeleter {
        unsafe fn delete(&mut self, ptr: NonNull<u64>) {
            self.0.fetch_add(1, Relaxed);
            drop(unsafe { Box::from_raw(ptr.as_ptr()) });
        }
    }

    #[test]
    fn test_custom_deleter_and_lookup() {
        let calls = Arc::new(AtomicUsize::new(0));
        let ptr = NonNull::from(Box::leak(Box::new(99u64)));
        let x = unsafe { Shared::from_raw_with_deleter(ptr, CountingDeleter(calls.clone())) };
        assert_eq!(*x, 99);
        let deleter = Shared::get_deleter::<CountingDeleter>(&x).unwrap();
        assert!(Arc::ptr_eq(&deleter.0, &calls));
        assert!(Shared::get_deleter::<DefaultDelete>(&x).is_none());
        let y = x.clone();
        drop(x);
        assert_eq!(calls.load(Relaxed), 0);
        drop(y);
        assert_eq!(calls.load(Relaxed), 1);
    }

    #[test]
    fn test_reset_with_raw_pointer_and_deleter() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut x = Shared::new(1u64);
        let ptr = NonNull::from(Box::leak(Box::new(2u64)));
        unsafe { Shared::reset_raw_with_deleter(&mut x, ptr, CountingDeleter(calls.clone())) };
        assert_eq!(*x, 2);
        drop(x);
        assert_eq!(calls.load(Relaxed), 1);
    }

    #[test]
    fn test_array_payload() {
        let drops = Arc::new(AtomicUsize::new(0));
        let items: Box<[DetectDrop]> = (0..4).map(|_| DetectDrop(drops.clone())).collect();
        let x: Shared<[DetectDrop]> = Shared::from_box(items);
        let y = x.clone();
        assert_eq!(y.len(), 4);
        drop(x);
        drop(y);
        assert_eq!(drops.load(Relaxed), 4);
    }

    #[test]
    fn test_from_unique() {
        let drops = Arc::new(AtomicUsize::new(0));
        let x = Shared::from(Unique::new(DetectDrop(drops.clone())));
        assert_eq!(Shared::use_count(&x), 1);
        drop(x);
        assert_eq!(drops.load(Relaxed), 1);
        let empty: Shared<u8> = Shared::from(Unique::<u8>::default());
        assert!(Shared::is_empty(&empty));
    }

    #[test]
    fn test_get_mut() {
        let mut x = Shared::new(String::from("deep"));
        Shared::get_mut(&mut x).unwrap().push_str("rain");
        assert_eq!(x.as_str(), "deeprain");
        let y = x.clone();
        assert!(Shared::get_mut(&mut x).is_none());
        drop(y);
        let w = Shared::downgrade(&x);
        assert!(Shared::get_mut(&mut x).is_none());
        drop(w);
        assert!(Shared::get_mut(&mut x).is_some());
    }

    #[test]
    fn test_weak_count() {
        let x = Shared::new(5);
        assert_eq!(Shared::weak_count(&x), 0);
        let w1 = Shared::downgrade(&x);
        let w2 = w1.clone();
        assert_eq!(Shared::weak_count(&x), 2);
        drop((w1, w2));
        assert_eq!(Shared::weak_count(&x), 0);
    }
}
