use std::fmt;
use std::mem;

use crate::arc::control_block::{BlockHeader, Link};
use crate::arc::shared::Shared;

/// Non-owning observer of a payload held by [`Shared`]s.
///
/// A `Weak` keeps the control block alive but not the payload, so it can
/// always tell whether the payload is gone. The payload can only be reached
/// through [`Weak::lock`] or [`Weak::upgrade`].
pub struct Weak<T: ?Sized> {
    link: Option<Link<T>>,
}

unsafe impl<T: ?Sized + Send + Sync> Send for Weak<T> {}

unsafe impl<T: ?Sized + Send + Sync> Sync for Weak<T> {}

impl<T: ?Sized> Weak<T> {
    /// A `Weak` that observes nothing. It is always expired.
    pub const fn new() -> Weak<T> {
        Weak { link: None }
    }

    /// Wraps a link whose weak reference has already been accounted for.
    pub(crate) unsafe fn from_link(link: Link<T>) -> Weak<T> {
        Weak { link: Some(link) }
    }

    /// Snapshot of the number of `Shared`s. May be stale as soon as it
    /// returns if other threads are cloning or dropping owners.
    pub fn use_count(&self) -> usize {
        self.link.map_or(0, |link| link.header().use_count())
    }

    /// Snapshot of whether the payload is gone; same caveat as `use_count`.
    pub fn expired(&self) -> bool {
        self.use_count() == 0
    }

    pub fn upgrade(&self) -> Option<Shared<T>> {
        let link = self.link?;
        if !link.header().try_lock() {
            return None;
        }
        // Safety: `try_lock` took the strong reference the new handle owns.
        Some(unsafe { Shared::from_link(link) })
    }

    /// Like [`Weak::upgrade`], with an empty `Shared` once the payload is gone.
    pub fn lock(&self) -> Shared<T> {
        self.upgrade().unwrap_or_default()
    }

    pub fn reset(&mut self) {
        self.swap(&mut Weak::new());
    }

    pub fn swap(&mut self, other: &mut Weak<T>) {
        mem::swap(&mut self.link, &mut other.link);
    }

    /// True if both observe the same control block, or nothing at all.
    pub fn ptr_eq(&self, other: &Weak<T>) -> bool {
        self.link.map(|link| link.block) == other.link.map(|link| link.block)
    }
}

impl<T: ?Sized> Default for Weak<T> {
    fn default() -> Self {
        Weak::new()
    }
}

impl<T: ?Sized> Clone for Weak<T> {
    fn clone(&self) -> Self {
        if let Some(link) = self.link {
            link.header().add_weak();
        }
        Weak { link: self.link }
    }
}

impl<T: ?Sized> Drop for Weak<T> {
    fn drop(&mut self) {
        if let Some(link) = self.link.take() {
            unsafe { BlockHeader::release_weak(link.block) };
        }
    }
}

impl<T: ?Sized> From<&Shared<T>> for Weak<T> {
    fn from(shared: &Shared<T>) -> Self {
        Shared::downgrade(shared)
    }
}

impl<T: ?Sized> fmt::Debug for Weak<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(Weak)")
    }
}
