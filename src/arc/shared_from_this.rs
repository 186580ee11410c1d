use std::fmt;
use std::sync::OnceLock;

use log::trace;

use crate::arc::shared::Shared;
use crate::arc::weak::Weak;
use crate::error::Error;

/// Back-reference a payload embeds to find the `Shared` that owns it.
///
/// It stays unset until the payload is first wrapped by one of the `*_enabled`
/// constructors, and is set at most once. Cloning yields an unset anchor: the
/// back-reference belongs to the object, not to its value.
pub struct SharedFromThis<T> {
    weak_this: OnceLock<Weak<T>>,
}

impl<T> SharedFromThis<T> {
    pub const fn new() -> SharedFromThis<T> {
        SharedFromThis {
            weak_this: OnceLock::new(),
        }
    }

    pub fn is_installed(&self) -> bool {
        self.weak_this.get().is_some()
    }

    /// Only the shared construction paths call this.
    pub(crate) fn install(&self, owner: &Shared<T>) {
        if self.weak_this.set(Shared::downgrade(owner)).is_ok() {
            trace!("installed shared-from-this back-reference");
        }
    }

    fn lock(&self) -> Shared<T> {
        self.weak_this.get().map(Weak::lock).unwrap_or_default()
    }

    fn try_lock(&self) -> Result<Shared<T>, Error> {
        let weak = self.weak_this.get().ok_or(Error::NotShared)?;
        weak.upgrade().ok_or(Error::Expired)
    }

    fn weak(&self) -> Weak<T> {
        self.weak_this.get().cloned().unwrap_or_default()
    }
}

impl<T> Default for SharedFromThis<T> {
    fn default() -> Self {
        SharedFromThis::new()
    }
}

impl<T> Clone for SharedFromThis<T> {
    fn clone(&self) -> Self {
        SharedFromThis::new()
    }
}

impl<T> fmt::Debug for SharedFromThis<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedFromThis")
            .field("installed", &self.is_installed())
            .finish()
    }
}

/// Implemented by payloads that can hand out owning handles to themselves.
pub trait EnableSharedFromThis: Sized {
    fn shared_anchor(&self) -> &SharedFromThis<Self>;

    /// A new owner of `self`, or an empty handle if `self` is not (or no
    /// longer) owned by any `Shared`.
    fn shared_from_this(&self) -> Shared<Self> {
        self.shared_anchor().lock()
    }

    fn try_shared_from_this(&self) -> Result<Shared<Self>, Error> {
        self.shared_anchor().try_lock()
    }

    fn weak_from_this(&self) -> Weak<Self> {
        self.shared_anchor().weak()
    }
}
