use std::alloc::Layout;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The payload has already been released when this is returned.
    #[error("failed to allocate a control block of {size} bytes (align {align})")]
    AllocationFailed { size: usize, align: usize },

    #[error("the observed object has already been destroyed")]
    Expired,

    #[error("the object is not owned by any shared handle yet")]
    NotShared,
}

impl Error {
    #[cold]
    pub(crate) fn allocation_failed(layout: Layout) -> Self {
        Error::AllocationFailed {
            size: layout.size(),
            align: layout.align(),
        }
    }
}
