//! Shared and exclusive ownership handles built on an atomically counted
//! control block.
//!
//! [`Shared`] owns its payload jointly with every clone, [`Weak`] observes it
//! without keeping it alive, and [`Unique`] owns it alone. Payloads that embed a
//! [`SharedFromThis`] anchor can hand out new owning handles to themselves once
//! they are first shared.

mod error;

mod deleter {
    pub mod delete;
}

mod unique {
    pub mod unique;
}

mod arc {
    pub(crate) mod control_block;
    pub mod make_shared;
    pub mod shared;
    pub mod shared_from_this;
    pub mod weak;
}

pub use arc::make_shared::{make_shared, make_shared_default, make_shared_enabled, try_make_shared};
pub use arc::shared::Shared;
pub use arc::shared_from_this::{EnableSharedFromThis, SharedFromThis};
pub use arc::weak::Weak;
pub use deleter::delete::{DefaultDelete, Deleter};
pub use error::Error;
pub use unique::unique::Unique;
