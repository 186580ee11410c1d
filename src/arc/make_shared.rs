use std::any::type_name;

use log::trace;

use crate::arc::control_block::{self, InPlaceBlock, Link};
use crate::arc::shared::Shared;
use crate::arc::shared_from_this::EnableSharedFromThis;
use crate::error::Error;

/// Puts `value` and its control block in a single allocation.
///
/// The value is dropped in place when the last `Shared` goes away; the
/// allocation itself lives on until the last `Weak` is gone too. On
/// allocation failure `value` is dropped before the error is returned.
pub fn try_make_shared<T>(value: T) -> Result<Shared<T>, Error> {
    let block = control_block::allocate::<InPlaceBlock<T>>()?;
    unsafe { block.as_ptr().write(InPlaceBlock::new(value)) };
    trace!("created in-place control block for {}", type_name::<T>());
    let link = Link {
        ptr: InPlaceBlock::value_ptr(block),
        block: block.cast(),
    };
    // Safety: a fresh block starts with the one strong reference we hand out.
    Ok(unsafe { Shared::from_link(link) })
}

/// Like [`try_make_shared`], with an empty handle on allocation failure.
pub fn make_shared<T>(value: T) -> Shared<T> {
    try_make_shared(value).unwrap_or_default()
}

pub fn make_shared_default<T: Default>() -> Shared<T> {
    make_shared(T::default())
}

/// Like [`make_shared`], and lets the value hand out owners of itself.
pub fn make_shared_enabled<T: EnableSharedFromThis>(value: T) -> Shared<T> {
    Shared::enable_shared_from_this(make_shared(value))
}
