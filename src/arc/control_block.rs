use std::alloc::{self, Layout};
use std::any::{type_name, TypeId};
use std::cell::UnsafeCell;
use std::hint;
use std::mem::{ManuallyDrop, MaybeUninit};
use std::ptr::{self, NonNull};
use std::sync::atomic::Ordering::{Acquire, Relaxed, Release};
use std::sync::atomic::{fence, AtomicUsize};

use log::{trace, warn};

use crate::deleter::delete::Deleter;
use crate::error::Error;

/// Going above this many references aborts the process.
pub(crate) const MAX_REFCOUNT: usize = isize::MAX as usize;

/// Weak count value while `BlockHeader::is_unique` inspects the strong count.
const WEAK_LOCKED: usize = usize::MAX;

#[repr(C)]
pub(crate) struct StrongCount {
    /// Number of `Shared`s. Zero means the payload is gone for good.
    strong: AtomicUsize,
}

impl StrongCount {
    fn new() -> StrongCount {
        StrongCount {
            strong: AtomicUsize::new(1),
        }
    }

    fn add_strong(&self) {
        if self.strong.fetch_add(1, Relaxed) > MAX_REFCOUNT {
            std::process::abort();
        }
    }

    /// Returns true for the caller that took the count from one to zero.
    fn release_strong(&self) -> bool {
        if self.strong.fetch_sub(1, Release) == 1 {
            fence(Acquire);
            return true;
        }
        false
    }

    fn use_count(&self) -> usize {
        self.strong.load(Relaxed)
    }
}

pub(crate) struct BlockVTable {
    on_zero_strong: unsafe fn(NonNull<BlockHeader>),
    on_zero_weak: unsafe fn(NonNull<BlockHeader>),
    deleter: unsafe fn(NonNull<BlockHeader>, TypeId) -> Option<NonNull<()>>,
}

/// Type-erased prefix of every control block.
#[repr(C)]
pub(crate) struct BlockHeader {
    shared: StrongCount,
    /// Number of `Weak`s, plus one if there are any `Shared`s.
    weak: AtomicUsize,
    vtable: &'static BlockVTable,
}

impl BlockHeader {
    fn new(vtable: &'static BlockVTable) -> BlockHeader {
        BlockHeader {
            shared: StrongCount::new(),
            weak: AtomicUsize::new(1),
            vtable,
        }
    }

    pub(crate) fn add_strong(&self) {
        self.shared.add_strong();
    }

    /// Drops one strong reference. The last one destroys the payload and
    /// gives up the weak reference held on behalf of all strong ones.
    ///
    /// # Safety
    ///
    /// `this` must be a live block and the caller must own a strong reference.
    pub(crate) unsafe fn release_strong(this: NonNull<BlockHeader>) -> bool {
        let header = unsafe { this.as_ref() };
        if !header.shared.release_strong() {
            return false;
        }
        let vtable = header.vtable;
        unsafe {
            (vtable.on_zero_strong)(this);
            BlockHeader::release_weak(this);
        }
        true
    }

    /// Spins while `is_unique` holds the weak count locked. This is the only
    /// path that waits on another thread, and only `Shared::get_mut` locks.
    pub(crate) fn add_weak(&self) {
        let mut n = self.weak.load(Relaxed);
        loop {
            if n == WEAK_LOCKED {
                hint::spin_loop();
                n = self.weak.load(Relaxed);
                continue;
            }
            if n > MAX_REFCOUNT {
                std::process::abort();
            }
            // Acquire pairs with the Release store in `is_unique`.
            match self.weak.compare_exchange_weak(n, n + 1, Acquire, Relaxed) {
                Ok(_) => return,
                Err(e) => n = e,
            }
        }
    }

    /// # Safety
    ///
    /// `this` must be a live block and the caller must own a weak reference.
    /// The block may be freed by the time this returns.
    pub(crate) unsafe fn release_weak(this: NonNull<BlockHeader>) -> bool {
        let header = unsafe { this.as_ref() };
        if header.weak.fetch_sub(1, Release) != 1 {
            return false;
        }
        fence(Acquire);
        let vtable = header.vtable;
        unsafe { (vtable.on_zero_weak)(this) };
        true
    }

    /// Tries to take a new strong reference, failing once the payload is gone.
    pub(crate) fn try_lock(&self) -> bool {
        let strong = &self.shared.strong;
        let mut n = strong.load(Relaxed);
        loop {
            if n == 0 {
                return false;
            }
            if n > MAX_REFCOUNT {
                std::process::abort();
            }
            match strong.compare_exchange_weak(n, n + 1, Relaxed, Relaxed) {
                Ok(_) => return true,
                Err(e) => n = e,
            }
        }
    }

    pub(crate) fn use_count(&self) -> usize {
        self.shared.use_count()
    }

    /// Number of weak references, the implicit one of the strong owners excluded.
    pub(crate) fn weak_count(&self) -> usize {
        match self.weak.load(Relaxed) {
            WEAK_LOCKED => 0,
            n if self.use_count() > 0 => n - 1,
            n => n,
        }
    }

    /// True if the caller's strong reference is the only reference of any kind.
    pub(crate) fn is_unique(&self) -> bool {
        // Acquire matches `release_weak`'s Release decrement, to make sure any
        // upgraded pointers are visible in the next strong count load.
        if self
            .weak
            .compare_exchange(1, WEAK_LOCKED, Acquire, Relaxed)
            .is_err()
        {
            return false;
        }
        let unique = self.shared.strong.load(Relaxed) == 1;
        // Release matches the Acquire increment in `add_weak`.
        self.weak.store(1, Release);
        if unique {
            // Matches the Release decrement in `release_strong`.
            fence(Acquire);
        }
        unique
    }

    /// # Safety
    ///
    /// `this` must be a live block whose payload has not been released.
    pub(crate) unsafe fn deleter(this: NonNull<BlockHeader>, id: TypeId) -> Option<NonNull<()>> {
        let vtable = unsafe { this.as_ref() }.vtable;
        unsafe { (vtable.deleter)(this, id) }
    }
}

/// A concrete control block laid out with a `BlockHeader` first.
///
/// # Safety
///
/// Implementors must be `#[repr(C)]` with a `BlockHeader` as their first
/// field, built with `Self::VTABLE`, and allocated through [`allocate`].
pub(crate) unsafe trait ControlBlock: Sized {
    const VTABLE: &'static BlockVTable = &BlockVTable {
        on_zero_strong: erased_zero_strong::<Self>,
        on_zero_weak: erased_zero_weak::<Self>,
        deleter: erased_deleter::<Self>,
    };

    /// Releases the payload. Runs exactly once.
    unsafe fn on_zero_strong(this: NonNull<Self>);

    /// Frees the block itself. Runs exactly once, after `on_zero_strong`.
    unsafe fn on_zero_weak(this: NonNull<Self>) {
        trace!("freeing control block {}", type_name::<Self>());
        unsafe { alloc::dealloc(this.as_ptr().cast(), Layout::new::<Self>()) };
    }

    unsafe fn deleter(_this: NonNull<Self>, _id: TypeId) -> Option<NonNull<()>> {
        None
    }
}

unsafe fn erased_zero_strong<B: ControlBlock>(header: NonNull<BlockHeader>) {
    unsafe { B::on_zero_strong(header.cast()) }
}

unsafe fn erased_zero_weak<B: ControlBlock>(header: NonNull<BlockHeader>) {
    unsafe { B::on_zero_weak(header.cast()) }
}

unsafe fn erased_deleter<B: ControlBlock>(
    header: NonNull<BlockHeader>,
    id: TypeId,
) -> Option<NonNull<()>> {
    unsafe { B::deleter(header.cast(), id) }
}

/// Allocates uninitialized memory for a control block.
pub(crate) fn allocate<B: ControlBlock>() -> Result<NonNull<B>, Error> {
    let layout = Layout::new::<B>();
    // Safety: every block starts with a header, so the layout is never zero-sized.
    let raw = unsafe { alloc::alloc(layout) }.cast::<B>();
    NonNull::new(raw).ok_or_else(|| {
        warn!(
            "could not allocate {} ({} bytes)",
            type_name::<B>(),
            layout.size()
        );
        Error::allocation_failed(layout)
    })
}

/// Block for a payload that lives in its own allocation.
#[repr(C)]
pub(crate) struct PointerBlock<T: ?Sized, D> {
    header: BlockHeader,
    /// Taken out and dropped once the payload has been released.
    deleter: UnsafeCell<ManuallyDrop<D>>,
    ptr: NonNull<T>,
}

impl<T: ?Sized, D: Deleter<T>> PointerBlock<T, D> {
    pub(crate) fn new(ptr: NonNull<T>, deleter: D) -> PointerBlock<T, D> {
        PointerBlock {
            header: BlockHeader::new(<Self as ControlBlock>::VTABLE),
            deleter: UnsafeCell::new(ManuallyDrop::new(deleter)),
            ptr,
        }
    }
}

unsafe impl<T: ?Sized, D: Deleter<T>> ControlBlock for PointerBlock<T, D> {
    unsafe fn on_zero_strong(this: NonNull<Self>) {
        trace!("releasing {} through its deleter", type_name::<T>());
        let block = this.as_ptr();
        // Safety: the strong count is zero, so nothing else can reach the deleter.
        unsafe {
            let mut deleter = ManuallyDrop::take(&mut *(*block).deleter.get());
            deleter.delete((*block).ptr);
        }
    }

    unsafe fn deleter(this: NonNull<Self>, id: TypeId) -> Option<NonNull<()>> {
        if id != TypeId::of::<D>() {
            return None;
        }
        let deleter = unsafe { ptr::addr_of!((*this.as_ptr()).deleter) };
        // Safety: `UnsafeCell` and `ManuallyDrop` are both transparent over `D`.
        NonNull::new(UnsafeCell::raw_get(deleter).cast())
    }
}

/// Block that stores the payload inline, next to the counts.
#[repr(C)]
pub(crate) struct InPlaceBlock<T> {
    header: BlockHeader,
    value: UnsafeCell<MaybeUninit<T>>,
}

impl<T> InPlaceBlock<T> {
    pub(crate) fn new(value: T) -> InPlaceBlock<T> {
        InPlaceBlock {
            header: BlockHeader::new(<Self as ControlBlock>::VTABLE),
            value: UnsafeCell::new(MaybeUninit::new(value)),
        }
    }

    pub(crate) fn value_ptr(this: NonNull<Self>) -> NonNull<T> {
        let value = unsafe { ptr::addr_of!((*this.as_ptr()).value) };
        let raw = UnsafeCell::raw_get(value).cast::<T>();
        // Safety: a field of a non-null block is never null.
        unsafe { NonNull::new_unchecked(raw) }
    }
}

unsafe impl<T> ControlBlock for InPlaceBlock<T> {
    unsafe fn on_zero_strong(this: NonNull<Self>) {
        trace!("dropping in-place {}", type_name::<T>());
        // Safety: the value was initialized on creation and is dropped only here.
        unsafe { ptr::drop_in_place(InPlaceBlock::value_ptr(this).as_ptr()) };
    }
}

/// The two pointers every handle carries: the payload and its block.
pub(crate) struct Link<T: ?Sized> {
    pub(crate) ptr: NonNull<T>,
    pub(crate) block: NonNull<BlockHeader>,
}

impl<T: ?Sized> Clone for Link<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: ?Sized> Copy for Link<T> {}

impl<T: ?Sized> Link<T> {
    /// Safety: handles holding a link keep its block allocated.
    pub(crate) fn header(&self) -> &BlockHeader {
        unsafe { self.block.as_ref() }
    }
}
