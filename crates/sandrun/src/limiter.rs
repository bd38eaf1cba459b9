use std::{
    ptr,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use rquickjs::allocator::{Allocator, RustAllocator};

/// Guest heap accounting, shared between a runtime's allocator and the host.
#[derive(Debug)]
pub(crate) struct MemoryMeter {
    max_memory_hard: usize,
    current: AtomicUsize,
    exceeded: AtomicBool,
}

impl MemoryMeter {
    pub fn new(max_memory_hard: usize) -> Arc<Self> {
        Arc::new(Self {
            max_memory_hard,
            current: AtomicUsize::new(0),
            exceeded: AtomicBool::new(false),
        })
    }

    #[cfg(test)]
    pub fn current(&self) -> usize {
        self.current.load(Ordering::Relaxed)
    }

    /// Whether an allocation has been refused for crossing the ceiling.
    pub fn exceeded(&self) -> bool {
        self.exceeded.load(Ordering::Relaxed)
    }

    fn try_grow(&self, by: usize) -> bool {
        let grown = self
            .current
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                current
                    .checked_add(by)
                    .filter(|desired| *desired <= self.max_memory_hard)
            })
            .is_ok();
        if !grown {
            self.exceeded.store(true, Ordering::Relaxed);
        }
        grown
    }

    fn shrink(&self, by: usize) {
        self.current.fetch_sub(by, Ordering::Relaxed);
    }

    /// Replace a reservation of `reserved` bytes with the `actual` size of
    /// the allocation.
    fn settle(&self, reserved: usize, actual: usize) {
        if actual >= reserved {
            self.current.fetch_add(actual - reserved, Ordering::Relaxed);
        } else {
            self.shrink(reserved - actual);
        }
    }
}

/// QuickJS allocator that refuses to grow the heap past a [`MemoryMeter`]'s
/// ceiling. QuickJS turns a refused allocation into its own out-of-memory
/// exception, and the meter keeps a record the guest cannot touch.
pub(crate) struct MemoryLimiter {
    meter: Arc<MemoryMeter>,
}

impl MemoryLimiter {
    pub const fn new(meter: Arc<MemoryMeter>) -> Self {
        Self { meter }
    }

    fn reserve(&self, size: usize, alloc: impl FnOnce() -> *mut u8) -> *mut u8 {
        if !self.meter.try_grow(size) {
            return ptr::null_mut();
        }
        let allocated = alloc();
        if allocated.is_null() {
            self.meter.shrink(size);
        } else {
            self.meter
                .settle(size, unsafe { RustAllocator::usable_size(allocated) });
        }
        allocated
    }
}

unsafe impl Allocator for MemoryLimiter {
    fn alloc(&mut self, size: usize) -> *mut u8 {
        self.reserve(size, || RustAllocator.alloc(size))
    }

    fn calloc(&mut self, count: usize, size: usize) -> *mut u8 {
        let Some(total) = count.checked_mul(size) else {
            return ptr::null_mut();
        };
        self.reserve(total, || RustAllocator.calloc(count, size))
    }

    unsafe fn dealloc(&mut self, ptr: *mut u8) {
        unsafe {
            self.meter.shrink(RustAllocator::usable_size(ptr));
            RustAllocator.dealloc(ptr);
        }
    }

    unsafe fn realloc(&mut self, ptr: *mut u8, new_size: usize) -> *mut u8 {
        let old_size = unsafe { RustAllocator::usable_size(ptr) };
        let growth = new_size.saturating_sub(old_size);
        if !self.meter.try_grow(growth) {
            return ptr::null_mut();
        }
        let moved = unsafe { RustAllocator.realloc(ptr, new_size) };
        if moved.is_null() {
            self.meter.shrink(growth);
        } else {
            self.meter
                .settle(old_size + growth, unsafe { RustAllocator::usable_size(moved) });
        }
        moved
    }

    unsafe fn usable_size(ptr: *mut u8) -> usize {
        unsafe { RustAllocator::usable_size(ptr) }
    }
}
