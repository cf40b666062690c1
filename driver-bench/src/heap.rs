//! Heap accounting for the pure-Rust engine.
//!
//! Every allocation in the process goes through [`CountingAllocator`], which
//! forwards to the system allocator. While a recording is active it counts
//! the allocations and frees made under an [`Attribution`] guard, which the
//! engine adapters hold for the duration of each call into the engine.
//! Anything allocated by the engine and not released by the time the
//! recording ends is a leak.
//!
//! The bundled C library allocates through `malloc` directly and never
//! reaches this allocator.

use std::alloc::{GlobalAlloc, Layout, System};
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::audit::{AuditReport, MemoryAuditor};
use crate::error::DriverError;

#[global_allocator]
static GLOBAL: CountingAllocator = CountingAllocator;

static RECORDING: AtomicBool = AtomicBool::new(false);
static ALLOCATIONS: AtomicU64 = AtomicU64::new(0);
static FREES: AtomicU64 = AtomicU64::new(0);
static BYTES_ALLOCATED: AtomicU64 = AtomicU64::new(0);
static BYTES_FREED: AtomicU64 = AtomicU64::new(0);

thread_local! {
    // Must not allocate: it is read from inside the allocator.
    static ATTRIBUTED: Cell<bool> = const { Cell::new(false) };
}

fn attributed() -> bool {
    RECORDING.load(Ordering::Relaxed) && ATTRIBUTED.try_with(Cell::get).unwrap_or(false)
}

fn count_allocation(size: usize) {
    ALLOCATIONS.fetch_add(1, Ordering::Relaxed);
    BYTES_ALLOCATED.fetch_add(size as u64, Ordering::Relaxed);
}

fn count_free(size: usize) {
    FREES.fetch_add(1, Ordering::Relaxed);
    BYTES_FREED.fetch_add(size as u64, Ordering::Relaxed);
}

/// System allocator with attribution counters.
pub struct CountingAllocator;

unsafe impl GlobalAlloc for CountingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = System.alloc(layout);
        if !ptr.is_null() && attributed() {
            count_allocation(layout.size());
        }
        ptr
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = System.alloc_zeroed(layout);
        if !ptr.is_null() && attributed() {
            count_allocation(layout.size());
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        if attributed() {
            count_free(layout.size());
        }
        System.dealloc(ptr, layout)
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let new = System.realloc(ptr, layout, new_size);
        if !new.is_null() && attributed() {
            count_free(layout.size());
            count_allocation(new_size);
        }
        new
    }
}

/// Allocations on this thread count toward the recording until the guard is
/// dropped. Guards nest.
#[must_use = "attribution ends when the guard is dropped"]
pub struct Attribution {
    previous: bool,
}

pub fn attribute() -> Attribution {
    let previous = ATTRIBUTED.with(|a| a.replace(true));
    Attribution { previous }
}

impl Drop for Attribution {
    fn drop(&mut self) {
        let previous = self.previous;
        // Ignored during thread teardown.
        let _ = ATTRIBUTED.try_with(|a| a.set(previous));
    }
}

/// Totals of one recording.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapTotals {
    pub allocations: u64,
    pub frees: u64,
    pub bytes_allocated: u64,
    pub bytes_freed: u64,
}

/// Reset the counters and begin recording. Only one recording runs at a
/// time.
pub fn start_recording() -> Result<(), DriverError> {
    if RECORDING.load(Ordering::Acquire) {
        return Err(DriverError::Heap("a recording is already active"));
    }
    for counter in [&ALLOCATIONS, &FREES, &BYTES_ALLOCATED, &BYTES_FREED] {
        counter.store(0, Ordering::Relaxed);
    }
    RECORDING.store(true, Ordering::Release);
    Ok(())
}

pub fn stop_recording() -> Result<HeapTotals, DriverError> {
    if !RECORDING.swap(false, Ordering::AcqRel) {
        return Err(DriverError::Heap("no recording is active"));
    }
    Ok(HeapTotals {
        allocations: ALLOCATIONS.load(Ordering::Relaxed),
        frees: FREES.load(Ordering::Relaxed),
        bytes_allocated: BYTES_ALLOCATED.load(Ordering::Relaxed),
        bytes_freed: BYTES_FREED.load(Ordering::Relaxed),
    })
}

/// [`MemoryAuditor`] over the process-wide heap counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeapAuditor;

pub static HEAP_AUDITOR: HeapAuditor = HeapAuditor;

impl MemoryAuditor for HeapAuditor {
    fn start(&self) -> Result<(), DriverError> {
        start_recording()
    }

    fn report(&self) -> Result<AuditReport, DriverError> {
        let totals = stop_recording()?;
        Ok(AuditReport {
            allocations: totals.allocations,
            frees: totals.frees,
            bytes_allocated: totals.bytes_allocated,
            bytes_freed: totals.bytes_freed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::case_lock;
    use std::hint::black_box;

    #[test]
    fn only_attributed_allocations_are_counted() {
        let _serial = case_lock();
        start_recording().unwrap();
        let outside = black_box(vec![0u8; 64]);
        let inside = {
            let _heap = attribute();
            black_box(vec![1u8; 128])
        };
        drop(outside);
        {
            let _heap = attribute();
            drop(inside);
        }
        let totals = stop_recording().unwrap();

        assert_eq!(totals.allocations, 1);
        assert_eq!(totals.frees, 1);
        assert_eq!(totals.bytes_allocated, 128);
        assert_eq!(totals.bytes_freed, 128);
    }

    #[test]
    fn memory_kept_past_the_attribution_is_outstanding() {
        let _serial = case_lock();
        HEAP_AUDITOR.start().unwrap();
        let kept = {
            let _heap = attribute();
            black_box(Box::new([0u64; 4]))
        };
        let report = HEAP_AUDITOR.report().unwrap();
        drop(kept);

        assert!(!report.is_clean());
        assert_eq!(report.leaked_bytes(), 32);
    }

    #[test]
    fn guards_nest() {
        let outer = attribute();
        {
            let _inner = attribute();
        }
        assert!(ATTRIBUTED.with(Cell::get));
        drop(outer);
        assert!(!ATTRIBUTED.with(Cell::get));
    }

    #[test]
    fn recordings_do_not_overlap() {
        let _serial = case_lock();
        start_recording().unwrap();
        assert!(matches!(start_recording(), Err(DriverError::Heap(_))));
        stop_recording().unwrap();
        assert!(matches!(stop_recording(), Err(DriverError::Heap(_))));
    }
}
