//! Cross-process call-tree buffer
//!
//! A single anonymous `MAP_SHARED` mapping records, per instrumented
//! function, the order of its first visit and the function that called it.
//! The child writes through the probe callbacks while running a test; the
//! parent reads the slots back after reaping the child. Ownership of the
//! buffer hands over at the process boundary, so no locking is involved.
//!
//! Layout, in u64 words:
//!
//! ```text
//! [0] visit counter        [1] current parent
//! [2] root sentinel slot   [2 + id] slot for function `id`
//! ```
//!
//! Each slot packs `first_visit_order` in the low 32 bits and the parent's
//! function id in the high 32 bits; an all-zero slot means "not visited".

use std::cell::UnsafeCell;
use std::ffi::c_void;
use std::num::NonZeroUsize;
use std::ptr::NonNull;

use nix::sys::mman::{mmap_anonymous, munmap, MapFlags, ProtFlags};
use thiserror::Error;

/// Driver-assigned function identifier; 0 is the synthetic root
pub type FunctionId = u64;

/// External symbol instrumented code calls on function entry
pub const ENTER_FUNCTION_SYMBOL: &str = "mutiny_enter_function";

/// External symbol instrumented code calls before returning
pub const LEAVE_FUNCTION_SYMBOL: &str = "mutiny_leave_function";

const HEADER_WORDS: usize = 2;
const WORD: usize = std::mem::size_of::<u64>();

/// Errors establishing the shared buffer
#[derive(Debug, Error)]
pub enum BufferError {
    /// The kernel refused the mapping
    #[error("cannot map shared call-tree buffer: {0}")]
    Map(nix::Error),
}

/// A visited slot, unpacked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisitSlot {
    /// 1-based first-visit order
    pub order: u32,

    /// Function id of the caller at first visit; 0 for roots
    pub parent: u32,
}

/// The shared memory region backing call-tree capture
///
/// Must outlive every `CallTreeProbe` created over it and every child
/// process still running instrumented code.
#[derive(Debug)]
pub struct SharedMapping {
    base: NonNull<c_void>,
    slots: usize,
}

impl SharedMapping {
    /// Map a buffer sized for `function_count` instrumented functions
    pub fn new(function_count: usize) -> Result<Self, BufferError> {
        // Slot 0 is the root sentinel, hence the extra slot.
        let slots = function_count + 1;
        let bytes = (HEADER_WORDS + slots) * WORD;
        let length = NonZeroUsize::new(bytes).expect("buffer size is never zero");

        let base = unsafe {
            mmap_anonymous(
                None,
                length,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED | MapFlags::MAP_ANONYMOUS,
            )
        }
        .map_err(BufferError::Map)?;

        let mapping = Self { base, slots };
        mapping.reset();
        Ok(mapping)
    }

    fn words(&self) -> usize {
        HEADER_WORDS + self.slots
    }

    fn word_ptr(&self, index: usize) -> *mut u64 {
        debug_assert!(index < self.words());
        unsafe { self.base.as_ptr().cast::<u64>().add(index) }
    }

    /// Number of slots, including the root sentinel
    #[must_use]
    pub fn slots(&self) -> usize {
        self.slots
    }

    /// Raw base pointer, for probe construction
    #[must_use]
    pub(crate) fn base_ptr(&self) -> *mut u64 {
        self.base.as_ptr().cast()
    }

    /// Zero the header and every slot
    pub fn reset(&self) {
        for index in 0..self.words() {
            unsafe { self.word_ptr(index).write(0) };
        }
    }

    /// Total number of first visits recorded
    #[must_use]
    pub fn visit_count(&self) -> u64 {
        unsafe { self.word_ptr(0).read() }
    }

    /// Read a slot; `None` if the function was never visited
    #[must_use]
    pub fn slot(&self, id: FunctionId) -> Option<VisitSlot> {
        if id == 0 || id as usize >= self.slots {
            return None;
        }
        let word = unsafe { self.word_ptr(HEADER_WORDS + id as usize).read() };
        if word == 0 {
            return None;
        }
        Some(VisitSlot {
            order: (word & 0xFFFF_FFFF) as u32,
            parent: (word >> 32) as u32,
        })
    }
}

impl Drop for SharedMapping {
    fn drop(&mut self) {
        let bytes = self.words() * WORD;
        // The driver tears the mapping down last, after every child has
        // been reaped.
        let _ = unsafe { munmap(self.base, bytes) };
    }
}

/// The context whose address instrumentation inlines into generated code
///
/// `#[repr(C)]` and heap-pinned: the probe must not move once its address
/// has been baked into an instrumented module. The visit stack lives in the
/// process running the test (the forked child inherits an empty one), while
/// slot writes land in the shared mapping.
#[repr(C)]
pub struct CallTreeProbe {
    base: *mut u64,
    slots: usize,
    stack: UnsafeCell<Vec<FunctionId>>,
}

impl CallTreeProbe {
    /// Create a probe over the mapping
    ///
    /// The returned box must outlive all instrumented code built against
    /// its address, and `mapping` must outlive the probe.
    #[must_use]
    pub fn new(mapping: &SharedMapping) -> Box<Self> {
        Box::new(Self {
            base: mapping.base_ptr(),
            slots: mapping.slots(),
            stack: UnsafeCell::new(Vec::new()),
        })
    }

    /// The address instrumentation embeds as a pointer constant
    #[must_use]
    pub fn addr(&self) -> u64 {
        std::ptr::from_ref(self) as u64
    }

    /// Clear the visit stack; paired with `SharedMapping::reset` between runs
    pub fn reset(&self) {
        unsafe { (*self.stack.get()).clear() };
    }

    unsafe fn enter(&self, id: FunctionId) {
        if id == 0 || id as usize >= self.slots {
            return;
        }
        let stack = &mut *self.stack.get();
        let slot = self.base.add(HEADER_WORDS + id as usize);
        if slot.read() == 0 {
            let counter = self.base;
            counter.write(counter.read() + 1);
            let order = counter.read() as u32;
            let parent = stack.last().copied().unwrap_or(0) as u32;
            slot.write(u64::from(order) | (u64::from(parent) << 32));
        }
        stack.push(id);
        self.base.add(1).write(id);
    }

    unsafe fn leave(&self, id: FunctionId) {
        let stack = &mut *self.stack.get();
        if stack.last() == Some(&id) {
            stack.pop();
        } else {
            // Unbalanced leave: unwind to the matching enter if present.
            while let Some(top) = stack.pop() {
                if top == id {
                    break;
                }
            }
        }
        self.base.add(1).write(stack.last().copied().unwrap_or(0));
    }
}

/// Entry callback invoked by instrumented code
///
/// # Safety
/// `ctx` must be the address of a live `CallTreeProbe` whose mapping is
/// still mapped.
pub unsafe extern "C" fn mutiny_enter_function(ctx: u64, id: u64) {
    let probe = ctx as *const CallTreeProbe;
    (*probe).enter(id);
}

/// Leave callback invoked by instrumented code
///
/// # Safety
/// Same contract as [`mutiny_enter_function`].
pub unsafe extern "C" fn mutiny_leave_function(ctx: u64, id: u64) {
    let probe = ctx as *const CallTreeProbe;
    (*probe).leave(id);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn visit(probe: &CallTreeProbe, id: FunctionId) {
        unsafe { mutiny_enter_function(probe.addr(), id) };
    }

    fn depart(probe: &CallTreeProbe, id: FunctionId) {
        unsafe { mutiny_leave_function(probe.addr(), id) };
    }

    #[test]
    fn records_first_visits_with_parents() {
        let mapping = SharedMapping::new(4).unwrap();
        let probe = CallTreeProbe::new(&mapping);

        // test(1) calls a(2); a calls b(3); then test calls c(4).
        visit(&probe, 1);
        visit(&probe, 2);
        visit(&probe, 3);
        depart(&probe, 3);
        depart(&probe, 2);
        visit(&probe, 4);
        depart(&probe, 4);
        depart(&probe, 1);

        assert_eq!(mapping.visit_count(), 4);
        assert_eq!(mapping.slot(1), Some(VisitSlot { order: 1, parent: 0 }));
        assert_eq!(mapping.slot(2), Some(VisitSlot { order: 2, parent: 1 }));
        assert_eq!(mapping.slot(3), Some(VisitSlot { order: 3, parent: 2 }));
        assert_eq!(mapping.slot(4), Some(VisitSlot { order: 4, parent: 1 }));
    }

    #[test]
    fn repeat_visits_keep_the_first_slot() {
        let mapping = SharedMapping::new(2).unwrap();
        let probe = CallTreeProbe::new(&mapping);

        visit(&probe, 1);
        visit(&probe, 2);
        depart(&probe, 2);
        visit(&probe, 2);
        depart(&probe, 2);
        depart(&probe, 1);

        assert_eq!(mapping.visit_count(), 2);
        assert_eq!(mapping.slot(2), Some(VisitSlot { order: 2, parent: 1 }));
    }

    #[test]
    fn recursion_records_a_single_node() {
        let mapping = SharedMapping::new(2).unwrap();
        let probe = CallTreeProbe::new(&mapping);

        visit(&probe, 1);
        visit(&probe, 2);
        visit(&probe, 2);
        visit(&probe, 2);
        depart(&probe, 2);
        depart(&probe, 2);
        depart(&probe, 2);
        depart(&probe, 1);

        assert_eq!(mapping.visit_count(), 2);
        assert_eq!(mapping.slot(2), Some(VisitSlot { order: 2, parent: 1 }));
    }

    #[test]
    fn reset_clears_everything() {
        let mapping = SharedMapping::new(2).unwrap();
        let probe = CallTreeProbe::new(&mapping);

        visit(&probe, 1);
        visit(&probe, 2);
        mapping.reset();
        probe.reset();

        assert_eq!(mapping.visit_count(), 0);
        assert_eq!(mapping.slot(1), None);
        assert_eq!(mapping.slot(2), None);
    }

    #[test]
    fn out_of_range_ids_are_ignored() {
        let mapping = SharedMapping::new(1).unwrap();
        let probe = CallTreeProbe::new(&mapping);

        visit(&probe, 0);
        visit(&probe, 99);

        assert_eq!(mapping.visit_count(), 0);
    }
}
