use std::alloc::{alloc, dealloc, Layout};
use std::mem;
use std::ptr::{self, NonNull};

// =============================================================================
// SLOT LAYOUT
// =============================================================================
//
// A task slot is one heap allocation:
//
//   +----------------+---------- ... ----------+
//   |   SlotHeader   |   payload (capacity B)  |
//   +----------------+---------- ... ----------+
//   0                PAYLOAD_OFFSET
//
// The header stores the payload capacity (so a recycled slot can be
// size-checked against a new request) and two monomorphized trampolines
// written when a concrete callable is emplaced: one that invokes and
// consumes the payload, one that drops it without invoking. There is no
// vtable and no fat pointer; the function pointers in the header are the
// entire type erasure.
//
// The payload area is 16-byte aligned, which covers every callable the
// compiler lays out normally. A callable demanding more alignment is
// boxed, and the slot stores the box; that costs a second allocation for
// such exotic payloads but keeps slot layout uniform so slots can be
// recycled across arbitrary task types.
//
// =============================================================================

/// Alignment of the payload area.
const SLOT_ALIGN: usize = 16;

/// Offset of the payload within the allocation: the header size rounded
/// up to the payload alignment.
pub(crate) const PAYLOAD_OFFSET: usize =
    (mem::size_of::<SlotHeader>() + SLOT_ALIGN - 1) & !(SLOT_ALIGN - 1);

#[repr(C)]
struct SlotHeader {
    /// Bytes of payload storage behind the header.
    capacity: usize,
    /// Invokes the payload in place and consumes it. `Some` while armed.
    invoke: Option<unsafe fn(*mut u8)>,
    /// Drops the payload in place without invoking it. `Some` while armed.
    discard: Option<unsafe fn(*mut u8)>,
}

/// One reusable task-carrier block.
///
/// A slot is either *armed* (a callable lives in the payload) or *empty*.
/// [`invoke`](Self::invoke) and [`cancel`](Self::cancel) both consume the
/// payload and leave the slot empty with its storage intact, which is the
/// state the slot pool recycles. Dropping a slot cancels it first, so an
/// armed slot can never leak its payload.
pub(crate) struct TaskSlot {
    ptr: NonNull<u8>,
}

// Safety: a slot is an owning pointer handed between threads as a unit;
// the payload is required to be Send at emplace time.
unsafe impl Send for TaskSlot {}

impl TaskSlot {
    /// Allocates an empty slot with the given payload capacity, or `None`
    /// if the allocator refuses.
    pub(crate) fn allocate(capacity: usize) -> Option<Self> {
        let layout = Self::layout(capacity)?;
        // SAFETY: the layout has nonzero size (the header alone is larger
        // than zero).
        let raw = unsafe { alloc(layout) };
        let ptr = NonNull::new(raw)?;

        // SAFETY: the allocation starts with space for a SlotHeader.
        unsafe {
            ptr.as_ptr().cast::<SlotHeader>().write(SlotHeader {
                capacity,
                invoke: None,
                discard: None,
            });
        }
        Some(Self { ptr })
    }

    fn layout(capacity: usize) -> Option<Layout> {
        let size = PAYLOAD_OFFSET.checked_add(capacity)?;
        Layout::from_size_align(size, SLOT_ALIGN).ok()
    }

    /// The payload capacity this allocation carries.
    pub(crate) fn capacity(&self) -> usize {
        self.header().capacity
    }

    /// Total allocation size, the quantity the reuse limit is checked
    /// against.
    pub(crate) fn total_size(&self) -> usize {
        PAYLOAD_OFFSET + self.capacity()
    }

    /// Returns `true` while a callable is stored in the payload.
    pub(crate) fn is_armed(&self) -> bool {
        self.header().invoke.is_some()
    }

    /// The payload capacity [`emplace`](Self::emplace) will need for this
    /// callable.
    pub(crate) fn required_capacity_of<F>(_task: &F) -> usize
    where
        F: FnOnce() + Send,
    {
        if mem::align_of::<F>() <= SLOT_ALIGN {
            mem::size_of::<F>()
        } else {
            mem::size_of::<Box<F>>()
        }
    }

    /// Moves a callable into the payload and arms the slot.
    ///
    /// # Panics
    ///
    /// Panics if the slot is already armed or too small; both are bugs in
    /// the calling pool code, not runtime conditions.
    pub(crate) fn emplace<F>(&mut self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        assert!(!self.is_armed(), "emplace into an armed slot");
        if mem::align_of::<F>() <= SLOT_ALIGN {
            // SAFETY: alignment was just checked; capacity is asserted
            // inside.
            unsafe { self.emplace_raw(task) }
        } else {
            // Over-aligned callable: store it boxed.
            // SAFETY: a Box is pointer-aligned, well under SLOT_ALIGN.
            unsafe { self.emplace_raw(Box::new(task)) }
        }
    }

    /// # Safety
    ///
    /// `F` must fit the payload area: `align_of::<F>() <= SLOT_ALIGN` and
    /// `size_of::<F>() <= self.capacity()`.
    unsafe fn emplace_raw<F>(&mut self, task: F)
    where
        F: FnOnce() + Send,
    {
        assert!(
            mem::size_of::<F>() <= self.capacity(),
            "slot of {} bytes cannot carry a task of {} bytes",
            self.capacity(),
            mem::size_of::<F>()
        );
        debug_assert!(mem::align_of::<F>() <= SLOT_ALIGN);

        self.payload().cast::<F>().write(task);
        let header = self.header_mut();
        header.invoke = Some(invoke_trampoline::<F>);
        header.discard = Some(discard_trampoline::<F>);
    }

    /// Runs the stored callable, consuming it and disarming the slot.
    ///
    /// Does nothing if the slot is empty.
    pub(crate) fn invoke(&mut self) {
        let payload = self.payload();
        let header = self.header_mut();
        if let Some(run) = header.invoke.take() {
            header.discard = None;
            // SAFETY: the trampoline was monomorphized for the exact type
            // sitting in the payload, and taking it out of the header
            // guarantees single invocation.
            unsafe { run(payload) };
        }
    }

    /// Destroys the stored callable without running it, disarming the
    /// slot.
    ///
    /// Does nothing if the slot is empty.
    pub(crate) fn cancel(&mut self) {
        let payload = self.payload();
        let header = self.header_mut();
        if let Some(discard) = header.discard.take() {
            header.invoke = None;
            // SAFETY: same monomorphization argument as in `invoke`.
            unsafe { discard(payload) };
        }
    }

    fn header(&self) -> &SlotHeader {
        // SAFETY: the allocation begins with an initialized SlotHeader
        // and the slot owns it exclusively.
        unsafe { &*self.ptr.as_ptr().cast::<SlotHeader>() }
    }

    fn header_mut(&mut self) -> &mut SlotHeader {
        // SAFETY: as in `header`, plus &mut self for uniqueness.
        unsafe { &mut *self.ptr.as_ptr().cast::<SlotHeader>() }
    }

    fn payload(&self) -> *mut u8 {
        // SAFETY: PAYLOAD_OFFSET is within the allocation by construction.
        unsafe { self.ptr.as_ptr().add(PAYLOAD_OFFSET) }
    }
}

impl Drop for TaskSlot {
    fn drop(&mut self) {
        // An armed slot still carries its callable (and with it the
        // completion sender, whose drop breaks the promise).
        self.cancel();
        let layout = Self::layout(self.capacity())
            .unwrap_or_else(|| unreachable!("slot was allocated with this layout"));
        // SAFETY: the pointer came from `alloc` with exactly this layout.
        unsafe {
            dealloc(self.ptr.as_ptr(), layout);
        }
    }
}

/// Reads the callable out of the payload and runs it.
unsafe fn invoke_trampoline<F: FnOnce()>(payload: *mut u8) {
    let task = payload.cast::<F>().read();
    task();
}

/// Drops the callable in place without running it.
unsafe fn discard_trampoline<F>(payload: *mut u8) {
    ptr::drop_in_place(payload.cast::<F>());
}
