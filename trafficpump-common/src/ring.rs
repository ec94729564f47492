//! Host-side bounded channel with the same reserve/commit discipline as the
//! kernel ring buffer.
//!
//! Slots live in a pool sized once at construction. Producers claim a
//! position with a CAS on `head` and never wait; when every slot between the
//! consumer and `head` is taken the reservation fails and is counted as a
//! drop. The single consumer delivers records strictly in reservation order,
//! stopping at the first slot that is reserved but not yet committed, and
//! silently recycles slots whose reservation was abandoned.

use std::{
    cell::UnsafeCell,
    sync::{
        Arc,
        atomic::{AtomicU8, AtomicU64, AtomicUsize, Ordering},
    },
};

use crate::{ConnectionEvent, EventChannel, EventSlot};

const EMPTY: u8 = 0;
const READY: u8 = 1;
const ABANDONED: u8 = 2;

struct Cell {
    state: AtomicU8,
    record: UnsafeCell<ConnectionEvent>,
}

struct Shared {
    cells: Box<[Cell]>,
    /// Next position to reserve.
    head: AtomicUsize,
    /// Next position to consume.
    tail: AtomicUsize,
    dropped: AtomicU64,
}

// SAFETY: a cell's record is written only by the producer holding the
// reservation for its position and read only by the consumer after observing
// READY (Release/Acquire on `state`).
unsafe impl Sync for Shared {}

impl Shared {
    fn cell(&self, position: usize) -> &Cell {
        &self.cells[position % self.cells.len()]
    }
}

/// Builds a channel holding as many whole records as fit in
/// `capacity_bytes` (at least one).
pub fn channel(capacity_bytes: usize) -> (Producer, Consumer) {
    let slots = (capacity_bytes / size_of::<ConnectionEvent>()).max(1);
    let cells = (0..slots)
        .map(|_| Cell {
            state: AtomicU8::new(EMPTY),
            record: UnsafeCell::new(ConnectionEvent::new()),
        })
        .collect();
    let shared = Arc::new(Shared {
        cells,
        head: AtomicUsize::new(0),
        tail: AtomicUsize::new(0),
        dropped: AtomicU64::new(0),
    });
    (
        Producer {
            shared: shared.clone(),
        },
        Consumer { shared },
    )
}

/// Producer side; cheap to clone, one per concurrent writer.
#[derive(Clone)]
pub struct Producer {
    shared: Arc<Shared>,
}

impl Producer {
    /// Number of records the channel can hold.
    pub fn capacity(&self) -> usize {
        self.shared.cells.len()
    }
}

impl EventChannel for Producer {
    type Slot<'a> = Slot<'a>;

    fn reserve(&self) -> Option<Slot<'_>> {
        let shared = &*self.shared;
        let mut head = shared.head.load(Ordering::Relaxed);
        loop {
            let tail = shared.tail.load(Ordering::Acquire);
            if head.wrapping_sub(tail) >= shared.cells.len() {
                shared.dropped.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            match shared.head.compare_exchange_weak(
                head,
                head.wrapping_add(1),
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(current) => head = current,
            }
        }
        Some(Slot {
            shared,
            position: head,
            committed: false,
        })
    }
}

/// A reserved position. Commit to publish, drop to abandon.
pub struct Slot<'a> {
    shared: &'a Shared,
    position: usize,
    committed: bool,
}

impl EventSlot for Slot<'_> {
    fn init(&mut self) -> &mut ConnectionEvent {
        // SAFETY: this slot holds the only reservation for `position`, and the
        // consumer does not touch the record until it reads READY.
        let record = unsafe { &mut *self.shared.cell(self.position).record.get() };
        *record = ConnectionEvent::new();
        record
    }

    fn commit(mut self) {
        self.committed = true;
        self.shared
            .cell(self.position)
            .state
            .store(READY, Ordering::Release);
    }
}

impl Drop for Slot<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.shared
                .cell(self.position)
                .state
                .store(ABANDONED, Ordering::Release);
        }
    }
}

/// The single consumer.
pub struct Consumer {
    shared: Arc<Shared>,
}

impl Consumer {
    /// Next committed record, or `None` if the channel is empty or the oldest
    /// reservation is still being filled.
    pub fn pop(&mut self) -> Option<ConnectionEvent> {
        let shared = &*self.shared;
        loop {
            let tail = shared.tail.load(Ordering::Relaxed);
            if tail == shared.head.load(Ordering::Acquire) {
                return None;
            }
            let cell = shared.cell(tail);
            let record = match cell.state.load(Ordering::Acquire) {
                // SAFETY: READY was stored with Release after the producer's
                // last write to the record.
                READY => Some(unsafe { *cell.record.get() }),
                ABANDONED => None,
                _ => return None,
            };
            cell.state.store(EMPTY, Ordering::Relaxed);
            shared.tail.store(tail.wrapping_add(1), Ordering::Release);
            if record.is_some() {
                return record;
            }
        }
    }

    /// Pops everything currently committed.
    pub fn drain(&mut self) -> Vec<ConnectionEvent> {
        std::iter::from_fn(|| self.pop()).collect()
    }

    /// Reservations refused because the channel was full.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}
