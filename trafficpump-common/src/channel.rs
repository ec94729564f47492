//! Two-phase delivery of [`ConnectionEvent`]s.
//!
//! A producer first reserves a slot, fills it, then commits it. There is no
//! single-shot push: a record only becomes visible through [`EventSlot::commit`],
//! so a consumer can never observe a half-written one.

use crate::ConnectionEvent;

/// Fixed-capacity, many-producer channel.
pub trait EventChannel {
    type Slot<'a>: EventSlot
    where
        Self: 'a;

    /// Claims space for one record. Never blocks; `None` means the channel is
    /// full and the record must be dropped.
    fn reserve(&self) -> Option<Self::Slot<'_>>;
}

/// A reserved, not yet visible record.
///
/// Dropping a slot without committing it abandons the reservation; the
/// channel reclaims the space and the consumer never sees it.
pub trait EventSlot {
    /// Resets the slot to [`ConnectionEvent::new`] and hands it out for
    /// population.
    fn init(&mut self) -> &mut ConnectionEvent;

    /// Publishes the record in FIFO order. Irreversible.
    fn commit(self);
}
