//! Fixed-capacity ring of time slices advanced by wall-clock interval

use crate::types::Millis;

/// A slot type that can be recycled when the ring moves into it.
pub trait TimeSlot: Default + Clone {
    /// Reset to the zero state and stamp the new slice start.
    fn reset(&mut self, start_ms: Millis);
}

/// Circular buffer of time-indexed slices.
///
/// Exactly one slot is current. Advancing moves the current index forward by one slot
/// per elapsed interval and zero-fills every slot it moves into, so skipped intervals
/// read as empty rather than stale.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSliceRing<T> {
    slots: Vec<T>,
    index: usize,
    interval_ms: u64,
    slice_start_ms: Millis,
}

impl<T: TimeSlot> TimeSliceRing<T> {
    /// Create a zeroed ring whose first slice starts at `start_ms`.
    pub fn new(capacity: usize, interval_ms: u64, start_ms: Millis) -> Self {
        let capacity = capacity.max(1);
        let mut slots = vec![T::default(); capacity];
        slots[0].reset(start_ms);
        Self { slots, index: 0, interval_ms: interval_ms.max(1), slice_start_ms: start_ms }
    }

    /// Rebuild a ring from decoded parts. `index` is wrapped into range.
    pub fn from_parts(slots: Vec<T>, index: usize, interval_ms: u64, start_ms: Millis) -> Self {
        let mut slots = slots;
        if slots.is_empty() {
            slots.push(T::default());
        }
        let index = index % slots.len();
        Self { slots, index, interval_ms: interval_ms.max(1), slice_start_ms: start_ms }
    }

    /// Number of whole intervals elapsed since the current slice started.
    pub fn due_steps(&self, now_ms: Millis) -> u64 {
        now_ms.checked_sub(self.slice_start_ms).map_or(0, |elapsed| elapsed / self.interval_ms)
    }

    /// Whether `advance_if_due(now_ms)` would move the index.
    pub fn will_advance(&self, now_ms: Millis) -> bool {
        self.due_steps(now_ms) > 0
    }

    /// Advance by `floor(elapsed / interval)` slots. Returns the number of slots moved.
    ///
    /// A timestamp older than the current slice start never advances.
    pub fn advance_if_due(&mut self, now_ms: Millis) -> u64 {
        let steps = self.due_steps(now_ms);
        if steps == 0 {
            return 0;
        }

        let capacity = self.slots.len();
        let new_start = self.slice_start_ms.saturating_add(steps.saturating_mul(self.interval_ms));
        let fill = steps.min(capacity as u64) as usize;
        let final_index = (self.index + (steps % capacity as u64) as usize) % capacity;

        // Walk backwards from the final slot so each refilled slot gets its own start.
        for back in 0..fill {
            let slot = (final_index + capacity - back) % capacity;
            let start = new_start.saturating_sub(back as u64 * self.interval_ms);
            self.slots[slot].reset(start);
        }

        self.index = final_index;
        self.slice_start_ms = new_start;
        steps
    }

    pub fn current(&self) -> &T {
        &self.slots[self.index]
    }

    pub fn current_mut(&mut self) -> &mut T {
        &mut self.slots[self.index]
    }

    /// Slot `offset` intervals before the current one. Offsets past the oldest slot
    /// clamp to the oldest.
    pub fn get(&self, offset: usize) -> &T {
        &self.slots[self.slot_index(offset)]
    }

    /// Mutable access used when the outgoing slice is closed.
    pub fn get_mut(&mut self, offset: usize) -> &mut T {
        let slot = self.slot_index(offset);
        &mut self.slots[slot]
    }

    /// Physical slot index of a relative offset.
    pub fn slot_index(&self, offset: usize) -> usize {
        let capacity = self.slots.len();
        let offset = offset.min(capacity - 1);
        (self.index + capacity - offset) % capacity
    }

    /// Up to `n` slices, newest first.
    pub fn iter_recent(&self, n: usize) -> impl Iterator<Item = &T> + '_ {
        (0..n.min(self.slots.len())).map(move |offset| self.get(offset))
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    pub fn slice_start_ms(&self) -> Millis {
        self.slice_start_ms
    }

    /// Slots in physical order.
    pub fn slots(&self) -> &[T] {
        &self.slots
    }
}
