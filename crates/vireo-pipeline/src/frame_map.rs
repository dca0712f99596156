//! Timestamp-to-frame-identity correlation table.
//!
//! The hardware decoder echoes back the presentation timestamp we
//! queued with each input buffer; this table maps it to the sender's
//! frame index on the output side. It is a fixed-size array indexed by
//! the low bits of the timestamp: allocation-free, no rehashing, no
//! growth.
//!
//! Known trade-off: if more frames than there are slots are in flight
//! simultaneously, a newer entry overwrites an older one and the older
//! frame is reported as a correlation failure downstream. Timestamps
//! come from a monotonic microsecond clock, so within any realistic
//! in-flight window distinct timestamps land in distinct slots.

pub const DEFAULT_SLOTS: usize = 4096;

#[derive(Debug)]
pub struct FrameMap {
    slots: Box<[Option<(u64, u64)>]>,
    mask: u64,
}

impl FrameMap {
    /// `slots` must be a power of two.
    pub fn new(slots: usize) -> Self {
        assert!(slots.is_power_of_two(), "slot count must be a power of two");
        Self {
            slots: vec![None; slots].into_boxed_slice(),
            mask: (slots - 1) as u64,
        }
    }

    /// Record `timestamp_us -> frame_index`. Overwrites whatever the
    /// slot held.
    pub fn put(&mut self, timestamp_us: u64, frame_index: u64) {
        let slot = (timestamp_us & self.mask) as usize;
        self.slots[slot] = Some((timestamp_us, frame_index));
    }

    /// Look up and clear in one step, so a stale entry can never be
    /// returned twice.
    pub fn find(&mut self, timestamp_us: u64) -> Option<u64> {
        let slot = (timestamp_us & self.mask) as usize;
        match self.slots[slot].take() {
            Some((ts, frame_index)) if ts == timestamp_us => Some(frame_index),
            Some(other) => {
                // Different timestamp hashed here; put it back.
                self.slots[slot] = Some(other);
                None
            }
            None => None,
        }
    }

    pub fn clear(&mut self) {
        self.slots.fill(None);
    }
}

impl Default for FrameMap {
    fn default() -> Self {
        Self::new(DEFAULT_SLOTS)
    }
}
