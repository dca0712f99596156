//! Ordered hand-off queue between the network receiver and the decoder
//! driver.
//!
//! Strict FIFO: the sender's transmission order is presumed to be
//! decode order and is never changed here. The head entry may be
//! partially consumed across several feed attempts when a unit spans
//! multiple decoder input buffers; it is removed only once fully fed.

use std::collections::VecDeque;

use crate::nal::NalUnit;

pub struct PendingQueue {
    queue: VecDeque<NalUnit>,
    capacity: usize,
}

impl PendingQueue {
    /// `capacity` bounds the queue directly. The pool size already caps
    /// total outstanding units, but an explicit cap keeps a stalled
    /// decoder from pinning the entire pool here.
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a unit, or hand it back when the queue is at capacity so
    /// the caller can recycle it.
    pub fn push(&mut self, unit: NalUnit) -> Result<(), NalUnit> {
        if self.queue.len() >= self.capacity {
            return Err(unit);
        }
        self.queue.push_back(unit);
        Ok(())
    }

    pub fn peek(&self) -> Option<&NalUnit> {
        self.queue.front()
    }

    pub fn head_mut(&mut self) -> Option<&mut NalUnit> {
        self.queue.front_mut()
    }

    /// Pop the head. The caller must have fully consumed it.
    pub fn remove(&mut self) -> Option<NalUnit> {
        self.queue.pop_front()
    }

    /// Drain all entries; the caller recycles them to the pool.
    pub fn take_all(&mut self) -> VecDeque<NalUnit> {
        std::mem::take(&mut self.queue)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
