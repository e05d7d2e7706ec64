//! Triple-buffered frame pool
//!
//! Three device-visible regions shared between the frame producer and the
//! commit worker. Each slot carries a pair of counting gates: `acquire`
//! credits flow producer → worker (a frame is ready to display), `retire`
//! credits flow worker → producer (the region is free to write again).
//! Every slot starts with one retire credit, so the producer gets one free
//! pass per slot before the worker's pace backpressures it.
//!
//! Slot lifecycle: Writable → Submitted → Displaying → Writable, one state
//! per credit handoff. The producer may legally resubmit a slot before its
//! previous retire credit lands (it runs up to a full pool ahead), which is
//! why the gates count instead of toggling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};

use crate::ion::{DeviceAllocator, DeviceBuffer};
use crate::{Error, Result};

/// Fixed pool depth: one slot written, one displayed, one in transition.
pub const NUM_BUFFERS: usize = 3;

/// Counting gate with a stop escape.
///
/// `wait` consumes one credit, blocking until one is available or the
/// stop flag is raised; `interrupt` pokes a parked waiter so it re-reads
/// the flag.
struct Gate {
    credits: Mutex<u32>,
    cond: Condvar,
}

impl Gate {
    fn new(initial: u32) -> Self {
        Self {
            credits: Mutex::new(initial),
            cond: Condvar::new(),
        }
    }

    fn signal(&self) {
        let mut credits = self.credits.lock().unwrap();
        *credits += 1;
        debug_assert!(*credits <= NUM_BUFFERS as u32);
        self.cond.notify_all();
    }

    fn wait(&self, stop: &AtomicBool) -> Result<()> {
        let mut credits = self.credits.lock().unwrap();
        loop {
            if stop.load(Ordering::Acquire) {
                return Err(Error::Stopped);
            }
            if *credits > 0 {
                *credits -= 1;
                return Ok(());
            }
            credits = self.cond.wait(credits).unwrap();
        }
    }

    fn interrupt(&self) {
        // Take the lock so a waiter between its flag check and its park
        // cannot miss the wakeup.
        let _credits = self.credits.lock().unwrap();
        self.cond.notify_all();
    }
}

/// One buffer of the ring: a device-visible region plus its gates.
pub struct Slot {
    buffer: Box<dyn DeviceBuffer>,
    acquire: Gate,
    retire: Gate,
}

impl Slot {
    fn new(buffer: Box<dyn DeviceBuffer>) -> Self {
        Self {
            buffer,
            acquire: Gate::new(0),
            retire: Gate::new(1),
        }
    }

    /// Producer side: hand the written frame to the worker.
    pub fn submit(&self) {
        self.acquire.signal();
    }

    /// Worker side: block until a frame is submitted on this slot.
    pub fn wait_submitted(&self, stop: &AtomicBool) -> Result<()> {
        self.acquire.wait(stop)
    }

    /// Worker side: return the region to the producer.
    pub fn retire(&self) {
        self.retire.signal();
    }

    /// Producer side: block until this slot's retire credit arrives.
    pub fn wait_retired(&self, stop: &AtomicBool) -> Result<()> {
        self.retire.wait(stop)
    }

    pub fn mapping(&self) -> *mut u8 {
        self.buffer.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.len() == 0
    }

    pub fn memory_id(&self) -> std::os::unix::io::RawFd {
        self.buffer.memory_id()
    }

    pub fn offset(&self) -> u32 {
        self.buffer.offset()
    }
}

/// The fixed ring of [`NUM_BUFFERS`] slots.
pub struct BufferPool {
    slots: Vec<Slot>,
}

impl BufferPool {
    /// Reserve all slots up front; a failure on any region releases the
    /// ones already acquired before returning.
    pub fn allocate(allocator: &dyn DeviceAllocator, frame_bytes: usize) -> Result<Self> {
        let mut slots = Vec::with_capacity(NUM_BUFFERS);
        for _ in 0..NUM_BUFFERS {
            // Earlier buffers drop (and release) if this one fails.
            slots.push(Slot::new(allocator.allocate(frame_bytes)?));
        }
        Ok(Self { slots })
    }

    pub fn slot(&self, index: usize) -> &Slot {
        &self.slots[index]
    }

    /// Wake every parked waiter so it observes the stop flag.
    pub fn interrupt_waiters(&self) {
        for slot in &self.slots {
            slot.acquire.interrupt();
            slot.retire.interrupt();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::HeapAllocator;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_initial_credits() {
        let stop = AtomicBool::new(false);
        let pool = BufferPool::allocate(&HeapAllocator::new(), 64).unwrap();
        // every slot starts with exactly one retire credit and no
        // acquire credit
        for i in 0..NUM_BUFFERS {
            assert!(pool.slot(i).wait_retired(&stop).is_ok());
        }
        let stopped = AtomicBool::new(true);
        assert!(matches!(
            pool.slot(0).wait_retired(&stopped),
            Err(Error::Stopped)
        ));
    }

    #[test]
    fn test_submit_wakes_waiter() {
        let pool = Arc::new(BufferPool::allocate(&HeapAllocator::new(), 64).unwrap());
        let stop = Arc::new(AtomicBool::new(false));

        let waiter = {
            let pool = Arc::clone(&pool);
            let stop = Arc::clone(&stop);
            thread::spawn(move || pool.slot(1).wait_submitted(&stop))
        };
        thread::sleep(Duration::from_millis(20));
        pool.slot(1).submit();
        assert!(waiter.join().unwrap().is_ok());
    }

    #[test]
    fn test_interrupt_unblocks_waiter() {
        let pool = Arc::new(BufferPool::allocate(&HeapAllocator::new(), 64).unwrap());
        let stop = Arc::new(AtomicBool::new(false));

        let waiter = {
            let pool = Arc::clone(&pool);
            let stop = Arc::clone(&stop);
            thread::spawn(move || pool.slot(0).wait_submitted(&stop))
        };
        thread::sleep(Duration::from_millis(20));
        stop.store(true, Ordering::Release);
        pool.interrupt_waiters();
        assert!(matches!(waiter.join().unwrap(), Err(Error::Stopped)));
    }

    #[test]
    fn test_credits_accumulate() {
        let stop = AtomicBool::new(false);
        let pool = BufferPool::allocate(&HeapAllocator::new(), 64).unwrap();
        let slot = pool.slot(2);
        // a retire on top of the initial credit buys two waits
        slot.retire();
        assert!(slot.wait_retired(&stop).is_ok());
        assert!(slot.wait_retired(&stop).is_ok());
    }

    #[test]
    fn test_distinct_regions() {
        let pool = BufferPool::allocate(&HeapAllocator::new(), 64).unwrap();
        let a = pool.slot(0).mapping();
        let b = pool.slot(1).mapping();
        let c = pool.slot(2).mapping();
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_ne!(a, c);
    }
}
