//! Shared fakes for driving the backend without hardware

use std::cell::UnsafeCell;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicI32, AtomicU32, AtomicUsize, Ordering};
use std::sync::{mpsc, Mutex};

use crate::fb::MdpDevice;
use crate::ffi::{MdpOverlay, MsmfbOverlayData};
use crate::ion::{DeviceAllocator, DeviceBuffer};
use crate::vsync::VsyncSource;
use crate::{Error, Result};

/// Every driver interaction the fake device records, in call order.
#[derive(Debug, Clone, Copy)]
pub enum DeviceCall {
    OverlaySet(MdpOverlay),
    OverlayUnset(u32),
    OverlayPlay {
        id: u32,
        memory_id: RawFd,
        offset: u32,
    },
    Commit {
        flags: u32,
    },
    Blank(bool),
}

/// Recording display device with per-operation failure injection. Each
/// `fail_*` counter fails that many upcoming calls (recorded first, then
/// failed).
pub struct FakeDevice {
    calls: Mutex<Vec<DeviceCall>>,
    next_id: AtomicU32,
    pub fail_sets: AtomicUsize,
    pub fail_unsets: AtomicUsize,
    pub fail_plays: AtomicUsize,
    pub fail_commits: AtomicUsize,
}

impl FakeDevice {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            next_id: AtomicU32::new(1),
            fail_sets: AtomicUsize::new(0),
            fail_unsets: AtomicUsize::new(0),
            fail_plays: AtomicUsize::new(0),
            fail_commits: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> Vec<DeviceCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: DeviceCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl MdpDevice for FakeDevice {
    fn overlay_set(&self, req: &mut MdpOverlay) -> Result<u32> {
        self.record(DeviceCall::OverlaySet(*req));
        if Self::take_failure(&self.fail_sets) {
            return Err(Error::Overlay("injected set failure".into()));
        }
        req.id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(req.id)
    }

    fn overlay_unset(&self, id: u32) -> Result<()> {
        self.record(DeviceCall::OverlayUnset(id));
        if Self::take_failure(&self.fail_unsets) {
            return Err(Error::Overlay("injected unset failure".into()));
        }
        Ok(())
    }

    fn overlay_play(&self, data: &mut MsmfbOverlayData) -> Result<()> {
        self.record(DeviceCall::OverlayPlay {
            id: data.id,
            memory_id: data.data.memory_id,
            offset: data.data.offset,
        });
        if Self::take_failure(&self.fail_plays) {
            return Err(Error::Overlay("injected play failure".into()));
        }
        Ok(())
    }

    fn display_commit(&self, flags: u32) -> Result<()> {
        self.record(DeviceCall::Commit { flags });
        if Self::take_failure(&self.fail_commits) {
            return Err(Error::Commit("injected commit failure".into()));
        }
        Ok(())
    }

    fn blank(&self, blank: bool) -> Result<()> {
        self.record(DeviceCall::Blank(blank));
        Ok(())
    }
}

/// Vsync that never waits.
pub struct FakeVsync {
    waits: AtomicUsize,
}

impl FakeVsync {
    pub fn new() -> Self {
        Self {
            waits: AtomicUsize::new(0),
        }
    }

    pub fn waits(&self) -> usize {
        self.waits.load(Ordering::SeqCst)
    }
}

impl VsyncSource for FakeVsync {
    fn wait_next_vsync(&self) -> Result<()> {
        self.waits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Vsync paced by the test: each pulse is a channel send. Drop the sender
/// before shutting the backend down so a parked worker unblocks (the
/// resulting error rides the normal display-failure path).
pub struct GatedVsync {
    pulses: Mutex<mpsc::Receiver<()>>,
}

impl GatedVsync {
    pub fn new(pulses: mpsc::Receiver<()>) -> Self {
        Self {
            pulses: Mutex::new(pulses),
        }
    }
}

impl VsyncSource for GatedVsync {
    fn wait_next_vsync(&self) -> Result<()> {
        self.pulses
            .lock()
            .unwrap()
            .recv()
            .map_err(|_| Error::Vsync("pulse source closed".into()))
    }
}

/// Plain heap memory standing in for ION regions, with memory ids that
/// look like fds.
pub struct HeapAllocator {
    next_id: AtomicI32,
}

impl HeapAllocator {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI32::new(100),
        }
    }
}

impl DeviceAllocator for HeapAllocator {
    fn allocate(&self, len: usize) -> Result<Box<dyn DeviceBuffer>> {
        Ok(Box::new(HeapBuffer {
            data: UnsafeCell::new(vec![0u8; len].into_boxed_slice()),
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
        }))
    }
}

pub struct HeapBuffer {
    data: UnsafeCell<Box<[u8]>>,
    id: i32,
}

// Same ownership contract as the real mapping: one CPU-side writer at a
// time by the slot protocol.
unsafe impl Send for HeapBuffer {}
unsafe impl Sync for HeapBuffer {}

impl DeviceBuffer for HeapBuffer {
    fn as_ptr(&self) -> *mut u8 {
        unsafe { (*self.data.get()).as_mut_ptr() }
    }

    fn len(&self) -> usize {
        unsafe { (&(*self.data.get())).len() }
    }

    fn memory_id(&self) -> RawFd {
        self.id
    }

    fn offset(&self) -> u32 {
        0
    }
}
