//! Background commit thread
//!
//! One long-lived thread walks the pool in round-robin order: wait for a
//! submitted slot, scan it out, then hand the slot one behind back to the
//! producer. Retiring one behind keeps a full slot of cushion between the
//! frame on glass and the next writable region.
//!
//! A failed scanout drops the frame: the overlay planes are torn down and
//! recreated so the next cycle starts from clean hardware state, and the
//! retire still goes out so the producer never wedges on a lost frame.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use tracing::{debug, trace, warn};

use crate::fb::{MdpDevice, PanelGeometry};
use crate::overlay::OverlayPlanes;
use crate::pool::{BufferPool, NUM_BUFFERS};
use crate::vsync::VsyncSource;
use crate::Result;

/// State shared between the caller's thread and the commit thread.
pub(crate) struct Shared {
    pub device: Arc<dyn MdpDevice>,
    pub vsync: Arc<dyn VsyncSource>,
    pub pool: BufferPool,
    pub planes: Mutex<OverlayPlanes>,
    pub geometry: PanelGeometry,
    pub stop: AtomicBool,
}

/// Handle to the commit thread.
pub(crate) struct CommitWorker {
    thread: Option<JoinHandle<()>>,
}

impl CommitWorker {
    pub fn spawn(shared: Arc<Shared>) -> Result<Self> {
        let thread = thread::Builder::new()
            .name("overlay-commit".into())
            .spawn(move || run(&shared))?;
        Ok(Self {
            thread: Some(thread),
        })
    }

    /// Request a stop, wake any parked wait, and join.
    pub fn stop(&mut self, shared: &Shared) {
        shared.stop.store(true, Ordering::Release);
        shared.pool.interrupt_waiters();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn run(shared: &Shared) {
    let mut frame = 0usize;
    loop {
        trace!("waiting for slot {}", frame);
        if shared.pool.slot(frame).wait_submitted(&shared.stop).is_err() {
            break;
        }

        let displayed = {
            let planes = shared.planes.lock().unwrap();
            planes.display_frame(&*shared.device, &*shared.vsync, shared.pool.slot(frame))
        };
        if let Err(err) = displayed {
            // Drop the frame and reset the planes so the next cycle is not
            // stuck on stale handles.
            warn!("display of slot {} failed: {}", frame, err);
            let mut planes = shared.planes.lock().unwrap();
            if let Err(err) = planes.free(&*shared.device) {
                warn!("overlay teardown after failed display: {}", err);
            }
            if let Err(err) = planes.allocate(&*shared.device, &shared.geometry) {
                warn!("overlay reallocation after failed display: {}", err);
            }
        }

        let prev = (frame + NUM_BUFFERS - 1) % NUM_BUFFERS;
        trace!("retiring slot {}", prev);
        shared.pool.slot(prev).retire();

        frame = (frame + 1) % NUM_BUFFERS;
    }
    debug!("commit thread exiting");
}
