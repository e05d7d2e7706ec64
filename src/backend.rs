//! Frame handoff API
//!
//! The session object a rendering client drives: acquire the writable
//! region, draw, flip. A flip submits the current slot to the commit
//! thread and blocks until the slot's retire credit arrives, which is the
//! only backpressure between the renderer and the panel's refresh rate.

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use crate::fb::{self, FbDevice, MdpDevice, PanelGeometry};
use crate::ion::{DeviceAllocator, IonAllocator};
use crate::overlay::OverlayPlanes;
use crate::pool::{BufferPool, NUM_BUFFERS};
use crate::vsync::{MdssVsync, VsyncSource};
use crate::worker::{CommitWorker, Shared};
use crate::Result;

/// Geometry of the client-visible drawing surface.
#[derive(Debug, Clone, Copy)]
pub struct Surface {
    pub width: u32,
    pub height: u32,
    pub row_bytes: u32,
    pub bytes_per_pixel: u32,
}

/// A live overlay display session.
pub struct OverlayBackend {
    shared: Arc<Shared>,
    worker: Option<CommitWorker>,
    next_buf: usize,
    surface: Surface,
}

impl OverlayBackend {
    /// Whether this target's display driver can run the overlay path.
    pub fn supported() -> bool {
        fb::overlay_supported()
    }

    /// Open the display device, size the pool from the panel, power the
    /// pipe up and start the commit thread.
    pub fn open() -> Result<Self> {
        let device = FbDevice::open()?;
        let mdp5 = fb::overlay_supported();
        let geometry = PanelGeometry::query(&device, mdp5)?;
        info!(
            "overlay init: {} x {}, {} bytes/row, split={}",
            geometry.width,
            geometry.height,
            geometry.row_bytes,
            geometry.is_split()
        );
        let vsync = MdssVsync::open(&device)?;
        Self::with_parts(
            Arc::new(device),
            Arc::new(vsync),
            &IonAllocator,
            geometry,
        )
    }

    pub(crate) fn with_parts(
        device: Arc<dyn MdpDevice>,
        vsync: Arc<dyn VsyncSource>,
        allocator: &dyn DeviceAllocator,
        geometry: PanelGeometry,
    ) -> Result<Self> {
        let mut planes = OverlayPlanes::new(geometry.is_split());

        // Power-cycle the panel once so the first plane allocation runs
        // against a freshly lit pipe.
        if let Err(err) = apply_blank(&*device, &mut planes, &geometry, true) {
            warn!("initial blank failed: {}", err);
        }
        if let Err(err) = apply_blank(&*device, &mut planes, &geometry, false) {
            warn!("initial unblank failed: {}", err);
        }

        let pool = match BufferPool::allocate(allocator, geometry.frame_bytes()) {
            Ok(pool) => pool,
            Err(err) => {
                let _ = planes.free(&*device);
                return Err(err);
            }
        };

        if let Err(err) = planes.allocate(&*device, &geometry) {
            let _ = planes.free(&*device);
            return Err(err);
        }

        let surface = Surface {
            width: geometry.width,
            height: geometry.height,
            row_bytes: geometry.row_bytes,
            bytes_per_pixel: geometry.bytes_per_pixel(),
        };

        let shared = Arc::new(Shared {
            device,
            vsync,
            pool,
            planes: Mutex::new(planes),
            geometry,
            stop: AtomicBool::new(false),
        });
        let worker = match CommitWorker::spawn(Arc::clone(&shared)) {
            Ok(worker) => worker,
            Err(err) => {
                let mut planes = shared.planes.lock().unwrap();
                let _ = planes.free(&*shared.device);
                return Err(err);
            }
        };

        Ok(Self {
            shared,
            worker: Some(worker),
            next_buf: 0,
            surface,
        })
    }

    pub fn surface(&self) -> Surface {
        self.surface
    }

    /// The region the client should draw the next frame into. Pure
    /// lookup, never blocks; valid until the next `flip`.
    pub fn acquire_next_writable(&mut self) -> &mut [u8] {
        let slot = self.shared.pool.slot(self.next_buf);
        // SAFETY: the slot protocol gives the producer exclusive CPU-side
        // ownership of this mapping between retire and submit; the commit
        // thread only forwards the region's fd and offset to the kernel.
        unsafe { std::slice::from_raw_parts_mut(slot.mapping(), slot.len()) }
    }

    /// Submit the frame drawn into the current region and advance to the
    /// next slot, blocking until that path through the ring is clear.
    pub fn flip(&mut self) -> Result<()> {
        let shared = Arc::clone(&self.shared);
        let slot = shared.pool.slot(self.next_buf);
        slot.submit();
        slot.wait_retired(&shared.stop)?;
        self.next_buf = (self.next_buf + 1) % NUM_BUFFERS;
        Ok(())
    }

    /// Power the panel down or up. Planes are torn down before a
    /// power-down and recreated after a power-up, never programmed
    /// against a dark pipe.
    pub fn blank(&mut self, blank: bool) -> Result<()> {
        let mut planes = self.shared.planes.lock().unwrap();
        apply_blank(&*self.shared.device, &mut planes, &self.shared.geometry, blank)
    }

    /// Stop and join the commit thread, then release the planes, the
    /// pool and the device.
    pub fn shutdown(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        let Some(mut worker) = self.worker.take() else {
            return;
        };
        worker.stop(&self.shared);
        let mut planes = self.shared.planes.lock().unwrap();
        if let Err(err) = planes.free(&*self.shared.device) {
            warn!("overlay teardown failed: {}", err);
        }
        // pool regions and the device handle release with the last
        // reference, after the joined worker's clone is gone
    }
}

impl Drop for OverlayBackend {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn apply_blank(
    dev: &dyn MdpDevice,
    planes: &mut OverlayPlanes,
    geom: &PanelGeometry,
    blank: bool,
) -> Result<()> {
    if blank {
        if let Err(err) = planes.free(dev) {
            warn!("overlay teardown before blank: {}", err);
        }
    }
    dev.blank(blank)?;
    if !blank {
        planes.allocate(dev, geom)?;
    }
    Ok(())
}
