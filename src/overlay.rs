//! Overlay plane lifecycle
//!
//! Manages the one or two hardware compositing planes that scan the frame
//! pool out to the panel. A single-pipe panel gets one full-screen plane;
//! a split panel gets a left and a right plane, the right one routed
//! through the right mixer. Plane handles are scarce: allocation is
//! idempotent per plane and teardown always forgets the handle, even when
//! the driver refuses, so a later allocate can start clean.

use tracing::{debug, warn};

use crate::fb::{align32, MdpDevice, PanelGeometry};
use crate::ffi::*;
use crate::pool::Slot;
use crate::vsync::VsyncSource;
use crate::{Error, Result};

/// MDP source format, fixed at build time.
pub fn mdp_pixel_format() -> u32 {
    if cfg!(feature = "bgra") {
        MDP_BGRA_8888
    } else if cfg!(feature = "rgbx") {
        MDP_RGBA_8888
    } else {
        MDP_RGB_565
    }
}

/// The live plane set for one panel.
pub struct OverlayPlanes {
    split: bool,
    pub(crate) left: Option<u32>,
    pub(crate) right: Option<u32>,
}

impl OverlayPlanes {
    pub fn new(split: bool) -> Self {
        Self {
            split,
            left: None,
            right: None,
        }
    }

    /// Create any plane not yet set. A plane that already exists is left
    /// untouched, so a retry after a partial failure only creates the
    /// missing sibling and never double-allocates.
    pub fn allocate(&mut self, dev: &dyn MdpDevice, geom: &PanelGeometry) -> Result<()> {
        if !self.split {
            if self.left.is_none() {
                let mut req = fullscreen_request(geom);
                let id = dev.overlay_set(&mut req)?;
                debug!("overlay plane set: id={}", id);
                self.left = Some(id);
            }
            return Ok(());
        }

        let [mut left_req, mut right_req] = split_requests(geom);
        if self.left.is_none() {
            let id = dev.overlay_set(&mut left_req)?;
            debug!("left overlay plane set: id={}", id);
            self.left = Some(id);
        }
        if self.right.is_none() {
            let id = dev.overlay_set(&mut right_req)?;
            debug!("right overlay plane set: id={}", id);
            self.right = Some(id);
        }
        Ok(())
    }

    /// Tear down every set plane and flush the removal with a clearing
    /// commit. Handles are forgotten regardless of what the driver says;
    /// the first failure is reported after all teardown is attempted.
    pub fn free(&mut self, dev: &dyn MdpDevice) -> Result<()> {
        let mut first_err = None;

        if let Some(id) = self.left.take() {
            if let Err(e) = dev.overlay_unset(id) {
                warn!("left overlay unset failed: {}", e);
                first_err.get_or_insert(e);
            }
        }
        if let Some(id) = self.right.take() {
            if let Err(e) = dev.overlay_unset(id) {
                warn!("right overlay unset failed: {}", e);
                first_err.get_or_insert(e);
            }
        }

        if let Err(e) = dev.display_commit(MDP_DISPLAY_COMMIT_OVERLAY) {
            warn!("overlay clear commit failed: {}", e);
            first_err.get_or_insert(e);
        }

        match first_err {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    /// Queue the slot's region on every live plane, wait out the refresh
    /// interval, and commit.
    pub fn display_frame(
        &self,
        dev: &dyn MdpDevice,
        vsync: &dyn VsyncSource,
        slot: &Slot,
    ) -> Result<()> {
        let left = self.left.ok_or(Error::OverlayUnset)?;
        let mut data = play_data(left, slot);
        dev.overlay_play(&mut data)?;

        if self.split {
            let right = self.right.ok_or(Error::OverlayUnset)?;
            let mut data = play_data(right, slot);
            dev.overlay_play(&mut data)?;
        }

        vsync.wait_next_vsync()?;
        dev.display_commit(MDP_DISPLAY_COMMIT_OVERLAY)
    }
}

fn play_data(plane: u32, slot: &Slot) -> MsmfbOverlayData {
    MsmfbOverlayData {
        id: plane,
        data: MsmfbData {
            offset: slot.offset(),
            memory_id: slot.memory_id(),
            ..Default::default()
        },
    }
}

fn base_request(geom: &PanelGeometry) -> MdpOverlay {
    let mut req = MdpOverlay::default();
    req.src.width = align32(geom.width);
    req.src.height = geom.height;
    req.src.format = mdp_pixel_format();
    req.alpha = 0xff;
    req.transp_mask = MDP_TRANSP_NOP;
    req.id = MSMFB_NEW_REQUEST;
    req
}

/// Single-pipe plane: the whole frame onto the whole panel.
fn fullscreen_request(geom: &PanelGeometry) -> MdpOverlay {
    let mut req = base_request(geom);
    req.src_rect.w = geom.width;
    req.src_rect.h = geom.height;
    req.dst_rect.w = geom.width;
    req.dst_rect.h = geom.height;
    req
}

/// Split-pipe planes: the frame cropped at the split boundary, each half
/// into its own mixer's coordinate space.
fn split_requests(geom: &PanelGeometry) -> [MdpOverlay; 2] {
    let left_width = geom.left_width();
    let ratio = left_width as f32 / geom.width as f32;
    let crop = (geom.width as f32 * ratio) as u32;

    let mut left = base_request(geom);
    left.src_rect = MdpRect {
        x: 0,
        y: 0,
        w: crop,
        h: geom.height,
    };
    left.dst_rect = MdpRect {
        x: 0,
        y: 0,
        w: left_width,
        h: geom.height,
    };

    let mut right = base_request(geom);
    right.src_rect = MdpRect {
        x: crop,
        y: 0,
        w: geom.width - crop,
        h: geom.height,
    };
    right.dst_rect = MdpRect {
        x: 0,
        y: 0,
        w: geom.width - left_width,
        h: geom.height,
    };
    right.flags |= MDSS_MDP_RIGHT_MIXER;

    [left, right]
}
