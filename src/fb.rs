//! Framebuffer device access and panel geometry
//!
//! Owns the `/dev/graphics/fb0` handle, the screeninfo and blank ioctls,
//! and the sysfs probes for the driver name and the split-panel geometry.
//! The overlay ioctls themselves are exposed through the [`MdpDevice`]
//! trait so the plane manager and the commit worker can be driven against
//! a recording stand-in under test.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;

use tracing::{debug, info};

use crate::ffi::*;
use crate::{Error, Result};

/// Working pixel size in bytes; the MDP source surface is always laid out
/// on 4-byte pixels even when the scanout format is 16-bit.
pub const PIXEL_SIZE: u32 = 4;

/// Panels wider than a single mixer can scan are always split.
pub const MAX_DISPLAY_DIM: u32 = 2048;

/// Round up to the MDP surface-width alignment.
pub const fn align32(x: u32) -> u32 {
    (x + 31) & !31
}

/// Overlay protocol of the display driver.
///
/// One implementor per target: [`FbDevice`] issues the real ioctls, the
/// test fake records calls and injects failures.
pub trait MdpDevice: Send + Sync {
    /// Create an overlay plane; the driver fills in the plane id.
    fn overlay_set(&self, req: &mut MdpOverlay) -> Result<u32>;

    /// Destroy an overlay plane.
    fn overlay_unset(&self, id: u32) -> Result<()>;

    /// Queue a buffer on a plane for the next commit.
    fn overlay_play(&self, data: &mut MsmfbOverlayData) -> Result<()>;

    /// Commit the pending plane updates to the panel.
    fn display_commit(&self, flags: u32) -> Result<()>;

    /// Power the panel down or up.
    fn blank(&self, blank: bool) -> Result<()>;
}

/// Sysfs directory of the primary framebuffer, overridable for unusual
/// targets via `MDP_FB_SYSFS`.
pub fn sysfs_dir() -> PathBuf {
    match std::env::var("MDP_FB_SYSFS") {
        Ok(dir) => PathBuf::from(dir),
        Err(_) => PathBuf::from("/sys/class/graphics/fb0"),
    }
}

/// Whether the target's display driver exposes the overlay protocol.
///
/// True only for mdss targets, which are also the only ones that publish
/// split-panel geometry.
pub fn overlay_supported() -> bool {
    match fs::read_to_string(sysfs_dir().join("name")) {
        Ok(name) => driver_has_overlay(&name),
        Err(_) => false,
    }
}

fn driver_has_overlay(name: &str) -> bool {
    name.trim_end().starts_with("mdssfb")
}

/// The primary framebuffer device node.
pub struct FbDevice {
    file: File,
}

impl FbDevice {
    /// Open the framebuffer device, honoring the `MDP_FB_DEVICE` override.
    pub fn open() -> Result<Self> {
        if let Ok(path) = std::env::var("MDP_FB_DEVICE") {
            return Self::open_path(&path);
        }
        Self::open_path("/dev/graphics/fb0").or_else(|_| Self::open_path("/dev/fb0"))
    }

    fn open_path(path: &str) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| Error::Device(format!("cannot open {}: {}", path, e)))?;
        debug!("opened display device {}", path);
        Ok(Self { file })
    }

    pub fn var_screeninfo(&self) -> Result<FbVarScreeninfo> {
        let mut vi = FbVarScreeninfo::default();
        self.ioctl(FBIOGET_VSCREENINFO, &mut vi as *mut _ as *mut libc::c_void)
            .map_err(|e| Error::Geometry(format!("FBIOGET_VSCREENINFO: {}", e)))?;
        Ok(vi)
    }

    pub fn fix_screeninfo(&self) -> Result<FbFixScreeninfo> {
        let mut fi = FbFixScreeninfo::default();
        self.ioctl(FBIOGET_FSCREENINFO, &mut fi as *mut _ as *mut libc::c_void)
            .map_err(|e| Error::Geometry(format!("FBIOGET_FSCREENINFO: {}", e)))?;
        Ok(fi)
    }

    /// Enable or disable vsync event delivery on the sysfs node.
    pub fn vsync_ctrl(&self, enable: bool) -> Result<()> {
        let mut val: u32 = enable as u32;
        self.ioctl(MSMFB_OVERLAY_VSYNC_CTRL, &mut val as *mut _ as *mut libc::c_void)
            .map_err(|e| Error::Device(format!("MSMFB_OVERLAY_VSYNC_CTRL: {}", e)))
    }

    fn ioctl(&self, request: u64, arg: *mut libc::c_void) -> io::Result<()> {
        let ret = unsafe { libc::ioctl(self.file.as_raw_fd(), request as libc::c_ulong, arg) };
        if ret < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }
}

impl MdpDevice for FbDevice {
    fn overlay_set(&self, req: &mut MdpOverlay) -> Result<u32> {
        self.ioctl(MSMFB_OVERLAY_SET, req as *mut _ as *mut libc::c_void)
            .map_err(|e| Error::Overlay(format!("MSMFB_OVERLAY_SET: {}", e)))?;
        Ok(req.id)
    }

    fn overlay_unset(&self, id: u32) -> Result<()> {
        let mut id = id;
        self.ioctl(MSMFB_OVERLAY_UNSET, &mut id as *mut _ as *mut libc::c_void)
            .map_err(|e| Error::Overlay(format!("MSMFB_OVERLAY_UNSET: {}", e)))
    }

    fn overlay_play(&self, data: &mut MsmfbOverlayData) -> Result<()> {
        self.ioctl(MSMFB_OVERLAY_PLAY, data as *mut _ as *mut libc::c_void)
            .map_err(|e| Error::Overlay(format!("MSMFB_OVERLAY_PLAY: {}", e)))
    }

    fn display_commit(&self, flags: u32) -> Result<()> {
        let mut commit = MdpDisplayCommit {
            flags,
            ..Default::default()
        };
        self.ioctl(MSMFB_DISPLAY_COMMIT, &mut commit as *mut _ as *mut libc::c_void)
            .map_err(|e| Error::Commit(format!("MSMFB_DISPLAY_COMMIT: {}", e)))
    }

    fn blank(&self, blank: bool) -> Result<()> {
        let mode = if blank {
            FB_BLANK_POWERDOWN
        } else {
            FB_BLANK_UNBLANK
        };
        let ret = unsafe { libc::ioctl(self.file.as_raw_fd(), FBIOBLANK as libc::c_ulong, mode) };
        if ret < 0 {
            return Err(Error::Device(format!(
                "FBIOBLANK({}): {}",
                blank,
                io::Error::last_os_error()
            )));
        }
        Ok(())
    }
}

/// Immutable-per-session description of the physical panel.
#[derive(Debug, Clone, Copy)]
pub struct PanelGeometry {
    pub width: u32,
    pub height: u32,
    /// Bytes per row of the working surface (32-aligned width).
    pub row_bytes: u32,
    pub bits_per_pixel: u32,
    /// Left-pipe width published by the driver, 0 if not published.
    pub left_split: u32,
    /// Right-pipe width published by the driver, 0 if not published.
    pub right_split: u32,
}

impl PanelGeometry {
    /// Query the panel once at initialization.
    pub fn query(dev: &FbDevice, mdp5: bool) -> Result<Self> {
        // The fixed info is only probed to fail early on a dead driver;
        // the working stride comes from the aligned width below.
        let _fi = dev.fix_screeninfo()?;
        let vi = dev.var_screeninfo()?;

        info!(
            "panel reports {} x {} @ {} bpp (r {}/{} g {}/{} b {}/{})",
            vi.xres,
            vi.yres,
            vi.bits_per_pixel,
            vi.red.offset,
            vi.red.length,
            vi.green.offset,
            vi.green.length,
            vi.blue.offset,
            vi.blue.length
        );

        let (left_split, right_split) = if mdp5 {
            read_split()
        } else {
            (0, 0)
        };

        let geom = Self {
            width: vi.xres,
            height: vi.yres,
            row_bytes: align32(vi.xres) * PIXEL_SIZE,
            bits_per_pixel: vi.bits_per_pixel,
            left_split,
            right_split,
        };
        geom.validate()?;
        Ok(geom)
    }

    /// Whether the panel is driven by two compositing pipes.
    pub fn is_split(&self) -> bool {
        self.width > MAX_DISPLAY_DIM || self.right_split != 0
    }

    /// Left-pipe width: driver-published split, or an even split.
    pub fn left_width(&self) -> u32 {
        if self.left_split != 0 {
            self.left_split
        } else {
            self.width / 2
        }
    }

    pub fn right_width(&self) -> u32 {
        self.right_split
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        self.bits_per_pixel / 8
    }

    /// Size of one full frame in the working stride.
    pub fn frame_bytes(&self) -> usize {
        self.row_bytes as usize * self.height as usize
    }

    /// A published split must partition the width exactly.
    pub fn validate(&self) -> Result<()> {
        if self.left_split != 0
            && self.right_split != 0
            && self.left_split + self.right_split != self.width
        {
            return Err(Error::Geometry(format!(
                "split {} + {} does not cover width {}",
                self.left_split, self.right_split, self.width
            )));
        }
        Ok(())
    }
}

fn read_split() -> (u32, u32) {
    match fs::read_to_string(sysfs_dir().join("msm_fb_split")) {
        Ok(contents) => {
            let (left, right) = parse_split(&contents);
            info!("left split={} right split={}", left, right);
            (left, right)
        }
        Err(_) => {
            debug!("no split node published");
            (0, 0)
        }
    }
}

/// Parse the "left right" split node contents, tolerating junk.
fn parse_split(contents: &str) -> (u32, u32) {
    let mut fields = contents.split_whitespace();
    let left = fields.next().and_then(|v| v.parse().ok()).unwrap_or(0);
    let right = fields.next().and_then(|v| v.parse().ok()).unwrap_or(0);
    (left, right)
}
