//! Vertical-sync signalling
//!
//! The commit worker gates every hardware commit on the next refresh
//! interval. The wait is behind a trait so tests can pace the worker
//! deterministically; the real source is the mdss `vsync_event` sysfs
//! node, which reports `VSYNC=<timestamp>` with an exceptional-condition
//! poll flag on every pulse.

use std::fs::File;
use std::io;
use std::os::unix::io::AsRawFd;

use tracing::debug;

use crate::fb::{sysfs_dir, FbDevice};
use crate::{Error, Result};

/// Blocking source of vertical-sync pulses.
pub trait VsyncSource: Send + Sync {
    /// Block until the next refresh interval begins.
    fn wait_next_vsync(&self) -> Result<()>;
}

/// Vsync pulses from the mdss driver's sysfs event node.
pub struct MdssVsync {
    event: File,
}

impl MdssVsync {
    /// Enable vsync delivery on the device and open the event node.
    pub fn open(dev: &FbDevice) -> Result<Self> {
        dev.vsync_ctrl(true)?;
        let path = sysfs_dir().join("vsync_event");
        let event = File::open(&path)
            .map_err(|e| Error::Vsync(format!("cannot open {}: {}", path.display(), e)))?;
        // Prime the node; sysfs reports POLLPRI only after an initial read.
        let mut scratch = [0u8; 64];
        let _ = pread(&event, &mut scratch);
        debug!("vsync events enabled via {}", path.display());
        Ok(Self { event })
    }
}

/// A pulse should arrive every refresh interval; several frames of
/// silence means the pipe is stalled or dark.
const VSYNC_TIMEOUT_MS: libc::c_int = 100;

impl VsyncSource for MdssVsync {
    fn wait_next_vsync(&self) -> Result<()> {
        let mut pfd = libc::pollfd {
            fd: self.event.as_raw_fd(),
            events: libc::POLLPRI | libc::POLLERR,
            revents: 0,
        };
        let ret = unsafe { libc::poll(&mut pfd, 1, VSYNC_TIMEOUT_MS) };
        if ret < 0 {
            return Err(Error::Vsync(format!(
                "poll: {}",
                io::Error::last_os_error()
            )));
        }
        if ret == 0 {
            return Err(Error::Vsync("no pulse within timeout".into()));
        }
        // Consume the timestamp so the next pulse re-arms the node.
        let mut payload = [0u8; 64];
        pread(&self.event, &mut payload)
            .map_err(|e| Error::Vsync(format!("read: {}", e)))?;
        Ok(())
    }
}

fn pread(file: &File, buf: &mut [u8]) -> io::Result<usize> {
    let ret = unsafe {
        libc::pread(
            file.as_raw_fd(),
            buf.as_mut_ptr() as *mut libc::c_void,
            buf.len(),
            0,
        )
    };
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret as usize)
    }
}
