//! Triple-buffered overlay display backend for MSM framebuffer panels
//!
//! Drives panels whose display controller exposes compositing overlay
//! pipes instead of a directly writable scanout buffer. A rendering
//! client draws complete frames into device-visible memory and flips;
//! a dedicated commit thread scans them out in submission order, gated
//! on the panel's vertical sync.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Rendering client                          │
//! │        acquire_next_writable / flip / blank                 │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   OverlayBackend                            │
//! │  ┌─────────────┐  ┌──────────────┐  ┌────────────────────┐  │
//! │  │ BufferPool  │  │ OverlayPlanes│  │ CommitWorker       │  │
//! │  │ (3 ION      │→ │ (1–2 mixer   │← │ (round-robin scan, │  │
//! │  │  regions)   │  │  pipes)      │  │  vsync-gated)      │  │
//! │  └─────────────┘  └──────────────┘  └────────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                     fb / mdp / ion ioctls
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │              MSM display driver (mdss)                      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Split panels (one logical image over two compositing pipes) get a
//! plane per pipe; everything else in the pipeline is unaware of the
//! split.

pub mod backend;
pub mod error;
pub mod fb;
pub mod ffi;
pub mod ion;
pub mod overlay;
pub mod pool;
pub mod vsync;

mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use backend::{OverlayBackend, Surface};
pub use error::Error;
pub use fb::{FbDevice, MdpDevice, PanelGeometry};
pub use ion::{DeviceAllocator, DeviceBuffer, IonAllocator};
pub use overlay::OverlayPlanes;
pub use pool::{BufferPool, NUM_BUFFERS};
pub use vsync::{MdssVsync, VsyncSource};

/// Result type for this crate
pub type Result<T> = std::result::Result<T, Error>;
