//! Error types for the overlay display backend

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("display device error: {0}")]
    Device(String),

    #[error("geometry query failed: {0}")]
    Geometry(String),

    #[error("buffer allocation failed: {0}")]
    BufferAlloc(String),

    #[error("overlay plane not allocated")]
    OverlayUnset,

    #[error("overlay operation failed: {0}")]
    Overlay(String),

    #[error("display commit failed: {0}")]
    Commit(String),

    #[error("vsync wait failed: {0}")]
    Vsync(String),

    #[error("backend is stopping")]
    Stopped,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
