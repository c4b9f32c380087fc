//! Capture pipeline for PipView
//!
//! Grabs frames from a screen region or a (possibly occluded) window and
//! streams them to a consumer from a background thread.

pub mod capture;
pub mod config;
pub mod delivery;
pub mod frame;
#[cfg(windows)]
pub mod gdi;
pub mod source;

pub use capture::{CaptureLoop, LoopStats, StopReason};
pub use config::CaptureConfig;
pub use delivery::{frame_queue, latest_frame, FrameQueueSender, FrameSink, LatestFrame, LatestFrameSender};
pub use frame::{Frame, FrameOrigin, RawBitmap};
#[cfg(windows)]
pub use gdi::GdiPlatform;
pub use source::{CapturePlatform, FrameSource, Grabber};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Capture target is gone")]
    TargetGone,

    #[error("Invalid capture geometry: {width}x{height}")]
    InvalidGeometry { width: i64, height: i64 },

    #[error("Unrecognized pixel buffer: {0}")]
    DecodeFailure(String),

    #[error("Capture failed: {0}")]
    TransientCaptureFailure(String),

    #[error("Failed to spawn capture thread: {0}")]
    Spawn(#[from] std::io::Error),
}

#[cfg(windows)]
impl From<windows::core::Error> for CaptureError {
    fn from(err: windows::core::Error) -> Self {
        CaptureError::TransientCaptureFailure(err.to_string())
    }
}

pub type CaptureResult<T> = Result<T, CaptureError>;

/// Opaque platform window identifier (an HWND on Windows)
pub type WindowId = isize;

/// Rectangle in physical screen pixels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Build from edge coordinates, as returned by `GetWindowRect`.
    ///
    /// Fails with `InvalidGeometry` when either side is zero or negative.
    pub fn from_edges(left: i32, top: i32, right: i32, bottom: i32) -> CaptureResult<Self> {
        let width = right as i64 - left as i64;
        let height = bottom as i64 - top as i64;
        if width <= 0 || height <= 0 {
            return Err(CaptureError::InvalidGeometry { width, height });
        }
        Ok(Self::new(left, top, width as u32, height as u32))
    }

    pub fn right(&self) -> i32 {
        self.x + self.width as i32
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height as i32
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// What to capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureTarget {
    /// A fixed rectangle of the screen, on-screen content only
    Region(Rect),
    /// A top-level window, captured even when covered
    Window(WindowId),
}

impl CaptureTarget {
    /// Region target, rejecting empty rectangles
    pub fn region(rect: Rect) -> CaptureResult<Self> {
        if rect.is_empty() {
            return Err(CaptureError::InvalidGeometry {
                width: rect.width as i64,
                height: rect.height as i64,
            });
        }
        Ok(CaptureTarget::Region(rect))
    }

    pub fn window(id: WindowId) -> Self {
        CaptureTarget::Window(id)
    }

    pub fn is_window(&self) -> bool {
        matches!(self, CaptureTarget::Window(_))
    }
}
