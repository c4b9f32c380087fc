//! Overlay module for PipView
//!
//! Picks a capture target: lists top-level windows and shows a frozen,
//! dimmed desktop overlay for dragging out a screen region.

#[cfg(windows)]
pub mod render;
pub mod screenshot;
pub mod selection;
#[cfg(windows)]
pub mod window;

#[cfg(windows)]
pub use selection::enumerate_windows;
pub use selection::{WindowInfo, MIN_SELECTION_SIZE};
#[cfg(windows)]
pub use window::OverlayWindow;

use capture::{CaptureError, Rect};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OverlayError {
    #[cfg(windows)]
    #[error("Windows API error: {0}")]
    Windows(#[from] windows::core::Error),

    #[error("Screenshot failed: {0}")]
    Screenshot(String),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Selection cancelled")]
    Cancelled,
}

pub type OverlayResult<T> = Result<T, OverlayError>;

/// Selection outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionOutcome {
    /// User dragged out a region, in screen pixels
    Region(Rect),
    /// User cancelled
    Cancelled,
}
