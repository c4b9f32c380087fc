//! State machine for PipView

use capture::{CaptureTarget, Rect};

/// Preview size used when a window's rectangle cannot be read
pub const FALLBACK_PREVIEW_SIZE: (u32, u32) = (400, 300);

/// Application state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    /// Choosing a window from the list
    Picking,
    /// Drag-select overlay is up
    Selecting,
    /// Showing the live preview
    Previewing,
}

impl AppState {
    pub fn display_text(&self) -> &'static str {
        match self {
            AppState::Picking => "Ready",
            AppState::Selecting => "Select an area...",
            AppState::Previewing => "Previewing",
        }
    }

    pub fn can_select(&self) -> bool {
        matches!(self, AppState::Picking)
    }
}

/// State machine transitions
pub struct StateMachine {
    state: AppState,
    target: Option<CaptureTarget>,
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: AppState::Picking,
            target: None,
        }
    }

    pub fn state(&self) -> AppState {
        self.state
    }

    /// Target being previewed
    pub fn target(&self) -> Option<&CaptureTarget> {
        self.target.as_ref()
    }

    /// Picking -> Selecting
    pub fn start_selecting(&mut self) -> bool {
        if self.state.can_select() {
            self.state = AppState::Selecting;
            true
        } else {
            false
        }
    }

    /// Selecting -> Picking
    pub fn cancel_selecting(&mut self) -> bool {
        if matches!(self.state, AppState::Selecting) {
            self.state = AppState::Picking;
            true
        } else {
            false
        }
    }

    /// Picking or Selecting -> Previewing
    pub fn start_preview(&mut self, target: CaptureTarget) -> bool {
        if matches!(self.state, AppState::Picking | AppState::Selecting) {
            self.target = Some(target);
            self.state = AppState::Previewing;
            true
        } else {
            false
        }
    }

    /// Back to the picker, dropping the target
    pub fn reset(&mut self) {
        self.state = AppState::Picking;
        self.target = None;
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// Starting size of the preview window in physical pixels.
///
/// Windows open at 40% of their size, regions at half.
pub fn initial_preview_size(target: &CaptureTarget, window_rect: Option<Rect>) -> (u32, u32) {
    match target {
        CaptureTarget::Window(_) => match window_rect {
            Some(rect) if !rect.is_empty() => (
                ((rect.width as f64 * 0.4) as u32).max(1),
                ((rect.height as f64 * 0.4) as u32).max(1),
            ),
            _ => FALLBACK_PREVIEW_SIZE,
        },
        CaptureTarget::Region(rect) => ((rect.width / 2).max(1), (rect.height / 2).max(1)),
    }
}
