//! Window listing and drag-rectangle rules

use capture::{CaptureTarget, Rect, WindowId};

/// Minimum side length, exclusive, of an accepted drag selection
pub const MIN_SELECTION_SIZE: u32 = 10;

/// Shell windows that are visible and titled but never worth capturing
const SHELL_TITLES: &[&str] = &["Program Manager", "Settings", "Microsoft Store"];

/// Window information for the picker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowInfo {
    pub hwnd: WindowId,
    pub title: String,
    pub rect: Rect,
}

impl WindowInfo {
    pub fn target(&self) -> CaptureTarget {
        CaptureTarget::window(self.hwnd)
    }
}

/// Drop untitled, shell, and own windows (any title containing `own_name`),
/// then sort by title, case-insensitively
pub fn filter_windows(windows: Vec<WindowInfo>, own_name: &str) -> Vec<WindowInfo> {
    let mut kept: Vec<WindowInfo> = windows
        .into_iter()
        .filter(|w| !w.title.trim().is_empty())
        .filter(|w| !SHELL_TITLES.contains(&w.title.as_str()))
        .filter(|w| own_name.is_empty() || !w.title.contains(own_name))
        .collect();
    kept.sort_by_key(|w| w.title.to_lowercase());
    kept
}

/// Calculate selection rectangle from drag points
pub fn calc_selection_rect(start_x: i32, start_y: i32, end_x: i32, end_y: i32) -> Rect {
    let x = start_x.min(end_x);
    let y = start_y.min(end_y);
    let width = (start_x - end_x).unsigned_abs();
    let height = (start_y - end_y).unsigned_abs();

    Rect::new(x, y, width, height)
}

/// Both sides must exceed [`MIN_SELECTION_SIZE`]
pub fn is_valid_selection(rect: &Rect) -> bool {
    rect.width > MIN_SELECTION_SIZE && rect.height > MIN_SELECTION_SIZE
}

/// Region target for an accepted selection
pub fn selection_target(rect: &Rect) -> Option<CaptureTarget> {
    if is_valid_selection(rect) {
        CaptureTarget::region(*rect).ok()
    } else {
        None
    }
}

#[cfg(windows)]
mod platform {
    use super::{filter_windows, WindowInfo};
    use capture::Rect;
    use windows::Win32::Foundation::{BOOL, HWND, LPARAM, RECT};
    use windows::Win32::Graphics::Dwm::{DwmGetWindowAttribute, DWMWA_CLOAKED};
    use windows::Win32::UI::WindowsAndMessaging::{
        EnumWindows, GetWindowLongW, GetWindowRect, GetWindowTextW, IsWindowVisible, GWL_EXSTYLE,
        WS_EX_TOOLWINDOW,
    };

    /// Visible, titled top-level windows, sorted by title.
    ///
    /// Windows whose title contains `own_name` are left out so the app does
    /// not offer to capture itself.
    pub fn enumerate_windows(own_name: &str) -> Vec<WindowInfo> {
        let mut windows: Vec<WindowInfo> = Vec::new();

        unsafe {
            let _ = EnumWindows(
                Some(enum_window_callback),
                LPARAM(&mut windows as *mut Vec<WindowInfo> as isize),
            );
        }

        log::debug!("enumerated {} candidate windows", windows.len());
        filter_windows(windows, own_name)
    }

    unsafe extern "system" fn enum_window_callback(hwnd: HWND, lparam: LPARAM) -> BOOL {
        let windows = &mut *(lparam.0 as *mut Vec<WindowInfo>);

        if should_include_window(hwnd) {
            if let Some(info) = get_window_info(hwnd) {
                windows.push(info);
            }
        }

        BOOL(1) // Continue enumeration
    }

    unsafe fn should_include_window(hwnd: HWND) -> bool {
        if !IsWindowVisible(hwnd).as_bool() {
            return false;
        }

        let ex_style = GetWindowLongW(hwnd, GWL_EXSTYLE) as u32;
        if ex_style & WS_EX_TOOLWINDOW.0 != 0 {
            return false;
        }

        // Cloaked windows live on another virtual desktop
        let mut cloaked: u32 = 0;
        if DwmGetWindowAttribute(
            hwnd,
            DWMWA_CLOAKED,
            &mut cloaked as *mut _ as *mut _,
            std::mem::size_of::<u32>() as u32,
        )
        .is_ok()
            && cloaked != 0
        {
            return false;
        }

        true
    }

    unsafe fn get_window_info(hwnd: HWND) -> Option<WindowInfo> {
        let mut rect = RECT::default();
        if GetWindowRect(hwnd, &mut rect).is_err() {
            return None;
        }

        let mut title_buf = [0u16; 512];
        let len = GetWindowTextW(hwnd, &mut title_buf);
        if len <= 0 {
            return None;
        }
        let title = String::from_utf16_lossy(&title_buf[..len as usize]);

        Some(WindowInfo {
            hwnd: hwnd.0 as isize,
            title,
            rect: Rect::new(
                rect.left,
                rect.top,
                (rect.right - rect.left).max(0) as u32,
                (rect.bottom - rect.top).max(0) as u32,
            ),
        })
    }
}

#[cfg(windows)]
pub use platform::enumerate_windows;
