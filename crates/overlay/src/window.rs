//! Region selection overlay window

use crate::{
    render::OverlayRenderer,
    screenshot::{get_virtual_desktop_rect, Screenshot},
    selection::{calc_selection_rect, is_valid_selection},
    OverlayError, OverlayResult, SelectionOutcome,
};
use capture::Rect;
use std::cell::RefCell;
use windows::core::{w, PCWSTR};
use windows::Win32::Foundation::{HINSTANCE, HWND, LPARAM, LRESULT, WPARAM};
use windows::Win32::Graphics::Gdi::{InvalidateRect, UpdateWindow};
use windows::Win32::System::LibraryLoader::GetModuleHandleW;
use windows::Win32::UI::Input::KeyboardAndMouse::{ReleaseCapture, SetCapture, VK_ESCAPE};
use windows::Win32::UI::WindowsAndMessaging::{
    CreateWindowExW, DefWindowProcW, DestroyWindow, DispatchMessageW, GetMessageW,
    LoadCursorW, RegisterClassExW, SetForegroundWindow, ShowWindow, TranslateMessage,
    CS_HREDRAW, CS_VREDRAW, IDC_CROSS, MSG, SW_SHOW, WM_CLOSE, WM_DESTROY, WM_KEYDOWN,
    WM_LBUTTONDOWN, WM_LBUTTONUP, WM_MOUSEMOVE, WM_PAINT, WNDCLASSEXW, WS_EX_TOOLWINDOW,
    WS_EX_TOPMOST, WS_POPUP,
};

thread_local! {
    static OVERLAY_STATE: RefCell<Option<Box<OverlayState>>> = const { RefCell::new(None) };
}

struct OverlayState {
    renderer: OverlayRenderer,
    selection: Option<Rect>,
    drag_start: Option<(i32, i32)>,
    is_dragging: bool,
    result: Option<SelectionOutcome>,
}

impl OverlayState {
    fn new(renderer: OverlayRenderer) -> Self {
        Self {
            renderer,
            selection: None,
            drag_start: None,
            is_dragging: false,
            result: None,
        }
    }
}

/// Full-desktop overlay for dragging out a capture region
pub struct OverlayWindow;

impl OverlayWindow {
    const CLASS_NAME: PCWSTR = w!("PipViewSelectionOverlay");
    const DRAG_THRESHOLD: i32 = 4;

    /// Show the overlay and block until the user picks a region or cancels.
    ///
    /// Runs its own message loop; call it from a thread that owns no other
    /// windows.
    pub fn show() -> OverlayResult<SelectionOutcome> {
        unsafe {
            let hmodule = GetModuleHandleW(None)?;
            let hinstance = HINSTANCE(hmodule.0);

            let wc = WNDCLASSEXW {
                cbSize: std::mem::size_of::<WNDCLASSEXW>() as u32,
                style: CS_HREDRAW | CS_VREDRAW,
                lpfnWndProc: Some(Self::wnd_proc),
                hInstance: hinstance,
                hCursor: LoadCursorW(None, IDC_CROSS)?,
                lpszClassName: Self::CLASS_NAME,
                ..Default::default()
            };

            // Fails harmlessly when the class is already registered
            RegisterClassExW(&wc);

            let vd = get_virtual_desktop_rect();
            let screenshot = Screenshot::capture_virtual_desktop()?;

            OVERLAY_STATE.with(|s| {
                *s.borrow_mut() = Some(Box::new(OverlayState::new(OverlayRenderer::new(screenshot))));
            });

            let hwnd = match CreateWindowExW(
                WS_EX_TOPMOST | WS_EX_TOOLWINDOW,
                Self::CLASS_NAME,
                w!("PipView Selection"),
                WS_POPUP,
                vd.x,
                vd.y,
                vd.width as i32,
                vd.height as i32,
                None,
                None,
                hinstance,
                None,
            ) {
                Ok(hwnd) => hwnd,
                Err(e) => {
                    OVERLAY_STATE.with(|s| *s.borrow_mut() = None);
                    return Err(e.into());
                }
            };

            let _ = ShowWindow(hwnd, SW_SHOW);
            let _ = SetForegroundWindow(hwnd);
            let _ = UpdateWindow(hwnd);

            let mut msg = MSG::default();
            loop {
                let ret = GetMessageW(&mut msg, None, 0, 0);
                if !ret.as_bool() {
                    break;
                }
                let _ = TranslateMessage(&msg);
                DispatchMessageW(&msg);

                let has_result = OVERLAY_STATE.with(|s| {
                    s.borrow().as_ref().map(|state| state.result.is_some()).unwrap_or(false)
                });
                if has_result {
                    break;
                }
            }

            let result = OVERLAY_STATE.with(|s| s.borrow_mut().take().and_then(|state| state.result));

            let _ = DestroyWindow(hwnd);

            match result {
                Some(outcome) => {
                    log::debug!("selection overlay finished: {:?}", outcome);
                    Ok(outcome)
                }
                None => Err(OverlayError::Cancelled),
            }
        }
    }

    unsafe extern "system" fn wnd_proc(hwnd: HWND, msg: u32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
        match msg {
            WM_PAINT => {
                OVERLAY_STATE.with(|s| {
                    if let Some(ref state) = *s.borrow() {
                        state.renderer.render(hwnd);
                    }
                });
                LRESULT(0)
            }

            WM_LBUTTONDOWN => {
                let _ = SetCapture(hwnd);
                Self::handle_mouse_down(lparam);
                LRESULT(0)
            }

            WM_MOUSEMOVE => {
                Self::handle_mouse_move(hwnd, lparam);
                LRESULT(0)
            }

            WM_LBUTTONUP => {
                let _ = ReleaseCapture();
                Self::handle_mouse_up(hwnd);
                LRESULT(0)
            }

            WM_KEYDOWN => {
                if wparam.0 == VK_ESCAPE.0 as usize {
                    Self::finish(SelectionOutcome::Cancelled);
                }
                LRESULT(0)
            }

            WM_CLOSE => {
                Self::finish(SelectionOutcome::Cancelled);
                LRESULT(0)
            }

            WM_DESTROY => LRESULT(0),

            _ => DefWindowProcW(hwnd, msg, wparam, lparam),
        }
    }

    fn finish(outcome: SelectionOutcome) {
        OVERLAY_STATE.with(|s| {
            if let Some(ref mut state) = *s.borrow_mut() {
                if state.result.is_none() {
                    state.result = Some(outcome);
                }
            }
        });
    }

    fn point_from_lparam(state: &OverlayState, lparam: LPARAM) -> (i32, i32) {
        let x = (lparam.0 & 0xFFFF) as i16 as i32;
        let y = ((lparam.0 >> 16) & 0xFFFF) as i16 as i32;
        state.renderer.screenshot().local_to_screen(x, y)
    }

    fn handle_mouse_down(lparam: LPARAM) {
        OVERLAY_STATE.with(|s| {
            if let Some(ref mut state) = *s.borrow_mut() {
                let point = Self::point_from_lparam(state, lparam);
                state.drag_start = Some(point);
                state.is_dragging = false;
                state.renderer.set_dragging(false);
            }
        });
    }

    unsafe fn handle_mouse_move(hwnd: HWND, lparam: LPARAM) {
        let mut changed = false;

        OVERLAY_STATE.with(|s| {
            if let Some(ref mut state) = *s.borrow_mut() {
                let Some((start_x, start_y)) = state.drag_start else {
                    return;
                };
                let (screen_x, screen_y) = Self::point_from_lparam(state, lparam);

                if !state.is_dragging {
                    let dx = (screen_x - start_x).abs();
                    let dy = (screen_y - start_y).abs();
                    if dx >= Self::DRAG_THRESHOLD || dy >= Self::DRAG_THRESHOLD {
                        state.is_dragging = true;
                        state.renderer.set_dragging(true);
                    }
                }

                if state.is_dragging {
                    let rect = calc_selection_rect(start_x, start_y, screen_x, screen_y);
                    state.selection = Some(rect);
                    state.renderer.set_selection(Some(rect));
                    changed = true;
                }
            }
        });

        if changed {
            let _ = InvalidateRect(hwnd, None, false);
        }
    }

    unsafe fn handle_mouse_up(hwnd: HWND) {
        OVERLAY_STATE.with(|s| {
            if let Some(ref mut state) = *s.borrow_mut() {
                let was_dragging = state.is_dragging;
                state.is_dragging = false;
                state.drag_start = None;
                state.renderer.set_dragging(false);

                match state.selection {
                    Some(rect) if was_dragging && is_valid_selection(&rect) => {
                        state.result = Some(SelectionOutcome::Region(rect));
                    }
                    _ => {
                        // Too small: keep the overlay up for another try
                        state.selection = None;
                        state.renderer.set_selection(None);
                    }
                }
            }
        });

        let _ = InvalidateRect(hwnd, None, false);
    }
}
