//! GDI rendering for the selection overlay

use crate::screenshot::Screenshot;
use capture::Rect;
use std::mem::size_of;
use windows::Win32::Foundation::{COLORREF, HWND, RECT};
use windows::Win32::Graphics::Gdi::{
    BeginPaint, CreatePen, CreateSolidBrush, DeleteObject, EndPaint, FillRect, GetStockObject,
    IntersectClipRect, Rectangle, SelectClipRgn, SelectObject, SetBkMode, SetDIBitsToDevice,
    SetTextColor, TextOutW, BITMAPINFO, BITMAPINFOHEADER, BI_RGB, DIB_RGB_COLORS, HDC, HRGN,
    NULL_BRUSH, PAINTSTRUCT, PS_SOLID, TRANSPARENT,
};

const SELECTION_COLOR: COLORREF = COLORREF(0x0000_00FF); // Red
const SELECTION_THICKNESS: i32 = 2;

/// Overlay renderer
pub struct OverlayRenderer {
    screenshot: Screenshot,
    selection_rect: Option<Rect>,
    is_dragging: bool,
}

impl OverlayRenderer {
    pub fn new(screenshot: Screenshot) -> Self {
        Self {
            screenshot,
            selection_rect: None,
            is_dragging: false,
        }
    }

    /// Selection in screen coordinates
    pub fn set_selection(&mut self, rect: Option<Rect>) {
        self.selection_rect = rect;
    }

    pub fn set_dragging(&mut self, dragging: bool) {
        self.is_dragging = dragging;
    }

    /// Render to window
    pub fn render(&self, hwnd: HWND) {
        unsafe {
            let mut ps = PAINTSTRUCT::default();
            let hdc = BeginPaint(hwnd, &mut ps);

            self.draw_pixels(hdc, &self.screenshot.dimmed);

            if let Some(ref rect) = self.selection_rect {
                self.draw_selection(hdc, rect);
            }

            self.draw_info_bar(hdc);

            let _ = EndPaint(hwnd, &ps);
        }
    }

    unsafe fn draw_pixels(&self, hdc: HDC, pixels: &[u8]) {
        let width = self.screenshot.width as i32;
        let height = self.screenshot.height as i32;

        let bmi = BITMAPINFO {
            bmiHeader: BITMAPINFOHEADER {
                biSize: size_of::<BITMAPINFOHEADER>() as u32,
                biWidth: width,
                biHeight: -height, // Top-down
                biPlanes: 1,
                biBitCount: 32,
                biCompression: BI_RGB.0,
                biSizeImage: 0,
                biXPelsPerMeter: 0,
                biYPelsPerMeter: 0,
                biClrUsed: 0,
                biClrImportant: 0,
            },
            bmiColors: [Default::default()],
        };

        SetDIBitsToDevice(
            hdc,
            0,
            0,
            width as u32,
            height as u32,
            0,
            0,
            0,
            height as u32,
            pixels.as_ptr() as *const _,
            &bmi,
            DIB_RGB_COLORS,
        );
    }

    unsafe fn draw_selection(&self, hdc: HDC, rect: &Rect) {
        let (local_x, local_y) = self.screenshot.screen_to_local(rect.x, rect.y);
        let right = local_x + rect.width as i32;
        let bottom = local_y + rect.height as i32;

        // Undimmed pixels inside the selection
        IntersectClipRect(hdc, local_x, local_y, right, bottom);
        self.draw_pixels(hdc, &self.screenshot.data);
        SelectClipRgn(hdc, HRGN::default());

        let pen = CreatePen(PS_SOLID, SELECTION_THICKNESS, SELECTION_COLOR);
        let old_pen = SelectObject(hdc, pen);
        let old_brush = SelectObject(hdc, GetStockObject(NULL_BRUSH));

        let _ = Rectangle(hdc, local_x, local_y, right, bottom);

        SelectObject(hdc, old_brush);
        SelectObject(hdc, old_pen);
        let _ = DeleteObject(pen);

        let size_text: Vec<u16> = format!("{}x{}", rect.width, rect.height).encode_utf16().collect();

        SetBkMode(hdc, TRANSPARENT);
        SetTextColor(hdc, COLORREF(0x00FF_FFFF)); // White

        let _ = TextOutW(hdc, local_x + 4, bottom + 4, &size_text);
    }

    unsafe fn draw_info_bar(&self, hdc: HDC) {
        let bar_height = 32;
        let bar_top = self.screenshot.height as i32 - bar_height;

        let brush = CreateSolidBrush(COLORREF(0x0033_3333));
        let bar_rect = RECT {
            left: 0,
            top: bar_top,
            right: self.screenshot.width as i32,
            bottom: self.screenshot.height as i32,
        };
        FillRect(hdc, &bar_rect, brush);
        let _ = DeleteObject(brush);

        let text = if self.is_dragging {
            "Release to preview this area"
        } else {
            "Drag to select an area | Esc to cancel"
        };
        let text_wide: Vec<u16> = text.encode_utf16().collect();

        SetBkMode(hdc, TRANSPARENT);
        SetTextColor(hdc, COLORREF(0x00FF_FFFF));

        let _ = TextOutW(hdc, 10, bar_top + 8, &text_wide);
    }

    pub fn screenshot(&self) -> &Screenshot {
        &self.screenshot
    }
}
