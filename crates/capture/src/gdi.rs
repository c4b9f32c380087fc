//! GDI capture platform
//!
//! Window capture uses `PrintWindow` with `PW_RENDERFULLCONTENT`, which asks
//! DWM for the window's own surface and therefore works for covered
//! windows. Screen copies use `BitBlt` from the desktop DC.
//!
//! Every handle is wrapped in a guard so it is released before the grab
//! returns, whichever way it returns.

use crate::frame::RawBitmap;
use crate::source::CapturePlatform;
use crate::{CaptureError, CaptureResult, Rect, WindowId};
use std::marker::PhantomData;
use std::mem::size_of;
use windows::Win32::Foundation::{HWND, RECT};
use windows::Win32::Graphics::Gdi::{
    BitBlt, CreateCompatibleBitmap, CreateCompatibleDC, DeleteDC, DeleteObject, GetDC,
    GetDIBits, GetWindowDC, ReleaseDC, SelectObject, BITMAPINFO, BITMAPINFOHEADER, BI_RGB,
    DIB_RGB_COLORS, HBITMAP, HDC, HGDIOBJ, SRCCOPY,
};
use windows::Win32::Storage::Xps::{PrintWindow, PRINT_WINDOW_FLAGS};
use windows::Win32::UI::WindowsAndMessaging::{GetWindowRect, IsWindow, IsWindowVisible};

/// Render DWM-composited content, including DirectComposition surfaces
const PW_RENDERFULLCONTENT: PRINT_WINDOW_FLAGS = PRINT_WINDOW_FLAGS(0x0000_0002);

pub(crate) fn hwnd_from_raw(raw: WindowId) -> HWND {
    HWND(raw as *mut std::ffi::c_void)
}

/// Windows GDI implementation of [`CapturePlatform`]
#[derive(Debug, Default, Clone, Copy)]
pub struct GdiPlatform;

impl GdiPlatform {
    pub fn new() -> Self {
        Self
    }
}

impl CapturePlatform for GdiPlatform {
    fn window_exists(&self, window: WindowId) -> bool {
        unsafe { IsWindow(hwnd_from_raw(window)).as_bool() }
    }

    fn window_visible(&self, window: WindowId) -> bool {
        unsafe { IsWindowVisible(hwnd_from_raw(window)).as_bool() }
    }

    fn window_rect(&self, window: WindowId) -> CaptureResult<Rect> {
        let mut rect = RECT::default();
        unsafe {
            GetWindowRect(hwnd_from_raw(window), &mut rect)?;
        }
        Rect::from_edges(rect.left, rect.top, rect.right, rect.bottom)
    }

    fn render_window(&mut self, window: WindowId, width: u32, height: u32) -> CaptureResult<RawBitmap> {
        let hwnd = hwnd_from_raw(window);
        let window_dc = DeviceContext::for_window(hwnd)?;
        let mem_dc = MemoryDc::compatible_with(&window_dc)?;
        let bitmap = Bitmap::compatible_with(&window_dc, width, height)?;

        {
            let _selected = Selection::select(&mem_dc, &bitmap)?;
            let rendered = unsafe { PrintWindow(hwnd, mem_dc.0, PW_RENDERFULLCONTENT) };
            if !rendered.as_bool() {
                return Err(CaptureError::TransientCaptureFailure(
                    "PrintWindow returned FALSE".into(),
                ));
            }
        }

        read_bits(&mem_dc, &bitmap)
    }

    fn copy_screen(&mut self, area: Rect) -> CaptureResult<RawBitmap> {
        let screen_dc = DeviceContext::for_screen()?;
        let mem_dc = MemoryDc::compatible_with(&screen_dc)?;
        let bitmap = Bitmap::compatible_with(&screen_dc, area.width, area.height)?;

        {
            let _selected = Selection::select(&mem_dc, &bitmap)?;
            unsafe {
                BitBlt(
                    mem_dc.0,
                    0,
                    0,
                    area.width as i32,
                    area.height as i32,
                    screen_dc.hdc,
                    area.x,
                    area.y,
                    SRCCOPY,
                )?;
            }
        }

        read_bits(&mem_dc, &bitmap)
    }
}

/// DC from `GetDC`/`GetWindowDC`, released with `ReleaseDC`
struct DeviceContext {
    window: HWND,
    hdc: HDC,
}

impl DeviceContext {
    fn for_screen() -> CaptureResult<Self> {
        let window = HWND::default();
        let hdc = unsafe { GetDC(window) };
        Self::checked(window, hdc, "GetDC")
    }

    fn for_window(window: HWND) -> CaptureResult<Self> {
        let hdc = unsafe { GetWindowDC(window) };
        Self::checked(window, hdc, "GetWindowDC")
    }

    fn checked(window: HWND, hdc: HDC, call: &str) -> CaptureResult<Self> {
        if hdc.is_invalid() {
            return Err(CaptureError::TransientCaptureFailure(format!("{} failed", call)));
        }
        Ok(Self { window, hdc })
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        unsafe {
            ReleaseDC(self.window, self.hdc);
        }
    }
}

/// Memory DC from `CreateCompatibleDC`, released with `DeleteDC`
struct MemoryDc(HDC);

impl MemoryDc {
    fn compatible_with(dc: &DeviceContext) -> CaptureResult<Self> {
        let hdc = unsafe { CreateCompatibleDC(dc.hdc) };
        if hdc.is_invalid() {
            return Err(CaptureError::TransientCaptureFailure(
                "CreateCompatibleDC failed".into(),
            ));
        }
        Ok(Self(hdc))
    }
}

impl Drop for MemoryDc {
    fn drop(&mut self) {
        unsafe {
            let _ = DeleteDC(self.0);
        }
    }
}

/// Device-dependent bitmap, released with `DeleteObject`
struct Bitmap {
    handle: HBITMAP,
    width: u32,
    height: u32,
}

impl Bitmap {
    fn compatible_with(dc: &DeviceContext, width: u32, height: u32) -> CaptureResult<Self> {
        if width == 0 || height == 0 || width > i32::MAX as u32 || height > i32::MAX as u32 {
            return Err(CaptureError::InvalidGeometry {
                width: width as i64,
                height: height as i64,
            });
        }
        let handle = unsafe { CreateCompatibleBitmap(dc.hdc, width as i32, height as i32) };
        if handle.is_invalid() {
            return Err(CaptureError::TransientCaptureFailure(format!(
                "CreateCompatibleBitmap({}x{}) failed",
                width, height
            )));
        }
        Ok(Self { handle, width, height })
    }
}

impl Drop for Bitmap {
    fn drop(&mut self) {
        unsafe {
            let _ = DeleteObject(self.handle);
        }
    }
}

/// Bitmap selected into a memory DC; the previous object is restored on drop
struct Selection<'a> {
    dc: HDC,
    previous: HGDIOBJ,
    _borrow: PhantomData<(&'a MemoryDc, &'a Bitmap)>,
}

impl<'a> Selection<'a> {
    fn select(dc: &'a MemoryDc, bitmap: &'a Bitmap) -> CaptureResult<Self> {
        let previous = unsafe { SelectObject(dc.0, bitmap.handle) };
        if previous.is_invalid() {
            return Err(CaptureError::TransientCaptureFailure("SelectObject failed".into()));
        }
        Ok(Self {
            dc: dc.0,
            previous,
            _borrow: PhantomData,
        })
    }
}

impl Drop for Selection<'_> {
    fn drop(&mut self) {
        unsafe {
            SelectObject(self.dc, self.previous);
        }
    }
}

/// Copy the bitmap out as top-down 32-bit BGRX.
///
/// The bitmap must not be selected into a DC at this point.
fn read_bits(dc: &MemoryDc, bitmap: &Bitmap) -> CaptureResult<RawBitmap> {
    let width = bitmap.width;
    let height = bitmap.height;

    let mut bmi = BITMAPINFO {
        bmiHeader: BITMAPINFOHEADER {
            biSize: size_of::<BITMAPINFOHEADER>() as u32,
            biWidth: width as i32,
            biHeight: -(height as i32), // Top-down DIB
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

    let stride = width as usize * 4;
    let mut data = vec![0u8; stride * height as usize];

    let lines = unsafe {
        GetDIBits(
            dc.0,
            bitmap.handle,
            0,
            height,
            Some(data.as_mut_ptr() as *mut _),
            &mut bmi,
            DIB_RGB_COLORS,
        )
    };
    if lines <= 0 {
        return Err(CaptureError::TransientCaptureFailure("GetDIBits failed".into()));
    }

    // A short read leaves a buffer the decoder will reject
    data.truncate(lines as usize * stride);

    Ok(RawBitmap {
        data,
        width,
        height,
        stride,
        bytes_per_pixel: 4,
    })
}
