//! Frozen virtual desktop snapshot shown behind the selection

/// Brightness kept when dimming, out of 255
const DIM_LEVEL: u32 = 155;

/// Screenshot data, 32-bit BGRX, top-down
pub struct Screenshot {
    pub data: Vec<u8>,
    /// Same pixels darkened, drawn outside the selection
    pub dimmed: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub virtual_left: i32,
    pub virtual_top: i32,
}

impl Screenshot {
    pub fn from_bgrx(data: Vec<u8>, width: u32, height: u32, virtual_left: i32, virtual_top: i32) -> Self {
        let dimmed = dim_bgrx(&data);
        Self {
            data,
            dimmed,
            width,
            height,
            virtual_left,
            virtual_top,
        }
    }

    /// Capture the entire virtual desktop
    #[cfg(windows)]
    pub fn capture_virtual_desktop() -> crate::OverlayResult<Self> {
        use capture::{CapturePlatform, GdiPlatform};

        let vd = get_virtual_desktop_rect();
        let raw = GdiPlatform::new().copy_screen(vd)?;

        let expected = vd.width as usize * vd.height as usize * 4;
        if raw.data.len() != expected {
            return Err(crate::OverlayError::Screenshot(format!(
                "got {} bytes for a {}x{} desktop",
                raw.data.len(),
                vd.width,
                vd.height
            )));
        }

        Ok(Self::from_bgrx(raw.data, raw.width, raw.height, vd.x, vd.y))
    }

    /// Convert screen coordinates to screenshot coordinates
    pub fn screen_to_local(&self, x: i32, y: i32) -> (i32, i32) {
        (x - self.virtual_left, y - self.virtual_top)
    }

    /// Convert screenshot coordinates to screen coordinates
    pub fn local_to_screen(&self, x: i32, y: i32) -> (i32, i32) {
        (x + self.virtual_left, y + self.virtual_top)
    }
}

/// Darken every color channel, leaving the unused fourth byte alone
pub fn dim_bgrx(data: &[u8]) -> Vec<u8> {
    let mut out = data.to_vec();
    for px in out.chunks_exact_mut(4) {
        for c in &mut px[..3] {
            *c = (*c as u32 * DIM_LEVEL / 255) as u8;
        }
    }
    out
}

/// Get virtual desktop bounds
#[cfg(windows)]
pub fn get_virtual_desktop_rect() -> capture::Rect {
    use windows::Win32::UI::WindowsAndMessaging::{
        GetSystemMetrics, SM_CXVIRTUALSCREEN, SM_CYVIRTUALSCREEN, SM_XVIRTUALSCREEN,
        SM_YVIRTUALSCREEN,
    };

    unsafe {
        capture::Rect::new(
            GetSystemMetrics(SM_XVIRTUALSCREEN),
            GetSystemMetrics(SM_YVIRTUALSCREEN),
            GetSystemMetrics(SM_CXVIRTUALSCREEN).max(0) as u32,
            GetSystemMetrics(SM_CYVIRTUALSCREEN).max(0) as u32,
        )
    }
}
