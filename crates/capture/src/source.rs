//! Frame sources: turn a capture target into one frame

use crate::frame::{Frame, FrameOrigin, RawBitmap};
use crate::{CaptureError, CaptureResult, CaptureTarget, Rect, WindowId};

/// Anything that can produce one frame for a capture target
pub trait FrameSource: Send {
    /// Whether the target still exists. Regions always do.
    fn target_exists(&self, target: &CaptureTarget) -> bool;

    /// Produce one frame
    fn grab(&mut self, target: &CaptureTarget) -> CaptureResult<Frame>;
}

/// Low-level platform calls used by [`Grabber`].
///
/// Implementations must release every OS handle they acquire before
/// returning, on success and on error.
pub trait CapturePlatform: Send {
    /// The handle still names a window
    fn window_exists(&self, window: WindowId) -> bool;

    /// The window is shown (minimized windows count as visible)
    fn window_visible(&self, window: WindowId) -> bool;

    /// Window rectangle in screen coordinates
    fn window_rect(&self, window: WindowId) -> CaptureResult<Rect>;

    /// Off-screen composited render of the whole window, unaffected by
    /// windows covering it
    fn render_window(&mut self, window: WindowId, width: u32, height: u32) -> CaptureResult<RawBitmap>;

    /// Copy of whatever is on screen inside `area`
    fn copy_screen(&mut self, area: Rect) -> CaptureResult<RawBitmap>;
}

/// Frame source that drives a [`CapturePlatform`].
///
/// Windows are captured through the composited render first and fall back
/// to an on-screen copy of the window rectangle.
pub struct Grabber<P> {
    platform: P,
}

impl<P: CapturePlatform> Grabber<P> {
    pub fn new(platform: P) -> Self {
        Self { platform }
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    fn grab_window(&mut self, window: WindowId) -> CaptureResult<Frame> {
        if !self.platform.window_exists(window) || !self.platform.window_visible(window) {
            return Err(CaptureError::TargetGone);
        }

        let rect = self.platform.window_rect(window)?;
        if rect.is_empty() {
            return Err(CaptureError::InvalidGeometry {
                width: rect.width as i64,
                height: rect.height as i64,
            });
        }

        match self.platform.render_window(window, rect.width, rect.height) {
            Ok(raw) => Frame::from_raw(raw, FrameOrigin::Composited),
            Err(CaptureError::TargetGone) => Err(CaptureError::TargetGone),
            Err(e) => {
                // Screen copy picks up anything covering the window
                log::debug!("composited render of {:#x} failed ({}), copying screen", window, e);
                let raw = self.platform.copy_screen(rect)?;
                Frame::from_raw(raw, FrameOrigin::ScreenCopy)
            }
        }
    }

    fn grab_region(&mut self, area: Rect) -> CaptureResult<Frame> {
        if area.is_empty() {
            return Err(CaptureError::InvalidGeometry {
                width: area.width as i64,
                height: area.height as i64,
            });
        }
        let raw = self.platform.copy_screen(area)?;
        Frame::from_raw(raw, FrameOrigin::Region)
    }
}

impl<P: CapturePlatform> FrameSource for Grabber<P> {
    fn target_exists(&self, target: &CaptureTarget) -> bool {
        match *target {
            CaptureTarget::Region(_) => true,
            CaptureTarget::Window(window) => self.platform.window_exists(window),
        }
    }

    fn grab(&mut self, target: &CaptureTarget) -> CaptureResult<Frame> {
        match *target {
            CaptureTarget::Region(area) => self.grab_region(area),
            CaptureTarget::Window(window) => self.grab_window(window),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;

    /// In-memory desktop: a solid-colored screen with windows stacked on it
    #[derive(Default)]
    pub(crate) struct FakeDesktop {
        pub screen_bgrx: [u8; 4],
        pub windows: HashMap<WindowId, FakeWindow>,
        pub composited_fails: bool,
        pub screen_copies: usize,
        pub renders: usize,
    }

    pub(crate) struct FakeWindow {
        pub rect: Rect,
        pub content_bgrx: [u8; 4],
        pub visible: bool,
        /// Index in the stack; higher is on top
        pub z: u32,
    }

    impl FakeDesktop {
        fn pixel_on_screen(&self, x: i32, y: i32) -> [u8; 4] {
            self.windows
                .values()
                .filter(|w| w.visible && w.rect.contains(x, y))
                .max_by_key(|w| w.z)
                .map(|w| w.content_bgrx)
                .unwrap_or(self.screen_bgrx)
        }
    }

    impl CapturePlatform for FakeDesktop {
        fn window_exists(&self, window: WindowId) -> bool {
            self.windows.contains_key(&window)
        }

        fn window_visible(&self, window: WindowId) -> bool {
            self.windows.get(&window).map(|w| w.visible).unwrap_or(false)
        }

        fn window_rect(&self, window: WindowId) -> CaptureResult<Rect> {
            self.windows
                .get(&window)
                .map(|w| w.rect)
                .ok_or_else(|| CaptureError::TransientCaptureFailure("no such window".into()))
        }

        fn render_window(&mut self, window: WindowId, width: u32, height: u32) -> CaptureResult<RawBitmap> {
            self.renders += 1;
            if self.composited_fails {
                return Err(CaptureError::TransientCaptureFailure("render refused".into()));
            }
            let content = self
                .windows
                .get(&window)
                .map(|w| w.content_bgrx)
                .ok_or(CaptureError::TargetGone)?;
            let data = content.repeat(width as usize * height as usize);
            Ok(RawBitmap::bgrx(data, width, height))
        }

        fn copy_screen(&mut self, area: Rect) -> CaptureResult<RawBitmap> {
            self.screen_copies += 1;
            let mut data = Vec::with_capacity(area.width as usize * area.height as usize * 4);
            for y in area.y..area.bottom() {
                for x in area.x..area.right() {
                    data.extend_from_slice(&self.pixel_on_screen(x, y));
                }
            }
            Ok(RawBitmap::bgrx(data, area.width, area.height))
        }
    }

    fn covered_desktop() -> FakeDesktop {
        let mut desktop = FakeDesktop {
            screen_bgrx: [0, 0, 0, 0],
            ..Default::default()
        };
        // Red window fully covered by a blue one
        desktop.windows.insert(
            0x100,
            FakeWindow {
                rect: Rect::new(10, 10, 40, 30),
                content_bgrx: [0, 0, 255, 0],
                visible: true,
                z: 1,
            },
        );
        desktop.windows.insert(
            0x200,
            FakeWindow {
                rect: Rect::new(0, 0, 100, 100),
                content_bgrx: [255, 0, 0, 0],
                visible: true,
                z: 2,
            },
        );
        desktop
    }

    #[test]
    fn region_grab_has_region_size_and_rgb_layout() {
        let mut grabber = Grabber::new(FakeDesktop {
            screen_bgrx: [30, 20, 10, 0],
            ..Default::default()
        });
        let target = CaptureTarget::region(Rect::new(0, 0, 200, 100)).unwrap();

        let frame = grabber.grab(&target).unwrap();

        assert_eq!(frame.width(), 200);
        assert_eq!(frame.height(), 100);
        assert_eq!(frame.data().len(), 60_000);
        assert_eq!(frame.pixel(199, 99), Some([10, 20, 30]));
        assert_eq!(frame.origin(), FrameOrigin::Region);
    }

    #[test]
    fn region_grab_matches_any_valid_size() {
        let mut grabber = Grabber::new(FakeDesktop::default());
        for (w, h) in [(1, 1), (3, 7), (17, 2), (640, 1)] {
            let target = CaptureTarget::region(Rect::new(-5, 4, w, h)).unwrap();
            let frame = grabber.grab(&target).unwrap();
            assert_eq!((frame.width(), frame.height()), (w, h));
            assert_eq!(frame.data().len(), (w * h * 3) as usize);
        }
    }

    #[test]
    fn covered_window_grab_returns_its_own_content() {
        let mut grabber = Grabber::new(covered_desktop());

        let frame = grabber.grab(&CaptureTarget::window(0x100)).unwrap();

        assert_eq!((frame.width(), frame.height()), (40, 30));
        assert_eq!(frame.origin(), FrameOrigin::Composited);
        assert_eq!(frame.pixel(20, 15), Some([255, 0, 0]));
        assert_eq!(grabber.platform().screen_copies, 0);
    }

    #[test]
    fn failed_render_falls_back_to_screen_copy() {
        let mut desktop = covered_desktop();
        desktop.composited_fails = true;
        let mut grabber = Grabber::new(desktop);

        let frame = grabber.grab(&CaptureTarget::window(0x100)).unwrap();

        // Degraded: the covering window shows through
        assert_eq!(frame.origin(), FrameOrigin::ScreenCopy);
        assert_eq!(frame.pixel(0, 0), Some([0, 0, 255]));
        assert_eq!(grabber.platform().renders, 1);
        assert_eq!(grabber.platform().screen_copies, 1);
    }

    #[test]
    fn missing_or_hidden_window_is_target_gone() {
        let mut desktop = covered_desktop();
        desktop.windows.get_mut(&0x200).unwrap().visible = false;
        let mut grabber = Grabber::new(desktop);

        assert!(matches!(
            grabber.grab(&CaptureTarget::window(0x999)),
            Err(CaptureError::TargetGone)
        ));
        assert!(matches!(
            grabber.grab(&CaptureTarget::window(0x200)),
            Err(CaptureError::TargetGone)
        ));
        assert!(!grabber.target_exists(&CaptureTarget::window(0x999)));
        assert!(grabber.target_exists(&CaptureTarget::Region(Rect::new(0, 0, 1, 1))));
    }

    #[test]
    fn zero_sized_window_is_invalid_geometry() {
        let mut desktop = covered_desktop();
        desktop.windows.get_mut(&0x100).unwrap().rect = Rect::new(10, 10, 0, 30);
        let mut grabber = Grabber::new(desktop);

        assert!(matches!(
            grabber.grab(&CaptureTarget::window(0x100)),
            Err(CaptureError::InvalidGeometry { width: 0, height: 30 })
        ));
        assert_eq!(grabber.platform().renders, 0);
    }
}
