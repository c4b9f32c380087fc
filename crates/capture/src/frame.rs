//! Frame data and pixel normalization

use crate::{CaptureError, CaptureResult};
use image::flat::{FlatSamples, SampleLayout};
use image::imageops::{self, FilterType};
use image::{GenericImageView, Pixel, Rgb, RgbImage, Rgba};
use std::time::Instant;

/// Bytes per pixel of every normalized frame
pub const FRAME_BYTES_PER_PIXEL: usize = 3;

/// Which capture path produced a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOrigin {
    /// Direct copy of a screen region
    Region,
    /// Off-screen composited render of a window
    Composited,
    /// On-screen copy of a window's rectangle; may contain occluding windows
    ScreenCopy,
}

/// Pixel buffer as handed back by the platform, before normalization.
///
/// Pixels are blue-green-red(-unused), rows may be padded to `stride`.
#[derive(Debug, Clone)]
pub struct RawBitmap {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub stride: usize,
    pub bytes_per_pixel: usize,
}

impl RawBitmap {
    /// Tightly packed 32-bit BGRX bitmap
    pub fn bgrx(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            data,
            width,
            height,
            stride: width as usize * 4,
            bytes_per_pixel: 4,
        }
    }

    fn is_packed_bgrx(&self) -> bool {
        self.bytes_per_pixel == 4
            && self.data.len() == self.width as usize * self.height as usize * 4
    }
}

/// A captured frame: packed RGB, 3 bytes per pixel, no row padding.
///
/// Frames are never modified after creation; every frame owns its buffer.
#[derive(Debug, Clone)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    origin: FrameOrigin,
    captured_at: Instant,
}

impl Frame {
    /// Wrap an already packed RGB buffer
    pub fn from_rgb(width: u32, height: u32, data: Vec<u8>, origin: FrameOrigin) -> CaptureResult<Self> {
        if width == 0 || height == 0 {
            return Err(CaptureError::InvalidGeometry {
                width: width as i64,
                height: height as i64,
            });
        }
        let expected = width as usize * height as usize * FRAME_BYTES_PER_PIXEL;
        if data.len() != expected {
            return Err(CaptureError::DecodeFailure(format!(
                "RGB buffer is {} bytes, expected {}",
                data.len(),
                expected
            )));
        }
        Ok(Self {
            data,
            width,
            height,
            origin,
            captured_at: Instant::now(),
        })
    }

    /// Convert a platform bitmap to the canonical RGB layout
    pub fn from_raw(raw: RawBitmap, origin: FrameOrigin) -> CaptureResult<Self> {
        if raw.width == 0 || raw.height == 0 {
            return Err(CaptureError::InvalidGeometry {
                width: raw.width as i64,
                height: raw.height as i64,
            });
        }

        let data = if raw.is_packed_bgrx() {
            packed_bgrx_to_rgb(&raw.data)
        } else {
            log::debug!(
                "bitmap {}x{} has {} bytes (stride {}, {} bpp), using tolerant decode",
                raw.width,
                raw.height,
                raw.data.len(),
                raw.stride,
                raw.bytes_per_pixel
            );
            strided_to_rgb(&raw)?
        };

        Self::from_rgb(raw.width, raw.height, data, origin)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Bytes per row; frames are never padded
    pub fn stride(&self) -> usize {
        self.width as usize * FRAME_BYTES_PER_PIXEL
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn origin(&self) -> FrameOrigin {
        self.origin
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    /// RGB value at `(x, y)`
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = y as usize * self.stride() + x as usize * FRAME_BYTES_PER_PIXEL;
        Some([self.data[offset], self.data[offset + 1], self.data[offset + 2]])
    }

    /// Give up the frame and take its pixel buffer
    pub fn into_raw(self) -> Vec<u8> {
        self.data
    }

    pub fn to_rgb_image(&self) -> RgbImage {
        match RgbImage::from_raw(self.width, self.height, self.data.clone()) {
            Some(img) => img,
            // Length is validated on construction
            None => RgbImage::new(self.width, self.height),
        }
    }

    /// Bilinear downscale so the frame fits in `max_width` x `max_height`,
    /// keeping the aspect ratio. Frames that already fit are not upscaled.
    pub fn resize_to_fit(&self, max_width: u32, max_height: u32) -> RgbImage {
        let (width, height) = fit_size(self.width, self.height, max_width, max_height);
        let img = self.to_rgb_image();
        if width >= self.width && height >= self.height {
            return img;
        }
        imageops::resize(&img, width, height, FilterType::Triangle)
    }
}

/// Largest size with the source's aspect ratio that fits in the bounds.
/// Never returns a zero dimension.
pub fn fit_size(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (max_width.max(1), max_height.max(1));
    }
    let scale = (max_width as f64 / width as f64)
        .min(max_height as f64 / height as f64)
        .min(1.0);
    let fitted_w = ((width as f64 * scale).round() as u32).max(1);
    let fitted_h = ((height as f64 * scale).round() as u32).max(1);
    (fitted_w, fitted_h)
}

fn packed_bgrx_to_rgb(data: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(data.len() / 4 * FRAME_BYTES_PER_PIXEL);
    for px in data.chunks_exact(4) {
        rgb.extend_from_slice(&[px[2], px[1], px[0]]);
    }
    rgb
}

fn strided_to_rgb(raw: &RawBitmap) -> CaptureResult<Vec<u8>> {
    let layout = SampleLayout {
        channels: raw.bytes_per_pixel as u8,
        channel_stride: 1,
        width: raw.width,
        width_stride: raw.bytes_per_pixel,
        height: raw.height,
        height_stride: raw.stride,
    };
    let samples = FlatSamples {
        samples: raw.data.as_slice(),
        layout,
        color_hint: None,
    };

    match raw.bytes_per_pixel {
        4 => collect_rgb::<Rgba<u8>>(&samples),
        3 => collect_rgb::<Rgb<u8>>(&samples),
        other => Err(CaptureError::DecodeFailure(format!(
            "unsupported pixel size: {} bytes",
            other
        ))),
    }
}

fn collect_rgb<P>(samples: &FlatSamples<&[u8]>) -> CaptureResult<Vec<u8>>
where
    P: Pixel<Subpixel = u8>,
{
    if samples.layout.height_stride < samples.layout.width as usize * samples.layout.width_stride {
        return Err(CaptureError::DecodeFailure(format!(
            "stride {} is shorter than a row",
            samples.layout.height_stride
        )));
    }

    let view = samples
        .as_view::<P>()
        .map_err(|e| CaptureError::DecodeFailure(format!("{:?}", e)))?;

    let (width, height) = view.dimensions();
    let mut rgb = Vec::with_capacity(width as usize * height as usize * FRAME_BYTES_PER_PIXEL);
    for (_, _, px) in view.pixels() {
        // Source channel order is blue, green, red
        let ch = px.channels();
        rgb.extend_from_slice(&[ch[2], ch[1], ch[0]]);
    }
    Ok(rgb)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bgrx_gradient(width: u32, height: u32) -> Vec<u8> {
        let mut data = Vec::new();
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&[x as u8, y as u8, (x + y) as u8, 0xFF]);
            }
        }
        data
    }

    #[test]
    fn packed_bgrx_is_reordered_to_rgb() {
        let raw = RawBitmap::bgrx(vec![10, 20, 30, 0, 40, 50, 60, 0], 2, 1);
        let frame = Frame::from_raw(raw, FrameOrigin::Region).unwrap();

        assert_eq!(frame.data(), &[30, 20, 10, 60, 50, 40]);
        assert_eq!(frame.stride(), 6);
        assert_eq!(frame.origin(), FrameOrigin::Region);
    }

    #[test]
    fn row_padding_is_stripped() {
        let (width, height) = (3u32, 2u32);
        let stride = 16;
        let packed = bgrx_gradient(width, height);
        let mut padded = Vec::new();
        for row in packed.chunks_exact(width as usize * 4) {
            padded.extend_from_slice(row);
            padded.extend_from_slice(&[0xEE; 4]);
        }
        let raw = RawBitmap {
            data: padded,
            width,
            height,
            stride,
            bytes_per_pixel: 4,
        };

        let frame = Frame::from_raw(raw, FrameOrigin::Composited).unwrap();

        assert_eq!(frame.data().len(), 3 * 2 * 3);
        assert_eq!(frame.pixel(2, 1), Some([3, 1, 2]));
        assert_eq!(frame.pixel(0, 1), Some([1, 1, 0]));
        assert!(!frame.data().contains(&0xEE));
    }

    #[test]
    fn padded_buffer_without_trailing_padding_decodes() {
        // Last row carries no padding bytes
        let mut data = vec![1, 2, 3, 0, 0, 0];
        data.extend_from_slice(&[4, 5, 6]);
        let raw = RawBitmap {
            data,
            width: 1,
            height: 2,
            stride: 6,
            bytes_per_pixel: 3,
        };

        let frame = Frame::from_raw(raw, FrameOrigin::Region).unwrap();
        assert_eq!(frame.data(), &[3, 2, 1, 6, 5, 4]);
    }

    #[test]
    fn truncated_buffer_is_a_decode_failure() {
        let mut data = bgrx_gradient(4, 4);
        data.truncate(4 * 4 * 3);
        let raw = RawBitmap::bgrx(data, 4, 4);

        match Frame::from_raw(raw, FrameOrigin::Region) {
            Err(CaptureError::DecodeFailure(_)) => {}
            other => panic!("expected decode failure, got {:?}", other),
        }
    }

    #[test]
    fn stride_shorter_than_row_is_rejected() {
        let raw = RawBitmap {
            data: vec![0; 64],
            width: 4,
            height: 2,
            stride: 8,
            bytes_per_pixel: 4,
        };
        assert!(matches!(
            Frame::from_raw(raw, FrameOrigin::Region),
            Err(CaptureError::DecodeFailure(_))
        ));
    }

    #[test]
    fn zero_sized_bitmap_is_invalid_geometry() {
        let raw = RawBitmap::bgrx(Vec::new(), 0, 10);
        assert!(matches!(
            Frame::from_raw(raw, FrameOrigin::Region),
            Err(CaptureError::InvalidGeometry { .. })
        ));
    }

    #[test]
    fn from_rgb_validates_length() {
        assert!(Frame::from_rgb(2, 2, vec![0; 12], FrameOrigin::Region).is_ok());
        assert!(Frame::from_rgb(2, 2, vec![0; 11], FrameOrigin::Region).is_err());
    }

    #[test]
    fn fit_size_preserves_aspect_ratio() {
        assert_eq!(fit_size(200, 100, 100, 100), (100, 50));
        assert_eq!(fit_size(100, 200, 100, 100), (50, 100));
        assert_eq!(fit_size(50, 50, 400, 300), (50, 50));
        assert_eq!(fit_size(1000, 1, 10, 10), (10, 1));
    }

    #[test]
    fn resize_to_fit_downscales() {
        let frame = Frame::from_rgb(200, 100, vec![128; 200 * 100 * 3], FrameOrigin::Region).unwrap();
        let small = frame.resize_to_fit(50, 50);
        assert_eq!(small.dimensions(), (50, 25));
        let px = small.get_pixel(10, 10).0;
        assert!(px.iter().all(|&c| (127..=129).contains(&c)));

        let same = frame.resize_to_fit(400, 400);
        assert_eq!(same.dimensions(), (200, 100));
    }
}
