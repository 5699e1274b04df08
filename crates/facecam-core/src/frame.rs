//! Color frame type, channel-order conversion and orientation normalization.

use image::metadata::Orientation;
use image::{DynamicImage, RgbImage};

/// Byte order of the three color channels in a packed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOrder {
    /// Blue, green, red: what the capture path delivers.
    Bgr,
    /// Red, green, blue: what the recognizer consumes.
    Rgb,
}

/// A packed 8-bit, three-channel frame (`width * height * 3` bytes).
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub order: ChannelOrder,
    /// Orientation the pixels must be transformed by to appear upright.
    /// Always `NoTransforms` for live capture.
    pub orientation: Orientation,
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid frame length for {width}x{height}: expected {expected}, got {actual}")]
    InvalidLength {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
}

impl Frame {
    pub fn new(
        data: Vec<u8>,
        width: u32,
        height: u32,
        order: ChannelOrder,
    ) -> Result<Self, FrameError> {
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(FrameError::InvalidLength {
                width,
                height,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            order,
            orientation: Orientation::NoTransforms,
        })
    }

    /// Wrap an RGB image, converting into `order`.
    pub fn from_rgb_image(image: RgbImage, order: ChannelOrder) -> Self {
        let (width, height) = image.dimensions();
        let frame = Self {
            data: image.into_raw(),
            width,
            height,
            order: ChannelOrder::Rgb,
            orientation: Orientation::NoTransforms,
        };
        frame.into_order(order)
    }

    pub fn with_orientation(mut self, orientation: Orientation) -> Self {
        self.orientation = orientation;
        self
    }

    /// Convert in place to `order`, swapping red and blue when they differ.
    pub fn into_order(mut self, order: ChannelOrder) -> Self {
        if self.order != order {
            swap_red_blue(&mut self.data);
            self.order = order;
        }
        self
    }

    /// Consume into an `RgbImage`, converting channel order if needed.
    pub fn into_rgb_image(self) -> Result<RgbImage, FrameError> {
        let (width, height) = (self.width, self.height);
        let expected = width as usize * height as usize * 3;
        let actual = self.data.len();
        RgbImage::from_raw(width, height, self.into_order(ChannelOrder::Rgb).data).ok_or(
            FrameError::InvalidLength {
                width,
                height,
                expected,
                actual,
            },
        )
    }

    /// Apply `self.orientation` to the pixel data and reset it to `NoTransforms`.
    ///
    /// Rotations by 90/270 degrees swap width and height.
    pub fn normalize_orientation(&mut self) {
        if self.orientation == Orientation::NoTransforms {
            return;
        }
        let orientation = self.orientation;
        let data = std::mem::take(&mut self.data);
        let Some(buffer) = RgbImage::from_raw(self.width, self.height, data) else {
            return;
        };
        // Channel semantics are irrelevant to a geometric transform.
        let mut image = DynamicImage::ImageRgb8(buffer);
        image.apply_orientation(orientation);
        let buffer = image.into_rgb8();
        self.width = buffer.width();
        self.height = buffer.height();
        self.data = buffer.into_raw();
        self.orientation = Orientation::NoTransforms;
    }
}

/// Swap the first and third byte of every 3-byte pixel.
pub fn swap_red_blue(data: &mut [u8]) {
    for px in data.chunks_exact_mut(3) {
        px.swap(0, 2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> Vec<u8> {
        (0..width * height * 3).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_new_rejects_wrong_length() {
        let err = Frame::new(vec![0; 10], 2, 2, ChannelOrder::Bgr).unwrap_err();
        assert!(matches!(err, FrameError::InvalidLength { expected: 12, actual: 10, .. }));
    }

    #[test]
    fn test_swap_red_blue() {
        let mut px = vec![1, 2, 3, 4, 5, 6];
        swap_red_blue(&mut px);
        assert_eq!(px, vec![3, 2, 1, 6, 5, 4]);
    }

    #[test]
    fn test_channel_round_trip_is_lossless() {
        let data = gradient(4, 3);
        let frame = Frame::new(data.clone(), 4, 3, ChannelOrder::Bgr).unwrap();
        let back = frame.into_order(ChannelOrder::Rgb).into_order(ChannelOrder::Bgr);
        assert_eq!(back.data, data);
    }

    #[test]
    fn test_into_rgb_image_swaps_bgr() {
        let frame = Frame::new(vec![10, 20, 30, 1, 2, 3], 2, 1, ChannelOrder::Bgr).unwrap();
        let rgb = frame.into_rgb_image().unwrap();
        assert_eq!(rgb.get_pixel(0, 0).0, [30, 20, 10]);
        assert_eq!(rgb.get_pixel(1, 0).0, [3, 2, 1]);
    }

    #[test]
    fn test_normalize_orientation_identity() {
        let data = gradient(3, 2);
        let mut frame = Frame::new(data.clone(), 3, 2, ChannelOrder::Bgr).unwrap();
        frame.normalize_orientation();
        assert_eq!(frame.data, data);
        assert_eq!((frame.width, frame.height), (3, 2));
    }

    #[test]
    fn test_normalize_orientation_rotate90_swaps_dimensions() {
        // 2x1 frame: pixel A then pixel B, left to right.
        let data = vec![1, 1, 1, 2, 2, 2];
        let mut frame = Frame::new(data, 2, 1, ChannelOrder::Rgb)
            .unwrap()
            .with_orientation(Orientation::Rotate90);
        frame.normalize_orientation();
        assert_eq!((frame.width, frame.height), (1, 2));
        assert_eq!(frame.orientation, Orientation::NoTransforms);
        // Clockwise rotation puts A on top.
        assert_eq!(frame.data, vec![1, 1, 1, 2, 2, 2]);
    }

    #[test]
    fn test_normalize_orientation_flip_horizontal() {
        let data = vec![1, 1, 1, 2, 2, 2];
        let mut frame = Frame::new(data, 2, 1, ChannelOrder::Rgb)
            .unwrap()
            .with_orientation(Orientation::FlipHorizontal);
        frame.normalize_orientation();
        assert_eq!(frame.data, vec![2, 2, 2, 1, 1, 1]);
    }
}
