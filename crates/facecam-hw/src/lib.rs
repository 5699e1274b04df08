//! facecam-hw: Camera capture.
//!
//! Opens a V4L2 device by index, negotiates YUYV/MJPG/GREY and delivers
//! packed BGR frames.

pub mod camera;
pub mod convert;

pub use camera::{Camera, CameraError, DeviceInfo, FrameSource, PixelFormat};
pub use convert::ConvertError;
