//! Raw capture buffers to packed BGR: YUYV, MJPG and GREY.

use image::ImageFormat;

#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("invalid {format} buffer length: expected {expected}, got {actual}")]
    InvalidLength {
        format: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("MJPG decode failed: {0}")]
    Decode(#[from] image::ImageError),
}

/// Convert packed YUYV 4:2:2 to BGR using the BT.601 integer approximation.
///
/// Every 4 bytes `[Y0, U, Y1, V]` carry two pixels sharing one chroma pair.
pub fn yuyv_to_bgr(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, ConvertError> {
    let pixels = width as usize * height as usize;
    let expected = pixels * 2;
    if yuyv.len() < expected {
        return Err(ConvertError::InvalidLength {
            format: "YUYV",
            expected,
            actual: yuyv.len(),
        });
    }

    let mut bgr = Vec::with_capacity(pixels * 3);
    for chunk in yuyv[..expected].chunks_exact(4) {
        let (u, v) = (chunk[1], chunk[3]);
        bgr.extend_from_slice(&yuv_to_bgr(chunk[0], u, v));
        bgr.extend_from_slice(&yuv_to_bgr(chunk[2], u, v));
    }
    Ok(bgr)
}

fn yuv_to_bgr(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = 298 * (y as i32 - 16);
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clip = |x: i32| ((x + 128) >> 8).clamp(0, 255) as u8;
    [
        clip(c + 516 * d),
        clip(c - 100 * d - 208 * e),
        clip(c + 409 * e),
    ]
}

/// Replicate 8-bit grayscale into three channels.
pub fn grey_to_bgr(gray: &[u8], width: u32, height: u32) -> Result<Vec<u8>, ConvertError> {
    let expected = width as usize * height as usize;
    if gray.len() < expected {
        return Err(ConvertError::InvalidLength {
            format: "GREY",
            expected,
            actual: gray.len(),
        });
    }
    Ok(gray[..expected].iter().flat_map(|&g| [g, g, g]).collect())
}

/// Decode one MJPG frame to BGR. Returns the decoded dimensions, which the
/// stream does not guarantee to match the negotiated ones.
pub fn mjpeg_to_bgr(jpeg: &[u8]) -> Result<(Vec<u8>, u32, u32), ConvertError> {
    let rgb = image::load_from_memory_with_format(jpeg, ImageFormat::Jpeg)?.into_rgb8();
    let (width, height) = rgb.dimensions();
    let mut data = rgb.into_raw();
    facecam_core::frame::swap_red_blue(&mut data);
    Ok((data, width, height))
}
