//! Per-frame annotation: run the recogniser and draw boxes and labels.

use crate::frame::{ChannelOrder, Frame, FrameError};
use crate::recogniser::{Recogniser, RecogniserError};
use crate::types::{Face, Prediction};
use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Green in both BGR and RGB.
const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const BOX_THICKNESS: i32 = 2;
const LABEL_HEIGHT: f32 = 16.0;
/// Gap between the label baseline and the box's top edge.
const LABEL_OFFSET: i32 = 10;

/// Fonts tried when no font path is configured.
const SYSTEM_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu-sans-fonts/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/noto/NotoSans-Regular.ttf",
];

#[derive(Error, Debug)]
pub enum AnnotateError {
    #[error("recogniser: {0}")]
    Recogniser(#[from] RecogniserError),
    #[error("frame: {0}")]
    Frame(#[from] FrameError),
    #[error("failed to read font {path}: {source}")]
    FontIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("not a usable font file: {0}")]
    InvalidFont(PathBuf),
}

/// Runs a recogniser over frames and draws its results onto them.
pub struct FrameAnnotator<R> {
    recogniser: R,
    font: Option<FontVec>,
}

impl<R: Recogniser> FrameAnnotator<R> {
    /// An annotator that draws boxes only. Add a font with [`with_font`](Self::with_font).
    pub fn new(recogniser: R) -> Self {
        Self { recogniser, font: None }
    }

    pub fn with_font(mut self, font: FontVec) -> Self {
        self.font = Some(font);
        self
    }

    pub fn recogniser_mut(&mut self) -> &mut R {
        &mut self.recogniser
    }

    /// Recognise faces in `frame` and draw them onto it.
    ///
    /// The frame keeps its channel order. Its orientation is normalized first,
    /// which is a no-op for live capture. Frames without faces come back
    /// byte-identical.
    pub fn annotate(&mut self, mut frame: Frame) -> Result<Frame, AnnotateError> {
        let mut working = frame.clone().into_order(ChannelOrder::Rgb);
        working.normalize_orientation();
        frame.normalize_orientation();

        let faces = self.recogniser.recognise(&working.into_rgb_image()?)?;
        if faces.is_empty() {
            return Ok(frame);
        }

        let order = frame.order;
        // Drawing colors are order-agnostic, so the buffer is wrapped as-is.
        let mut canvas = frame_canvas(frame)?;
        for face in &faces {
            draw_face(&mut canvas, face, self.font.as_ref());
        }

        let (width, height) = canvas.dimensions();
        Ok(Frame::new(canvas.into_raw(), width, height, order)?)
    }
}

fn frame_canvas(frame: Frame) -> Result<RgbImage, FrameError> {
    let (width, height) = (frame.width, frame.height);
    let actual = frame.data.len();
    RgbImage::from_raw(width, height, frame.data).ok_or(FrameError::InvalidLength {
        width,
        height,
        expected: width as usize * height as usize * 3,
        actual,
    })
}

/// Draw one face: a rectangle on its box edges and a label above it.
pub fn draw_face(canvas: &mut RgbImage, face: &Face, font: Option<&FontVec>) {
    let bb = face.bb;
    for inset in 0..BOX_THICKNESS {
        let (left, top) = (bb.left + inset, bb.top + inset);
        let (right, bottom) = (bb.right - inset, bb.bottom - inset);
        if right < left || bottom < top {
            break;
        }
        let size = ((right - left + 1) as u32, (bottom - top + 1) as u32);
        let rect = Rect::at(left, top).of_size(size.0, size.1);
        draw_hollow_rect_mut(canvas, rect, BOX_COLOR);
    }

    if let Some(font) = font {
        let text = label_text(&face.top_prediction);
        let y = bb.top - LABEL_OFFSET - LABEL_HEIGHT as i32;
        draw_text_mut(canvas, BOX_COLOR, bb.left, y, PxScale::from(LABEL_HEIGHT), font, &text);
    }
}

/// `label (0.93)`: the confidence to two decimals.
pub fn label_text(prediction: &Prediction) -> String {
    format!("{} ({:.2})", prediction.label, prediction.confidence)
}

/// Load a TrueType/OpenType font for labels.
pub fn load_font(path: &Path) -> Result<FontVec, AnnotateError> {
    let bytes = std::fs::read(path).map_err(|source| AnnotateError::FontIo {
        path: path.to_path_buf(),
        source,
    })?;
    FontVec::try_from_vec(bytes).map_err(|_| AnnotateError::InvalidFont(path.to_path_buf()))
}

/// First well-known system font that exists on this machine.
pub fn find_system_font() -> Option<PathBuf> {
    SYSTEM_FONTS.iter().map(PathBuf::from).find(|p| p.exists())
}
