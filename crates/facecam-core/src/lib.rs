//! facecam-core: Face recognition and frame annotation.
//!
//! SCRFD finds faces, ArcFace embeds them, and a nearest-centroid gallery
//! names them; both networks run on CPU via ONNX Runtime. The annotator
//! draws the results onto capture frames.

pub mod alignment;
pub mod annotator;
pub mod classifier;
pub mod detector;
pub mod embedder;
pub mod frame;
pub mod recogniser;
pub mod types;

pub use annotator::{AnnotateError, FrameAnnotator};
pub use classifier::{Classifier, GalleryBuilder};
pub use detector::FaceDetector;
pub use embedder::FaceEmbedder;
pub use frame::{ChannelOrder, Frame, FrameError};
pub use image::metadata::Orientation;
pub use recogniser::{FaceRecogniser, Recogniser, RecogniserError, RecogniserPaths};
pub use types::{BoundingBox, Embedding, Face, FaceBox, Prediction};
