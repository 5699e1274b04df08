//! The recognizer seam and its ONNX-backed implementation.

use crate::classifier::{Classifier, ClassifierError};
use crate::detector::{DetectorError, FaceDetector};
use crate::embedder::{EmbedderError, FaceEmbedder, ARCFACE_EMBEDDING_DIM, ARCFACE_MODEL_VERSION};
use crate::types::{Face, FaceBox};
use image::RgbImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecogniserError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("embedder: {0}")]
    Embedder(#[from] EmbedderError),
    #[error("classifier: {0}")]
    Classifier(#[from] ClassifierError),
}

/// Anything that can find and label faces in an RGB image.
///
/// Results are computed from the given image alone; implementations keep no
/// per-frame state.
pub trait Recogniser {
    fn recognise(&mut self, image: &RgbImage) -> Result<Vec<Face>, RecogniserError>;
}

/// Paths of the three artifacts that make up a [`FaceRecogniser`].
#[derive(Debug, Clone)]
pub struct RecogniserPaths {
    pub detector: PathBuf,
    pub embedder: PathBuf,
    pub classifier: PathBuf,
}

/// SCRFD detection, ArcFace embedding, nearest-centroid classification.
pub struct FaceRecogniser {
    detector: FaceDetector,
    embedder: FaceEmbedder,
    classifier: Classifier,
}

impl FaceRecogniser {
    /// Load all three artifacts. Fails fast on the first missing or invalid one.
    pub fn load(paths: &RecogniserPaths) -> Result<Self, RecogniserError> {
        let classifier = Classifier::load(&paths.classifier)?;
        classifier.check_dimension(ARCFACE_EMBEDDING_DIM)?;
        if classifier.embedding_model != ARCFACE_MODEL_VERSION {
            tracing::warn!(
                expected = ARCFACE_MODEL_VERSION,
                found = %classifier.embedding_model,
                "classifier was built with a different embedding model"
            );
        }

        let detector = FaceDetector::load(&paths.detector)?;
        let embedder = FaceEmbedder::load(&paths.embedder)?;

        Ok(Self {
            detector,
            embedder,
            classifier,
        })
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }
}

impl Recogniser for FaceRecogniser {
    fn recognise(&mut self, image: &RgbImage) -> Result<Vec<Face>, RecogniserError> {
        let detections = self.detector.detect(image)?;
        let mut faces = Vec::with_capacity(detections.len());

        for detection in &detections {
            let embedding = self.embedder.extract(image, detection)?;
            let all_predictions = self.classifier.predict(&embedding);
            // validate() guarantees at least one class
            let Some(top_prediction) = all_predictions.first().cloned() else {
                continue;
            };
            faces.push(Face {
                bb: FaceBox::from_detection(detection, image.width(), image.height()),
                top_prediction,
                all_predictions,
            });
        }

        tracing::debug!(faces = faces.len(), "recognised faces");
        Ok(faces)
    }
}

/// Artifact paths inside one model directory.
pub fn paths_in(
    model_dir: &Path,
    detector: &str,
    embedder: &str,
    classifier: &str,
) -> RecogniserPaths {
    RecogniserPaths {
        detector: model_dir.join(detector),
        embedder: model_dir.join(embedder),
        classifier: model_dir.join(classifier),
    }
}
