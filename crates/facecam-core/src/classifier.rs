//! Nearest-centroid face classifier and its on-disk gallery format.
//!
//! The gallery (`face_recogniser.json`) holds one L2-normalized centroid per
//! person. A query embedding is scored against every centroid by cosine
//! similarity, and the scores are turned into probabilities with a softmax
//! at the gallery's temperature.

use crate::types::{cosine, Embedding, Prediction};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const GALLERY_FORMAT_VERSION: u32 = 1;
pub const DEFAULT_TEMPERATURE: f32 = 0.05;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("classifier file not found: {0}")]
    NotFound(PathBuf),
    #[error("failed to read classifier {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse classifier {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("unsupported classifier format version {0}")]
    UnsupportedVersion(u32),
    #[error("classifier has no classes")]
    Empty,
    #[error("class {label:?} has a {actual}-dim centroid, expected {expected}")]
    DimensionMismatch {
        label: String,
        expected: usize,
        actual: usize,
    },
    #[error("temperature must be positive, got {0}")]
    InvalidTemperature(f32),
}

/// One enrolled identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassCentroid {
    pub label: String,
    pub centroid: Vec<f32>,
    /// Number of embeddings averaged into the centroid.
    #[serde(default)]
    pub samples: usize,
}

/// Serialized gallery plus prediction logic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classifier {
    pub format_version: u32,
    pub embedding_model: String,
    pub temperature: f32,
    pub classes: Vec<ClassCentroid>,
}

impl Classifier {
    /// Read and validate a gallery file.
    pub fn load(path: &Path) -> Result<Self, ClassifierError> {
        if !path.exists() {
            return Err(ClassifierError::NotFound(path.to_path_buf()));
        }
        let raw = std::fs::read_to_string(path).map_err(|source| ClassifierError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let classifier: Self = serde_json::from_str(&raw).map_err(|source| ClassifierError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        classifier.validate()?;

        tracing::info!(
            path = %path.display(),
            classes = classifier.classes.len(),
            embedding_model = %classifier.embedding_model,
            "loaded face classifier"
        );
        Ok(classifier)
    }

    pub fn save(&self, path: &Path) -> Result<(), ClassifierError> {
        let io_err = |source: std::io::Error| ClassifierError::Io {
            path: path.to_path_buf(),
            source,
        };
        let json = serde_json::to_string_pretty(self).map_err(|e| io_err(e.into()))?;
        std::fs::write(path, json).map_err(io_err)
    }

    pub fn validate(&self) -> Result<(), ClassifierError> {
        if self.format_version != GALLERY_FORMAT_VERSION {
            return Err(ClassifierError::UnsupportedVersion(self.format_version));
        }
        if !(self.temperature > 0.0) {
            return Err(ClassifierError::InvalidTemperature(self.temperature));
        }
        let first = self.classes.first().ok_or(ClassifierError::Empty)?;
        self.check_dimension(first.centroid.len())
    }

    /// Ensure every centroid has `expected` dimensions.
    pub fn check_dimension(&self, expected: usize) -> Result<(), ClassifierError> {
        match self.classes.iter().find(|c| c.centroid.len() != expected) {
            Some(c) => Err(ClassifierError::DimensionMismatch {
                label: c.label.clone(),
                expected,
                actual: c.centroid.len(),
            }),
            None => Ok(()),
        }
    }

    /// All class predictions for `query`, sorted by descending confidence.
    ///
    /// Confidences sum to 1. Empty only if the classifier has no classes.
    pub fn predict(&self, query: &Embedding) -> Vec<Prediction> {
        let logits: Vec<f32> = self
            .classes
            .iter()
            .map(|c| cosine(&query.values, &c.centroid) / self.temperature)
            .collect();

        let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let exp: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
        let total: f32 = exp.iter().sum();

        let mut predictions: Vec<Prediction> = self
            .classes
            .iter()
            .zip(exp)
            .map(|(c, e)| Prediction {
                label: c.label.clone(),
                confidence: if total > 0.0 { e / total } else { 0.0 },
            })
            .collect();
        predictions.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        predictions
    }
}

/// Accumulates labeled embeddings into per-class centroids.
#[derive(Debug, Default)]
pub struct GalleryBuilder {
    sums: BTreeMap<String, (Vec<f32>, usize)>,
}

impl GalleryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, label: &str, embedding: &Embedding) -> Result<(), ClassifierError> {
        let (sum, count) = self
            .sums
            .entry(label.to_string())
            .or_insert_with(|| (vec![0.0; embedding.values.len()], 0));
        if sum.len() != embedding.values.len() {
            return Err(ClassifierError::DimensionMismatch {
                label: label.to_string(),
                expected: sum.len(),
                actual: embedding.values.len(),
            });
        }
        sum.iter_mut().zip(&embedding.values).for_each(|(s, v)| *s += v);
        *count += 1;
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.sums.is_empty()
    }

    /// Average, normalize and validate. Classes are ordered by label.
    pub fn build(
        self,
        embedding_model: &str,
        temperature: f32,
    ) -> Result<Classifier, ClassifierError> {
        let classes = self
            .sums
            .into_iter()
            .map(|(label, (sum, samples))| {
                let mut centroid = Embedding { values: sum, model_version: None };
                centroid.normalize();
                ClassCentroid {
                    label,
                    centroid: centroid.values,
                    samples,
                }
            })
            .collect();

        let classifier = Classifier {
            format_version: GALLERY_FORMAT_VERSION,
            embedding_model: embedding_model.to_string(),
            temperature,
            classes,
        };
        classifier.validate()?;
        Ok(classifier)
    }
}
