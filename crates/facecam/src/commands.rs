//! Startup and one-shot work shared by the subcommands.

use crate::config::Config;
use crate::state::{Banner, BannerLevel};
use anyhow::{bail, Context, Result};
use facecam_core::annotator::{find_system_font, load_font};
use facecam_core::classifier::DEFAULT_TEMPERATURE;
use facecam_core::embedder::ARCFACE_MODEL_VERSION;
use facecam_core::{
    ChannelOrder, FaceDetector, FaceEmbedder, FaceRecogniser, Frame, FrameAnnotator, GalleryBuilder,
};
use facecam_models::{ArtifactRef, HubStore, Provisioned, Provisioner};
use image::{DynamicImage, ImageDecoder, ImageReader};
use std::path::{Path, PathBuf};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "webp"];

/// Make sure `artifacts` are in the model directory, downloading any that are absent.
pub fn provision(config: &Config, artifacts: &[ArtifactRef]) -> Result<Vec<Provisioned>> {
    let token = std::env::var("HF_TOKEN").ok().filter(|t| !t.is_empty());
    let store = HubStore::new(&config.hub_endpoint, token).context("failed to create hub client")?;
    let provisioner = Provisioner::new(store, &config.cache_dir, &config.model_dir);

    for artifact in artifacts {
        if !provisioner.destination(artifact).exists() {
            tracing::info!(file = %artifact.filename, "Downloading model from Hugging Face...");
        }
    }
    provisioner
        .ensure_all(artifacts)
        .context("model provisioning failed")
}

/// Success banners for the artifacts that had to be downloaded.
pub fn provision_banners(provisioned: &[Provisioned]) -> Vec<Banner> {
    provisioned
        .iter()
        .filter(|p| p.was_fetched())
        .map(|p| {
            let name = p.path().file_name().unwrap_or_default().to_string_lossy();
            Banner::new(BannerLevel::Success, format!("{name} downloaded and moved successfully!"))
        })
        .collect()
}

/// Load the recogniser and a label font.
///
/// A configured font must load; otherwise the first system font is tried and
/// labels are skipped when none is usable.
pub fn load_annotator(config: &Config) -> Result<FrameAnnotator<FaceRecogniser>> {
    let paths = config.recogniser_paths();
    let recogniser = FaceRecogniser::load(&paths).context("failed to load face recogniser")?;
    tracing::info!(
        classes = recogniser.classifier().classes.len(),
        classifier = %paths.classifier.display(),
        "face recogniser loaded"
    );
    let annotator = FrameAnnotator::new(recogniser);

    if let Some(path) = &config.font_path {
        let font =
            load_font(path).with_context(|| format!("failed to load font {}", path.display()))?;
        return Ok(annotator.with_font(font));
    }

    match find_system_font().map(|path| (load_font(&path), path)) {
        Some((Ok(font), path)) => {
            tracing::info!(font = %path.display(), "using system font for labels");
            Ok(annotator.with_font(font))
        }
        Some((Err(e), path)) => {
            tracing::warn!(
                font = %path.display(),
                error = %e,
                "system font unusable; labels will not be drawn"
            );
            Ok(annotator)
        }
        None => {
            tracing::warn!("no font found; labels will not be drawn (set font_path)");
            Ok(annotator)
        }
    }
}

/// Decode an image file as a frame carrying its EXIF orientation.
pub fn open_frame(path: &Path) -> Result<Frame> {
    let reader = ImageReader::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?
        .with_guessed_format()
        .with_context(|| format!("failed to read {}", path.display()))?;
    let mut decoder = reader
        .into_decoder()
        .with_context(|| format!("unsupported image {}", path.display()))?;
    let orientation = decoder.orientation()?;
    let image = DynamicImage::from_decoder(decoder)
        .with_context(|| format!("failed to decode {}", path.display()))?;
    Ok(Frame::from_rgb_image(image.into_rgb8(), ChannelOrder::Bgr).with_orientation(orientation))
}

/// Annotate one image file and write the result.
pub fn annotate_file(config: &Config, input: &Path, output: &Path) -> Result<()> {
    provision(config, &config.artifacts())?;
    let mut annotator = load_annotator(config)?;

    let frame = open_frame(input)?;
    let annotated = annotator.annotate(frame)?;
    annotated
        .into_rgb_image()?
        .save(output)
        .with_context(|| format!("failed to write {}", output.display()))
}

/// `(label, image)` pairs from a `DATASET/<label>/<image>` tree, in sorted order.
pub fn dataset_images(dataset: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut images = Vec::new();
    for dir in sorted_entries(dataset)? {
        if !dir.is_dir() {
            continue;
        }
        let Some(label) = dir.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            continue;
        };
        for file in sorted_entries(&dir)? {
            let is_image = file
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
            if file.is_file() && is_image {
                images.push((label.clone(), file));
            }
        }
    }
    Ok(images)
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = std::fs::read_dir(dir)
        .with_context(|| format!("failed to list {}", dir.display()))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()?;
    entries.sort();
    Ok(entries)
}

/// Summary of a gallery build.
#[derive(Debug)]
pub struct GalleryReport {
    pub classes: usize,
    pub used: usize,
    pub skipped: usize,
}

/// Embed the most confident face of every dataset image and write the gallery.
pub fn build_gallery(
    config: &Config,
    dataset: &Path,
    output: &Path,
    temperature: Option<f32>,
) -> Result<GalleryReport> {
    let images = dataset_images(dataset)?;
    if images.is_empty() {
        bail!("no images found under {}", dataset.display());
    }

    provision(config, &config.network_artifacts())?;
    let paths = config.recogniser_paths();
    let mut detector = FaceDetector::load(&paths.detector)?;
    let mut embedder = FaceEmbedder::load(&paths.embedder)?;

    let mut builder = GalleryBuilder::new();
    let mut skipped = 0;
    for (label, path) in &images {
        let mut frame = open_frame(path)?;
        frame.normalize_orientation();
        let image = frame.into_rgb_image()?;

        let faces = detector.detect(&image)?;
        let Some(best) = faces.iter().max_by(|a, b| a.confidence.total_cmp(&b.confidence)) else {
            tracing::warn!(image = %path.display(), "no face found, skipping");
            skipped += 1;
            continue;
        };
        let embedding = embedder.extract(&image, best)?;
        builder.add(label, &embedding)?;
        tracing::debug!(%label, image = %path.display(), confidence = best.confidence, "embedded");
    }

    if builder.is_empty() {
        bail!("no faces found in any image under {}", dataset.display());
    }

    let temperature = temperature.unwrap_or(DEFAULT_TEMPERATURE);
    let classifier = builder.build(ARCFACE_MODEL_VERSION, temperature)?;
    classifier
        .save(output)
        .with_context(|| format!("failed to write {}", output.display()))?;

    Ok(GalleryReport {
        classes: classifier.classes.len(),
        used: images.len() - skipped,
        skipped,
    })
}
