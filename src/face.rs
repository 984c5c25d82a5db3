use std::{collections::BTreeMap, path::{Path, PathBuf}};

use image::{imageops, GrayImage, RgbImage};
use rustface::ImageData;
use tracing::{info, warn};

use crate::models::{FaceRegions, Rect, Region};

/// Bounding-box oracle. Boxes come back in detector order.
pub trait FaceDetector: Send + Sync {
    fn detect(&self, gray: &GrayImage) -> Vec<Rect>;
}

/// Used when no detector model is configured.
pub struct NoFaceDetector;

impl FaceDetector for NoFaceDetector {
    fn detect(&self, _gray: &GrayImage) -> Vec<Rect> { Vec::new() }
}

/// SeetaFace frontal detector backed by `rustface`.
pub struct SeetaFaceDetector {
    model_path: PathBuf,
    min_face_size: u32,
}

impl SeetaFaceDetector {
    pub fn new(model_path: impl AsRef<Path>) -> Self {
        Self { model_path: model_path.as_ref().to_path_buf(), min_face_size: 40 }
    }
}

impl FaceDetector for SeetaFaceDetector {
    fn detect(&self, gray: &GrayImage) -> Vec<Rect> {
        let Some(path) = self.model_path.to_str() else {
            warn!(path = %self.model_path.display(), "Face model path is not valid UTF-8");
            return Vec::new();
        };
        // rustface detectors are not Send, so one is built per call.
        let mut detector = match rustface::create_detector(path) {
            Ok(d) => d,
            Err(e) => {
                warn!("Failed to load face detector from {}: {}", path, e);
                return Vec::new();
            }
        };
        detector.set_min_face_size(self.min_face_size);
        detector.set_score_thresh(2.0);
        detector.set_pyramid_scale_factor(0.8);
        detector.set_slide_window_step(4, 4);

        let (width, height) = gray.dimensions();
        let data = ImageData::new(gray.as_raw(), width, height);
        detector
            .detect(&data)
            .iter()
            .map(|face| {
                let b = face.bbox();
                Rect::clipped(b.x() as i64, b.y() as i64, b.width() as i64, b.height() as i64, width, height)
            })
            .filter(|r| !r.is_empty())
            .collect()
    }
}

pub fn detector_from_config(model_path: Option<&Path>) -> Box<dyn FaceDetector> {
    match model_path {
        Some(path) if path.exists() => {
            info!(path = %path.display(), "Using SeetaFace detector");
            Box::new(SeetaFaceDetector::new(path))
        }
        Some(path) => {
            warn!(path = %path.display(), "Face model not found; regions will use whole-image thirds");
            Box::new(NoFaceDetector)
        }
        None => Box::new(NoFaceDetector),
    }
}

/// Splits the first detected face (or the whole image) into forehead/cheeks/chin thirds.
pub fn locate_regions(image: &RgbImage, detector: &dyn FaceDetector) -> FaceRegions {
    let (width, height) = image.dimensions();
    let gray = imageops::grayscale(image);
    let faces = detector.detect(&gray);

    match faces.first() {
        Some(face) => {
            let (x2, y2) = (face.x2.min(width), face.y2.min(height));
            let face = Rect::new(face.x1.min(x2), face.y1.min(y2), x2, y2);
            info!(?face, count = faces.len(), "Face detected");
            FaceRegions { face_detected: true, regions: split_thirds(face) }
        }
        None => {
            info!("No face detected; using whole-image regions");
            FaceRegions { face_detected: false, regions: split_thirds(Rect::new(0, 0, width, height)) }
        }
    }
}

fn split_thirds(area: Rect) -> BTreeMap<Region, Rect> {
    let h = area.height();
    let upper = area.y1 + h / 3;
    let lower = area.y1 + 2 * h / 3;
    BTreeMap::from([
        (Region::Forehead, Rect::new(area.x1, area.y1, area.x2, upper)),
        (Region::Cheeks, Rect::new(area.x1, upper, area.x2, lower)),
        (Region::Chin, Rect::new(area.x1, lower, area.x2, area.y2)),
    ])
}
