use std::{collections::BTreeMap, path::PathBuf};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use image::RgbImage;
use serde::{Deserialize, Serialize};

/// A validated upload, normalized to 3-channel RGB. The encoded upload is
/// not kept once decoded; `size` records how large it was.
#[derive(Debug, Clone)]
pub struct UploadedPhoto {
    pub size: usize,
    pub mime_type: &'static str,
    pub filename: String,
    pub width: u32,
    pub height: u32,
    pub image: RgbImage,
}

/// Half-open pixel rectangle `[x1, x2) x [y1, y2)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl Rect {
    pub fn new(x1: u32, y1: u32, x2: u32, y2: u32) -> Self { Self { x1, y1, x2, y2 } }

    /// Builds a rect from signed detector coordinates, clipped to `width` x `height`.
    pub fn clipped(x: i64, y: i64, w: i64, h: i64, width: u32, height: u32) -> Self {
        let clamp_x = |v: i64| v.clamp(0, width as i64) as u32;
        let clamp_y = |v: i64| v.clamp(0, height as i64) as u32;
        Self { x1: clamp_x(x), y1: clamp_y(y), x2: clamp_x(x + w), y2: clamp_y(y + h) }
    }

    pub fn width(&self) -> u32 { self.x2.saturating_sub(self.x1) }
    pub fn height(&self) -> u32 { self.y2.saturating_sub(self.y1) }
    pub fn is_empty(&self) -> bool { self.width() == 0 || self.height() == 0 }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Region {
    Forehead,
    Cheeks,
    Chin,
}

impl Region {
    pub const ALL: [Region; 3] = [Region::Forehead, Region::Cheeks, Region::Chin];

    pub fn as_str(&self) -> &'static str {
        match self {
            Region::Forehead => "forehead",
            Region::Cheeks => "cheeks",
            Region::Chin => "chin",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FaceRegions {
    /// False when the whole-image thirds fallback was used.
    pub face_detected: bool,
    pub regions: BTreeMap<Region, Rect>,
}

impl FaceRegions {
    pub fn get(&self, region: Region) -> Option<&Rect> { self.regions.get(&region) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Grok,
    DeepSeek,
    Replicate,
}

impl BackendKind {
    pub const ALL: [BackendKind; 3] = [BackendKind::Grok, BackendKind::DeepSeek, BackendKind::Replicate];

    pub fn slug(&self) -> &'static str {
        match self {
            BackendKind::Grok => "grok",
            BackendKind::DeepSeek => "deepseek",
            BackendKind::Replicate => "replicate",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            BackendKind::Grok => "Grok-2-Vision-1212",
            BackendKind::DeepSeek => "DeepSeek-Vision-V3",
            BackendKind::Replicate => "DeepSeek VL2",
        }
    }

    pub fn model(&self) -> &'static str {
        match self {
            BackendKind::Grok => "grok-2-vision-1212",
            BackendKind::DeepSeek => "deepseek-vision-v3",
            BackendKind::Replicate => "deepseek-ai/deepseek-vl2:e5caf557dd9e5dcee46442e1315291ef1867f027991ede8ff95e304d4f734200",
        }
    }

    pub fn from_slug(slug: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.slug().eq_ignore_ascii_case(slug.trim()))
    }
}

/// Which vision backends an analysis run calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendSelection {
    #[default]
    All,
    Only(BackendKind),
}

impl BackendSelection {
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.trim().eq_ignore_ascii_case("all") {
            return Some(BackendSelection::All);
        }
        BackendKind::from_slug(raw).map(BackendSelection::Only)
    }

    /// Backends to call, given the configured ones.
    pub fn resolve(&self, configured: &[BackendKind]) -> Vec<BackendKind> {
        match self {
            BackendSelection::All => configured.to_vec(),
            BackendSelection::Only(kind) => configured.iter().copied().filter(|k| k == kind).collect(),
        }
    }
}

/// Outcome of one backend call, resolved at the API boundary.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BackendOutcome {
    Success { backend: BackendKind, text: String, saved_response: Option<PathBuf> },
    Failure { backend: BackendKind, reason: String },
}

impl BackendOutcome {
    pub fn backend(&self) -> BackendKind {
        match self {
            BackendOutcome::Success { backend, .. } | BackendOutcome::Failure { backend, .. } => *backend,
        }
    }

    pub fn is_success(&self) -> bool { matches!(self, BackendOutcome::Success { .. }) }

    /// The text shown for this slot: the analysis, or an explanatory placeholder.
    pub fn slot_text(&self) -> String {
        match self {
            BackendOutcome::Success { text, .. } => text.clone(),
            BackendOutcome::Failure { backend, reason } => {
                format!("{} API call failed; no analysis available. ({})", backend.display_name(), reason)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AnalysisResult {
    Success { outcomes: Vec<BackendOutcome> },
    Error { message: String, outcomes: Vec<BackendOutcome> },
}

impl AnalysisResult {
    pub fn from_outcomes(outcomes: Vec<BackendOutcome>) -> Self {
        if outcomes.iter().any(BackendOutcome::is_success) {
            return AnalysisResult::Success { outcomes };
        }
        let message = if outcomes.is_empty() {
            "no vision backend was available".to_string()
        } else {
            outcomes
                .iter()
                .map(|o| match o {
                    BackendOutcome::Failure { backend, reason } => format!("{}: {}", backend.slug(), reason),
                    BackendOutcome::Success { .. } => String::new(),
                })
                .collect::<Vec<_>>()
                .join("; ")
        };
        AnalysisResult::Error { message, outcomes }
    }

    pub fn is_success(&self) -> bool { matches!(self, AnalysisResult::Success { .. }) }

    pub fn outcomes(&self) -> &[BackendOutcome] {
        match self {
            AnalysisResult::Success { outcomes } | AnalysisResult::Error { outcomes, .. } => outcomes,
        }
    }

    /// Per-backend slot text keyed by backend slug.
    pub fn texts(&self) -> BTreeMap<&'static str, String> {
        self.outcomes().iter().map(|o| (o.backend().slug(), o.slot_text())).collect()
    }

    pub fn saved_response_paths(&self) -> BTreeMap<&'static str, PathBuf> {
        self.outcomes()
            .iter()
            .filter_map(|o| match o {
                BackendOutcome::Success { backend, saved_response: Some(p), .. } => Some((backend.slug(), p.clone())),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportSource {
    Generated,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub text: String,
    pub source: ReportSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartKind {
    Heatmap,
    Radar,
    Priority,
}

impl ChartKind {
    pub const ALL: [ChartKind; 3] = [ChartKind::Heatmap, ChartKind::Radar, ChartKind::Priority];

    pub fn file_name(&self) -> &'static str {
        match self {
            ChartKind::Heatmap => "face_heatmap.png",
            ChartKind::Radar => "radar_chart.png",
            ChartKind::Priority => "treatment_priority.png",
        }
    }

    pub fn from_slug(slug: &str) -> Option<Self> {
        match slug.trim_end_matches(".png") {
            "heatmap" => Some(ChartKind::Heatmap),
            "radar" => Some(ChartKind::Radar),
            "priority" => Some(ChartKind::Priority),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Treatment {
    pub name: String,
    pub priority: u8,
}

/// Chart files of one run; every chart is independently optional.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChartSet {
    pub run_dir: PathBuf,
    pub heatmap: Option<PathBuf>,
    pub radar: Option<PathBuf>,
    pub priority: Option<PathBuf>,
    pub severities: Vec<(Region, f32)>,
    pub radar_scores: Vec<(String, u8)>,
    pub treatments: Vec<Treatment>,
}

impl ChartSet {
    pub fn path(&self, kind: ChartKind) -> Option<&PathBuf> {
        match kind {
            ChartKind::Heatmap => self.heatmap.as_ref(),
            ChartKind::Radar => self.radar.as_ref(),
            ChartKind::Priority => self.priority.as_ref(),
        }
    }

    /// Charts in document order, skipping the ones that were not produced.
    pub fn available(&self) -> Vec<(ChartKind, &PathBuf)> {
        ChartKind::ALL.into_iter().filter_map(|k| self.path(k).map(|p| (k, p))).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportTier {
    #[default]
    Premium,
    Standard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FontKind {
    Unicode,
    Ascii,
}

#[derive(Debug, Clone)]
pub struct GeneratedDocument {
    pub bytes: Bytes,
    pub tier: ReportTier,
    pub font: FontKind,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DocumentRequest {
    #[serde(default)]
    pub tier: ReportTier,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendRequest {
    pub backend: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn one_success_makes_the_analysis_successful() {
        let result = AnalysisResult::from_outcomes(vec![
            BackendOutcome::Failure { backend: BackendKind::Grok, reason: "timeout".into() },
            BackendOutcome::Success { backend: BackendKind::DeepSeek, text: "ok".into(), saved_response: None },
        ]);
        assert!(result.is_success());
        let texts = result.texts();
        assert_eq!(texts["deepseek"], "ok");
        assert!(texts["grok"].contains("Grok-2-Vision-1212 API call failed"));
    }

    #[test]
    fn all_failures_make_an_error() {
        let result = AnalysisResult::from_outcomes(vec![
            BackendOutcome::Failure { backend: BackendKind::Grok, reason: "401".into() },
        ]);
        match &result {
            AnalysisResult::Error { message, .. } => assert_eq!(message, "grok: 401"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn selection_only_keeps_configured_backend() {
        let configured = [BackendKind::Grok, BackendKind::Replicate];
        assert_eq!(BackendSelection::All.resolve(&configured), configured.to_vec());
        assert!(BackendSelection::Only(BackendKind::DeepSeek).resolve(&configured).is_empty());
        assert_eq!(BackendSelection::parse("Replicate"), Some(BackendSelection::Only(BackendKind::Replicate)));
        assert_eq!(BackendSelection::parse("ALL"), Some(BackendSelection::All));
        assert_eq!(BackendSelection::parse("gpt"), None);
    }

    #[test]
    fn clipped_rect_stays_inside_image() {
        let r = Rect::clipped(-10, 5, 50, 500, 30, 100);
        assert_eq!(r, Rect::new(0, 5, 30, 100));
        assert_eq!(r.width(), 30);
    }
}
