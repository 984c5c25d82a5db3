use std::{collections::BTreeMap, fmt, path::PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_with::skip_serializing_none;
use uuid::Uuid;

use crate::{
    error::WorkflowError,
    models::{
        AnalysisResult, BackendSelection, ChartKind, ChartSet, FaceRegions, FontKind, GeneratedDocument, Report,
        ReportSource, ReportTier, Treatment, UploadedPhoto,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    UploadPending,
    Analyzing,
    ReportReady,
    Viewing,
}

impl Stage {
    pub fn number(&self) -> u8 {
        match self {
            Stage::UploadPending => 1,
            Stage::Analyzing => 2,
            Stage::ReportReady => 3,
            Stage::Viewing => 4,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({})", self, self.number())
    }
}

/// Per-session context. Owned by the session mutex; handlers never share it.
#[derive(Debug)]
pub struct WorkflowState {
    pub id: Uuid,
    stage: Stage,
    pub photo: Option<UploadedPhoto>,
    pub regions: Option<FaceRegions>,
    pub analysis: Option<AnalysisResult>,
    pub report: Option<Report>,
    pub charts: Option<ChartSet>,
    pub document: Option<GeneratedDocument>,
    pub last_error: Option<String>,
    pub selection: BackendSelection,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowState {
    pub fn new(id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id,
            stage: Stage::UploadPending,
            photo: None,
            regions: None,
            analysis: None,
            report: None,
            charts: None,
            document: None,
            last_error: None,
            selection: BackendSelection::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn stage(&self) -> Stage { self.stage }

    /// Current scratch run directory, if charts were drawn.
    pub fn run_dir(&self) -> Option<&PathBuf> { self.charts.as_ref().map(|c| &c.run_dir) }

    /// Stores the message of `err` as the error indicator and hands it back.
    pub fn fail<E: fmt::Display>(&mut self, err: E) -> E {
        self.last_error = Some(err.to_string());
        self.updated_at = Utc::now();
        err
    }

    pub fn ensure(&mut self, action: &'static str, allowed: &[Stage]) -> Result<(), WorkflowError> {
        if allowed.contains(&self.stage) {
            return Ok(());
        }
        Err(self.fail(WorkflowError::WrongStage { action, stage: self.stage }))
    }

    fn advance(&mut self, stage: Stage) {
        self.stage = stage;
        self.last_error = None;
        self.updated_at = Utc::now();
    }

    pub fn accept_photo(&mut self, photo: UploadedPhoto, regions: FaceRegions) -> Result<(), WorkflowError> {
        self.ensure("upload", &[Stage::UploadPending])?;
        self.photo = Some(photo);
        self.regions = Some(regions);
        self.advance(Stage::Analyzing);
        Ok(())
    }

    /// Photo and regions needed by `analyze`.
    pub fn analysis_input(&mut self) -> Result<(&UploadedPhoto, &FaceRegions), WorkflowError> {
        self.ensure("analyze", &[Stage::Analyzing])?;
        if self.photo.is_none() || self.regions.is_none() {
            return Err(self.fail(WorkflowError::MissingPrerequisite("photo")));
        }
        match (self.photo.as_ref(), self.regions.as_ref()) {
            (Some(photo), Some(regions)) => Ok((photo, regions)),
            _ => Err(WorkflowError::MissingPrerequisite("photo")),
        }
    }

    /// Keeps the failed result for display; the stage stays at `Analyzing`.
    pub fn reject_analysis(&mut self, result: AnalysisResult, err: WorkflowError) -> WorkflowError {
        self.analysis = Some(result);
        self.report = None;
        self.fail(err)
    }

    pub fn accept_analysis(&mut self, result: AnalysisResult, report: Report) -> Result<(), WorkflowError> {
        self.ensure("analyze", &[Stage::Analyzing])?;
        self.analysis = Some(result);
        self.report = Some(report);
        self.advance(Stage::ReportReady);
        Ok(())
    }

    pub fn document_input(&mut self) -> Result<&Report, WorkflowError> {
        self.ensure("build document", &[Stage::ReportReady, Stage::Viewing])?;
        if self.report.is_none() {
            return Err(self.fail(WorkflowError::MissingPrerequisite("report")));
        }
        self.report.as_ref().ok_or(WorkflowError::MissingPrerequisite("report"))
    }

    /// Replaces any previous charts and document; returns the superseded run directory.
    pub fn accept_document(&mut self, charts: ChartSet, document: GeneratedDocument) -> Option<PathBuf> {
        let previous = self.charts.replace(charts).map(|c| c.run_dir);
        self.document = Some(document);
        self.advance(Stage::Viewing);
        previous.filter(|p| Some(p) != self.run_dir())
    }

    pub fn download(&mut self) -> Result<&GeneratedDocument, WorkflowError> {
        self.ensure("download", &[Stage::Viewing])?;
        if self.document.is_none() {
            return Err(self.fail(WorkflowError::MissingPrerequisite("document")));
        }
        self.document.as_ref().ok_or(WorkflowError::MissingPrerequisite("document"))
    }

    /// Back to stage 1. The backend selection survives; the scratch run
    /// directory to delete is returned.
    pub fn reset(&mut self) -> Option<PathBuf> {
        let run_dir = self.charts.take().map(|c| c.run_dir);
        self.photo = None;
        self.regions = None;
        self.analysis = None;
        self.report = None;
        self.document = None;
        self.advance(Stage::UploadPending);
        run_dir
    }

    pub fn set_selection(&mut self, selection: BackendSelection) {
        self.selection = selection;
        self.updated_at = Utc::now();
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            id: self.id,
            stage: self.stage.number(),
            stage_name: self.stage,
            backend: self.selection,
            photo: self.photo.as_ref().map(|p| PhotoView {
                filename: p.filename.clone(),
                mime_type: p.mime_type,
                width: p.width,
                height: p.height,
                size: p.size,
                face_detected: self.regions.as_ref().is_some_and(|r| r.face_detected),
            }),
            analysis: self.analysis.as_ref().map(|a| AnalysisView {
                success: a.is_success(),
                message: match a {
                    AnalysisResult::Error { message, .. } => Some(message.clone()),
                    AnalysisResult::Success { .. } => None,
                },
                texts: a.texts(),
                saved_responses: a.saved_response_paths(),
            }),
            report: self.report.as_ref().map(|r| ReportView { text: r.text.clone(), source: r.source }),
            charts: self.charts.as_ref().map(|c| ChartsView {
                available: c.available().into_iter().map(|(k, _)| k).collect(),
                radar_scores: c.radar_scores.clone(),
                treatments: c.treatments.clone(),
            }),
            document: self.document.as_ref().map(|d| DocumentView {
                tier: d.tier,
                font: d.font,
                size: d.bytes.len(),
                created_at: d.created_at,
            }),
            last_error: self.last_error.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[skip_serializing_none]
#[derive(Debug, Serialize)]
pub struct SessionView {
    pub id: Uuid,
    pub stage: u8,
    pub stage_name: Stage,
    pub backend: BackendSelection,
    pub photo: Option<PhotoView>,
    pub analysis: Option<AnalysisView>,
    pub report: Option<ReportView>,
    pub charts: Option<ChartsView>,
    pub document: Option<DocumentView>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct PhotoView {
    pub filename: String,
    pub mime_type: &'static str,
    pub width: u32,
    pub height: u32,
    pub size: usize,
    pub face_detected: bool,
}

#[skip_serializing_none]
#[derive(Debug, Serialize)]
pub struct AnalysisView {
    pub success: bool,
    pub message: Option<String>,
    pub texts: BTreeMap<&'static str, String>,
    pub saved_responses: BTreeMap<&'static str, PathBuf>,
}

#[derive(Debug, Serialize)]
pub struct ReportView {
    pub text: String,
    pub source: ReportSource,
}

#[derive(Debug, Serialize)]
pub struct ChartsView {
    pub available: Vec<ChartKind>,
    pub radar_scores: Vec<(String, u8)>,
    pub treatments: Vec<Treatment>,
}

#[derive(Debug, Serialize)]
pub struct DocumentView {
    pub tier: ReportTier,
    pub font: FontKind,
    pub size: usize,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BackendKind, BackendOutcome};
    use bytes::Bytes;
    use image::RgbImage;
    use pretty_assertions::assert_eq;

    fn photo() -> UploadedPhoto {
        UploadedPhoto {
            size: 3,
            mime_type: "image/png",
            filename: "face.png".into(),
            width: 120,
            height: 120,
            image: RgbImage::new(120, 120),
        }
    }

    fn regions() -> FaceRegions { FaceRegions { face_detected: false, regions: BTreeMap::new() } }

    fn success() -> AnalysisResult {
        AnalysisResult::from_outcomes(vec![BackendOutcome::Success {
            backend: BackendKind::Grok,
            text: "ok".into(),
            saved_response: None,
        }])
    }

    fn report() -> Report { Report { text: "report".into(), source: ReportSource::Generated } }

    fn document() -> GeneratedDocument {
        GeneratedDocument { bytes: Bytes::from_static(b"%PDF-1.3"), tier: ReportTier::Premium, font: FontKind::Ascii, created_at: Utc::now() }
    }

    fn charts(dir: &str) -> ChartSet { ChartSet { run_dir: PathBuf::from(dir), ..ChartSet::default() } }

    #[test]
    fn stage_display_names_the_stage() {
        assert_eq!(Stage::ReportReady.to_string(), "ReportReady (3)");
    }

    #[test]
    fn happy_path_walks_all_four_stages() {
        let mut state = WorkflowState::new(Uuid::new_v4());
        state.accept_photo(photo(), regions()).unwrap();
        assert_eq!(state.stage(), Stage::Analyzing);
        assert!(state.analysis_input().is_ok());
        state.accept_analysis(success(), report()).unwrap();
        assert_eq!(state.stage(), Stage::ReportReady);
        assert_eq!(state.document_input().unwrap().text, "report");
        assert_eq!(state.accept_document(charts("/tmp/run_a"), document()), None);
        assert_eq!(state.stage(), Stage::Viewing);
        assert!(state.download().is_ok());
        assert!(state.last_error.is_none());
    }

    #[test]
    fn refused_transitions_record_the_error_and_keep_the_stage() {
        let mut state = WorkflowState::new(Uuid::new_v4());
        let err = state.download().unwrap_err();
        assert!(matches!(err, WorkflowError::WrongStage { action: "download", stage: Stage::UploadPending }));
        assert_eq!(state.stage(), Stage::UploadPending);
        assert!(state.last_error.as_deref().unwrap().contains("download"));

        state.accept_photo(photo(), regions()).unwrap();
        assert!(state.accept_photo(photo(), regions()).is_err());
        assert!(state.document_input().is_err());
        assert_eq!(state.stage(), Stage::Analyzing);
    }

    #[test]
    fn failed_analysis_stays_in_analyzing_with_indicator() {
        let mut state = WorkflowState::new(Uuid::new_v4());
        state.accept_photo(photo(), regions()).unwrap();
        let failed = AnalysisResult::from_outcomes(vec![BackendOutcome::Failure { backend: BackendKind::Grok, reason: "503".into() }]);
        state.reject_analysis(failed, WorkflowError::AnalysisFailed("grok: 503".into()));
        assert_eq!(state.stage(), Stage::Analyzing);
        assert!(state.last_error.is_some());
        let view = state.view();
        assert!(!view.analysis.unwrap().success);

        state.accept_analysis(success(), report()).unwrap();
        assert!(state.last_error.is_none());
    }

    #[test]
    fn rebuilding_the_document_hands_back_the_old_run() {
        let mut state = WorkflowState::new(Uuid::new_v4());
        state.accept_photo(photo(), regions()).unwrap();
        state.accept_analysis(success(), report()).unwrap();
        state.accept_document(charts("/tmp/run_a"), document());
        let old = state.accept_document(charts("/tmp/run_b"), document());
        assert_eq!(old, Some(PathBuf::from("/tmp/run_a")));
        assert_eq!(state.run_dir(), Some(&PathBuf::from("/tmp/run_b")));
    }

    #[test]
    fn reset_clears_entities_but_keeps_backend_selection() {
        let mut state = WorkflowState::new(Uuid::new_v4());
        state.set_selection(BackendSelection::Only(BackendKind::DeepSeek));
        state.accept_photo(photo(), regions()).unwrap();
        state.accept_analysis(success(), report()).unwrap();
        state.accept_document(charts("/tmp/run_a"), document());
        state.last_error = Some("stale".into());

        assert_eq!(state.reset(), Some(PathBuf::from("/tmp/run_a")));
        assert_eq!(state.stage(), Stage::UploadPending);
        assert!(state.photo.is_none() && state.analysis.is_none() && state.report.is_none());
        assert!(state.document.is_none() && state.charts.is_none() && state.last_error.is_none());
        assert_eq!(state.selection, BackendSelection::Only(BackendKind::DeepSeek));
    }

    #[test]
    fn view_serializes_stage_number_and_skips_empty_parts() {
        let state = WorkflowState::new(Uuid::new_v4());
        let json = serde_json::to_value(state.view()).unwrap();
        assert_eq!(json["stage"], 1);
        assert_eq!(json["stage_name"], "upload_pending");
        assert_eq!(json["backend"], "all");
        assert!(json.get("photo").is_none());
        assert!(json.get("last_error").is_none());
    }
}
