//! Session actions. Each one takes the locked session state, calls the
//! services it needs and moves the state forward or records why it could not.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use bytes::Bytes;
use reqwest::Client;
use tracing::{error, info};

use crate::{
    charts::{label_font, ChartBuilder, ScoreLabels},
    config::AppConfig,
    error::{ApiError, WorkflowError},
    face::{detector_from_config, locate_regions, FaceDetector},
    models::{BackendSelection, ChartKind, GeneratedDocument, ReportTier},
    pdf::{assemble, FontRegistry},
    report::{combine_analysis, DeepSeekChat, ReportGenerator, TextCompletion},
    scratch::{remove_with_retry, ScratchSpace},
    validator::validate_upload,
    vision::VisionClient,
    workflow::{Stage, WorkflowState},
};

pub struct Services {
    pub vision: VisionClient,
    pub reports: ReportGenerator,
    pub detector: Box<dyn FaceDetector>,
    pub charts: Arc<ChartBuilder>,
    pub scratch: ScratchSpace,
    pub fonts: &'static FontRegistry,
}

impl Services {
    pub fn from_config(config: &AppConfig, client: &Client) -> Result<Self, regex::Error> {
        let text_backend = config.deepseek.clone().map(|endpoint| {
            let chat: Arc<dyn TextCompletion> = Arc::new(DeepSeekChat::new(client.clone(), endpoint));
            chat
        });
        let fonts = FontRegistry::global();
        let capability = fonts.register(&config.font_path);
        Ok(Self {
            vision: VisionClient::from_config(config, client),
            reports: ReportGenerator::new(text_backend),
            detector: detector_from_config(config.face_model_path.as_deref()),
            charts: Arc::new(ChartBuilder::new(&ScoreLabels::default(), label_font(&capability))?),
            scratch: ScratchSpace::new(&config.scratch_dir),
            fonts,
        })
    }
}

pub async fn upload(services: &Services, state: &mut WorkflowState, bytes: Bytes, filename: &str) -> Result<(), ApiError> {
    state.ensure("upload", &[Stage::UploadPending])?;
    let photo = validate_upload(bytes, filename).map_err(|e| state.fail(e))?;
    let regions = locate_regions(&photo.image, services.detector.as_ref());
    info!(
        "📷 Photo accepted: {} {}x{} (face detected: {})",
        photo.filename, photo.width, photo.height, regions.face_detected
    );
    state.accept_photo(photo, regions)?;
    Ok(())
}

pub async fn analyze(services: &Services, state: &mut WorkflowState) -> Result<(), ApiError> {
    let image = state.analysis_input()?.0.image.clone();
    let selection = state.selection;
    if selection.resolve(&services.vision.configured()).is_empty() {
        return Err(state.fail(WorkflowError::BackendUnavailable(describe(selection))).into());
    }

    let result = services.vision.analyze(&image, selection).await;
    if let crate::models::AnalysisResult::Error { message, .. } = &result {
        let err = WorkflowError::AnalysisFailed(message.clone());
        return Err(state.reject_analysis(result, err).into());
    }

    let combined = combine_analysis(&result);
    match services.reports.generate(&combined).await {
        Ok(report) => {
            info!("✅ Session {} report ready ({:?})", state.id, report.source);
            state.accept_analysis(result, report)?;
            Ok(())
        }
        Err(e) => {
            state.analysis = Some(result);
            Err(state.fail(e).into())
        }
    }
}

pub async fn build_document(services: &Services, state: &mut WorkflowState, tier: ReportTier) -> Result<(), ApiError> {
    let report = state.document_input()?.text.clone();
    let (image, regions) = match (state.photo.as_ref(), state.regions.as_ref()) {
        (Some(photo), Some(regions)) => (photo.image.clone(), regions.clone()),
        _ => return Err(state.fail(WorkflowError::MissingPrerequisite("photo")).into()),
    };
    let analysis = state.analysis.as_ref().map(combine_analysis).unwrap_or_default();

    let run_dir = match services.scratch.new_run() {
        Ok(dir) => dir,
        Err(e) => return Err(state.fail(WorkflowError::DocumentFailed(format!("scratch directory: {}", e))).into()),
    };

    // Drawing and PDF layout are CPU bound; keep them off the async workers.
    let builder = Arc::clone(&services.charts);
    let fonts = services.fonts;
    let dir = run_dir.clone();
    let work = tokio::task::spawn_blocking(move || {
        let charts = builder.build(&image, &regions, &analysis, &report, &dir);
        let document = assemble(&report, &charts, tier, fonts);
        (charts, document)
    })
    .await;

    let (charts, document) = match work {
        Ok((charts, Ok(document))) => (charts, document),
        Ok((_, Err(e))) => return Err(discard_run(state, &run_dir, e.to_string()).await),
        Err(e) => return Err(discard_run(state, &run_dir, format!("document task failed: {}", e)).await),
    };

    if let Some(previous) = state.accept_document(charts, document) {
        remove_with_retry(&previous).await;
    }
    Ok(())
}

async fn discard_run(state: &mut WorkflowState, run_dir: &Path, reason: String) -> ApiError {
    error!("Document assembly failed: {}", reason);
    remove_with_retry(run_dir).await;
    state.fail(WorkflowError::DocumentFailed(reason)).into()
}

pub fn download(state: &mut WorkflowState) -> Result<GeneratedDocument, ApiError> {
    Ok(state.download()?.clone())
}

pub fn chart_path(state: &WorkflowState, kind: ChartKind) -> Option<PathBuf> {
    state.charts.as_ref().and_then(|c| c.path(kind).cloned())
}

pub async fn reset(state: &mut WorkflowState) {
    if let Some(run_dir) = state.reset() {
        remove_with_retry(&run_dir).await;
    }
    info!("🔄 Session {} reset", state.id);
}

pub fn select_backend(services: &Services, state: &mut WorkflowState, raw: &str) -> Result<(), ApiError> {
    let Some(selection) = BackendSelection::parse(raw) else {
        return Err(state.fail(ApiError::BadRequest(format!("unknown backend {:?}", raw))));
    };
    if let BackendSelection::Only(kind) = selection {
        if !services.vision.configured().contains(&kind) {
            return Err(state.fail(WorkflowError::BackendUnavailable(kind.slug().to_string())).into());
        }
    }
    state.set_selection(selection);
    Ok(())
}

fn describe(selection: BackendSelection) -> String {
    match selection {
        BackendSelection::All => "all".to_string(),
        BackendSelection::Only(kind) => kind.slug().to_string(),
    }
}
