use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde_json::json;
use thiserror::Error;

use crate::workflow::{SessionView, Stage};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no vision backend credential is set (need one of XAI_API_KEY, DEEPSEEK_API_KEY, REPLICATE_API_TOKEN)")]
    NoCredentials,
    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("invalid image: {0}")]
    InvalidImage(String),
}

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("HTTP error: {0}")] Http(String),
    #[error("status={status} body={body}")] Status { status: u16, body: String },
    #[error("parse error: {0}")] Parse(String),
    #[error("empty response: {0}")] Empty(String),
}

impl From<reqwest::Error> for UpstreamError {
    fn from(e: reqwest::Error) -> Self { UpstreamError::Http(e.to_string()) }
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("analysis text is empty; cannot generate a report")]
    EmptyInput,
}

#[derive(Debug, Error)]
pub enum ChartError {
    #[error("nothing to draw: {0}")] NoData(&'static str),
    #[error("image error: {0}")] Image(#[from] image::ImageError),
}

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("font error: {0}")] Font(String),
    #[error("pdf error: {0}")] Pdf(String),
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("{action} is not allowed in stage {stage}")]
    WrongStage { action: &'static str, stage: Stage },
    #[error("{0} is missing; complete the previous step first")]
    MissingPrerequisite(&'static str),
    #[error("analysis failed: {0}")]
    AnalysisFailed(String),
    #[error("backend {0} is not configured")]
    BackendUnavailable(String),
    #[error("document could not be generated: {0}")]
    DocumentFailed(String),
}

/// Error surfaced by HTTP handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("session not found")] NotFound,
    #[error("bad request: {0}")] BadRequest(String),
    #[error(transparent)] Image(#[from] ImageError),
    #[error(transparent)] Workflow(#[from] WorkflowError),
    #[error(transparent)] Report(#[from] ReportError),
}

impl ApiError {
    pub(crate) fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Image(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Workflow(WorkflowError::AnalysisFailed(_)) => StatusCode::BAD_GATEWAY,
            ApiError::Workflow(WorkflowError::DocumentFailed(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Workflow(_) => StatusCode::CONFLICT,
            ApiError::Report(_) => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }
}

impl ApiError {
    /// `{ "error", "stage", "session" }`; stage and session are null when the
    /// request names no live session.
    pub(crate) fn respond(self, session: Option<SessionView>) -> Response {
        let status = self.status();
        let stage = session.as_ref().map(|s| s.stage);
        (status, Json(json!({ "error": self.to_string(), "stage": stage, "session": session }))).into_response()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response { self.respond(None) }
}
