use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use image::RgbImage;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::{
    audit::AuditTrail,
    config::{mask, AppConfig, Endpoint},
    error::UpstreamError,
    llm::{truncate_base64_in_json, ChatClient, ChatOptions, RawResponse},
    models::{AnalysisResult, BackendKind, BackendOutcome, BackendSelection},
    validator::{compress_for_upload, CompressedImage},
};

pub const SYSTEM_PROMPT: &str = "你是專業醫美顧問，請對此面部照片進行詳細分析，提供結構化報告。";

pub const ANALYSIS_PROMPT: &str = "請對此面部照片進行詳細分析，提供結構化報告。針對以下區域：額頭、眼周、鼻子、頰骨、嘴唇、下巴，評估：
1. 皮膚狀況（乾燥、油性、痤瘡等）
2. 皺紋（深度、分布）
3. 色斑（類型、範圍）
4. 緊致度（鬆弛程度）
5. 其他特徵（毛孔、黑眼圈等）
對每個維度給出 0-5 分評分（0 表示嚴重問題，5 表示完美），並附上簡短描述。
每個區域的皮膚狀況請寫成「<區域> 皮膚狀況 n/5」，例如「額頭 皮膚狀況 3/5」。
最後以英文列出整體評分：Skin Quality n/5, Elasticity n/5, Firmness n/5, Radiance n/5, Evenness n/5。";

const REPLICATE_POLL_ATTEMPTS: u32 = 30;
const REPLICATE_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// One vision-language service that turns a photo into free text.
#[async_trait]
pub trait VisionBackend: Send + Sync {
    fn kind(&self) -> BackendKind;
    async fn describe(&self, image: &CompressedImage, prompt: &str) -> Result<RawResponse, UpstreamError>;
}

/// Grok and DeepSeek vision models over OpenAI-compatible chat completions.
pub struct ChatVisionBackend {
    kind: BackendKind,
    chat: ChatClient,
}

impl ChatVisionBackend {
    pub fn new(kind: BackendKind, client: Client, endpoint: Endpoint) -> Self {
        Self { kind, chat: ChatClient::new(client, endpoint, kind.model()) }
    }
}

#[async_trait]
impl VisionBackend for ChatVisionBackend {
    fn kind(&self) -> BackendKind { self.kind }

    async fn describe(&self, image: &CompressedImage, prompt: &str) -> Result<RawResponse, UpstreamError> {
        let messages = json!([
            { "role": "system", "content": SYSTEM_PROMPT },
            { "role": "user", "content": [
                { "type": "text", "text": prompt },
                { "type": "image_url", "image_url": { "url": image.data_uri() } }
            ]}
        ]);
        self.chat.complete(messages, ChatOptions { temperature: None, max_tokens: Some(1000) }).await
    }
}

/// Hosted image-to-text model run through Replicate predictions.
pub struct ReplicateBackend {
    client: Client,
    endpoint: Endpoint,
}

impl ReplicateBackend {
    pub fn new(client: Client, endpoint: Endpoint) -> Self { Self { client, endpoint } }

    async fn fetch(&self, url: &str) -> Result<Value, UpstreamError> {
        let response = self.client.get(url).bearer_auth(&self.endpoint.api_key).send().await?;
        read_json(response).await
    }
}

#[async_trait]
impl VisionBackend for ReplicateBackend {
    fn kind(&self) -> BackendKind { BackendKind::Replicate }

    async fn describe(&self, image: &CompressedImage, prompt: &str) -> Result<RawResponse, UpstreamError> {
        let model = BackendKind::Replicate.model();
        let version = model.split_once(':').map(|(_, v)| v).unwrap_or(model);
        let url = format!("{}/predictions", self.endpoint.base_url);
        let body = json!({ "version": version, "input": { "image": image.data_uri(), "prompt": prompt } });

        let mut logged = body.clone();
        truncate_base64_in_json(&mut logged);
        info!("🔗 POST {} key={}", url, mask(&self.endpoint.api_key));
        tracing::debug!("📤 Request body: {}", logged);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.endpoint.api_key)
            .header("Prefer", "wait")
            .json(&body)
            .send()
            .await?;
        let mut payload = read_json(response).await?;

        for attempt in 1..=REPLICATE_POLL_ATTEMPTS {
            let prediction: Prediction = serde_json::from_value(payload.clone())
                .map_err(|e| UpstreamError::Parse(e.to_string()))?;
            match prediction.status.as_str() {
                "succeeded" => {
                    let text = prediction.output_text().ok_or_else(|| UpstreamError::Empty("prediction had no output".into()))?;
                    return Ok(RawResponse { text, payload });
                }
                "failed" | "canceled" => {
                    let reason = prediction.error.map(|e| e.to_string()).unwrap_or_else(|| prediction.status.clone());
                    return Err(UpstreamError::Empty(format!("prediction {}", reason)));
                }
                status => {
                    let poll = prediction.urls.and_then(|u| u.get).ok_or_else(|| UpstreamError::Parse("prediction has no poll url".into()))?;
                    info!("⏳ Replicate prediction {} (attempt {}/{})", status, attempt, REPLICATE_POLL_ATTEMPTS);
                    tokio::time::sleep(REPLICATE_POLL_INTERVAL).await;
                    payload = self.fetch(&poll).await?;
                }
            }
        }
        Err(UpstreamError::Http("prediction did not finish in time".into()))
    }
}

async fn read_json(response: reqwest::Response) -> Result<Value, UpstreamError> {
    let status = response.status();
    let text = response.text().await?;
    if !status.is_success() {
        error!("❌ Replicate API error response: {}", text);
        return Err(UpstreamError::Status { status: status.as_u16(), body: text });
    }
    serde_json::from_str(&text).map_err(|e| UpstreamError::Parse(format!("{}: {}", e, text)))
}

#[derive(Debug, Deserialize)]
struct Prediction {
    #[serde(default)]
    status: String,
    #[serde(default)]
    output: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    urls: Option<PredictionUrls>,
}

#[derive(Debug, Deserialize)]
struct PredictionUrls {
    #[serde(default)]
    get: Option<String>,
}

impl Prediction {
    /// Output arrives either as one string or as a list of streamed tokens.
    fn output_text(&self) -> Option<String> {
        let text = match self.output.as_ref()? {
            Value::String(s) => s.clone(),
            Value::Array(parts) => parts.iter().filter_map(Value::as_str).collect::<String>(),
            _ => return None,
        };
        let text = text.trim().to_string();
        (!text.is_empty()).then_some(text)
    }
}

/// Calls the selected vision backends one after another.
pub struct VisionClient {
    backends: Vec<Arc<dyn VisionBackend>>,
    audit: AuditTrail,
}

impl VisionClient {
    pub fn new(backends: Vec<Arc<dyn VisionBackend>>, audit: AuditTrail) -> Self { Self { backends, audit } }

    pub fn from_config(config: &AppConfig, client: &Client) -> Self {
        let mut backends: Vec<Arc<dyn VisionBackend>> = Vec::new();
        for kind in config.configured_backends() {
            let Some(endpoint) = config.endpoint(kind).cloned() else { continue };
            let backend: Arc<dyn VisionBackend> = match kind {
                BackendKind::Replicate => Arc::new(ReplicateBackend::new(client.clone(), endpoint)),
                _ => Arc::new(ChatVisionBackend::new(kind, client.clone(), endpoint)),
            };
            info!("Vision backend enabled: {}", kind.display_name());
            backends.push(backend);
        }
        Self::new(backends, AuditTrail::new(&config.audit_dir))
    }

    pub fn configured(&self) -> Vec<BackendKind> { self.backends.iter().map(|b| b.kind()).collect() }

    pub async fn analyze(&self, image: &RgbImage, selection: BackendSelection) -> AnalysisResult {
        let compressed = match compress_for_upload(image) {
            Ok(c) => c,
            Err(e) => {
                error!("Image compression failed: {}", e);
                return AnalysisResult::Error { message: e.to_string(), outcomes: Vec::new() };
            }
        };

        info!(
            "🗜️ Upload image {}x{} at quality {} ({} bytes)",
            compressed.width,
            compressed.height,
            compressed.quality,
            compressed.jpeg.len()
        );

        let selected = selection.resolve(&self.configured());
        let mut outcomes = Vec::with_capacity(selected.len());
        for kind in selected {
            let Some(backend) = self.backends.iter().find(|b| b.kind() == kind) else { continue };
            info!("🎯 Analyzing with {}", kind.display_name());
            let outcome = match backend.describe(&compressed, ANALYSIS_PROMPT).await {
                Ok(raw) => {
                    let saved_response = self.audit.record(kind, &raw.payload);
                    info!("✅ {} analysis succeeded ({} chars)", kind.display_name(), raw.text.chars().count());
                    BackendOutcome::Success { backend: kind, text: raw.text, saved_response }
                }
                Err(e) => {
                    warn!("❌ {} analysis failed: {}", kind.display_name(), e);
                    BackendOutcome::Failure { backend: kind, reason: e.to_string() }
                }
            };
            outcomes.push(outcome);
        }

        let result = AnalysisResult::from_outcomes(outcomes);
        if let AnalysisResult::Error { message, .. } = &result {
            error!("All vision backends failed: {}", message);
        }
        result
    }
}
