use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{error, info, warn};

use crate::{
    config::Endpoint,
    error::{ReportError, UpstreamError},
    llm::{ChatClient, ChatOptions},
    models::{AnalysisResult, BackendOutcome, Report, ReportSource},
};

pub const ANALYSIS_FAILED_SENTINEL: &str = "分析失敗";
pub const MIN_REPORT_CHARS: usize = 500;
const FALLBACK_EXCERPT_CHARS: usize = 1000;

pub const DISCLAIMER: &str = "\n\n**免責聲明**：本報告由 DeepSeek R1 AI 生成，僅供參考，具體治療需諮詢專業醫生。";

const REPORT_SYSTEM_PROMPT: &str = "你是資深醫美專家，請根據以下面部分析結果生成一份專業、詳盡的醫美建議報告，字數至少 500 字。報告應包含以下內容，並確保語言邏輯清晰、結構分明，符合醫美行業標準：
1. 面部狀況綜合評估：
   - 針對額頭、眼周、鼻子、頰骨、嘴唇、下巴，總結各區域的皮膚狀況、皺紋、色斑、緊致度等。
   - 分析整體面部健康狀態，提供專業診斷，結合數據進行深入推理。
2. 推薦的醫美治療方案：
   - 提供至少 5 種具體治療方案，按優先級排序，每項單獨一行並寫成「1) 治療名稱」、「2) 治療名稱」的格式。
   - 每項包括治療名稱、適用區域、實施方式（如注射劑量、療程次數）。
3. 預期效果：
   - 詳細描述每種方案的預期效果（如皺紋減少百分比、緊致度提升程度），使用量化數據並進行邏輯推導。
4. 術後護理建議：
   - 針對每種方案提供具體護理措施（如保濕、防曬頻率、飲食建議），考慮長期效果。
5. 風險提示：
   - 列出每種方案的潛在風險（如紅腫、過敏）及緩解方法，分析風險可能性。
使用專業術語（如「皮下注射」、「色素分解」、「組織提拉」），確保報告詳實且具權威性，展示深入的醫學推理能力。";

/// Long-form text generation service.
#[async_trait]
pub trait TextCompletion: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<String, UpstreamError>;
}

/// DeepSeek chat model used for the recommendation report.
pub struct DeepSeekChat {
    chat: ChatClient,
}

impl DeepSeekChat {
    pub fn new(client: Client, endpoint: Endpoint) -> Self {
        Self { chat: ChatClient::new(client, endpoint, "deepseek-chat") }
    }
}

#[async_trait]
impl TextCompletion for DeepSeekChat {
    async fn complete(&self, system: &str, user: &str) -> Result<String, UpstreamError> {
        let messages = json!([
            { "role": "system", "content": system },
            { "role": "user", "content": user }
        ]);
        let raw = self.chat.complete(messages, ChatOptions { temperature: Some(0.3), max_tokens: Some(2000) }).await?;
        Ok(raw.text)
    }
}

pub struct ReportGenerator {
    backend: Option<Arc<dyn TextCompletion>>,
}

impl ReportGenerator {
    /// With no backend every report is the local fallback document.
    pub fn new(backend: Option<Arc<dyn TextCompletion>>) -> Self { Self { backend } }

    pub async fn generate(&self, combined_text: &str) -> Result<Report, ReportError> {
        let input = combined_text.trim();
        if input.is_empty() || input == ANALYSIS_FAILED_SENTINEL {
            error!("Cannot generate report: analysis text is empty");
            return Err(ReportError::EmptyInput);
        }

        let Some(backend) = &self.backend else {
            warn!("No text backend configured; using fallback report");
            return Ok(fallback_report(input));
        };

        info!("Generating recommendation report ({} chars of analysis)", input.chars().count());
        let user = format!("請根據以下面部分析結果生成報告：\n{}", input);
        match backend.complete(REPORT_SYSTEM_PROMPT, &user).await {
            Ok(text) => {
                let chars = text.chars().count();
                info!("Report generated, {} chars", chars);
                if chars < MIN_REPORT_CHARS {
                    warn!("Report is shorter than {} chars; using it anyway", MIN_REPORT_CHARS);
                }
                Ok(Report { text: format!("{}{}", text, DISCLAIMER), source: ReportSource::Generated })
            }
            Err(e) => {
                error!("Report API call failed: {}", e);
                Ok(fallback_report(input))
            }
        }
    }
}

/// Combines the successful analyses, each under its backend heading.
pub fn combine_analysis(result: &AnalysisResult) -> String {
    result
        .outcomes()
        .iter()
        .filter_map(|o| match o {
            BackendOutcome::Success { backend, text, .. } => Some(format!("# {} 分析結果:\n{}", backend.display_name(), text)),
            BackendOutcome::Failure { .. } => None,
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn fallback_report(analysis: &str) -> Report {
    let excerpt: String = analysis.chars().take(FALLBACK_EXCERPT_CHARS).collect();
    let text = format!(
        "# 面部分析簡易報告\n\n\
         ## 分析結果\n{excerpt}...\n\n\
         ## 基本建議\n\
         1. 建議進行專業的皮膚護理療程\n\
         2. 根據分析結果，可考慮光療或其他適合的醫美項目\n\
         3. 日常應加強保濕和防曬\n\
         4. 選擇適合的護膚品，避免刺激成分\n\
         5. 定期複診，追蹤皮膚狀態改善情況\n\n\
         **注意**：此為系統自動生成的簡易報告，由於API調用失敗，無法提供詳細專業建議。建議諮詢專業醫生獲取更準確的評估和治療方案。"
    );
    Report { text, source: ReportSource::Fallback }
}
