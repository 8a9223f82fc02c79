//! Vision-language-model OCR and the shared VLM client.
//!
//! [`VisionClient`] owns a provider plus the retry policy and is shared by
//! the `vlm` OCR engine and the picture-description enricher.
//!
//! ## Retry Strategy
//!
//! HTTP 429 / 503 errors from LLM APIs are transient under concurrent load.
//! Backoff is exponential (`base * 2^(attempt-1)`): with a 500 ms base and 3
//! retries the waits are 500 ms, 1 s and 2 s.

use super::{OcrContent, OcrEngine, OcrPage};
use crate::error::{ConfigError, OcrError};
use crate::pipeline::encode;
use crate::prompts::PAGE_TRANSCRIPTION_PROMPT;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use futures::future::BoxFuture;
use image::DynamicImage;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

/// Model used when a provider is named without one.
pub const DEFAULT_VISION_MODEL: &str = "gpt-4.1-nano";

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, ConfigError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        ConfigError::BackendUnavailable {
            backend: format!("vlm:{provider_name}"),
            hint: format!("{e}"),
        }
    })
}

/// Resolve a vision provider, from most-specific to least-specific:
///
/// 1. `provider_name` (+ `model`, default [`DEFAULT_VISION_MODEL`])
/// 2. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`, when both are set
/// 3. `OPENAI_API_KEY` → OpenAI
/// 4. [`ProviderFactory::from_env`] auto-detection
///
/// A pre-built provider, when the caller has one, bypasses this entirely
/// (see [`crate::factory::ProcessorFactory::with_vision_provider`]).
pub fn resolve_provider(
    provider_name: Option<&str>,
    model: Option<&str>,
) -> Result<Arc<dyn LLMProvider>, ConfigError> {
    if let Some(name) = provider_name {
        return create_vision_provider(name, model.unwrap_or(DEFAULT_VISION_MODEL));
    }

    if let (Ok(prov), Ok(env_model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !env_model.is_empty() {
            return create_vision_provider(&prov, model.unwrap_or(&env_model));
        }
    }

    if std::env::var("OPENAI_API_KEY").is_ok_and(|k| !k.is_empty()) {
        return create_vision_provider("openai", model.unwrap_or(DEFAULT_VISION_MODEL));
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| ConfigError::BackendUnavailable {
            backend: "vlm".to_string(),
            hint: format!(
                "no LLM provider could be auto-detected. Set OPENAI_API_KEY, \
                 ANTHROPIC_API_KEY, or vlm_provider. Error: {e}"
            ),
        })?;
    Ok(llm_provider)
}

/// A provider plus retry policy.
#[derive(Clone)]
pub struct VisionClient {
    provider: Arc<dyn LLMProvider>,
    provider_label: String,
    max_retries: u32,
    backoff_ms: u64,
    temperature: f32,
    max_tokens: usize,
}

impl VisionClient {
    /// `provider_label` names the provider in errors (`openai`, `custom`).
    pub fn new(
        provider: Arc<dyn LLMProvider>,
        provider_label: impl Into<String>,
        max_retries: u32,
    ) -> Self {
        Self {
            provider,
            provider_label: provider_label.into(),
            max_retries,
            backoff_ms: 500,
            temperature: 0.1,
            max_tokens: 4096,
        }
    }

    /// Override the retry base delay.
    pub fn with_backoff_ms(mut self, ms: u64) -> Self {
        self.backoff_ms = ms;
        self
    }

    pub fn provider_label(&self) -> &str {
        &self.provider_label
    }

    fn options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }

    /// Send `system_prompt` plus one PNG and return the reply text.
    ///
    /// `label` identifies the call in logs (`page 3`, `picture 2`). The error
    /// is the last provider error once every retry is spent.
    pub async fn complete(
        &self,
        label: &str,
        system_prompt: &str,
        png: &[u8],
    ) -> Result<String, String> {
        let start = Instant::now();
        let messages = vec![
            ChatMessage::system(system_prompt),
            ChatMessage::user_with_images("", vec![encode::vision_image(png)]),
        ];
        let options = self.options();

        let mut last_err: Option<String> = None;
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = self.backoff_ms * 2u64.pow(attempt - 1);
                warn!(
                    "{}: retry {}/{} after {}ms",
                    label, attempt, self.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            match self.provider.chat(&messages, Some(&options)).await {
                Ok(response) => {
                    debug!(
                        "{}: {} input tokens, {} output tokens, {:?}",
                        label,
                        response.prompt_tokens,
                        response.completion_tokens,
                        start.elapsed()
                    );
                    return Ok(response.content);
                }
                Err(e) => {
                    let err_msg = e.to_string();
                    warn!("{}: attempt {} failed: {}", label, attempt + 1, err_msg);
                    last_err = Some(err_msg);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| "unknown error".to_string()))
    }
}

/// OCR engine that transcribes whole pages through a vision model.
///
/// VLMs report no confidence, so pages carry `confidence: None`.
pub struct VlmOcr {
    client: VisionClient,
}

impl VlmOcr {
    pub fn new(client: VisionClient) -> Self {
        Self { client }
    }
}

impl OcrEngine for VlmOcr {
    fn name(&self) -> &str {
        "vlm"
    }

    fn recognize<'a>(
        &'a self,
        page_no: usize,
        image: &'a DynamicImage,
    ) -> BoxFuture<'a, Result<OcrPage, OcrError>> {
        Box::pin(async move {
            let png = encode::encode_png(image).map_err(|e| OcrError::EngineFailed {
                page: page_no,
                engine: "vlm".into(),
                detail: format!("image encoding failed: {e}"),
            })?;
            let reply = self
                .client
                .complete(&format!("Page {page_no}"), PAGE_TRANSCRIPTION_PROMPT, &png)
                .await
                .map_err(|detail| OcrError::EngineFailed {
                    page: page_no,
                    engine: format!("vlm:{}", self.client.provider_label()),
                    detail,
                })?;
            Ok(OcrPage {
                content: OcrContent::Markdown(clean_transcription(&reply)),
                confidence: None,
            })
        })
    }
}

// ── Reply cleanup ────────────────────────────────────────────────────────────

static RE_OUTER_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:markdown|md)?[ \t]*\n(.*)\n```$").unwrap());

/// Undo the usual model quirks: an outer ```markdown fence despite the
/// prompt, CRLF line endings, zero-width characters and trailing spaces.
pub fn clean_transcription(reply: &str) -> String {
    let normalised = reply.replace("\r\n", "\n").replace('\r', "\n");
    let trimmed = normalised.trim();
    let unfenced = match RE_OUTER_FENCE.captures(trimmed) {
        Some(caps) => caps[1].to_string(),
        None => trimmed.to_string(),
    };
    unfenced
        .chars()
        .filter(|c| !matches!(c, '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{FEFF}' | '\u{00AD}'))
        .collect::<String>()
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_outer_markdown_fence() {
        let reply = "```markdown\n# Title\n\nBody\n```";
        assert_eq!(clean_transcription(reply), "# Title\n\nBody");
    }

    #[test]
    fn keeps_inner_code_fences() {
        let reply = "Intro\n\n```rust\nfn main() {}\n```\n";
        assert_eq!(
            clean_transcription(reply),
            "Intro\n\n```rust\nfn main() {}\n```"
        );
    }

    #[test]
    fn normalises_line_endings_and_invisible_chars() {
        let reply = "Line\u{200B} one  \r\nLine two\u{FEFF}";
        assert_eq!(clean_transcription(reply), "Line one\nLine two");
    }

    #[test]
    fn named_provider_error_is_config_error() {
        let err = resolve_provider(Some("no-such-provider"), None).err();
        if let Some(err) = err {
            assert!(matches!(err, ConfigError::BackendUnavailable { .. }));
        }
    }
}
