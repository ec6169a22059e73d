//! services/bot/src/adapters/text_llm.rs
//!
//! Implements the `TextGenerationService` port over an OpenAI-compatible chat
//! completion endpoint (Gemini by default).

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use prezentor_core::ports::{ProviderError, TextGenerationService};
use std::time::Duration;
use tracing::debug;

const SYSTEM_INSTRUCTIONS: &str = "Sen o'zbek tilida taqdimot matnlarini yozadigan yordamchisan. \
Faqat so'ralgan matnni yoz: sarlavha, izoh, markdown yoki qo'shimcha belgilar qo'shma.";

/// Substrings of provider error messages that mean retrying cannot help.
const TERMINAL_MARKERS: [&str; 6] = ["api key", "api_key", "permission", "quota", "unauthorized", "unauthenticated"];

pub struct OpenAiTextAdapter {
    client: Client<OpenAIConfig>,
    model: String,
    timeout: Duration,
}

impl OpenAiTextAdapter {
    pub fn new(client: Client<OpenAIConfig>, model: String, timeout: Duration) -> Self {
        Self { client, model, timeout }
    }
}

/// Sorts a provider failure into "try again" and "give up".
pub fn classify(error: &OpenAIError) -> ProviderError {
    match error {
        OpenAIError::ApiError(api) => {
            let message = api.message.to_lowercase();
            let kind = api.r#type.as_deref().unwrap_or_default().to_lowercase();
            if TERMINAL_MARKERS.iter().any(|m| message.contains(m) || kind.contains(m)) {
                ProviderError::Terminal(api.message.clone())
            } else {
                ProviderError::Transient(api.message.clone())
            }
        }
        other => ProviderError::Transient(other.to_string()),
    }
}

fn build_error(e: OpenAIError) -> ProviderError {
    ProviderError::Terminal(format!("invalid request: {}", e))
}

#[async_trait]
impl TextGenerationService for OpenAiTextAdapter {
    async fn complete(&self, prompt: &str) -> Result<String, ProviderError> {
        let messages = vec![
            ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(SYSTEM_INSTRUCTIONS)
                    .build()
                    .map_err(build_error)?,
            ),
            ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessageArgs::default()
                    .content(prompt)
                    .build()
                    .map_err(build_error)?,
            ),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .temperature(0.7)
            .build()
            .map_err(build_error)?;

        let response = tokio::time::timeout(self.timeout, self.client.chat().create(request))
            .await
            .map_err(|_| ProviderError::Transient(format!("no reply within {:?}", self.timeout)))?
            .map_err(|e| classify(&e))?;

        let text = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .unwrap_or_default();
        debug!(model = %self.model, chars = text.chars().count(), "Provider replied");
        Ok(text)
    }
}
