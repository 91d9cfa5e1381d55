//! OpenAI-compatible chat completions provider

use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessage, ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
    ChatCompletionRequestUserMessage, CreateChatCompletionRequest, CreateChatCompletionResponse,
};
use async_trait::async_trait;
use url::Url;

use crate::{
    config::OpenAiConfig,
    model_providers::{ChatMessage, Generation, MessageRole, ModelError, ModelProvider, Result, TokenUsage},
};

pub struct OpenAiProvider {
    client: reqwest::Client,
    endpoint: Url,
    api_key: Option<String>,
    model: String,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(config.request_timeout).build()?;
        let endpoint = ensure_slash(config.base_url)
            .join("chat/completions")
            .map_err(|e| ModelError::InvalidResponse(format!("invalid model base URL: {e}")))?;
        Ok(Self {
            client,
            endpoint,
            api_key: config.api_key,
            model: config.model,
        })
    }

    fn completion_request(&self, messages: &[ChatMessage], max_output_tokens: i64) -> CreateChatCompletionRequest {
        CreateChatCompletionRequest {
            model: self.model.clone(),
            messages: messages.iter().map(to_request_message).collect(),
            max_completion_tokens: Some(u32::try_from(max_output_tokens.max(0)).unwrap_or(u32::MAX)),
            ..Default::default()
        }
    }
}

fn ensure_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

fn to_request_message(message: &ChatMessage) -> ChatCompletionRequestMessage {
    let text = message.content.clone();
    match message.role {
        MessageRole::System => ChatCompletionRequestSystemMessage {
            content: text.into(),
            ..Default::default()
        }
        .into(),
        MessageRole::User => ChatCompletionRequestUserMessage {
            content: text.into(),
            ..Default::default()
        }
        .into(),
        MessageRole::Assistant => ChatCompletionRequestAssistantMessage {
            content: Some(text.into()),
            ..Default::default()
        }
        .into(),
    }
}

#[async_trait]
impl ModelProvider for OpenAiProvider {
    #[tracing::instrument(skip_all, fields(model = %self.model, messages = messages.len()))]
    async fn generate(&self, messages: &[ChatMessage], max_output_tokens: i64) -> Result<Generation> {
        let body = self.completion_request(messages, max_output_tokens);

        let mut request = self.client.post(self.endpoint.clone()).json(&body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(%status, "Model request failed");
            return Err(ModelError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let completion: CreateChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ModelError::InvalidResponse(e.to_string()))?;

        // Without provider-measured usage the exchange cannot be billed
        let usage = completion
            .usage
            .ok_or_else(|| ModelError::InvalidResponse("response has no usage".to_string()))?;
        let text = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ModelError::InvalidResponse("response has no message content".to_string()))?;

        tracing::debug!(
            input_tokens = usage.prompt_tokens,
            output_tokens = usage.completion_tokens,
            "Model generation complete"
        );

        Ok(Generation {
            text,
            usage: TokenUsage {
                input_tokens: i64::from(usage.prompt_tokens),
                output_tokens: i64::from(usage.completion_tokens),
                total_tokens: i64::from(usage.total_tokens),
            },
        })
    }
}
