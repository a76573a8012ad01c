//! OpenAI-compatible chat-completions client.
//!
//! One client backs all three language collaborators: synonym generation,
//! candidate extraction and query generation.

use crate::prompts::{render, PromptSet};
use crate::{AdapterError, AdapterResult};
use async_trait::async_trait;
use promctx_core::{
    strip_code_fences, LlmConfig, QueryGenerationRequest, QueryGenerator, QueryUnderstanding,
    RankedQuery, Result as CoreResult, SynonymProvider,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, instrument};

const SERVICE: &str = "llm";

const UNDERSTANDING_SYSTEM_PROMPT: &str = "You are a helpful assistant.";
const UNDERSTANDING_TEMPERATURE: f32 = 0.2;
const UNDERSTANDING_MAX_TOKENS: u32 = 1000;
const LABEL_SYNONYM_TEMPERATURE: f32 = 0.5;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// One element of the generation reply
#[derive(Debug, Deserialize)]
struct GeneratedQuery {
    #[serde(alias = "query")]
    promql: String,
    #[serde(default)]
    score: f64,
}

/// Sampling parameters of one completion call
#[derive(Debug, Clone, Copy)]
struct Sampling {
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct ChatCompletionsClient {
    client: Client,
    config: LlmConfig,
    prompts: PromptSet,
}

impl ChatCompletionsClient {
    pub fn new(config: &LlmConfig, prompts: PromptSet) -> AdapterResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!("promctx/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AdapterError::RequestFailed(e.to_string()))?;

        Ok(Self {
            client,
            config: config.clone(),
            prompts,
        })
    }

    pub fn prompts(&self) -> &PromptSet {
        &self.prompts
    }

    fn default_sampling(&self) -> Sampling {
        Sampling {
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        }
    }

    /// Sends one system + user exchange and returns the reply text.
    async fn complete(&self, system: &str, user: &str, sampling: Sampling) -> AdapterResult<String> {
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        debug!("Sending chat completion to {}", url);

        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: sampling.temperature,
            max_tokens: sampling.max_tokens,
        };

        let mut request = self.client.post(&url).json(&body);
        if !self.config.api_key.is_empty() {
            request = request.bearer_auth(&self.config.api_key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| AdapterError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AdapterError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        let reply: ChatResponse = response
            .json()
            .await
            .map_err(|e| AdapterError::SerializationError(e.to_string()))?;

        reply
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| AdapterError::InvalidResponse("completion has no choices".to_string()))
    }

    async fn synonyms(&self, template: &str, data: String, sampling: Sampling) -> AdapterResult<BTreeMap<String, Vec<String>>> {
        let prompt = render(template, &data);
        let reply = self.complete(&self.prompts.system, &prompt, sampling).await?;
        parse_json(&reply)
    }
}

fn parse_json<T: serde::de::DeserializeOwned>(reply: &str) -> AdapterResult<T> {
    serde_json::from_str(strip_code_fences(reply))
        .map_err(|e| AdapterError::SerializationError(format!("{}: {}", e, truncate(reply))))
}

fn truncate(text: &str) -> &str {
    match text.char_indices().nth(200) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

fn pretty<T: Serialize>(value: &T) -> AdapterResult<String> {
    serde_json::to_string_pretty(value).map_err(|e| AdapterError::SerializationError(e.to_string()))
}

/// Builds the user message of a generation call
pub fn generation_message(request: &QueryGenerationRequest) -> AdapterResult<String> {
    Ok(format!(
        "#Relevant Metrics:\n{}\n\n#Relevant Labels:\n{}\n\n#Relevant History:\n{}\n\n#User Query:\n{}",
        pretty(&request.relevant_metrics)?,
        pretty(&request.relevant_labels)?,
        pretty(&request.history)?,
        request.user_query
    ))
}

#[async_trait]
impl SynonymProvider for ChatCompletionsClient {
    #[instrument(skip_all, fields(batch = batch.len()))]
    async fn generate_metric_synonyms(
        &self,
        batch: BTreeMap<String, String>,
    ) -> CoreResult<BTreeMap<String, Vec<String>>> {
        let data = pretty(&batch).map_err(|e| e.into_core(SERVICE))?;
        self.synonyms(&self.prompts.metric_synonym, data, self.default_sampling())
            .await
            .map_err(|e| e.into_core(SERVICE))
    }

    #[instrument(skip_all, fields(batch = batch.len()))]
    async fn generate_label_synonyms(
        &self,
        batch: Vec<String>,
    ) -> CoreResult<BTreeMap<String, Vec<String>>> {
        let data = pretty(&batch).map_err(|e| e.into_core(SERVICE))?;
        let sampling = Sampling {
            temperature: LABEL_SYNONYM_TEMPERATURE,
            ..self.default_sampling()
        };
        self.synonyms(&self.prompts.label_synonym, data, sampling)
            .await
            .map_err(|e| e.into_core(SERVICE))
    }
}

#[async_trait]
impl QueryUnderstanding for ChatCompletionsClient {
    #[instrument(skip(self))]
    async fn extract_candidates(&self, user_query: &str) -> CoreResult<String> {
        let prompt = render(&self.prompts.process_query, user_query);
        let sampling = Sampling {
            temperature: UNDERSTANDING_TEMPERATURE,
            max_tokens: UNDERSTANDING_MAX_TOKENS,
        };
        self.complete(UNDERSTANDING_SYSTEM_PROMPT, &prompt, sampling)
            .await
            .map_err(|e| e.into_core(SERVICE))
    }
}

#[async_trait]
impl QueryGenerator for ChatCompletionsClient {
    #[instrument(skip_all, fields(metrics = request.relevant_metrics.len(), labels = request.relevant_labels.len()))]
    async fn generate_queries(&self, request: &QueryGenerationRequest) -> CoreResult<Vec<RankedQuery>> {
        let message = generation_message(request).map_err(|e| e.into_core(SERVICE))?;
        let reply = self
            .complete(&self.prompts.system, &message, self.default_sampling())
            .await
            .map_err(|e| e.into_core(SERVICE))?;

        let generated: Vec<GeneratedQuery> = parse_json(&reply).map_err(|e| e.into_core(SERVICE))?;
        let mut queries: Vec<RankedQuery> = generated
            .into_iter()
            .map(|g| RankedQuery {
                query: g.promql,
                score: g.score,
            })
            .collect();
        queries.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(queries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use promctx_core::{CoreError, HistoryContext};
    use serde_json::json;

    fn completion(content: &str) -> String {
        json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": content}, "finish_reason": "stop"}]
        })
        .to_string()
    }

    fn client(server: &mockito::ServerGuard) -> ChatCompletionsClient {
        let config = LlmConfig::new(server.url(), "test-model", "sk-test");
        ChatCompletionsClient::new(&config, PromptSet::default()).unwrap()
    }

    #[tokio::test]
    async fn test_metric_synonyms_round_trip() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .match_body(Matcher::PartialJson(json!({"model": "test-model"})))
            .with_status(200)
            .with_body(completion(
                "```json\n{\"node_load1\": [\"load\", \"average\"]}\n```",
            ))
            .create_async()
            .await;

        let mut batch = BTreeMap::new();
        batch.insert("node_load1".to_string(), "1m load average.".to_string());
        let synonyms = client(&server).generate_metric_synonyms(batch).await.unwrap();

        assert_eq!(synonyms["node_load1"], vec!["load", "average"]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_label_synonyms_use_label_prompt() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_body(Matcher::Regex("Prometheus label names".to_string()))
            .with_status(200)
            .with_body(completion(r#"{"instance": ["host", "node"]}"#))
            .create_async()
            .await;

        let synonyms = client(&server)
            .generate_label_synonyms(vec!["instance".to_string()])
            .await
            .unwrap();

        assert_eq!(synonyms["instance"], vec!["host", "node"]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_unparseable_reply_is_serialization_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(completion("sorry, I cannot help with that"))
            .create_async()
            .await;

        let err = client(&server)
            .generate_label_synonyms(vec!["job".to_string()])
            .await
            .unwrap_err();

        assert!(matches!(err, CoreError::Serialization(_)));
    }

    #[tokio::test]
    async fn test_http_error_is_external() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(429)
            .with_body(r#"{"error":{"message":"rate limited"}}"#)
            .create_async()
            .await;

        let err = client(&server)
            .extract_candidates("cpu usage")
            .await
            .unwrap_err();

        assert!(err.is_external());
        assert!(err.to_string().contains("429"));
    }

    #[tokio::test]
    async fn test_extract_candidates_returns_raw_payload() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .match_body(Matcher::Regex("Question: cpu usage in prod".to_string()))
            .with_status(200)
            .with_body(completion(
                r#"{"possible_metric_names": ["cpu"], "possible_label_names": "env"}"#,
            ))
            .create_async()
            .await;

        let reply = client(&server)
            .extract_candidates("cpu usage in prod")
            .await
            .unwrap();

        assert_eq!(
            reply,
            r#"{"possible_metric_names": ["cpu"], "possible_label_names": "env"}"#
        );
    }

    #[tokio::test]
    async fn test_extract_candidates_passes_prose_through() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(completion("sorry, nothing relevant"))
            .create_async()
            .await;

        let reply = client(&server)
            .extract_candidates("how is the weather")
            .await
            .unwrap();

        assert_eq!(reply, "sorry, nothing relevant");
    }

    #[tokio::test]
    async fn test_generated_queries_sorted_by_score() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .match_body(Matcher::Regex("#User Query:".to_string()))
            .with_status(200)
            .with_body(completion(
                r#"[{"promql": "up", "score": 0.4}, {"promql": "sum(up)", "score": 0.9, "metric_label_pairs": {}}]"#,
            ))
            .create_async()
            .await;

        let request = QueryGenerationRequest {
            user_query: "is everything up".to_string(),
            relevant_metrics: BTreeMap::new(),
            relevant_labels: BTreeMap::new(),
            history: HistoryContext::new(),
        };
        let queries = client(&server).generate_queries(&request).await.unwrap();

        assert_eq!(
            queries,
            vec![
                RankedQuery {
                    query: "sum(up)".to_string(),
                    score: 0.9
                },
                RankedQuery {
                    query: "up".to_string(),
                    score: 0.4
                },
            ]
        );
    }

    #[test]
    fn test_generation_message_layout() {
        let request = QueryGenerationRequest {
            user_query: "cpu by mode".to_string(),
            relevant_metrics: BTreeMap::new(),
            relevant_labels: BTreeMap::new(),
            history: HistoryContext::new(),
        };
        let message = generation_message(&request).unwrap();
        assert_eq!(
            message,
            "#Relevant Metrics:\n{}\n\n#Relevant Labels:\n{}\n\n#Relevant History:\n{}\n\n#User Query:\ncpu by mode"
        );
    }
}
