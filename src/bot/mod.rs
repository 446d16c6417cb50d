//! Answer orchestration: retrieval, prompt assembly, the single model
//! call, structured-output parsing, and the confidence-threshold
//! escalation policy.

pub mod output;
pub mod prompt;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::Settings;
use crate::core::errors::ApiError;
use crate::history::MemoryStore;
use crate::llm::{ChatRequest, LlmProvider};
use crate::retriever::Retriever;

use output::{parse_model_output, ModelOutput};

pub const EMPTY_QUESTION_MESSAGE: &str =
    "Your message looks empty. Please type a question about the FAQ.";
pub const MISSING_KEY_MESSAGE: &str =
    "OPENAI_API_KEY is not set. Fill in your environment configuration.";
pub const TICKET_OFFER_MESSAGE: &str =
    "I could not find an exact answer in the knowledge base. I can open a support ticket for you.";
const UNPARSED_FALLBACK_MESSAGE: &str = "Could not parse the model response.";

const CONTEXT_DELIMITER: &str = "\n\n---\n\n";
const TRUNCATION_MARKER: &str = "\n...[truncated]";
const CITATION_PREVIEW_CHARS: usize = 200;
const CHAT_TEMPERATURE: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Ok,
    Ticket,
}

impl Action {
    fn from_model_value(value: &str) -> Self {
        if value.eq_ignore_ascii_case("TICKET") {
            Action::Ticket
        } else {
            Action::Ok
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerResponse {
    pub answer: String,
    pub action: Action,
    pub confidence: f64,
    pub sources: Vec<String>,
    pub top_score: f32,
}

impl AnswerResponse {
    /// Short-circuit and error responses: action OK, nothing retrieved.
    fn terminal(answer: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
            action: Action::Ok,
            confidence: 0.0,
            sources: Vec::new(),
            top_score: 0.0,
        }
    }
}

struct RetrievedContext {
    citations: Vec<String>,
    top_score: f32,
    context: String,
}

#[derive(Clone)]
pub struct AnswerBot {
    settings: Arc<Settings>,
    provider: Arc<dyn LlmProvider>,
    history: MemoryStore,
}

impl AnswerBot {
    pub fn new(
        settings: Arc<Settings>,
        provider: Arc<dyn LlmProvider>,
        history: MemoryStore,
    ) -> Self {
        Self {
            settings,
            provider,
            history,
        }
    }

    /// Answers one question within a session. Every failure path yields a
    /// well-formed response; nothing below this method reaches the caller
    /// as an error.
    pub async fn answer(&self, question: &str, session_id: &str) -> AnswerResponse {
        if question.trim().is_empty() {
            return AnswerResponse::terminal(EMPTY_QUESTION_MESSAGE);
        }
        if self.settings.openai_api_key.is_empty() {
            return AnswerResponse::terminal(MISSING_KEY_MESSAGE);
        }

        let retrieved = match self.retrieve(question).await {
            Ok(retrieved) => retrieved,
            Err(err) => {
                tracing::warn!("Retrieval failed: {}", err);
                return AnswerResponse::terminal(err.to_string());
            }
        };
        tracing::info!(
            "Retrieval top_score={:.3} top_k={}",
            retrieved.top_score,
            self.settings.top_k
        );

        // The authoritative escalation decision. The model's own opinion
        // can raise concern but never override a TICKET determination.
        let forced_action = if retrieved.top_score >= self.settings.min_sim {
            Action::Ok
        } else {
            Action::Ticket
        };

        let messages = prompt::build_messages(
            &self.history.get_history(session_id),
            &retrieved.context,
            question,
        );
        let request = ChatRequest::new(messages)
            .with_temperature(CHAT_TEMPERATURE)
            .with_max_tokens(self.settings.max_output_tokens);

        let raw = match self.provider.chat(request, &self.settings.model_name).await {
            Ok(raw) => raw,
            Err(err) => {
                tracing::error!("LLM call failed: {}", err);
                return AnswerResponse::terminal(format!("Error while calling the model: {}", err));
            }
        };

        let response = self.enforce_policy(&raw, forced_action, &retrieved);

        // Memory keeps what the user actually saw, so later turns stay
        // consistent with the rendered conversation.
        self.history.add_message(session_id, "user", question);
        self.history
            .add_message(session_id, "assistant", &response.answer);

        response
    }

    async fn retrieve(&self, question: &str) -> Result<RetrievedContext, ApiError> {
        let vectors = self
            .provider
            .embed(&[question.to_string()], &self.settings.embed_model)
            .await?;
        let query = vectors
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::Upstream("empty embedding response".to_string()))?;

        let retriever = Retriever::load(&self.settings.index_dir)?;
        let hits = retriever.search(&query, self.settings.top_k)?;

        let mut citations = Vec::with_capacity(hits.len());
        let mut blocks = Vec::with_capacity(hits.len());
        for (record, score) in &hits {
            citations.push(format!("{}: {}", record.source(), preview(&record.page_content)));
            blocks.push(format!("[score={:.3}]\n{}", score, record.page_content.trim()));
        }

        let top_score = hits.first().map(|(_, score)| *score).unwrap_or(0.0);
        let context = truncate(
            blocks.join(CONTEXT_DELIMITER),
            self.settings.max_context_chars,
        );

        Ok(RetrievedContext {
            citations,
            top_score,
            context,
        })
    }

    fn enforce_policy(
        &self,
        raw: &str,
        forced_action: Action,
        retrieved: &RetrievedContext,
    ) -> AnswerResponse {
        let (mut answer, mut action, confidence, sources) = match parse_model_output(raw) {
            ModelOutput::Parsed(parsed) => {
                let action = match parsed.action.as_deref() {
                    Some(value) => Action::from_model_value(value),
                    None => forced_action,
                };
                (
                    parsed.answer,
                    action,
                    parsed.confidence,
                    parsed.sources.unwrap_or_default(),
                )
            }
            ModelOutput::Raw(text) => {
                let answer = if text.is_empty() {
                    UNPARSED_FALLBACK_MESSAGE.to_string()
                } else {
                    text
                };
                (answer, forced_action, 0.0, Vec::new())
            }
        };

        if forced_action == Action::Ticket {
            action = Action::Ticket;
            if !answer.to_lowercase().contains("ticket") {
                answer = format!("{}\n\n{}", answer, TICKET_OFFER_MESSAGE)
                    .trim()
                    .to_string();
            }
        }

        let sources = if sources.is_empty() {
            retrieved
                .citations
                .iter()
                .take(self.settings.top_k)
                .cloned()
                .collect()
        } else {
            sources
        };

        AnswerResponse {
            answer,
            action,
            confidence: confidence.clamp(0.0, 1.0),
            sources,
            top_score: retrieved.top_score,
        }
    }
}

/// Flattened single-line preview of a chunk, used in citation strings.
fn preview(text: &str) -> String {
    let flat = text.trim().replace('\n', " ");
    let chars: Vec<char> = flat.chars().collect();
    if chars.len() > CITATION_PREVIEW_CHARS {
        let cut: String = chars[..CITATION_PREVIEW_CHARS].iter().collect();
        format!("{}...", cut)
    } else {
        flat
    }
}

/// Suffix-cut to the character budget, with a visible marker so truncation
/// is never silent.
fn truncate(text: String, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text;
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}{}", cut, TRUNCATION_MARKER)
}
