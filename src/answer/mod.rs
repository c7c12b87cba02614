// Answer module
// Builds the grounded prompt and turns a generation into a response payload

#[cfg(test)]
mod tests;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::config::AnswerConfig;
use crate::corpus::{Document, load_chat_session, load_saved_chats};
use crate::generation::Generator;
use crate::retrieval::{RetrievedPassage, Retriever};
use crate::{RagError, Result};

pub const NO_QUERY_MESSAGE: &str = "No query provided";

/// Title and origin of a passage or chat shown alongside an answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub title: String,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    pub answer: String,
    pub knowledge_docs: Vec<SourceRef>,
    pub saved_chats: Vec<SourceRef>,
    pub total_chats: usize,
    pub remaining_chats: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RagRequestBody")]
pub struct RagRequest {
    pub query: String,
    pub chat_filename: Option<String>,
}

/// Wire shape of a request; `query` wins over `q` unless it is blank
#[derive(Debug, Deserialize)]
struct RagRequestBody {
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    q: Option<String>,
    #[serde(default)]
    chat_filename: Option<String>,
}

impl From<RagRequestBody> for RagRequest {
    #[inline]
    fn from(body: RagRequestBody) -> Self {
        let query = [body.query, body.q]
            .into_iter()
            .flatten()
            .find(|query| !query.trim().is_empty())
            .unwrap_or_default();

        Self {
            query,
            chat_filename: body.chat_filename,
        }
    }
}

impl RagRequest {
    #[inline]
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            chat_filename: None,
        }
    }
}

/// Either an answer or `{ "error": message }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RagResponse {
    Answer(Answer),
    Error { error: String },
}

impl RagResponse {
    #[inline]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }

    #[inline]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

/// Saved chats kept for context, their total count and the slots left
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SavedChatContext {
    pub chats: Vec<Document>,
    pub total: usize,
    pub remaining: usize,
}

/// Slots left under the saved chat limit, never negative
#[inline]
pub const fn remaining_chats(limit: usize, total: usize) -> usize {
    limit.saturating_sub(total)
}

/// Prompt context from saved chats and retrieved passages
#[inline]
pub fn build_context(
    saved_chats: &[Document],
    total_chats: usize,
    passages: &[RetrievedPassage],
) -> String {
    let mut sections = Vec::new();

    if !saved_chats.is_empty() {
        sections.push(format!(
            "### Saved Conversations ({} of {}):",
            saved_chats.len(),
            total_chats
        ));
        sections.extend(
            saved_chats
                .iter()
                .map(|chat| format!("{} (source: {})", chat.text, chat.meta.source)),
        );
    }

    if !passages.is_empty() {
        sections.push("### Relevant Knowledge:".to_string());
        sections.extend(
            passages
                .iter()
                .map(|passage| format!("{} (source: {})", passage.text, passage.source)),
        );
    }

    sections.join("\n\n")
}

#[inline]
pub fn build_prompt(config: &AnswerConfig, context: &str, query: &str) -> String {
    format!(
        "You are a {persona}. Only use {topic}-related information. \
         Do not answer unrelated questions. \
         The answer should be short but not too short. Be friendly and patient always!\n\n\
         If the context does not contain the answer, gracefully say you don't know about \
         this question, then only use your own knowledge to answer.\n\n\
         Context:\n{context}\n\n\
         Question:\n{query}\n\n\
         Answer:",
        persona = config.persona,
        topic = config.topic,
    )
}

fn passage_title(text: &str) -> String {
    text.lines().next().unwrap_or_default().trim().to_string()
}

/// Answers questions from retrieved passages and saved chats
pub struct AnswerComposer {
    retriever: Arc<Retriever>,
    generator: Arc<dyn Generator>,
    chat_dir: PathBuf,
    config: AnswerConfig,
}

impl AnswerComposer {
    #[inline]
    pub fn new(
        retriever: Arc<Retriever>,
        generator: Arc<dyn Generator>,
        chat_dir: PathBuf,
        config: AnswerConfig,
    ) -> Self {
        Self {
            retriever,
            generator,
            chat_dir,
            config,
        }
    }

    #[inline]
    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    /// Assistant messages from every saved chat, capped at the configured limit
    #[inline]
    pub fn saved_chat_summary(&self) -> SavedChatContext {
        let mut chats = load_saved_chats(&self.chat_dir).documents;
        let total = chats.len();
        chats.truncate(self.config.saved_chat_limit);

        SavedChatContext {
            chats,
            total,
            remaining: remaining_chats(self.config.saved_chat_limit, total),
        }
    }

    /// Retrieve, build the prompt and generate
    ///
    /// `saved_chats` is left empty; [`AnswerComposer::handle`] fills it from the
    /// requested session.
    #[inline]
    pub async fn answer(&self, query: &str) -> Result<Answer> {
        let query = query.trim();
        if query.is_empty() {
            return Err(RagError::InvalidRequest(NO_QUERY_MESSAGE.to_string()));
        }

        self.retriever.initialize().await?;

        let start = Instant::now();
        let passages = self.retriever.query(query, self.config.top_k).await?;
        info!(
            "Retrieval took {:.2} ms",
            start.elapsed().as_secs_f64() * 1000.0
        );

        let summary = self.saved_chat_summary();
        let context = build_context(&summary.chats, summary.total, &passages);
        info!(
            "Context has {} saved chats and {} knowledge passages",
            summary.chats.len(),
            passages.len()
        );
        debug!("Context:\n{}", context);

        let prompt = build_prompt(&self.config, &context, query);

        let start = Instant::now();
        let generator = Arc::clone(&self.generator);
        let answer = tokio::task::spawn_blocking(move || generator.generate(&prompt))
            .await
            .map_err(|e| RagError::Generation(format!("generation task failed: {}", e)))??;
        info!(
            "Generation with {} took {:.2} sec",
            self.generator.name(),
            start.elapsed().as_secs_f64()
        );

        Ok(Answer {
            answer,
            knowledge_docs: passages
                .iter()
                .map(|passage| SourceRef {
                    title: passage_title(&passage.text),
                    source: passage.source.clone(),
                })
                .collect(),
            saved_chats: Vec::new(),
            total_chats: summary.total,
            remaining_chats: summary.remaining,
        })
    }

    /// Titles of the requested session's messages, capped at the limit
    #[inline]
    pub fn session_chats(&self, chat_filename: Option<&str>) -> Result<Vec<SourceRef>> {
        let Some(filename) = chat_filename else {
            return Ok(Vec::new());
        };

        Ok(load_chat_session(&self.chat_dir, filename)?
            .into_iter()
            .take(self.config.saved_chat_limit)
            .map(|document| SourceRef {
                title: document.meta.source.clone(),
                source: document.meta.source,
            })
            .collect())
    }

    /// Answer a request, converting every failure into an error payload
    #[inline]
    pub async fn handle(&self, request: &RagRequest) -> RagResponse {
        if request.query.trim().is_empty() {
            return RagResponse::error(NO_QUERY_MESSAGE);
        }

        let result = async {
            let mut answer = self.answer(&request.query).await?;
            answer.saved_chats = self.session_chats(request.chat_filename.as_deref())?;
            Ok::<_, RagError>(answer)
        }
        .await;

        match result {
            Ok(answer) => RagResponse::Answer(answer),
            Err(e) => {
                error!("Failed to answer query: {}", e);
                RagResponse::error(e.to_string())
            }
        }
    }
}
