// Question answering over search results


use itertools::Itertools;
use serde::Serialize;
use tracing::{debug, info};

use crate::Result;
use crate::embeddings::Embedder;
use crate::engine::{SearchHit, VectorStoreEngine};

pub const NO_CONTEXT_ANSWER: &str = "No relevant information found.";
pub const SYSTEM_PROMPT: &str = "You answer based only on the given context.";

/// A chat-style text completion service
pub trait Completer: Send + Sync {
    fn complete(&self, system: &str, prompt: &str) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub answer: String,
    /// The chunks the answer was generated from
    pub context: Vec<SearchHit>,
}

/// Prompt asking for a concise answer to `question` from `hits` only
#[inline]
pub fn build_prompt(question: &str, hits: &[SearchHit]) -> String {
    let context = hits.iter().map(|hit| hit.text.as_str()).join("\n\n");

    format!(
        "You are an assistant answering questions based on the provided context:\n\
         Context:\n{}\n\n\
         Question:\n{}\n\n\
         Answer concisely and cite the context.",
        context, question
    )
}

/// Retrieve the `top_k` best chunks for `question` and ask `completer` to
/// answer from them
///
/// # Errors
/// Search errors, and [`crate::RagError::Completion`] if the completion
/// service fails.
#[inline]
pub fn answer_question<E, C>(
    engine: &VectorStoreEngine<E>,
    completer: &C,
    question: &str,
    top_k: usize,
) -> Result<Answer>
where
    E: Embedder,
    C: Completer + ?Sized,
{
    let hits = engine.search(question, top_k)?;
    if hits.is_empty() {
        info!("No context found for question");
        return Ok(Answer {
            answer: NO_CONTEXT_ANSWER.to_string(),
            context: Vec::new(),
        });
    }

    let prompt = build_prompt(question, &hits);
    debug!("Asking completer with {} context chunks", hits.len());
    let answer = completer.complete(SYSTEM_PROMPT, &prompt)?;

    Ok(Answer {
        answer: answer.trim().to_string(),
        context: hits,
    })
}
