//! Language-model collaborator and prompt construction.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::errors::{CgragError, CgragResult, LlmError};

/// System prompt fixing the `ANSWER:` / `MISSING` response shape the gap
/// parser understands.
pub const SYSTEM_PROMPT: &str = "You answer questions about a software codebase using only the \
context provided. If the context is not enough, say what is missing.

Respond in exactly this format:

ANSWER:
<your answer, citing file paths where relevant>

MISSING (or \"NONE\" if nothing needed):
<one item per line, each starting with \"- \". Name concrete symbols as \
`name in path/to/file` or `path/to/file::name` whenever you can.>";

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        system: Option<&str>,
        temperature: f32,
        cancel: &CancellationToken,
    ) -> Result<String, LlmError>;
}

/// User prompt for one pass.
pub fn build_prompt(question: &str, context: &str) -> String {
    let context = context.trim();
    let context = if context.is_empty() {
        "(no context retrieved)"
    } else {
        context
    };
    format!("Context:\n{context}\n\nQuestion: {}", question.trim())
}

/// Call the model, racing it against `cancel`.
pub async fn generate_cancellable(
    model: &dyn LanguageModel,
    prompt: &str,
    temperature: f32,
    cancel: &CancellationToken,
) -> CgragResult<String> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CgragError::Cancelled),
        out = model.generate(prompt, Some(SYSTEM_PROMPT), temperature, cancel) => {
            out.map_err(|e| {
                warn!("LLM generation failed ({:?}): {e}", e.kind());
                CgragError::Llm(e)
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::LlmErrorKind;
    use crate::testing::ScriptedLlm;

    #[test]
    fn prompt_marks_empty_context() {
        let prompt = build_prompt("  how? ", "   ");
        assert_eq!(prompt, "Context:\n(no context retrieved)\n\nQuestion: how?");
    }

    #[test]
    fn system_prompt_names_both_sections() {
        assert!(SYSTEM_PROMPT.contains("ANSWER:"));
        assert!(SYSTEM_PROMPT.contains("MISSING (or \"NONE\" if nothing needed):"));
    }

    #[tokio::test]
    async fn typed_errors_surface_as_llm_errors() {
        let llm = ScriptedLlm::new(vec![Err(LlmError::RateLimit("slow down".into()))]);
        let err = generate_cancellable(&llm, "p", 0.2, &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            CgragError::Llm(inner) => assert_eq!(inner.kind(), LlmErrorKind::RateLimit),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(llm.prompts(), vec!["p".to_string()]);
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let llm = ScriptedLlm::new(vec![Ok("ANSWER: hi".into())]);
        let token = CancellationToken::new();
        token.cancel();
        let err = generate_cancellable(&llm, "p", 0.2, &token).await.unwrap_err();
        assert!(matches!(err, CgragError::Cancelled));
        assert!(llm.prompts().is_empty());
    }
}
