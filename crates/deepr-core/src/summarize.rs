// Context summarisation for campaign chaining
//
// Predecessor results are compressed before injection into a dependent
// topic's prompt. A provider-backed summariser may be plugged in; the
// deterministic truncation fallback keeps tests provider-free.

use async_trait::async_trait;

use crate::error::Result;

/// Rough character-per-token ratio used by the truncation fallback
const CHARS_PER_TOKEN: usize = 4;

const ELLIPSIS: &str = "\n[…]\n";

/// Trait for summarisation backends
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Compress `text` to approximately `token_budget` tokens
    async fn summarise(&self, text: &str, token_budget: usize) -> Result<String>;
}

/// Deterministic head + tail truncation
///
/// Keeps roughly the first 60% and last 40% of the character budget with
/// an ellipsis marker between. Output is stable for a given input, so
/// chained prompts are reproducible.
#[derive(Debug, Default, Clone, Copy)]
pub struct TruncationSummarizer;

impl TruncationSummarizer {
    pub fn new() -> Self {
        Self
    }

    fn truncate(text: &str, token_budget: usize) -> String {
        let budget_chars = token_budget.saturating_mul(CHARS_PER_TOKEN);
        let chars: Vec<char> = text.chars().collect();
        if chars.len() <= budget_chars {
            return text.to_string();
        }
        if budget_chars <= ELLIPSIS.len() {
            return chars.into_iter().take(budget_chars).collect();
        }

        let keep = budget_chars - ELLIPSIS.chars().count();
        let head = keep * 3 / 5;
        let tail = keep - head;

        let mut out = String::with_capacity(budget_chars);
        out.extend(chars[..head].iter());
        out.push_str(ELLIPSIS);
        out.extend(chars[chars.len() - tail..].iter());
        out
    }
}

#[async_trait]
impl Summarizer for TruncationSummarizer {
    async fn summarise(&self, text: &str, token_budget: usize) -> Result<String> {
        Ok(Self::truncate(text, token_budget))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn short_text_passes_through() {
        let summarizer = TruncationSummarizer::new();
        let text = "already short";
        assert_eq!(summarizer.summarise(text, 100).await.unwrap(), text);
    }

    #[tokio::test]
    async fn long_text_keeps_head_and_tail() {
        let summarizer = TruncationSummarizer::new();
        let text = format!("{}{}{}", "A".repeat(5_000), "B".repeat(5_000), "C".repeat(5_000));
        let out = summarizer.summarise(&text, 100).await.unwrap();

        assert!(out.chars().count() <= 100 * CHARS_PER_TOKEN);
        assert!(out.starts_with('A'));
        assert!(out.ends_with('C'));
        assert!(out.contains("[…]"));
    }

    #[tokio::test]
    async fn output_is_deterministic() {
        let summarizer = TruncationSummarizer::new();
        let text = "x".repeat(100_000);
        let a = summarizer.summarise(&text, 500).await.unwrap();
        let b = summarizer.summarise(&text, 500).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn multibyte_text_never_splits_a_character() {
        let summarizer = TruncationSummarizer::new();
        let text = "héllø wörld ".repeat(2_000);
        // Would panic on a byte-index slice if boundaries were wrong
        let out = summarizer.summarise(&text, 50).await.unwrap();
        assert!(!out.is_empty());
    }
}
