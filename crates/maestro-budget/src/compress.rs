use crate::estimator::TokenBudget;
use maestro_core::{MaestroError, MaestroResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// How to shrink a block of text down to a token target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionStrategy {
    /// Keep leading sentences, drop the rest.
    Head,
    /// Keep trailing sentences, drop the rest.
    Tail,
    /// Keep both ends, drop the middle.
    Window,
    /// Try every explicit strategy and keep the one retaining the most
    /// tokens within the target.
    Auto,
}

/// Outcome of one compression pass. Immutable, purely informational
/// apart from the compressed `text` itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionResult {
    /// The compressed text.
    pub text: String,
    /// Token count before compression.
    pub original_tokens: usize,
    /// Token count after compression.
    pub compressed_tokens: usize,
    /// `compressed_tokens / original_tokens`.
    pub compression_ratio: f32,
    /// The strategy that produced `text`.
    pub strategy_used: CompressionStrategy,
}

#[allow(clippy::expect_used)]
fn sentence_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[^.!?]*[.!?]+\s*|[^.!?]+$").expect("sentence pattern is valid")
    })
}

/// Split text into sentence units. A unit is the minimum preservable
/// piece of context — compression never cuts inside one.
fn split_sentences(text: &str) -> Vec<&str> {
    sentence_regex()
        .find_iter(text)
        .map(|m| m.as_str().trim())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Greedily take sentences from an iterator while the assembled text
/// stays within `target` tokens.
fn take_within<'a>(
    budget: &TokenBudget,
    model: &str,
    target: usize,
    sentences: impl Iterator<Item = &'a str>,
) -> Vec<&'a str> {
    let mut taken: Vec<&str> = Vec::new();
    let mut assembled = String::new();
    for sentence in sentences {
        let candidate = if assembled.is_empty() {
            sentence.to_string()
        } else {
            format!("{assembled} {sentence}")
        };
        if budget.count_tokens(&candidate, model) > target {
            break;
        }
        assembled = candidate;
        taken.push(sentence);
    }
    taken
}

fn overflow(target: usize) -> MaestroError {
    MaestroError::CompressionOverflow(format!(
        "target of {target} tokens is below one sentence"
    ))
}

fn finish(
    budget: &TokenBudget,
    model: &str,
    text: String,
    original_tokens: usize,
    strategy_used: CompressionStrategy,
) -> CompressionResult {
    let compressed_tokens = budget.count_tokens(&text, model);
    let compression_ratio = if original_tokens == 0 {
        1.0
    } else {
        compressed_tokens as f32 / original_tokens as f32
    };
    CompressionResult {
        text,
        original_tokens,
        compressed_tokens,
        compression_ratio,
        strategy_used,
    }
}

pub(crate) fn compress_context_impl(
    budget: &TokenBudget,
    text: &str,
    model: &str,
    target_tokens: usize,
    strategy: CompressionStrategy,
) -> MaestroResult<CompressionResult> {
    let original_tokens = budget.count_tokens(text, model);
    if original_tokens <= target_tokens {
        return Ok(finish(
            budget,
            model,
            text.to_string(),
            original_tokens,
            strategy,
        ));
    }

    let sentences = split_sentences(text);

    match strategy {
        CompressionStrategy::Head => {
            let taken = take_within(budget, model, target_tokens, sentences.iter().copied());
            if taken.is_empty() {
                return Err(overflow(target_tokens));
            }
            Ok(finish(
                budget,
                model,
                taken.join(" "),
                original_tokens,
                CompressionStrategy::Head,
            ))
        }
        CompressionStrategy::Tail => {
            let mut taken =
                take_within(budget, model, target_tokens, sentences.iter().rev().copied());
            if taken.is_empty() {
                return Err(overflow(target_tokens));
            }
            taken.reverse();
            Ok(finish(
                budget,
                model,
                taken.join(" "),
                original_tokens,
                CompressionStrategy::Tail,
            ))
        }
        CompressionStrategy::Window => {
            let head = take_within(
                budget,
                model,
                target_tokens / 2,
                sentences.iter().copied(),
            );
            let marker = "...";
            let head_text = head.join(" ");
            let head_used = budget.count_tokens(&head_text, model)
                + budget.count_tokens(marker, model);
            let tail_budget = target_tokens.saturating_sub(head_used);
            let mut tail = take_within(
                budget,
                model,
                tail_budget,
                sentences.iter().skip(head.len()).rev().copied(),
            );
            tail.reverse();

            if head.is_empty() && tail.is_empty() {
                return Err(overflow(target_tokens));
            }

            let mut text = String::new();
            if !head.is_empty() {
                text.push_str(&head_text);
            }
            if !tail.is_empty() {
                if !text.is_empty() {
                    text.push(' ');
                }
                text.push_str(marker);
                text.push(' ');
                text.push_str(&tail.join(" "));
            }

            // The marker itself can tip a borderline assembly over the
            // target; fall back to the head half alone in that case.
            if budget.count_tokens(&text, model) > target_tokens {
                if head.is_empty() {
                    return Err(overflow(target_tokens));
                }
                text = head_text;
            }

            Ok(finish(
                budget,
                model,
                text,
                original_tokens,
                CompressionStrategy::Window,
            ))
        }
        CompressionStrategy::Auto => {
            let candidates = [
                CompressionStrategy::Head,
                CompressionStrategy::Tail,
                CompressionStrategy::Window,
            ]
            .into_iter()
            .filter_map(|s| compress_context_impl(budget, text, model, target_tokens, s).ok());

            candidates
                .max_by_key(|r| r.compressed_tokens)
                .ok_or_else(|| overflow(target_tokens))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::catalog::{ModelCatalog, ModelSpec};

    fn budget() -> TokenBudget {
        TokenBudget::with_catalog(ModelCatalog::with_default(ModelSpec {
            context_window: 1_000,
            chars_per_token: 1.0,
        }))
    }

    const TEXT: &str = "Alpha first sentence. Beta second sentence. \
                        Gamma third sentence. Delta fourth sentence. \
                        Epsilon fifth sentence.";

    #[test]
    fn split_keeps_sentence_units() {
        let sentences = split_sentences(TEXT);
        assert_eq!(sentences.len(), 5);
        assert_eq!(sentences[0], "Alpha first sentence.");
        assert_eq!(sentences[4], "Epsilon fifth sentence.");
    }

    #[test]
    fn split_handles_unterminated_tail() {
        let sentences = split_sentences("One. Two without period");
        assert_eq!(sentences, vec!["One.", "Two without period"]);
    }

    #[test]
    fn text_within_target_is_untouched() {
        let budget = budget();
        let result = budget
            .compress_context(TEXT, "any", 10_000, CompressionStrategy::Head)
            .unwrap();
        assert_eq!(result.text, TEXT);
        assert_eq!(result.compression_ratio, 1.0);
    }

    #[test]
    fn head_keeps_leading_sentences() {
        let budget = budget();
        let result = budget
            .compress_context(TEXT, "any", 50, CompressionStrategy::Head)
            .unwrap();
        assert!(result.text.starts_with("Alpha first sentence."));
        assert!(!result.text.contains("Epsilon"));
        assert!(result.compressed_tokens <= 50);
        assert!(result.compressed_tokens < result.original_tokens);
    }

    #[test]
    fn tail_keeps_trailing_sentences_in_order() {
        let budget = budget();
        let result = budget
            .compress_context(TEXT, "any", 50, CompressionStrategy::Tail)
            .unwrap();
        assert!(result.text.ends_with("Epsilon fifth sentence."));
        assert!(!result.text.contains("Alpha"));
        assert!(result.compressed_tokens <= 50);
        // Retained sentences keep their original relative order.
        let delta = result.text.find("Delta").unwrap();
        let epsilon = result.text.find("Epsilon").unwrap();
        assert!(delta < epsilon);
    }

    #[test]
    fn window_keeps_both_ends() {
        let budget = budget();
        let result = budget
            .compress_context(TEXT, "any", 60, CompressionStrategy::Window)
            .unwrap();
        assert!(result.text.contains("Alpha"));
        assert!(result.text.contains("Epsilon"));
        assert!(result.text.contains("..."));
        assert!(!result.text.contains("Gamma"));
        assert!(result.compressed_tokens <= 60);
    }

    #[test]
    fn auto_picks_densest_candidate() {
        let budget = budget();
        let auto = budget
            .compress_context(TEXT, "any", 60, CompressionStrategy::Auto)
            .unwrap();
        for strategy in [
            CompressionStrategy::Head,
            CompressionStrategy::Tail,
            CompressionStrategy::Window,
        ] {
            if let Ok(explicit) = budget.compress_context(TEXT, "any", 60, strategy) {
                assert!(auto.compressed_tokens >= explicit.compressed_tokens);
            }
        }
        assert!(auto.compressed_tokens <= 60);
    }

    #[test]
    fn target_below_one_sentence_overflows() {
        let budget = budget();
        for strategy in [
            CompressionStrategy::Head,
            CompressionStrategy::Tail,
            CompressionStrategy::Window,
            CompressionStrategy::Auto,
        ] {
            let err = budget
                .compress_context(TEXT, "any", 3, strategy)
                .unwrap_err();
            assert!(matches!(err, MaestroError::CompressionOverflow(_)));
        }
    }

    #[test]
    fn result_reports_strategy_and_ratio() {
        let budget = budget();
        let result = budget
            .compress_context(TEXT, "any", 50, CompressionStrategy::Tail)
            .unwrap();
        assert_eq!(result.strategy_used, CompressionStrategy::Tail);
        let expected = result.compressed_tokens as f32 / result.original_tokens as f32;
        assert!((result.compression_ratio - expected).abs() < f32::EPSILON);
    }
}
