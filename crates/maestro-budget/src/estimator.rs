use crate::catalog::ModelCatalog;
use crate::compress::{compress_context_impl, CompressionResult, CompressionStrategy};
use maestro_core::{ChatMessage, MaestroError, MaestroResult};

/// Fixed per-message formatting overhead (role tags, separators) added on
/// top of the content token count.
pub const MESSAGE_OVERHEAD_TOKENS: usize = 4;

/// Result of a context fit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextFit {
    /// Whether the message set fits within the available budget.
    pub fits: bool,
    /// Tokens the message set currently uses.
    pub used: usize,
    /// Tokens available for the prompt after margin and completion
    /// reservation.
    pub available: usize,
}

/// Token counting, fit checking, and compression against a model catalog.
///
/// Counting is an estimate (characters divided by the model's average
/// chars-per-token), but a deterministic one: the same text and model
/// always yield the same count, and different models can yield different
/// counts for the same text.
#[derive(Debug, Clone, Default)]
pub struct TokenBudget {
    catalog: ModelCatalog,
}

impl TokenBudget {
    /// Budget manager over the built-in model catalog.
    pub fn new() -> Self {
        Self {
            catalog: ModelCatalog::builtin(),
        }
    }

    /// Budget manager over a custom catalog.
    pub fn with_catalog(catalog: ModelCatalog) -> Self {
        Self { catalog }
    }

    /// The underlying model catalog.
    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    /// Estimated token count of `text` under `model`'s tokenizer.
    pub fn count_tokens(&self, text: &str, model: &str) -> usize {
        let spec = self.catalog.spec(model);
        let chars = text.chars().count();
        if chars == 0 {
            return 0;
        }
        ((chars as f32) / spec.chars_per_token).ceil() as usize
    }

    /// Token count of one message including formatting overhead.
    pub fn count_message_tokens(&self, message: &ChatMessage, model: &str) -> usize {
        self.count_tokens(&message.content, model) + MESSAGE_OVERHEAD_TOKENS
    }

    /// Token count of a message set including per-message overhead.
    pub fn count_messages_tokens(&self, messages: &[ChatMessage], model: &str) -> usize {
        messages
            .iter()
            .map(|m| self.count_message_tokens(m, model))
            .sum()
    }

    /// Check whether `messages` plus a completion of up to
    /// `max_completion_tokens` fits the model's context window.
    ///
    /// `available = window * (1 - safety_margin) - max_completion_tokens`.
    /// Pure and idempotent.
    pub fn check_context_fit(
        &self,
        messages: &[ChatMessage],
        model: &str,
        max_completion_tokens: usize,
        safety_margin: f32,
    ) -> ContextFit {
        let window = self.catalog.spec(model).context_window;
        let margin = safety_margin.clamp(0.0, 1.0);
        let usable = ((window as f32) * (1.0 - margin)) as usize;
        let available = usable.saturating_sub(max_completion_tokens);
        let used = self.count_messages_tokens(messages, model);
        ContextFit {
            fits: used <= available,
            used,
            available,
        }
    }

    /// Compress free text to at most `target_tokens` under `model`.
    ///
    /// See [`CompressionStrategy`] for the available strategies. Returns
    /// [`MaestroError::CompressionOverflow`] when the target is below the
    /// minimum preservable unit (one sentence).
    pub fn compress_context(
        &self,
        text: &str,
        model: &str,
        target_tokens: usize,
        strategy: CompressionStrategy,
    ) -> MaestroResult<CompressionResult> {
        compress_context_impl(self, text, model, target_tokens, strategy)
    }

    /// Compress a message set to at most `target_tokens`.
    ///
    /// System messages are kept when `preserve_system` is set, and the
    /// last `preserve_recent` messages are always kept. Droppable
    /// messages are removed oldest-first until the remainder fits.
    /// Returns [`MaestroError::CompressionOverflow`] when the mandatory
    /// set alone already exceeds the target.
    pub fn compress_messages(
        &self,
        messages: &[ChatMessage],
        model: &str,
        target_tokens: usize,
        preserve_system: bool,
        preserve_recent: usize,
    ) -> MaestroResult<Vec<ChatMessage>> {
        let recent_start = messages.len().saturating_sub(preserve_recent);
        let mandatory: Vec<bool> = messages
            .iter()
            .enumerate()
            .map(|(i, m)| {
                (preserve_system && m.role == maestro_core::Role::System) || i >= recent_start
            })
            .collect();

        let mandatory_tokens: usize = messages
            .iter()
            .zip(&mandatory)
            .filter(|(_, keep)| **keep)
            .map(|(m, _)| self.count_message_tokens(m, model))
            .sum();

        if mandatory_tokens > target_tokens {
            return Err(MaestroError::CompressionOverflow(format!(
                "preserved messages alone use {mandatory_tokens} tokens, target is {target_tokens}"
            )));
        }

        let mut keep = vec![true; messages.len()];
        let mut total = self.count_messages_tokens(messages, model);

        // Drop intermediates oldest-first until the set fits.
        for (i, message) in messages.iter().enumerate() {
            if total <= target_tokens {
                break;
            }
            if mandatory[i] {
                continue;
            }
            keep[i] = false;
            total -= self.count_message_tokens(message, model);
        }

        Ok(messages
            .iter()
            .zip(keep)
            .filter(|(_, k)| *k)
            .map(|(m, _)| m.clone())
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::catalog::ModelSpec;
    use maestro_core::ChatMessage;

    fn budget() -> TokenBudget {
        // 1 char == 1 token keeps the arithmetic readable.
        TokenBudget::with_catalog(ModelCatalog::with_default(ModelSpec {
            context_window: 100,
            chars_per_token: 1.0,
        }))
    }

    #[test]
    fn count_tokens_is_deterministic_per_model() {
        let mut catalog = ModelCatalog::with_default(ModelSpec {
            context_window: 100,
            chars_per_token: 1.0,
        });
        catalog.insert(
            "dense",
            ModelSpec {
                context_window: 100,
                chars_per_token: 2.0,
            },
        );
        let budget = TokenBudget::with_catalog(catalog);

        let text = "abcdefgh";
        assert_eq!(budget.count_tokens(text, "plain"), 8);
        assert_eq!(budget.count_tokens(text, "dense"), 4);
        // Same inputs, same answer.
        assert_eq!(
            budget.count_tokens(text, "dense"),
            budget.count_tokens(text, "dense")
        );
    }

    #[test]
    fn empty_text_counts_zero() {
        assert_eq!(budget().count_tokens("", "any"), 0);
    }

    #[test]
    fn message_overhead_is_applied_per_message() {
        let budget = budget();
        let messages = vec![ChatMessage::user("1234"), ChatMessage::assistant("12")];
        assert_eq!(
            budget.count_messages_tokens(&messages, "any"),
            4 + 2 + 2 * MESSAGE_OVERHEAD_TOKENS
        );
    }

    #[test]
    fn check_context_fit_formula() {
        let budget = budget();
        let messages = vec![ChatMessage::user(&"x".repeat(26))]; // 26 + 4 overhead

        // window 100, margin 10% -> usable 90, minus completion 40 -> 50
        let fit = budget.check_context_fit(&messages, "any", 40, 0.1);
        assert_eq!(fit.available, 50);
        assert_eq!(fit.used, 30);
        assert!(fit.fits);

        let fit = budget.check_context_fit(&messages, "any", 70, 0.1);
        assert_eq!(fit.available, 20);
        assert!(!fit.fits);
    }

    #[test]
    fn check_context_fit_is_idempotent() {
        let budget = budget();
        let messages = vec![ChatMessage::user("hello world")];
        let first = budget.check_context_fit(&messages, "any", 10, 0.2);
        for _ in 0..5 {
            assert_eq!(budget.check_context_fit(&messages, "any", 10, 0.2), first);
        }
    }

    #[test]
    fn compress_messages_drops_oldest_first() {
        let budget = budget();
        let messages = vec![
            ChatMessage::system("sys"),       // 3 + 4 = 7
            ChatMessage::user("oldest-1234"), // 11 + 4 = 15
            ChatMessage::user("middle-123"),  // 10 + 4 = 14
            ChatMessage::user("newest"),      // 6 + 4 = 10
        ];
        // Total 46. Target 32 forces dropping "oldest-1234" only.
        let kept = budget
            .compress_messages(&messages, "any", 32, true, 1)
            .unwrap();
        assert_eq!(kept.len(), 3);
        assert_eq!(kept[0].content, "sys");
        assert_eq!(kept[1].content, "middle-123");
        assert_eq!(kept[2].content, "newest");
        assert!(budget.count_messages_tokens(&kept, "any") <= 32);
    }

    #[test]
    fn compress_messages_result_always_fits_or_errors() {
        let budget = budget();
        let messages: Vec<ChatMessage> = (0..50)
            .map(|i| ChatMessage::user(format!("message number {i}")))
            .collect();

        for target in [10usize, 60, 120, 400, 2000] {
            match budget.compress_messages(&messages, "any", target, true, 5) {
                Ok(kept) => {
                    assert!(budget.count_messages_tokens(&kept, "any") <= target);
                }
                Err(MaestroError::CompressionOverflow(_)) => {
                    // Mandatory subset alone exceeds the target — the
                    // contract allows exactly this failure.
                }
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
    }

    #[test]
    fn compress_messages_overflow_when_mandatory_too_big() {
        let budget = budget();
        let mut messages = vec![ChatMessage::system(&"s".repeat(30))];
        for i in 0..50 {
            messages.push(ChatMessage::user(format!("filler {i}")));
        }
        // system (34) + 5 recent (~15 each) is far above 40.
        let err = budget
            .compress_messages(&messages, "any", 40, true, 5)
            .unwrap_err();
        assert!(matches!(err, MaestroError::CompressionOverflow(_)));
    }

    #[test]
    fn compress_messages_can_drop_system_when_not_preserved() {
        let budget = budget();
        let messages = vec![
            ChatMessage::system(&"s".repeat(40)),
            ChatMessage::user("keep me"),
        ];
        let kept = budget
            .compress_messages(&messages, "any", 15, false, 1)
            .unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].content, "keep me");
    }
}
