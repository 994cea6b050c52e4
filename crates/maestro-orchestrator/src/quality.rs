use async_trait::async_trait;
use maestro_core::{ChatMessage, MaestroResult};
use maestro_llm::LlmGateway;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// One named check inside a quality verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityCheck {
    /// What was checked.
    pub name: String,
    /// Whether it passed.
    pub passed: bool,
}

/// Verdict of a post-execution quality evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityReport {
    /// Overall verdict; `false` fails the task.
    pub passed: bool,
    /// Score in `[0, 1]`.
    pub score: f32,
    /// Individual checks.
    #[serde(default)]
    pub checks: Vec<QualityCheck>,
    /// Suggested improvements.
    #[serde(default)]
    pub recommendations: Vec<String>,
}

/// Post-execution evaluation hook. A failing verdict converts an
/// otherwise-successful task into a failed one (artifacts retained).
#[async_trait]
pub trait QualityGate: Send + Sync {
    /// Evaluate the final artifact against the task description. The
    /// task's own gateway is passed in so LLM-backed gates reuse its
    /// resilience policy and billing identity.
    async fn evaluate(
        &self,
        gateway: &LlmGateway,
        description: &str,
        artifact: &str,
    ) -> MaestroResult<QualityReport>;
}

/// The shipped gate: asks the model itself for a JSON verdict.
///
/// An unparseable verdict counts as a failure rather than an error —
/// a gate that cannot explain itself should not wave tasks through.
#[derive(Debug, Default)]
pub struct LlmQualityGate;

const VERDICT_INSTRUCTIONS: &str = "You are a strict quality reviewer. Evaluate whether the \
answer below satisfies the stated goal. Respond with JSON only, in the shape \
{\"passed\": bool, \"score\": number between 0 and 1, \"checks\": \
[{\"name\": string, \"passed\": bool}], \"recommendations\": [string]}.";

impl LlmQualityGate {
    fn parse_verdict(content: &str) -> Option<QualityReport> {
        // Models occasionally wrap the JSON in prose or fences; take
        // the outermost object.
        let start = content.find('{')?;
        let end = content.rfind('}')?;
        serde_json::from_str(&content[start..=end]).ok()
    }
}

#[async_trait]
impl QualityGate for LlmQualityGate {
    async fn evaluate(
        &self,
        gateway: &LlmGateway,
        description: &str,
        artifact: &str,
    ) -> MaestroResult<QualityReport> {
        let messages = vec![
            ChatMessage::system(VERDICT_INSTRUCTIONS),
            ChatMessage::user(format!("Goal:\n{description}\n\nAnswer:\n{artifact}")),
        ];
        let resp = gateway.complete(&messages).await?;

        Ok(Self::parse_verdict(&resp.content).unwrap_or_else(|| {
            warn!("Quality verdict was not valid JSON, treating as failed");
            QualityReport {
                passed: false,
                score: 0.0,
                checks: vec![QualityCheck {
                    name: "verdict_parseable".to_string(),
                    passed: false,
                }],
                recommendations: vec!["re-run the quality evaluation".to_string()],
            }
        }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn verdict_parses_from_clean_json() {
        let report = LlmQualityGate::parse_verdict(
            r#"{"passed": true, "score": 0.9, "checks": [], "recommendations": []}"#,
        )
        .unwrap();
        assert!(report.passed);
        assert_eq!(report.score, 0.9);
    }

    #[test]
    fn verdict_parses_from_fenced_json() {
        let content = "Here is my verdict:\n```json\n{\"passed\": false, \"score\": 0.2, \
                       \"checks\": [{\"name\": \"accuracy\", \"passed\": false}], \
                       \"recommendations\": [\"cite sources\"]}\n```";
        let report = LlmQualityGate::parse_verdict(content).unwrap();
        assert!(!report.passed);
        assert_eq!(report.checks.len(), 1);
        assert_eq!(report.recommendations[0], "cite sources");
    }

    #[test]
    fn garbage_verdict_is_none() {
        assert!(LlmQualityGate::parse_verdict("no json here").is_none());
    }
}
