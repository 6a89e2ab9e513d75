use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::notification::truncate_chars;

/// Longest body excerpt (in chars) an alert carries by default
pub const DEFAULT_BODY_EXCERPT_CHARS: usize = 200;

const MASK_PREFIX_CHARS: usize = 6;
const MASK_SUFFIX_CHARS: usize = 4;
const FULL_MASK: &str = "****";

/// Mask a device token for logs and alerts: `abcdef…wxyz`.
///
/// Tokens too short to keep a prefix and a suffix without revealing most of
/// them are masked entirely.
pub fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.trim().chars().collect();
    if chars.len() <= MASK_PREFIX_CHARS + MASK_SUFFIX_CHARS {
        return FULL_MASK.to_string();
    }

    let prefix: String = chars[..MASK_PREFIX_CHARS].iter().collect();
    let suffix: String = chars[chars.len() - MASK_SUFFIX_CHARS..].iter().collect();
    format!("{}…{}", prefix, suffix)
}

/// Where in the pipeline the failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EscalationStage {
    /// First attempt by the delivery worker
    InitialDelivery,
    /// A retry sweep attempt failed (`attempt` is the new retry count)
    RetrySweep { attempt: u32 },
    /// The record ran out of retries and was dead-lettered
    Exhausted,
}

impl EscalationStage {
    pub fn label(&self) -> &'static str {
        match self {
            EscalationStage::InitialDelivery => "initial_delivery",
            EscalationStage::RetrySweep { .. } => "retry_sweep",
            EscalationStage::Exhausted => "exhausted",
        }
    }
}

/// Alert describing one failed delivery attempt.
#[derive(Debug, Clone, Serialize)]
pub struct EscalationAlert {
    pub masked_token: String,
    pub title: String,
    pub body_excerpt: Option<String>,
    pub reason: String,
    pub stage: EscalationStage,
    pub occurred_at: DateTime<Utc>,
}

impl EscalationAlert {
    /// Build an alert; `raw_token` is masked here and not kept.
    pub fn new(
        raw_token: &str,
        title: &str,
        body: Option<&str>,
        reason: impl Into<String>,
        stage: EscalationStage,
        body_max_chars: usize,
    ) -> Self {
        Self {
            masked_token: mask_token(raw_token),
            title: title.to_string(),
            body_excerpt: body.map(|b| truncate_chars(b, body_max_chars)),
            reason: reason.into(),
            stage,
            occurred_at: Utc::now(),
        }
    }

    /// Plain-text rendering for chat channels.
    pub fn to_text(&self) -> String {
        let headline = match self.stage {
            EscalationStage::InitialDelivery => "Push delivery failed".to_string(),
            EscalationStage::RetrySweep { attempt } => {
                format!("Push retry #{} failed", attempt)
            }
            EscalationStage::Exhausted => "Push delivery gave up after all retries".to_string(),
        };

        let mut text = format!(
            "{}\ntoken: {}\ntitle: {}\n",
            headline, self.masked_token, self.title
        );
        if let Some(body) = &self.body_excerpt {
            text.push_str(&format!("body: {}\n", body));
        }
        text.push_str(&format!(
            "reason: {}\nat: {}",
            self.reason,
            self.occurred_at.to_rfc3339()
        ));
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_keeps_prefix_and_suffix() {
        assert_eq!(mask_token("abcdefghijklmnopqrstuvwxyz"), "abcdef…wxyz");
        assert_eq!(mask_token("abcdefghijk"), "abcdef…hijk");
    }

    #[test]
    fn test_short_tokens_are_fully_masked() {
        assert_eq!(mask_token("abcdefghij"), "****");
        assert_eq!(mask_token("abc"), "****");
        assert_eq!(mask_token(""), "****");
        assert_eq!(mask_token("   "), "****");
    }

    #[test]
    fn test_mask_is_char_safe() {
        let masked = mask_token("토큰토큰토큰토큰토큰토큰");
        assert_eq!(masked, "토큰토큰토큰…토큰토큰");
    }

    #[test]
    fn test_body_excerpt_is_bounded() {
        let body = "x".repeat(500);
        let alert = EscalationAlert::new(
            "token-abcdefghijk",
            "title",
            Some(&body),
            "provider error",
            EscalationStage::InitialDelivery,
            DEFAULT_BODY_EXCERPT_CHARS,
        );
        let excerpt = alert.body_excerpt.unwrap();
        assert_eq!(excerpt.chars().count(), DEFAULT_BODY_EXCERPT_CHARS);
        assert!(excerpt.ends_with('…'));
    }

    #[test]
    fn test_text_rendering() {
        let alert = EscalationAlert::new(
            "token-abcdefghijk",
            "New follower",
            None,
            "timeout",
            EscalationStage::RetrySweep { attempt: 2 },
            200,
        );
        let text = alert.to_text();
        assert!(text.starts_with("Push retry #2 failed"));
        assert!(text.contains("token: token-…hijk"));
        assert!(!text.contains("body:"));
    }

    #[test]
    fn test_stage_serialization() {
        let json = serde_json::to_value(EscalationStage::RetrySweep { attempt: 1 }).unwrap();
        assert_eq!(json["kind"], "retry_sweep");
        assert_eq!(json["attempt"], 1);
    }
}
