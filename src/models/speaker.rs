use std::fmt;

use crate::models::transcript::SPEAKER_CUSTOMER;

/// Where the farewell closing signal was detected, if anywhere.
///
/// `None` is only legal when the conversation-closing flag is false; the
/// speaker unit rejects responses that violate this in either direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FarewellContextSource {
    Current,
    Previous,
    Next,
    Mixed,
    #[default]
    None,
}

impl FarewellContextSource {
    /// Parse a model-provided value. Case-insensitive and trim-tolerant;
    /// anything outside the closed set is a validation failure, so this
    /// returns `Option` rather than defaulting silently.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "current" => Some(Self::Current),
            "previous" => Some(Self::Previous),
            "next" => Some(Self::Next),
            "mixed" => Some(Self::Mixed),
            "none" => Some(Self::None),
            _ => Option::None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Current => "current",
            Self::Previous => "previous",
            Self::Next => "next",
            Self::Mixed => "mixed",
            Self::None => "none",
        }
    }
}

impl fmt::Display for FarewellContextSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input to the speaker classification unit.
///
/// Exactly three text fields. No metadata that could leak the answer is ever
/// passed to the model; neighbor fields are empty strings at conversation
/// edges.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SpeakerCaseInput {
    pub previous_text: String,
    pub current_text: String,
    pub next_text: String,
}

/// Raw, pre-decision output of the speaker classification unit.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeakerCaseResult {
    pub predicted_speaker: String,
    pub confidence: f64,
    pub farewell_is_current_utterance: bool,
    pub farewell_is_conversation_closing: bool,
    pub farewell_context_source: FarewellContextSource,
    pub evidence_quote: String,
    pub evidence_is_valid: bool,
}

impl SpeakerCaseResult {
    /// Deterministic result used when the retry budget is exhausted.
    ///
    /// A conservative default rather than a best guess from partial data: the
    /// non-seller role with zero confidence and invalid evidence, so the
    /// output schema is always populated and the degradation stays visible.
    pub fn fallback() -> Self {
        Self {
            predicted_speaker: SPEAKER_CUSTOMER.to_string(),
            confidence: 0.0,
            farewell_is_current_utterance: false,
            farewell_is_conversation_closing: false,
            farewell_context_source: FarewellContextSource::None,
            evidence_quote: String::new(),
            evidence_is_valid: false,
        }
    }
}

/// Business quality label for one speaker prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityDecision {
    StrictMatch,
    StrictMismatch,
    FarewellContextOverride,
    NoGroundTruth,
}

impl QualityDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StrictMatch => "strict_match",
            Self::StrictMismatch => "strict_mismatch",
            Self::FarewellContextOverride => "farewell_context_override",
            Self::NoGroundTruth => "no_ground_truth",
        }
    }
}

impl fmt::Display for QualityDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Speaker result after the quality decision has been applied.
///
/// The predicted speaker inside `case` is never rewritten; only the two
/// correctness flags and the decision label are derived on top of it.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeakerDecision {
    pub case: SpeakerCaseResult,
    pub is_correct_raw: bool,
    pub is_correct_final: bool,
    pub quality_decision: QualityDecision,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_source_parse_closed_set() {
        assert_eq!(
            FarewellContextSource::parse(" Mixed "),
            Some(FarewellContextSource::Mixed)
        );
        assert_eq!(
            FarewellContextSource::parse("NONE"),
            Some(FarewellContextSource::None)
        );
        assert_eq!(FarewellContextSource::parse("afterwards"), None);
        assert_eq!(FarewellContextSource::parse(""), None);
    }

    #[test]
    fn test_fallback_is_non_seller_with_zero_confidence() {
        let fb = SpeakerCaseResult::fallback();
        assert_eq!(fb.predicted_speaker, SPEAKER_CUSTOMER);
        assert_eq!(fb.confidence, 0.0);
        assert!(!fb.farewell_is_conversation_closing);
        assert_eq!(fb.farewell_context_source, FarewellContextSource::None);
        assert!(!fb.evidence_is_valid);
    }

    #[test]
    fn test_quality_decision_labels() {
        assert_eq!(QualityDecision::StrictMatch.as_str(), "strict_match");
        assert_eq!(
            QualityDecision::FarewellContextOverride.to_string(),
            "farewell_context_override"
        );
    }
}
