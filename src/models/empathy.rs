/// Input to the empathy classification unit: the seller utterance alone,
/// without speaker label or neighbor context.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EmpathyCaseInput {
    pub current_text: String,
}

/// Raw output of the empathy classification unit.
#[derive(Debug, Clone, PartialEq)]
pub struct EmpathyCaseResult {
    pub present: bool,
    pub confidence: f64,
    pub evidence_quote: String,
    pub evidence_is_valid: bool,
}

impl EmpathyCaseResult {
    /// Deterministic result used when the retry budget is exhausted.
    pub fn fallback() -> Self {
        Self {
            present: false,
            confidence: 0.0,
            evidence_quote: String::new(),
            evidence_is_valid: false,
        }
    }
}

/// Empathy result after routing.
///
/// Empathy only applies to seller utterances; for other rows the unit is
/// never invoked and every field stays at its default.
#[derive(Debug, Clone, PartialEq)]
pub struct EmpathyDecision {
    pub applicable: bool,
    pub case: EmpathyCaseResult,
}

impl EmpathyDecision {
    pub fn not_applicable() -> Self {
        Self {
            applicable: false,
            case: EmpathyCaseResult::fallback(),
        }
    }

    pub fn applicable(case: EmpathyCaseResult) -> Self {
        Self {
            applicable: true,
            case,
        }
    }
}
