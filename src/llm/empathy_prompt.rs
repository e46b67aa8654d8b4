use serde::Deserialize;

use crate::llm::ChatMessage;

/// Schema name sent with every empathy detection request.
pub const EMPATHY_SCHEMA_NAME: &str = "empathy_case_v2";

/// Build the two-message prompt for empathy detection.
///
/// The unit sees the seller utterance alone: no speaker label, no neighbors.
pub fn empathy_messages(current_text: &str) -> Vec<ChatMessage> {
    let system = "Return JSON only. Detect empathy in the current text. \
        Do not use any metadata beyond current_text.";
    let user = format!(
        "current_text: {current_text:?}\n\
         Task: return empathy_present, confidence, and evidence_quote, \
         where evidence_quote is an exact substring of current_text."
    );
    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

/// Strict JSON schema for the empathy output.
pub fn empathy_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "additionalProperties": false,
        "required": ["empathy_present", "confidence", "evidence_quote"],
        "properties": {
            "empathy_present": {"type": "boolean"},
            "confidence": {"type": "number"},
            "evidence_quote": {"type": "string"},
        },
    })
}

/// Wire shape of the empathy response, before domain validation.
#[derive(Debug, Clone, Deserialize)]
pub struct EmpathyWireOutput {
    pub empathy_present: bool,
    pub confidence: f64,
    pub evidence_quote: String,
}
