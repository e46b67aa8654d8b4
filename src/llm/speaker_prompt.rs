use serde::Deserialize;

use crate::llm::ChatMessage;
use crate::models::{SPEAKER_CUSTOMER, SPEAKER_SALES_REP};

/// Schema name sent with every speaker classification request.
pub const SPEAKER_SCHEMA_NAME: &str = "speaker_case_v2";

/// Build the two-message prompt for speaker classification.
///
/// The prompt carries exactly the three text fields and nothing else; any
/// metadata (conversation id, ground truth, indexes) would leak the answer.
pub fn speaker_messages(
    previous_text: &str,
    current_text: &str,
    next_text: &str,
) -> Vec<ChatMessage> {
    let system = "Return JSON only. Follow the schema strictly. \
        Step 1: analyze farewell context from previous/current/next text. \
        Step 2: predict the speaker of the current text. \
        Do not use any metadata beyond the three text fields.";
    let user = format!(
        "previous_text: {previous_text:?}\n\
         current_text: {current_text:?}\n\
         next_text: {next_text:?}\n\
         Task:\n\
         1) fill the farewell fields; context_source must be one of current, previous, next, mixed, none\n\
         2) predict the speaker of current_text as {SPEAKER_SALES_REP} or {SPEAKER_CUSTOMER}\n\
         3) evidence_quote must be an exact substring of current_text"
    );
    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

/// Strict JSON schema for the two-step speaker output: a farewell block
/// followed by the speaker prediction itself.
pub fn speaker_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "additionalProperties": false,
        "required": ["farewell", "speaker"],
        "properties": {
            "farewell": {
                "type": "object",
                "additionalProperties": false,
                "required": ["is_current_farewell", "is_closing_context", "context_source"],
                "properties": {
                    "is_current_farewell": {"type": "boolean"},
                    "is_closing_context": {"type": "boolean"},
                    "context_source": {
                        "enum": ["current", "previous", "next", "mixed", "none"]
                    },
                },
            },
            "speaker": {
                "type": "object",
                "additionalProperties": false,
                "required": ["predicted_speaker", "confidence", "evidence_quote"],
                "properties": {
                    "predicted_speaker": {"enum": [SPEAKER_SALES_REP, SPEAKER_CUSTOMER]},
                    "confidence": {"type": "number"},
                    "evidence_quote": {"type": "string"},
                },
            },
        },
    })
}

/// Wire shape of the speaker response, before domain validation.
#[derive(Debug, Clone, Deserialize)]
pub struct SpeakerWireOutput {
    pub farewell: FarewellWire,
    pub speaker: SpeakerWire,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FarewellWire {
    pub is_current_farewell: bool,
    pub is_closing_context: bool,
    /// Kept as a string so an out-of-set value surfaces as a validation
    /// failure rather than a parse failure
    pub context_source: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpeakerWire {
    pub predicted_speaker: String,
    pub confidence: f64,
    pub evidence_quote: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_contain_only_text_context() {
        let messages = speaker_messages("Hi there", "Hello, this is Dana from Acme.", "");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[1].role, "user");
        assert!(messages[1].content.contains("Hello, this is Dana from Acme."));
        for forbidden in ["conversation_id", "utterance_index", "ground_truth"] {
            assert!(
                !messages[1].content.contains(forbidden),
                "prompt leaks {forbidden}"
            );
        }
    }

    #[test]
    fn test_schema_forbids_additional_properties() {
        let schema = speaker_schema();
        assert_eq!(schema["additionalProperties"], false);
        assert_eq!(schema["properties"]["farewell"]["additionalProperties"], false);
        assert_eq!(schema["properties"]["speaker"]["additionalProperties"], false);
    }

    #[test]
    fn test_wire_output_parses() {
        let content = r#"{
            "farewell": {
                "is_current_farewell": true,
                "is_closing_context": true,
                "context_source": "current"
            },
            "speaker": {
                "predicted_speaker": "Sales Rep",
                "confidence": 0.85,
                "evidence_quote": "this is Dana"
            }
        }"#;
        let wire: SpeakerWireOutput = serde_json::from_str(content).unwrap();
        assert!(wire.farewell.is_closing_context);
        assert_eq!(wire.farewell.context_source, "current");
        assert_eq!(wire.speaker.predicted_speaker, "Sales Rep");
        assert_eq!(wire.speaker.confidence, 0.85);
    }
}
