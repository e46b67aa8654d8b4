use std::future::Future;

use crate::llm::{
    empathy_messages, empathy_schema, EmpathyWireOutput, GatewayError, StructuredCall,
    StructuredGateway, EMPATHY_SCHEMA_NAME,
};
use crate::models::{clamp01, AttemptRecord, EmpathyCaseInput, EmpathyCaseResult, UnitName};
use crate::units::retry::{AttemptOutcome, RetryState};
use crate::units::CaseContext;

/// Detects empathy in a seller utterance.
///
/// Same failure contract as the speaker unit: `evaluate` never fails, an
/// exhausted budget degrades to the deterministic fallback.
pub trait EmpathyClassifier {
    fn evaluate(
        &self,
        ctx: &CaseContext,
        input: &EmpathyCaseInput,
    ) -> impl Future<Output = (EmpathyCaseResult, Vec<AttemptRecord>)> + Send;
}

/// LLM-backed empathy detection unit.
pub struct LlmEmpathyUnit<G> {
    gateway: G,
    model: String,
    max_attempts: u32,
}

impl<G> LlmEmpathyUnit<G> {
    pub fn new(gateway: G, model: impl Into<String>, max_attempts: u32) -> Self {
        Self {
            gateway,
            model: model.into(),
            max_attempts,
        }
    }
}

impl<G: StructuredGateway + Send + Sync> EmpathyClassifier for LlmEmpathyUnit<G> {
    async fn evaluate(
        &self,
        ctx: &CaseContext,
        input: &EmpathyCaseInput,
    ) -> (EmpathyCaseResult, Vec<AttemptRecord>) {
        let messages = empathy_messages(&input.current_text);
        let mut records = Vec::new();
        let mut state = RetryState::start();

        while let Some(attempt) = state.pending_attempt() {
            if ctx.cancel.is_cancelled() {
                state = RetryState::Exhausted;
                break;
            }

            let call = self
                .gateway
                .call_structured(&self.model, &messages, EMPATHY_SCHEMA_NAME, empathy_schema())
                .await;
            let (outcome, record) =
                self.classify_attempt(ctx, attempt, call, &input.current_text);
            records.push(record);
            state = state.advance(outcome, self.max_attempts);
        }

        match state {
            RetryState::Accepted(result) => (result, records),
            _ => (EmpathyCaseResult::fallback(), records),
        }
    }
}

impl<G> LlmEmpathyUnit<G> {
    fn classify_attempt(
        &self,
        ctx: &CaseContext,
        attempt: u32,
        call: Result<StructuredCall, GatewayError>,
        current_text: &str,
    ) -> (AttemptOutcome<EmpathyCaseResult>, AttemptRecord) {
        let call = match call {
            Err(e) => {
                let record = self.record(
                    ctx,
                    attempt,
                    e.request_json.clone(),
                    e.http_status,
                    e.response_json.clone(),
                    String::new(),
                    false,
                    false,
                    format!("call_error: {e}"),
                );
                return (AttemptOutcome::TransportFailed, record);
            }
            Ok(call) => call,
        };

        let wire: EmpathyWireOutput = match serde_json::from_str(&call.extracted_content) {
            Err(e) => {
                let record = self.record(
                    ctx,
                    attempt,
                    call.request_json,
                    Some(call.http_status),
                    call.response_json,
                    call.extracted_content,
                    false,
                    false,
                    format!("parse_error: {e}"),
                );
                return (AttemptOutcome::ParseFailed, record);
            }
            Ok(wire) => wire,
        };

        let candidate = EmpathyCaseResult {
            present: wire.empathy_present,
            confidence: clamp01(wire.confidence),
            evidence_quote: wire.evidence_quote.trim().to_string(),
            evidence_is_valid: false,
        };
        let errors = validate_empathy_output(current_text, &candidate);

        if errors.is_empty() {
            let record = self.record(
                ctx,
                attempt,
                call.request_json,
                Some(call.http_status),
                call.response_json,
                call.extracted_content,
                true,
                true,
                String::new(),
            );
            (AttemptOutcome::Valid(accept(candidate)), record)
        } else {
            let record = self.record(
                ctx,
                attempt,
                call.request_json,
                Some(call.http_status),
                call.response_json,
                call.extracted_content,
                true,
                false,
                format!("validation_error: {}", errors.join("; ")),
            );
            (AttemptOutcome::ValidationFailed, record)
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &self,
        ctx: &CaseContext,
        attempt: u32,
        request_json: String,
        http_status: Option<u16>,
        response_json: String,
        extracted_content: String,
        parse_ok: bool,
        validation_ok: bool,
        error_message: String,
    ) -> AttemptRecord {
        AttemptRecord {
            conversation_id: ctx.conversation_id.clone(),
            utterance_index: ctx.utterance_index,
            unit: UnitName::Empathy,
            attempt,
            model: self.model.clone(),
            request_json,
            http_status,
            response_json,
            extracted_content,
            parse_ok,
            validation_ok,
            error_message,
            created_at_utc: AttemptRecord::timestamp_now(),
        }
    }
}

/// Domain validation of a parsed empathy response.
///
/// Evidence rules apply only when empathy is reported present; a negative
/// result cites nothing and its quote is ignored.
pub fn validate_empathy_output(current_text: &str, out: &EmpathyCaseResult) -> Vec<String> {
    let mut errors = Vec::new();
    if out.present {
        if out.evidence_quote.is_empty() {
            errors.push("evidence_quote is empty".to_string());
        } else if !current_text.contains(&out.evidence_quote) {
            errors.push("evidence_quote is not a substring of current_text".to_string());
        }
    }
    errors
}

/// Finalize an accepted candidate: a positive result has validated evidence,
/// a negative one carries no quote at all.
fn accept(mut candidate: EmpathyCaseResult) -> EmpathyCaseResult {
    if candidate.present {
        candidate.evidence_is_valid = true;
    } else {
        candidate.evidence_quote.clear();
        candidate.evidence_is_valid = false;
    }
    candidate
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::support::ScriptedGateway;

    fn input(current: &str) -> EmpathyCaseInput {
        EmpathyCaseInput {
            current_text: current.to_string(),
        }
    }

    #[tokio::test]
    async fn test_present_with_valid_evidence() {
        let content = r#"{
            "empathy_present": true,
            "confidence": 0.8,
            "evidence_quote": "I understand how frustrating"
        }"#;
        let gateway = ScriptedGateway::new(vec![ScriptedGateway::ok(content)]);
        let unit = LlmEmpathyUnit::new(gateway, "test-model", 2);
        let ctx = CaseContext::new("conv_a", 2);

        let (result, records) = unit
            .evaluate(&ctx, &input("I understand how frustrating that must be."))
            .await;

        assert!(result.present);
        assert_eq!(result.confidence, 0.8);
        assert!(result.evidence_is_valid);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].unit, UnitName::Empathy);
        assert!(records[0].validation_ok);
    }

    #[tokio::test]
    async fn test_absent_ignores_evidence_quote() {
        let content = r#"{
            "empathy_present": false,
            "confidence": 0.95,
            "evidence_quote": "this quote is nowhere in the text"
        }"#;
        let gateway = ScriptedGateway::new(vec![ScriptedGateway::ok(content)]);
        let unit = LlmEmpathyUnit::new(gateway, "test-model", 2);
        let ctx = CaseContext::new("conv_a", 4);

        let (result, records) = unit
            .evaluate(&ctx, &input("Our plan starts at forty dollars."))
            .await;

        assert!(!result.present);
        assert_eq!(result.confidence, 0.95);
        assert!(result.evidence_quote.is_empty());
        assert!(!result.evidence_is_valid);
        assert!(records[0].validation_ok);
    }

    #[tokio::test]
    async fn test_present_with_bad_evidence_retries_then_falls_back() {
        let content = r#"{
            "empathy_present": true,
            "confidence": 0.8,
            "evidence_quote": "never said this"
        }"#;
        let gateway = ScriptedGateway::new(vec![
            ScriptedGateway::ok(content),
            ScriptedGateway::ok(content),
        ]);
        let unit = LlmEmpathyUnit::new(gateway, "test-model", 2);
        let ctx = CaseContext::new("conv_b", 1);

        let (result, records) = unit.evaluate(&ctx, &input("Let me check the order.")).await;

        assert_eq!(result, EmpathyCaseResult::fallback());
        assert_eq!(records.len(), 2);
        assert!(records
            .iter()
            .all(|r| r.parse_ok && !r.validation_ok));
        assert_eq!(records[0].attempt, 1);
        assert_eq!(records[1].attempt, 2);
    }

    #[tokio::test]
    async fn test_http_error_then_recovery() {
        let content = r#"{
            "empathy_present": false,
            "confidence": 0.2,
            "evidence_quote": ""
        }"#;
        let gateway = ScriptedGateway::new(vec![
            ScriptedGateway::http_error(503),
            ScriptedGateway::ok(content),
        ]);
        let unit = LlmEmpathyUnit::new(gateway, "test-model", 2);
        let ctx = CaseContext::new("conv_c", 6);

        let (result, records) = unit.evaluate(&ctx, &input("Thanks for waiting.")).await;

        assert!(!result.present);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].http_status, Some(503));
        assert!(records[0].error_message.starts_with("call_error"));
        assert!(records[1].validation_ok);
    }
}
