use std::future::Future;

use crate::llm::{
    speaker_messages, speaker_schema, GatewayError, SpeakerWireOutput, StructuredCall,
    StructuredGateway, SPEAKER_SCHEMA_NAME,
};
use crate::models::{
    canonical_speaker_label, clamp01, AttemptRecord, FarewellContextSource, SpeakerCaseInput,
    SpeakerCaseResult, UnitName, SPEAKER_CUSTOMER, SPEAKER_SALES_REP,
};
use crate::units::retry::{AttemptOutcome, RetryState};
use crate::units::CaseContext;

/// Attributes an utterance to a speaker role from text context alone.
///
/// `evaluate` never fails: model-side trouble degrades to the deterministic
/// fallback result, and the attempt trail is the only place the degradation
/// is visible in detail.
pub trait SpeakerClassifier {
    fn evaluate(
        &self,
        ctx: &CaseContext,
        input: &SpeakerCaseInput,
    ) -> impl Future<Output = (SpeakerCaseResult, Vec<AttemptRecord>)> + Send;
}

/// LLM-backed speaker classification unit.
pub struct LlmSpeakerUnit<G> {
    gateway: G,
    model: String,
    max_attempts: u32,
}

impl<G> LlmSpeakerUnit<G> {
    pub fn new(gateway: G, model: impl Into<String>, max_attempts: u32) -> Self {
        Self {
            gateway,
            model: model.into(),
            max_attempts,
        }
    }
}

impl<G: StructuredGateway + Send + Sync> SpeakerClassifier for LlmSpeakerUnit<G> {
    async fn evaluate(
        &self,
        ctx: &CaseContext,
        input: &SpeakerCaseInput,
    ) -> (SpeakerCaseResult, Vec<AttemptRecord>) {
        let messages =
            speaker_messages(&input.previous_text, &input.current_text, &input.next_text);
        let mut records = Vec::new();
        let mut state = RetryState::start();

        while let Some(attempt) = state.pending_attempt() {
            if ctx.cancel.is_cancelled() {
                state = RetryState::Exhausted;
                break;
            }

            let call = self
                .gateway
                .call_structured(&self.model, &messages, SPEAKER_SCHEMA_NAME, speaker_schema())
                .await;
            let (outcome, record) =
                self.classify_attempt(ctx, attempt, call, &input.current_text);
            records.push(record);
            state = state.advance(outcome, self.max_attempts);
        }

        match state {
            RetryState::Accepted(result) => (result, records),
            _ => (SpeakerCaseResult::fallback(), records),
        }
    }
}

impl<G> LlmSpeakerUnit<G> {
    fn classify_attempt(
        &self,
        ctx: &CaseContext,
        attempt: u32,
        call: Result<StructuredCall, GatewayError>,
        current_text: &str,
    ) -> (AttemptOutcome<SpeakerCaseResult>, AttemptRecord) {
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

        let wire: SpeakerWireOutput = match serde_json::from_str(&call.extracted_content) {
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

        let parsed_source = FarewellContextSource::parse(&wire.farewell.context_source);
        let mut candidate = SpeakerCaseResult {
            predicted_speaker: canonical_speaker_label(&wire.speaker.predicted_speaker),
            confidence: clamp01(wire.speaker.confidence),
            farewell_is_current_utterance: wire.farewell.is_current_farewell,
            farewell_is_conversation_closing: wire.farewell.is_closing_context,
            farewell_context_source: parsed_source.unwrap_or_default(),
            evidence_quote: wire.speaker.evidence_quote.trim().to_string(),
            evidence_is_valid: false,
        };

        let mut errors = Vec::new();
        if parsed_source.is_none() {
            errors.push(format!(
                "context_source {:?} is not in the closed set",
                wire.farewell.context_source
            ));
        }
        errors.extend(validate_speaker_output(current_text, &candidate));

        if errors.is_empty() {
            candidate.evidence_is_valid = true;
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
            (AttemptOutcome::Valid(candidate), record)
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
            unit: UnitName::Speaker,
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

/// Domain validation of a parsed speaker response against its input text.
pub fn validate_speaker_output(current_text: &str, out: &SpeakerCaseResult) -> Vec<String> {
    let mut errors = Vec::new();
    if out.predicted_speaker != SPEAKER_SALES_REP && out.predicted_speaker != SPEAKER_CUSTOMER {
        errors.push(format!(
            "predicted_speaker must be {SPEAKER_SALES_REP} or {SPEAKER_CUSTOMER}"
        ));
    }
    if out.farewell_is_conversation_closing
        && out.farewell_context_source == FarewellContextSource::None
    {
        errors.push("context_source cannot be none when is_closing_context is true".to_string());
    }
    if !out.farewell_is_conversation_closing
        && out.farewell_context_source != FarewellContextSource::None
    {
        errors.push("context_source must be none when is_closing_context is false".to_string());
    }
    if out.evidence_quote.is_empty() {
        errors.push("evidence_quote is empty".to_string());
    } else if !current_text.contains(&out.evidence_quote) {
        errors.push("evidence_quote is not a substring of current_text".to_string());
    }
    errors
}
