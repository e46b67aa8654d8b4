pub mod empathy;
pub mod retry;
pub mod speaker;
#[cfg(test)]
pub(crate) mod support;

pub use empathy::{EmpathyClassifier, LlmEmpathyUnit};
pub use retry::{AttemptOutcome, RetryState};
pub use speaker::{LlmSpeakerUnit, SpeakerClassifier};

use tokio_util::sync::CancellationToken;

/// Default model-call budget per unit per utterance block.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;

/// Audit and scheduling context for one classification case.
///
/// Passed explicitly into every `evaluate` call instead of being mutated onto
/// the unit, so units hold no per-case state and stay reusable if conversations
/// are ever processed in parallel.
#[derive(Debug, Clone)]
pub struct CaseContext {
    pub conversation_id: String,
    pub utterance_index: u32,
    pub cancel: CancellationToken,
}

impl CaseContext {
    pub fn new(conversation_id: impl Into<String>, utterance_index: u32) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            utterance_index,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}
