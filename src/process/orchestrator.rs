use crate::models::{
    canonical_speaker_label, clamp01, AttemptRecord, EmpathyCaseInput, EmpathyDecision,
    SpeakerCaseInput, SpeakerDecision, UtteranceBlock, SPEAKER_SALES_REP,
};
use crate::process::quality::decide_speaker_quality;
use crate::units::{CaseContext, EmpathyClassifier, SpeakerClassifier};

/// Fatal misconfiguration of the annotation process.
///
/// Model-side trouble never surfaces here; only caller defects do.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("empathy unit is required for a seller utterance")]
    MissingEmpathyUnit,
}

/// Text of the neighboring utterance blocks; empty at conversation edges.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockNeighbors {
    pub previous_text: String,
    pub next_text: String,
}

/// Everything one orchestrator invocation produces for a block.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOutput {
    pub speaker: SpeakerDecision,
    pub empathy: EmpathyDecision,
    pub attempts: Vec<AttemptRecord>,
}

/// Sequences the two classification units for one utterance block.
///
/// Step A runs the speaker unit on text context alone, step B applies the
/// quality decision on top of the raw prediction, step C routes the empathy
/// unit to seller rows only. Blocks are processed one at a time; ordering of
/// decisions and attempt records follows block order within a conversation.
pub struct AnnotationProcess<S, E> {
    speaker_unit: S,
    empathy_unit: Option<E>,
}

impl<S: SpeakerClassifier, E: EmpathyClassifier> AnnotationProcess<S, E> {
    pub fn new(speaker_unit: S, empathy_unit: E) -> Self {
        Self {
            speaker_unit,
            empathy_unit: Some(empathy_unit),
        }
    }

    /// Build a process without an empathy unit. Valid only for datasets with
    /// no seller rows; a seller row reaching this configuration aborts the run.
    pub fn without_empathy(speaker_unit: S) -> Self {
        Self {
            speaker_unit,
            empathy_unit: None,
        }
    }

    pub async fn run(
        &self,
        ctx: &CaseContext,
        block: &UtteranceBlock,
        neighbors: &BlockNeighbors,
    ) -> Result<ProcessOutput, ProcessError> {
        // Step A: the speaker unit sees only the three text fields.
        let speaker_input = SpeakerCaseInput {
            previous_text: neighbors.previous_text.clone(),
            current_text: block.text.clone(),
            next_text: neighbors.next_text.clone(),
        };
        let (mut speaker_case, mut attempts) =
            self.speaker_unit.evaluate(ctx, &speaker_input).await;
        speaker_case.confidence = clamp01(speaker_case.confidence);

        // Step B: quality decision over canonical labels. The raw prediction
        // is carried through untouched.
        let ground_truth = canonical_speaker_label(&block.ground_truth_speaker);
        let predicted = canonical_speaker_label(&speaker_case.predicted_speaker);
        let verdict = decide_speaker_quality(
            &ground_truth,
            &predicted,
            speaker_case.farewell_is_conversation_closing,
        );
        let speaker = SpeakerDecision {
            case: speaker_case,
            is_correct_raw: verdict.is_correct_raw,
            is_correct_final: verdict.is_correct_final,
            quality_decision: verdict.decision,
        };

        // Step C: empathy applies to seller rows only. Skipped rows cost no
        // gateway call and leave no attempt records.
        let empathy = if ground_truth == SPEAKER_SALES_REP {
            let unit = self
                .empathy_unit
                .as_ref()
                .ok_or(ProcessError::MissingEmpathyUnit)?;
            let empathy_input = EmpathyCaseInput {
                current_text: block.text.clone(),
            };
            let (mut empathy_case, empathy_attempts) = unit.evaluate(ctx, &empathy_input).await;
            empathy_case.confidence = clamp01(empathy_case.confidence);
            attempts.extend(empathy_attempts);
            EmpathyDecision::applicable(empathy_case)
        } else {
            EmpathyDecision::not_applicable()
        };

        Ok(ProcessOutput {
            speaker,
            empathy,
            attempts,
        })
    }
}
