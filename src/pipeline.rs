use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::io::input::{
    build_utterance_blocks, find_csv_files, read_conversation_turns, select_file_range,
};
use crate::llm::{OpenAiClient, OpenAiConfig};
use crate::models::UtteranceBlock;
use crate::process::{AnnotationProcess, BlockNeighbors};
use crate::store::{AnnotationRow, SqliteStore, REVIEW_NOT_APPLICABLE, REVIEW_PENDING};
use crate::units::{
    CaseContext, EmpathyClassifier, LlmEmpathyUnit, LlmSpeakerUnit, SpeakerClassifier,
};

/// Default annotation model.
pub const DEFAULT_MODEL: &str = "gpt-4.1-mini";

/// Configuration for one annotate run.
#[derive(Debug, Clone)]
pub struct AnnotateConfig {
    pub db_path: PathBuf,
    pub input_dir: PathBuf,
    /// 1-based inclusive start index in the sorted CSV list
    pub from_idx: usize,
    /// 1-based inclusive end index in the sorted CSV list
    pub to_idx: usize,
    pub model: String,
    pub api_key: String,
    pub base_url: String,
    pub max_attempts: u32,
}

/// Totals for one finished (or cancelled) annotate run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnnotateSummary {
    pub files_processed: usize,
    pub utterance_blocks: usize,
    pub raw_correct: usize,
    pub final_correct: usize,
    pub cancelled: bool,
}

/// Annotate a range of conversation files into the SQLite store.
///
/// Conversations are processed one after another, blocks strictly in order
/// within each conversation. Cancellation is honored between blocks and
/// between attempts; an in-flight provider call is never interrupted.
pub async fn annotate_directory(
    cfg: AnnotateConfig,
    cancel: CancellationToken,
) -> Result<AnnotateSummary> {
    if cfg.api_key.trim().is_empty() {
        bail!("OPENAI_API_KEY is required for annotate");
    }
    if cfg.model.trim().is_empty() {
        bail!("model is required for annotate");
    }
    if cfg.max_attempts < 1 {
        bail!("max_attempts must be >= 1");
    }

    let files = find_csv_files(&cfg.input_dir)?;
    let selected = select_file_range(&files, cfg.from_idx, cfg.to_idx)?;

    let store = SqliteStore::open(&cfg.db_path)?;
    store.reset_for_run()?;

    let client = OpenAiClient::new(OpenAiConfig::new(cfg.api_key.clone(), cfg.base_url.clone()))?;
    let process = AnnotationProcess::new(
        LlmSpeakerUnit::new(client.clone(), cfg.model.clone(), cfg.max_attempts),
        LlmEmpathyUnit::new(client, cfg.model.clone(), cfg.max_attempts),
    );

    let run_id = Uuid::new_v4();
    info!(
        run_id = %run_id,
        files = selected.len(),
        db = ?cfg.db_path,
        model = %cfg.model,
        from_idx = cfg.from_idx,
        to_idx = cfg.to_idx,
        "annotate_start"
    );

    let mut summary = AnnotateSummary::default();
    for (file_idx, path) in selected.iter().enumerate() {
        let turns = read_conversation_turns(path)
            .with_context(|| format!("Failed to read turns from {path:?}"))?;
        let blocks = build_utterance_blocks(&turns);
        let conversation_id = blocks
            .first()
            .map(|block| block.conversation_id.clone())
            .unwrap_or_else(|| {
                path.file_stem()
                    .and_then(|stem| stem.to_str())
                    .unwrap_or_default()
                    .to_string()
            });
        info!(
            file = file_idx + 1,
            of = selected.len(),
            conversation = %conversation_id,
            utterance_blocks = blocks.len(),
            "annotate_file"
        );

        let tally = annotate_conversation(&process, &store, &blocks, &cancel, &mut summary).await?;
        info!(
            conversation = %conversation_id,
            utterance_blocks = tally.blocks,
            raw_correct = tally.raw_correct,
            raw_mismatch = tally.blocks - tally.raw_correct,
            final_correct = tally.final_correct,
            final_mismatch = tally.blocks - tally.final_correct,
            "annotate_file_done"
        );
        summary.files_processed += 1;

        if summary.cancelled {
            warn!(conversation = %conversation_id, "annotate_cancelled");
            break;
        }
    }

    info!(
        utterance_blocks = summary.utterance_blocks,
        raw_correct = summary.raw_correct,
        raw_mismatch = summary.utterance_blocks - summary.raw_correct,
        final_correct = summary.final_correct,
        final_mismatch = summary.utterance_blocks - summary.final_correct,
        cancelled = summary.cancelled,
        "annotate_done"
    );
    Ok(summary)
}

#[derive(Debug, Default)]
struct ConversationTally {
    blocks: usize,
    raw_correct: usize,
    final_correct: usize,
}

/// Run the annotation process over one conversation's blocks, flushing each
/// block's attempt trail before its annotation row.
async fn annotate_conversation<S: SpeakerClassifier, E: EmpathyClassifier>(
    process: &AnnotationProcess<S, E>,
    store: &SqliteStore,
    blocks: &[UtteranceBlock],
    cancel: &CancellationToken,
    summary: &mut AnnotateSummary,
) -> Result<ConversationTally> {
    let mut tally = ConversationTally::default();

    for (i, block) in blocks.iter().enumerate() {
        if cancel.is_cancelled() {
            summary.cancelled = true;
            break;
        }

        let neighbors = BlockNeighbors {
            previous_text: if i > 0 {
                blocks[i - 1].text.clone()
            } else {
                String::new()
            },
            next_text: blocks.get(i + 1).map(|b| b.text.clone()).unwrap_or_default(),
        };
        let ctx = CaseContext::new(block.conversation_id.clone(), block.utterance_index)
            .with_cancellation(cancel.clone());

        let out = process.run(&ctx, block, &neighbors).await.with_context(|| {
            format!(
                "process conversation={} utterance_index={}",
                block.conversation_id, block.utterance_index
            )
        })?;

        // Audit trail first: a crash before the annotation row still leaves
        // every attempt on disk.
        for record in &out.attempts {
            store.insert_attempt(record)?;
        }

        let review_status = if out.empathy.applicable {
            REVIEW_PENDING
        } else {
            REVIEW_NOT_APPLICABLE
        };
        let row = AnnotationRow {
            conversation_id: block.conversation_id.clone(),
            utterance_index: block.utterance_index,
            utterance_text: block.text.clone(),
            ground_truth_speaker: block.ground_truth_speaker.clone(),
            predicted_speaker: out.speaker.case.predicted_speaker.clone(),
            predicted_speaker_confidence: out.speaker.case.confidence,
            speaker_is_correct_raw: out.speaker.is_correct_raw,
            speaker_is_correct_final: out.speaker.is_correct_final,
            speaker_quality_decision: out.speaker.quality_decision.as_str().to_string(),
            farewell_is_current_utterance: out.speaker.case.farewell_is_current_utterance,
            farewell_is_conversation_closing: out.speaker.case.farewell_is_conversation_closing,
            farewell_context_source: out.speaker.case.farewell_context_source.as_str().to_string(),
            speaker_evidence_quote: out.speaker.case.evidence_quote.clone(),
            speaker_evidence_is_valid: out.speaker.case.evidence_is_valid,
            empathy_applicable: out.empathy.applicable,
            empathy_present: out.empathy.case.present,
            empathy_confidence: out.empathy.case.confidence,
            empathy_evidence_quote: out.empathy.case.evidence_quote.clone(),
            empathy_review_status: review_status.to_string(),
            empathy_reviewer_note: String::new(),
            model: out
                .attempts
                .first()
                .map(|record| record.model.clone())
                .unwrap_or_default(),
            annotated_at_utc: String::new(),
        };
        store.insert_annotation(&row)?;

        tally.blocks += 1;
        summary.utterance_blocks += 1;
        if out.speaker.is_correct_raw {
            tally.raw_correct += 1;
            summary.raw_correct += 1;
        }
        if out.speaker.is_correct_final {
            tally.final_correct += 1;
            summary.final_correct += 1;
        }

        info!(
            conversation = %block.conversation_id,
            utterance_index = block.utterance_index,
            ground_truth = %row.ground_truth_speaker,
            predicted = %row.predicted_speaker,
            raw_correct = out.speaker.is_correct_raw,
            final_correct = out.speaker.is_correct_final,
            quality_decision = %out.speaker.quality_decision,
            empathy_applicable = out.empathy.applicable,
            "annotate_row"
        );
        if summary.utterance_blocks % 25 == 0 {
            info!(
                utterance_blocks = summary.utterance_blocks,
                raw_correct = summary.raw_correct,
                final_correct = summary.final_correct,
                "annotate_progress"
            );
        }
    }

    Ok(tally)
}
