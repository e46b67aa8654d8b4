use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt::Write as _;

use anyhow::{Context, Result};

use crate::store::sqlite::{SqliteStore, REVIEW_NOT_OK, REVIEW_OK};

/// Raw mismatches at or under this many characters are surfaced separately:
/// short farewells are the known weak spot of the classifier.
const SHORT_UTTERANCE_MAX_LEN: usize = 40;
const TOP_UTTERANCE_ITEMS: usize = 10;
const TOP_NOT_OK_ITEMS: usize = 20;

/// Aggregate quality metrics over one annotated database.
#[derive(Debug, Clone, Default)]
pub struct ReportMetrics {
    pub total_rows: usize,
    pub total_conversations: usize,

    pub speaker_correct_raw_count: usize,
    pub speaker_correct_final_count: usize,
    pub speaker_accuracy_raw_percent: f64,
    pub speaker_accuracy_final_percent: f64,
    pub raw_mismatch_count: usize,
    pub final_mismatch_count: usize,
    pub farewell_override_count: usize,
    pub speaker_evidence_invalid_count: usize,

    pub empathy_applicable_count: usize,
    pub empathy_confidence_avg: f64,
    pub empathy_confidence_min: f64,
    pub empathy_confidence_max: f64,
    pub empathy_review_pending_count: usize,
    pub empathy_review_ok_count: usize,
    pub empathy_review_not_ok_count: usize,

    pub llm_event_count: usize,
    pub llm_parse_failed_count: usize,
    pub llm_validation_failed_count: usize,

    pub raw_red_conversations: Vec<ConversationDebugItem>,
    pub final_red_conversations: Vec<ConversationDebugItem>,
    pub top_raw_mismatches: Vec<UtteranceDebugItem>,
    pub top_final_mismatches: Vec<UtteranceDebugItem>,
    pub top_evidence_invalid: Vec<UtteranceDebugItem>,
    pub top_short_utterances: Vec<UtteranceDebugItem>,
    pub not_ok_items: Vec<EmpathyReviewItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConversationDebugItem {
    pub conversation_id: String,
    pub red_rows: usize,
    pub total_rows: usize,
    pub top_reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UtteranceDebugItem {
    pub conversation_id: String,
    pub utterance_index: u32,
    pub utterance_text: String,
    pub text_length: usize,
    pub speaker_quality_decision: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmpathyReviewItem {
    pub conversation_id: String,
    pub utterance_index: u32,
    pub empathy_confidence: f64,
    pub empathy_reviewer_note: String,
}

struct ReportRow {
    conversation_id: String,
    utterance_index: u32,
    raw_correct: bool,
    final_correct: bool,
    quality_decision: String,
    evidence_valid: bool,
    empathy_applicable: bool,
    empathy_confidence: f64,
    empathy_review_status: String,
    empathy_reviewer_note: String,
    utterance_text: String,
}

/// Aggregate every annotation and llm_event row into report metrics.
pub fn build_report(store: &SqliteStore) -> Result<ReportMetrics> {
    let mut statement = store
        .connection()
        .prepare(
            "SELECT
                conversation_id,
                utterance_index,
                speaker_is_correct_raw,
                speaker_is_correct_final,
                speaker_quality_decision,
                speaker_evidence_is_valid,
                empathy_applicable,
                empathy_confidence,
                empathy_review_status,
                empathy_reviewer_note,
                utterance_text
            FROM annotations",
        )
        .context("Failed to query annotations")?;
    let rows = statement
        .query_map([], |row| {
            Ok(ReportRow {
                conversation_id: row.get(0)?,
                utterance_index: row.get(1)?,
                raw_correct: row.get(2)?,
                final_correct: row.get(3)?,
                quality_decision: row.get(4)?,
                evidence_valid: row.get(5)?,
                empathy_applicable: row.get(6)?,
                empathy_confidence: row.get(7)?,
                empathy_review_status: row.get(8)?,
                empathy_reviewer_note: row.get(9)?,
                utterance_text: row.get(10)?,
            })
        })
        .context("Failed to scan annotation rows")?;

    #[derive(Default)]
    struct ConversationState {
        total: usize,
        raw_red: usize,
        final_red: usize,
    }
    let mut conversations: HashMap<String, ConversationState> = HashMap::new();
    let mut report = ReportMetrics::default();

    for row in rows {
        let row = row.context("Failed to read annotation row")?;

        report.total_rows += 1;
        if row.raw_correct {
            report.speaker_correct_raw_count += 1;
        } else {
            report.raw_mismatch_count += 1;
        }
        if row.final_correct {
            report.speaker_correct_final_count += 1;
        } else {
            report.final_mismatch_count += 1;
        }
        if row.quality_decision.trim() == "farewell_context_override" {
            report.farewell_override_count += 1;
        }
        if !row.evidence_valid {
            report.speaker_evidence_invalid_count += 1;
        }

        let text = row.utterance_text.trim().to_string();
        let item = UtteranceDebugItem {
            conversation_id: row.conversation_id.clone(),
            utterance_index: row.utterance_index,
            text_length: text.chars().count(),
            utterance_text: text,
            speaker_quality_decision: row.quality_decision.trim().to_string(),
        };
        if !row.raw_correct {
            if item.text_length <= SHORT_UTTERANCE_MAX_LEN {
                report.top_short_utterances.push(item.clone());
            }
            report.top_raw_mismatches.push(item.clone());
        }
        if !row.final_correct {
            report.top_final_mismatches.push(item.clone());
        }
        if !row.evidence_valid {
            report.top_evidence_invalid.push(item);
        }

        let state = conversations.entry(row.conversation_id.clone()).or_default();
        state.total += 1;
        if !row.raw_correct {
            state.raw_red += 1;
        }
        if !row.final_correct {
            state.final_red += 1;
        }

        if row.empathy_applicable {
            report.empathy_applicable_count += 1;
            if report.empathy_applicable_count == 1 {
                report.empathy_confidence_min = row.empathy_confidence;
                report.empathy_confidence_max = row.empathy_confidence;
            }
            report.empathy_confidence_min =
                report.empathy_confidence_min.min(row.empathy_confidence);
            report.empathy_confidence_max =
                report.empathy_confidence_max.max(row.empathy_confidence);
            report.empathy_confidence_avg += row.empathy_confidence;

            match row.empathy_review_status.trim() {
                REVIEW_OK => report.empathy_review_ok_count += 1,
                REVIEW_NOT_OK => {
                    report.empathy_review_not_ok_count += 1;
                    report.not_ok_items.push(EmpathyReviewItem {
                        conversation_id: row.conversation_id,
                        utterance_index: row.utterance_index,
                        empathy_confidence: row.empathy_confidence,
                        empathy_reviewer_note: row.empathy_reviewer_note.trim().to_string(),
                    });
                }
                _ => report.empathy_review_pending_count += 1,
            }
        }
    }

    report.total_conversations = conversations.len();
    for (conversation_id, state) in &conversations {
        if state.raw_red > 0 {
            report.raw_red_conversations.push(ConversationDebugItem {
                conversation_id: conversation_id.clone(),
                red_rows: state.raw_red,
                total_rows: state.total,
                top_reason: format!("raw_speaker_mismatch ({})", state.raw_red),
            });
        }
        if state.final_red > 0 {
            report.final_red_conversations.push(ConversationDebugItem {
                conversation_id: conversation_id.clone(),
                red_rows: state.final_red,
                total_rows: state.total,
                top_reason: format!("final_speaker_mismatch ({})", state.final_red),
            });
        }
    }

    if report.total_rows > 0 {
        report.speaker_accuracy_raw_percent =
            100.0 * report.speaker_correct_raw_count as f64 / report.total_rows as f64;
        report.speaker_accuracy_final_percent =
            100.0 * report.speaker_correct_final_count as f64 / report.total_rows as f64;
    }
    if report.empathy_applicable_count > 0 {
        report.empathy_confidence_avg /= report.empathy_applicable_count as f64;
    }

    fill_llm_event_metrics(store, &mut report)?;

    sort_conversation_items(&mut report.raw_red_conversations);
    sort_conversation_items(&mut report.final_red_conversations);
    sort_utterance_items(&mut report.top_raw_mismatches);
    sort_utterance_items(&mut report.top_final_mismatches);
    sort_utterance_items(&mut report.top_evidence_invalid);
    sort_utterance_items(&mut report.top_short_utterances);
    sort_not_ok_items(&mut report.not_ok_items);

    report.top_raw_mismatches.truncate(TOP_UTTERANCE_ITEMS);
    report.top_final_mismatches.truncate(TOP_UTTERANCE_ITEMS);
    report.top_evidence_invalid.truncate(TOP_UTTERANCE_ITEMS);
    report.top_short_utterances.truncate(TOP_UTTERANCE_ITEMS);
    report.not_ok_items.truncate(TOP_NOT_OK_ITEMS);

    Ok(report)
}

fn fill_llm_event_metrics(store: &SqliteStore, report: &mut ReportMetrics) -> Result<()> {
    let (total, parse_failed, validation_failed): (i64, i64, i64) = store
        .connection()
        .query_row(
            "SELECT
                COUNT(*),
                COALESCE(SUM(CASE WHEN parse_ok = 0 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN validation_ok = 0 THEN 1 ELSE 0 END), 0)
            FROM llm_events",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .context("Failed to query llm event metrics")?;
    report.llm_event_count = total as usize;
    report.llm_parse_failed_count = parse_failed as usize;
    report.llm_validation_failed_count = validation_failed as usize;
    Ok(())
}

/// Worst conversations first, id as tie-break.
fn sort_conversation_items(items: &mut [ConversationDebugItem]) {
    items.sort_by(|a, b| {
        b.red_rows
            .cmp(&a.red_rows)
            .then_with(|| a.conversation_id.cmp(&b.conversation_id))
    });
}

/// Shortest utterances first; short texts are where misattribution clusters.
fn sort_utterance_items(items: &mut [UtteranceDebugItem]) {
    items.sort_by(|a, b| {
        a.text_length
            .cmp(&b.text_length)
            .then_with(|| a.conversation_id.cmp(&b.conversation_id))
            .then_with(|| a.utterance_index.cmp(&b.utterance_index))
    });
}

/// Highest-confidence rejected rows first: the most surprising review misses.
fn sort_not_ok_items(items: &mut [EmpathyReviewItem]) {
    items.sort_by(|a, b| {
        b.empathy_confidence
            .partial_cmp(&a.empathy_confidence)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.conversation_id.cmp(&b.conversation_id))
            .then_with(|| a.utterance_index.cmp(&b.utterance_index))
    });
}

/// Plain `key=value` rendering for the `report` command.
pub fn format_report(r: &ReportMetrics) -> String {
    let mut b = String::new();
    let _ = writeln!(b, "total_rows={}", r.total_rows);
    let _ = writeln!(b, "total_conversations={}", r.total_conversations);
    let _ = writeln!(
        b,
        "speaker_accuracy_raw_percent={:.2} ({}/{})",
        r.speaker_accuracy_raw_percent, r.speaker_correct_raw_count, r.total_rows
    );
    let _ = writeln!(
        b,
        "speaker_accuracy_final_percent={:.2} ({}/{})",
        r.speaker_accuracy_final_percent, r.speaker_correct_final_count, r.total_rows
    );
    let _ = writeln!(b, "farewell_override_count={}", r.farewell_override_count);
    let _ = writeln!(
        b,
        "speaker_evidence_invalid_count={}",
        r.speaker_evidence_invalid_count
    );
    let _ = writeln!(
        b,
        "empathy_review_pending_applicable={}",
        r.empathy_review_pending_count
    );
    let _ = writeln!(b, "empathy_review_ok={}", r.empathy_review_ok_count);
    let _ = writeln!(b, "empathy_review_not_ok={}", r.empathy_review_not_ok_count);
    b
}

/// Markdown summary for the `analytics` command.
pub fn build_analytics_markdown(r: &ReportMetrics) -> String {
    let mut b = String::new();
    b.push_str("# Analytics\n\n");
    b.push_str("## Totals\n");
    let _ = writeln!(b, "- total_rows: `{}`", r.total_rows);
    let _ = writeln!(b, "- total_conversations: `{}`\n", r.total_conversations);

    b.push_str("## Speaker Quality\n");
    let _ = writeln!(
        b,
        "- speaker_accuracy_raw_percent: `{:.2}%` (`{}/{}`)",
        r.speaker_accuracy_raw_percent, r.speaker_correct_raw_count, r.total_rows
    );
    let _ = writeln!(
        b,
        "- speaker_accuracy_final_percent: `{:.2}%` (`{}/{}`)",
        r.speaker_accuracy_final_percent, r.speaker_correct_final_count, r.total_rows
    );
    let _ = writeln!(b, "- raw_mismatch_count: `{}`", r.raw_mismatch_count);
    let _ = writeln!(b, "- final_mismatch_count: `{}`", r.final_mismatch_count);
    let _ = writeln!(b, "- farewell_override_count: `{}`", r.farewell_override_count);
    let _ = writeln!(
        b,
        "- speaker_evidence_invalid_count: `{}`\n",
        r.speaker_evidence_invalid_count
    );

    b.push_str("## Empathy\n");
    let _ = writeln!(b, "- empathy_applicable_rows: `{}`", r.empathy_applicable_count);
    let _ = writeln!(b, "- empathy_confidence_avg: `{:.4}`", r.empathy_confidence_avg);
    let _ = writeln!(b, "- empathy_confidence_min: `{:.4}`", r.empathy_confidence_min);
    let _ = writeln!(b, "- empathy_confidence_max: `{:.4}`", r.empathy_confidence_max);
    let _ = writeln!(
        b,
        "- empathy_review_pending_applicable: `{}`",
        r.empathy_review_pending_count
    );
    let _ = writeln!(b, "- empathy_review_ok: `{}`", r.empathy_review_ok_count);
    let _ = writeln!(b, "- empathy_review_not_ok: `{}`\n", r.empathy_review_not_ok_count);

    b.push_str("## LLM Events\n");
    let _ = writeln!(b, "- llm_event_rows: `{}`", r.llm_event_count);
    let _ = writeln!(b, "- llm_parse_failed_count: `{}`", r.llm_parse_failed_count);
    let _ = writeln!(
        b,
        "- llm_validation_failed_count: `{}`",
        r.llm_validation_failed_count
    );
    b
}

/// Markdown drill-down for the `debug-release` command.
pub fn build_release_debug_markdown(r: &ReportMetrics) -> String {
    let mut b = String::new();
    b.push_str("# Release Debug\n\n");
    b.push_str("## Summary\n");
    let _ = writeln!(b, "- total_rows: `{}`", r.total_rows);
    let _ = writeln!(b, "- raw_mismatch_count: `{}`", r.raw_mismatch_count);
    let _ = writeln!(b, "- final_mismatch_count: `{}`", r.final_mismatch_count);
    let _ = writeln!(b, "- farewell_override_count: `{}`", r.farewell_override_count);
    let _ = writeln!(
        b,
        "- speaker_evidence_invalid_count: `{}`\n",
        r.speaker_evidence_invalid_count
    );

    b.push_str("## Red Conversations (Raw)\n");
    write_conversation_table(&mut b, &r.raw_red_conversations, "raw_red_rows");
    b.push_str("## Red Conversations (Final)\n");
    write_conversation_table(&mut b, &r.final_red_conversations, "final_red_rows");

    b.push_str("## Top Raw Mismatches\n");
    write_utterance_table(&mut b, &r.top_raw_mismatches);
    b.push_str("\n## Top Final Mismatches\n");
    write_utterance_table(&mut b, &r.top_final_mismatches);
    b.push_str("\n## Top Evidence Invalid\n");
    write_utterance_table(&mut b, &r.top_evidence_invalid);
    b.push_str("\n## Top Short-Utterance Raw Mismatches\n");
    write_utterance_table(&mut b, &r.top_short_utterances);

    b.push_str("\n## LLM Event Failures\n");
    let _ = writeln!(b, "- parse_failed: `{}`", r.llm_parse_failed_count);
    let _ = writeln!(b, "- validation_failed: `{}`", r.llm_validation_failed_count);
    b
}

fn write_conversation_table(b: &mut String, items: &[ConversationDebugItem], red_header: &str) {
    if items.is_empty() {
        b.push_str("- none\n\n");
        return;
    }
    let _ = writeln!(b, "| conversation_id | {red_header} | total_rows | top_reason |");
    b.push_str("| --- | ---: | ---: | --- |\n");
    for item in items {
        let _ = writeln!(
            b,
            "| `{}` | `{}` | `{}` | {} |",
            item.conversation_id, item.red_rows, item.total_rows, item.top_reason
        );
    }
    b.push('\n');
}

fn write_utterance_table(b: &mut String, items: &[UtteranceDebugItem]) {
    if items.is_empty() {
        b.push_str("- none\n");
        return;
    }
    b.push_str("| conversation_id | utterance_index | text_length | quality_decision | utterance_text |\n");
    b.push_str("| --- | ---: | ---: | --- | --- |\n");
    for item in items {
        let _ = writeln!(
            b,
            "| `{}` | `{}` | `{}` | `{}` | `{}` |",
            item.conversation_id,
            item.utterance_index,
            item.text_length,
            item.speaker_quality_decision.replace('`', "'"),
            item.utterance_text.replace('`', "'")
        );
    }
}
