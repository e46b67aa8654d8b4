use crate::models::QualityDecision;

/// Outcome of the quality decision for one speaker prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityVerdict {
    pub is_correct_raw: bool,
    pub is_correct_final: bool,
    pub decision: QualityDecision,
}

/// Derive raw and business-final correctness for a speaker prediction.
///
/// Pure function, no I/O. The rules are ordered:
/// 1. missing ground truth or prediction -> `no_ground_truth`
/// 2. exact match -> `strict_match`
/// 3. mismatch inside a conversation-closing exchange ->
///    `farewell_context_override` (raw stays red, final goes green: short
///    terminal utterances carry no speaker-identifying content, so the
///    business tolerates the miss while the raw metric keeps tracking it)
/// 4. anything else -> `strict_mismatch`
///
/// The predicted speaker itself is never rewritten here; only the quality
/// label and the two flags are derived.
pub fn decide_speaker_quality(
    ground_truth: &str,
    predicted: &str,
    farewell_is_closing: bool,
) -> QualityVerdict {
    let gt = ground_truth.trim();
    let pred = predicted.trim();
    if gt.is_empty() || pred.is_empty() {
        return QualityVerdict {
            is_correct_raw: false,
            is_correct_final: false,
            decision: QualityDecision::NoGroundTruth,
        };
    }

    if pred == gt {
        return QualityVerdict {
            is_correct_raw: true,
            is_correct_final: true,
            decision: QualityDecision::StrictMatch,
        };
    }

    if farewell_is_closing {
        return QualityVerdict {
            is_correct_raw: false,
            is_correct_final: true,
            decision: QualityDecision::FarewellContextOverride,
        };
    }

    QualityVerdict {
        is_correct_raw: false,
        is_correct_final: false,
        decision: QualityDecision::StrictMismatch,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SPEAKER_CUSTOMER, SPEAKER_SALES_REP};

    #[test]
    fn test_strict_match() {
        let verdict = decide_speaker_quality(SPEAKER_SALES_REP, SPEAKER_SALES_REP, false);
        assert!(verdict.is_correct_raw);
        assert!(verdict.is_correct_final);
        assert_eq!(verdict.decision, QualityDecision::StrictMatch);
    }

    #[test]
    fn test_match_ignores_farewell_flag() {
        let verdict = decide_speaker_quality(SPEAKER_CUSTOMER, SPEAKER_CUSTOMER, true);
        assert!(verdict.is_correct_raw);
        assert_eq!(verdict.decision, QualityDecision::StrictMatch);
    }

    #[test]
    fn test_farewell_override_forgives_final_only() {
        let verdict = decide_speaker_quality(SPEAKER_SALES_REP, SPEAKER_CUSTOMER, true);
        assert!(!verdict.is_correct_raw);
        assert!(verdict.is_correct_final);
        assert_eq!(verdict.decision, QualityDecision::FarewellContextOverride);
    }

    #[test]
    fn test_strict_mismatch() {
        let verdict = decide_speaker_quality(SPEAKER_SALES_REP, SPEAKER_CUSTOMER, false);
        assert!(!verdict.is_correct_raw);
        assert!(!verdict.is_correct_final);
        assert_eq!(verdict.decision, QualityDecision::StrictMismatch);
    }

    #[test]
    fn test_missing_labels_guard() {
        for (gt, pred) in [("", SPEAKER_CUSTOMER), (SPEAKER_SALES_REP, ""), ("", ""), ("  ", "  ")] {
            let verdict = decide_speaker_quality(gt, pred, true);
            assert!(!verdict.is_correct_raw);
            assert!(!verdict.is_correct_final);
            assert_eq!(verdict.decision, QualityDecision::NoGroundTruth);
        }
    }

    #[test]
    fn test_format_invalid_but_equal_labels_count_as_raw_correct() {
        // Format validity and raw correctness are independent checks: a label
        // outside the closed role set that still equals ground truth matches.
        let verdict = decide_speaker_quality("Moderator", "Moderator", false);
        assert!(verdict.is_correct_raw);
        assert_eq!(verdict.decision, QualityDecision::StrictMatch);
    }

    #[test]
    fn test_final_never_downgrades_raw() {
        let labels = ["", SPEAKER_SALES_REP, SPEAKER_CUSTOMER, "Moderator"];
        for gt in labels {
            for pred in labels {
                for closing in [false, true] {
                    let verdict = decide_speaker_quality(gt, pred, closing);
                    if verdict.is_correct_raw {
                        assert!(
                            verdict.is_correct_final,
                            "raw-correct must imply final-correct: gt={gt:?} pred={pred:?}"
                        );
                    }
                    if verdict.decision == QualityDecision::FarewellContextOverride {
                        assert!(!verdict.is_correct_raw && verdict.is_correct_final);
                    }
                }
            }
        }
    }
}
