/// Canonical label for the seller role.
pub const SPEAKER_SALES_REP: &str = "Sales Rep";
/// Canonical label for the buyer role.
pub const SPEAKER_CUSTOMER: &str = "Customer";

/// One source row from a conversation CSV file
#[derive(Debug, Clone, PartialEq)]
pub struct SalesTurn {
    /// Conversation identifier (falls back to the file stem when blank)
    pub conversation_id: String,
    /// Original row ordering key from the dataset
    pub turn_id: i64,
    /// Canonicalized speaker label recorded in the source
    pub speaker: String,
    /// Trimmed utterance text
    pub text: String,
}

/// Maximal run of consecutive same-speaker turns, merged into one text unit.
///
/// Blocks are immutable once built and carry a 1-based, conversation-scoped
/// index. The block is the unit of annotation: one speaker prediction and
/// (for seller rows) one empathy evaluation per block.
#[derive(Debug, Clone, PartialEq)]
pub struct UtteranceBlock {
    pub conversation_id: String,
    pub utterance_index: u32,
    pub ground_truth_speaker: String,
    pub text: String,
}

/// Normalize a speaker label from the dataset or a model response.
///
/// Trims whitespace and markdown noise (`"**Sales Rep"` -> `"Sales Rep"`) and
/// folds case onto the two canonical roles. Labels outside the closed role set
/// pass through verbatim so that downstream validation can still see them.
pub fn canonical_speaker_label(raw: &str) -> String {
    let cleaned = raw.trim().trim_matches('*').trim();
    if cleaned.eq_ignore_ascii_case(SPEAKER_SALES_REP) {
        SPEAKER_SALES_REP.to_string()
    } else if cleaned.eq_ignore_ascii_case(SPEAKER_CUSTOMER) {
        SPEAKER_CUSTOMER.to_string()
    } else {
        cleaned.to_string()
    }
}
