use std::fmt;

use chrono::{SecondsFormat, Utc};

/// Which classification unit produced an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitName {
    Speaker,
    Empathy,
}

impl UnitName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Speaker => "speaker",
            Self::Empathy => "empathy",
        }
    }
}

impl fmt::Display for UnitName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the audit trail: exactly what was sent and received for one
/// retry of one unit, plus how far it got through parse and validation.
///
/// Records are append-only and are the sole observability channel for
/// degraded rows: a reviewer must be able to reconstruct why a block hit the
/// fallback path from these rows alone.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptRecord {
    pub conversation_id: String,
    pub utterance_index: u32,
    pub unit: UnitName,
    /// 1-based attempt counter, strictly increasing per unit per block
    pub attempt: u32,
    pub model: String,
    pub request_json: String,
    /// HTTP status of the provider response; absent on transport failure
    pub http_status: Option<u16>,
    pub response_json: String,
    pub extracted_content: String,
    pub parse_ok: bool,
    pub validation_ok: bool,
    pub error_message: String,
    pub created_at_utc: String,
}

impl AttemptRecord {
    /// RFC 3339 UTC timestamp used across audit and annotation rows.
    pub fn timestamp_now() -> String {
        Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}
