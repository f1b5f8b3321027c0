use ulid::Ulid;

use crate::model::{BatchOutcome, Day, PricingRule};

#[derive(Debug)]
pub enum EngineError {
    InvalidRange {
        start: Day,
        end: Day,
    },
    EmptyTarget,
    /// Query reaches past the window the index was built for.
    OutsideWindow {
        start: Day,
        end: Day,
    },
    NotFound(Ulid),
    InvalidRecord(String),
    LimitExceeded(&'static str),
    PartialBatchFailure(BatchOutcome),
    /// An import stopped part-way. `written` already landed; drafts from
    /// `failed_at` on did not.
    ImportFailed {
        written: Vec<PricingRule>,
        failed_at: usize,
        source: Box<EngineError>,
    },
    Transport(String),
    WalError(String),
}

impl EngineError {
    /// Only collaborator I/O failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Transport(_))
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidRange { start, end } => {
                write!(f, "invalid range: end {end} is before start {start}")
            }
            EngineError::EmptyTarget => {
                write!(f, "bulk apply names no properties and is not global")
            }
            EngineError::OutsideWindow { start, end } => {
                write!(f, "{start}..{end} is outside the indexed window")
            }
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::InvalidRecord(msg) => write!(f, "invalid record: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::PartialBatchFailure(outcome) => {
                let failed = outcome.outcomes.iter().filter(|o| o.result.is_err()).count();
                write!(
                    f,
                    "bulk upsert partially failed: {failed} of {} ops failed",
                    outcome.outcomes.len()
                )
            }
            EngineError::ImportFailed {
                written,
                failed_at,
                source,
            } => write!(
                f,
                "import stopped at record {failed_at} after {} rules were written: {source}",
                written.len()
            ),
            EngineError::Transport(e) => write!(f, "transport error: {e}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::ImportFailed { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}
