/// What one model-call attempt produced, as seen by the retry loop.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome<T> {
    /// Parsed and validated; carries the accepted candidate
    Valid(T),
    /// Network/HTTP failure, no usable response
    TransportFailed,
    /// Response received but not well-formed for the expected shape
    ParseFailed,
    /// Well-formed response violating a domain rule
    ValidationFailed,
}

/// Retry loop state for one classification case.
///
/// Every failure class consumes one attempt from the fixed budget; the first
/// valid attempt wins. Pure transitions, so the budget/fallback contract is
/// testable without any I/O.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryState<T> {
    Pending { attempt: u32 },
    Accepted(T),
    Exhausted,
}

impl<T> RetryState<T> {
    pub fn start() -> Self {
        Self::Pending { attempt: 1 }
    }

    /// Current 1-based attempt number, if the loop is still running.
    pub fn pending_attempt(&self) -> Option<u32> {
        match self {
            Self::Pending { attempt } => Some(*attempt),
            _ => None,
        }
    }

    /// Advance after one attempt. `max_attempts` of zero exhausts immediately.
    pub fn advance(self, outcome: AttemptOutcome<T>, max_attempts: u32) -> Self {
        match self {
            Self::Pending { attempt } => match outcome {
                AttemptOutcome::Valid(result) => Self::Accepted(result),
                _ if attempt >= max_attempts => Self::Exhausted,
                _ => Self::Pending {
                    attempt: attempt + 1,
                },
            },
            done => done,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_valid_attempt_is_accepted() {
        let state: RetryState<&str> = RetryState::start();
        assert_eq!(state.pending_attempt(), Some(1));
        let state = state.advance(AttemptOutcome::Valid("result"), 2);
        assert_eq!(state, RetryState::Accepted("result"));
    }

    #[test]
    fn test_failure_consumes_budget_then_exhausts() {
        let state: RetryState<()> = RetryState::start();
        let state = state.advance(AttemptOutcome::TransportFailed, 2);
        assert_eq!(state.pending_attempt(), Some(2));
        let state = state.advance(AttemptOutcome::ValidationFailed, 2);
        assert_eq!(state, RetryState::Exhausted);
    }

    #[test]
    fn test_second_attempt_can_recover() {
        let state: RetryState<u8> = RetryState::start();
        let state = state.advance(AttemptOutcome::ParseFailed, 2);
        let state = state.advance(AttemptOutcome::Valid(7), 2);
        assert_eq!(state, RetryState::Accepted(7));
    }

    #[test]
    fn test_attempt_count_never_exceeds_budget() {
        for budget in 1..=4u32 {
            let mut state: RetryState<()> = RetryState::start();
            let mut attempts = 0;
            while state.pending_attempt().is_some() {
                attempts += 1;
                state = state.advance(AttemptOutcome::ParseFailed, budget);
            }
            assert_eq!(attempts, budget);
            assert_eq!(state, RetryState::Exhausted);
        }
    }

    #[test]
    fn test_terminal_states_are_sticky() {
        let accepted = RetryState::Accepted(1).advance(AttemptOutcome::ParseFailed, 2);
        assert_eq!(accepted, RetryState::Accepted(1));
        let exhausted: RetryState<i32> =
            RetryState::Exhausted.advance(AttemptOutcome::Valid(2), 2);
        assert_eq!(exhausted, RetryState::Exhausted);
    }
}
