// molino is a pipeline worker for content-addressed pipelines
// Copyright (C) 2025  Javier Lancha Vázquez <javier.lancha@gmail.com>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use thiserror::Error;

/// Tagged error kinds used for routing decisions across the engine.
///
/// Store adapters wrap backend failures into these kinds at the adapter
/// boundary; the rest of the engine classifies errors by downcasting the
/// anyhow chain instead of matching on message strings.
#[derive(Debug, Error)]
pub enum EngineError {
    /// An object (or cache entry) does not exist. Used as a control-flow
    /// signal for cache probes; never surfaced to the user as a failure.
    #[error("not found: {0}")]
    NotFound(String),

    /// A caller broke an API contract (duplicate tree path, write to a
    /// finished commit). Not retryable.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// A backend failure that a caller may retry.
    #[error("transient I/O failure: {0}")]
    Transient(String),

    /// The user binary exited with a status code outside the accepted set.
    #[error("user code exited with non-accepted status {code}")]
    UserCode { code: i32 },

    /// The user binary was terminated by a signal.
    #[error("user code terminated by signal {signal}")]
    UserSignal { signal: i32 },

    #[error("operation cancelled")]
    Cancelled,
}

fn kind_of(err: &anyhow::Error) -> Option<&EngineError> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<EngineError>())
}

pub fn is_not_found(err: &anyhow::Error) -> bool {
    matches!(kind_of(err), Some(EngineError::NotFound(_)))
}

pub fn is_invariant_violation(err: &anyhow::Error) -> bool {
    matches!(kind_of(err), Some(EngineError::InvariantViolation(_)))
}

pub fn is_retryable(err: &anyhow::Error) -> bool {
    matches!(kind_of(err), Some(EngineError::Transient(_)))
}

/// Whether the caller may treat the failed operation as a successful no-op.
/// Today this covers best-effort deletes of already-missing objects.
pub fn is_ignorable(err: &anyhow::Error) -> bool {
    is_not_found(err)
}

pub fn is_user_code_failure(err: &anyhow::Error) -> bool {
    matches!(
        kind_of(err),
        Some(EngineError::UserCode { .. } | EngineError::UserSignal { .. })
    )
}

pub fn is_cancelled(err: &anyhow::Error) -> bool {
    matches!(kind_of(err), Some(EngineError::Cancelled))
}

#[cfg(test)]
mod tests {
    use anyhow::Context;

    use super::*;

    #[test]
    fn test_classify_through_context_chain() {
        let err: anyhow::Error = anyhow::Error::from(EngineError::NotFound("tag/abc".to_string()))
            .context("probing output cache");

        assert!(is_not_found(&err));
        assert!(is_ignorable(&err));
        assert!(!is_retryable(&err));
        assert!(!is_user_code_failure(&err));
    }

    #[test]
    fn test_classify_user_code() {
        let code: anyhow::Error = EngineError::UserCode { code: 2 }.into();
        let signal: anyhow::Error = EngineError::UserSignal { signal: 9 }.into();

        assert!(is_user_code_failure(&code));
        assert!(is_user_code_failure(&signal));
        assert!(!is_not_found(&code));
    }

    #[test]
    fn test_unclassified_errors_match_nothing() {
        let err = anyhow::anyhow!("plain failure");
        assert!(!is_not_found(&err));
        assert!(!is_retryable(&err));
        assert!(!is_cancelled(&err));
    }
}
