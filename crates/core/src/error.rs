//! Error taxonomy shared by the session store and the streaming relay.

use std::time::Duration;

/// Errors raised while managing call sessions or relaying a generated response.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// An operation referenced a call that has no live session.
    #[error("no conversation session for call '{0}'")]
    SessionNotFound(String),

    /// The generation backend failed to start or broke mid-stream.
    #[error("generation failed: {0}")]
    GenerationError(String),

    /// The generation backend produced nothing within the fragment timeout.
    #[error("generation stalled for more than {0:?}")]
    GenerationTimeout(Duration),
}

impl RelayError {
    /// Wraps a backend failure, keeping its full cause chain in the message.
    pub fn generation(err: impl std::fmt::Display) -> Self {
        Self::GenerationError(format!("{err:#}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_error_display() {
        assert_eq!(
            RelayError::SessionNotFound("call-1".into()).to_string(),
            "no conversation session for call 'call-1'"
        );
        assert_eq!(
            RelayError::generation("connection reset").to_string(),
            "generation failed: connection reset"
        );
        assert!(
            RelayError::GenerationTimeout(Duration::from_secs(3))
                .to_string()
                .contains("3s")
        );
    }
}
