//! Agent error taxonomy
//!
//! Only the listening-socket bind failure is fatal; everything else is
//! recovered inside the sampler or server loops.

use thiserror::Error;

/// Errors produced by the sampling and exposition pipeline
#[derive(Debug, Error)]
pub enum AgentError {
    /// Target process could not be attached; triggers rediscovery
    #[error("failed to attach to process {pid}: {reason}")]
    Attachment { pid: i32, reason: String },

    /// Dump channel closed mid-read; forces a full reattachment cycle
    #[error("stack dump stream read failed: {0}")]
    StreamRead(#[from] std::io::Error),

    /// Invalid filter pattern; the previous pattern stays active
    #[error("invalid filter pattern {pattern:?}: {source}")]
    Filter {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// Malformed request; the connection is dropped without a response
    #[error("malformed request: {0}")]
    Protocol(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attachment_error_display() {
        let err = AgentError::Attachment {
            pid: 4711,
            reason: "no attach socket".to_string(),
        };
        assert!(err.to_string().contains("4711"));
        assert!(err.to_string().contains("no attach socket"));
    }

    #[test]
    fn test_filter_error_keeps_pattern() {
        let source = regex::Regex::new("(").unwrap_err();
        let err = AgentError::Filter {
            pattern: "(".to_string(),
            source,
        };
        assert!(err.to_string().contains("invalid filter pattern"));
    }

    #[test]
    fn test_stream_read_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "gone");
        let err: AgentError = io.into();
        assert!(matches!(err, AgentError::StreamRead(_)));
    }
}
