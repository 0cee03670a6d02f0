//! Error type reported by compiler pipeline stages.

/// The result type returned by front-end and code-generator stages.
pub type StageResult<T> = Result<T, StageError>;

/// A failure reported by a pipeline stage (parsing, type checking, lowering).
///
/// The build cache wraps it together with the file or function that failed,
/// so the stage only needs to describe what went wrong.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct StageError {
    /// Description of the failure.
    pub message: String,
}

impl StageError {
    /// Creates a new stage error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for StageError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for StageError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_message() {
        let err = StageError::new("unexpected token `}`");
        assert_eq!(format!("{err}"), "unexpected token `}`");
    }

    #[test]
    fn err_path() {
        let r: StageResult<i32> = Err(StageError::new("undefined symbol"));
        let err = r.err().unwrap();
        assert_eq!(err.message, "undefined symbol");
    }

    #[test]
    fn from_string() {
        let err: StageError = "from string".to_string().into();
        assert_eq!(err.message, "from string");
    }
}
