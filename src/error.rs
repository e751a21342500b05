use thiserror::Error;

pub type ScaleResult<T> = Result<T, ScaleError>;

/// Everything that can go wrong while scaling a scan.
#[derive(Debug, Error)]
pub enum ScaleError {
    /// A unit string that is not a known unit of length.
    /// Fatal for a whole run, since the factor is resolved up front.
    #[error("unknown unit of length: '{unit}'")]
    UnknownUnit { unit: String },

    /// Malformed OBJ or PLY content.
    #[error("parse error: {message}")]
    Parse { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ScaleError {
    pub fn parse(message: impl Into<String>) -> Self {
        ScaleError::Parse {
            message: message.into(),
        }
    }

    /// Per-file failures are reported and the batch moves on.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ScaleError::UnknownUnit { .. })
    }
}

#[cfg(test)]
mod unit_tests {
    use super::*;

    #[test]
    fn unknown_unit_is_fatal() {
        let error = ScaleError::UnknownUnit {
            unit: "parsec".into(),
        };
        assert!(!error.is_recoverable());
        assert_eq!(error.to_string(), "unknown unit of length: 'parsec'");
    }

    #[test]
    fn file_errors_are_recoverable() {
        assert!(ScaleError::parse("missing end_header").is_recoverable());
        let io = ScaleError::from(::std::io::Error::new(
            ::std::io::ErrorKind::NotFound,
            "gone",
        ));
        assert!(io.is_recoverable());
    }
}
