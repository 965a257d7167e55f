use std::fmt;

/// Error types of the polygonal prism inversion
#[derive(Debug, Clone, PartialEq)]
pub enum InversionError {
    /// sizes, shapes or signs of the inputs do not fit together
    PreconditionViolation(String),
    /// damped normal equations could not be solved at any damping level
    IllConditionedLinearSystem(String),
    /// reading or writing files failed
    Io(String),
    /// malformed task document
    Parse(String),
}

impl fmt::Display for InversionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            InversionError::PreconditionViolation(msg) => {
                write!(f, "Precondition violated: {}", msg)
            }
            InversionError::IllConditionedLinearSystem(msg) => {
                write!(f, "Ill-conditioned linear system: {}", msg)
            }
            InversionError::Io(msg) => write!(f, "I/O error: {}", msg),
            InversionError::Parse(msg) => write!(f, "Parse error: {}", msg),
        }
    }
}

impl std::error::Error for InversionError {}

impl From<std::io::Error> for InversionError {
    fn from(err: std::io::Error) -> Self {
        InversionError::Io(err.to_string())
    }
}

impl From<csv::Error> for InversionError {
    fn from(err: csv::Error) -> Self {
        InversionError::Io(err.to_string())
    }
}

/// shortcut used by the validation code: returns PreconditionViolation when `condition` is false
pub(crate) fn ensure(condition: bool, msg: impl Into<String>) -> Result<(), InversionError> {
    if condition {
        Ok(())
    } else {
        Err(InversionError::PreconditionViolation(msg.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_kind() {
        let err = InversionError::PreconditionViolation("m0 has wrong size".to_string());
        assert_eq!(err.to_string(), "Precondition violated: m0 has wrong size");
        let err = InversionError::Parse("no title".to_string());
        assert!(err.to_string().starts_with("Parse error"));
    }

    #[test]
    fn ensure_maps_false_to_error() {
        assert!(ensure(true, "fine").is_ok());
        assert_eq!(
            ensure(false, "tol must be positive"),
            Err(InversionError::PreconditionViolation(
                "tol must be positive".to_string()
            ))
        );
    }
}
