use thiserror::Error;

use crate::rpc::{FailureKind, ObjectId};

/// Failure raised while a fragment handles a remote call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CallError {
    /// A check inside a scenario method did not hold.
    #[error("{0}")]
    Assertion(String),

    /// The method raised, synchronously or through its pending result.
    #[error("{0}")]
    Raised(String),

    #[error("{method}() takes {expected} arguments ({given} given)")]
    BadArguments {
        method: String,
        expected: usize,
        given: usize,
    },

    #[error("no such object {0}")]
    NoSuchObject(ObjectId),

    #[error("method {method:?} is not allowed on {fragment}")]
    MethodNotAllowed { fragment: String, method: String },
}

impl CallError {
    pub fn kind(&self) -> FailureKind {
        match self {
            CallError::Assertion(_) => FailureKind::AssertionFailure,
            CallError::Raised(_) => FailureKind::RemoteFailure,
            CallError::BadArguments { .. } => FailureKind::BadArguments,
            CallError::NoSuchObject(_) => FailureKind::NoSuchObject,
            CallError::MethodNotAllowed { .. } => FailureKind::NoSuchMethod,
        }
    }
}

/// A failure as observed on the calling side.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind}: {message}")]
pub struct RemoteError {
    pub kind: FailureKind,
    pub message: String,
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("Test Failure: {0}")]
    TestFailure(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

pub type ClientResult<T> = Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_error_text_carries_message() {
        let err = RemoteError {
            kind: FailureKind::RemoteFailure,
            message: "boom".into(),
        };
        assert_eq!(err.to_string(), "RemoteFailure: boom");

        let wrapped = ClientError::from(err);
        assert!(wrapped.to_string().contains("boom"));
    }

    #[test]
    fn call_errors_map_to_wire_kinds() {
        assert_eq!(
            CallError::Assertion("x".into()).kind(),
            FailureKind::AssertionFailure
        );
        assert_eq!(
            CallError::Raised("x".into()).kind(),
            FailureKind::RemoteFailure
        );
        assert_eq!(
            CallError::NoSuchObject(ObjectId(9)).kind(),
            FailureKind::NoSuchObject
        );
        assert_eq!(
            CallError::MethodNotAllowed {
                fragment: "f".into(),
                method: "m".into()
            }
            .kind(),
            FailureKind::NoSuchMethod
        );
    }

    #[test]
    fn bad_arguments_message() {
        let err = CallError::BadArguments {
            method: "test".into(),
            expected: 5,
            given: 2,
        };
        assert_eq!(err.to_string(), "test() takes 5 arguments (2 given)");
        assert_eq!(err.kind(), FailureKind::BadArguments);
    }

    #[test]
    fn test_failure_prefix() {
        let err = ClientError::TestFailure("1 != 2".into());
        assert_eq!(err.to_string(), "Test Failure: 1 != 2");
    }
}
