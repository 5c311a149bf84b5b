use std::path::PathBuf;

use thiserror::Error;

use crate::solver::UnsatisfiableError;

/// Errors raised by the package manager
#[derive(Error, Debug)]
pub enum Error {
    #[error("Malformed Pipfile: {0}")]
    MalformedSpecification(String),

    #[error(transparent)]
    Unsatisfiable(#[from] UnsatisfiableError),

    #[error("Metadata for {package} is unavailable: {reason}")]
    MetadataUnavailable { package: String, reason: String },

    #[error("Pipfile.lock ({}) is out of date. Expected: ({}).", short_hash(.found.as_deref()), short_hash(Some(.expected.as_str())))]
    LockOutOfDate {
        expected: String,
        found: Option<String>,
    },

    #[error("Hash mismatch for {package}=={version}: computed {actual} is not in the locked hash set")]
    Integrity {
        package: String,
        version: String,
        actual: String,
    },

    #[error("No package named {name} in [{category}]")]
    NotFound { category: String, name: String },

    #[error("Lock file {} is held by another process", .0.display())]
    LockBusy(PathBuf),

    #[error("Resolution was cancelled")]
    Cancelled,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// The category of an [`Error`], for callers that branch on failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    MalformedSpecification,
    Unsatisfiable,
    MetadataUnavailable,
    LockOutOfDate,
    Integrity,
    NotFound,
    LockBusy,
    Cancelled,
    Io,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::MalformedSpecification(_) => ErrorKind::MalformedSpecification,
            Error::Unsatisfiable(_) => ErrorKind::Unsatisfiable,
            Error::MetadataUnavailable { .. } | Error::Http(_) => ErrorKind::MetadataUnavailable,
            Error::LockOutOfDate { .. } => ErrorKind::LockOutOfDate,
            Error::Integrity { .. } => ErrorKind::Integrity,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::LockBusy(_) => ErrorKind::LockBusy,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Io(_) | Error::Json(_) => ErrorKind::Io,
        }
    }

    /// Process exit code used by the command line front end
    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::LockOutOfDate => 1,
            ErrorKind::MalformedSpecification => 2,
            ErrorKind::Unsatisfiable => 3,
            ErrorKind::MetadataUnavailable => 4,
            ErrorKind::Integrity => 5,
            ErrorKind::NotFound => 6,
            ErrorKind::LockBusy => 7,
            ErrorKind::Cancelled => 130,
            ErrorKind::Io => 1,
        }
    }

    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        Error::MalformedSpecification(message.into())
    }
}

fn short_hash(hash: Option<&str>) -> String {
    match hash {
        Some(h) if h.len() >= 6 => h[h.len() - 6..].to_string(),
        Some(h) => h.to_string(),
        None => "missing".to_string(),
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_out_of_date_message() {
        let err = Error::LockOutOfDate {
            expected: "aaaaaa123456".to_string(),
            found: Some("bbbbbb654321".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "Pipfile.lock (654321) is out of date. Expected: (123456)."
        );
        assert_eq!(err.kind(), ErrorKind::LockOutOfDate);

        let err = Error::LockOutOfDate {
            expected: "aaaaaa123456".to_string(),
            found: None,
        };
        assert!(err.to_string().contains("(missing)"));
    }

    #[test]
    fn test_exit_codes_are_distinct_per_kind() {
        let errors = [
            Error::malformed("x"),
            Error::MetadataUnavailable {
                package: "a".into(),
                reason: "timeout".into(),
            },
            Error::Integrity {
                package: "a".into(),
                version: "1".into(),
                actual: "sha256:00".into(),
            },
            Error::NotFound {
                category: "default".into(),
                name: "a".into(),
            },
        ];
        let codes: Vec<i32> = errors.iter().map(Error::exit_code).collect();
        assert_eq!(codes, vec![2, 4, 5, 6]);
    }
}
