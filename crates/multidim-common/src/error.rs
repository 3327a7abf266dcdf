//! Error types shared by the multidim crates.

use thiserror::Error;

/// Result type alias using MultidimError.
pub type MultidimResult<T> = Result<T, MultidimError>;

/// Primary error type for dataset resolution, opening and caching.
///
/// Every payload is a plain string so the error is `Clone`: a single
/// in-flight metadata computation hands the same error to all of its waiters.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MultidimError {
    // === Client input errors ===
    #[error("Invalid dataset identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Invalid parameter value for '{param}': {message}")]
    InvalidParameter { param: String, message: String },

    #[error("Unsupported protocol: {0}")]
    UnsupportedProtocol(String),

    #[error("Could not determine array engine for {0}; pass an explicit engine")]
    AmbiguousEngine(String),

    #[error("Dataset not found: {0}")]
    DatasetNotFound(String),

    #[error("Group '{group}' not found in {dataset}")]
    GroupNotFound { dataset: String, group: String },

    #[error("Variable '{variable}' not found (available: {available})")]
    VariableNotFound { variable: String, available: String },

    // === Data errors ===
    #[error("Engine mismatch: {0}")]
    EngineMismatch(String),

    #[error("No engine available for {0} datasets")]
    EngineUnavailable(String),

    #[error("Invalid dataset metadata: {0}")]
    InvalidMetadata(String),

    #[error("Unsupported data type: {0}")]
    UnsupportedDataType(String),

    // === Upstream errors ===
    #[error("Timed out after {0}s opening dataset")]
    UpstreamTimeout(u64),

    #[error("Upstream storage error: {0}")]
    UpstreamIo(String),

    // === Infrastructure ===
    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MultidimError {
    /// Shorthand for a GroupNotFound error.
    pub fn group_not_found(dataset: impl Into<String>, group: impl Into<String>) -> Self {
        Self::GroupNotFound {
            dataset: dataset.into(),
            group: group.into(),
        }
    }

    /// Shorthand for a VariableNotFound error listing what is available.
    pub fn variable_not_found(variable: impl Into<String>, available: &[String]) -> Self {
        Self::VariableNotFound {
            variable: variable.into(),
            available: available.join(", "),
        }
    }

    /// Shorthand for an InvalidParameter error.
    pub fn invalid_parameter(param: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            param: param.into(),
            message: message.into(),
        }
    }

    /// True for errors caused by the request itself.
    ///
    /// These are surfaced as validation failures and never retried.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            MultidimError::InvalidIdentifier(_)
                | MultidimError::InvalidParameter { .. }
                | MultidimError::UnsupportedProtocol(_)
                | MultidimError::AmbiguousEngine(_)
                | MultidimError::DatasetNotFound(_)
                | MultidimError::GroupNotFound { .. }
                | MultidimError::VariableNotFound { .. }
        )
    }

    /// Get the HTTP status code for this error.
    pub fn http_status_code(&self) -> u16 {
        match self {
            MultidimError::InvalidIdentifier(_)
            | MultidimError::InvalidParameter { .. }
            | MultidimError::UnsupportedProtocol(_)
            | MultidimError::AmbiguousEngine(_) => 400,

            MultidimError::DatasetNotFound(_)
            | MultidimError::GroupNotFound { .. }
            | MultidimError::VariableNotFound { .. } => 404,

            MultidimError::EngineMismatch(_) | MultidimError::UnsupportedDataType(_) => 422,

            MultidimError::EngineUnavailable(_) => 501,
            MultidimError::UpstreamIo(_) => 502,
            MultidimError::CacheUnavailable(_) => 503,
            MultidimError::UpstreamTimeout(_) => 504,

            _ => 500,
        }
    }
}

impl From<std::io::Error> for MultidimError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => MultidimError::DatasetNotFound(err.to_string()),
            _ => MultidimError::UpstreamIo(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for MultidimError {
    fn from(err: serde_json::Error) -> Self {
        MultidimError::InvalidMetadata(format!("JSON error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_errors_map_to_4xx() {
        let errors = [
            MultidimError::UnsupportedProtocol("ftp".into()),
            MultidimError::AmbiguousEngine("/data/thing".into()),
            MultidimError::group_not_found("/data/pyramid.zarr", "2"),
            MultidimError::variable_not_found("sst", &["t2m".to_string()]),
        ];

        for err in errors {
            assert!(err.is_client_error(), "{err} should be a client error");
            let status = err.http_status_code();
            assert!((400..500).contains(&status), "{err} mapped to {status}");
        }
    }

    #[test]
    fn test_upstream_errors_are_server_errors() {
        let timeout = MultidimError::UpstreamTimeout(30);
        assert!(!timeout.is_client_error());
        assert_eq!(timeout.http_status_code(), 504);

        let io = MultidimError::UpstreamIo("connection reset".into());
        assert!(!io.is_client_error());
        assert_eq!(io.http_status_code(), 502);
    }

    #[test]
    fn test_variable_not_found_lists_available() {
        let err = MultidimError::variable_not_found("sst", &["a".to_string(), "b".to_string()]);
        assert_eq!(err.to_string(), "Variable 'sst' not found (available: a, b)");
    }

    #[test]
    fn test_io_not_found_becomes_dataset_not_found() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        assert!(matches!(
            MultidimError::from(io),
            MultidimError::DatasetNotFound(_)
        ));
    }
}
