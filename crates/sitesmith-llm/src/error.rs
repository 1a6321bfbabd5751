/// Errors that can occur when talking to a generation service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("http error: {0}")]
    Http(Box<dyn std::error::Error + Send + Sync>),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("api error ({code}): {message}")]
    Api { code: String, message: String },

    /// The service answered, but not with the shape we expect
    /// (e.g. no `choices[0].message.content`).
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Credentials or endpoint configuration are structurally invalid.
    /// Retrying cannot fix this.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Error::Configuration(_))
    }
}

#[cfg(test)]
mod tests {
    use super::Error;

    #[test]
    fn only_configuration_errors_are_fatal() {
        assert!(!Error::Configuration("bad key".into()).is_retryable());
        assert!(Error::InvalidResponse("no choices".into()).is_retryable());
        assert!(
            Error::Api {
                code: "500".into(),
                message: "boom".into()
            }
            .is_retryable()
        );
        assert!(Error::Http("timed out".into()).is_retryable());
    }
}
