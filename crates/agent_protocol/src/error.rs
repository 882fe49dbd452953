use thiserror::Error;

/// Broad origin of a provider failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelErrorKind {
    /// The provider answered with an error payload or error status.
    Api,
    Timeout,
    /// The connection could not be established or was reset.
    Connection,
    /// The response stream ended before the provider finished.
    PrematureClose,
    /// A stream frame carried malformed JSON.
    InvalidJson,
    /// The request was aborted locally.
    Aborted,
}

/// Failure reported by a [`crate::ModelClient`], carrying whatever the
/// provider attached so callers can classify it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ModelError {
    pub kind: ModelErrorKind,
    pub status: Option<u16>,
    pub code: Option<String>,
    pub error_type: Option<String>,
    pub param: Option<String>,
    pub message: String,
    pub request_id: Option<String>,
}

impl ModelError {
    #[must_use]
    pub fn new(kind: ModelErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            code: None,
            error_type: None,
            param: None,
            message: message.into(),
            request_id: None,
        }
    }

    /// Error payload returned by the provider with an optional HTTP status.
    #[must_use]
    pub fn api(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            ..Self::new(ModelErrorKind::Api, message)
        }
    }

    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ModelErrorKind::Timeout, message)
    }

    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(ModelErrorKind::Connection, message)
    }

    #[must_use]
    pub fn premature_close() -> Self {
        Self::new(ModelErrorKind::PrematureClose, "Premature close")
    }

    #[must_use]
    pub fn invalid_json(message: impl Into<String>) -> Self {
        Self::new(ModelErrorKind::InvalidJson, message)
    }

    #[must_use]
    pub fn aborted() -> Self {
        Self::new(ModelErrorKind::Aborted, "Request was aborted.")
    }

    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    #[must_use]
    pub fn with_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = Some(error_type.into());
        self
    }

    #[must_use]
    pub fn with_param(mut self, param: impl Into<String>) -> Self {
        self.param = Some(param.into());
        self
    }

    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    pub fn error_type(&self) -> Option<&str> {
        self.error_type.as_deref()
    }

    /// `Status: .., Code: .., Type: .., Message: ..` summary used in notices.
    pub fn details(&self) -> String {
        let status = self
            .status
            .map(|status| status.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let field = |value: Option<&str>| {
            value
                .filter(|value| !value.is_empty())
                .unwrap_or("unknown")
                .to_string()
        };
        format!(
            "Status: {status}, Code: {}, Type: {}, Message: {}",
            field(self.code()),
            field(self.error_type()),
            field(Some(self.message.as_str())),
        )
    }
}
