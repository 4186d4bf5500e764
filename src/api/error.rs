//! API failure taxonomy.
//!
//! Every failure coming out of a [`RequestExecutor`](super::RequestExecutor)
//! is classified exactly once, here, into an [`ApiError`] variant. The error
//! dispatcher in `auth` matches on these variants; nothing above the executor
//! boundary ever inspects raw status codes or response bodies.

use serde::Deserialize;
use thiserror::Error;

/// HTTP status (and backend envelope code) signalling that this client build
/// is too old to keep talking to the server.
const STATUS_VERSION_MISMATCH: u16 = 426;

/// Maximum length for error response bodies carried in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

#[derive(Error, Debug)]
pub enum ApiError {
    /// Client build rejected by the server. Non-recoverable; the user must
    /// update the app.
    #[error("versão do aplicativo não suportada pelo servidor")]
    VersionMismatch,

    /// The session is no longer valid at the remote system but can be
    /// re-established by re-entering the password.
    #[error("reautenticação necessária")]
    ReauthRequired,

    /// Session fully expired or revoked; a new login is required.
    #[error("não autorizado - sessão expirada ou revogada")]
    Unauthorized,

    #[error("acesso negado: {0}")]
    AccessDenied(String),

    #[error("limite de requisições excedido")]
    RateLimited,

    #[error("erro no servidor: {0}")]
    Server(String),

    #[error("erro de rede: {0}")]
    Network(#[from] reqwest::Error),

    #[error("resposta inválida: {0}")]
    InvalidResponse(String),
}

/// Error envelope the backend wraps non-success responses in.
/// `statusCode` carries application-level codes that may differ from the
/// transport status; `reauthRequired` marks recoverable session rejections.
#[derive(Debug, Default, Deserialize)]
struct ErrorEnvelope {
    #[serde(rename = "statusCode")]
    status_code: Option<i64>,
    #[serde(rename = "reauthRequired", default)]
    reauth_required: bool,
    message: Option<String>,
}

impl ApiError {
    /// Truncate a response body to avoid carrying excessive data in errors
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            format!(
                "{}... (truncated, {} total bytes)",
                &body[..MAX_ERROR_BODY_LENGTH],
                body.len()
            )
        }
    }

    /// Classify a non-success response. Priority order: version mismatch
    /// (transport 426 or envelope code 426) beats the `reauthRequired`
    /// marker, which beats a plain 401.
    pub fn from_response(status: reqwest::StatusCode, body: &str) -> Self {
        let envelope: ErrorEnvelope = serde_json::from_str(body).unwrap_or_default();

        if status.as_u16() == STATUS_VERSION_MISMATCH
            || envelope.status_code == Some(i64::from(STATUS_VERSION_MISMATCH))
        {
            return ApiError::VersionMismatch;
        }

        if envelope.reauth_required {
            return ApiError::ReauthRequired;
        }

        let detail = envelope
            .message
            .unwrap_or_else(|| Self::truncate_body(body));

        match status.as_u16() {
            401 => ApiError::Unauthorized,
            403 => ApiError::AccessDenied(detail),
            429 => ApiError::RateLimited,
            500..=599 => ApiError::Server(detail),
            _ => ApiError::InvalidResponse(format!("Status {}: {}", status, detail)),
        }
    }
}
