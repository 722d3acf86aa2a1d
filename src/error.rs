use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("unauthorized")]
    Unauthorized,

    #[error("account suspended")]
    AccountSuspended,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("backend error ({status}): {message}")]
    Backend { status: u16, message: String },

    #[error("no stored credential")]
    MissingCredential,

    #[error("invalid payload: {0}")]
    Decode(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type ClientResult<T> = Result<T, ClientError>;

impl ClientError {
    /// Message shown to the driver. Backend-provided text wins; otherwise a
    /// stable code the UI layer translates.
    pub fn user_message(&self) -> String {
        match self {
            ClientError::Network(_) | ClientError::Timeout => "network_error".to_string(),
            ClientError::Unauthorized | ClientError::MissingCredential => {
                "unauthorized".to_string()
            }
            ClientError::AccountSuspended => "account_suspended".to_string(),
            ClientError::NotFound(msg) | ClientError::Conflict(msg) if !msg.is_empty() => {
                msg.clone()
            }
            ClientError::NotFound(_) => "api_not_found".to_string(),
            ClientError::Backend { message, .. } if !message.is_empty() => message.clone(),
            ClientError::Backend { status, .. } if *status >= 500 => "server_error".to_string(),
            _ => "An unexpected error occurred".to_string(),
        }
    }

    /// Builds the error for a non-success HTTP response. `message` is the
    /// backend's `message` field when it sent one.
    pub fn from_status(status: u16, message: Option<String>) -> Self {
        let message = message.unwrap_or_default();
        match status {
            401 => ClientError::Unauthorized,
            403 => ClientError::AccountSuspended,
            404 => ClientError::NotFound(message),
            409 => ClientError::Conflict(message),
            _ => ClientError::Backend { status, message },
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Timeout
        } else if err.is_decode() {
            ClientError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            ClientError::from_status(status.as_u16(), None)
        } else {
            ClientError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Decode(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;

        match err {
            WsError::Http(response) if response.status().as_u16() == 401 => {
                ClientError::Unauthorized
            }
            other => ClientError::Network(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ClientError;

    #[test]
    fn status_codes_map_to_typed_errors() {
        assert!(matches!(ClientError::from_status(401, None), ClientError::Unauthorized));
        assert!(matches!(
            ClientError::from_status(403, None),
            ClientError::AccountSuspended
        ));
        assert!(matches!(
            ClientError::from_status(409, Some("ride already taken".to_string())),
            ClientError::Conflict(_)
        ));
        assert!(matches!(
            ClientError::from_status(502, None),
            ClientError::Backend { status: 502, .. }
        ));
    }

    #[test]
    fn user_message_prefers_backend_text() {
        let err = ClientError::from_status(409, Some("ride already taken".to_string()));
        assert_eq!(err.user_message(), "ride already taken");

        let err = ClientError::from_status(422, Some("invalid state transition".to_string()));
        assert_eq!(err.user_message(), "invalid state transition");
    }

    #[test]
    fn user_message_falls_back_to_codes() {
        assert_eq!(ClientError::Timeout.user_message(), "network_error");
        assert_eq!(
            ClientError::Network("connection refused".to_string()).user_message(),
            "network_error"
        );
        assert_eq!(ClientError::Unauthorized.user_message(), "unauthorized");
        assert_eq!(ClientError::from_status(404, None).user_message(), "api_not_found");
        assert_eq!(ClientError::from_status(503, None).user_message(), "server_error");
    }
}
