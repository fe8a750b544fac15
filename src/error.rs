use serde_json::Value;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("No access token set. Authorize the session first.")]
    NoToken,
    #[error("Authorization state mismatch (expected {expected}, received {received:?})")]
    InvalidState {
        expected: String,
        received: Option<String>,
    },
    #[error("Authorization failed: {0}")]
    AuthorizationFailed(String),
    #[error("Token exchange failed: {0}")]
    TokenExchangeFailed(String),
    #[error("Unknown scope: {0:?}")]
    UnknownScope(String),
    #[error("API error {code} {name}: {description}")]
    Api {
        code: u16,
        name: &'static str,
        description: &'static str,
        detail: Value,
    },
    #[error("Invalid response format: {0}")]
    InvalidResponseFormat(String),
    #[error("Unknown appliance: {0}")]
    UnknownAppliance(String),
    #[error("Appliance {0} is offline")]
    DeviceOffline(String),
    #[error("Event stream authentication failed: {0}")]
    StreamAuth(String),
    #[error("Event stream failed: {0}")]
    StreamFatal(String),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

impl Error {
    /// Builds an [`Error::Api`] for a status code, filling name and
    /// description from the catalog.
    pub fn api(code: u16, detail: Value) -> Self {
        let entry = crate::catalog::lookup(code);
        Error::Api {
            code,
            name: entry.name,
            description: entry.description,
            detail,
        }
    }

    /// HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Api { code, .. } => Some(*code),
            Error::Http(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
