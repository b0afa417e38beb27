/*!
Errors surfaced by the request handlers

Every variant is rendered at the handler boundary as `{"error": <Display>}`
with a 500 status, so the `Display` text is what callers see.
*/

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    Configuration(String),

    #[error("Unauthorized")]
    Authentication,

    #[error("No Spotify connection found")]
    NotConnected,

    #[error("{context}: {body}")]
    Upstream {
        context: String,
        status: u16,
        body: String,
    },

    #[error("{0}")]
    Validation(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{0}")]
    Internal(String),
}

impl Error {
    /// Short name used as a structured logging key
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Configuration(_) => "configuration",
            Error::Authentication => "authentication",
            Error::NotConnected => "not_connected",
            Error::Upstream { .. } => "upstream_provider",
            Error::Validation(_) => "validation",
            Error::Database(_) => "database",
            Error::Internal(_) => "internal",
        }
    }

    pub fn upstream(context: &str, status: u16, body: String) -> Self {
        Error::Upstream {
            context: context.to_string(),
            status,
            body,
        }
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Internal(s.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
