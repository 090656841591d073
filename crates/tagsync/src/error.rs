use crate::types::TagId;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Query syntax error in {query:?}: {message}")]
    QuerySyntax { query: String, message: String },

    #[error("Ambiguous query {query:?}: group mixed 'and'/'or' terms with parentheses")]
    QueryAmbiguous { query: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("HTTP error {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Service temporarily unavailable")]
    ServiceDown,

    #[error("Inactive entity: {0}")]
    Inactive(String),

    #[error("Not loaded yet: {0}")]
    NotLoaded(&'static str),

    #[error("Toggle aborted at tag {failed} after applying {applied:?}, skipping {skipped:?}: {source}")]
    ToggleAborted {
        applied: Vec<TagId>,
        failed: TagId,
        skipped: Vec<TagId>,
        #[source]
        source: Box<SyncError>,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;

impl SyncError {
    pub(crate) fn syntax(query: &str, message: impl Into<String>) -> Self {
        Self::QuerySyntax {
            query: query.to_string(),
            message: message.into(),
        }
    }

    /// HTTP status carried by this error, if it came from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::NotAuthenticated => Some(401),
            Self::ServiceDown => Some(502),
            Self::ToggleAborted { source, .. } => source.status(),
            _ => None,
        }
    }

    pub fn is_conflict(&self) -> bool {
        self.status() == Some(409)
    }

    pub fn is_service_down(&self) -> bool {
        matches!(self.status(), Some(502))
    }
}
