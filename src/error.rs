use crate::schema::ConceptKey;
use thiserror::Error;

/// Failures reported by the reasoning service, one variant per user-facing message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("Reasoning service rejected the credentials")]
    Authentication,

    #[error("Reasoning service quota exceeded")]
    QuotaExceeded,

    #[error("Reasoning service rate limit exceeded")]
    RateLimited,

    #[error("Reasoning service unavailable: {0}")]
    Unavailable(String),
}

impl UpstreamError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Authentication => {
                "Authentication with the analysis service failed. Check the configured API key."
            }
            Self::QuotaExceeded => "The analysis service quota has been exceeded.",
            Self::RateLimited => {
                "The analysis service is receiving too many requests. Try again in a few moments."
            }
            Self::Unavailable(_) => {
                "Could not reach the analysis service. Try again later."
            }
        }
    }

    /// Classifies a raw failure description the way the service reports it.
    pub fn classify(status: Option<u16>, message: &str) -> Self {
        let lower = message.to_lowercase();
        match status {
            Some(401) | Some(403) => Self::Authentication,
            _ if lower.contains("api key") => Self::Authentication,
            _ if lower.contains("quota") => Self::QuotaExceeded,
            Some(429) => Self::RateLimited,
            _ if lower.contains("rate limit") => Self::RateLimited,
            _ => Self::Unavailable(message.to_string()),
        }
    }
}

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Missing input: {0}")]
    InputMissing(String),

    #[error("{0}")]
    Upstream(#[from] UpstreamError),

    #[error("Malformed reasoning service response: {0}")]
    MalformedResponse(String),

    #[error("Financial extraction unavailable: {reason}")]
    ExtractionUnavailable { reason: String },

    #[error("Period '{period}' is missing values for {missing:?} after every fallback rule")]
    IncompleteModel {
        period: String,
        missing: Vec<ConceptKey>,
    },

    #[error("Could not parse the suggested update: {0}")]
    ReconciliationParse(String),

    #[error("Invalid edit: {0}")]
    InvalidEdit(String),

    #[error("Amount out of range: {0}")]
    Overflow(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to decode '{file}': {reason}")]
    Decode { file: String, reason: String },

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[cfg(feature = "gemini")]
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

impl AnalysisError {
    /// Errors caused by the caller's input rather than by the service or the process.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InputMissing(_) | Self::InvalidEdit(_) | Self::ReconciliationParse(_)
        )
    }

    /// Whether this error means the reasoning service could not give a usable answer.
    pub fn is_upstream_failure(&self) -> bool {
        match self {
            Self::Upstream(_) | Self::MalformedResponse(_) => true,
            #[cfg(feature = "gemini")]
            Self::HttpError(_) => true,
            _ => false,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            Self::Upstream(e) => e.user_message().to_string(),
            Self::MalformedResponse(_) => UpstreamError::Unavailable(String::new())
                .user_message()
                .to_string(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AnalysisError>;
