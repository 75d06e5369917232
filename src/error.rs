use thiserror::Error;

#[derive(Error, Debug)]
pub enum CiscopeError {
    #[error("no enabled source in system '{system}' implements '{handler}'")]
    NoCapableSource { system: String, handler: String },

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("missing argument: {0}")]
    MissingArgument(String),

    #[error("backend fetch failed: {0}")]
    BackendFetch(String),

    #[error("malformed record: {0}")]
    MalformedRecord(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CiscopeError>;
