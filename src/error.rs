use thiserror::Error;

pub type Result<T> = std::result::Result<T, SluiceError>;

/// Codes carried back to callers in every response.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Hash, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    None,
    NotLeader,
    InvalidParameter,
    TopicAlreadyExists,
    TopicNotExists,
    TopicInCleaning,
    SealedTopicCannotModify,
    SchemaNotFound,
    OperationFailed,
}

#[derive(Debug, Error)]
pub enum SluiceError {
    #[error("this admin is not the leader")]
    NotLeader,
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("topic [{0}] already exists")]
    TopicExists(String),
    #[error("topic [{0}] does not exist")]
    TopicNotFound(String),
    #[error("topic [{0}] is still being cleaned")]
    TopicInCleaning(String),
    #[error("topic [{0}] is sealed, {1} cannot be modified")]
    SealedTopic(String, &'static str),
    #[error("schema version {version} not found for topic [{topic}]")]
    SchemaNotFound { topic: String, version: i32 },
    #[error("registry error on [{path}]: {error_msg}")]
    Registry { path: String, error_msg: String },
    #[error("codec error: {0}")]
    Codec(#[from] Box<bincode::ErrorKind>),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config error: {0}")]
    Config(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl SluiceError {
    pub fn registry(path: impl Into<String>, err: impl std::fmt::Display) -> Self {
        SluiceError::Registry {
            path: path.into(),
            error_msg: err.to_string(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            SluiceError::NotLeader => ErrorCode::NotLeader,
            SluiceError::InvalidParameter(_) => ErrorCode::InvalidParameter,
            SluiceError::TopicExists(_) => ErrorCode::TopicAlreadyExists,
            SluiceError::TopicNotFound(_) => ErrorCode::TopicNotExists,
            SluiceError::TopicInCleaning(_) => ErrorCode::TopicInCleaning,
            SluiceError::SealedTopic(..) => ErrorCode::SealedTopicCannotModify,
            SluiceError::SchemaNotFound { .. } => ErrorCode::SchemaNotFound,
            SluiceError::Registry { .. }
            | SluiceError::Codec(_)
            | SluiceError::Json(_)
            | SluiceError::Io(_)
            | SluiceError::Config(_)
            | SluiceError::Internal(_) => ErrorCode::OperationFailed,
        }
    }
}

impl From<sled::Error> for SluiceError {
    fn from(err: sled::Error) -> Self {
        SluiceError::Registry {
            path: String::new(),
            error_msg: err.to_string(),
        }
    }
}

impl From<config::ConfigError> for SluiceError {
    fn from(err: config::ConfigError) -> Self {
        SluiceError::Config(err.to_string())
    }
}

impl From<regex::Error> for SluiceError {
    fn from(err: regex::Error) -> Self {
        SluiceError::Config(err.to_string())
    }
}

impl From<tokio::task::JoinError> for SluiceError {
    fn from(err: tokio::task::JoinError) -> Self {
        SluiceError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes() {
        assert_eq!(ErrorCode::NotLeader, SluiceError::NotLeader.code());
        assert_eq!(
            ErrorCode::SealedTopicCannotModify,
            SluiceError::SealedTopic("t".to_string(), "partition count").code()
        );
        assert_eq!(
            ErrorCode::OperationFailed,
            SluiceError::registry("topic_meta", "disk full").code()
        );
    }
}
