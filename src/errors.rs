use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Unsupported database engine: {0}")]
    UnsupportedEngine(String),

    #[error("{program} exited with {}: {stderr}", exit_label(.code))]
    Process {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("{program} produced more than {limit} bytes of output")]
    OutputTooLarge { program: String, limit: usize },

    #[error("Backup of {0} produced no content")]
    EmptyBackup(String),

    #[error("No artifact {0}")]
    ArtifactNotFound(String),

    #[error("No credential for database {0}")]
    CredentialNotFound(String),

    #[error("{0} executable not found in PATH")]
    ExecutableNotFound(String),

    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not find a free artifact name for {0}")]
    ArtifactCollision(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Storage(format!("database: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Storage(format!("filesystem: {err}"))
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        AppError::Storage(format!("background task failed: {err}"))
    }
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("status {c}"),
        None => "a signal".to_string(),
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
