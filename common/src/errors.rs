// Error handling framework for probes, the action pipeline, scheduling and storage

use thiserror::Error;

/// Schedule-related errors
#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCronExpression { expression: String, reason: String },

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("No next execution time available for '{0}'")]
    NoNextExecution(String),

    #[error("Scheduler already running")]
    AlreadyRunning,
}

/// Errors raised while observing the current value of a watched source
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Transport error for {target}: {reason}")]
    Transport { target: String, reason: String },

    #[error("Unexpected status {status} from {url}")]
    UnexpectedStatus { url: String, status: u16 },

    #[error("Malformed response from {target}: {reason}")]
    Decode { target: String, reason: String },

    #[error("No tag matching '{pattern}' for {repository}: {detail}")]
    NoMatch {
        repository: String,
        pattern: String,
        detail: String,
    },

    #[error("Unsupported repository URL: {0}")]
    UnsupportedUrl(String),

    #[error("Timed out after {seconds} seconds waiting for {target}")]
    Timeout { target: String, seconds: u64 },
}

/// Errors raised by the clone + init script action pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Filesystem error on {path}: {reason}")]
    Filesystem { path: String, reason: String },

    #[error("Failed to launch {program}: {reason}")]
    Transport { program: String, reason: String },

    #[error("Clone of {url} (branch {branch}) exited with status {code}")]
    CloneFailed {
        url: String,
        branch: String,
        code: i32,
    },

    #[error("Init script {script} exited with status {code}")]
    ScriptExecution { script: String, code: i32 },

    #[error("{step} timed out after {seconds} seconds")]
    Timeout { step: String, seconds: u64 },
}

/// Failures launching or supervising an external process
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to spawn {program}: {reason}")]
    Spawn { program: String, reason: String },

    #[error("{program} did not finish within {seconds} seconds")]
    Timeout { program: String, seconds: u64 },

    #[error("I/O error while waiting for {program}: {reason}")]
    Io { program: String, reason: String },
}

/// Database-specific errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Database health check failed: {0}")]
    HealthCheckFailed(String),

    #[error("Query execution failed: {0}")]
    QueryFailed(String),

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Schema bootstrap failed: {0}")]
    BootstrapFailed(String),
}

/// Errors loading or validating the watch list
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Failed to read {path}: {reason}")]
    Unreadable { path: String, reason: String },

    #[error("Invalid YAML: {0}")]
    InvalidYaml(String),

    #[error("Invalid field value for {field}: {reason}")]
    InvalidFieldValue { field: String, reason: String },
}

/// Everything that can end one entity's cycle early.
///
/// Cycle errors are logged at the entity boundary and never propagate to the
/// scheduler or to other entities.
#[derive(Error, Debug)]
pub enum CycleError {
    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Store(#[from] DatabaseError),
}

impl CycleError {
    /// Short label used for metrics and structured logs
    pub fn reason(&self) -> &'static str {
        match self {
            CycleError::Probe(ProbeError::Transport { .. }) => "transport",
            CycleError::Probe(ProbeError::UnexpectedStatus { .. }) => "unexpected_status",
            CycleError::Probe(ProbeError::Decode { .. }) => "decode",
            CycleError::Probe(ProbeError::NoMatch { .. }) => "no_match",
            CycleError::Probe(ProbeError::UnsupportedUrl(_)) => "unsupported_url",
            CycleError::Probe(ProbeError::Timeout { .. }) => "timeout",
            CycleError::Pipeline(PipelineError::Filesystem { .. }) => "filesystem",
            CycleError::Pipeline(PipelineError::Transport { .. }) => "transport",
            CycleError::Pipeline(PipelineError::CloneFailed { .. }) => "clone_failed",
            CycleError::Pipeline(PipelineError::ScriptExecution { .. }) => "script_execution",
            CycleError::Pipeline(PipelineError::Timeout { .. }) => "timeout",
            CycleError::Store(_) => "store",
        }
    }
}

// Implement From for common external errors
impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DatabaseError::NotFound("Record not found".to_string()),
            sqlx::Error::Database(db_err) => DatabaseError::QueryFailed(db_err.message().to_string()),
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}

impl From<serde_yaml::Error> for ValidationError {
    fn from(err: serde_yaml::Error) -> Self {
        ValidationError::InvalidYaml(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_error_display() {
        let err = ScheduleError::InvalidCronExpression {
            expression: "* * * *".to_string(),
            reason: "invalid format".to_string(),
        };
        assert!(err.to_string().contains("Invalid cron expression"));
    }

    #[test]
    fn test_unexpected_status_display() {
        let err = ProbeError::UnexpectedStatus {
            url: "https://api.github.com/repos/o/r/commits/main".to_string(),
            status: 404,
        };
        assert!(err.to_string().contains("404"));
    }

    #[test]
    fn test_cycle_error_reason_labels() {
        let err: CycleError = PipelineError::ScriptExecution {
            script: "init.sh".to_string(),
            code: 2,
        }
        .into();
        assert_eq!(err.reason(), "script_execution");

        let err: CycleError = ProbeError::NoMatch {
            repository: "https://github.com/o/r".to_string(),
            pattern: "^v1".to_string(),
            detail: "3 tags scanned".to_string(),
        }
        .into();
        assert_eq!(err.reason(), "no_match");
    }

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        let err: DatabaseError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, DatabaseError::NotFound(_)));
    }
}
