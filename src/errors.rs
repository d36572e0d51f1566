use thiserror::Error;

use crate::remediation::RemediationExecution;

/// The central error type for the remediation engine.
///
/// Each failure domain has its own enum so callers can match on the kind
/// they care about and let everything else bubble up through `?`.
#[derive(Error, Debug)]
pub enum FaultmendError {
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Tracking error: {0}")]
    Tracking(#[from] TrackingError),

    #[error("Analysis error: {0}")]
    Analysis(#[from] AnalysisError),

    #[error("Metrics collection error: {0}")]
    Metrics(#[from] MetricsCollectionError),

    #[error("Pattern service error: {0}")]
    PatternService(#[from] PatternServiceError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Node not found: {id}")]
    NodeNotFound { id: String },

    #[error("Edge {source_id} -> {target_id} references missing node '{missing}'")]
    InvalidReference {
        source_id: String,
        target_id: String,
        missing: String,
    },

    #[error("Node already exists: {id}")]
    DuplicateNode { id: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Remediation plan has no steps or strategies.")]
    EmptyPlan,

    #[error("Malformed descriptor '{descriptor}': {reason}")]
    MalformedDescriptor { descriptor: String, reason: String },

    #[error("{kind} type '{type_name}' is not allowed")]
    TypeNotAllowed { kind: String, type_name: String },

    #[error("{kind} '{type_name}' is missing required parameter '{parameter}'")]
    MissingParameter {
        kind: String,
        type_name: String,
        parameter: String,
    },

    #[error("Plan check '{check}' failed: {reason}")]
    ContextMismatch { check: String, reason: String },

    #[error("Validation timed out after {seconds} seconds")]
    Timeout { seconds: u64 },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("Strategy '{strategy}' failed: {message}")]
    Failed { strategy: String, message: String },

    #[error("Strategy '{strategy}' panicked: {message}")]
    Panicked { strategy: String, message: String },

    #[error("Strategy '{strategy}' timed out after {seconds} seconds")]
    Timeout { strategy: String, seconds: u64 },

    #[error("Strategy '{strategy}' cannot be applied: {reason}")]
    NotApplicable { strategy: String, reason: String },
}

/// Failures raised by a persistent store backend.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store backend error: {0}")]
    Backend(String),

    #[cfg(feature = "redis-store")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

#[derive(Error, Debug)]
pub enum TrackingError {
    #[error("Failed to persist remediation {execution_id}: {source}")]
    Store {
        execution_id: String,
        #[source]
        source: StoreError,
    },

    #[error("Failed to (de)serialize remediation {execution_id}: {source}")]
    Serialization {
        execution_id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to query index {index}: {source}")]
    Index {
        index: String,
        #[source]
        source: StoreError,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnalysisError {
    #[error("Analysis request timed out")]
    Timeout,

    #[error("Analysis service returned status {status}: {message}")]
    HttpStatus { status: u16, message: String },

    #[error("Analysis request failed: {0}")]
    Request(String),

    #[error("Failed to parse analysis response: {0}")]
    Parse(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetricsCollectionError {
    #[error("Metrics collection timed out after {millis} ms")]
    Timeout { millis: u64 },

    #[error("Resource sampling failed: {0}")]
    Sampler(String),

    #[error("No metrics session for remediation {remediation_id}")]
    UnknownRemediation { remediation_id: String },
}

#[derive(Error, Debug)]
pub enum PatternServiceError {
    #[error("Pattern service request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Pattern service returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Pattern service is not configured")]
    NotConfigured,

    #[error("Invalid pattern service URL: {0}")]
    InvalidUrl(String),
}

/// Returned when the final persistence of an execution fails.
///
/// The execution itself finished; the caller still gets the in-memory
/// record alongside the tracking failure.
#[derive(Error, Debug)]
#[error("Remediation {} finished but could not be persisted: {source}", .execution.execution_id)]
pub struct FinalizeError {
    pub execution: Box<RemediationExecution>,
    #[source]
    pub source: TrackingError,
}

pub type Result<T> = std::result::Result<T, FaultmendError>;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_ERROR: u8 = 1;
pub const EXIT_CONFIG_ERROR: u8 = 2;
pub const EXIT_VALIDATION_ERROR: u8 = 3;
pub const EXIT_ANALYSIS_ERROR: u8 = 4;

/// Determine the appropriate process exit code for an error.
pub fn get_exit_code(e: &anyhow::Error) -> u8 {
    if let Some(err) = e.downcast_ref::<FaultmendError>() {
        return match err {
            FaultmendError::Config(_) => EXIT_CONFIG_ERROR,
            FaultmendError::Validation(_) => EXIT_VALIDATION_ERROR,
            FaultmendError::Analysis(_) => EXIT_ANALYSIS_ERROR,
            _ => EXIT_ERROR,
        };
    }

    if e.downcast_ref::<ValidationError>().is_some() {
        return EXIT_VALIDATION_ERROR;
    }
    if e.downcast_ref::<AnalysisError>().is_some() {
        return EXIT_ANALYSIS_ERROR;
    }

    EXIT_ERROR
}
