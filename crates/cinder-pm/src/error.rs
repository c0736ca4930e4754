use thiserror::Error;

#[derive(Error, Debug)]
pub enum CinderError {
    // Selector / version errors
    #[error(transparent)]
    Version(#[from] cinder_version::VersionError),

    // Malformed regex, metadata or other user input
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("failed to parse package metadata: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("failed to decode stored package: {0}")]
    JsonParse(#[from] serde_json::Error),

    // Store errors
    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(String),

    // Solver errors
    #[error("unsolvable: no model satisfies the constraints")]
    Unsolvable,

    #[error("blocked by reverse dependencies: {}", blockers.join(", "))]
    ConflictBlocked { blockers: Vec<String> },

    // Orchestrator errors
    #[error("integrity check failed for {0}")]
    IntegrityFailure(String),

    #[error("repository error: {0}")]
    Repository(String),

    #[error("install failed: {0}")]
    InstallFailed(String),

    // IO errors, retriable
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("operation cancelled")]
    Cancelled,

    // Consistency violations, never suppressed by --force
    #[error("fatal: {0}")]
    Fatal(String),
}

impl CinderError {
    /// Fatal errors indicate a consistency violation between an index
    /// and its backing store; they must never be downgraded to a
    /// warning, not even under `force`.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CinderError::Fatal(_))
    }

    /// A short stable label for the error category.
    pub fn kind(&self) -> &'static str {
        match self {
            CinderError::Version(_) => "invalid-input",
            CinderError::InvalidInput(_) => "invalid-input",
            CinderError::YamlParse(_) => "invalid-input",
            CinderError::JsonParse(_) => "invalid-input",
            CinderError::NotFound(_) => "not-found",
            CinderError::Storage(_) => "storage",
            CinderError::Unsolvable => "unsolvable",
            CinderError::ConflictBlocked { .. } => "conflict-blocked",
            CinderError::IntegrityFailure(_) => "integrity-failure",
            CinderError::Repository(_) => "repository",
            CinderError::InstallFailed(_) => "install-failed",
            CinderError::Io(_) => "transient",
            CinderError::Cancelled => "cancelled",
            CinderError::Fatal(_) => "fatal",
        }
    }
}

pub type Result<T> = std::result::Result<T, CinderError>;
