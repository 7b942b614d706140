use thiserror::Error;

/// How badly a failure hurts: fatal errors abort startup, recoverable ones
/// are recorded per task or per branch, transient ones are absorbed into
/// degraded-mode fallbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Fatal,
    Recoverable,
    Transient,
}

/// Tagged error sum matched exhaustively at each component boundary.
#[derive(Debug, Error)]
pub enum GardenerError {
    /// Missing credentials, unusable work directory. Raised only while
    /// initializing; terminates the process.
    #[error("config: {message}")]
    Config { message: String },

    /// Hosting-API failure. Strict gateway calls surface this; fallback
    /// calls absorb it into a degraded result.
    #[error("hosting api [{endpoint}]: {message}")]
    Upstream {
        endpoint: &'static str,
        message: String,
    },

    /// Discovery or coding-agent failure, recorded at the cycle level.
    #[error("agent: {message}")]
    Agent { message: String },

    /// Per-task worker failure; never aborts the batch.
    #[error("worker [{branch}]: {message}")]
    Worker { branch: String, message: String },

    /// Per-branch merge failure; never aborts the remaining sequence.
    #[error("merge [{branch}]: {message}")]
    Merge { branch: String, message: String },
}

impl GardenerError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn upstream(endpoint: &'static str, message: impl Into<String>) -> Self {
        Self::Upstream {
            endpoint,
            message: message.into(),
        }
    }

    pub fn agent(message: impl Into<String>) -> Self {
        Self::Agent {
            message: message.into(),
        }
    }

    pub fn worker(branch: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Worker {
            branch: branch.into(),
            message: message.into(),
        }
    }

    pub fn merge(branch: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Merge {
            branch: branch.into(),
            message: message.into(),
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Self::Config { .. } => Severity::Fatal,
            Self::Upstream { .. } => Severity::Transient,
            Self::Agent { .. } | Self::Worker { .. } | Self::Merge { .. } => Severity::Recoverable,
        }
    }

    pub fn recovery_hint(&self) -> &'static str {
        match self {
            Self::Config { .. } => "fix configuration and restart",
            Self::Upstream { .. } => "retried automatically once the circuit closes",
            Self::Agent { .. } => "cycle continues with already-tracked issues",
            Self::Worker { .. } => "issue labeled needs-review for a human",
            Self::Merge { .. } => "branch left open; merge retried next cycle",
        }
    }
}
