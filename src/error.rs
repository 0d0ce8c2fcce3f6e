use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Field path or configuration key that caused the error (e.g., "cache.max_size", "request.fallback")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected type, actual value)
    pub details: Option<String>,
    /// Source of the error (e.g., "redis_store", "request_validator")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Unified error type for the gateway.
///
/// Every variant corresponds to one failure class the orchestrator knows how to
/// turn into a well-formed response. `Store` errors never leave the crate: the
/// rate limiter and cache recover from them locally.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Service unavailable: {message}")]
    ServiceUnavailable { message: String },

    #[error("Upstream error{}: {message}{}", format_status(.status), format_context(.context))]
    Upstream {
        status: Option<u16>,
        message: String,
        context: ErrorContext,
    },

    #[error("Upstream timed out after {elapsed_ms}ms")]
    UpstreamTimeout { elapsed_ms: u64 },

    #[error("Daily budget exceeded for {user_id}: spent ${spent_usd:.4} of ${limit_usd:.2}")]
    BudgetExceeded {
        user_id: String,
        spent_usd: f64,
        limit_usd: f64,
    },

    #[error("Rate limited: retry after {retry_after_secs}s ({remaining} remaining)")]
    RateLimited { retry_after_secs: u64, remaining: u64 },

    #[error("Store error: {message}{}", format_context(.context))]
    Store {
        message: String,
        context: ErrorContext,
    },

    #[error("Validation error: {message}{}", format_context(.context))]
    Validation {
        message: String,
        context: ErrorContext,
    },

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

fn format_status(status: &Option<u16>) -> String {
    match status {
        Some(s) => format!(" (HTTP {})", s),
        None => String::new(),
    }
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    pub fn service_unavailable(msg: impl Into<String>) -> Self {
        Error::ServiceUnavailable {
            message: msg.into(),
        }
    }

    /// Create a new upstream error with an optional HTTP status
    pub fn upstream(status: Option<u16>, msg: impl Into<String>) -> Self {
        Error::Upstream {
            status,
            message: msg.into(),
            context: ErrorContext::new().with_source("upstream_provider"),
        }
    }

    /// Create a new store error with structured context
    pub fn store_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Store {
            message: msg.into(),
            context,
        }
    }

    /// Create a new validation error with structured context
    pub fn validation_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Validation {
            message: msg.into(),
            context,
        }
    }

    /// Create a new configuration error with structured context
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Upstream { context, .. }
            | Error::Store { context, .. }
            | Error::Validation { context, .. }
            | Error::Configuration { context, .. } => Some(context),
            _ => None,
        }
    }

    /// HTTP status a caller should see for this failure.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::ServiceUnavailable { .. } | Error::Upstream { .. } | Error::Store { .. } => 503,
            Error::UpstreamTimeout { .. } => 504,
            Error::BudgetExceeded { .. } => 402,
            Error::RateLimited { .. } => 429,
            Error::Validation { .. } => 400,
            Error::Configuration { .. }
            | Error::Io(_)
            | Error::Serialization(_)
            | Error::Yaml(_) => 500,
        }
    }

    /// Whether the circuit breaker should count this outcome as a failure.
    pub fn is_upstream_failure(&self) -> bool {
        matches!(
            self,
            Error::Upstream { .. } | Error::UpstreamTimeout { .. }
        )
    }
}
