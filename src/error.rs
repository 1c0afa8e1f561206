//! Crate-level error types for log sources, schema resolution, configuration,
//! and sync runs.

/// Error returned by a [`LogSource`](crate::LogSource) implementation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SourceError {
    /// The node rejected or failed a request.
    ///
    /// `operation` names the call (e.g. `"eth_getLogs"`) and `reason`
    /// carries the transport or node error message.
    #[error("{operation} failed: {reason}")]
    Rpc {
        /// The request that failed.
        operation: &'static str,
        /// Transport or node error message.
        reason: String,
    },

    /// The source was shut down and can no longer serve requests.
    #[error("log source is closed")]
    Closed,
}

impl SourceError {
    /// Build an [`Rpc`](SourceError::Rpc) error from any displayable cause.
    pub fn rpc(operation: &'static str, reason: impl std::fmt::Display) -> Self {
        Self::Rpc {
            operation,
            reason: reason.to_string(),
        }
    }
}

/// Error returned when an event spec cannot be resolved against a schema.
///
/// These are configuration mistakes: they surface before any log query
/// is issued.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SchemaError {
    /// No event with this name is registered in the schema.
    #[error("unknown event: {0}")]
    UnknownEvent(String),

    /// The event has no input with this name.
    #[error("event {event} has no input named {input}")]
    UnknownInput {
        /// Event name.
        event: String,
        /// Requested input name.
        input: String,
    },

    /// Only indexed inputs can be used in a log filter.
    #[error("input {input} of event {event} is not indexed")]
    NotIndexed {
        /// Event name.
        event: String,
        /// Input that was used as a filter.
        input: String,
    },

    /// The filter value does not fit a single 32-byte topic word.
    #[error("filter value for {event}.{input} cannot be encoded as a topic")]
    UnencodableFilter {
        /// Event name.
        event: String,
        /// Input that was used as a filter.
        input: String,
    },

    /// A human-readable event signature could not be parsed.
    #[error("invalid event signature {signature:?}: {reason}")]
    Parse {
        /// The offending signature.
        signature: String,
        /// Parser error message.
        reason: String,
    },
}

/// Error returned when reading configuration from the environment.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is not set.
    #[error("{0} not set")]
    Missing(&'static str),

    /// An environment variable holds an unusable value.
    #[error("invalid {var}: {reason}")]
    Invalid {
        /// The variable name.
        var: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

/// Error returned by an events effect run.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Querying or subscribing to the log source failed.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// An event spec did not match the schema.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// Reading or writing a durable checkpoint failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The background sync task panicked or was aborted.
    #[error("sync task failed: {0}")]
    TaskFailed(String),
}
