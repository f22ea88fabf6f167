//! Error taxonomy for the ingestion-to-report pipeline.
//!
//! Mirrors the table in the design doc's error-handling section: each
//! variant maps to one row (configuration / transient I/O / malformed
//! record / status-write conflict / resolver / fatal) so a host embedding
//! this crate can match on kind rather than parse a message string.

use thiserror::Error;

/// Machine-readable Ready-condition reasons surfaced on the source object.
pub const REASON_PIPELINE_STARTING: &str = "PipelineStarting";
pub const REASON_PIPELINE_RUNNING: &str = "PipelineRunning";
pub const REASON_CONFIGURATION_INVALID: &str = "ConfigurationInvalid";
pub const REASON_POLICY_GENERATED: &str = "PolicyGenerated";

/// Errors raised while building or validating a source configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("filter rule {index} has an invalid user pattern: {source}")]
    InvalidUserPattern { index: usize, source: regex::Error },

    #[error("filter rule {index} has an invalid namespace pattern: {source}")]
    InvalidNamespacePattern { index: usize, source: regex::Error },

    #[error("filter rule {index} has neither a user nor a namespace pattern")]
    EmptyFilterRule { index: usize },

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("unknown source type: {0}")]
    UnknownSourceType(String),

    #[error("invalid location: {0}")]
    InvalidLocation(String),
}

/// Errors raised by an ingestor while producing audit events.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("transient I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed record skipped: {0}")]
    MalformedRecord(String),

    #[error("tls configuration error: {0}")]
    Tls(String),

    #[error("source ended")]
    Ended,

    #[error("cluster identity mismatch: expected {expected}, got {actual}")]
    ClusterIdentityMismatch { expected: String, actual: String },
}

/// Errors raised while resolving effective permissions for a subject.
#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    #[error("binding {binding} references missing role {role}")]
    MissingRole { binding: String, role: String },
}

/// Errors raised performing a host status read-modify-write cycle.
#[derive(Debug, Error)]
pub enum StatusWriteError {
    #[error("status write conflict after {attempts} attempts")]
    Conflict { attempts: u32 },

    #[error("kubernetes API error: {0}")]
    Api(#[from] kube::Error),
}

/// Top-level pipeline error. Configuration errors are terminal for a single
/// source (surfaced as a non-ready condition, no retry loop); fatal errors
/// end the pipeline task entirely, relying on a later reconcile to restart it.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("ingest error: {0}")]
    Ingest(#[from] IngestError),

    #[error("resolver error: {0}")]
    Resolver(#[from] ResolverError),

    #[error("status write error: {0}")]
    StatusWrite(#[from] StatusWriteError),

    #[error("fatal error: {0}")]
    Fatal(String),
}
