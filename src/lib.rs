//! RBAC usage-mining and least-privilege policy synthesis: ingest audit
//! events from one or more sources, aggregate per-subject usage, and
//! synthesize Role/RoleBinding manifests plus a compliance report against
//! currently effective permissions.

pub mod aggregate;
pub mod diff;
pub mod error;
pub mod filter;
pub mod host;
pub mod ingest;
pub mod metrics;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod resolver;
pub mod supervisor;
pub mod synth;
