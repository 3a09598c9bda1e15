//! Publication layer: on-disk CSV/JSON/TXT artifacts behind per-list access
//! tokens with IP-based admission.

pub mod access;
pub mod artifacts;

pub use access::{derive_client_ip, ip_allowed, AccessError, AccessGate};
pub use artifacts::{ArtifactFormat, PublishError, Publisher};
