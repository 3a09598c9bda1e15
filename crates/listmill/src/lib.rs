//! Application wiring for the Listmill service: the public HTTP surface
//! lives here so integration tests can mount it directly.

pub mod http;
