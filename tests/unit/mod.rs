//! Integration tests for the faultmend engine
//!
//! Network-facing pieces run against wiremock servers; time-dependent
//! behaviour uses a manual clock.

mod helpers;
mod test_error_paths;
mod test_executor;
mod test_graph;
mod test_patterns;
mod test_validator;
