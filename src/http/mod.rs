//! HTTP client construction, URL rewriting, and response classification.
//!
//! Every job in [`crate::dump`] and [`crate::restore`] talks to the server
//! through a [`ManagedClient`], never through a bare `reqwest` client, so
//! the `/_db/<name>/` rewriting rule and error-envelope decoding happen in
//! exactly one place.

mod client_manager;
mod error;
mod response_check;

pub use client_manager::{ClusterRole, ConnectionOptions, ManagedClient};
pub use error::ClientError;
pub use response_check::{check_and_decode, check_response};
