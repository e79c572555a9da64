//! Core traits for the Changebot system
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`PersistedStorage`]: Key/value persistence for view watermarks
//! - [`ChangelogTransport`]: HTTP calls against the changelog API

pub mod persisted_storage;
pub mod transport;

pub use persisted_storage::PersistedStorage;
pub use transport::ChangelogTransport;
