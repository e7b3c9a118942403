//! `tessera-service`: composition of the authorization core.
//!
//! [`Tessera`] owns one instance of every service over a chosen set of stores; the
//! `tessera-bootstrap` binary prepares a database for it.

pub mod app;

pub use app::{Stores, Tessera};
