//! Relational store: schema and feed persistence

pub mod init;
pub mod store;

pub use init::*;
pub use store::*;
