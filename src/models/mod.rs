//! Core data models for the file gateway.
//!
//! Nothing here is persisted locally; these types only describe where an
//! object lives in the bucket and what comes back when it is read.

pub mod object;
