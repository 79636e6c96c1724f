//! Upload Relay Library
//!
//! Accepts files from clients, either in one request or as a sequence of
//! chunks, reassembles them per upload session and forwards the result to an
//! object-storage backend.
//!
//! # Modules
//!
//! - `upload`: Session store, chunk receiver, completion and reaping
//! - `storage`: Transfer sinks (S3-compatible, local directory)
//! - `routes`: HTTP endpoints
//! - `config`: Environment-driven configuration

pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod storage;
pub mod upload;
