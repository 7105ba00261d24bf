//! Edge Gateway Library
//! Re-exports modules for testing and integration

pub mod clients;
pub mod config;
pub mod error;
pub mod handlers;
pub mod jwks;
pub mod middleware;
pub mod webhook;
