pub mod config;
pub mod error;
pub mod manifest;
pub mod metadata;
pub mod pinning;
pub mod publisher;
