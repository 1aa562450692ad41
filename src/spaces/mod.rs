//! Spaces client module
//!
//! This module provides:
//! - AWS Signature V4 signing for Spaces requests
//! - Async object operations (upload, download, delete, exists, list)
//! - Typed `ListBucketResult` structures

pub mod client;
pub mod signer;
pub mod types;

// Re-export main types for convenience
pub use client::{Result, SpacesClient, SpacesError};
pub use signer::RequestSigner;
pub use types::{FileUpload, ListBucketPage, SpaceObject};
