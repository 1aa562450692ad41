//! dospaces - thin async client for DigitalOcean Spaces (S3-compatible object storage)

pub mod config;
pub mod spaces;

pub use config::SpacesConfig;
pub use spaces::{FileUpload, ListBucketPage, SpaceObject, SpacesClient, SpacesError};
