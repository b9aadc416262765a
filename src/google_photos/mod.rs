// Google Photos Library API: stored OAuth credentials and the two-step media upload

pub mod auth;
pub mod client;

pub use auth::{AccessToken, CredentialProvider, StoredCredentialProvider};
pub use client::{MediaItemResult, MediaTransport, PhotosClient, UploadToken};
