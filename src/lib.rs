pub mod commands;
pub mod config;
pub mod errors;
pub mod google_photos;
pub mod security;
pub mod session;
pub mod telegram;
pub mod uploader;

#[cfg(test)]
pub(crate) mod test_support;
