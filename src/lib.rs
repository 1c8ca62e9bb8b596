pub mod api;
pub mod config;
pub mod downloader;
pub mod errors;
pub mod platform;
pub mod security;
pub mod utils;
