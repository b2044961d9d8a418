pub mod config;
pub mod error;
pub mod model_download;
pub mod models;
pub mod pipeline;
pub mod server;
pub mod types;
