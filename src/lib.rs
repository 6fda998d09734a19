pub mod bedrock;
pub mod config;
pub mod error;
pub mod image;
pub mod provider;
pub mod proxy;
pub mod server;
pub mod translate;

pub use bedrock::BedrockClient;
pub use config::ProxyConfig;
pub use error::{ProxyError, Result};
pub use image::{HttpImageFetcher, ImageFetcher};
pub use provider::{ConverseClient, ConverseEventStream};
pub use server::{build_router, AppState};
