//! API translation between `OpenAI` and Bedrock formats.
//!
//! The core of the proxy: converts requests, responses, streaming events and
//! embedding bodies between the two API formats. Everything here is pure
//! except image resolution, which goes through [`crate::image::ImageFetcher`].

pub mod bedrock_types;
pub mod embedding;
pub mod openai_types;
pub mod request;
pub mod response;
pub mod streaming;
