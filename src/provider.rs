//! The outbound seam: the three native calls the proxy makes.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::error::Result;
use crate::translate::bedrock_types::{ConverseRequest, ConverseResponse, ConverseStreamEvent};

/// Native stream events in arrival order. An `Err` item ends the stream.
pub type ConverseEventStream = Pin<Box<dyn Stream<Item = Result<ConverseStreamEvent>> + Send>>;

/// Client for the Bedrock runtime. Failures are reported as
/// [`ProxyError::Provider`](crate::error::ProxyError::Provider).
#[async_trait]
pub trait ConverseClient: Send + Sync {
    async fn converse(&self, req: ConverseRequest) -> Result<ConverseResponse>;

    /// Open a `ConverseStream` call. Errors before the first event are
    /// returned here; later failures arrive as stream items.
    async fn converse_stream(&self, req: ConverseRequest) -> Result<ConverseEventStream>;

    /// `InvokeModel` with a JSON body, returning the raw response body.
    async fn invoke_model(&self, model_id: &str, body: Vec<u8>) -> Result<Vec<u8>>;
}
