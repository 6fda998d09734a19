//! Embedding translation: `OpenAI` embedding requests to the Cohere body sent
//! through `InvokeModel`, and the Cohere answer back.

use super::bedrock_types::{CohereEmbedRequest, CohereEmbedResponse};
use super::openai_types::{
    ChatUsage, Embedding, EmbeddingInput, EmbeddingRequest, EmbeddingResponse, EMBEDDING_OBJECT,
    LIST_OBJECT,
};
use crate::error::{ProxyError, Result};

/// Cohere `input_type` used for every request.
pub const EMBED_INPUT_TYPE: &str = "search_document";
/// Cohere `truncate` mode used for every request.
pub const EMBED_TRUNCATE: &str = "END";

pub fn openai_to_cohere(req: &EmbeddingRequest) -> Result<CohereEmbedRequest> {
    let texts = match &req.input {
        EmbeddingInput::Text(text) => vec![text.clone()],
        EmbeddingInput::Texts(texts) => texts.clone(),
        EmbeddingInput::Other(_) => {
            return Err(ProxyError::unsupported(
                "embedding input must be a string or an array of strings",
            ))
        }
    };

    Ok(CohereEmbedRequest {
        texts,
        input_type: EMBED_INPUT_TYPE.to_string(),
        truncate: EMBED_TRUNCATE.to_string(),
    })
}

/// Parse the raw `InvokeModel` body. Only the first vector is returned and
/// token usage is not reported by the model, so it is always zero.
pub fn cohere_to_openai(body: &[u8], model: &str) -> Result<EmbeddingResponse> {
    let native: CohereEmbedResponse = serde_json::from_slice(body)
        .map_err(|e| ProxyError::provider(format!("invalid embedding response: {e}")))?;

    let embedding = native
        .embeddings
        .into_iter()
        .next()
        .ok_or_else(|| ProxyError::provider("embedding response contained no embeddings"))?;

    Ok(EmbeddingResponse {
        object: LIST_OBJECT.to_string(),
        data: vec![Embedding {
            object: EMBEDDING_OBJECT.to_string(),
            index: 0,
            embedding,
        }],
        model: model.to_string(),
        usage: ChatUsage::new(0, 0),
    })
}
