//! Inference integration: chat client, structured-output parsing and the
//! shared retry policy.
//!
//! Components take the [`InferenceClient`] trait as an injected capability;
//! the HTTP implementation targets any OpenAI-compatible endpoint.
//!
//! ```ignore
//! use convgrade::llm::{ChatRequest, HttpInferenceClient, InferenceClient, Message};
//!
//! let client = HttpInferenceClient::from_env()?;
//! let request = ChatRequest::new("", vec![
//!     Message::system("You are a grader."),
//!     Message::user("Score this answer."),
//! ]);
//! let response = client.complete(request).await?;
//! ```

pub mod client;
pub mod json;
pub mod retry;

pub use client::{
    parse_structured, ChatRequest, ChatResponse, HttpInferenceClient, InferenceClient, Message,
    Usage,
};
pub use json::extract_json;
pub use retry::RetryPolicy;
