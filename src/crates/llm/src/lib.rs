//! Model backend client for skyforge.
//!
//! Everything the system asks of the external language model goes through
//! the [`ModelBackend`] trait: one unary call or one streaming call,
//! prompt and generation config in, text out. The crate also carries the
//! retry policy for transient backend failures and the JSON coercion that
//! turns loosely-shaped model output into canonical graph payloads.
//!
//! # Example
//!
//! ```rust,ignore
//! use llm::{GeminiClient, GenerateRequest, ModelConfig, RetryPolicy};
//!
//! let client = GeminiClient::new(ModelConfig::from_env("gemini-2.5-pro")?)?;
//! let text = llm::retry::generate_with_retry(
//!     &client,
//!     &GenerateRequest::json("Produce an intent graph for: a web server"),
//!     &RetryPolicy::default(),
//! )
//! .await?;
//! let payload = llm::extract::coerce_graph_payload(&text)?;
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod extract;
pub mod retry;

pub use client::{ChunkReceiver, GenerateRequest, GeminiClient, ImagePart, ModelBackend, OutputMode};
pub use config::{ModelConfig, API_KEY_ENV, DEFAULT_BASE_URL, DEFAULT_MODEL};
pub use error::{LlmError, Result};
pub use extract::{coerce_graph_payload, extract_json_object, remap_graph_aliases};
pub use retry::{collect_streamed, generate_with_retry, with_retry, RetryPolicy};
