//! Bundled implementations of the LLM service contracts.

pub mod http;

pub use http::HttpCompletionClient;
