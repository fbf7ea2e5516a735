//! Language model clients for cliz.
//!
//! All clients implement the `cliz_core::ModelClient` trait.

pub mod openai_compat;
pub mod prompt;
mod stream;

pub use openai_compat::OpenAiCompatClient;
pub use prompt::{SystemContext, system_prompt};
