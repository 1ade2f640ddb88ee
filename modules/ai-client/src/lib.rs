//! Client for OpenAI-compatible APIs: chat completions, JSON-schema
//! structured output, and embeddings. Point it at any compatible base URL.

pub mod openai;
pub mod traits;

pub use openai::{OpenAi, StructuredOutput};
pub use traits::EmbedAgent;
