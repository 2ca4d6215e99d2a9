mod client;
mod error;
mod openai_compatible;

pub use client::{CompletionClient, RetryPolicy};
pub use error::{CompletionError, ProviderError, ProviderErrorKind};
pub use openai_compatible::OpenAiCompatibleProvider;
