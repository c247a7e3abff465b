pub mod assistant;
#[cfg(feature = "gemini")]
pub mod client;
pub mod extractor;
pub mod narrator;
pub mod prompts;
pub mod service;
#[cfg(feature = "gemini")]
pub mod types;

pub use assistant::*;
#[cfg(feature = "gemini")]
pub use client::*;
pub use extractor::*;
pub use narrator::*;
pub use service::*;
