//! Generation backend — OpenAI-compatible completion client.
//!
//! DESIGN
//! ======
//! One provider shape: any OpenAI-compatible `/chat/completions` endpoint,
//! configured from environment variables. Content generation consumes the
//! [`Generate`] trait, never the concrete client, so tests swap in mocks.

pub mod client;
pub mod config;
pub mod types;

pub use client::GenClient;
pub use config::GenConfig;
pub use types::{GenError, Generate};
