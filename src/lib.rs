//! # chatrelay - Streaming mentor chat relay
//!
//! Relays a streamed LLM completion to a browser as a sequence of small JSON
//! frames, and provides the client side that turns those frames back into a
//! live, incrementally rendered message.
//!
//! ## Features
//! - Async-first, tokio compatible
//! - Provider behind a trait ([`client::ModelStream`]), Groq implementation included
//! - Idle timeouts, retries before the first byte, cancellation on disconnect
//! - Learning-mode prompts and response enrichment
//! - Explicit per-turn client state machine
//!
//! ## Architecture
//!
//! - **Upstream**: [`providers::GroqClient`] opens one streaming completion and
//!   yields [`model::StreamChunk`]s.
//! - **Relay**: [`relay::Relay`] validates the request, plans the turn
//!   ([`mentor`]), forwards fragments as [`frame::StreamEvent`] frames and
//!   records the finished turn in a [`session::SessionStore`].
//! - **HTTP**: [`server::router`] exposes the relay over axum.
//! - **Consumer**: [`consumer::StreamClient`] sends a turn and feeds decoded
//!   events into a [`consumer::Conversation`].
//!
//! ## Example
//! ```no_run
//! use chatrelay::consumer::{Action, Conversation, StreamClient};
//! use chatrelay::relay::{StreamRequest, StreamVariant};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = StreamClient::new("http://localhost:8001", Duration::from_secs(120))?;
//!     let mut conversation = Conversation::new();
//!
//!     let request = StreamRequest::new("session-id", "Explain recursion");
//!     let mut handle = client.start(&request, StreamVariant::Standard);
//!     conversation.dispatch(Action::Submit {
//!         id: handle.id(),
//!         text: request.user_message.clone(),
//!     });
//!     handle.drive(&mut conversation).await;
//!
//!     println!("{:?}", conversation.history().last());
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod consumer;
pub mod frame;
pub mod http;
pub mod mentor;
pub mod model;
pub mod options;
pub mod providers;
pub mod relay;
pub mod server;
pub mod session;
pub mod sse;

// Re-exports for convenience
pub use client::{ClientError, ModelStream};
pub use frame::StreamEvent;
pub use model::{Message, Prompt, StreamChunk};
pub use relay::{Relay, RelayConfig, StreamRequest, StreamVariant};
