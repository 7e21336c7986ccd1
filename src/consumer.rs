//! Client side of the chat stream.
//!
//! [`FrameDecoder`] turns raw response bytes into [`StreamEvent`]s,
//! [`Turn`] and [`Conversation`] hold the per-turn state machine, and
//! [`StreamClient`] drives one HTTP request per turn.
//!
//! [`StreamEvent`]: crate::frame::StreamEvent

pub mod client;
pub mod decoder;
pub mod state;

pub use client::{StreamClient, StreamHandle};
pub use decoder::FrameDecoder;
pub use state::{
    Action, Conversation, Effect, FinalMessage, HistoryEntry, PartialMessage, RequestId, Turn,
    TurnError, TurnEvent, TurnOutcome, TurnState,
};
