//! The Tauti turn engine.
//!
//! A turn is either **plain** (one streamed generation) or **tool-augmented**
//! (a bounded ReAct loop):
//!
//! 1. **Resolve** the model to a backend endpoint
//! 2. **Ensure** a self-hosted backend is running and has the model
//! 3. **Stream** the response through a [`StreamSession`]
//! 4. **With tools**: parse `Thought:` / `Action:`, run the tool, feed the
//!    observation back, repeat until an answer or the attempt limit
//!
//! Callers read [`TurnEvent`]s from a [`TurnHandle`] and can cancel at any
//! point; after cancellation no further event is delivered.

pub mod react;
pub mod session;
pub mod stream_event;
pub mod turn;

#[cfg(test)]
mod test_helpers;

pub use react::{LoopOutcome, ReActCycle, ReactLoop, TaskExecution};
pub use session::{CancelHandle, Next, SessionError, SessionRegistry, SessionState, StreamSession};
pub use stream_event::{NoticeLevel, TurnEvent, TurnOutcome};
pub use turn::{TurnHandle, TurnOptions, TurnRunner};
