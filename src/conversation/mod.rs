//! Step-based chat conversations
//!
//! - [`state`] - flows, steps and the captured fields of one chat
//! - [`input`] - inbound relay events and decoded button selections
//! - [`router`] - pure (step, input) -> action table
//! - [`dialog`] - performs actions and replies through the chat transport
//! - [`store`] - per-chat state persistence
//! - [`prompts`] - message texts and keyboards

pub mod dialog;
pub mod input;
pub mod prompts;
pub mod router;
pub mod state;
pub mod store;

pub use dialog::ConversationService;
pub use input::{InboundEvent, InboundPayload, Input, Selection};
pub use router::{Action, Capture, route};
pub use state::{ConversationFields, ConversationState, Field, Flow, Step};
pub use store::{ConversationStore, MemoryConversationStore, PgConversationStore};
