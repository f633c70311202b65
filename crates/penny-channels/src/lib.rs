//! Channel abstractions: the transport contract, the shared outbound path,
//! and a thin Signal REST adapter. Other transports (the Discord gateway)
//! implement the same [`MessageChannel`] trait out of tree.

pub mod channel;
pub mod signal;
pub mod types;
pub mod typing;

pub use channel::{ChannelError, MessageChannel, Outbound};
pub use types::IncomingMessage;
pub use typing::TypingHandle;
