//! Domain services used by websocket and HTTP routes.
//!
//! ARCHITECTURE
//! ============
//! Services own the chat rules (who may talk in a room, what a message
//! needs, how an order may move) so route handlers stay focused on protocol
//! translation and credential plumbing. Each service has its own error enum
//! implementing [`crate::error::ErrorCode`].

pub mod gatekeeper;
pub mod media;
pub mod message;
pub mod order;
pub mod payment;
pub mod room;
pub mod session;
pub mod unread;
