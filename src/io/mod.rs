//! Network side of the tracking server
//!
//! Sessions, delivery with bounded retries, and the accept and dispatch
//! loops.

pub mod delivery;
pub mod retry;
pub mod server;
pub mod session_manager;
pub mod tls;

pub use delivery::{DeliveryState, PendingMessage};
pub use retry::RetryPolicy;
pub use server::{TickReport, TickScheduler, TrackingServer};
pub use session_manager::{ClientId, ClientInfo, ClientSession, DisconnectReason, SessionManager, SessionSettings};
