//! team_chat: the session and connection core of a multi-agent chat client.
//!
//! ```text
//!              ChatCore (facade)
//!             /       |         \
//!  SessionRepository  |   TransportManager<L: Link>
//!         |   MessageReconciler        |
//!      Storage                     WsLink / fake
//! ```
//!
//! Sessions and their messages persist through [`Storage`]; the connection is
//! a state machine over a [`Link`]; inbound frames are merged into the session
//! that sent the request, not whichever one happens to be current.

pub mod error;
mod facade;
pub mod models;
pub mod protocol;
pub mod reconciler;
pub mod sessions;
pub mod store;
pub mod theme;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use crate::facade::{ChatCore, CoreOptions, CoreUpdate, SubmitOutcome};
pub use error::{StoreError, TransportError};
pub use models::{ConnectionStatus, Message, Session, SessionPatch, SessionSummary, SessionView};
pub use reconciler::MessageReconciler;
pub use sessions::SessionRepository;
pub use store::{FileStore, KeyValueStore, MemoryStore, Storage};
pub use theme::{Theme, ThemeMode, ThemeSettings};
pub use transport::{
    ConnectionState, Endpoint, Link, LinkEvent, LinkEventKind, LinkFrame, ReconnectPolicy,
    TransportManager, WsLink,
};
