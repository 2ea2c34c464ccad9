//! Conversation core — session state, controller, dispatch, formatting.

pub mod controller;
pub mod dispatcher;
pub mod format;
pub mod session;

pub use controller::{CallbackAction, ContactInfo, Controller, Reply, ReplyMarkup};
pub use dispatcher::{BotTransport, Dispatcher, Event, EventKind, EventMeta};
pub use session::{SessionMap, SessionState};
