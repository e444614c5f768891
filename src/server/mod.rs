//! HTTP and WebSocket surface.

mod connection;
mod listener;
mod page;
mod routes;

pub use connection::{ConnectionHandler, RelayParams};
pub use listener::RelayServer;
pub use page::{html_escape, PageTemplate, PageVars, EMBEDDED_TEMPLATE, LOADING_TEXT};
pub use routes::{router, AppState, WS_PATH};
