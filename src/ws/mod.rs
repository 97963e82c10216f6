pub mod admission;
pub mod document;
pub mod flush;
pub mod handler;
pub mod hub;
pub mod relay;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use handler::websocket_handler;
pub use hub::{Hub, HubServices, HubSettings};
