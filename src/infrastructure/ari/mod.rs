//! Asterisk REST Interface adapter

pub mod client;
pub mod connection;
pub mod events;
pub mod model;

pub use client::{AriBridgeHandle, AriChannelHandle, AriClient};
pub use connection::{connect, AriConnection};
pub use events::EventRouter;
pub use model::{AriBridge, AriChannel, AriEvent};
