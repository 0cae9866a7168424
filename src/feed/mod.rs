//! Market data feed: binary frame decoding and the streaming connection.

pub mod decoder;
pub mod ticker;

pub use decoder::{decode, parse_packet};
pub use ticker::{KiteTicker, Subscription};
