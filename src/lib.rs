pub mod api;
pub mod bridge;
pub mod bus;
pub mod cli;
pub mod config;
pub mod coordination;
pub mod domain;
pub mod error;
pub mod feed;
pub mod gateway;
pub mod services;

pub use bridge::Bridge;
pub use bus::{EventPublisher, InProcessBus, Topic, Topics};
pub use config::AppConfig;
pub use coordination::{GracefulShutdown, ShutdownSignal};
pub use domain::{Action, CommandEnvelope, ResponseEnvelope, Tick, TickMode};
pub use error::{BridgeError, Result};
pub use feed::{decode, KiteTicker};
pub use gateway::{BrokerGateway, KiteClient};
pub use services::{CommandRouter, HealthState, OrderMonitor};
