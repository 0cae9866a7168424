pub mod command_router;
pub mod health;
pub mod order_mapping;
pub mod order_monitor;

pub use command_router::CommandRouter;
pub use health::{ComponentHealth, HealthResponse, HealthState, HealthStatus};
pub use order_monitor::{MonitorStats, OrderMonitor};
