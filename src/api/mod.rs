pub mod auth;
pub mod routes;
pub mod state;
pub mod websocket;

pub use auth::BusAuth;
pub use routes::{create_router, serve};
pub use state::AppState;
