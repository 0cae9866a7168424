//! Coordination layer: ordered shutdown of the bridge components.

pub mod shutdown;

pub use shutdown::{
    install_signal_handlers, GracefulShutdown, ShutdownConfig, ShutdownPhase, ShutdownSignal,
    ShutdownStep,
};
