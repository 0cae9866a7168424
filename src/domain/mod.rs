pub mod envelope;
pub mod order;
pub mod tick;

pub use envelope::*;
pub use order::*;
pub use tick::*;
