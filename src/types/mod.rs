//! Type definitions

pub mod import;
pub mod order;
pub mod trip;
pub mod vehicle;

pub use import::*;
pub use order::*;
pub use trip::*;
pub use vehicle::*;
