pub mod strategy;
pub mod loader;

pub use strategy::*;
pub use loader::*;
