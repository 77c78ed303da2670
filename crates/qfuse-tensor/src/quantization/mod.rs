mod packed;
mod parameters;
mod scheme;
mod strategy;

pub use packed::*;
pub use parameters::*;
pub use scheme::*;
pub use strategy::*;
