mod buffer;
mod expr;
mod loop_nest;

pub use buffer::*;
pub use expr::*;
pub use loop_nest::*;
