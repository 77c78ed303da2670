mod conv;
mod quantization;

pub use conv::*;
pub use quantization::*;
