mod arithmetic;
mod base;
mod conv;

pub(crate) use base::*;
