mod common;
pub use common::*;

pub mod session;
