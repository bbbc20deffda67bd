mod execution;
mod phase;
mod tool;

pub use execution::*;
pub use phase::*;
pub use tool::*;
