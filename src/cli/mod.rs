//! CLI module for Claude Code process spawning and stream parsing.

mod events;
mod framer;
mod parser;
mod process;
mod records;
mod stream;

pub use events::*;
pub use framer::*;
pub use parser::*;
pub use process::*;
pub use records::*;
pub use stream::*;
