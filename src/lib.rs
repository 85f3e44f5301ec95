pub mod commands;
pub mod context;
pub mod logging;
pub mod repl;

pub use context::ConsoleContext;
pub use repl::readline;
