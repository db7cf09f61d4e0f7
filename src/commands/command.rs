//! Command trait implemented by all markdups CLI commands.

use anyhow::Result;
use enum_dispatch::enum_dispatch;

/// A runnable CLI command.
#[enum_dispatch]
pub trait Command {
    #[allow(clippy::missing_errors_doc)]
    fn execute(&self) -> Result<()>;
}
