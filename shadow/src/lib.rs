pub mod cli;
pub mod exec;
pub mod render;

pub use cli::{Cli, Commands, PruneTarget};
pub use exec::{run_recorded, ExecError, ExecOutcome, ExecResult};
