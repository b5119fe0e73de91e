//! External process execution for the DNS compatibility harness.
//!
//! This crate owns every interaction with OS processes: the cluster runtime
//! CLI, `kubectl`, `docker`, and the mesh CLI under test all run through it.
//!
//! # Features
//!
//! - [`CommandSpec`]: validated, shell-free command description
//! - [`ProcessRunner`]: run-to-completion and detached modes with combined output capture
//! - [`ProcessHandle`]: owned child with exactly-once `wait`/`stop` and kill-on-drop
//! - [`CommandRunner`]: the trait seam used by higher layers and test doubles
//!
//! # Example
//!
//! ```rust,no_run
//! use claw_exec::{CommandRunner, CommandSpec, ProcessRunner};
//!
//! # async fn example() -> claw_exec::Result<()> {
//! let runner = ProcessRunner::new();
//! let outcome = runner
//!     .run(&CommandSpec::new("kubectl").args(["version", "--client"]))
//!     .await?;
//! println!("{}", outcome.output);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod command;
pub mod error;
pub mod outcome;
pub mod runner;

pub use command::CommandSpec;
pub use error::{ExecError, Result};
pub use outcome::{ExitError, Outcome};
pub use runner::{CommandRunner, ProcessHandle, ProcessRunner, Stopped};
