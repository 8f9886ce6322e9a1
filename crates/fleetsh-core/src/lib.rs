//! fleetsh-core: command execution and multi-host coordination
//!
//! Renders safely quoted command lines, runs them on connections that keep a
//! working directory and environment, and fans commands out across host
//! groups with per-member results.

pub mod aggregate;
pub mod command_line;
pub mod config;
pub mod connection;
pub mod error;
pub mod group;
pub mod local;
pub mod registry;
pub mod transfer;

pub use aggregate::{CommandOutcome, Producer, ResultAggregate};
pub use command_line::{Arg, CommandLineBuilder};
pub use config::{ConnectionOptions, FleetConfig, GroupConfig};
pub use connection::Connection;
pub use error::{CommandError, CoreError};
pub use group::{HostGroup, Member};
pub use local::LocalExecutor;
pub use registry::{CommandHandler, CommandRegistry, ProgramCommand};
pub use transfer::{TransferSink, TransferSource};
