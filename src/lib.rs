pub mod args;
pub mod channel;
pub mod config;
pub mod error;
pub mod fs_util;
pub mod init;
pub mod kubectl;
pub mod material;
pub mod openbao;
pub mod orchestrator;
pub mod probe;
pub mod raft;
pub mod replica;
pub mod report;
pub mod retry;
pub mod status;
pub mod store;
pub mod unseal;

pub use args::Cli;
pub use error::BootstrapError;
pub use orchestrator::{Orchestrator, Phase};
