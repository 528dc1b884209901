pub mod cli;
pub mod config;
pub mod logging;
pub mod simulation;

pub use config::CouncilFile;
pub use simulation::{build_engine, run_round, RoundReport};
