//! CLI subcommands

pub mod audit;
pub mod check_config;
pub mod output;
pub mod serve;
