//! CLI Commands

pub mod config;
pub mod results;
pub mod run;
pub mod validate;
