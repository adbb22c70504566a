pub mod cli;
pub mod config;
pub mod error;
pub mod idmap;
pub mod logging;
pub mod markdown;
pub mod migrate;
pub mod model;
pub mod providers;
pub mod refs;
pub mod wiki;
