pub mod action;
pub mod config;
pub mod program;
pub mod serdable;
pub mod str_interp;
pub mod style;
pub mod testing;

pub use crate::config::Config;
