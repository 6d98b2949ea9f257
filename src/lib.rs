#![allow(clippy::uninlined_format_args)]

pub mod app;
pub mod auth;
pub mod canonical;
pub mod config;
pub mod data;
pub mod debounce;
pub mod error;
pub mod media;
pub mod pagination;
pub mod proxy;
pub mod reddit;
pub mod storage;
pub mod ui;
pub mod viewport;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::run;
