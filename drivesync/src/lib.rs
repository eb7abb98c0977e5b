pub mod cache;
pub mod config;
pub mod logging;
pub mod sync;
pub mod tree;
