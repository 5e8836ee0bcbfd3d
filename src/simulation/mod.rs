//! 离线模拟模块

pub mod tables;
pub mod time_skip;

pub use time_skip::{TimeSkipReport, TimeSkipSimulator};
