pub mod booking;
pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod observability;
pub mod patch;
pub mod report;
pub mod sweeper;
pub mod time;
pub mod wal;
