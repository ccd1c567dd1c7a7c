pub mod circle;
pub mod command;
pub mod config;
pub mod engine;
pub mod journal;
pub mod limits;
pub mod model;
pub mod observability;
pub mod recurrence;
pub mod scanner;
pub mod time;
pub mod wal;
pub mod wire;
