pub mod audit;
pub mod chunks;
pub mod config;
pub mod db;
pub mod shard;
pub mod solar;
pub mod viz;

/// Application name for XDG paths
pub const APP_NAME: &str = "dawnchorus";
