pub mod backup_exchange;
pub mod cells;
pub mod core;
pub mod grid;
pub mod groups;
pub mod links;
pub mod setup;
pub mod tables;
