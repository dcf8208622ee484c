//! Database access for reboot-intake

pub mod shoes;

pub use reboot_common::db::init_database;
