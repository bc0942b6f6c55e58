pub mod attendance;
pub mod courses;
pub mod database;
pub mod migrations;
pub mod models;
pub mod preferences;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
