//! Database layer
//!
//! Persistence for users, courses, sessions and learning progress.
//! It supports:
//! - SQLite (default, single file next to the binary)
//! - MySQL (for shared deployments)
//!
//! The database driver is selected based on configuration.
//!
//! # Usage
//!
//! ```ignore
//! use ai_tutor::config::DatabaseConfig;
//! use ai_tutor::db::{create_pool, migrations};
//!
//! let config = DatabaseConfig::default();
//! let pool = create_pool(&config).await?;
//! migrations::run_migrations(&pool).await?;
//! pool.ping().await?;
//! ```

pub mod migrations;
pub mod pool;
pub mod repositories;

pub use pool::{
    create_pool, create_test_pool, Backend, DatabasePool, DynDatabasePool, MysqlDatabase,
    SqliteDatabase,
};
