//! Cadence DB - Storage port
//!
//! Repository traits for every entity the billing engine persists, with a
//! SQLx/PostgreSQL implementation and an in-memory implementation for tests
//! and local development.
//!
//! # Example
//!
//! ```rust,ignore
//! use cadence_db::{create_pool, Stores, MIGRATOR};
//!
//! let pool = create_pool("postgres://localhost/cadence").await?;
//! MIGRATOR.run(&pool).await?;
//! let stores = Stores::postgres(pool);
//!
//! let plans = stores.plans.list_active().await?;
//! ```

pub mod error;
pub mod memory;
pub mod models;
pub mod pg;
pub mod pool;
pub mod repo;
pub mod stores;

pub use error::{DbError, DbResult};
pub use models::*;
pub use pool::{create_pool, DbPool, MIGRATOR};
pub use repo::*;
pub use stores::Stores;
