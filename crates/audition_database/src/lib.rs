//! Run/result stores for Audition.
//!
//! Two implementations of [`RunStore`](audition_interface::RunStore):
//!
//! - [`InMemoryRunStore`]: always available; used by tests and dry runs.
//! - `PostgresRunStore`: Diesel over PostgreSQL with embedded migrations,
//!   behind the `postgres` feature.
//!
//! Both enforce the same rules: prompt upserts are idempotent by content
//! hash, conditions are immutable once referenced, attempt transitions
//! follow the lifecycle in [`AttemptStatus`](audition_core::AttemptStatus),
//! and every multi-row update is all-or-nothing.
//!
//! # Example
//!
//! ```rust,ignore
//! use audition_database::PostgresRunStore;
//! use audition_interface::RunStore;
//! use audition_core::AttemptStatus;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = PostgresRunStore::connect()?;
//! let pending = store.list_attempts_by_status(AttemptStatus::BatchPending).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod memory;

pub use memory::InMemoryRunStore;

#[cfg(feature = "postgres")]
mod connection;
#[cfg(feature = "postgres")]
mod models;
#[cfg(feature = "postgres")]
mod postgres;
#[cfg(feature = "postgres")]
#[allow(missing_docs)]
pub mod schema;

#[cfg(feature = "postgres")]
pub use connection::{establish_connection, run_migrations};
#[cfg(feature = "postgres")]
pub use postgres::PostgresRunStore;
