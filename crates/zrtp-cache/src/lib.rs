//! The ZID cache: a key/value store mapping peer ZIDs to retained ZRTP
//! secrets (`rs1`, `rs2`, `aux`, `pbx`) and the verified-SAS flag.
//!
//! # Backends
//! - `memory` — an in-memory reference implementation, for tests and
//!   hosts with no persistence requirement.
//! - `sqlite` — a durable implementation over `sqlx`'s SQLite driver.
//!
//! Both implement the [`ZidCache`] trait in `facade`, which is the only
//! surface `zrtp-engine` depends on.

pub mod error;
pub mod facade;
pub mod memory;
pub mod models;
pub mod sqlite;

pub use error::CacheError;
pub use facade::{PeerSecrets, ZidCache};
pub use memory::MemoryCache;
pub use sqlite::SqliteCache;
