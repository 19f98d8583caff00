//! Storage adapters for the ports in `crate::ports`.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;
