//! Persistence layer: keyed stores for clarification requests and shipment records.

pub mod libsql_backend;
pub mod memory;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlStore;
pub use memory::InMemoryStore;
pub use traits::IntakeStore;
