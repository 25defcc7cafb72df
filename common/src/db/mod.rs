// Database layer module: SQLite pool, schema bootstrap and repositories

pub mod pool;
pub mod repositories;
pub mod schema;

pub use pool::DbPool;
