// Repository layer for database operations

pub mod execution;
pub mod state;

pub use execution::ExecutionRepository;
pub use state::StateRepository;
