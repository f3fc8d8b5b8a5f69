pub mod config;
pub mod executor;
pub mod extract;
pub mod model;
pub mod storage;
pub mod traits;

// Re-export common types for convenience
pub use config::*;
pub use executor::*;
pub use extract::*;
pub use model::*;
pub use storage::*;
pub use traits::*;
