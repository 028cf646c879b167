pub mod batch;
pub mod clock;
pub mod config;
pub mod directory;
pub mod error;
pub mod manager;
pub mod monitor;
pub mod node;
pub mod scheduler;
pub mod shutdown;

pub use error::{ResourceError, Result};
pub use manager::ResourceManager;
pub use node::ResourceNode;
