pub mod combination;
pub mod dimension;
pub mod result;

// Re-exports for convenience
pub use combination::*;
pub use dimension::*;
pub use result::*;
