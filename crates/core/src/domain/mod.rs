pub mod generation;
pub mod recommendation;
pub mod snapshot;
pub mod validation;

pub use generation::GenerationId;
