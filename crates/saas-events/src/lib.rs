//! Domain event vocabulary shared by event producers and the webhook engine.

pub mod envelope;
pub mod events;
pub mod records;

pub use envelope::*;
pub use events::*;
pub use records::*;
