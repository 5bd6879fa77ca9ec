pub mod build;
pub mod engine;
pub mod flags;
pub mod gate;
pub mod notify;
pub mod release;
pub mod retry;
pub mod scoring;

pub use engine::{Collaborators, Engine};
