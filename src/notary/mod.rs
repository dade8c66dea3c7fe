pub mod service;

pub use service::{NotaryService, UniquenessProvider};
