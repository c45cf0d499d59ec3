pub mod service;

pub use service::EmbeddingService;
