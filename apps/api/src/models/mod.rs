pub mod embedding;
pub mod profile;
