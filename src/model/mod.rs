pub mod cache;
pub mod store;

pub use cache::{CachedModel, MODEL_EXTENSION};
pub use store::{ListModelsResponse, ModelFetcher, ModelMetadata, ModelStore, ModelType};
