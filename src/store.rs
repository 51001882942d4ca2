pub mod dataset_repository;
pub mod error;
pub mod inventory;
pub mod manifest;
pub mod models;

pub use dataset_repository::{read_dataset, write_dataset, DatasetRepository};
pub use error::DatasetError;
pub use models::*;
