#![forbid(unsafe_code)]

pub mod demo;
pub mod repository;
pub mod sqlite;

pub use repository::{ContentRepository, InMemoryRepository, ProgressGateway, Storage, StorageError};
