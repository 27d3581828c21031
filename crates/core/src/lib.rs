pub mod config;
pub mod error;
pub mod records;
pub mod store;

pub use config::Config;
pub use error::*;
pub use records::*;
pub use store::{MemoryRecordStore, RecordFile, RecordStore};
