// Web Acquisition Engine - Core
//
// Job-based scraping, mapping, crawling, batch scraping and LLM extraction
// over a shared job store. Executors live in executors/, queue
// infrastructure in kernel/jobs/.

pub mod config;
pub mod error;
pub mod executors;
pub mod kernel;

pub use config::*;
pub use error::{ErrorCode, JobError, StoreError, StoreResult};
