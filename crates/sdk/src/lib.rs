//! Testflinger Rust SDK
//!
//! A convenience client over the dispatch server's `/v1` REST surface (§6),
//! used by `testflinger-cli` and the integration test suite.
//!
//! # Example
//!
//! ```no_run
//! use testflinger_sdk::{JobSpec, TestflingerClient};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = TestflingerClient::connect("http://127.0.0.1:8000")?;
//!
//!     let spec: JobSpec = serde_json::from_value(json!({
//!         "job_queue": "my-queue",
//!         "test_data": {"test_cmds": "echo hi"},
//!     }))?;
//!     let job_id = client.submit_job(&spec).await?;
//!     println!("submitted {job_id}");
//!
//!     Ok(())
//! }
//! ```

mod client;
mod error;
mod types;

pub use client::TestflingerClient;
pub use error::{Result, SdkError};
pub use types::{JobAction, JobAssignment, JobSpec, JobState, JobStatus, SearchQuery, SubmitJobResponse, TagMatch, TokenResponse};
