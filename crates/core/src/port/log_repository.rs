// Log fragment + legacy output/serial_output repository port (§4.5, §3.1)

use crate::domain::{LogFragment, LogType};
use crate::error::Result;
use async_trait::async_trait;

#[async_trait]
pub trait LogRepository: Send + Sync {
    async fn append_fragment(&self, fragment: LogFragment) -> Result<()>;

    /// Fragments for a job, optionally filtered by log type/phase/start point.
    async fn fragments(
        &self,
        job_id: &str,
        log_type: Option<LogType>,
        phase: Option<&str>,
        start_fragment: Option<i64>,
        start_timestamp: Option<i64>,
    ) -> Result<Vec<LogFragment>>;

    /// Deprecated endpoints (§6, §9 open question: keep for back-compat).
    /// Append raw text to the legacy per-job ring; consumed (cleared) on read.
    async fn append_legacy(&self, job_id: &str, log_type: LogType, text: &str, now_millis: i64) -> Result<()>;
    async fn take_legacy(&self, job_id: &str, log_type: LogType) -> Result<String>;

    /// Delete legacy rows whose last write exceeds the 4h retention window (§3, §4.11).
    async fn gc_legacy(&self, older_than_millis: i64) -> Result<u64>;
}
