// Result merge + legacy output/serial_output reconstruction.
//
// Agents post phase results incrementally; `add_results` merges each partial
// document into the job's `result_data` by top-level key, and the legacy
// `{phase}_output`/`{phase}_serial` fields are synthesized from the fragment
// store unless the job already carries them inline from an older write path.

use crate::domain::{log_fragment, LogFragment, LogType};
use crate::error::Result;
use crate::port::{JobRepository, LogRepository};
use serde_json::{Map, Value};
use std::sync::Arc;

pub struct ResultsService {
    jobs: Arc<dyn JobRepository>,
    logs: Arc<dyn LogRepository>,
}

impl ResultsService {
    pub fn new(jobs: Arc<dyn JobRepository>, logs: Arc<dyn LogRepository>) -> Self {
        Self { jobs, logs }
    }

    pub async fn add_results(&self, id: &str, partial: &Value) -> Result<()> {
        self.jobs.add_results(&id.to_string(), partial).await
    }

    /// `GET /v1/result/{id}`: the stored document, augmented with
    /// `{phase}_output`/`{phase}_serial` fields rebuilt from fragments when
    /// the job itself doesn't already carry them.
    pub async fn get_result(&self, id: &str) -> Result<Option<Value>> {
        let Some(stored) = self.jobs.get_result(&id.to_string()).await? else {
            return Ok(None);
        };
        let mut obj = match stored {
            Value::Object(m) => m,
            other => {
                let mut m = Map::new();
                m.insert("result_data".into(), other);
                m
            }
        };
        self.fill_legacy_fields(id, &mut obj, LogType::Output, "_output").await?;
        self.fill_legacy_fields(id, &mut obj, LogType::Serial, "_serial").await?;
        Ok(Some(Value::Object(obj)))
    }

    async fn fill_legacy_fields(&self, id: &str, obj: &mut Map<String, Value>, log_type: LogType, suffix: &str) -> Result<()> {
        let fragments = self.logs.fragments(id, Some(log_type), None, None, None).await?;
        let assembled = log_fragment::assemble(fragments);
        for (phase, log) in assembled {
            let key = format!("{phase}{suffix}");
            if !obj.contains_key(&key) {
                obj.insert(key, Value::String(log.log_data));
            }
        }
        Ok(())
    }

    /// Fragment-store reconstruction used by `GET /v1/job/{id}/output` and
    /// `.../serial_output` (the deprecated legacy endpoints): the whole
    /// concatenated ring for the job across phases, in fragment order.
    pub async fn legacy_text(&self, id: &str, log_type: LogType) -> Result<String> {
        self.logs.take_legacy(id, log_type).await
    }

    pub async fn append_legacy(&self, id: &str, log_type: LogType, text: &str, now_millis: i64) -> Result<()> {
        self.logs.append_legacy(id, log_type, text, now_millis).await
    }

    pub async fn append_fragment(&self, fragment: LogFragment) -> Result<()> {
        self.logs.append_fragment(fragment).await
    }
}
