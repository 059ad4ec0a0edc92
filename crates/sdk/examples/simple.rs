//! Submits a job, polls for its result, and prints the outcome.
//!
//! Start a server first (`cargo run --package testflinger-server`), then:
//! `cargo run --package testflinger-sdk --example simple`

use serde_json::json;
use testflinger_sdk::{JobSpec, TestflingerClient};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let client = TestflingerClient::connect("http://127.0.0.1:8000")?;

    let spec: JobSpec = serde_json::from_value(json!({
        "job_queue": "demo",
        "test_data": {"test_cmds": "echo hi"},
    }))?;

    let job_id = client.submit_job(&spec).await?;
    println!("submitted job {job_id}");

    loop {
        if let Some(result) = client.get_result(&job_id).await? {
            println!("result: {}", serde_json::to_string_pretty(&result)?);
            break;
        }
        if let Some(status) = client.get_job(&job_id).await? {
            println!("job_state={}", status.job_state);
        }
        tokio::time::sleep(std::time::Duration::from_secs(2)).await;
    }

    Ok(())
}
