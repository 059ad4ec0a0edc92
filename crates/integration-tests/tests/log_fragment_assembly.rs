//! End-to-end log fragment assembly (§4.5, §8): fragments land through the
//! real SQLite repository out of arrival order and across multiple phases,
//! then get reassembled by the pure `domain::assemble` function. Neither
//! half of this pipeline is exercised together anywhere else.

use testflinger_core::domain::{assemble, LogFragment, LogType};
use testflinger_core::port::LogRepository;
use testflinger_infra_sqlite::{create_pool, run_migrations, SqliteLogRepository};

fn frag(job: &str, log_type: LogType, phase: &str, n: i64, data: &str) -> LogFragment {
    LogFragment { job_id: job.into(), log_type, phase: phase.into(), fragment_number: n, timestamp: 1000 + n, log_data: data.into() }
}

#[tokio::test]
async fn multi_phase_fragments_assemble_correctly_despite_interleaved_arrival() {
    let pool = create_pool("sqlite::memory:").await.unwrap();
    run_migrations(&pool).await.unwrap();
    let repo = SqliteLogRepository::new(pool);

    // Two agents writing provision and test phase output concurrently,
    // fragments arriving interleaved and out of numeric order.
    repo.append_fragment(frag("job-1", LogType::Output, "test", 2, "ld ")).await.unwrap();
    repo.append_fragment(frag("job-1", LogType::Output, "provision", 1, "flashing ")).await.unwrap();
    repo.append_fragment(frag("job-1", LogType::Output, "test", 1, "loading... ")).await.unwrap();
    repo.append_fragment(frag("job-1", LogType::Output, "provision", 2, "image")).await.unwrap();
    repo.append_fragment(frag("job-1", LogType::Output, "test", 3, "tests passed")).await.unwrap();

    let stored = repo.fragments("job-1", Some(LogType::Output), None, None, None).await.unwrap();
    let assembled = assemble(stored);

    assert_eq!(assembled["provision"].log_data, "flashing image");
    assert_eq!(assembled["test"].log_data, "loading... tests passed");
    assert_eq!(assembled["test"].last_fragment_number, 3);
}

#[tokio::test]
async fn resuming_from_a_fragment_number_skips_already_delivered_output() {
    let pool = create_pool("sqlite::memory:").await.unwrap();
    run_migrations(&pool).await.unwrap();
    let repo = SqliteLogRepository::new(pool);

    for n in 1..=5 {
        repo.append_fragment(frag("job-2", LogType::Serial, "test", n, &format!("chunk{n} "))).await.unwrap();
    }

    // A client that already consumed fragments 1-3 resumes from 4.
    let resumed = repo.fragments("job-2", Some(LogType::Serial), None, Some(4), None).await.unwrap();
    let assembled = assemble(resumed);
    assert_eq!(assembled["test"].log_data, "chunk4 chunk5 ");
}

#[tokio::test]
async fn output_and_serial_logs_are_independent_streams() {
    let pool = create_pool("sqlite::memory:").await.unwrap();
    run_migrations(&pool).await.unwrap();
    let repo = SqliteLogRepository::new(pool);

    repo.append_fragment(frag("job-3", LogType::Output, "setup", 1, "stdout line")).await.unwrap();
    repo.append_fragment(frag("job-3", LogType::Serial, "setup", 1, "serial line")).await.unwrap();

    let output_only = assemble(repo.fragments("job-3", Some(LogType::Output), None, None, None).await.unwrap());
    let serial_only = assemble(repo.fragments("job-3", Some(LogType::Serial), None, None, None).await.unwrap());

    assert_eq!(output_only["setup"].log_data, "stdout line");
    assert_eq!(serial_only["setup"].log_data, "serial line");
}
