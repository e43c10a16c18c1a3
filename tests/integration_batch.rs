//! Batch processor integration against a mock HTTP backend: failure
//! tolerance, checkpoint shape, and resume.

mod common;

use common::{gateway_against, mount_chat_failing_on, mount_chat_ok};
use promptdeck::batch::{BatchProcessor, FailurePolicy, JobStatus};
use promptdeck::providers::GenerationParams;
use tokio_util::sync::CancellationToken;
use wiremock::MockServer;

fn prompts(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn batch_with_one_failure_scenario() {
    let server = MockServer::start().await;
    // "b" is rejected; everything else succeeds
    mount_chat_failing_on(&server, "poison").await;
    mount_chat_ok(&server, "fine").await;

    let dir = tempfile::tempdir().unwrap();
    let processor = BatchProcessor::new(gateway_against(&server), dir.path(), 5);
    let mut job = processor.create_job(
        "ollama",
        "m",
        prompts(&["a", "poison b", "c"]),
        GenerationParams::default(),
        FailurePolicy::Continue,
    );

    let results = processor
        .execute(&mut job, None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(results.len(), 3);
    assert_eq!(
        results.iter().map(|r| r.success).collect::<Vec<_>>(),
        vec![true, false, true]
    );
    assert_eq!(job.status, JobStatus::Completed);

    // The terminal checkpoint lists all three entries in order
    let (header, saved) = processor.load_checkpoint(&job.job_id).unwrap();
    assert_eq!(header.total_prompts, 3);
    assert_eq!(saved.len(), 3);
    assert_eq!(
        saved.iter().map(|r| r.prompt.as_str()).collect::<Vec<_>>(),
        vec!["a", "poison b", "c"]
    );
    assert!(saved[1].error.is_some());
}

#[tokio::test]
async fn batch_resume_scenario() {
    let server = MockServer::start().await;
    mount_chat_ok(&server, "ok").await;

    let dir = tempfile::tempdir().unwrap();
    let processor = BatchProcessor::new(gateway_against(&server), dir.path(), 1);
    let all = prompts(&["a", "b", "c"]);

    // Cancel right after the first completion
    let mut job = processor.create_job(
        "ollama",
        "m",
        all.clone(),
        GenerationParams::default(),
        FailurePolicy::Continue,
    );
    let cancel = CancellationToken::new();
    let trip = cancel.clone();
    let after_first = move |done: usize, _total: usize| {
        if done == 1 {
            trip.cancel();
        }
    };
    let partial = processor
        .execute(&mut job, Some(&after_first), &cancel)
        .await
        .unwrap();

    assert_eq!(partial.len(), 1);
    assert_eq!(job.status, JobStatus::Paused);

    let (header, checkpointed) = processor.load_checkpoint(&job.job_id).unwrap();
    assert_eq!(header.status, JobStatus::Paused);
    assert_eq!(checkpointed.len(), 1);
    assert_eq!(checkpointed[0].prompt, "a");

    // Resume yields the same final list as an uninterrupted run
    let (resumed, finals) = processor
        .resume(
            &job.job_id,
            all,
            GenerationParams::default(),
            FailurePolicy::Continue,
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(resumed.status, JobStatus::Completed);
    assert_eq!(
        finals.iter().map(|r| r.prompt.as_str()).collect::<Vec<_>>(),
        vec!["a", "b", "c"]
    );
    assert!(finals.iter().all(|r| r.success));
}

#[tokio::test]
async fn checkpoint_is_always_a_contiguous_prefix() {
    let server = MockServer::start().await;
    mount_chat_ok(&server, "ok").await;

    let dir = tempfile::tempdir().unwrap();
    let processor = BatchProcessor::new(gateway_against(&server), dir.path(), 2);
    let all = prompts(&["p0", "p1", "p2", "p3", "p4"]);

    let mut job = processor.create_job(
        "ollama",
        "m",
        all.clone(),
        GenerationParams::default(),
        FailurePolicy::Continue,
    );

    // After every completion, any on-disk checkpoint must be a prefix
    let dir_path = dir.path().to_path_buf();
    let job_id = job.job_id.clone();
    let expected = all.clone();
    let check = move |_done: usize, _total: usize| {
        let path = dir_path.join(format!("{}.json", job_id));
        if !path.exists() {
            return;
        }
        let doc: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let results = doc["results"].as_array().unwrap();
        assert_eq!(doc["completed"].as_u64().unwrap() as usize, results.len());
        for (index, result) in results.iter().enumerate() {
            assert_eq!(result["prompt"].as_str().unwrap(), expected[index]);
        }
    };

    processor
        .execute(&mut job, Some(&check), &CancellationToken::new())
        .await
        .unwrap();

    let (header, saved) = processor.load_checkpoint(&job.job_id).unwrap();
    assert_eq!(header.status, JobStatus::Completed);
    assert_eq!(saved.len(), 5);
}

#[tokio::test]
async fn stop_policy_marks_job_failed() {
    let server = MockServer::start().await;
    mount_chat_failing_on(&server, "poison").await;
    mount_chat_ok(&server, "ok").await;

    let dir = tempfile::tempdir().unwrap();
    let processor = BatchProcessor::new(gateway_against(&server), dir.path(), 5);
    let mut job = processor.create_job(
        "ollama",
        "m",
        prompts(&["a", "poison", "never-reached"]),
        GenerationParams::default(),
        FailurePolicy::Stop,
    );

    let results = processor
        .execute(&mut job, None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(job.status, JobStatus::Failed);
    let (header, _) = processor.load_checkpoint(&job.job_id).unwrap();
    assert_eq!(header.status, JobStatus::Failed);
}
