//! Batch processor
//!
//! Runs an ordered list of prompts against one backend+model, tolerating
//! individual failures, reporting progress, and writing periodic
//! checkpoints so an interrupted job can resume. A checkpoint always
//! describes a contiguous prefix of the job's prompt list and is replaced
//! atomically (write-temp-then-rename).

use crate::error::{PromptdeckError, Result};
use crate::providers::{GenerationParams, ProviderGateway};
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Lifecycle status of a batch job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Created, not yet started
    Pending,
    /// Currently executing
    Running,
    /// Cancelled between prompts; resumable
    Paused,
    /// All prompts processed
    Completed,
    /// Aborted by the stop-on-failure policy
    Failed,
}

/// What to do when a single prompt fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Record the failure and move on to the next prompt
    #[default]
    Continue,
    /// Checkpoint, mark the job failed, and stop
    Stop,
}

/// A batch job: one backend+model and an ordered prompt list
#[derive(Debug, Clone)]
pub struct BatchJob {
    /// Sortable job identifier (ULID)
    pub job_id: String,
    /// Backend the prompts run against
    pub backend_id: String,
    /// Model the prompts run against
    pub model_id: String,
    /// Ordered prompts
    pub prompts: Vec<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Current lifecycle status
    pub status: JobStatus,
    /// Generation parameters applied to every prompt
    pub params: GenerationParams,
    /// Per-prompt failure handling
    pub failure_policy: FailurePolicy,
}

/// Outcome of one prompt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    /// The prompt as submitted
    pub prompt: String,
    /// Response text; empty on failure
    pub response: String,
    /// Wall-clock duration of the call, in seconds
    pub duration: f64,
    /// Total tokens used
    pub tokens: usize,
    /// Whether the call succeeded
    pub success: bool,
    /// Error description for failed prompts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Checkpointed job header
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobHeader {
    /// Job identifier
    pub job_id: String,
    /// Target model
    pub model_id: String,
    /// Target backend
    pub backend_id: String,
    /// Length of the full prompt list
    pub total_prompts: usize,
    /// Status at checkpoint time
    pub status: JobStatus,
    /// Creation timestamp of the job
    pub created_at: DateTime<Utc>,
}

impl JobHeader {
    fn from_job(job: &BatchJob) -> Self {
        Self {
            job_id: job.job_id.clone(),
            model_id: job.model_id.clone(),
            backend_id: job.backend_id.clone(),
            total_prompts: job.prompts.len(),
            status: job.status,
            created_at: job.created_at,
        }
    }
}

/// On-disk checkpoint document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointDocument {
    /// Job header
    pub job: JobHeader,
    /// Number of completed results (always `results.len()`)
    pub completed: usize,
    /// Completed results, a contiguous prefix of the prompt list
    pub results: Vec<BatchResult>,
}

/// Progress callback invoked after each completed prompt with
/// `(completed_count, total_count)`
pub type ProgressFn<'a> = &'a (dyn Fn(usize, usize) + Send + Sync);

/// Driver for batch jobs
pub struct BatchProcessor {
    gateway: Arc<ProviderGateway>,
    checkpoints_dir: PathBuf,
    checkpoint_interval: usize,
}

impl BatchProcessor {
    /// Create a processor writing checkpoints under `checkpoints_dir`
    /// every `checkpoint_interval` completed prompts.
    pub fn new(
        gateway: Arc<ProviderGateway>,
        checkpoints_dir: impl Into<PathBuf>,
        checkpoint_interval: usize,
    ) -> Self {
        Self {
            gateway,
            checkpoints_dir: checkpoints_dir.into(),
            checkpoint_interval: checkpoint_interval.max(1),
        }
    }

    /// Create a new pending job with a fresh ULID identifier.
    pub fn create_job(
        &self,
        backend_id: &str,
        model_id: &str,
        prompts: Vec<String>,
        params: GenerationParams,
        failure_policy: FailurePolicy,
    ) -> BatchJob {
        let job = BatchJob {
            job_id: ulid::Ulid::new().to_string(),
            backend_id: backend_id.to_string(),
            model_id: model_id.to_string(),
            prompts,
            created_at: Utc::now(),
            status: JobStatus::Pending,
            params,
            failure_policy,
        };
        tracing::info!(
            "Created batch job {} ({} prompts against {}/{})",
            job.job_id,
            job.prompts.len(),
            job.backend_id,
            job.model_id
        );
        job
    }

    /// Run a job from the beginning.
    ///
    /// Returns results in prompt order. On cancellation the job is left
    /// `paused` with a checkpoint on disk and the partial results are
    /// returned.
    pub async fn execute(
        &self,
        job: &mut BatchJob,
        progress: Option<ProgressFn<'_>>,
        cancel: &CancellationToken,
    ) -> Result<Vec<BatchResult>> {
        self.run(job, Vec::new(), progress, cancel).await
    }

    /// Resume a checkpointed job.
    ///
    /// The checkpoint stores the job header and completed results only, so
    /// the caller supplies the original prompt list again; it is verified
    /// against the header and the recorded prefix before execution
    /// continues from `len(partial)`.
    ///
    /// # Errors
    ///
    /// `UnknownJob` when no checkpoint exists; `InvalidConfig` when the
    /// supplied prompts disagree with the checkpoint.
    pub async fn resume(
        &self,
        job_id: &str,
        prompts: Vec<String>,
        params: GenerationParams,
        failure_policy: FailurePolicy,
        progress: Option<ProgressFn<'_>>,
        cancel: &CancellationToken,
    ) -> Result<(BatchJob, Vec<BatchResult>)> {
        let (header, partial) = self.load_checkpoint(job_id)?;

        if prompts.len() != header.total_prompts {
            return Err(PromptdeckError::InvalidConfig(format!(
                "prompt list has {} entries but job {} was created with {}",
                prompts.len(),
                job_id,
                header.total_prompts
            ))
            .into());
        }
        for (index, result) in partial.iter().enumerate() {
            if prompts[index] != result.prompt {
                return Err(PromptdeckError::InvalidConfig(format!(
                    "prompt {} does not match the checkpointed prefix of job {}",
                    index, job_id
                ))
                .into());
            }
        }

        let mut job = BatchJob {
            job_id: header.job_id,
            backend_id: header.backend_id,
            model_id: header.model_id,
            prompts,
            created_at: header.created_at,
            status: JobStatus::Pending,
            params,
            failure_policy,
        };

        tracing::info!(
            "Resuming batch job {} from {}/{}",
            job.job_id,
            partial.len(),
            job.prompts.len()
        );
        let results = self.run(&mut job, partial, progress, cancel).await?;
        Ok((job, results))
    }

    async fn run(
        &self,
        job: &mut BatchJob,
        mut results: Vec<BatchResult>,
        progress: Option<ProgressFn<'_>>,
        cancel: &CancellationToken,
    ) -> Result<Vec<BatchResult>> {
        job.status = JobStatus::Running;
        let total = job.prompts.len();
        let mut since_checkpoint = 0usize;

        for index in results.len()..total {
            // Cancellation takes effect between prompts only; an in-flight
            // call always records its result first
            if cancel.is_cancelled() {
                job.status = JobStatus::Paused;
                self.save_checkpoint(job, &results)?;
                tracing::info!(
                    "Batch job {} paused after {}/{}",
                    job.job_id,
                    results.len(),
                    total
                );
                return Ok(results);
            }

            let prompt = job.prompts[index].clone();
            let outcome = self
                .gateway
                .execute(
                    &job.backend_id,
                    &job.model_id,
                    &prompt,
                    None,
                    job.params.clone(),
                )
                .await;

            let result = match outcome {
                Ok(output) => BatchResult {
                    prompt,
                    response: output.text,
                    duration: output.duration.as_secs_f64(),
                    tokens: output.usage.total_tokens,
                    success: true,
                    error: None,
                },
                Err(e) => {
                    tracing::warn!("Prompt {} of job {} failed: {}", index, job.job_id, e);
                    BatchResult {
                        prompt,
                        response: String::new(),
                        duration: 0.0,
                        tokens: 0,
                        success: false,
                        error: Some(e.to_string()),
                    }
                }
            };

            let failed = !result.success;
            results.push(result);
            since_checkpoint += 1;

            if let Some(callback) = progress {
                callback(results.len(), total);
            }

            if since_checkpoint >= self.checkpoint_interval {
                self.save_checkpoint(job, &results)?;
                since_checkpoint = 0;
            }

            if failed && job.failure_policy == FailurePolicy::Stop {
                job.status = JobStatus::Failed;
                self.save_checkpoint(job, &results)?;
                tracing::warn!(
                    "Batch job {} failed at prompt {} (stop policy)",
                    job.job_id,
                    index
                );
                return Ok(results);
            }
        }

        job.status = JobStatus::Completed;
        self.save_checkpoint(job, &results)?;
        tracing::info!("Batch job {} completed ({} prompts)", job.job_id, total);
        Ok(results)
    }

    /// Atomically write the checkpoint for `job`.
    pub fn save_checkpoint(&self, job: &BatchJob, results: &[BatchResult]) -> Result<()> {
        std::fs::create_dir_all(&self.checkpoints_dir)
            .context("Failed to create checkpoints directory")?;

        let document = CheckpointDocument {
            job: JobHeader::from_job(job),
            completed: results.len(),
            results: results.to_vec(),
        };
        let bytes =
            serde_json::to_vec_pretty(&document).context("Failed to serialize checkpoint")?;

        let path = self.checkpoint_path(&job.job_id);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to replace {}", path.display()))?;
        Ok(())
    }

    /// Load the checkpoint for `job_id`.
    ///
    /// # Errors
    ///
    /// `UnknownJob` when no checkpoint file exists.
    pub fn load_checkpoint(&self, job_id: &str) -> Result<(JobHeader, Vec<BatchResult>)> {
        let path = self.checkpoint_path(job_id);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PromptdeckError::UnknownJob(job_id.to_string()).into());
            }
            Err(e) => return Err(e.into()),
        };
        let document: CheckpointDocument =
            serde_json::from_str(&text).with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok((document.job, document.results))
    }

    fn checkpoint_path(&self, job_id: &str) -> PathBuf {
        self.checkpoints_dir.join(format!("{}.json", job_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::base::{Backend, BackendReply, ExecutionRequest, TokenUsage};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::tempdir;

    /// Scripted backend: echoes prompts, fails any prompt containing FAIL
    struct ScriptedBackend {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Backend for ScriptedBackend {
        fn id(&self) -> &'static str {
            "scripted"
        }

        async fn execute(&self, request: &ExecutionRequest) -> Result<BackendReply> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if request.prompt.contains("FAIL") {
                return Err(PromptdeckError::ExecutionFailed(
                    "scripted: rejected prompt".to_string(),
                )
                .into());
            }
            Ok(BackendReply {
                text: format!("re: {}", request.prompt),
                usage: TokenUsage::new(2, 3),
            })
        }
    }

    fn processor(dir: &std::path::Path, interval: usize) -> BatchProcessor {
        let mut gateway = ProviderGateway::new(Duration::from_secs(5));
        gateway.register(Box::new(ScriptedBackend {
            calls: AtomicUsize::new(0),
        }));
        BatchProcessor::new(Arc::new(gateway), dir, interval)
    }

    fn prompts(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_results_in_prompt_order() {
        let dir = tempdir().unwrap();
        let processor = processor(dir.path(), 5);
        let mut job = processor.create_job(
            "scripted",
            "m",
            prompts(&["a", "b", "c"]),
            GenerationParams::default(),
            FailurePolicy::Continue,
        );

        let results = processor
            .execute(&mut job, None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(results.len(), 3);
        let echoed: Vec<&str> = results.iter().map(|r| r.prompt.as_str()).collect();
        assert_eq!(echoed, vec!["a", "b", "c"]);
        assert!(results.iter().all(|r| r.success));
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_failure_continues_and_is_recorded() {
        let dir = tempdir().unwrap();
        let processor = processor(dir.path(), 5);
        let mut job = processor.create_job(
            "scripted",
            "m",
            prompts(&["a", "FAIL-b", "c"]),
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
        assert!(results[1].error.as_deref().unwrap().contains("Execution failed"));
        assert_eq!(job.status, JobStatus::Completed);

        // Terminal checkpoint lists all three entries in order
        let (header, saved) = processor.load_checkpoint(&job.job_id).unwrap();
        assert_eq!(header.status, JobStatus::Completed);
        assert_eq!(saved.len(), 3);
        assert_eq!(saved[1].prompt, "FAIL-b");
    }

    #[tokio::test]
    async fn test_stop_policy_fails_job() {
        let dir = tempdir().unwrap();
        let processor = processor(dir.path(), 5);
        let mut job = processor.create_job(
            "scripted",
            "m",
            prompts(&["a", "FAIL-b", "c"]),
            GenerationParams::default(),
            FailurePolicy::Stop,
        );

        let results = processor
            .execute(&mut job, None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(job.status, JobStatus::Failed);
        let (header, saved) = processor.load_checkpoint(&job.job_id).unwrap();
        assert_eq!(header.status, JobStatus::Failed);
        assert_eq!(saved.len(), 2);
    }

    #[tokio::test]
    async fn test_progress_callback_counts() {
        let dir = tempdir().unwrap();
        let processor = processor(dir.path(), 5);
        let mut job = processor.create_job(
            "scripted",
            "m",
            prompts(&["a", "b"]),
            GenerationParams::default(),
            FailurePolicy::Continue,
        );

        let seen: Mutex<Vec<(usize, usize)>> = Mutex::new(Vec::new());
        let callback = |done: usize, total: usize| {
            seen.lock().unwrap().push((done, total));
        };
        processor
            .execute(&mut job, Some(&callback), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![(1, 2), (2, 2)]);
    }

    #[tokio::test]
    async fn test_cancellation_pauses_with_checkpoint() {
        let dir = tempdir().unwrap();
        let processor = processor(dir.path(), 5);
        let mut job = processor.create_job(
            "scripted",
            "m",
            prompts(&["a", "b", "c"]),
            GenerationParams::default(),
            FailurePolicy::Continue,
        );

        // Cancel before the run: the boundary check fires before prompt 0
        let cancel = CancellationToken::new();
        cancel.cancel();
        let results = processor.execute(&mut job, None, &cancel).await.unwrap();

        assert!(results.is_empty());
        assert_eq!(job.status, JobStatus::Paused);
        let (header, saved) = processor.load_checkpoint(&job.job_id).unwrap();
        assert_eq!(header.status, JobStatus::Paused);
        assert!(saved.is_empty());
    }

    #[tokio::test]
    async fn test_resume_completes_same_final_list() {
        let dir = tempdir().unwrap();
        let processor = processor(dir.path(), 1);
        let all = prompts(&["a", "b", "c"]);

        // Run the first prompt only, then pause via a mid-run cancel
        let mut job = processor.create_job(
            "scripted",
            "m",
            all.clone(),
            GenerationParams::default(),
            FailurePolicy::Continue,
        );
        let cancel = CancellationToken::new();
        let cancel_after_first = cancel.clone();
        let callback = move |done: usize, _total: usize| {
            if done == 1 {
                cancel_after_first.cancel();
            }
        };
        let partial = processor
            .execute(&mut job, Some(&callback), &cancel)
            .await
            .unwrap();
        assert_eq!(partial.len(), 1);
        assert_eq!(job.status, JobStatus::Paused);

        let (_, checkpointed) = processor.load_checkpoint(&job.job_id).unwrap();
        assert_eq!(checkpointed.len(), 1);
        assert_eq!(checkpointed[0].prompt, "a");

        // Resume finishes the remaining prompts in order
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
    async fn test_resume_rejects_mismatched_prompts() {
        let dir = tempdir().unwrap();
        let processor = processor(dir.path(), 5);
        let mut job = processor.create_job(
            "scripted",
            "m",
            prompts(&["a", "b"]),
            GenerationParams::default(),
            FailurePolicy::Continue,
        );
        processor
            .execute(&mut job, None, &CancellationToken::new())
            .await
            .unwrap();

        let wrong_length = processor
            .resume(
                &job.job_id,
                prompts(&["a"]),
                GenerationParams::default(),
                FailurePolicy::Continue,
                None,
                &CancellationToken::new(),
            )
            .await;
        assert!(wrong_length.is_err());

        let wrong_prefix = processor
            .resume(
                &job.job_id,
                prompts(&["x", "b"]),
                GenerationParams::default(),
                FailurePolicy::Continue,
                None,
                &CancellationToken::new(),
            )
            .await;
        assert!(wrong_prefix.is_err());
    }

    #[tokio::test]
    async fn test_checkpoint_document_shape() {
        let dir = tempdir().unwrap();
        let processor = processor(dir.path(), 2);
        let mut job = processor.create_job(
            "scripted",
            "m",
            prompts(&["a", "b", "c"]),
            GenerationParams::default(),
            FailurePolicy::Continue,
        );
        processor
            .execute(&mut job, None, &CancellationToken::new())
            .await
            .unwrap();

        let path = dir.path().join(format!("{}.json", job.job_id));
        let doc: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(doc["job"]["job_id"], serde_json::json!(job.job_id));
        assert_eq!(doc["job"]["total_prompts"], serde_json::json!(3));
        assert_eq!(doc["job"]["backend_id"], serde_json::json!("scripted"));
        assert_eq!(doc["completed"], serde_json::json!(3));
        assert_eq!(doc["results"].as_array().unwrap().len(), 3);
        assert_eq!(doc["results"][0]["success"], serde_json::json!(true));
    }

    #[test]
    fn test_load_checkpoint_unknown_job() {
        let dir = tempdir().unwrap();
        let processor = processor(dir.path(), 5);
        let err = processor.load_checkpoint("01HZZZZZZZZZZZZZZZZZZZZZZZ").unwrap_err();
        let kind = err.downcast_ref::<PromptdeckError>().unwrap();
        assert!(matches!(kind, PromptdeckError::UnknownJob(_)));
    }

    #[test]
    fn test_job_ids_are_sortable() {
        let dir = tempdir().unwrap();
        let processor = processor(dir.path(), 5);
        let first = processor.create_job(
            "scripted",
            "m",
            vec![],
            GenerationParams::default(),
            FailurePolicy::Continue,
        );
        std::thread::sleep(Duration::from_millis(2));
        let second = processor.create_job(
            "scripted",
            "m",
            vec![],
            GenerationParams::default(),
            FailurePolicy::Continue,
        );
        assert!(first.job_id < second.job_id);
    }
}
