//! 用例执行器集成测试
//!
//! 以内存服务和手写的假服务代替真实部署。

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tiering_boundary::{
    BoundaryError, FileMetadata, MemoryServiceConfig, MemoryTieringService, SystemStats,
    TieringService, TieringSummary, UploadReceipt, UploadRequest,
};
use tiering_executor::actions::sha256_hex;
use tiering_executor::*;

fn fast_settings() -> ExecutorSettings {
    let mut settings = ExecutorSettings::default();
    settings.retry = RetryPolicy {
        max_attempts: 3,
        delay_ms: 1,
    };
    settings
}

fn runner_with(service: Arc<dyn TieringService>, settings: ExecutorSettings) -> TestRunner {
    let registry = Arc::new(ActionRegistry::with_builtin().unwrap());
    TestRunner::new(service, registry).with_settings(settings)
}

fn memory_runner() -> TestRunner {
    runner_with(Arc::new(MemoryTieringService::new()), fast_settings())
}

async fn run_yaml(runner: &TestRunner, yaml: &str) -> SuiteReport {
    let suite = Suite::from_yaml_str(yaml).unwrap();
    runner.run_suite(&suite).await
}

/// 每次上传都返回同一个文件 ID 的服务
struct FixedIdService;

#[async_trait]
impl TieringService for FixedIdService {
    async fn upload(
        &self,
        request: UploadRequest,
        _timeout: Duration,
    ) -> tiering_boundary::Result<UploadReceipt> {
        Ok(UploadReceipt {
            file_id: "same-id".to_string(),
            filename: request.filename,
            size: request.content.map(|c| c.len() as u64).unwrap_or_default(),
            content_type: request.content_type.unwrap_or_default(),
            tier: tiering_boundary::Tier::Hot,
            created_at: chrono::Utc::now(),
        })
    }

    async fn metadata(&self, file_id: &str, _timeout: Duration) -> tiering_boundary::Result<FileMetadata> {
        Err(BoundaryError::NotFound(file_id.to_string()))
    }

    async fn download(&self, file_id: &str, _timeout: Duration) -> tiering_boundary::Result<Vec<u8>> {
        Err(BoundaryError::NotFound(file_id.to_string()))
    }

    async fn delete(&self, file_id: &str, _timeout: Duration) -> tiering_boundary::Result<()> {
        Err(BoundaryError::NotFound(file_id.to_string()))
    }

    async fn update_last_accessed(
        &self,
        file_id: &str,
        _days_ago: i64,
        _timeout: Duration,
    ) -> tiering_boundary::Result<FileMetadata> {
        Err(BoundaryError::NotFound(file_id.to_string()))
    }

    async fn run_tiering(&self, _timeout: Duration) -> tiering_boundary::Result<TieringSummary> {
        Ok(TieringSummary::default())
    }

    async fn stats(&self, _timeout: Duration) -> tiering_boundary::Result<SystemStats> {
        Ok(SystemStats::default())
    }
}

/// 前几次统计查询返回 503 的服务
struct FlakyStatsService {
    inner: MemoryTieringService,
    failures_left: AtomicUsize,
    stats_calls: AtomicUsize,
}

impl FlakyStatsService {
    fn new(failures: usize) -> Self {
        Self {
            inner: MemoryTieringService::new(),
            failures_left: AtomicUsize::new(failures),
            stats_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl TieringService for FlakyStatsService {
    async fn upload(
        &self,
        request: UploadRequest,
        timeout: Duration,
    ) -> tiering_boundary::Result<UploadReceipt> {
        self.inner.upload(request, timeout).await
    }

    async fn metadata(&self, file_id: &str, timeout: Duration) -> tiering_boundary::Result<FileMetadata> {
        self.inner.metadata(file_id, timeout).await
    }

    async fn download(&self, file_id: &str, timeout: Duration) -> tiering_boundary::Result<Vec<u8>> {
        self.inner.download(file_id, timeout).await
    }

    async fn delete(&self, file_id: &str, timeout: Duration) -> tiering_boundary::Result<()> {
        self.inner.delete(file_id, timeout).await
    }

    async fn update_last_accessed(
        &self,
        file_id: &str,
        days_ago: i64,
        timeout: Duration,
    ) -> tiering_boundary::Result<FileMetadata> {
        self.inner.update_last_accessed(file_id, days_ago, timeout).await
    }

    async fn run_tiering(&self, timeout: Duration) -> tiering_boundary::Result<TieringSummary> {
        self.inner.run_tiering(timeout).await
    }

    async fn stats(&self, timeout: Duration) -> tiering_boundary::Result<SystemStats> {
        self.stats_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures_left.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_left.store(remaining - 1, Ordering::SeqCst);
            return Err(BoundaryError::Unavailable("stats backend warming up".to_string()));
        }
        self.inner.stats(timeout).await
    }
}

#[tokio::test]
async fn test_upload_download_round_trip() {
    let report = run_yaml(
        &memory_runner(),
        r#"
test_data:
  file_sizes:
    tiny: 4096
test_cases:
  file_download:
    - id: TC-DL-001
      priority: P0
      name: Upload then download
      endpoint: GET /files/{id}
      steps:
        - action: create_file
          size: tiny
        - action: upload
          expected_status: 201
        - action: verify_response
          source: last_upload_response
          fields: { tier: HOT, size: 4096 }
        - action: download
        - action: verify_content_match
        - action: verify_checksum_match
        - action: calculate_checksum
          source: last_download_content
          capture: checksum_a
        - action: calculate_checksum
          source: last_download_content
          capture: checksum_b
"#,
    )
    .await;

    let case = &report.cases[0];
    assert!(case.passed(), "{:?}", case.failure());
    assert_eq!(case.category.as_deref(), Some("file_download"));
    assert_eq!(case.steps.len(), 8);

    let expected = sha256_hex(&vec![b'x'; 4096]);
    assert_eq!(case.context["checksum_a"], expected.as_str());
    assert_eq!(case.context["checksum_b"], expected.as_str());
    assert_eq!(case.context["last_checksum"], expected.as_str());
}

#[tokio::test]
async fn test_steps_halt_at_first_failure() {
    let report = run_yaml(
        &memory_runner(),
        r#"
test_cases:
  - id: TC-HALT
    name: Halt on mismatch
    steps:
      - action: upload_file
        size: 16
      - action: get_metadata
        verify: [file_id, tier]
      - action: verify_response
        fields: { tier: COLD }
      - action: download
"#,
    )
    .await;

    let case = &report.cases[0];
    assert_eq!(case.verdict, Outcome::Failed);
    assert_eq!(case.steps_total, 4);
    assert_eq!(case.steps.len(), 3);
    assert_eq!(case.failed_step, Some(2));

    let indices: Vec<usize> = case.steps.iter().map(|s| s.index).collect();
    assert_eq!(indices, vec![0, 1, 2]);

    let failure = case.failure().unwrap();
    assert_eq!(failure.action, "verify_response");
    assert!(failure.detail.contains("tier"));
    assert!(failure.detail.contains("COLD"));
    assert!(failure.detail.contains("HOT"));
    assert!(!case.context.contains_key("last_download_content"));
}

#[tokio::test]
async fn test_unknown_action_is_error() {
    let report = run_yaml(
        &memory_runner(),
        r#"
test_cases:
  - id: TC-UNKNOWN
    steps:
      - action: create_file
        size: 8
      - action: no_such_action
      - action: wait
        milliseconds: 1
"#,
    )
    .await;

    let case = &report.cases[0];
    assert_eq!(case.verdict, Outcome::Error);
    assert_eq!(case.steps.len(), 2);
    assert!(case.steps[1].detail.contains("no_such_action"));
}

#[tokio::test]
async fn test_context_does_not_leak_across_cases() {
    let report = run_yaml(
        &memory_runner(),
        r#"
test_cases:
  - id: TC-A
    steps:
      - action: upload_file
        size: 8
        capture: my_file
      - action: download
  - id: TC-B
    steps:
      - action: download
"#,
    )
    .await;

    assert!(report.cases[0].passed());
    assert!(report.cases[0].context.contains_key("my_file"));

    let second = &report.cases[1];
    assert_eq!(second.verdict, Outcome::Error);
    assert!(second.steps[0].detail.contains("last_file_id"));
    assert!(!second.context.contains_key("my_file"));
}

#[tokio::test]
async fn test_capture_written_by_step_is_read_later() {
    let report = run_yaml(
        &memory_runner(),
        r#"
test_cases:
  - id: TC-CAPTURE
    steps:
      - action: upload_file
        size: 8
        capture: [file_id_a]
      - action: upload_file
        size: 8
        capture: [file_id_b]
      - action: verify_ids_different
"#,
    )
    .await;

    let case = &report.cases[0];
    assert!(case.passed(), "{:?}", case.failure());
    assert_eq!(case.steps[0].captured["file_id_a"], case.context["file_id_a"]);
    assert_ne!(case.context["file_id_a"], case.context["file_id_b"]);
}

#[tokio::test]
async fn test_minimum_upload_and_invalid_content_type() {
    let report = run_yaml(
        &memory_runner(),
        r#"
test_cases:
  file_upload:
    - id: TC-UP-001
      priority: P0
      steps:
        - action: create_file
          size: minimum
        - action: upload
          expected_status: 201
        - action: verify_response
          fields: { tier: HOT, size: 1048576 }
        - action: get_metadata
          verify: [file_id]
        - action: verify_tier
          tier: HOT
    - id: TC-UP-002
      priority: P0
      steps:
        - action: create_file
          size: 0
        - action: upload
        - action: verify_tier
    - id: TC-UP-003
      priority: P1
      steps:
        - action: create_file
          size: 10
        - action: upload
          content_type: null
          expected_status: 400
        - action: verify_error
          message_contains: content type
          status: 400
    - id: TC-UP-004
      priority: P1
      steps:
        - action: create_file
          size: 10
        - action: upload
          content_type: invalid
"#,
    )
    .await;

    assert!(report.cases[0].passed(), "{:?}", report.cases[0].failure());
    assert!(report.cases[1].passed(), "{:?}", report.cases[1].failure());
    assert!(report.cases[2].passed(), "{:?}", report.cases[2].failure());

    let unexpected = &report.cases[3];
    assert_eq!(unexpected.verdict, Outcome::Error);
    assert!(unexpected.steps[1].detail.contains("400"));
    assert!(unexpected.steps[1].detail.contains("content type"));
}

#[tokio::test]
async fn test_expected_status_handling() {
    let report = run_yaml(
        &memory_runner(),
        r#"
test_cases:
  - id: TC-404
    steps:
      - action: generate_random_uuid
      - action: download
        expected_status: 404
      - action: verify_error
        status: 404
      - action: get_metadata
        expected_status: [404, 410]
  - id: TC-UNEXPECTED-SUCCESS
    steps:
      - action: get_stats
        expected_status: 404
"#,
    )
    .await;

    assert!(report.cases[0].passed(), "{:?}", report.cases[0].failure());

    let second = &report.cases[1];
    assert_eq!(second.verdict, Outcome::Failed);
    assert!(second.steps[0].detail.contains("404"));
}

#[tokio::test]
async fn test_stats_decreased_after_delete() {
    let yaml = |files: u64| {
        format!(
            r#"
test_cases:
  - id: TC-STATS
    steps:
      - action: bulk_upload
        count: 5
        size: 32
      - action: get_stats
        capture: stats_before
      - action: delete
        count: 3
      - action: get_stats
        capture: stats_after
      - action: verify_stats_decreased
        files: {}
"#,
            files
        )
    };

    let passed = run_yaml(&memory_runner(), &yaml(3)).await;
    assert!(passed.cases[0].passed(), "{:?}", passed.cases[0].failure());

    let failed = run_yaml(&memory_runner(), &yaml(2)).await;
    assert_eq!(failed.cases[0].verdict, Outcome::Failed);
    assert_eq!(failed.cases[0].failed_step, Some(4));
}

#[tokio::test]
async fn test_increment_and_decrement() {
    let report = run_yaml(
        &memory_runner(),
        r#"
test_cases:
  - id: TC-COUNTS
    steps:
      - action: get_stats
        capture: baseline
      - action: upload_file
        size: 64
      - action: get_stats
        capture: after_upload
      - action: verify_increment
      - action: verify_stats
        expected_files: 1
        expected_size: 64
      - action: delete
        expected_status: 204
      - action: get_stats
        capture: after_delete
      - action: verify_decrement
      - action: verify_tier_stats
        all_zero: true
"#,
    )
    .await;

    assert!(report.cases[0].passed(), "{:?}", report.cases[0].failure());
}

#[tokio::test]
async fn test_bulk_upload_ids_unique() {
    let report = run_yaml(
        &memory_runner(),
        r#"
test_cases:
  - id: TC-BULK
    steps:
      - action: bulk_upload
        count: 10
        size: 8
      - action: verify_unique_ids
        count: 10
      - action: verify_consistent_state
      - action: verify_tiering_results
        tier: HOT
      - action: delete
        count: 10
      - action: verify_all_deleted
"#,
    )
    .await;
    assert!(report.cases[0].passed(), "{:?}", report.cases[0].failure());

    let collided = runner_with(Arc::new(FixedIdService), fast_settings());
    let report = run_yaml(
        &collided,
        r#"
test_cases:
  - id: TC-BULK-DUP
    steps:
      - action: bulk_upload
        count: 10
        size: 8
      - action: verify_unique_ids
"#,
    )
    .await;

    let case = &report.cases[0];
    assert_eq!(case.verdict, Outcome::Failed);
    assert!(case.steps[1].detail.contains("same-id"));
}

#[tokio::test]
async fn test_concurrent_steps_report_every_worker() {
    let mut settings = fast_settings();
    settings.max_workers = 2;
    let runner = runner_with(Arc::new(MemoryTieringService::new()), settings);

    let report = run_yaml(
        &runner,
        r#"
test_cases:
  - id: TC-CONC
    steps:
      - action: concurrent_upload
        count: 6
        size: 8
      - action: verify_all_success
      - action: verify_unique_ids
        count: 6
      - action: concurrent_download
        count: 4
      - action: concurrent_tiering
        count: 3
      - action: concurrent
        base_action: get_stats
        count: 2
        collect: last_stats
      - action: bulk_upload
        count: 4
        size: 8
      - action: concurrent_delete
      - action: verify_all_deleted
"#,
    )
    .await;

    let case = &report.cases[0];
    assert!(case.passed(), "{:?}", case.failure());
    assert_eq!(case.steps[0].workers.len(), 6);
    assert_eq!(case.steps[3].workers.len(), 4);
    assert_eq!(case.steps[4].workers.len(), 3);
    assert_eq!(case.steps[7].workers.len(), 4);

    let indices: Vec<usize> = case.steps[0].workers.iter().map(|w| w.index).collect();
    assert_eq!(indices, vec![0, 1, 2, 3, 4, 5]);
    assert!(case.steps[0].workers.iter().all(|w| w.action == "upload_file"));

    assert_eq!(case.context["concurrent_file_ids"].as_array().unwrap().len(), 6);
    assert_eq!(case.context["concurrent_last_stats"].as_array().unwrap().len(), 2);
    assert_eq!(case.context["deleted_file_ids"].as_array().unwrap().len(), 4);
}

#[tokio::test]
async fn test_concurrent_worker_failures_are_isolated() {
    let report = run_yaml(
        &memory_runner(),
        r#"
test_cases:
  - id: TC-CONC-ERR
    steps:
      - action: bulk_upload
        count: 3
        size: 8
      - action: delete
      - action: concurrent_delete
  - id: TC-CONC-FAIL
    steps:
      - action: upload_file
        size: 8
      - action: concurrent
        base_action: verify_response
        count: 3
        source: last_upload_response
        fields: { tier: COLD }
"#,
    )
    .await;

    // 最后一个文件已被单独删除，对应的 worker 报错，其余 worker 照常完成
    let errored = &report.cases[0];
    assert_eq!(errored.verdict, Outcome::Error);
    let step = &errored.steps[2];
    assert_eq!(step.workers.len(), 3);
    assert!(step.workers[0].is_passed());
    assert!(step.workers[1].is_passed());
    assert_eq!(step.workers[2].outcome, Outcome::Error);
    assert_eq!(errored.context["last_concurrent_results"]["errored"], 1);
    assert_eq!(errored.context["last_concurrent_results"]["passed"], 2);

    let failed = &report.cases[1];
    assert_eq!(failed.verdict, Outcome::Failed);
    assert_eq!(failed.steps[1].workers.len(), 3);
    assert!(failed.steps[1]
        .workers
        .iter()
        .all(|w| w.outcome == Outcome::Failed));
}

#[tokio::test]
async fn test_tier_transitions() {
    let report = run_yaml(
        &memory_runner(),
        r#"
test_cases:
  - id: TC-TIER
    steps:
      - action: upload_file
        size: 128
      - action: update_last_accessed
        days_ago: 35
      - action: run_tiering
      - action: verify_tier
        tier: WARM
      - action: move_to_cold
      - action: verify_tier
        tier: COLD
      - action: get_stats
      - action: verify_tier_distribution
      - action: verify_tier_stats
        cold: { count: 1, size: 128 }
        hot: { count: 0 }
      - action: verify_tiering_results
"#,
    )
    .await;

    assert!(report.cases[0].passed(), "{:?}", report.cases[0].failure());
}

#[tokio::test]
async fn test_last_accessed_updates_on_download() {
    let report = run_yaml(
        &memory_runner(),
        r#"
test_cases:
  - id: TC-ACCESS
    steps:
      - action: upload_file
        size: 8
      - action: get_metadata
        capture: [last_accessed_t0]
      - action: download
      - action: get_metadata
        capture: [last_accessed_t1]
      - action: verify_timestamp_increased
      - action: verify_last_accessed_updated
"#,
    )
    .await;

    assert!(report.cases[0].passed(), "{:?}", report.cases[0].failure());
}

#[tokio::test]
async fn test_upload_multiple_content_types() {
    let report = run_yaml(
        &memory_runner(),
        r#"
test_cases:
  - id: TC-TYPES
    steps:
      - action: upload_multiple
        files:
          - { filename: a.txt, content_type: text/plain, size: 8 }
          - { filename: b.json, content_type: application/json, size: 8 }
          - { filename: c.bin, size: 8 }
      - action: verify_content_types
"#,
    )
    .await;

    let case = &report.cases[0];
    assert!(case.passed(), "{:?}", case.failure());
    assert_eq!(case.context["uploaded_files"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let yaml = r#"
test_cases:
  - id: TC-RETRY
    steps:
      - action: get_stats
"#;

    let flaky = Arc::new(FlakyStatsService::new(2));
    let runner = runner_with(flaky.clone(), fast_settings());
    let report = run_yaml(&runner, yaml).await;
    assert!(report.cases[0].passed(), "{:?}", report.cases[0].failure());
    assert_eq!(flaky.stats_calls.load(Ordering::SeqCst), 3);

    let mut no_retry = fast_settings();
    no_retry.retry = RetryPolicy::none();
    let flaky = Arc::new(FlakyStatsService::new(2));
    let runner = runner_with(flaky.clone(), no_retry);
    let report = run_yaml(&runner, yaml).await;
    assert_eq!(report.cases[0].verdict, Outcome::Error);
    assert!(report.cases[0].steps[0].detail.contains("503"));
    assert_eq!(flaky.stats_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_step_timeout() {
    let service = MemoryTieringService::with_config(MemoryServiceConfig {
        latency: Duration::from_secs(10),
        ..Default::default()
    });
    let runner = runner_with(Arc::new(service), fast_settings());

    let report = run_yaml(
        &runner,
        r#"
test_cases:
  - id: TC-SLOW
    steps:
      - action: upload_file
        size: 8
        timeout: 1
  - id: TC-SLOW-WORKERS
    steps:
      - action: concurrent_tiering
        count: 3
        timeout: 1
"#,
    )
    .await;

    let slow = &report.cases[0];
    assert_eq!(slow.verdict, Outcome::Error);
    assert!(slow.steps[0].detail.contains("超时"));

    let workers = &report.cases[1].steps[0].workers;
    assert_eq!(workers.len(), 3);
    assert!(workers.iter().all(|w| w.outcome == Outcome::Error));
}

#[tokio::test]
async fn test_suite_report_counts() {
    let suite = Suite::from_yaml_str(
        r#"
test_cases:
  - id: TC-PASS
    steps:
      - action: wait
        milliseconds: 1
  - id: TC-FAIL
    steps:
      - action: get_stats
      - action: verify_stats
        expected_files: 99
  - id: TC-ERROR
    steps:
      - action: verify_content_match
"#,
    )
    .unwrap();

    let mut seen = Vec::new();
    let report = memory_runner()
        .run_suite_with(&suite, |case| seen.push(case.id.clone()))
        .await;

    assert_eq!(seen, vec!["TC-PASS", "TC-FAIL", "TC-ERROR"]);
    assert_eq!(report.total, 3);
    assert_eq!(report.passed, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.errored, 1);
    assert_eq!(report.exit_code(), 1);

    let json = report.to_json().unwrap();
    assert!(json.contains("TC-FAIL"));
    assert!(json.contains("\"verdict\": \"failed\""));
}

#[tokio::test(start_paused = true)]
async fn test_wait_longer_than_step_timeout() {
    let report = run_yaml(
        &memory_runner(),
        r#"
test_cases:
  - id: TC-LONG-WAIT
    steps:
      - action: wait
        seconds: 400
"#,
    )
    .await;

    let case = &report.cases[0];
    assert_eq!(case.verdict, Outcome::Passed, "{:?}", case.failure());
    assert!(case.steps[0].detail.contains("400000"));
}

#[tokio::test]
async fn test_update_last_accessed_out_of_range_is_error() {
    let report = run_yaml(
        &memory_runner(),
        r#"
test_cases:
  - id: TC-AGE-OVERFLOW
    steps:
      - action: upload_file
        size: 8
      - action: update_last_accessed
        days_ago: 9223372036854775807
      - action: verify_tier
        tier: HOT
"#,
    )
    .await;

    let case = &report.cases[0];
    assert_eq!(case.verdict, Outcome::Error);
    assert_eq!(case.failed_step, Some(1));
    assert!(case.steps[1].detail.contains("out of range"));
    assert_eq!(case.steps.len(), 2);
}

#[tokio::test]
async fn test_oversized_count_is_rejected() {
    let mut settings = fast_settings();
    settings.max_count = 50;
    let service = Arc::new(MemoryTieringService::new());
    let runner = runner_with(service.clone(), settings);

    let report = run_yaml(
        &runner,
        r#"
test_cases:
  - id: TC-BULK-HUGE
    steps:
      - action: bulk_upload
        count: 1000000000000000
        size: 8
  - id: TC-CONCURRENT-HUGE
    steps:
      - action: concurrent_upload
        count: 1000000000000000
        size: 8
  - id: TC-DELETE-HUGE
    steps:
      - action: bulk_upload
        count: 2
        size: 8
      - action: delete
        count: 18446744073709551615
  - id: TC-BULK-LIMIT
    steps:
      - action: bulk_upload
        count: 50
        size: 8
"#,
    )
    .await;

    for case in &report.cases[..3] {
        assert_eq!(case.verdict, Outcome::Error, "{}", case.id);
        let failure = case.failure().unwrap();
        assert!(failure.detail.contains("count"), "{}: {}", case.id, failure.detail);
    }
    assert_eq!(report.cases[3].verdict, Outcome::Passed);
    // 被拒绝的步骤没有上传任何文件
    assert_eq!(service.file_count().await, 52);
}
