//! 仓库自带套件在内存服务上的冒烟测试

use std::sync::Arc;

use tiering_boundary::MemoryTieringService;
use tiering_executor::*;

const SMOKE_SUITE: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/../../suites/smoke.yaml");

#[tokio::test]
async fn test_smoke_suite_passes_on_memory_service() {
    let suite = Suite::from_file(SMOKE_SUITE).unwrap();
    assert!(suite.len() >= 15);

    let registry = Arc::new(ActionRegistry::with_builtin().unwrap());
    let runner = TestRunner::new(Arc::new(MemoryTieringService::new()), registry);
    let report = runner.run_suite(&suite).await;

    for case in &report.cases {
        assert!(
            case.failure().is_none(),
            "{} 未通过: {:?}",
            case.id,
            case.failure()
        );
    }
    assert!(report.all_passed());
    assert_eq!(report.total, suite.len());
}

#[tokio::test]
async fn test_smoke_suite_filters() {
    let suite = Suite::from_file(SMOKE_SUITE).unwrap();

    let concurrency = suite.filter(&SuiteFilter {
        category: Some("concurrency".to_string()),
        ..Default::default()
    });
    assert_eq!(concurrency.len(), 3);

    let p0 = suite.filter(&SuiteFilter {
        priority: Some(Priority::P0),
        ..Default::default()
    });
    assert!(p0.cases.iter().all(|case| case.priority == Priority::P0));
    assert!(!p0.is_empty());
}
