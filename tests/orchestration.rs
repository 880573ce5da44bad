mod support;

use std::sync::atomic::Ordering;
use std::time::Duration;

use geopack::{
    AcquireOutcome, FailureKind, Fingerprint, JobStatus, LeaseStore, ProcessingRequest,
    ProcessorRef, ProcessorRegistry, SkipReason, UnitOutcome,
};
use support::helpers::{start_harness, Harness, HarnessOptions};
use support::processors::{descriptor, ScriptedProcessor};

fn request(boundary: &str) -> ProcessingRequest {
    ProcessingRequest::new(
        boundary,
        vec![
            ProcessorRef::new("population", "1"),
            ProcessorRef::new("roads", "2"),
        ],
    )
}

async fn two_processor_harness() -> (
    Harness,
    std::sync::Arc<std::sync::atomic::AtomicUsize>,
    std::sync::Arc<std::sync::atomic::AtomicUsize>,
) {
    let (population, population_runs) = ScriptedProcessor::succeeding();
    let (roads, roads_runs) = ScriptedProcessor::succeeding();
    let registry = ProcessorRegistry::builder()
        .register(descriptor("population", "1"), population)
        .register(descriptor("roads", "2"), roads)
        .build()
        .unwrap();
    let harness = start_harness(registry, HarnessOptions::default()).await;
    (harness, population_runs, roads_runs)
}

#[tokio::test]
async fn empty_backend_run_completes_with_all_resources() {
    let (mut harness, population_runs, roads_runs) = two_processor_harness().await;

    let job_id = harness.orchestrator.submit(&request("KEN")).await.unwrap();
    let result = harness.wait(job_id).await;

    assert_eq!(result.status, JobStatus::Complete);
    assert_eq!(result.resources.len(), 2);
    assert!(result.missing.is_empty());
    assert_eq!(population_runs.load(Ordering::SeqCst), 1);
    assert_eq!(roads_runs.load(Ordering::SeqCst), 1);

    assert!(harness
        .artifact_path("KEN", "population", "1", "KEN_population.tif")
        .exists());
    assert!(harness
        .artifact_path("KEN", "roads", "2", "KEN_roads.tif")
        .exists());

    // Boundary structure from setup, plus the job's provenance document.
    assert!(harness.boundary_file("KEN", "index.html").exists());
    assert!(harness.boundary_file("KEN", "datapackage.json").exists());
    assert!(harness.boundary_file("KEN", "provenance.json").exists());

    let datapackage: serde_json::Value = serde_json::from_slice(
        &std::fs::read(harness.boundary_file("KEN", "datapackage.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(datapackage["resources"].as_array().unwrap().len(), 2);

    harness.orchestrator.stop().await.unwrap();
}

#[tokio::test]
async fn resubmission_after_success_skips_every_unit() {
    let (mut harness, population_runs, roads_runs) = two_processor_harness().await;

    let first = harness.orchestrator.submit(&request("KEN")).await.unwrap();
    assert_eq!(harness.wait(first).await.status, JobStatus::Complete);
    let files_after_first = harness.count_package_files();

    let second = harness.orchestrator.submit(&request("KEN")).await.unwrap();
    let result = harness.wait(second).await;

    assert_eq!(result.status, JobStatus::Complete);
    assert!(result
        .reports
        .iter()
        .all(|report| report.outcome.is_skipped(SkipReason::AlreadyExists)));
    assert!(result.resources.is_empty());

    assert_eq!(
        harness.count_package_files(),
        files_after_first,
        "idempotent resubmission must not add backend files"
    );
    assert_eq!(population_runs.load(Ordering::SeqCst), 1);
    assert_eq!(roads_runs.load(Ordering::SeqCst), 1);

    harness.orchestrator.stop().await.unwrap();
}

#[tokio::test]
async fn externally_held_lease_defers_the_unit() {
    let (mut harness, population_runs, roads_runs) = two_processor_harness().await;

    let fingerprint = Fingerprint::new("KEN", "roads", "2");
    let AcquireOutcome::Granted(_held) = harness
        .leases
        .acquire(&fingerprint, Duration::from_secs(60))
        .await
        .unwrap()
    else {
        panic!("external acquire should be granted");
    };

    let job_id = harness.orchestrator.submit(&request("KEN")).await.unwrap();
    let result = harness.wait(job_id).await;

    // The other unit succeeded, so the deferred unit does not demote the job.
    assert_eq!(result.status, JobStatus::Complete);
    let roads = result
        .reports
        .iter()
        .find(|report| report.unit == "roads.2")
        .expect("roads.2 should report");
    assert!(roads.outcome.is_skipped(SkipReason::LeaseHeld));
    assert_eq!(roads_runs.load(Ordering::SeqCst), 0);
    assert_eq!(population_runs.load(Ordering::SeqCst), 1);
    assert!(!harness
        .artifact_path("KEN", "roads", "2", "KEN_roads.tif")
        .exists());

    harness.orchestrator.stop().await.unwrap();
}

#[tokio::test]
async fn externally_held_lease_beside_a_failure_is_partial() {
    let (population, _) = ScriptedProcessor::failing();
    let (roads, _) = ScriptedProcessor::succeeding();
    let registry = ProcessorRegistry::builder()
        .register(descriptor("population", "1"), population)
        .register(descriptor("roads", "2"), roads)
        .build()
        .unwrap();
    let mut harness = start_harness(registry, HarnessOptions::default()).await;

    let fingerprint = Fingerprint::new("KEN", "roads", "2");
    let AcquireOutcome::Granted(_held) = harness
        .leases
        .acquire(&fingerprint, Duration::from_secs(60))
        .await
        .unwrap()
    else {
        panic!("external acquire should be granted");
    };

    let job_id = harness.orchestrator.submit(&request("KEN")).await.unwrap();
    let result = harness.wait(job_id).await;
    assert_eq!(result.status, JobStatus::PartialFailure);

    harness.orchestrator.stop().await.unwrap();
}

#[tokio::test]
async fn partial_failure_contains_the_sibling_success() {
    let (population, _) = ScriptedProcessor::failing();
    let (roads, _) = ScriptedProcessor::succeeding();
    let registry = ProcessorRegistry::builder()
        .register(descriptor("population", "1"), population)
        .register(descriptor("roads", "2"), roads)
        .build()
        .unwrap();
    let mut harness = start_harness(registry, HarnessOptions::default()).await;

    let job_id = harness.orchestrator.submit(&request("KEN")).await.unwrap();
    let result = harness.wait(job_id).await;

    assert_eq!(result.status, JobStatus::PartialFailure);
    assert_eq!(result.resources.len(), 1);
    assert_eq!(result.resources[0].name, "roads");
    assert!(harness
        .artifact_path("KEN", "roads", "2", "KEN_roads.tif")
        .exists());

    let failure = result
        .reports
        .iter()
        .find(|report| report.unit == "population.1")
        .expect("population.1 should report");
    let UnitOutcome::Failed { kind, detail } = &failure.outcome else {
        panic!("population.1 should fail, got {:?}", failure.outcome);
    };
    assert_eq!(*kind, FailureKind::ProcessorFailure);
    assert!(detail.contains("synthetic generation failure"));

    harness.orchestrator.stop().await.unwrap();
}

#[tokio::test]
async fn all_failed_units_fail_the_job_and_finalise_still_runs() {
    let (population, _) = ScriptedProcessor::failing();
    let (roads, _) = ScriptedProcessor::failing();
    let registry = ProcessorRegistry::builder()
        .register(descriptor("population", "1"), population)
        .register(descriptor("roads", "2"), roads)
        .build()
        .unwrap();
    let mut harness = start_harness(registry, HarnessOptions::default()).await;

    let job_id = harness.orchestrator.submit(&request("KEN")).await.unwrap();
    let result = harness.wait(job_id).await;

    assert_eq!(result.status, JobStatus::Failed);
    assert!(result.resources.is_empty());
    assert!(
        harness.boundary_file("KEN", "provenance.json").exists(),
        "finalise must write provenance even when every unit failed"
    );
    assert!(result
        .provenance
        .get("finalise - status")
        .is_some());

    harness.orchestrator.stop().await.unwrap();
}

#[tokio::test]
async fn panicking_processor_is_contained_as_a_failed_unit() {
    let (population, _) = ScriptedProcessor::panicking();
    let (roads, _) = ScriptedProcessor::succeeding();
    let registry = ProcessorRegistry::builder()
        .register(descriptor("population", "1"), population)
        .register(descriptor("roads", "2"), roads)
        .build()
        .unwrap();
    let mut harness = start_harness(registry, HarnessOptions::default()).await;

    let job_id = harness.orchestrator.submit(&request("KEN")).await.unwrap();
    let result = harness.wait(job_id).await;

    assert_eq!(result.status, JobStatus::PartialFailure);
    let failure = result
        .reports
        .iter()
        .find(|report| report.unit == "population.1")
        .expect("population.1 should report");
    let UnitOutcome::Failed { detail, .. } = &failure.outcome else {
        panic!("population.1 should fail");
    };
    assert!(detail.contains("panicked"));

    harness.orchestrator.stop().await.unwrap();
}

#[tokio::test]
async fn expired_tasks_fail_without_invoking_the_processor() {
    let (population, population_runs) = ScriptedProcessor::succeeding();
    let (roads, roads_runs) = ScriptedProcessor::succeeding();
    let registry = ProcessorRegistry::builder()
        .register(descriptor("population", "1"), population)
        .register(descriptor("roads", "2"), roads)
        .build()
        .unwrap();
    let mut harness = start_harness(
        registry,
        HarnessOptions {
            task_expiry: Duration::from_nanos(1),
            ..HarnessOptions::default()
        },
    )
    .await;

    let job_id = harness.orchestrator.submit(&request("KEN")).await.unwrap();
    let result = harness.wait(job_id).await;

    assert_eq!(result.status, JobStatus::Failed);
    for report in &result.reports {
        let UnitOutcome::Failed { kind, .. } = &report.outcome else {
            panic!("{} should expire, got {:?}", report.unit, report.outcome);
        };
        assert_eq!(*kind, FailureKind::TaskExpired);
    }
    assert_eq!(population_runs.load(Ordering::SeqCst), 0);
    assert_eq!(roads_runs.load(Ordering::SeqCst), 0);
    assert_eq!(harness.orchestrator.telemetry().tasks_expired(), 2);

    harness.orchestrator.stop().await.unwrap();
}

#[tokio::test]
async fn scratch_space_is_removed_on_every_path() {
    let (population, _) = ScriptedProcessor::failing();
    let (roads, _) = ScriptedProcessor::succeeding();
    let registry = ProcessorRegistry::builder()
        .register(descriptor("population", "1"), population)
        .register(descriptor("roads", "2"), roads)
        .build()
        .unwrap();
    let mut harness = start_harness(registry, HarnessOptions::default()).await;

    let job_id = harness.orchestrator.submit(&request("KEN")).await.unwrap();
    harness.wait(job_id).await;

    assert!(
        !harness.processing_root.join("KEN").exists(),
        "finalise must sweep the boundary's scratch tree"
    );

    harness.orchestrator.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_duplicate_requests_converge_on_one_artifact_set() {
    let (population, population_runs) = ScriptedProcessor::slow(Duration::from_millis(150));
    let (roads, roads_runs) = ScriptedProcessor::slow(Duration::from_millis(150));
    let registry = ProcessorRegistry::builder()
        .register(descriptor("population", "1"), population)
        .register(descriptor("roads", "2"), roads)
        .build()
        .unwrap();
    let mut harness = start_harness(
        registry,
        HarnessOptions {
            worker_concurrency: 4,
            ..HarnessOptions::default()
        },
    )
    .await;

    let first = harness.orchestrator.submit(&request("KEN")).await.unwrap();
    let second = harness.orchestrator.submit(&request("KEN")).await.unwrap();

    let first_result = harness.wait(first).await;
    let second_result = harness.wait(second).await;

    // Whichever request lost the lease race defers (or finds the outputs
    // materialized); neither run duplicates work or fails.
    assert_eq!(first_result.status, JobStatus::Complete);
    assert_eq!(second_result.status, JobStatus::Complete);
    assert_eq!(population_runs.load(Ordering::SeqCst), 1);
    assert_eq!(roads_runs.load(Ordering::SeqCst), 1);
    assert!(harness
        .artifact_path("KEN", "population", "1", "KEN_population.tif")
        .exists());

    harness.orchestrator.stop().await.unwrap();
}

#[tokio::test]
async fn unknown_processor_is_rejected_before_any_unit_runs() {
    let (mut harness, population_runs, _) = two_processor_harness().await;

    let bad_request = ProcessingRequest::new(
        "KEN",
        vec![
            ProcessorRef::new("population", "1"),
            ProcessorRef::new("landcover", "9"),
        ],
    );
    let err = harness.orchestrator.submit(&bad_request).await.unwrap_err();
    assert!(format!("{err:#}").contains("unknown processor landcover.9"));

    assert_eq!(population_runs.load(Ordering::SeqCst), 0);
    assert!(
        !harness.boundary_file("KEN", "provenance.json").exists(),
        "a rejected request must not enter the DAG"
    );

    harness.orchestrator.stop().await.unwrap();
}

#[tokio::test]
async fn unknown_boundary_is_rejected() {
    let (mut harness, _, _) = two_processor_harness().await;

    let err = harness
        .orchestrator
        .submit(&request("ATLANTIS"))
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("boundary ATLANTIS not found"));

    harness.orchestrator.stop().await.unwrap();
}

#[tokio::test]
async fn shutdown_mid_job_finalises_with_an_incomplete_aggregate() {
    let (population, _) = ScriptedProcessor::slow(Duration::from_millis(300));
    let (roads, _) = ScriptedProcessor::slow(Duration::from_millis(300));
    let registry = ProcessorRegistry::builder()
        .register(descriptor("population", "1"), population)
        .register(descriptor("roads", "2"), roads)
        .build()
        .unwrap();
    let mut harness = start_harness(
        registry,
        HarnessOptions {
            worker_concurrency: 1,
            ..HarnessOptions::default()
        },
    )
    .await;

    let job_id = harness.orchestrator.submit(&request("KEN")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    harness.orchestrator.stop().await.unwrap();

    let result = harness
        .orchestrator
        .result(job_id)
        .expect("finalise must publish a result even on shutdown");
    assert_eq!(result.status, JobStatus::PartialFailure);
    assert!(
        !result.missing.is_empty(),
        "units dropped at shutdown must surface as missing"
    );
}

#[tokio::test]
async fn result_is_polled_by_correlation_id() {
    let (mut harness, _, _) = two_processor_harness().await;

    let job_id = harness.orchestrator.submit(&request("TZA")).await.unwrap();
    let awaited = harness.wait(job_id).await;
    let polled = harness
        .orchestrator
        .result(job_id)
        .expect("result should be available after completion");

    assert_eq!(polled.job_id, awaited.job_id);
    assert_eq!(polled.status, JobStatus::Complete);
    assert_eq!(polled.boundary, "TZA");

    let unknown = harness.orchestrator.result(uuid::Uuid::new_v4());
    assert!(unknown.is_none());

    harness.orchestrator.stop().await.unwrap();
}
