//! Pipeline orchestration behaviour seen from a result-stream consumer

mod common;

use common::{strings, CallLog, ConcurrencyProbe, SuffixStage};
use corebit::config::{BatchFailurePolicy, PipelineConfig};
use corebit::error::{CorebitError, StagePhase};
use corebit::pipeline::{ParallelMapStage, Pipeline, Stage};
use futures::StreamExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn two_stage_pipeline(log: &CallLog, batch_size: i64) -> Pipeline<String> {
    let stages = vec![
        SuffixStage::new("A", "A", log).into_stage(),
        SuffixStage::new("B", "B", log).into_stage(),
    ];
    Pipeline::new("suffixes", stages, batch_size, 2).unwrap()
}

/// Two stages over three elements in batches of two
#[tokio::test]
async fn test_batches_flow_through_stages_in_order() {
    let log = CallLog::default();
    let pipeline = two_stage_pipeline(&log, 2);

    let mut run = pipeline.call(strings(&["x", "y", "z"]), None);
    assert_eq!(run.next().await.unwrap().unwrap(), strings(&["xAB", "yAB"]));
    assert_eq!(run.next().await.unwrap().unwrap(), strings(&["zAB"]));
    assert!(run.next().await.is_none());

    assert_eq!(
        log.events(),
        strings(&[
            "A.initialize",
            "B.initialize",
            "A.process",
            "B.process",
            "A.process",
            "B.process",
            "A.finalize",
            "B.finalize",
        ])
    );
}

/// Non-positive batch sizes put the whole input in a single batch
#[tokio::test]
async fn test_non_positive_batch_size_means_single_batch() {
    for batch_size in [0, -1, -50] {
        let log = CallLog::default();
        let pipeline = two_stage_pipeline(&log, batch_size);

        let outcome = pipeline
            .call(strings(&["a", "b", "c", "d", "e"]), None)
            .drain()
            .await;

        assert!(outcome.is_success());
        assert_eq!(outcome.batches, 1, "batch size {batch_size}");
        assert_eq!(outcome.elements.len(), 5);
        assert_eq!(log.count("A.process"), 1);
    }
}

#[tokio::test]
async fn test_empty_input_emits_nothing() {
    let log = CallLog::default();
    let pipeline = two_stage_pipeline(&log, 2);

    let outcome = pipeline.call(Vec::new(), None).drain().await;

    assert!(outcome.is_success());
    assert_eq!(outcome.batches, 0);
    assert_eq!(log.count("A.process"), 0);
    assert_eq!(log.count("A.finalize"), 1);
}

/// A failure on the second batch keeps the first batch's results and still finalizes everything
#[tokio::test]
async fn test_failure_mid_run_ends_stream_with_single_error() {
    let log = CallLog::default();
    let stages = vec![
        SuffixStage::new("A", "A", &log).into_stage(),
        SuffixStage::new("B", "B", &log)
            .failing_on_batch(2)
            .into_stage(),
    ];
    let pipeline = Pipeline::new("failing", stages, 1, 2).unwrap();

    let items: Vec<_> = pipeline
        .call(strings(&["x", "y", "z"]), None)
        .collect()
        .await;

    assert_eq!(items.len(), 2);
    assert_eq!(items[0].as_ref().unwrap(), &strings(&["xAB"]));
    match &items[1] {
        Err(CorebitError::Stage { stage, phase, message }) => {
            assert_eq!(stage, "B");
            assert_eq!(*phase, StagePhase::Process);
            assert!(message.contains("rejected batch 2"));
        }
        other => panic!("expected stage error, got {other:?}"),
    }

    // The third batch never started
    assert_eq!(log.count("A.process"), 2);
    assert_eq!(log.count("A.finalize"), 1);
    assert_eq!(log.count("B.finalize"), 1);
}

/// Stages after the one that failed to initialize are neither initialized nor finalized
#[tokio::test]
async fn test_initialize_failure_finalizes_only_attempted_stages() {
    let log = CallLog::default();
    let stages = vec![
        SuffixStage::new("A", "A", &log)
            .failing_initialize()
            .into_stage(),
        SuffixStage::new("B", "B", &log).into_stage(),
    ];
    let pipeline = Pipeline::new("cold", stages, 2, 2).unwrap();

    let items: Vec<_> = pipeline.call(strings(&["x"]), None).collect().await;

    assert_eq!(items.len(), 1);
    assert!(matches!(
        &items[0],
        Err(CorebitError::Stage { stage, phase: StagePhase::Initialize, .. }) if stage == "A"
    ));
    assert_eq!(log.count("B.initialize"), 0);
    assert_eq!(log.count("A.process"), 0);
    assert_eq!(log.count("A.finalize"), 1);
    assert_eq!(log.count("B.finalize"), 0);
}

#[tokio::test]
async fn test_already_cancelled_token_touches_no_stage() {
    let log = CallLog::default();
    let pipeline = two_stage_pipeline(&log, 1);
    let token = CancellationToken::new();
    token.cancel();

    let items: Vec<_> = pipeline.call(strings(&["x"]), Some(token)).collect().await;

    assert_eq!(items.len(), 1);
    assert!(matches!(&items[0], Err(CorebitError::Cancelled { .. })));
    assert!(log.events().is_empty(), "unexpected calls {:?}", log.events());
}

/// A stage panicking on the second batch ends the stream with an attributed error
#[tokio::test]
async fn test_stage_panic_ends_stream_with_stage_error() {
    let log = CallLog::default();
    let stages = vec![
        SuffixStage::new("A", "A", &log).into_stage(),
        SuffixStage::new("B", "B", &log)
            .panicking_on_batch(2)
            .into_stage(),
    ];
    let pipeline = Pipeline::new("fragile", stages, 1, 2).unwrap();

    let items: Vec<_> = pipeline
        .call(strings(&["x", "y", "z"]), None)
        .collect()
        .await;

    assert_eq!(items.len(), 2);
    assert_eq!(items[0].as_ref().unwrap(), &strings(&["xAB"]));
    match &items[1] {
        Err(CorebitError::Stage { stage, phase, message }) => {
            assert_eq!(stage, "B");
            assert_eq!(*phase, StagePhase::Process);
            assert!(message.contains("lost its adapter on batch 2"), "{message}");
        }
        other => panic!("expected stage error, got {other:?}"),
    }
    assert_eq!(log.count("A.finalize"), 1);
    assert_eq!(log.count("B.finalize"), 1);

    // Later runs hit the same panic instead of silently truncating
    let again = pipeline.call(strings(&["x", "y", "z"]), None).collect_elements().await;
    assert!(matches!(again, Err(CorebitError::Stage { ref stage, .. }) if stage == "B"));
    assert_eq!(log.count("B.finalize"), 2);
}

#[tokio::test]
async fn test_transform_panic_is_reported_and_finalizes() {
    let log = CallLog::default();
    let pipeline = two_stage_pipeline(&log, 2).with_transform(|elements: Vec<String>| {
        if elements.iter().any(|e| e == "bad") {
            panic!("unparseable reading");
        }
        elements
    });

    let outcome = pipeline.call(strings(&["x", "bad"]), None).drain().await;

    assert_eq!(outcome.batches, 0);
    match outcome.error {
        Some(CorebitError::Stage { stage, message, .. }) => {
            assert_eq!(stage, "transform");
            assert!(message.contains("unparseable reading"), "{message}");
        }
        other => panic!("expected transform error, got {other:?}"),
    }
    assert_eq!(log.count("A.process"), 0);
    assert_eq!(log.count("A.finalize"), 1);
    assert_eq!(log.count("B.finalize"), 1);
}

#[tokio::test]
async fn test_finalize_failure_is_reported_after_all_batches() {
    let log = CallLog::default();
    let stages = vec![
        SuffixStage::new("A", "A", &log)
            .failing_finalize()
            .into_stage(),
        SuffixStage::new("B", "B", &log).into_stage(),
    ];
    let pipeline = Pipeline::new("leaky", stages, 1, 2).unwrap();

    let outcome = pipeline.call(strings(&["x", "y"]), None).drain().await;

    assert_eq!(outcome.batches, 2);
    assert_eq!(outcome.elements, strings(&["xAB", "yAB"]));
    assert!(matches!(
        outcome.error,
        Some(CorebitError::Stage { phase: StagePhase::Finalize, .. })
    ));
    assert_eq!(log.count("B.finalize"), 1);
}

#[tokio::test]
async fn test_skip_batch_policy_continues_after_failure() {
    let log = CallLog::default();
    let stages = vec![SuffixStage::new("A", "A", &log)
        .failing_on_batch(2)
        .into_stage()];
    let pipeline = Pipeline::new("tolerant", stages, 1, 1)
        .unwrap()
        .with_failure_policy(BatchFailurePolicy::SkipBatch);

    let items: Vec<_> = pipeline
        .call(strings(&["x", "y", "z"]), None)
        .collect()
        .await;

    assert_eq!(items.len(), 3);
    assert_eq!(items[0].as_ref().unwrap(), &strings(&["xA"]));
    assert_eq!(items[1].as_ref().unwrap(), &strings(&["zA"]));
    assert!(items[2].is_err());
}

/// Every call initializes and finalizes each stage exactly once, independently of earlier calls
#[tokio::test]
async fn test_repeated_calls_are_independent() {
    let log = CallLog::default();
    let stages = vec![SuffixStage::new("A", "A", &log)
        .failing_on_batch(2)
        .into_stage()];
    let pipeline = Pipeline::new("again", stages, 1, 1).unwrap();

    for _ in 0..3 {
        let outcome = pipeline.call(strings(&["x", "y"]), None).drain().await;
        assert_eq!(outcome.elements, strings(&["xA"]));
        assert!(outcome.error.is_some());
    }

    assert_eq!(log.count("A.initialize"), 3);
    assert_eq!(log.count("A.finalize"), 3);
}

#[tokio::test]
async fn test_runs_have_distinct_ids() {
    let log = CallLog::default();
    let pipeline = two_stage_pipeline(&log, 2);

    let first = pipeline.call(strings(&["x"]), None);
    let second = pipeline.call(strings(&["x"]), None);
    assert_ne!(first.run_id(), second.run_id());
    assert_eq!(first.pipeline_name(), "suffixes");

    assert_eq!(first.collect_elements().await.unwrap(), strings(&["xAB"]));
    assert_eq!(second.collect_elements().await.unwrap(), strings(&["xAB"]));
}

/// The producer works at most one batch ahead of a slow consumer
#[tokio::test]
async fn test_results_are_produced_lazily() {
    let log = CallLog::default();
    let stages = vec![SuffixStage::new("A", "A", &log).into_stage()];
    let pipeline = Pipeline::new("lazy", stages, 1, 1).unwrap();

    let elements: Vec<String> = (0..10).map(|i| i.to_string()).collect();
    let mut run = pipeline.call(elements, None);
    assert_eq!(run.next().await.unwrap().unwrap(), strings(&["0A"]));

    tokio::time::sleep(Duration::from_millis(50)).await;
    let processed = log.count("A.process");
    assert!(processed <= 3, "producer ran {processed} batches ahead");

    let rest: Vec<_> = run.collect().await;
    assert_eq!(rest.len(), 9);
    assert_eq!(log.count("A.process"), 10);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_ends_with_cancelled_and_finalizes() {
    let log = CallLog::default();
    let stages = vec![
        SuffixStage::new("A", "A", &log)
            .with_delay(Duration::from_secs(60))
            .into_stage(),
        SuffixStage::new("B", "B", &log).into_stage(),
    ];
    let pipeline = Pipeline::new("stuck", stages, 1, 1).unwrap();

    let mut run = pipeline.call(strings(&["x", "y"]), None);
    tokio::time::sleep(Duration::from_millis(10)).await;
    run.cancel();

    let item = run.next().await.unwrap();
    assert!(matches!(item, Err(CorebitError::Cancelled { ref pipeline }) if pipeline == "stuck"));
    assert!(run.next().await.is_none());
    assert_eq!(log.count("A.finalize"), 1);
    assert_eq!(log.count("B.finalize"), 1);
    assert_eq!(log.count("B.process"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_dropping_the_stream_cancels_the_run() {
    let log = CallLog::default();
    let stages = vec![SuffixStage::new("A", "A", &log)
        .with_delay(Duration::from_secs(60))
        .into_stage()];
    let pipeline = Pipeline::new("abandoned", stages, 1, 1).unwrap();

    let run = pipeline.call(strings(&["x", "y"]), None);
    tokio::time::sleep(Duration::from_millis(10)).await;
    drop(run);

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(log.count("A.process"), 1);
    assert_eq!(log.count("A.finalize"), 1);
}

/// Pool units of a cancelled run never run on after the stream has ended
#[tokio::test(start_paused = true)]
async fn test_cancelled_run_stops_its_pool_units() {
    let started = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicUsize::new(0));
    let (started_units, finished_units) = (Arc::clone(&started), Arc::clone(&finished));
    let pairing = ParallelMapStage::new("pair", move |device: String| {
        let started = Arc::clone(&started_units);
        let finished = Arc::clone(&finished_units);
        async move {
            started.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(5)).await;
            finished.fetch_add(1, Ordering::SeqCst);
            Ok(device)
        }
    });
    let stages: Vec<Arc<dyn Stage<String>>> = vec![Arc::new(pairing)];
    let pipeline = Pipeline::new("pairing", stages, 0, 2).unwrap();

    let mut run = pipeline.call(strings(&["a", "b", "c", "d"]), None);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(started.load(Ordering::SeqCst), 2);
    run.cancel();

    assert!(matches!(run.next().await, Some(Err(CorebitError::Cancelled { .. }))));
    assert!(run.next().await.is_none());

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(started.load(Ordering::SeqCst), 2);
    assert_eq!(finished.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_worker_pool_bounds_unit_concurrency() {
    let probe = Arc::new(ConcurrencyProbe::default());
    let stages: Vec<Arc<dyn Stage<u32>>> = vec![probe.clone()];
    let pipeline = Pipeline::new("probe", stages, 40, 3).unwrap();

    let output = pipeline
        .call((0..100).collect(), None)
        .collect_elements()
        .await
        .unwrap();

    assert_eq!(output, (0..100).collect::<Vec<u32>>());
    assert!(probe.peak() >= 1);
    assert!(probe.peak() <= 3, "peak {}", probe.peak());
}

#[tokio::test]
async fn test_pipeline_from_config_applies_every_setting() {
    let log = CallLog::default();
    let config = PipelineConfig {
        name: "configured".to_string(),
        batch_size: 4,
        worker_count: 0,
        pool_acquire_timeout_ms: Some(250),
        failure_policy: BatchFailurePolicy::SkipBatch,
    };
    let stages = vec![
        SuffixStage::new("A", "A", &log).into_stage(),
        SuffixStage::new("B", "B", &log).into_stage(),
    ];

    let pipeline = Pipeline::from_config(stages, &config).unwrap();
    assert_eq!(pipeline.name(), "configured");
    assert_eq!(pipeline.batch_size(), Some(4));
    assert_eq!(pipeline.worker_count(), 2);
    assert_eq!(pipeline.failure_policy(), BatchFailurePolicy::SkipBatch);
}

#[tokio::test]
async fn test_transform_runs_once_before_batching() {
    let log = CallLog::default();
    let pipeline = two_stage_pipeline(&log, 2).with_transform(|mut elements: Vec<String>| {
        elements.reverse();
        elements.push("w".to_string());
        elements
    });

    let outcome = pipeline.call(strings(&["x", "y", "z"]), None).drain().await;
    assert_eq!(outcome.batches, 2);
    assert_eq!(outcome.elements, strings(&["zAB", "yAB", "xAB", "wAB"]));
}

#[test]
fn test_empty_stage_list_is_rejected() {
    let err = Pipeline::<String>::new("nothing", Vec::new(), 1, 1).unwrap_err();
    assert!(matches!(err, CorebitError::Configuration { .. }));
}
