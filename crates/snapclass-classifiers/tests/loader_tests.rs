//! Model loader integration tests
//!
//! Retry timing runs on tokio's paused clock, so the 2 s default delay costs
//! nothing in wall time.

mod mock_models;

use candle_core::{DType, Device, Tensor};
use mock_models::{location, manifest, MockBuilder, MockFetcher, RecordingSink, SIX_CLASS};
use snapclass_classifiers::{
    ClassifierConfig, ClassifierSession, DefaultFetcher, InferenceRunner, LayersModelBuilder,
    LoadEvent, ModelLoader, ModelLocation, ModelManifest, NoopSink, RetryPolicy,
};
use snapclass_core::{AttemptError, Error};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn flexible_manifest() -> ModelManifest {
    manifest([None, Some(4), Some(4), Some(3)], 6)
}

fn loader(fetcher: &Arc<MockFetcher>, builder: &Arc<MockBuilder>) -> ModelLoader {
    ModelLoader::new(fetcher.clone(), builder.clone())
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_artifact_exhausts_attempts() {
    let fetcher = Arc::new(MockFetcher::new(flexible_manifest()).always_unreachable());
    let builder = Arc::new(MockBuilder::new(&SIX_CLASS));
    let delay = Duration::from_millis(2000);
    let loader = loader(&fetcher, &builder).with_retry_policy(RetryPolicy::new(4, delay));
    let sink = RecordingSink::default();

    let start = tokio::time::Instant::now();
    let err = loader.load(&location(), &sink).await.unwrap_err();

    match err {
        Error::ModelLoad(load) => {
            assert_eq!(load.attempts, 4);
            assert!(matches!(load.last_cause, AttemptError::NotFound(_)));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(fetcher.probe_count(), 4);
    assert_eq!(fetcher.fetch_count(), 0);
    assert!(builder.built().is_empty());
    assert!(start.elapsed() >= delay * 3);

    let events = sink.events();
    assert_eq!(sink.attempts(), 4);
    assert!(matches!(events.first(), Some(LoadEvent::Started { total_attempts: 4, .. })));
    assert!(matches!(events.last(), Some(LoadEvent::Failed { attempts: 4, .. })));
    let retries = events
        .iter()
        .filter(|e| matches!(e, LoadEvent::Retrying { .. }))
        .count();
    assert_eq!(retries, 3);
}

#[tokio::test(start_paused = true)]
async fn test_success_after_two_failures() {
    let fetcher = Arc::new(MockFetcher::new(flexible_manifest()).with_unreachable(2));
    let builder = Arc::new(MockBuilder::new(&SIX_CLASS));
    let loader = loader(&fetcher, &builder);
    let sink = RecordingSink::default();

    let handle = loader.load(&location(), &sink).await.unwrap();

    assert_eq!(handle.num_classes(), 6);
    assert_eq!(fetcher.probe_count(), 3);
    assert_eq!(sink.attempts(), 3);

    let attempts: Vec<u32> = sink
        .events()
        .iter()
        .filter_map(|e| match e {
            LoadEvent::Attempt { attempt, total } => {
                assert_eq!(*total, 3);
                Some(*attempt)
            }
            _ => None,
        })
        .collect();
    assert_eq!(attempts, vec![1, 2, 3]);
    assert!(matches!(sink.events().last(), Some(LoadEvent::Loaded { attempts: 3 })));

    // the handle is usable right away
    let input = Tensor::zeros((1, 4, 4, 3), DType::F32, &Device::Cpu).unwrap();
    let probabilities = InferenceRunner::run(Some(&handle), &input).unwrap();
    assert_eq!(probabilities, SIX_CLASS.to_vec());
}

#[tokio::test(start_paused = true)]
async fn test_fixed_batch_becomes_flexible() {
    let fetcher = Arc::new(MockFetcher::new(manifest([Some(1), Some(4), Some(4), Some(3)], 6)));
    let builder = Arc::new(MockBuilder::new(&SIX_CLASS));

    let handle = loader(&fetcher, &builder)
        .load(&location(), &NoopSink)
        .await
        .unwrap();

    assert_eq!(handle.input_shape().batch, None);
    assert!(handle.input_shape().has_flexible_batch());

    let built = builder.built();
    assert_eq!(built.len(), 1);
    assert_eq!(built[0].input_shape, vec![None, Some(4), Some(4), Some(3)]);
    assert_eq!(built[0].layers.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_warm_up_runs_once_per_load() {
    let fetcher = Arc::new(MockFetcher::new(flexible_manifest()));
    let builder = Arc::new(MockBuilder::new(&SIX_CLASS));

    loader(&fetcher, &builder).load(&location(), &NoopSink).await.unwrap();
    assert_eq!(builder.predict_calls(), 1);

    loader(&fetcher, &builder)
        .with_warm_up(false)
        .load(&location(), &NoopSink)
        .await
        .unwrap();
    assert_eq!(builder.predict_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_warm_up_failure_is_retried() {
    let fetcher = Arc::new(MockFetcher::new(flexible_manifest()));
    let builder = Arc::new(MockBuilder::new(&SIX_CLASS).with_output_len(2));
    let loader = loader(&fetcher, &builder)
        .with_retry_policy(RetryPolicy::new(2, Duration::from_millis(100)));

    let err = loader.load(&location(), &NoopSink).await.unwrap_err();
    match err {
        Error::ModelLoad(load) => {
            assert_eq!(load.attempts, 2);
            assert!(matches!(load.last_cause, AttemptError::WarmUp(_)));
            assert_eq!(load.last_cause.kind(), "warm_up");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(fetcher.fetch_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_build_failure_reported_as_deserialize() {
    let fetcher = Arc::new(MockFetcher::new(flexible_manifest()));
    let builder = Arc::new(MockBuilder::new(&SIX_CLASS).failing());
    let loader = loader(&fetcher, &builder).with_retry_policy(RetryPolicy::new(1, Duration::ZERO));

    let err = loader.load(&location(), &NoopSink).await.unwrap_err();
    assert!(err.is_load_failure());
    assert!(err.to_string().contains("after 1 attempt(s)"));
    assert!(err.to_string().contains("corrupt weights"));
}

#[tokio::test(start_paused = true)]
async fn test_unbuildable_shape_reported_as_reconstruction_failure() {
    let mut fixed = manifest([Some(1), Some(4), Some(4), Some(3)], 6);
    fixed.layers.clear();
    let fetcher = Arc::new(MockFetcher::new(fixed));
    let builder = Arc::new(MockBuilder::new(&SIX_CLASS));
    let loader = loader(&fetcher, &builder).with_retry_policy(RetryPolicy::new(1, Duration::ZERO));

    match loader.load(&location(), &NoopSink).await.unwrap_err() {
        Error::ModelLoad(load) => {
            assert!(matches!(load.last_cause, AttemptError::ShapeReconstruction(_)))
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(builder.built().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_transfer_and_manifest_failures_are_told_apart() {
    let cases: [(fn() -> Error, &str); 3] = [
        (|| Error::internal("connection reset by peer"), "fetch"),
        (|| Error::internal("Failed to initialize HF API: no home directory"), "fetch"),
        (|| Error::config("Failed to parse model manifest: expected value"), "deserialize"),
    ];

    for (make, kind) in cases {
        let fetcher = Arc::new(MockFetcher::new(flexible_manifest()).with_fetch_error(make));
        let builder = Arc::new(MockBuilder::new(&SIX_CLASS));
        let loader =
            loader(&fetcher, &builder).with_retry_policy(RetryPolicy::new(1, Duration::ZERO));

        match loader.load(&location(), &NoopSink).await.unwrap_err() {
            Error::ModelLoad(load) => assert_eq!(load.last_cause.kind(), kind, "{}", make()),
            other => panic!("unexpected error: {other}"),
        }
        assert!(builder.built().is_empty());
    }
}

#[tokio::test]
async fn test_model_build_leaves_runtime_responsive() {
    let fetcher = Arc::new(MockFetcher::new(flexible_manifest()));
    let builder =
        Arc::new(MockBuilder::new(&SIX_CLASS).with_build_time(Duration::from_millis(300)));
    let loader = loader(&fetcher, &builder);

    // single-threaded runtime: the ticker only runs if the build is off-thread
    let ticks = Arc::new(AtomicU32::new(0));
    let ticker = {
        let ticks = Arc::clone(&ticks);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(10)).await;
                ticks.fetch_add(1, Ordering::SeqCst);
            }
        })
    };

    loader.load(&location(), &NoopSink).await.unwrap();
    ticker.abort();

    assert!(ticks.load(Ordering::SeqCst) >= 5, "ticks: {}", ticks.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_zero_attempt_policy_rejected() {
    let fetcher = Arc::new(MockFetcher::new(flexible_manifest()));
    let builder = Arc::new(MockBuilder::new(&SIX_CLASS));
    let loader = loader(&fetcher, &builder).with_retry_policy(RetryPolicy::new(0, Duration::ZERO));

    let err = loader.load(&location(), &NoopSink).await.unwrap_err();
    assert!(matches!(err, Error::Config(_)));
    assert_eq!(fetcher.probe_count(), 0);
}

/// Write a tiny real model (global average pool + dense head) to `dir`
fn write_safetensors_model(dir: &std::path::Path) {
    let manifest = serde_json::json!({
        "name": "tiny-colour",
        "version": "1",
        "input_shape": [1, 2, 2, 3],
        "layers": [
            {"name": "gap", "type": "global_average_pooling2d"},
            {"name": "head", "type": "dense", "units": 3, "activation": "softmax"}
        ]
    });
    std::fs::write(dir.join("model.json"), manifest.to_string()).unwrap();

    // class 1 responds to red, class 2 weakly so, class 0 not at all
    let weight = Tensor::new(&[[0f32, 0., 0.], [5., 0., 0.], [1., 0., 0.]], &Device::Cpu).unwrap();
    let bias = Tensor::zeros(3, DType::F32, &Device::Cpu).unwrap();
    let tensors: HashMap<String, Tensor> = [
        ("head.weight".to_string(), weight),
        ("head.bias".to_string(), bias),
    ]
    .into_iter()
    .collect();
    candle_core::safetensors::save(&tensors, dir.join("model.safetensors")).unwrap();

    std::fs::write(dir.join("labels.json"), r#"["cat", "dog", "bird"]"#).unwrap();
}

#[tokio::test]
async fn test_safetensors_model_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    write_safetensors_model(dir.path());

    let fetcher = Arc::new(DefaultFetcher::new());
    let builder = Arc::new(LayersModelBuilder::default());
    let location: ModelLocation = dir.path().join("model.json").to_str().unwrap().parse().unwrap();
    let sink = RecordingSink::default();

    let handle = ModelLoader::new(fetcher, builder)
        .load(&location, &sink)
        .await
        .unwrap();

    assert_eq!(handle.name(), "tiny-colour");
    assert_eq!(handle.num_classes(), 3);
    assert_eq!(handle.input_shape().batch, None);
    assert!(sink
        .events()
        .iter()
        .any(|e| matches!(e, LoadEvent::Progress { fraction } if *fraction == 1.0)));
}

#[tokio::test]
async fn test_session_over_safetensors_model() {
    let dir = tempfile::tempdir().unwrap();
    write_safetensors_model(dir.path());

    let mut config = ClassifierConfig::default();
    config.model.location = dir.path().join("model.json").display().to_string();
    config.preprocess.height = 2;
    config.preprocess.width = 2;
    config.labels = Some(dir.path().join("labels.json"));
    config.top_k = 2;

    let session = ClassifierSession::from_config(&config).unwrap();
    session.load(&NoopSink).await.unwrap();
    assert!(session.is_ready());

    let red = image::RgbImage::from_pixel(8, 8, image::Rgb([255, 0, 0]));
    let predictions = session
        .predict(&image::DynamicImage::ImageRgb8(red))
        .unwrap();

    assert_eq!(predictions.len(), 2);
    assert_eq!(predictions[0].index, 1);
    assert_eq!(predictions[0].label, "dog");
    assert_eq!(predictions[1].label, "bird");
    assert!(predictions[0].probability > predictions[1].probability);
}
