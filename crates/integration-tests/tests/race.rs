mod harness;

use std::time::{Duration, Instant};

use harness::config::ConfigBuilder;
use harness::mock_image::MockImageBackend;
use muse_config::CombinePolicy;
use muse_imagegen::{GenerationRequest, ImageGenError};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn fastest_backend_wins() {
    let slow = MockImageBackend::start(b"SLOW", Duration::from_millis(800)).await.unwrap();
    let fast = MockImageBackend::start(b"FAST", Duration::from_millis(100)).await.unwrap();
    let broken = MockImageBackend::start_broken(Duration::from_millis(10)).await.unwrap();

    let (imagegen, _) = ConfigBuilder::new()
        .with_worker_provider("slow", &slow.url())
        .with_worker_provider("fast", &fast.url())
        .with_worker_provider("broken", &broken.url())
        .build();
    let race = muse_imagegen::build_race(&imagegen, None).unwrap();

    let start = Instant::now();
    let image = race
        .generate(&GenerationRequest::new("a cat"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(image, b"FAST");
    assert!(start.elapsed() < Duration::from_millis(700));
    assert_eq!(slow.request_count(), 1);
    assert_eq!(broken.request_count(), 1);
    assert_eq!(fast.prompts(), vec!["a cat".to_owned()]);
}

#[tokio::test]
async fn all_backends_failing_reports_every_cause() {
    let first = MockImageBackend::start_broken(Duration::from_millis(10)).await.unwrap();
    let second = MockImageBackend::start_broken(Duration::from_millis(50)).await.unwrap();

    let (imagegen, _) = ConfigBuilder::new()
        .with_worker_provider("first", &first.url())
        .with_worker_provider("second", &second.url())
        .build();
    let race = muse_imagegen::build_race(&imagegen, None).unwrap();

    let err = race
        .generate(&GenerationRequest::new("a cat"), &CancellationToken::new())
        .await
        .unwrap_err();

    let ImageGenError::AllProvidersFailed { failures } = &err else {
        panic!("expected aggregate failure, got {err:?}");
    };
    assert_eq!(failures.len(), 2);
    assert!(failures.iter().all(|f| matches!(f.error, ImageGenError::ProviderApiError { status: 500, .. })));
    assert!(!err.is_timeout());
}

#[tokio::test]
async fn deadline_beats_slow_backends() {
    let slow = MockImageBackend::start(b"SLOW", Duration::from_secs(5)).await.unwrap();

    let (imagegen, _) = ConfigBuilder::new().with_worker_provider("slow", &slow.url()).build();
    let race = muse_imagegen::build_race(&imagegen, None).unwrap();

    let request = GenerationRequest::new("a cat").with_deadline(tokio::time::Instant::now() + Duration::from_millis(200));

    let start = Instant::now();
    let err = race.generate(&request, &CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err, ImageGenError::DeadlineExceeded));
    assert!(err.is_timeout());
    assert!(start.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn fallback_tries_backends_in_order() {
    let broken = MockImageBackend::start_broken(Duration::from_millis(10)).await.unwrap();
    let good = MockImageBackend::start(b"GOOD", Duration::from_millis(10)).await.unwrap();
    let unused = MockImageBackend::start(b"UNUSED", Duration::from_millis(10)).await.unwrap();

    let (imagegen, _) = ConfigBuilder::new()
        .with_policy(CombinePolicy::Fallback)
        .with_worker_provider("broken", &broken.url())
        .with_worker_provider("good", &good.url())
        .with_worker_provider("unused", &unused.url())
        .build();
    let race = muse_imagegen::build_race(&imagegen, None).unwrap();

    let image = race
        .generate(&GenerationRequest::new("a cat"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(image, b"GOOD");
    assert_eq!(broken.request_count(), 1);
    assert_eq!(unused.request_count(), 0);
}
