//! End-to-end ordering through the controller with scripted engines.

use commentcast::config::Config;
use commentcast::engines::{Engines, MockRewriter, MockSynthesizer, MockTranscriber};
use commentcast::pipeline::{DeliveryEvent, PipelineController, SessionState};
use commentcast::source::VecChunkSource;
use commentcast::CommentaryError;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn config() -> Config {
    let mut config = Config::default();
    config.pipeline.max_hold_ms = 5000;
    config.pipeline.drain_grace_ms = 5000;
    config.retry.initial_backoff_ms = 1;
    config.retry.max_backoff_ms = 2;
    config.transcription.max_wait_ms = 200;
    config.context.enabled = false;
    config
}

fn line(sequence: u64) -> String {
    format!("Line {}.", sequence)
}

/// One complete sentence per chunk, so every chunk yields its own unit.
fn transcriber(count: u64) -> MockTranscriber {
    (0..count).fold(MockTranscriber::new("mock"), |t, seq| {
        t.with_response_for(seq, &line(seq))
    })
}

/// Small deterministic generator so delays vary without a rand dependency.
struct Lcg(u64);

impl Lcg {
    fn next_ms(&mut self, max: u64) -> u64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (self.0 >> 33) % max
    }
}

fn text_sequences(events: &[DeliveryEvent]) -> Vec<u64> {
    events
        .iter()
        .filter_map(|e| match e {
            DeliveryEvent::Text { sequence, .. } => Some(*sequence),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn results_are_released_in_chunk_order_despite_random_latency() {
    const CHUNKS: u64 = 20;

    for seed in [7u64, 42, 1234] {
        let mut rng = Lcg(seed);
        let mut rewriter = MockRewriter::new();
        let mut synthesizer = MockSynthesizer::new();
        for seq in 0..CHUNKS {
            let needle = line(seq);
            rewriter = rewriter.with_delay_when(&needle, Duration::from_millis(rng.next_ms(60)));
            synthesizer =
                synthesizer.with_delay_when(&needle, Duration::from_millis(rng.next_ms(60)));
        }

        let engines = Engines {
            transcriber: Arc::new(transcriber(CHUNKS)),
            rewriter: Arc::new(rewriter),
            synthesizer: Arc::new(synthesizer),
        };
        let controller = PipelineController::new(config(), engines);
        let mut listener = controller.subscribe();

        let mut handle = controller
            .start_with_source(Box::new(VecChunkSource::quiet(CHUNKS)), "ordering")
            .await
            .unwrap();
        assert_eq!(handle.wait().await, SessionState::Stopped);

        let events = listener.drain();
        assert_eq!(
            text_sequences(&events),
            (0..CHUNKS).collect::<Vec<_>>(),
            "seed {}",
            seed
        );
        assert!(
            !events
                .iter()
                .any(|e| matches!(e, DeliveryEvent::BeatSkipped { .. })),
            "seed {}",
            seed
        );

        let health = controller.health();
        assert_eq!(health.chunks_admitted, CHUNKS);
        assert_eq!(health.artifacts_released, CHUNKS);
        assert_eq!(health.beats_skipped, 0);
    }
}

#[tokio::test]
async fn audio_follows_text_for_each_sequence() {
    let engines = Engines {
        transcriber: Arc::new(transcriber(3)),
        rewriter: Arc::new(MockRewriter::new().with_delay_when("Line 0.", Duration::from_millis(80))),
        synthesizer: Arc::new(MockSynthesizer::new()),
    };
    let controller = PipelineController::new(config(), engines);
    let mut listener = controller.subscribe();

    let mut handle = controller
        .start_with_source(Box::new(VecChunkSource::quiet(3)), "pairs")
        .await
        .unwrap();
    handle.wait().await;

    let artifact_events: Vec<(u64, bool)> = listener
        .drain()
        .into_iter()
        .filter_map(|e| match e {
            DeliveryEvent::Text { sequence, .. } => Some((sequence, false)),
            DeliveryEvent::Audio { sequence, .. } => Some((sequence, true)),
            _ => None,
        })
        .collect();
    assert_eq!(
        artifact_events,
        vec![(0, false), (0, true), (1, false), (1, true), (2, false), (2, true)]
    );
}

#[tokio::test]
async fn stuck_chunk_is_skipped_after_max_hold() {
    let mut config = config();
    config.pipeline.max_hold_ms = 200;

    let engines = Engines {
        transcriber: Arc::new(transcriber(4)),
        rewriter: Arc::new(
            MockRewriter::new().with_delay_when("Line 1.", Duration::from_millis(1500)),
        ),
        synthesizer: Arc::new(MockSynthesizer::new()),
    };
    let controller = PipelineController::new(config, engines);
    let mut listener = controller.subscribe();

    let started = Instant::now();
    let mut handle = controller
        .start_with_source(Box::new(VecChunkSource::quiet(4)), "stuck")
        .await
        .unwrap();

    // The placeholder for 1 arrives long before the slow rewrite finishes.
    let skipped_at = loop {
        let event = tokio::time::timeout(Duration::from_secs(5), listener.recv())
            .await
            .unwrap()
            .unwrap();
        if event == (DeliveryEvent::BeatSkipped { sequence: 1 }) {
            break started.elapsed();
        }
    };
    assert!(skipped_at < Duration::from_millis(1200), "{:?}", skipped_at);

    assert_eq!(handle.wait().await, SessionState::Stopped);
    let remaining = listener.drain();
    assert_eq!(text_sequences(&remaining), vec![2, 3]);

    let health = controller.health();
    assert_eq!(health.beats_skipped, 1);
    assert_eq!(health.late_discarded, 1);
    assert_eq!(health.artifacts_released, 3);
}

#[tokio::test]
async fn only_one_of_many_concurrent_starts_wins() {
    let engines = Engines {
        transcriber: Arc::new(transcriber(1)),
        rewriter: Arc::new(MockRewriter::new()),
        synthesizer: Arc::new(MockSynthesizer::new()),
    };
    let controller = Arc::new(PipelineController::new(config(), engines));

    let attempts: Vec<_> = (0..16)
        .map(|i| {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move {
                controller
                    .start_with_source(
                        Box::new(VecChunkSource::quiet(1).hold_open()),
                        &format!("race {}", i),
                    )
                    .await
                    .map(|handle| handle.id())
            })
        })
        .collect();

    let mut winners = Vec::new();
    let mut rejected = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok(id) => winners.push(id),
            Err(CommentaryError::AlreadyRunning) => rejected += 1,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    assert_eq!(winners.len(), 1);
    assert_eq!(rejected, 15);

    let stopped = controller.stop().await.unwrap();
    assert_eq!(stopped.id, winners[0]);
    assert_eq!(stopped.state, SessionState::Stopped);
}

#[tokio::test]
async fn stop_drains_in_flight_units() {
    let engines = Engines {
        transcriber: Arc::new(transcriber(3)),
        rewriter: Arc::new(MockRewriter::new().with_delay_when("Line 2.", Duration::from_millis(150))),
        synthesizer: Arc::new(MockSynthesizer::new()),
    };
    let controller = PipelineController::new(config(), engines);
    let mut listener = controller.subscribe();

    let mut handle = controller
        .start_with_source(Box::new(VecChunkSource::quiet(3).hold_open()), "drain")
        .await
        .unwrap();

    // Wait until the third chunk is in the pipeline, then stop.
    for _ in 0..100 {
        if controller.health().chunks_admitted == 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    controller.stop().await.unwrap();
    assert_eq!(handle.wait().await, SessionState::Stopped);

    let events = listener.drain();
    assert_eq!(text_sequences(&events), vec![0, 1, 2]);
    let statuses: Vec<SessionState> = events
        .iter()
        .filter_map(|e| match e {
            DeliveryEvent::SessionStatus { state, .. } => Some(*state),
            _ => None,
        })
        .collect();
    assert_eq!(statuses.last(), Some(&SessionState::Stopped));
}
