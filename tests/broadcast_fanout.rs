//! Listener fan-out: engine cost is per chunk, never per listener.

use commentcast::config::Config;
use commentcast::engines::{Engines, MockRewriter, MockSynthesizer, MockTranscriber};
use commentcast::pipeline::{
    AudioArtifact, Broadcaster, CommentaryUnit, DeliveryEvent, EventCategory, PipelineController,
    SessionState,
};
use commentcast::source::VecChunkSource;
use std::sync::Arc;

const CHUNKS: u64 = 5;

fn config() -> Config {
    let mut config = Config::default();
    config.retry.initial_backoff_ms = 1;
    config.retry.max_backoff_ms = 2;
    config.context.enabled = false;
    config
}

async fn run_with_listeners(listeners: usize) -> (Arc<MockRewriter>, Arc<MockSynthesizer>, Vec<Vec<DeliveryEvent>>) {
    let transcriber = (0..CHUNKS).fold(MockTranscriber::new("mock"), |t, seq| {
        t.with_response_for(seq, &format!("Lap {} complete.", seq))
    });
    let rewriter = Arc::new(MockRewriter::new());
    let synthesizer = Arc::new(MockSynthesizer::new());
    let engines = Engines {
        transcriber: Arc::new(transcriber),
        rewriter: rewriter.clone(),
        synthesizer: synthesizer.clone(),
    };
    let controller = PipelineController::new(config(), engines);
    let mut subscriptions: Vec<_> = (0..listeners).map(|_| controller.subscribe()).collect();

    let mut handle = controller
        .start_with_source(Box::new(VecChunkSource::quiet(CHUNKS)), "fan-out")
        .await
        .unwrap();
    assert_eq!(handle.wait().await, SessionState::Stopped);

    let received = subscriptions.iter_mut().map(|s| s.drain()).collect();
    (rewriter, synthesizer, received)
}

fn texts(events: &[DeliveryEvent]) -> Vec<u64> {
    events
        .iter()
        .filter(|e| matches!(e, DeliveryEvent::Text { .. }))
        .filter_map(DeliveryEvent::sequence)
        .collect()
}

#[tokio::test]
async fn engine_calls_do_not_depend_on_listener_count() {
    for listeners in [0usize, 1, 50] {
        let (rewriter, synthesizer, received) = run_with_listeners(listeners).await;
        assert_eq!(rewriter.calls(), CHUNKS as usize, "{} listeners", listeners);
        assert_eq!(synthesizer.calls(), CHUNKS as usize, "{} listeners", listeners);

        assert_eq!(received.len(), listeners);
        for events in &received {
            assert_eq!(texts(events), (0..CHUNKS).collect::<Vec<_>>());
        }
    }
}

#[tokio::test]
async fn every_listener_shares_the_same_audio_bytes() {
    let (_, _, received) = run_with_listeners(3).await;
    let first_audio = |events: &[DeliveryEvent]| {
        events.iter().find_map(|e| match e {
            DeliveryEvent::Audio { audio, .. } => Some(Arc::clone(audio)),
            _ => None,
        })
    };
    let a = first_audio(&received[0]).unwrap();
    let b = first_audio(&received[2]).unwrap();
    assert!(Arc::ptr_eq(&a, &b));
}

fn artifact(sequence: u64) -> AudioArtifact {
    let unit = CommentaryUnit {
        sequence,
        english: format!("Lap {}", sequence),
        telugu: format!("ల్యాప్ {}", sequence),
        category: EventCategory::Info,
        context: None,
        fallback: false,
    };
    AudioArtifact::from_unit(&unit, Arc::from(vec![1u8, 2, 3]), "audio/wav")
}

#[tokio::test]
async fn late_subscriber_gets_no_backfill() {
    let broadcaster = Broadcaster::new();
    let mut early = broadcaster.subscribe();
    broadcaster.publish(&artifact(0));

    let mut late = broadcaster.subscribe();
    broadcaster.publish(&artifact(1));

    assert_eq!(texts(&early.drain()), vec![0, 1]);
    assert_eq!(texts(&late.drain()), vec![1]);
}

#[tokio::test]
async fn disconnected_listener_does_not_block_others() {
    let broadcaster = Broadcaster::new();
    let mut kept = broadcaster.subscribe();
    let gone = broadcaster.subscribe();
    drop(gone);

    let delivered = broadcaster.publish(&artifact(0));
    assert_eq!(delivered, 1);
    assert_eq!(broadcaster.listener_count(), 1);
    assert_eq!(texts(&kept.drain()), vec![0]);
}

#[tokio::test]
async fn slow_listener_is_dropped_instead_of_stalling_the_pipeline() {
    let broadcaster = Broadcaster::with_capacity(4);
    let _stalled = broadcaster.subscribe();
    let mut reading = broadcaster.subscribe();

    for sequence in 0..10 {
        broadcaster.publish(&artifact(sequence));
        reading.drain();
    }

    assert_eq!(broadcaster.listener_count(), 1);
    assert_eq!(broadcaster.listeners_dropped(), 1);
    assert_eq!(broadcaster.artifacts_published(), 10);
}
