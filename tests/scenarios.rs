//! Race-day scenarios: context-driven classification, stale context and
//! synthesis outages.

use commentcast::config::Config;
use commentcast::context::{ContextCache, MockRaceData};
use commentcast::dataset::DatasetRecord;
use commentcast::engines::{Engines, MockRewriter, MockSynthesizer, MockTranscriber};
use commentcast::pipeline::{
    ArtifactKind, AudioArtifact, ChunkOutcome, CommentaryUnit, ContextSnapshot, DeliveryEvent,
    DriverPosition, EventCategory, PipelineController, ReorderBuffer, SessionState,
};
use commentcast::source::VecChunkSource;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::Instant;

fn config() -> Config {
    let mut config = Config::default();
    config.pipeline.max_hold_ms = 5000;
    config.retry.initial_backoff_ms = 1;
    config.retry.max_backoff_ms = 2;
    config.context.enabled = false;
    config
}

fn grid(first: &str, second: &str, lap: u32) -> ContextSnapshot {
    ContextSnapshot::new(
        lap,
        57,
        vec![
            DriverPosition::new(1, first, "Team A"),
            DriverPosition::new(2, second, "Team B"),
        ],
    )
}

#[tokio::test]
async fn overtake_for_the_lead_is_hype_and_logged_verbatim() {
    let english = "Verstappen overtakes into turn 1";
    let dir = TempDir::new().unwrap();
    let mut config = config();
    config.dataset.enabled = true;
    config.dataset.dir = Some(dir.path().to_path_buf());

    let context = Arc::new(ContextCache::new());
    context.publish(grid("Lando Norris", "Max Verstappen", 10));
    context.publish(grid("Max Verstappen", "Lando Norris", 11));

    let rewriter = Arc::new(MockRewriter::new());
    let engines = Engines {
        transcriber: Arc::new(MockTranscriber::new("mock").with_response(english)),
        rewriter: rewriter.clone(),
        synthesizer: Arc::new(MockSynthesizer::new()),
    };
    let controller = PipelineController::new(config, engines).with_context_cache(context);
    let mut listener = controller.subscribe();

    let mut handle = controller
        .start_with_source(Box::new(VecChunkSource::quiet(1)), "Monza 2025")
        .await
        .unwrap();
    assert_eq!(handle.wait().await, SessionState::Stopped);

    let text = listener
        .drain()
        .into_iter()
        .find_map(|e| match e {
            DeliveryEvent::Text {
                sequence,
                english,
                telugu,
                category,
            } => Some((sequence, english, telugu, category)),
            _ => None,
        })
        .unwrap();
    assert_eq!(text.0, 0);
    assert_eq!(text.1, english);
    assert!(!text.2.is_empty());
    assert_eq!(text.3, Some(EventCategory::Hype));

    let requests = rewriter.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].context_line.is_some());

    let contents = std::fs::read_to_string(dir.path().join("race_monza_2025.jsonl")).unwrap();
    let records: Vec<DatasetRecord> = contents
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].input.english, english);
    assert_eq!(records[0].input.event_type, EventCategory::Hype);
    assert_eq!(records[0].output, text.2);
    assert_eq!(records[0].metadata.race, "Monza 2025");
    assert_eq!(controller.health().dataset_records, 1);
}

#[tokio::test]
async fn failed_refreshes_keep_serving_last_good_snapshot() {
    let cache = Arc::new(ContextCache::new());
    let source = MockRaceData::new()
        .then_ok(grid("Max Verstappen", "Lando Norris", 30))
        .then_fail()
        .then_fail()
        .then_fail();
    let timeout = Duration::from_secs(1);

    cache.refresh_once(&source, timeout).await.unwrap();
    for _ in 0..3 {
        assert!(cache.refresh_once(&source, timeout).await.is_err());
    }

    let snapshot = cache.read().unwrap();
    assert_eq!(snapshot.current_lap, 30);
    assert_eq!(cache.staleness(), 3);
    assert_eq!(cache.successful_refreshes(), 1);

    let controller = PipelineController::new(config(), Engines::mock()).with_context_cache(cache);
    let probe = controller.test_rewrite("Verstappen holds the lead").await.unwrap();
    assert!(!probe.commentary.telugu.is_empty());
    assert!(!probe.commentary.fallback);
    assert_eq!(
        probe.commentary.context.as_ref().map(|c| c.current_lap),
        Some(30)
    );

    let health = controller.health();
    assert!(health.context_available);
    assert_eq!(health.context_staleness, 3);
}

#[tokio::test]
async fn synthesis_outage_still_releases_text_in_order() {
    const CHUNKS: u64 = 10;
    let transcriber = (0..CHUNKS).fold(MockTranscriber::new("mock"), |t, seq| {
        t.with_response_for(seq, &format!("Sector {} clear.", seq))
    });
    let synthesizer = Arc::new(MockSynthesizer::new().with_failure_when("Sector 7 "));
    let engines = Engines {
        transcriber: Arc::new(transcriber),
        rewriter: Arc::new(MockRewriter::new()),
        synthesizer: synthesizer.clone(),
    };
    let controller = PipelineController::new(config(), engines);
    let mut listener = controller.subscribe();

    let mut handle = controller
        .start_with_source(Box::new(VecChunkSource::quiet(CHUNKS)), "outage")
        .await
        .unwrap();
    assert_eq!(handle.wait().await, SessionState::Stopped);

    let events = listener.drain();
    let artifact_events: Vec<&DeliveryEvent> =
        events.iter().filter(|e| e.sequence().is_some()).collect();

    let texts: Vec<u64> = artifact_events
        .iter()
        .filter(|e| matches!(e, DeliveryEvent::Text { .. }))
        .filter_map(|e| e.sequence())
        .collect();
    assert_eq!(texts, (0..CHUNKS).collect::<Vec<_>>());

    let text_7 = artifact_events
        .iter()
        .find_map(|e| match e {
            DeliveryEvent::Text {
                sequence: 7,
                telugu,
                ..
            } => Some(telugu.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(text_7, "తెలుగు: Sector 7 clear.");
    assert!(!artifact_events.iter().any(|e| matches!(
        e,
        DeliveryEvent::Audio { sequence: 7, .. }
    )));
    assert!(artifact_events.iter().any(|e| matches!(
        e,
        DeliveryEvent::Audio { sequence: 8, .. }
    )));

    // Every retry went to the engine, once per attempt, for chunk 7 only.
    let attempts = config().retry.max_attempts as usize;
    assert_eq!(synthesizer.calls(), CHUNKS as usize - 1 + attempts);
}

#[test]
fn text_only_artifact_unblocks_its_successor() {
    let mut buffer = ReorderBuffer::new(Duration::from_secs(10), 32);
    let now = Instant::now();
    for sequence in 7..=8 {
        assert!(buffer.admit(sequence, now));
    }

    let unit = |sequence: u64| CommentaryUnit {
        sequence,
        english: format!("Sector {} clear.", sequence),
        telugu: format!("సెక్టార్ {}", sequence),
        category: EventCategory::Info,
        context: None,
        fallback: false,
    };

    let early = buffer.resolve(
        ChunkOutcome::Artifact(AudioArtifact::from_unit(
            &unit(8),
            Arc::from(vec![0u8; 4]),
            "audio/wav",
        )),
    );
    assert!(early.is_empty());
    assert_eq!(buffer.watermark(), Some(7));

    let released = buffer.resolve(ChunkOutcome::Artifact(AudioArtifact::text_only(&unit(7))));
    let order: Vec<(u64, ArtifactKind)> = released.iter().map(|a| (a.sequence, a.kind)).collect();
    assert_eq!(order, vec![(7, ArtifactKind::TextOnly), (8, ArtifactKind::Full)]);
    assert_eq!(released[0].telugu, "సెక్టార్ 7");
    assert!(released[0].audio.is_empty());
}

#[tokio::test]
async fn rewrite_outage_passes_english_through() {
    let engines = Engines {
        transcriber: Arc::new(MockTranscriber::new("mock").with_response("Box box, box box.")),
        rewriter: Arc::new(MockRewriter::new().with_failure()),
        synthesizer: Arc::new(MockSynthesizer::new()),
    };
    let controller = PipelineController::new(config(), engines);
    let mut listener = controller.subscribe();

    let mut handle = controller
        .start_with_source(Box::new(VecChunkSource::quiet(1)), "radio")
        .await
        .unwrap();
    assert_eq!(handle.wait().await, SessionState::Stopped);

    let passed = listener.drain().into_iter().any(|e| {
        matches!(
            e,
            DeliveryEvent::Text { ref english, ref telugu, category: Some(EventCategory::Filler), .. }
                if english == "Box box, box box." && telugu == english
        )
    });
    assert!(passed);
}
