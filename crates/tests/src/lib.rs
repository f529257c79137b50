//! # Integration Tests
//!
//! End-to-end tests across the workspace.
//!
//! Covers:
//! - Configuration to engine wiring
//! - Deterministic replay of mock captures (no hardware needed)
//! - Live threaded runs through the dispatcher into sinks

#[cfg(test)]
mod contract_tests {
    use config_loader::{ConfigFormat, ConfigLoader};

    const RIG: &str = r#"
[rig]
name = "bench"

[devices.event_camera]
id = "prophesee"

[devices.event_camera.marker]
strategy = "reserved_pixel"
x = 0
y = 0

[devices.rgbd_camera]
id = "orbbec"

[sync]
trigger_hz = 60.0
disconnect_policy = "halt"

[[sinks]]
name = "console"
sink_type = "log"
"#;

    #[test]
    fn test_blueprint_drives_engine_and_mock() {
        let blueprint = ConfigLoader::load_from_str(RIG, ConfigFormat::Toml).unwrap();
        let engine = blueprint.to_sync_engine_config();
        assert_eq!(engine.trigger_hz, 60.0);
        assert_eq!(engine.frame_stream.id, "orbbec");
        assert_eq!(
            engine.event_stream.marker,
            contracts::MarkerConfig::ReservedPixel { x: 0, y: 0 }
        );

        let mock = ingestion::MockRigConfig::from_blueprint(&blueprint).unwrap();
        assert_eq!(mock.trigger_hz, 60.0);
        assert_eq!(mock.event.id, "prophesee");
        assert_eq!(mock.marker, engine.event_stream.marker);
    }
}

#[cfg(test)]
mod replay_tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use std::time::Duration;

    use contracts::{AlignedPair, Confidence, RawSample, StreamKind, SyncEngineConfig};
    use ingestion::{
        replay_deterministic, CaptureRecording, MockRig, MockRigConfig, PairDigest,
        RecordedSignal,
    };

    fn capture(config: MockRigConfig, millis: u64) -> Arc<CaptureRecording> {
        Arc::new(MockRig::new(config).recording(Duration::from_millis(millis)))
    }

    fn align(recording: Arc<CaptureRecording>, config: SyncEngineConfig) -> Vec<AlignedPair> {
        let mut pairs = Vec::new();
        replay_deterministic(recording, config, |pair: AlignedPair| pairs.push(pair)).unwrap();
        pairs
    }

    /// Device timestamps of every recorded pixel event
    fn recorded_event_ts(recording: &CaptureRecording) -> Vec<u64> {
        recording
            .entries_for(StreamKind::Event)
            .filter_map(|entry| match &entry.signal {
                RecordedSignal::Sample(RawSample::Events(batch)) => Some(batch),
                _ => None,
            })
            .flat_map(|batch| batch.events.iter().map(|e| e.t))
            .collect()
    }

    #[test]
    fn test_replay_from_disk_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.evrec");
        MockRig::new(MockRigConfig::default())
            .recording(Duration::from_secs(2))
            .save(&path)
            .unwrap();

        let digest = || {
            let recording = Arc::new(CaptureRecording::load(&path).unwrap());
            let mut digest = PairDigest::new();
            replay_deterministic(recording, SyncEngineConfig::default(), |pair: AlignedPair| {
                digest.update(&pair)
            })
            .unwrap();
            digest
        };
        let first = digest();
        let second = digest();

        assert_eq!(first, second);
        assert_eq!(first.to_string(), second.to_string());
        assert!(first.pairs() > 50);
    }

    #[test]
    fn test_frame_42_gets_its_trigger_window() {
        let recording = capture(MockRigConfig::default(), 2_000);
        let pairs = align(Arc::clone(&recording), SyncEngineConfig::default());

        let pair = pairs.iter().find(|p| p.trigger_index == 42).unwrap();
        let period = 1.0 / 30.0;
        assert!((pair.meta.window_start - 1.4).abs() < 1e-9);
        assert!((pair.meta.window_end - (1.4 + period)).abs() < 1e-9);
        assert!(pair.meta.is_nominal());
        assert_eq!(pair.frame.as_ref().map(|f| f.seq), Some(42));

        assert!(!pair.events.is_empty());
        for event in &pair.events {
            assert!(event.t_ref >= 1.4 && event.t_ref < 1.4 + period);
        }

        // exactly the recorded events inside the window, none lost or borrowed
        let expected = recorded_event_ts(&recording)
            .into_iter()
            .filter(|t| *t >= pair.meta.window_start_device && *t < pair.meta.window_end_device)
            .count();
        assert_eq!(pair.events.len(), expected);
    }

    #[test]
    fn test_missed_edge_10_extrapolated_then_recovers() {
        let mut config = MockRigConfig::default();
        config.event.missing = BTreeSet::from([10]);
        let engine = SyncEngineConfig {
            jitter_tolerance_ms: 50.0,
            ..Default::default()
        };
        let pairs = align(capture(config, 1_000), engine);

        let by_index = |i: u64| pairs.iter().find(|p| p.trigger_index == i).unwrap();
        assert_eq!(by_index(10).meta.confidence, Confidence::Extrapolated);
        assert_eq!(by_index(11).meta.confidence, Confidence::Nominal);
        assert!(by_index(10).meta.incidents.missed_edges >= 1);
    }

    #[test]
    fn test_pairs_partition_events_in_order() {
        let recording = capture(MockRigConfig::default(), 2_000);
        let pairs = align(recording, SyncEngineConfig::default());

        let indices: Vec<u64> = pairs.iter().map(|p| p.trigger_index).collect();
        assert!(indices.windows(2).all(|w| w[0] < w[1]));

        let steady: Vec<&AlignedPair> = pairs.iter().filter(|p| p.meta.is_nominal()).collect();
        for pair in &steady {
            for event in &pair.events {
                assert!(event.event.t >= pair.meta.window_start_device);
                assert!(event.event.t < pair.meta.window_end_device);
            }
        }
        // adjacent windows share their boundary, so no event lands twice
        for w in steady.windows(2) {
            if w[1].trigger_index == w[0].trigger_index + 1 {
                assert_eq!(w[0].meta.window_end_device, w[1].meta.window_start_device);
            }
        }
    }

    #[test]
    fn test_missing_frame_keeps_order() {
        let mut config = MockRigConfig::default();
        config.frame.missing = BTreeSet::from([7, 8]);
        let pairs = align(capture(config, 1_000), SyncEngineConfig::default());

        let indices: Vec<u64> = pairs.iter().map(|p| p.trigger_index).collect();
        assert!(indices.windows(2).all(|w| w[0] < w[1]));
        assert!(pairs
            .iter()
            .filter(|p| p.frame.is_some())
            .all(|p| p.trigger_index != 7 && p.trigger_index != 8));
        let last = pairs.last().unwrap();
        assert!(last.meta.incidents.frames_dropped >= 1);
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use contracts::{AlignedPair, SinkConfig, SinkType, StreamKind, SyncEngineConfig};
    use dispatcher::{create_dispatcher, forwarder};
    use ingestion::{
        replay_deterministic, IngestionPipeline, MockDevice, MockRig, MockRigConfig,
    };
    use observability::SyncMetricsAggregator;
    use sync_engine::{Aligner, AlignerRuntime, ShutdownSignal};
    use tokio::sync::mpsc;

    fn log_sink(name: &str) -> SinkConfig {
        SinkConfig {
            name: name.to_string(),
            sink_type: SinkType::Log,
            queue_capacity: 64,
            params: HashMap::from([("interval".to_string(), "10".to_string())]),
        }
    }

    /// End-to-end test: MockRig -> IngestionPipeline -> Aligner thread -> Dispatcher
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_e2e_live_mock_pipeline() {
        let config = SyncEngineConfig::default();
        let (events, frames, inputs) = sync_engine::connect(&config);
        let rig = Arc::new(MockRig::new(MockRigConfig {
            events_per_window: 50,
            ..Default::default()
        }));

        let mut ingestion = IngestionPipeline::new();
        ingestion
            .register_device(
                Box::new(MockDevice::new(Arc::clone(&rig), StreamKind::Event)),
                events,
            )
            .unwrap();
        ingestion
            .register_device(Box::new(MockDevice::new(rig, StreamKind::Frame)), frames)
            .unwrap();

        let (tx, rx) = forwarder(256, Duration::from_millis(5), tokio::runtime::Handle::current());
        let forwarded = tx.metrics();
        let dispatcher = create_dispatcher(vec![log_sink("console")], rx)
            .await
            .unwrap();
        let dispatcher_handle = dispatcher.spawn();

        let emitted = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&emitted);
        let mut tx = tx;
        let sink = move |pair: AlignedPair| {
            counter.fetch_add(1, Ordering::Relaxed);
            contracts::OutputSink::accept(&mut tx, pair);
        };
        let poll = Duration::from_millis(config.poll_interval_ms);
        let runtime = AlignerRuntime::spawn(
            Aligner::new(config, inputs),
            sink,
            poll,
            ShutdownSignal::new(),
        )
        .unwrap();

        ingestion.start_all();
        tokio::time::sleep(Duration::from_millis(700)).await;
        ingestion.stop_all();
        runtime.stop();

        let report = tokio::task::spawn_blocking(move || runtime.join())
            .await
            .unwrap()
            .unwrap();
        let sinks = tokio::time::timeout(Duration::from_secs(5), dispatcher_handle)
            .await
            .unwrap()
            .unwrap();

        assert!(report.stats.pairs_emitted > 5);
        assert_eq!(emitted.load(Ordering::Relaxed), report.stats.pairs_emitted);
        assert_eq!(
            forwarded.forwarded() + forwarded.dropped(),
            report.stats.pairs_emitted
        );
        assert!(ingestion.metrics().samples_received > 0);

        let (name, metrics) = &sinks[0];
        assert_eq!(name, "console");
        assert_eq!(metrics.written, forwarded.forwarded());
        assert_eq!(metrics.failed, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_e2e_replay_into_file_sink() {
        let dir = tempfile::tempdir().unwrap();
        let file_sink = SinkConfig {
            name: "disk".to_string(),
            sink_type: SinkType::File,
            queue_capacity: 32,
            params: HashMap::from([(
                "base_path".to_string(),
                dir.path().display().to_string(),
            )]),
        };

        let (pair_tx, pair_rx) = mpsc::channel(64);
        let dispatcher = create_dispatcher(vec![file_sink, log_sink("console")], pair_rx)
            .await
            .unwrap();
        let dispatcher_handle = dispatcher.spawn();

        let recording =
            Arc::new(MockRig::new(MockRigConfig::default()).recording(Duration::from_millis(500)));
        let report = tokio::task::spawn_blocking(move || {
            let mut aggregator = SyncMetricsAggregator::new();
            let report = replay_deterministic(
                recording,
                SyncEngineConfig::default(),
                |pair: AlignedPair| {
                    aggregator.update(&pair.meta, pair.events.len());
                    pair_tx.blocking_send(Arc::new(pair)).unwrap();
                },
            )
            .unwrap();
            (report, aggregator)
        })
        .await
        .unwrap();
        let (report, aggregator) = report;
        let sinks = dispatcher_handle.await.unwrap();

        assert_eq!(aggregator.total_pairs, report.stats.pairs_emitted);
        assert!(sinks.iter().all(|(_, m)| m.written == report.stats.pairs_emitted));

        let meta: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join("meta/000003.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(meta["trigger_index"], 3);
        let event_count = meta["event_count"].as_u64().unwrap();
        let bin = std::fs::metadata(dir.path().join("events/000003.bin")).unwrap();
        assert_eq!(bin.len(), event_count * 24);
        assert!(dir.path().join("rgb/000003.jpg").exists());
        assert!(dir.path().join("depth/000003.png").exists());

        let session: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join("session.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(session["pairs_written"], report.stats.pairs_emitted);
    }
}
