//! Device construction from a rig blueprint

use std::path::PathBuf;
use std::sync::Arc;

use contracts::{DeviceConfig, DeviceSource, RigBlueprint, SourceType, StreamKind};
use tracing::info;

use crate::error::{IngestionError, Result};
use crate::mock::{MockDevice, MockRig, MockRigConfig};
use crate::recording::CaptureRecording;
use crate::replay::ReplayDevice;

/// Event and frame devices described by the blueprint
#[derive(Default)]
pub struct RigDevices {
    pub event: Option<Box<dyn DeviceSource>>,
    pub frame: Option<Box<dyn DeviceSource>>,
}

/// Open both devices of a blueprint
///
/// Mock devices share one [`MockRig`]; replay devices sharing a `path` share
/// one loaded recording.
pub fn open_devices(blueprint: &RigBlueprint) -> Result<RigDevices> {
    let mut rig: Option<Arc<MockRig>> = None;
    let mut loaded: Option<(PathBuf, Arc<CaptureRecording>)> = None;
    let mut devices = RigDevices::default();

    for kind in [StreamKind::Event, StreamKind::Frame] {
        let config = blueprint.devices.get(kind);
        let device: Box<dyn DeviceSource> = match config.source {
            SourceType::Mock => {
                let rig = match &rig {
                    Some(rig) => Arc::clone(rig),
                    None => {
                        let created = Arc::new(MockRig::new(MockRigConfig::from_blueprint(
                            blueprint,
                        )?));
                        rig = Some(Arc::clone(&created));
                        created
                    }
                };
                Box::new(MockDevice::new(rig, kind))
            }
            SourceType::Replay => {
                let path = replay_path(config)?;
                let recording = match &loaded {
                    Some((loaded_path, recording)) if *loaded_path == path => {
                        Arc::clone(recording)
                    }
                    _ => {
                        let recording = Arc::new(CaptureRecording::load(&path)?);
                        loaded = Some((path.clone(), Arc::clone(&recording)));
                        recording
                    }
                };
                Box::new(replay_device(config, kind, recording)?)
            }
        };

        info!(
            stream_id = %device.stream_id(),
            kind = %kind,
            source = ?config.source,
            "device opened"
        );
        match kind {
            StreamKind::Event => devices.event = Some(device),
            StreamKind::Frame => devices.frame = Some(device),
        }
    }

    Ok(devices)
}

fn replay_path(config: &DeviceConfig) -> Result<PathBuf> {
    config
        .params
        .get("path")
        .map(PathBuf::from)
        .ok_or_else(|| IngestionError::invalid_param(&config.id, "path", "replay needs a path"))
}

fn replay_device(
    config: &DeviceConfig,
    kind: StreamKind,
    recording: Arc<CaptureRecording>,
) -> Result<ReplayDevice> {
    let recorded = recording.stream(kind);
    if (recorded.tick_hz - config.tick_hz).abs() > f64::EPSILON * config.tick_hz {
        return Err(IngestionError::invalid_param(
            &config.id,
            "tick_hz",
            format!(
                "recording stream {} ticks at {} Hz, config says {} Hz",
                recorded.id, recorded.tick_hz, config.tick_hz
            ),
        ));
    }

    let speed = match config.params.get("speed") {
        Some(raw) => raw
            .trim()
            .parse::<f64>()
            .map_err(|e| IngestionError::invalid_param(&config.id, "speed", e.to_string()))?,
        None => 1.0,
    };

    Ok(ReplayDevice::new(recording, kind, speed).with_stream_id(config.id.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn blueprint(source: &str, extra: &str) -> RigBlueprint {
        serde_json::from_str(&format!(
            r#"{{
                "rig": {{ "name": "bench" }},
                "devices": {{
                    "event_camera": {{ "id": "events", "source": "{source}" {extra} }},
                    "rgbd_camera": {{ "id": "rgbd", "source": "{source}" {extra} }}
                }}
            }}"#
        ))
        .unwrap()
    }

    #[test]
    fn test_open_mock_devices() {
        let devices = open_devices(&blueprint("mock", "")).unwrap();
        let event = devices.event.unwrap();
        let frame = devices.frame.unwrap();
        assert_eq!(event.stream_id(), "events");
        assert_eq!(event.kind(), StreamKind::Event);
        assert_eq!(frame.stream_id(), "rgbd");
        assert!(!frame.is_listening());
    }

    #[test]
    fn test_replay_without_path_fails() {
        let err = open_devices(&blueprint("replay", "")).err().unwrap();
        assert!(matches!(err, IngestionError::InvalidParam { ref key, .. } if key == "path"));
    }

    #[test]
    fn test_open_replay_devices() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rig.evrec");
        MockRig::new(MockRigConfig::default())
            .recording(Duration::from_millis(200))
            .save(&path)
            .unwrap();

        let extra = format!(r#", "params": {{ "path": "{}", "speed": "2" }}"#, path.display());
        let devices = open_devices(&blueprint("replay", &extra)).unwrap();
        assert_eq!(devices.frame.unwrap().stream_id(), "rgbd");
        assert_eq!(devices.event.unwrap().tick_hz(), 1_000_000.0);
    }
}
