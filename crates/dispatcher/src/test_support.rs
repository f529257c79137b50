//! Pair builders shared by unit tests

use bytes::Bytes;
use contracts::{
    AlignedEvent, AlignedPair, AlignerState, CdEvent, ClockSnapshot, Confidence, FrameSample,
    ImageData, ImageFormat, IncidentCounters, PairMeta, PairMode, Polarity,
};

/// Event-only pair with no events
pub(crate) fn pair(trigger_index: u64) -> AlignedPair {
    AlignedPair {
        trigger_index,
        frame: None,
        events: Vec::new(),
        meta: PairMeta {
            window_start: trigger_index as f64 / 30.0,
            window_end: (trigger_index + 1) as f64 / 30.0,
            window_start_device: trigger_index * 33_333,
            window_end_device: (trigger_index + 1) * 33_333,
            frame_reference_ts: None,
            alignment_error_us: None,
            confidence: Confidence::Nominal,
            complete: true,
            mode: PairMode::EventOnly,
            state: AlignerState::Steady,
            event_clock: ClockSnapshot::default(),
            frame_clock: ClockSnapshot::default(),
            incidents: IncidentCounters::default(),
        },
    }
}

/// Paired record with a 4x2 frame and three events
pub(crate) fn full_pair(trigger_index: u64) -> AlignedPair {
    let mut pair = pair(trigger_index);
    let (width, height) = (4u32, 2u32);
    let color: Vec<u8> = (0..width * height)
        .flat_map(|i| [i as u8, 0x40, 0xff])
        .collect();
    let depth: Vec<u8> = (0..width * height)
        .flat_map(|i| (1000 + i as u16).to_le_bytes())
        .collect();

    pair.frame = Some(FrameSample {
        seq: trigger_index,
        capture_ts: pair.meta.window_start_device + 120,
        exposure_us: 8000,
        color: ImageData {
            width,
            height,
            format: ImageFormat::Bgr8,
            data: Bytes::from(color),
        },
        depth: ImageData {
            width,
            height,
            format: ImageFormat::Depth16,
            data: Bytes::from(depth),
        },
    });
    pair.events = (0..3u64)
        .map(|k| AlignedEvent {
            event: CdEvent {
                t: pair.meta.window_start_device + 10 * (k + 1),
                x: k as u16,
                y: 1,
                polarity: if k % 2 == 0 { Polarity::On } else { Polarity::Off },
            },
            t_ref: pair.meta.window_start + 1e-5 * (k + 1) as f64,
        })
        .collect();
    pair.meta.mode = PairMode::Paired;
    pair.meta.frame_reference_ts = Some(pair.meta.window_start + 0.00012);
    pair.meta.alignment_error_us = Some(120.0);
    pair
}
