//! Aligner: pairs every frame with the events of its trigger window.
//!
//! Window `i` spans event-stream trigger boundaries `i` and `i + 1`. A
//! boundary is frozen the first time it is resolved so consecutive windows
//! share it exactly, which makes the slices a partition of the event stream.
//! Time is injected through `step(now)`; identical input and identical `now`
//! sequences produce identical output.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use contracts::{
    AlignedEvent, AlignedPair, AlignerState, BufferStats, CdEvent, ClockSnapshot, Confidence,
    ContractError, DatasetGap, DisconnectPolicy, EdgeKind, FrameSample, IncidentCounters,
    PairMeta, PairMode, StreamId, StreamKind, SyncEngineConfig, SyncIncident, TriggerEdge,
};
use crossbeam_channel::Receiver;
use serde::Serialize;
use tracing::{debug, info, instrument, trace, warn};

use crate::clock::{ClockError, ClockModel};
use crate::detector::{marker_strategy, MarkerStrategy};
use crate::monitor::HealthMonitor;
use crate::stream::{AlignerInputs, StreamStatus};

/// Incidents kept for inspection
const RECENT_INCIDENTS: usize = 64;

#[derive(Debug, Clone, Copy)]
struct TrackedEdge {
    device_ts: u64,
    kind: EdgeKind,
    /// Already folded into both clock models
    matched: bool,
}

/// Resolved window boundary on the event stream
#[derive(Debug, Clone, Copy, PartialEq)]
struct Boundary {
    device_ts: u64,
    reference: f64,
    extrapolated: bool,
}

#[derive(Debug)]
struct StreamTrack {
    id: StreamId,
    clock: ClockModel,
    edges: BTreeMap<u64, TrackedEdge>,
    /// Consecutive missed edges
    missed_streak: u32,
    /// Highest index the producer reported
    reported: Option<u64>,
    /// Highest index declared missed because the stream went quiet
    assumed: Option<u64>,
    watermark: Option<u64>,
    status: StreamStatus,
}

impl StreamTrack {
    fn new(kind: StreamKind, id: StreamId, tick_hz: f64, config: &SyncEngineConfig) -> Self {
        Self {
            id,
            clock: ClockModel::new(kind, tick_hz, config.clock.clone()),
            edges: BTreeMap::new(),
            missed_streak: 0,
            reported: None,
            assumed: None,
            watermark: None,
            status: StreamStatus::Live,
        }
    }

    /// Latest index known on this stream, reported or assumed
    fn last_index(&self) -> Option<u64> {
        self.reported.max(self.assumed)
    }

    fn is_disconnected(&self) -> bool {
        matches!(self.status, StreamStatus::Disconnected { .. })
    }

    fn observed(&self, index: u64) -> Option<u64> {
        self.edges
            .get(&index)
            .filter(|e| e.kind == EdgeKind::Observed && !e.matched)
            .map(|e| e.device_ts)
    }
}

/// What is known about frame `i`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameState {
    Present,
    /// Will never exist
    Missing,
    /// Frame stream is gone
    Gone,
    /// Might still arrive
    Pending,
}

enum Advance {
    Emitted(Box<AlignedPair>),
    Skipped,
    Blocked,
}

/// Aligner counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AlignerStats {
    pub pairs_emitted: u64,
    pub incomplete_pairs: u64,
    pub extrapolated_pairs: u64,
    pub events_assigned: u64,
    /// Events older than the window they were staged for
    pub events_discarded: u64,
    pub markers_stripped: u64,
    /// Frames that arrived after their index was passed
    pub late_frames: u64,
    /// Windows left open at shutdown
    pub windows_abandoned: u64,
}

/// Final state of an aligner run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlignerReport {
    pub state: AlignerState,
    pub stats: AlignerStats,
    pub incidents: IncidentCounters,
    pub event_buffer: BufferStats,
    pub frame_buffer: BufferStats,
    pub event_clock: ClockSnapshot,
    pub frame_clock: ClockSnapshot,
}

/// Frame / event-slice aligner
///
/// Runs on a single consumer thread; see [`crate::AlignerRuntime`].
pub struct Aligner {
    config: SyncEngineConfig,
    inputs: AlignerInputs,
    marker: Arc<dyn MarkerStrategy>,
    events: StreamTrack,
    frames: StreamTrack,
    /// Popped event batches not yet assigned, ordered by `t`
    staged: VecDeque<CdEvent>,
    pending_frames: BTreeMap<u64, FrameSample>,
    boundaries: BTreeMap<u64, Boundary>,
    event_gaps: Vec<DatasetGap>,
    next_index: Option<u64>,
    /// Aligner time at which each open window's end edge was first seen on
    /// either stream
    due: BTreeMap<u64, Duration>,
    state: AlignerState,
    incidents: IncidentCounters,
    recent: VecDeque<SyncIncident>,
    stats: AlignerStats,
    monitor: HealthMonitor,
    halted: bool,
    flushing: bool,
}

impl std::fmt::Debug for Aligner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aligner")
            .field("state", &self.state)
            .field("next_index", &self.next_index)
            .field("pending_frames", &self.pending_frames.len())
            .field("staged_events", &self.staged.len())
            .field("stats", &self.stats)
            .finish()
    }
}

impl Aligner {
    pub fn new(config: SyncEngineConfig, inputs: AlignerInputs) -> Self {
        let events = StreamTrack::new(
            StreamKind::Event,
            config.event_stream.id.clone(),
            config.event_stream.tick_hz,
            &config,
        );
        let frames = StreamTrack::new(
            StreamKind::Frame,
            config.frame_stream.id.clone(),
            config.frame_stream.tick_hz,
            &config,
        );
        Self {
            marker: marker_strategy(&config.event_stream.marker),
            monitor: HealthMonitor::new(config.monitor.clone()),
            config,
            inputs,
            events,
            frames,
            staged: VecDeque::new(),
            pending_frames: BTreeMap::new(),
            boundaries: BTreeMap::new(),
            event_gaps: Vec::new(),
            next_index: None,
            due: BTreeMap::new(),
            state: AlignerState::Warmup,
            incidents: IncidentCounters::default(),
            recent: VecDeque::with_capacity(RECENT_INCIDENTS),
            stats: AlignerStats::default(),
            halted: false,
            flushing: false,
        }
    }

    /// Consume everything the producers published and emit closable pairs
    ///
    /// `now` is monotonic aligner time; it only drives the latency budget
    /// and the health monitor.
    #[instrument(
        level = "trace",
        name = "aligner_step",
        skip(self),
        fields(state = self.state.as_str(), next_index = ?self.next_index)
    )]
    pub fn step(&mut self, now: Duration) -> Vec<AlignedPair> {
        let mut pairs = Vec::new();
        if self.state == AlignerState::Shutdown {
            return pairs;
        }

        self.drain_inputs();
        self.detect_silence();
        self.refresh_state();
        if self.state != AlignerState::Warmup {
            self.mark_due(now);
            self.emit_ready(now, &mut pairs);
        }

        if self.monitor.due(now) {
            self.report_health(now);
        }
        pairs
    }

    /// Flush on stop
    ///
    /// Both streams are treated as closed, every window whose boundaries and
    /// frame are known is emitted, the rest is abandoned. Nothing is emitted
    /// afterwards.
    #[instrument(name = "aligner_finish", skip(self))]
    pub fn finish(&mut self, now: Duration) -> Vec<AlignedPair> {
        let mut pairs = Vec::new();
        if self.state == AlignerState::Shutdown {
            return pairs;
        }

        self.inputs.events.close(StreamStatus::Finished);
        self.inputs.frames.close(StreamStatus::Finished);
        self.flushing = true;
        self.drain_inputs();
        self.emit_ready(now, &mut pairs);

        let abandoned = self.pending_frames.len() as u64
            + self.inputs.frames.with_inbox(|inbox| inbox.buffer.len()) as u64;
        if abandoned > 0 {
            self.stats.windows_abandoned += abandoned;
            warn!(abandoned, next_index = ?self.next_index, "open windows abandoned at shutdown");
        }
        self.pending_frames.clear();
        self.staged.clear();

        self.set_state(AlignerState::Shutdown);
        self.record(SyncIncident::ShutdownRequested);
        info!(
            pairs = self.stats.pairs_emitted,
            incomplete = self.stats.incomplete_pairs,
            incidents = self.incidents.recoverable_total(),
            "aligner finished"
        );
        pairs
    }

    /// Doorbell rung by the producers
    pub fn doorbell(&self) -> &Receiver<()> {
        &self.inputs.doorbell
    }

    /// Both streams have ended; only `finish` remains
    pub fn is_exhausted(&self) -> bool {
        !self.events.status.is_live() && !self.frames.status.is_live()
    }

    /// A disconnect under the halt policy was seen
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Error to surface after a halt
    pub fn halt_error(&self) -> Option<ContractError> {
        if !self.halted {
            return None;
        }
        [&self.events, &self.frames]
            .into_iter()
            .find_map(|track| match &track.status {
                StreamStatus::Disconnected { reason } => Some(ContractError::device_disconnected(
                    track.id.as_str(),
                    reason.clone(),
                )),
                _ => None,
            })
    }

    pub fn state(&self) -> AlignerState {
        self.state
    }

    pub fn incidents(&self) -> &IncidentCounters {
        &self.incidents
    }

    /// Most recent incidents, oldest first
    pub fn recent_incidents(&self) -> impl Iterator<Item = &SyncIncident> {
        self.recent.iter()
    }

    pub fn stats(&self) -> &AlignerStats {
        &self.stats
    }

    pub fn clock(&self, kind: StreamKind) -> &ClockModel {
        match kind {
            StreamKind::Event => &self.events.clock,
            StreamKind::Frame => &self.frames.clock,
        }
    }

    pub fn report(&self) -> AlignerReport {
        AlignerReport {
            state: self.state,
            stats: self.stats,
            incidents: self.incidents,
            event_buffer: self.inputs.events.stats(),
            frame_buffer: self.inputs.frames.stats(),
            event_clock: self.events.clock.snapshot(),
            frame_clock: self.frames.clock.snapshot(),
        }
    }

    fn track_mut(&mut self, kind: StreamKind) -> &mut StreamTrack {
        match kind {
            StreamKind::Event => &mut self.events,
            StreamKind::Frame => &mut self.frames,
        }
    }

    // ---- input side ----

    fn drain_inputs(&mut self) {
        let (event_edges, event_gaps, event_mark, event_status) =
            self.inputs.events.with_inbox(|inbox| {
                (
                    inbox.edges.drain(..).collect::<Vec<_>>(),
                    inbox.buffer.take_gaps(),
                    inbox.buffer.watermark(),
                    inbox.status.clone(),
                )
            });
        let (frame_edges, frame_gaps, frame_mark, frame_status) =
            self.inputs.frames.with_inbox(|inbox| {
                (
                    inbox.edges.drain(..).collect::<Vec<_>>(),
                    inbox.buffer.take_gaps(),
                    inbox.buffer.watermark(),
                    inbox.status.clone(),
                )
            });

        for gap in event_gaps.iter().chain(frame_gaps.iter()) {
            self.record(SyncIncident::BufferOverflowDrop { gap: *gap });
        }
        self.event_gaps.extend(event_gaps);
        self.events.watermark = event_mark;
        self.frames.watermark = frame_mark;

        for edge in event_edges.into_iter().chain(frame_edges) {
            let index = edge.trigger_index;
            let track = self.track_mut(edge.stream);
            track.reported = track.reported.max(Some(index));
            // The detector catching up on edges already declared missed here
            if !edge.is_observed() && track.assumed.is_some_and(|assumed| index <= assumed) {
                continue;
            }
            self.on_edge(edge);
        }

        self.observe_status(StreamKind::Event, event_status);
        self.observe_status(StreamKind::Frame, frame_status);
    }

    fn on_edge(&mut self, edge: TriggerEdge) {
        let index = edge.trigger_index;
        let track = self.track_mut(edge.stream);
        match edge.kind {
            EdgeKind::Observed => track.missed_streak = 0,
            EdgeKind::Missed => track.missed_streak += 1,
        }
        track.edges.insert(
            index,
            TrackedEdge {
                device_ts: edge.device_ts,
                kind: edge.kind,
                matched: false,
            },
        );

        if edge.is_observed() {
            self.match_edge(index);
        } else {
            self.record(SyncIncident::MissedEdge {
                stream: edge.stream,
                trigger_index: index,
            });
        }
        self.prune_edges(edge.stream);
    }

    /// Fold index `i` into both clocks once it is observed on both streams
    fn match_edge(&mut self, index: u64) {
        let (Some(event_ts), Some(frame_ts)) =
            (self.events.observed(index), self.frames.observed(index))
        else {
            return;
        };
        let reference = self.config.grid_time(index);

        for (kind, device_ts) in [(StreamKind::Event, event_ts), (StreamKind::Frame, frame_ts)] {
            let track = self.track_mut(kind);
            if let Some(edge) = track.edges.get_mut(&index) {
                edge.matched = true;
            }
            match track.clock.update(device_ts, reference) {
                Ok(update) => {
                    if update.reseeded {
                        info!(stream = %kind, trigger_index = index, "clock model reseeded");
                    }
                }
                Err(ClockError::Anomaly { residual_us, .. }) => {
                    self.record(SyncIncident::ClockAnomaly {
                        stream: kind,
                        trigger_index: index,
                        residual_us,
                    });
                }
                Err(err) => debug!(stream = %kind, error = %err, "clock update skipped"),
            }
        }
    }

    /// Declare edges missed on a live stream that has gone quiet while the
    /// other one keeps reporting
    ///
    /// Edge `j` is assumed missed once the other stream is past its reference
    /// time by more than the latency budget plus the jitter tolerance.
    fn detect_silence(&mut self) {
        let allowance = (self.config.max_latency_ms + self.config.jitter_tolerance_ms) / 1000.0;
        for (kind, other) in [
            (StreamKind::Event, self.frames.reported),
            (StreamKind::Frame, self.events.reported),
        ] {
            let Some(progress) = other else {
                continue;
            };
            let horizon = self.config.grid_time(progress) - allowance;
            let track = match kind {
                StreamKind::Event => &self.events,
                StreamKind::Frame => &self.frames,
            };
            let Some(last) = track.last_index() else {
                continue;
            };
            if !track.status.is_live() {
                continue;
            }

            let mut index = last + 1;
            while self.config.grid_time(index) < horizon {
                let device_ts = self.assumed_device_ts(kind, index);
                let track = self.track_mut(kind);
                track.assumed = Some(index);
                let edge = TriggerEdge::missed(track.id.clone(), kind, index, device_ts);
                debug!(stream = %kind, trigger_index = index, "stream silent, edge assumed missed");
                self.on_edge(edge);
                index += 1;
            }
        }
    }

    /// Device tick where edge `j` of a silent stream should have been
    fn assumed_device_ts(&self, kind: StreamKind, j: u64) -> u64 {
        let (track, tick_hz) = match kind {
            StreamKind::Event => (&self.events, self.config.event_stream.tick_hz),
            StreamKind::Frame => (&self.frames, self.config.frame_stream.tick_hz),
        };
        if let Ok(ticks) = track.clock.inverse(self.config.grid_time(j)) {
            return ticks.max(0.0).round() as u64;
        }
        let period = tick_hz / self.config.trigger_hz;
        track
            .edges
            .range(..j)
            .next_back()
            .map(|(k, e)| e.device_ts + ((j - k) as f64 * period).round() as u64)
            .unwrap_or_default()
    }

    fn prune_edges(&mut self, kind: StreamKind) {
        let limit = self.config.edge_history;
        let floor = self.next_index.unwrap_or(u64::MAX);
        let track = self.track_mut(kind);
        while track.edges.len() > limit {
            match track.edges.keys().next().copied() {
                Some(first) if first < floor => {
                    track.edges.remove(&first);
                }
                _ => break,
            }
        }
    }

    fn observe_status(&mut self, kind: StreamKind, status: StreamStatus) {
        let track = self.track_mut(kind);
        if track.status == status {
            return;
        }
        let id = track.id.clone();
        track.status = status.clone();

        match status {
            StreamStatus::Disconnected { reason } => {
                self.record(SyncIncident::DeviceDisconnected {
                    stream: kind,
                    reason: reason.clone(),
                });
                match self.config.disconnect_policy {
                    DisconnectPolicy::Halt => {
                        warn!(stream = %id, %reason, "device disconnected, halting");
                        self.halted = true;
                    }
                    DisconnectPolicy::HalfOpen => {
                        warn!(stream = %id, %reason, "device disconnected, continuing half-open");
                    }
                }
            }
            StreamStatus::Finished => info!(stream = %id, "stream finished"),
            StreamStatus::Live => {}
        }
    }

    fn refresh_state(&mut self) {
        if self.state == AlignerState::Shutdown {
            return;
        }
        let disconnected = self.events.is_disconnected() || self.frames.is_disconnected();
        let calibrated = self.events.clock.is_calibrated() && self.frames.clock.is_calibrated();

        let next = if disconnected && self.config.disconnect_policy == DisconnectPolicy::HalfOpen {
            AlignerState::HalfOpen
        } else if !calibrated {
            AlignerState::Warmup
        } else if self.events.missed_streak > 0 || self.frames.missed_streak > 0 {
            AlignerState::Degraded
        } else {
            AlignerState::Steady
        };
        self.set_state(next);
    }

    fn set_state(&mut self, next: AlignerState) {
        if next == self.state {
            return;
        }
        info!(from = self.state.as_str(), to = next.as_str(), "aligner state changed");
        metrics::gauge!("evsync_aligner_state", "state" => self.state.as_str()).set(0.0);
        metrics::gauge!("evsync_aligner_state", "state" => next.as_str()).set(1.0);
        self.state = next;
    }

    fn record(&mut self, incident: SyncIncident) {
        self.incidents.record(incident.kind());
        observability::record_incident(&incident);
        match &incident {
            SyncIncident::ShutdownRequested => info!(?incident, "sync incident"),
            _ => warn!(?incident, "sync incident"),
        }
        if self.recent.len() == RECENT_INCIDENTS {
            self.recent.pop_front();
        }
        self.recent.push_back(incident);
    }

    // ---- output side ----

    fn emit_ready(&mut self, now: Duration, pairs: &mut Vec<AlignedPair>) {
        loop {
            self.pull_frames();
            match self.advance(now) {
                Advance::Emitted(pair) => pairs.push(*pair),
                Advance::Skipped => {}
                Advance::Blocked => break,
            }
        }
    }

    /// Move final frames out of the buffer, one past the current index
    fn pull_frames(&mut self) {
        let frames = Arc::clone(&self.inputs.frames);
        frames.with_inbox(|inbox| loop {
            let horizon = match self.next_index {
                Some(n) => self.pending_frames.range(n + 1..).next().is_some(),
                None => !self.pending_frames.is_empty(),
            };
            if horizon {
                break;
            }
            let Some(indexed) = inbox.buffer.pop_oldest_ready(u64::MAX) else {
                break;
            };
            if self.next_index.is_some_and(|n| indexed.trigger_index < n) {
                self.stats.late_frames += 1;
                debug!(trigger_index = indexed.trigger_index, "late frame discarded");
                continue;
            }
            self.pending_frames
                .insert(indexed.trigger_index, indexed.frame);
        });
    }

    fn first_index(&self) -> Option<u64> {
        if let Some((&index, _)) = self.pending_frames.iter().next() {
            return Some(index);
        }
        if self.frames.is_disconnected() {
            return self
                .events
                .edges
                .iter()
                .find(|(_, e)| e.kind == EdgeKind::Observed)
                .map(|(i, _)| *i);
        }
        None
    }

    fn frame_state(&self, index: u64, expired: bool) -> FrameState {
        if self.pending_frames.contains_key(&index) {
            return FrameState::Present;
        }
        let edge_missed = self
            .frames
            .edges
            .get(&index)
            .is_some_and(|e| e.kind == EdgeKind::Missed);
        if edge_missed || self.pending_frames.range(index + 1..).next().is_some() {
            return FrameState::Missing;
        }
        if !self.frames.status.is_live() {
            return FrameState::Gone;
        }
        if expired {
            FrameState::Missing
        } else {
            FrameState::Pending
        }
    }

    /// Reference time of the latest edge either producer reported
    fn reference_progress(&self) -> Option<f64> {
        self.events
            .reported
            .max(self.frames.reported)
            .map(|index| self.config.grid_time(index))
    }

    /// Stamp windows whose end edge has been reached with the current time
    fn mark_due(&mut self, now: Duration) {
        let (Some(progress), Some(next)) = (self.reference_progress(), self.next_index) else {
            return;
        };
        let mut index = match self.due.keys().next_back() {
            Some(last) => (last + 1).max(next),
            None => next,
        };
        while self.config.grid_time(index + 1) <= progress && self.due.len() < self.config.edge_history
        {
            self.due.insert(index, now);
            index += 1;
        }
    }

    /// Window `index` has been due for longer than the latency budget
    ///
    /// Measured both in aligner time since its end edge was first seen and in
    /// reference time against the latest reported edge, so a stall costs one
    /// budget in total rather than one per window.
    fn budget_expired(&self, index: u64, now: Duration) -> bool {
        if self.flushing {
            return false;
        }
        let budget = self.config.max_latency_ms / 1000.0;
        let end = self.config.grid_time(index + 1);
        let behind = self
            .reference_progress()
            .is_some_and(|progress| progress - end >= budget);
        let waited = self
            .due
            .get(&index)
            .is_some_and(|since| now.saturating_sub(*since).as_secs_f64() >= budget);
        behind || waited
    }

    fn advance(&mut self, now: Duration) -> Advance {
        let index = match self.next_index.or_else(|| self.first_index()) {
            Some(index) => index,
            None => return Advance::Blocked,
        };
        self.next_index = Some(index);

        let expired = self.budget_expired(index, now);
        let mode = match self.frame_state(index, expired) {
            FrameState::Present => PairMode::Paired,
            FrameState::Missing => {
                self.record(SyncIncident::FrameDropped {
                    trigger_index: index,
                });
                self.complete_index(index);
                return Advance::Skipped;
            }
            FrameState::Gone
                if self.frames.is_disconnected()
                    && self.config.disconnect_policy == DisconnectPolicy::HalfOpen =>
            {
                PairMode::EventOnly
            }
            FrameState::Gone | FrameState::Pending => return Advance::Blocked,
        };

        let events_lost = self.events.is_disconnected()
            && self.config.disconnect_policy == DisconnectPolicy::HalfOpen;
        let force = expired || events_lost;

        let bounds = match self.resolve_boundary(index, force) {
            Some(start) => self
                .resolve_boundary(index + 1, force)
                .map(|end| (start, end)),
            None => None,
        };

        let Some((start, end)) = bounds else {
            if events_lost && mode == PairMode::Paired {
                return self.emit_frame_only(index);
            }
            return Advance::Blocked;
        };

        let final_through_end = self
            .events
            .watermark
            .is_some_and(|mark| mark >= end.device_ts);
        if !final_through_end && !force {
            return Advance::Blocked;
        }
        let forced = !final_through_end;

        let events = self.collect_events(start, end, forced);
        let gap_overlap = self
            .event_gaps
            .iter()
            .any(|gap| gap.overlaps(start.device_ts, end.device_ts));
        let frame = self.pending_frames.remove(&index);

        let frame_reference_ts = frame
            .as_ref()
            .and_then(|f| self.frames.clock.project(f.capture_ts).ok());
        let confidence = if start.extrapolated || end.extrapolated {
            Confidence::Extrapolated
        } else {
            Confidence::Nominal
        };

        let meta = PairMeta {
            window_start: start.reference,
            window_end: end.reference,
            window_start_device: start.device_ts,
            window_end_device: end.device_ts,
            frame_reference_ts,
            alignment_error_us: frame_reference_ts.map(|r| (r - start.reference) * 1e6),
            confidence,
            complete: !forced && !gap_overlap,
            mode,
            state: self.state,
            event_clock: self.events.clock.snapshot(),
            frame_clock: self.frames.clock.snapshot(),
            incidents: self.incidents,
        };
        if forced {
            debug!(trigger_index = index, "latency budget expired, window forced");
        }
        self.finish_pair(AlignedPair {
            trigger_index: index,
            frame,
            events,
            meta,
        })
    }

    /// Frame with an empty slice: the event stream is gone and the window
    /// cannot be placed on it
    fn emit_frame_only(&mut self, index: u64) -> Advance {
        let frame = self.pending_frames.remove(&index);
        let frame_reference_ts = frame
            .as_ref()
            .and_then(|f| self.frames.clock.project(f.capture_ts).ok());
        let window_start = self.config.grid_time(index);

        let meta = PairMeta {
            window_start,
            window_end: self.config.grid_time(index + 1),
            window_start_device: 0,
            window_end_device: 0,
            frame_reference_ts,
            alignment_error_us: frame_reference_ts.map(|r| (r - window_start) * 1e6),
            confidence: Confidence::Extrapolated,
            complete: false,
            mode: PairMode::FrameOnly,
            state: self.state,
            event_clock: self.events.clock.snapshot(),
            frame_clock: self.frames.clock.snapshot(),
            incidents: self.incidents,
        };
        self.finish_pair(AlignedPair {
            trigger_index: index,
            frame,
            events: Vec::new(),
            meta,
        })
    }

    fn finish_pair(&mut self, mut pair: AlignedPair) -> Advance {
        // Past the last event the device delivered, nothing can fill the slice
        if pair.meta.mode == PairMode::Paired
            && pair.events.is_empty()
            && self.events.is_disconnected()
        {
            pair.meta.mode = PairMode::FrameOnly;
            pair.meta.complete = false;
        }
        let index = pair.trigger_index;
        let event_count = pair.events.len();

        self.stats.pairs_emitted += 1;
        self.stats.events_assigned += event_count as u64;
        if !pair.meta.complete {
            self.stats.incomplete_pairs += 1;
        }
        if pair.meta.confidence == Confidence::Extrapolated {
            self.stats.extrapolated_pairs += 1;
        }
        observability::record_pair_metrics(&pair.meta, index, event_count);
        self.monitor.observe_pair(&pair.meta);

        if let Some(error_us) = pair.meta.alignment_error_us {
            if error_us.abs() > self.config.monitor.alignment_warning_us {
                warn!(trigger_index = index, error_us, "frame far from its window start");
            }
        }
        trace!(
            trigger_index = index,
            events = event_count,
            confidence = ?pair.meta.confidence,
            complete = pair.meta.complete,
            "pair emitted"
        );

        self.complete_index(index);
        Advance::Emitted(Box::new(pair))
    }

    /// Move past `index`, releasing everything older
    fn complete_index(&mut self, index: u64) {
        let next = index + 1;
        self.next_index = Some(next);
        self.due = self.due.split_off(&next);
        self.pending_frames = self.pending_frames.split_off(&next);
        self.boundaries = self.boundaries.split_off(&next);
        if let Some(start) = self.boundaries.get(&next) {
            let start = start.device_ts;
            self.event_gaps.retain(|gap| gap.last_ts >= start);
        }
        self.prune_edges(StreamKind::Event);
        self.prune_edges(StreamKind::Frame);
    }

    /// Boundary `j` on the event stream, frozen on first resolution
    fn resolve_boundary(&mut self, j: u64, force: bool) -> Option<Boundary> {
        if let Some(boundary) = self.boundaries.get(&j) {
            return Some(*boundary);
        }
        let grid = self.config.grid_time(j);
        let candidate = match self.events.edges.get(&j).copied() {
            Some(edge) if edge.kind == EdgeKind::Observed => Boundary {
                device_ts: edge.device_ts,
                reference: self.events.clock.project(edge.device_ts).unwrap_or(grid),
                extrapolated: false,
            },
            Some(edge) => Boundary {
                device_ts: self.extrapolate_device(j).unwrap_or(edge.device_ts),
                reference: grid,
                extrapolated: true,
            },
            None if force => Boundary {
                device_ts: self.extrapolate_device(j)?,
                reference: grid,
                extrapolated: true,
            },
            None => return None,
        };

        let boundary = self.keep_monotonic(j, candidate);
        self.boundaries.insert(j, boundary);
        Some(boundary)
    }

    /// Event device tick of trigger `j` from the clock model, or stepped at
    /// the nominal period from the closest earlier known point
    fn extrapolate_device(&self, j: u64) -> Option<u64> {
        if let Ok(ticks) = self.events.clock.inverse(self.config.grid_time(j)) {
            return Some(ticks.max(0.0).round() as u64);
        }
        let period = self.config.event_stream.tick_hz / self.config.trigger_hz;
        let (anchor, ts) = self
            .boundaries
            .range(..j)
            .next_back()
            .map(|(k, b)| (*k, b.device_ts))
            .or_else(|| {
                self.events
                    .edges
                    .range(..j)
                    .next_back()
                    .map(|(k, e)| (*k, e.device_ts))
            })?;
        Some(ts + ((j - anchor) as f64 * period).round() as u64)
    }

    fn keep_monotonic(&self, j: u64, mut boundary: Boundary) -> Boundary {
        let Some(prev) = j.checked_sub(1).and_then(|p| self.boundaries.get(&p)) else {
            return boundary;
        };
        if boundary.device_ts <= prev.device_ts {
            let period = self.config.event_stream.tick_hz / self.config.trigger_hz;
            boundary.device_ts = prev.device_ts + (period.round() as u64).max(1);
            boundary.extrapolated = true;
        }
        if boundary.reference <= prev.reference {
            boundary.reference = prev.reference + self.config.period_s();
            boundary.extrapolated = true;
        }
        boundary
    }

    /// Slice `[start, end)` out of the event stream
    fn collect_events(&mut self, start: Boundary, end: Boundary, forced: bool) -> Vec<AlignedEvent> {
        let events = Arc::clone(&self.inputs.events);
        events.with_inbox(|inbox| loop {
            let batch = if forced {
                inbox.buffer.pop_oldest_before(end.device_ts)
            } else {
                inbox.buffer.pop_oldest_ready(end.device_ts)
            };
            match batch {
                Some(batch) => self.staged.extend(batch.events),
                None => break,
            }
        });

        let staged = self.staged.make_contiguous();
        if !staged.is_sorted_by_key(|e| e.t) {
            staged.sort_by_key(|e| e.t);
        }

        let span_device = end.device_ts.saturating_sub(start.device_ts).max(1) as f64;
        let span_reference = end.reference - start.reference;
        let mut slice = Vec::new();
        while let Some(event) = self.staged.front().copied() {
            if event.t >= end.device_ts {
                break;
            }
            self.staged.pop_front();
            if self.marker.is_inline_marker(&event) {
                self.stats.markers_stripped += 1;
                continue;
            }
            if event.t < start.device_ts {
                self.stats.events_discarded += 1;
                continue;
            }
            let fraction = (event.t - start.device_ts) as f64 / span_device;
            slice.push(AlignedEvent {
                event,
                t_ref: start.reference + fraction * span_reference,
            });
        }
        slice
    }

    fn report_health(&mut self, now: Duration) {
        let event_stats = self.inputs.events.stats();
        let frame_stats = self.inputs.frames.stats();
        observability::record_buffer_state(self.events.id.as_str(), &event_stats);
        observability::record_buffer_state(self.frames.id.as_str(), &frame_stats);
        for track in [&self.events, &self.frames] {
            observability::record_clock_state(
                track.id.as_str(),
                &track.clock.snapshot(),
                track.clock.residual_rms(),
            );
        }
        self.monitor.report(
            now,
            [
                (self.events.id.as_str(), event_stats),
                (self.frames.id.as_str(), frame_stats),
            ],
            [
                (self.events.id.as_str(), &self.events.clock),
                (self.frames.id.as_str(), &self.frames.clock),
            ],
        );
    }
}
