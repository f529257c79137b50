//! FileSink - one set of files per aligned pair
//!
//! Layout under `base_path`:
//!
//! ```text
//! events/000042.bin   packed events (PackedEvent records)
//! rgb/000042.jpg      color frame
//! depth/000042.png    16-bit depth frame
//! meta/000042.json    pair metadata
//! session.json        written on close
//! ```

use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use bytemuck::{Pod, Zeroable};
use chrono::{DateTime, Utc};
use contracts::{
    AlignedEvent, AlignedPair, ContractError, DataSink, FrameSample, ImageData, ImageFormat,
    PairMeta,
};
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageBuffer, Luma};
use serde::Serialize;
use tracing::{debug, error, info, instrument};

const JPEG_QUALITY: u8 = 95;

/// On-disk event record, native endian
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PackedEvent {
    /// Event device ticks
    pub t: u64,
    /// Reference seconds
    pub t_ref: f64,
    pub x: u16,
    pub y: u16,
    pub polarity: u8,
    pub _pad: [u8; 3],
}

impl From<&AlignedEvent> for PackedEvent {
    fn from(aligned: &AlignedEvent) -> Self {
        Self {
            t: aligned.event.t,
            t_ref: aligned.t_ref,
            x: aligned.event.x,
            y: aligned.event.y,
            polarity: aligned.event.polarity.as_u8(),
            _pad: [0; 3],
        }
    }
}

/// Configuration for FileSink
#[derive(Debug, Clone)]
pub struct FileSinkConfig {
    pub base_path: PathBuf,
}

impl FileSinkConfig {
    /// `base_path` param, `./output` when absent
    pub fn from_params(params: &HashMap<String, String>) -> Self {
        let base_path = params
            .get("base_path")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./output"));

        Self { base_path }
    }
}

#[derive(Serialize)]
struct FrameRecord {
    seq: u64,
    capture_ts: u64,
    exposure_us: u32,
    width: u32,
    height: u32,
}

#[derive(Serialize)]
struct PairRecord<'a> {
    trigger_index: u64,
    event_count: usize,
    frame: Option<FrameRecord>,
    meta: &'a PairMeta,
}

#[derive(Serialize)]
struct SessionRecord {
    sink: String,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    pairs_written: u64,
    events_written: u64,
    frames_written: u64,
    first_trigger_index: Option<u64>,
    last_trigger_index: Option<u64>,
}

/// Sink that writes pairs to disk
pub struct FileSink {
    name: String,
    config: FileSinkConfig,
    created_dirs: HashSet<PathBuf>,
    started_at: DateTime<Utc>,
    pairs_written: u64,
    events_written: u64,
    frames_written: u64,
    first_trigger_index: Option<u64>,
    last_trigger_index: Option<u64>,
}

impl FileSink {
    pub fn new(name: impl Into<String>, config: FileSinkConfig) -> std::io::Result<Self> {
        fs::create_dir_all(&config.base_path)?;

        Ok(Self {
            name: name.into(),
            config,
            created_dirs: HashSet::new(),
            started_at: Utc::now(),
            pairs_written: 0,
            events_written: 0,
            frames_written: 0,
            first_trigger_index: None,
            last_trigger_index: None,
        })
    }

    pub fn from_params(
        name: impl Into<String>,
        params: &HashMap<String, String>,
    ) -> std::io::Result<Self> {
        Self::new(name, FileSinkConfig::from_params(params))
    }

    pub fn base_path(&self) -> &Path {
        &self.config.base_path
    }

    fn dir(&mut self, sub: &str) -> std::io::Result<PathBuf> {
        let dir = self.config.base_path.join(sub);
        if !self.created_dirs.contains(&dir) {
            fs::create_dir_all(&dir)?;
            self.created_dirs.insert(dir.clone());
        }
        Ok(dir)
    }

    fn write_pair_to_disk(&mut self, pair: &AlignedPair) -> std::io::Result<()> {
        let stem = format!("{:06}", pair.trigger_index);

        let events_path = self.dir("events")?.join(format!("{stem}.bin"));
        write_events(&events_path, &pair.events)?;

        // event-only records and empty images have no frame files
        if let Some(frame) = &pair.frame {
            if !frame.color.data.is_empty() {
                let path = self.dir("rgb")?.join(format!("{stem}.jpg"));
                save_color(&path, &frame.color)?;
            }
            if !frame.depth.data.is_empty() {
                let path = self.dir("depth")?.join(format!("{stem}.png"));
                save_depth(&path, &frame.depth)?;
            }
            self.frames_written += 1;
        }

        let record = PairRecord {
            trigger_index: pair.trigger_index,
            event_count: pair.event_count(),
            frame: pair.frame.as_ref().map(frame_record),
            meta: &pair.meta,
        };
        let meta_path = self.dir("meta")?.join(format!("{stem}.json"));
        let mut writer = BufWriter::new(File::create(meta_path)?);
        serde_json::to_writer_pretty(&mut writer, &record).map_err(std::io::Error::other)?;
        writer.flush()?;

        self.pairs_written += 1;
        self.events_written += pair.event_count() as u64;
        self.first_trigger_index.get_or_insert(pair.trigger_index);
        self.last_trigger_index = Some(pair.trigger_index);
        Ok(())
    }

    fn write_session(&self) -> std::io::Result<()> {
        let record = SessionRecord {
            sink: self.name.clone(),
            started_at: self.started_at,
            finished_at: Utc::now(),
            pairs_written: self.pairs_written,
            events_written: self.events_written,
            frames_written: self.frames_written,
            first_trigger_index: self.first_trigger_index,
            last_trigger_index: self.last_trigger_index,
        };
        let file = File::create(self.config.base_path.join("session.json"))?;
        serde_json::to_writer_pretty(file, &record).map_err(std::io::Error::other)
    }
}

fn frame_record(frame: &FrameSample) -> FrameRecord {
    FrameRecord {
        seq: frame.seq,
        capture_ts: frame.capture_ts,
        exposure_us: frame.exposure_us,
        width: frame.color.width,
        height: frame.color.height,
    }
}

fn write_events(path: &Path, events: &[AlignedEvent]) -> std::io::Result<()> {
    let packed: Vec<PackedEvent> = events.iter().map(PackedEvent::from).collect();
    let mut file = File::create(path)?;
    file.write_all(bytemuck::cast_slice(&packed))
}

fn save_color(path: &Path, image: &ImageData) -> std::io::Result<()> {
    let rgb = match image.format {
        ImageFormat::Rgb8 => image.data.to_vec(),
        ImageFormat::Bgr8 => {
            let mut rgb = image.data.to_vec();
            for chunk in rgb.chunks_exact_mut(3) {
                chunk.swap(0, 2);
            }
            rgb
        }
        ImageFormat::Depth16 => {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "color channel carries depth data",
            ))
        }
    };

    let writer = BufWriter::new(File::create(path)?);
    JpegEncoder::new_with_quality(writer, JPEG_QUALITY)
        .encode(&rgb, image.width, image.height, ExtendedColorType::Rgb8)
        .map_err(std::io::Error::other)
}

fn save_depth(path: &Path, image: &ImageData) -> std::io::Result<()> {
    if image.format != ImageFormat::Depth16 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("depth channel has format {:?}", image.format),
        ));
    }

    let samples: Vec<u16> = image
        .data
        .chunks_exact(2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .collect();
    let buffer: ImageBuffer<Luma<u16>, Vec<u16>> =
        ImageBuffer::from_raw(image.width, image.height, samples).ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!(
                    "depth buffer of {} bytes does not fit {}x{}",
                    image.data.len(),
                    image.width,
                    image.height
                ),
            )
        })?;
    buffer.save(path).map_err(std::io::Error::other)
}

impl DataSink for FileSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "file_sink_write",
        skip(self, pair),
        fields(sink = %self.name, trigger_index = pair.trigger_index)
    )]
    async fn write(&mut self, pair: &AlignedPair) -> Result<(), ContractError> {
        self.write_pair_to_disk(pair).map_err(|e| {
            error!(sink = %self.name, trigger_index = pair.trigger_index, error = %e, "write failed");
            ContractError::sink_write(&self.name, e.to_string())
        })
    }

    async fn flush(&mut self) -> Result<(), ContractError> {
        Ok(())
    }

    #[instrument(name = "file_sink_close", skip(self))]
    async fn close(&mut self) -> Result<(), ContractError> {
        self.write_session()
            .map_err(|e| ContractError::sink_write(&self.name, e.to_string()))?;
        info!(
            sink = %self.name,
            pairs = self.pairs_written,
            path = %self.config.base_path.display(),
            "file sink closed"
        );
        debug!(sink = %self.name, events = self.events_written, "session written");
        Ok(())
    }
}
