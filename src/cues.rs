//! Audio feedback cues.
//!
//! Clips are decoded once at startup and converted to the output device's
//! format. Playing a cue spawns a detached thread that owns its own output
//! stream for the length of the clip. Cues are never joined, queued or
//! cancelled, so overlapping cues simply overlap.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample};
use thiserror::Error;

/// Extra time a playback thread keeps its stream alive after the last frame.
const PLAYBACK_TAIL: Duration = Duration::from_millis(150);

#[derive(Debug, Error)]
pub enum CueError {
    #[error("failed to read clip {}: {source}", .path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: hound::Error,
    },
    #[error("clip {} contains no audio", .0.display())]
    EmptyClip(PathBuf),
    #[error("no default audio output device available")]
    NoOutputDevice,
    #[error("could not query the output device configuration: {0}")]
    DeviceConfig(#[from] cpal::DefaultStreamConfigError),
    #[error("output sample format {0:?} is not supported")]
    UnsupportedFormat(SampleFormat),
    #[error("failed to build output stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),
    #[error("failed to start output stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),
}

/// The fixed set of feedback sounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cue {
    Countdown,
    FinalResult,
    Wrong,
    Success,
}

impl Cue {
    pub const ALL: [Cue; 4] = [Cue::Countdown, Cue::FinalResult, Cue::Wrong, Cue::Success];

    pub fn name(self) -> &'static str {
        match self {
            Cue::Countdown => "countdown",
            Cue::FinalResult => "final_result",
            Cue::Wrong => "wrong",
            Cue::Success => "success",
        }
    }

    /// File the clip is loaded from, relative to the sounds directory.
    pub fn file_name(self) -> String {
        format!("{}.wav", self.name())
    }
}

/// Capability to start a cue without waiting for it.
///
/// Implementations must return immediately. No ordering between cues is
/// promised and callers never learn whether playback succeeded.
pub trait CuePlayer {
    fn play(&self, cue: Cue);
}

/// Interleaved f32 samples with their layout.
#[derive(Debug, Clone)]
pub struct Clip {
    samples: Arc<[f32]>,
    channels: u16,
    sample_rate: u32,
}

impl Clip {
    pub fn new(samples: Vec<f32>, channels: u16, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            channels: channels.max(1),
            sample_rate: sample_rate.max(1),
        }
    }

    /// Decodes a WAV file into normalized f32 samples.
    pub fn load(path: &Path) -> Result<Self, CueError> {
        let decode_err = |source| CueError::Decode {
            path: path.to_path_buf(),
            source,
        };
        let mut reader = hound::WavReader::open(path).map_err(decode_err)?;
        let spec = reader.spec();

        let samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<Result<_, _>>()
                .map_err(decode_err)?,
            hound::SampleFormat::Int => {
                let full_scale = (1u64 << spec.bits_per_sample.saturating_sub(1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / full_scale))
                    .collect::<Result<_, _>>()
                    .map_err(decode_err)?
            }
        };

        if samples.is_empty() {
            return Err(CueError::EmptyClip(path.to_path_buf()));
        }
        Ok(Self::new(samples, spec.channels, spec.sample_rate))
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.frames() as f64 / self.sample_rate as f64)
    }

    /// Re-lays the clip out for a device with `channels` and `sample_rate`.
    ///
    /// Rate conversion is linear interpolation. Mono fans out to every output
    /// channel, anything folded down to mono is averaged, and other layouts map
    /// channel-by-channel with silence on channels the source lacks.
    pub fn convert(&self, channels: u16, sample_rate: u32) -> Clip {
        let channels = channels.max(1);
        let sample_rate = sample_rate.max(1);
        if channels == self.channels && sample_rate == self.sample_rate {
            return self.clone();
        }

        let src_channels = self.channels as usize;
        let dst_channels = channels as usize;
        let src_frames = self.frames();
        if src_frames == 0 {
            return Clip::new(Vec::new(), channels, sample_rate);
        }

        let dst_frames = (src_frames as u64 * sample_rate as u64)
            .div_ceil(self.sample_rate as u64) as usize;
        let step = self.sample_rate as f64 / sample_rate as f64;
        let frame = |index: usize| {
            let start = index.min(src_frames - 1) * src_channels;
            &self.samples[start..start + src_channels]
        };

        let mut out = Vec::with_capacity(dst_frames * dst_channels);
        let mut resampled = vec![0.0f32; src_channels];
        for i in 0..dst_frames {
            let pos = i as f64 * step;
            let index = pos.floor() as usize;
            let frac = (pos - index as f64) as f32;
            let (a, b) = (frame(index), frame(index + 1));
            for (ch, slot) in resampled.iter_mut().enumerate() {
                *slot = a[ch] + (b[ch] - a[ch]) * frac;
            }

            for ch in 0..dst_channels {
                let value = if src_channels == dst_channels {
                    resampled[ch]
                } else if dst_channels == 1 {
                    resampled.iter().sum::<f32>() / src_channels as f32
                } else if src_channels == 1 {
                    resampled[0]
                } else {
                    resampled.get(ch).copied().unwrap_or(0.0)
                };
                out.push(value);
            }
        }

        Clip::new(out, channels, sample_rate)
    }
}

/// Layout the default output device expects.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutputFormat {
    pub channels: u16,
    pub sample_rate: u32,
    pub sample_format: SampleFormat,
}

impl OutputFormat {
    pub fn default_device() -> Result<Self, CueError> {
        let device = cpal::default_host()
            .default_output_device()
            .ok_or(CueError::NoOutputDevice)?;
        let config = device.default_output_config()?;
        Ok(Self {
            channels: config.channels(),
            sample_rate: config.sample_rate().0,
            sample_format: config.sample_format(),
        })
    }
}

/// Plays pre-converted clips on the default output device.
pub struct CpalCuePlayer {
    clips: HashMap<Cue, Clip>,
    format: OutputFormat,
}

impl CpalCuePlayer {
    /// Loads every cue from `dir`, shaped for the current default device.
    pub fn load(dir: &Path) -> Result<Self, CueError> {
        let format = OutputFormat::default_device()?;
        Self::load_with_format(dir, format)
    }

    pub fn load_with_format(dir: &Path, format: OutputFormat) -> Result<Self, CueError> {
        let mut clips = HashMap::with_capacity(Cue::ALL.len());
        for cue in Cue::ALL {
            let path = dir.join(cue.file_name());
            let clip = Clip::load(&path)?;
            tracing::debug!(
                cue = cue.name(),
                path = %path.display(),
                channels = clip.channels(),
                sample_rate = clip.sample_rate(),
                "loaded cue"
            );
            clips.insert(cue, clip.convert(format.channels, format.sample_rate));
        }
        Ok(Self { clips, format })
    }

    pub fn clip(&self, cue: Cue) -> Option<&Clip> {
        self.clips.get(&cue)
    }
}

impl CuePlayer for CpalCuePlayer {
    fn play(&self, cue: Cue) {
        let Some(clip) = self.clips.get(&cue).cloned() else {
            tracing::warn!(cue = cue.name(), "cue has no loaded clip");
            return;
        };
        let format = self.format;
        tracing::debug!(cue = cue.name(), "playing cue");

        let spawned = thread::Builder::new()
            .name(format!("cue-{}", cue.name()))
            .spawn(move || {
                if let Err(err) = play_blocking(&clip, format) {
                    tracing::warn!(cue = cue.name(), error = %err, "cue playback failed");
                }
            });
        if let Err(err) = spawned {
            tracing::warn!(cue = cue.name(), error = %err, "could not spawn playback thread");
        }
    }
}

fn play_blocking(clip: &Clip, format: OutputFormat) -> Result<(), CueError> {
    let device = cpal::default_host()
        .default_output_device()
        .ok_or(CueError::NoOutputDevice)?;
    let config = cpal::StreamConfig {
        channels: format.channels,
        sample_rate: cpal::SampleRate(format.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let stream = match format.sample_format {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, clip)?,
        SampleFormat::I16 => build_stream::<i16>(&device, &config, clip)?,
        SampleFormat::U16 => build_stream::<u16>(&device, &config, clip)?,
        SampleFormat::I32 => build_stream::<i32>(&device, &config, clip)?,
        other => return Err(CueError::UnsupportedFormat(other)),
    };
    stream.play()?;
    thread::sleep(clip.duration() + PLAYBACK_TAIL);
    Ok(())
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    clip: &Clip,
) -> Result<cpal::Stream, CueError>
where
    T: SizedSample + FromSample<f32>,
{
    let samples = Arc::clone(&clip.samples);
    let mut cursor = 0usize;
    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            for slot in data.iter_mut() {
                let value = samples.get(cursor).copied().unwrap_or(0.0);
                *slot = <T as Sample>::from_sample(value);
                cursor = cursor.saturating_add(1);
            }
        },
        |err| tracing::warn!(error = %err, "audio output stream error"),
        None,
    )?;
    Ok(stream)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::{Cue, CuePlayer};
    use std::cell::RefCell;

    /// Remembers every cue instead of playing it.
    #[derive(Debug, Default)]
    pub struct RecordingPlayer {
        played: RefCell<Vec<Cue>>,
    }

    impl RecordingPlayer {
        pub fn played(&self) -> Vec<Cue> {
            self.played.borrow().clone()
        }
    }

    impl CuePlayer for RecordingPlayer {
        fn play(&self, cue: Cue) {
            self.played.borrow_mut().push(cue);
        }
    }
}
