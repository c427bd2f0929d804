//! Native audio backend over `cpal`.
//!
//! cpal streams are not `Send` on every platform, so each stream lives on
//! a dedicated thread that owns it until told to stop. Capture talks to the
//! session through a channel; playback samples flow through a lock-free
//! ring buffer fed by a separate thread.

use crate::device::{CaptureDevice, PlaybackDevice, PlaybackOutput};
use anyhow::{Context, anyhow, bail};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, StreamConfig};
use parley_core::{
    audio_utils::{StreamResampler, convert_i16_to_f32},
    wav::decode_wav,
};
use ringbuf::{
    HeapCons, HeapProd, HeapRb,
    traits::{Consumer, Producer, Split},
};
use std::collections::VecDeque;
use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
    mpsc as std_mpsc,
};
use std::thread;
use std::time::Duration;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, trace, warn};

const STREAM_READY_TIMEOUT: Duration = Duration::from_secs(5);
const CAPTURE_CHANNEL_BLOCKS: usize = 32;
const CLIP_RESAMPLE_CHUNK: usize = 1024;
const PLAYBACK_RING_MS: usize = 500;
const FEED_POLL: Duration = Duration::from_millis(5);

/// Runs blocking device setup without stalling other tasks on the runtime.
/// `block_in_place` is unavailable on a current-thread runtime, where the
/// work simply runs inline.
fn off_runtime<T>(work: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(work)
        }
        _ => work(),
    }
}

/// Finds a device by name, or the host default when `name` is `None`.
fn find_device(name: Option<&str>, input: bool) -> anyhow::Result<Device> {
    let host = cpal::default_host();
    let Some(name) = name else {
        let device = if input {
            host.default_input_device()
        } else {
            host.default_output_device()
        };
        return device.context("no default audio device available");
    };
    let mut devices = if input {
        host.input_devices()?
    } else {
        host.output_devices()?
    };
    devices
        .find(|d| d.name().map(|n| n == name).unwrap_or(false))
        .with_context(|| format!("audio device '{name}' not found"))
}

/// Names of the available input and output devices.
pub fn list_devices() -> anyhow::Result<(Vec<String>, Vec<String>)> {
    let host = cpal::default_host();
    let inputs = host.input_devices()?.filter_map(|d| d.name().ok()).collect();
    let outputs = host.output_devices()?.filter_map(|d| d.name().ok()).collect();
    Ok((inputs, outputs))
}

/// A thread keeping one cpal stream alive.
struct StreamThread {
    stop: Option<std_mpsc::Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl StreamThread {
    /// Runs `build` on a new thread and waits until the stream is playing.
    fn spawn<F>(name: &str, build: F) -> anyhow::Result<Self>
    where
        F: FnOnce() -> anyhow::Result<cpal::Stream> + Send + 'static,
    {
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(), String>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let stream = match build().and_then(|s| s.play().map(|_| s).map_err(Into::into)) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(format!("{e:#}")));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                // blocks until stop() or the handle is dropped
                let _ = stop_rx.recv();
                drop(stream);
            })?;

        match ready_rx.recv_timeout(STREAM_READY_TIMEOUT) {
            Ok(Ok(())) => Ok(Self {
                stop: Some(stop_tx),
                thread: Some(thread),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(anyhow!(e))
            }
            Err(_) => bail!("audio stream did not start within {STREAM_READY_TIMEOUT:?}"),
        }
    }

    fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for StreamThread {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Microphone capture through cpal.
pub struct CpalCapture {
    device_name: Option<String>,
    config: StreamConfig,
    sample_format: SampleFormat,
    stream: Option<StreamThread>,
}

impl CpalCapture {
    pub fn new(device_name: Option<&str>) -> anyhow::Result<Self> {
        let device = find_device(device_name, true)?;
        let supported = device
            .default_input_config()
            .context("input device has no default config")?;
        info!(
            device = device.name().unwrap_or_default(),
            sample_rate = supported.sample_rate().0,
            channels = supported.channels(),
            "Using input device."
        );
        Ok(Self {
            device_name: device_name.map(str::to_string),
            sample_format: supported.sample_format(),
            config: supported.into(),
            stream: None,
        })
    }
}

fn build_input<T>(
    device: &Device,
    config: &StreamConfig,
    block_size: usize,
    blocks: mpsc::Sender<Vec<f32>>,
) -> anyhow::Result<cpal::Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = usize::from(config.channels.max(1));
    let mut pending: Vec<f32> = Vec::with_capacity(block_size * 2);
    let stream = device.build_input_stream(
        config,
        move |data: &[T], _| {
            for frame in data.chunks(channels) {
                let sum: f32 = frame.iter().map(|s| s.to_sample::<f32>()).sum();
                pending.push(sum / frame.len() as f32);
            }
            while pending.len() >= block_size {
                let block: Vec<f32> = pending.drain(..block_size).collect();
                if blocks.try_send(block).is_err() {
                    trace!("Capture consumer behind; dropping block.");
                }
            }
        },
        |err| error!("Capture stream error: {}", err),
        None,
    )?;
    Ok(stream)
}

impl CaptureDevice for CpalCapture {
    fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    fn start(&mut self, block_size: usize) -> anyhow::Result<mpsc::Receiver<Vec<f32>>> {
        self.stop();
        let (tx, rx) = mpsc::channel(CAPTURE_CHANNEL_BLOCKS);
        let name = self.device_name.clone();
        let config = self.config.clone();
        let format = self.sample_format;
        let stream = off_runtime(|| {
            StreamThread::spawn("parley-capture", move || {
                let device = find_device(name.as_deref(), true)?;
                match format {
                    SampleFormat::F32 => build_input::<f32>(&device, &config, block_size, tx),
                    SampleFormat::I16 => build_input::<i16>(&device, &config, block_size, tx),
                    SampleFormat::U16 => build_input::<u16>(&device, &config, block_size, tx),
                    other => bail!("unsupported input sample format {other:?}"),
                }
            })
        })?;
        self.stream = Some(stream);
        Ok(rx)
    }

    fn stop(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
            debug!("Input stream closed.");
        }
    }
}

/// Speaker playback through cpal.
pub struct CpalPlayback {
    device_name: Option<String>,
}

impl CpalPlayback {
    pub fn new(device_name: Option<&str>) -> Self {
        Self {
            device_name: device_name.map(str::to_string),
        }
    }
}

/// A decoded clip on its way to the ring buffer.
struct QueuedClip {
    samples: Vec<f32>,
    done: oneshot::Sender<()>,
}

/// Owns the ring buffer producer. Writes clips in order as space frees up
/// and fires each clip's completion once the callback has consumed past
/// its last sample.
struct Feeder {
    producer: HeapProd<f32>,
    played: Arc<AtomicUsize>,
    written: usize,
    current: Option<(Vec<f32>, usize)>,
    waiting: VecDeque<(usize, oneshot::Sender<()>)>,
}

impl Feeder {
    fn new(producer: HeapProd<f32>, played: Arc<AtomicUsize>) -> Self {
        Self {
            producer,
            played,
            written: 0,
            current: None,
            waiting: VecDeque::new(),
        }
    }

    fn is_idle(&self) -> bool {
        self.current.is_none() && self.waiting.is_empty()
    }

    fn accept(&mut self, clip: QueuedClip) {
        let end = self.written + clip.samples.len();
        self.waiting.push_back((end, clip.done));
        self.current = Some((clip.samples, 0));
    }

    /// Pushes as much of the current clip as fits. Returns whether it is
    /// now fully written.
    fn fill(&mut self) -> bool {
        let Some((samples, offset)) = self.current.as_mut() else {
            return true;
        };
        let pushed = self.producer.push_slice(&samples[*offset..]);
        *offset += pushed;
        self.written += pushed;
        if *offset == samples.len() {
            self.current = None;
            true
        } else {
            false
        }
    }

    fn complete(&mut self) {
        let played = self.played.load(Ordering::Acquire);
        while self.waiting.front().is_some_and(|(end, _)| *end <= played) {
            if let Some((_, done)) = self.waiting.pop_front() {
                let _ = done.send(());
            }
        }
    }

    fn run(mut self, clips: std_mpsc::Receiver<QueuedClip>, stop: Arc<AtomicBool>) {
        while !stop.load(Ordering::Acquire) {
            if self.current.is_none() {
                let next = if self.is_idle() {
                    clips.recv().ok()
                } else {
                    match clips.try_recv() {
                        Ok(clip) => Some(clip),
                        Err(std_mpsc::TryRecvError::Empty) => None,
                        Err(std_mpsc::TryRecvError::Disconnected) => break,
                    }
                };
                match next {
                    Some(clip) => self.accept(clip),
                    None if self.is_idle() => break,
                    None => {}
                }
            }
            let written = self.fill();
            self.complete();
            if !written || !self.waiting.is_empty() {
                thread::sleep(FEED_POLL);
            }
        }
        trace!(pending = self.waiting.len(), "Playback feeder stopped.");
    }
}

/// Fills `mono` from the ring buffer, padding with silence, and counts the
/// samples actually played.
fn pull(consumer: &mut HeapCons<f32>, mono: &mut [f32], played: &AtomicUsize) {
    let read = consumer.pop_slice(mono);
    mono[read..].fill(0.0);
    if read > 0 {
        played.fetch_add(read, Ordering::Release);
    }
}

fn build_output<T>(
    device: &Device,
    config: &StreamConfig,
    mut consumer: HeapCons<f32>,
    played: Arc<AtomicUsize>,
) -> anyhow::Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = usize::from(config.channels.max(1));
    let mut mono: Vec<f32> = Vec::new();
    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            let frames = data.len() / channels;
            if mono.len() < frames {
                mono.resize(frames, 0.0);
            }
            pull(&mut consumer, &mut mono[..frames], &played);
            for (frame, &sample) in data.chunks_mut(channels).zip(mono.iter()) {
                frame.fill(T::from_sample(sample));
            }
        },
        |err| error!("Playback stream error: {}", err),
        None,
    )?;
    Ok(stream)
}

impl PlaybackDevice for CpalPlayback {
    fn open(&self, sample_rate: u32, channels: u16) -> anyhow::Result<Box<dyn PlaybackOutput>> {
        let device = find_device(self.device_name.as_deref(), false)?;
        let supported = device
            .default_output_config()
            .context("output device has no default config")?;
        let format = supported.sample_format();
        let config: StreamConfig = supported.into();
        info!(
            device = device.name().unwrap_or_default(),
            device_rate = config.sample_rate.0,
            stream_rate = sample_rate,
            stream_channels = channels,
            "Using output device."
        );

        let device_rate = config.sample_rate.0;
        let capacity = (device_rate as usize * PLAYBACK_RING_MS / 1000).max(CLIP_RESAMPLE_CHUNK);
        let (producer, consumer) = HeapRb::<f32>::new(capacity).split();
        let played = Arc::new(AtomicUsize::new(0));

        let name = self.device_name.clone();
        let callback_played = played.clone();
        let stream = off_runtime(|| {
            StreamThread::spawn("parley-playback", move || {
                let device = find_device(name.as_deref(), false)?;
                match format {
                    SampleFormat::F32 => build_output::<f32>(&device, &config, consumer, callback_played),
                    SampleFormat::I16 => build_output::<i16>(&device, &config, consumer, callback_played),
                    SampleFormat::U16 => build_output::<u16>(&device, &config, consumer, callback_played),
                    other => bail!("unsupported output sample format {other:?}"),
                }
            })
        })?;

        let (clips, clips_rx) = std_mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let feeder_stop = stop.clone();
        let feeder = Feeder::new(producer, played);
        let feeder = thread::Builder::new()
            .name("parley-playback-feed".to_string())
            .spawn(move || feeder.run(clips_rx, feeder_stop))?;

        Ok(Box::new(CpalOutput {
            clips: Some(clips),
            stop,
            feeder: Some(feeder),
            device_rate,
            stream: Some(stream),
        }))
    }
}

struct CpalOutput {
    clips: Option<std_mpsc::Sender<QueuedClip>>,
    stop: Arc<AtomicBool>,
    feeder: Option<thread::JoinHandle<()>>,
    device_rate: u32,
    stream: Option<StreamThread>,
}

impl CpalOutput {
    /// Mono f32 samples of a WAV clip at the device rate.
    fn prepare(&self, wav: &[u8]) -> anyhow::Result<Vec<f32>> {
        let clip = decode_wav(wav)?;
        let channels = usize::from(clip.channels.max(1));
        let mono: Vec<f32> = convert_i16_to_f32(&clip.samples)
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect();
        if clip.sample_rate == self.device_rate || mono.is_empty() {
            return Ok(mono);
        }

        let mut resampler =
            StreamResampler::new(clip.sample_rate, self.device_rate, CLIP_RESAMPLE_CHUNK)?;
        let expected =
            (mono.len() as u64 * u64::from(self.device_rate) / u64::from(clip.sample_rate)) as usize;
        let mut out = resampler.process(&mono)?;
        // flush the partial last chunk
        out.extend(resampler.process(&vec![0.0; CLIP_RESAMPLE_CHUNK])?);
        out.truncate(expected);
        Ok(out)
    }
}

impl PlaybackOutput for CpalOutput {
    fn submit(&mut self, wav: Vec<u8>) -> anyhow::Result<oneshot::Receiver<()>> {
        let Some(clips) = &self.clips else {
            bail!("playback output already released");
        };
        let samples = self.prepare(&wav)?;
        let (done, finished) = oneshot::channel();
        clips
            .send(QueuedClip { samples, done })
            .map_err(|_| anyhow!("playback feeder has stopped"))?;
        Ok(finished)
    }

    fn release(&mut self) {
        self.stop.store(true, Ordering::Release);
        self.clips = None;
        if let Some(feeder) = self.feeder.take() {
            if feeder.join().is_err() {
                warn!("Playback feeder panicked.");
            }
        }
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
        }
        debug!("Output stream closed.");
    }
}
