//! Playback Scheduler: a single-consumer actor that plays frames one at a
//! time, strictly in arrival order.

use crate::device::PlaybackOutput;
use parley_core::{AudioFrame, wav::encode_wav};
use std::collections::VecDeque;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, warn};

/// Owns the acquired output and releases it exactly once, on drop.
pub(crate) struct OutputGuard {
    output: Box<dyn PlaybackOutput>,
    released: bool,
}

impl OutputGuard {
    pub(crate) fn new(output: Box<dyn PlaybackOutput>) -> Self {
        Self {
            output,
            released: false,
        }
    }

    fn submit(&mut self, wav: Vec<u8>) -> anyhow::Result<oneshot::Receiver<()>> {
        self.output.submit(wav)
    }
}

impl Drop for OutputGuard {
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            self.output.release();
            debug!("Playback output released.");
        }
    }
}

struct QueuedFrame {
    seq: u64,
    frame: AudioFrame,
}

/// Handle to the playback actor.
pub(crate) struct PlaybackScheduler {
    frames: Option<mpsc::UnboundedSender<AudioFrame>>,
    task: Option<JoinHandle<()>>,
}

impl PlaybackScheduler {
    pub(crate) fn spawn(output: OutputGuard, queue_limit: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(output, rx, queue_limit.max(1)));
        Self {
            frames: Some(tx),
            task: Some(task),
        }
    }

    pub(crate) fn enqueue(&self, frame: AudioFrame) {
        if let Some(tx) = &self.frames {
            // the actor only goes away after stop()
            let _ = tx.send(frame);
        }
    }

    /// Drops queued frames, ignores the pending completion and releases the
    /// output. Idempotent.
    pub(crate) async fn stop(&mut self) {
        self.frames = None;
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

async fn finished(playing: &mut Option<oneshot::Receiver<()>>) {
    match playing {
        Some(done) => {
            let _ = done.await;
        }
        None => std::future::pending().await,
    }
}

async fn run(
    mut output: OutputGuard,
    mut frames: mpsc::UnboundedReceiver<AudioFrame>,
    queue_limit: usize,
) {
    let mut queue: VecDeque<QueuedFrame> = VecDeque::new();
    let mut playing: Option<oneshot::Receiver<()>> = None;
    let mut next_seq = 0u64;

    loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Some(frame) => {
                    if queue.len() >= queue_limit {
                        if let Some(dropped) = queue.pop_front() {
                            warn!(seq = dropped.seq, queue_limit, "Playback queue full; dropping oldest frame.");
                        }
                    }
                    queue.push_back(QueuedFrame { seq: next_seq, frame });
                    next_seq += 1;
                }
                None => break,
            },
            _ = finished(&mut playing), if playing.is_some() => {
                playing = None;
            }
        }

        while playing.is_none() {
            let Some(QueuedFrame { seq, frame }) = queue.pop_front() else {
                break;
            };
            let wav = match encode_wav(&frame) {
                Ok(wav) => wav,
                Err(e) => {
                    warn!(seq, error = %e, "Skipping undecodable playback frame.");
                    continue;
                }
            };
            match output.submit(wav) {
                Ok(done) => {
                    debug!(seq, samples = frame.sample_count(), "Playing frame");
                    playing = Some(done);
                }
                Err(e) => warn!(seq, error = %e, "Playback device rejected frame; skipping."),
            }
        }
    }
    debug!(dropped = queue.len(), "Playback scheduler stopped.");
}
