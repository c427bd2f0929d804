//! Capture Pipeline: microphone blocks to `input_audio_buffer.append`.

use super::state::ConnectionState;
use crate::{device::CaptureDevice, error::SessionError};
use parley_core::audio_utils::{StreamResampler, encode_f32_to_base64_i16};
use parley_relay_types::ClientEvent;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

pub(crate) struct CaptureController {
    device: Box<dyn CaptureDevice>,
    task: Option<JoinHandle<()>>,
}

impl CaptureController {
    pub(crate) fn new(device: Box<dyn CaptureDevice>) -> Self {
        Self { device, task: None }
    }

    /// Starts the device and the forwarding task. A no-op while running.
    ///
    /// `activity` receives a notice for every block sent; it never blocks
    /// the pipeline.
    pub(crate) fn start(
        &mut self,
        block_size: usize,
        target_rate: u32,
        state: watch::Receiver<ConnectionState>,
        outbound: mpsc::Sender<ClientEvent>,
        activity: mpsc::Sender<()>,
    ) -> Result<(), SessionError> {
        if self.task.is_some() {
            return Ok(());
        }
        let native_rate = self.device.sample_rate();
        let mut resampler = StreamResampler::new(native_rate, target_rate, block_size)?;
        let mut blocks = self.device.start(block_size).map_err(SessionError::Device)?;
        info!(native_rate, target_rate, block_size, "Capture started.");

        self.task = Some(tokio::spawn(async move {
            let is_connected = |state: &watch::Receiver<ConnectionState>| {
                *state.borrow() == ConnectionState::Connected
            };
            while let Some(block) = blocks.recv().await {
                if !is_connected(&state) {
                    break;
                }
                let samples = match resampler.process(&block) {
                    Ok(samples) => samples,
                    Err(e) => {
                        warn!(error = %e, "Dropping capture block that failed to resample.");
                        continue;
                    }
                };
                if samples.is_empty() {
                    continue;
                }
                let audio = encode_f32_to_base64_i16(&samples);
                // the session may have ended while this block was encoded
                if !is_connected(&state) {
                    break;
                }
                if outbound
                    .send(ClientEvent::InputAudioBufferAppend { audio })
                    .await
                    .is_err()
                {
                    break;
                }
                let _ = activity.try_send(());
            }
            debug!("Capture forwarding stopped.");
        }));
        Ok(())
    }

    /// Stops forwarding and the device. Nothing is sent after this returns.
    pub(crate) async fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
            self.device.stop();
            info!("Capture stopped.");
        }
    }
}
