//! CPAL-based audio output backend.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, SampleFormat, SizedSample, Stream, StreamConfig};
use m4a_ir::StereoSample;
use tracing::{error, info};

use crate::ring_buffer::RingConsumer;
use crate::traits::{AudioError, AudioOutput};

/// Frames converted per ring take inside one device callback.
const CALLBACK_CHUNK: usize = 4096;

/// CPAL-based audio output.
pub struct CpalOutput {
    device: Device,
    config: StreamConfig,
    sample_format: SampleFormat,
    stream: Option<Stream>,
}

impl CpalOutput {
    /// Open the default output device with its default configuration.
    pub fn new() -> Result<Self, AudioError> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(AudioError::NoDevice)?;

        let supported = device
            .default_output_config()
            .map_err(|e| AudioError::DeviceInit(e.to_string()))?;
        let sample_format = supported.sample_format();
        let config: StreamConfig = supported.into();

        info!(
            device = device.name().unwrap_or_default(),
            rate = config.sample_rate.0,
            channels = config.channels,
            format = %sample_format,
            "audio device opened"
        );

        Ok(Self { device, config, sample_format, stream: None })
    }

    /// Build the stream pulling from `consumer`. The stream starts paused.
    pub fn build_stream(&mut self, consumer: RingConsumer) -> Result<(), AudioError> {
        let stream = match self.sample_format {
            SampleFormat::F32 => self.build::<f32>(consumer)?,
            SampleFormat::I16 => self.build::<i16>(consumer)?,
            SampleFormat::U16 => self.build::<u16>(consumer)?,
            other => return Err(AudioError::UnsupportedFormat(other.to_string())),
        };
        stream.pause().map_err(|e| AudioError::Playback(e.to_string()))?;
        self.stream = Some(stream);
        Ok(())
    }

    fn build<T>(&self, mut consumer: RingConsumer) -> Result<Stream, AudioError>
    where
        T: SizedSample + FromSample<f32>,
    {
        let channels = usize::from(self.config.channels);
        let mut scratch = vec![StereoSample::silence(); CALLBACK_CHUNK];

        self.device
            .build_output_stream(
                &self.config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    #[cfg(all(feature = "alloc_check", debug_assertions))]
                    assert_no_alloc::assert_no_alloc(|| {
                        fill_device_buffer(data, channels, &mut consumer, &mut scratch)
                    });
                    #[cfg(not(all(feature = "alloc_check", debug_assertions)))]
                    fill_device_buffer(data, channels, &mut consumer, &mut scratch);
                },
                |err| error!(%err, "audio stream error"),
                None,
            )
            .map_err(|e| AudioError::StreamCreate(e.to_string()))
    }
}

/// Copy ring samples into an interleaved device buffer of any channel
/// count. Mono devices get the average of both sides; channels past the
/// second are silent.
fn fill_device_buffer<T>(
    data: &mut [T],
    channels: usize,
    consumer: &mut RingConsumer,
    scratch: &mut [StereoSample],
) where
    T: SizedSample + FromSample<f32>,
{
    let channels = channels.max(1);
    for device_chunk in data.chunks_mut(scratch.len() * channels) {
        let frames = device_chunk.len() / channels;
        let block = &mut scratch[..frames];
        consumer.take(block);

        for (frame, s) in device_chunk.chunks_mut(channels).zip(block.iter()) {
            if channels == 1 {
                frame[0] = T::from_sample(((s.left + s.right) * 0.5).clamp(-1.0, 1.0));
                continue;
            }
            for (i, out) in frame.iter_mut().enumerate() {
                let v = match i {
                    0 => s.left,
                    1 => s.right,
                    _ => 0.0,
                };
                *out = T::from_sample(v.clamp(-1.0, 1.0));
            }
        }
    }
}

impl AudioOutput for CpalOutput {
    fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    fn start(&mut self) -> Result<(), AudioError> {
        if let Some(ref stream) = self.stream {
            stream.play().map_err(|e| AudioError::Playback(e.to_string()))?;
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), AudioError> {
        if let Some(ref stream) = self.stream {
            stream.pause().map_err(|e| AudioError::Playback(e.to_string()))?;
        }
        Ok(())
    }
}
