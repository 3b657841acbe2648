//! Audio output primitive: stored blobs are decoded with symphonia, converted
//! to the device rate with rubato and rendered through a cpal output stream.
//!
//! The output callback reports `TimeUpdate` and `Ended` on the bus as
//! [`PlaybackMessage::PrimitiveEvent`], the way the session manager expects
//! primitive events to arrive.

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use log::{debug, error, trace, warn};
use rubato::{FftFixedIn, Resampler};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tokio::sync::broadcast::Sender;

use crate::error::PlayerError;
use crate::playback::primitive::{PlaybackEvent, PlaybackPrimitive, PlaybackSource};
use crate::protocol::{Message, PlaybackMessage};

const RESAMPLER_CHUNK_FRAMES: usize = 1024;
const RESAMPLER_SUB_CHUNKS: usize = 2;
/// Frames rendered between two `TimeUpdate` events.
const TIME_UPDATE_FRAMES: usize = 12_000;

/// Interleaved PCM at its native rate.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: usize,
}

impl DecodedAudio {
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels
        }
    }
}

fn playback_failure(context: &str, err: impl std::fmt::Display) -> PlayerError {
    PlayerError::PlaybackFailure(format!("{}: {}", context, err))
}

/// Decodes a whole stored blob. The MIME type is only a probe hint.
pub fn decode_blob(data: Arc<[u8]>, mime_type: &str) -> Result<DecodedAudio, PlayerError> {
    let media_source = MediaSourceStream::new(Box::new(Cursor::new(data)), Default::default());
    let mut hint = Hint::new();
    hint.mime_type(mime_type);

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            media_source,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|err| playback_failure("unrecognised audio", err))?;
    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| PlayerError::PlaybackFailure("no default track".to_string()))?;
    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(44_100);
    let mut channels = track
        .codec_params
        .channels
        .map(|channels| channels.count())
        .unwrap_or(0);
    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|err| playback_failure("unsupported codec", err))?;

    let mut samples = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(err))
                if err.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(err) => {
                warn!("Decoder: stopping at unreadable packet: {}", err);
                break;
            }
        };
        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                sample_rate = spec.rate;
                channels = spec.channels.count();
                let mut sample_buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                sample_buffer.copy_interleaved_ref(decoded);
                samples.extend_from_slice(sample_buffer.samples());
            }
            Err(SymphoniaError::DecodeError(err)) => {
                debug!("Decoder: skipping corrupt packet: {}", err);
            }
            Err(err) => {
                warn!("Decoder: decode error: {}", err);
                break;
            }
        }
    }

    if channels == 0 || samples.is_empty() {
        return Err(PlayerError::PlaybackFailure(
            "no audio frames decoded".to_string(),
        ));
    }
    debug!(
        "Decoder: {} frames, sample_rate={}, channels={}",
        samples.len() / channels,
        sample_rate,
        channels
    );
    Ok(DecodedAudio {
        samples,
        sample_rate,
        channels,
    })
}

/// Converts `audio` to `target_rate`, keeping its channel count.
pub fn resample(audio: DecodedAudio, target_rate: u32) -> Result<DecodedAudio, PlayerError> {
    let frames = audio.frames();
    if audio.sample_rate == target_rate || frames == 0 || target_rate == 0 {
        return Ok(audio);
    }
    let channels = audio.channels;
    let mut resampler = FftFixedIn::<f32>::new(
        audio.sample_rate as usize,
        target_rate as usize,
        RESAMPLER_CHUNK_FRAMES,
        RESAMPLER_SUB_CHUNKS,
        channels,
    )
    .map_err(|err| playback_failure("resampler setup failed", err))?;

    let planar: Vec<Vec<f32>> = (0..channels)
        .map(|channel| {
            audio
                .samples
                .iter()
                .skip(channel)
                .step_by(channels)
                .copied()
                .collect()
        })
        .collect();

    let mut output: Vec<Vec<f32>> = vec![Vec::new(); channels];
    let mut start = 0;
    while start < frames {
        let needed = resampler.input_frames_next();
        let end = (start + needed).min(frames);
        let chunk: Vec<&[f32]> = planar.iter().map(|channel| &channel[start..end]).collect();
        let processed = if end - start == needed {
            resampler.process(chunk.as_slice(), None)
        } else {
            resampler.process_partial(Some(chunk.as_slice()), None)
        }
        .map_err(|err| playback_failure("resampling failed", err))?;
        for (out, channel) in output.iter_mut().zip(processed) {
            out.extend(channel);
        }
        start = end;
    }

    let delay = resampler.output_delay();
    let expected = (frames as u64 * u64::from(target_rate) / u64::from(audio.sample_rate)) as usize;
    // Flush the delay line with silence until the tail is out.
    while output[0].len() < delay + expected {
        let tail = resampler
            .process_partial::<&[f32]>(None, None)
            .map_err(|err| playback_failure("resampling failed", err))?;
        if tail[0].is_empty() {
            break;
        }
        for (out, channel) in output.iter_mut().zip(tail) {
            out.extend(channel);
        }
    }

    let produced = output[0].len().saturating_sub(delay).min(expected);
    let mut samples = Vec::with_capacity(produced * channels);
    for frame in delay..delay + produced {
        for channel in &output {
            samples.push(channel[frame]);
        }
    }
    trace!(
        "Resampler: {} Hz -> {} Hz, {} -> {} frames",
        audio.sample_rate,
        target_rate,
        frames,
        produced
    );
    Ok(DecodedAudio {
        samples,
        sample_rate: target_rate,
        channels,
    })
}

/// Maps interleaved samples onto another channel count. Mono output averages
/// the inputs; wider output repeats input channels in order.
pub fn remix(samples: &[f32], from_channels: usize, to_channels: usize) -> Vec<f32> {
    if from_channels == to_channels || from_channels == 0 || to_channels == 0 {
        return samples.to_vec();
    }
    let mut remixed = Vec::with_capacity(samples.len() / from_channels * to_channels);
    for frame in samples.chunks_exact(from_channels) {
        if to_channels == 1 {
            remixed.push(frame.iter().sum::<f32>() / from_channels as f32);
        } else {
            for channel in 0..to_channels {
                remixed.push(frame[channel % from_channels]);
            }
        }
    }
    remixed
}

/// State shared with the output callback.
struct OutputState {
    samples: Mutex<Arc<[f32]>>,
    /// Next interleaved sample to render.
    position: AtomicUsize,
    is_playing: AtomicBool,
    volume: AtomicU32,
    ended_reported: AtomicBool,
}

impl OutputState {
    fn new() -> Self {
        Self {
            samples: Mutex::new(Arc::from(Vec::new())),
            position: AtomicUsize::new(0),
            is_playing: AtomicBool::new(false),
            volume: AtomicU32::new(1.0f32.to_bits()),
            ended_reported: AtomicBool::new(false),
        }
    }

    fn replace_samples(&self, samples: Arc<[f32]>) {
        self.is_playing.store(false, Ordering::Relaxed);
        if let Ok(mut current) = self.samples.lock() {
            *current = samples;
        }
        self.position.store(0, Ordering::Relaxed);
        self.ended_reported.store(false, Ordering::Relaxed);
    }
}

fn publish_event(bus_sender: &Sender<Message>, event: PlaybackEvent) {
    let _ = bus_sender.send(Message::Playback(PlaybackMessage::PrimitiveEvent(event)));
}

fn render_output_buffer<T, F>(
    output_buffer: &mut [T],
    state: &OutputState,
    bus_sender: &Sender<Message>,
    sample_rate: u32,
    channels: usize,
    mut convert_sample: F,
    silence_value: T,
) where
    T: Copy,
    F: FnMut(f32) -> T,
{
    if !state.is_playing.load(Ordering::Relaxed) {
        output_buffer.fill(silence_value);
        return;
    }
    let Ok(samples) = state.samples.lock() else {
        output_buffer.fill(silence_value);
        return;
    };

    let gain = f32::from_bits(state.volume.load(Ordering::Relaxed)).clamp(0.0, 1.0);
    let start = state.position.load(Ordering::Relaxed);
    let mut position = start;
    for slot in output_buffer.iter_mut() {
        *slot = match samples.get(position) {
            Some(sample) => {
                position += 1;
                convert_sample(sample * gain)
            }
            None => silence_value,
        };
    }
    let total = samples.len();
    drop(samples);

    // A seek that landed while rendering wins over the rendered position.
    if state
        .position
        .compare_exchange(start, position, Ordering::Relaxed, Ordering::Relaxed)
        .is_err()
    {
        return;
    }

    let samples_per_second = (sample_rate as usize * channels).max(1) as f64;
    if position >= total {
        state.is_playing.store(false, Ordering::Relaxed);
        if !state.ended_reported.swap(true, Ordering::Relaxed) {
            publish_event(bus_sender, PlaybackEvent::Ended);
        }
    } else {
        let interval = (TIME_UPDATE_FRAMES * channels).max(1);
        if start / interval != position / interval {
            publish_event(
                bus_sender,
                PlaybackEvent::TimeUpdate {
                    current_secs: position as f64 / samples_per_second,
                    duration_secs: total as f64 / samples_per_second,
                },
            );
        }
    }
}

fn quantize_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16
}

fn quantize_u16(sample: f32) -> u16 {
    ((sample.clamp(-1.0, 1.0) + 1.0) * 0.5 * f32::from(u16::MAX)) as u16
}

/// Plays through the default cpal output device.
pub struct CpalPlayback {
    bus_sender: Sender<Message>,
    state: Arc<OutputState>,
    device: Option<cpal::Device>,
    config: Option<cpal::StreamConfig>,
    sample_format: cpal::SampleFormat,
    stream: Option<cpal::Stream>,
    source: Option<PlaybackSource>,
    load_error: Option<String>,
    sample_rate: u32,
    channels: usize,
}

impl CpalPlayback {
    /// Opens the default output device. Without one the primitive still
    /// accepts sources but refuses to play.
    pub fn new(bus_sender: Sender<Message>) -> Self {
        let mut playback = Self {
            bus_sender,
            state: Arc::new(OutputState::new()),
            device: None,
            config: None,
            sample_format: cpal::SampleFormat::F32,
            stream: None,
            source: None,
            load_error: None,
            sample_rate: 0,
            channels: 0,
        };
        playback.setup_audio_device();
        playback.create_stream();
        playback
    }

    fn setup_audio_device(&mut self) {
        let host = cpal::default_host();
        let Some(device) = host.default_output_device() else {
            error!("No output device available");
            return;
        };
        let supported = match device.default_output_config() {
            Ok(config) => config,
            Err(e) => {
                error!("Error getting default output config: {}", e);
                return;
            }
        };

        self.sample_format = supported.sample_format();
        self.sample_rate = supported.sample_rate().0;
        self.channels = usize::from(supported.channels());
        self.config = Some(supported.config());
        self.device = Some(device);
        debug!(
            "CpalPlayback: output device initialized: sr={} channels={} format={:?}",
            self.sample_rate, self.channels, self.sample_format
        );
    }

    fn create_stream(&mut self) {
        self.stream = None;
        let Some(device) = self.device.as_ref() else {
            warn!("CpalPlayback: cannot create stream without an output device");
            return;
        };
        let Some(config) = self.config.as_ref() else {
            warn!("CpalPlayback: cannot create stream without a stream config");
            return;
        };

        let state = self.state.clone();
        let bus_sender = self.bus_sender.clone();
        let sample_rate = self.sample_rate;
        let channels = self.channels;

        let stream_result = match self.sample_format {
            cpal::SampleFormat::F32 => device.build_output_stream(
                config,
                move |output_buffer: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    render_output_buffer(
                        output_buffer,
                        &state,
                        &bus_sender,
                        sample_rate,
                        channels,
                        |sample| sample.clamp(-1.0, 1.0),
                        0.0,
                    );
                },
                |err| error!("Audio stream error: {}", err),
                None,
            ),
            cpal::SampleFormat::I16 => device.build_output_stream(
                config,
                move |output_buffer: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    render_output_buffer(
                        output_buffer,
                        &state,
                        &bus_sender,
                        sample_rate,
                        channels,
                        quantize_i16,
                        0,
                    );
                },
                |err| error!("Audio stream error: {}", err),
                None,
            ),
            cpal::SampleFormat::U16 => device.build_output_stream(
                config,
                move |output_buffer: &mut [u16], _: &cpal::OutputCallbackInfo| {
                    render_output_buffer(
                        output_buffer,
                        &state,
                        &bus_sender,
                        sample_rate,
                        channels,
                        quantize_u16,
                        u16::MAX / 2 + 1,
                    );
                },
                |err| error!("Audio stream error: {}", err),
                None,
            ),
            other => {
                error!("Unsupported output sample format: {:?}", other);
                return;
            }
        };

        match stream_result {
            Ok(stream) => {
                if let Err(e) = stream.play() {
                    warn!("CpalPlayback: stream created suspended: {}", e);
                }
                self.stream = Some(stream);
                debug!("Audio stream created");
            }
            Err(e) => error!("Failed to build audio stream: {}", e),
        }
    }

    fn samples_per_second(&self) -> f64 {
        (self.sample_rate as usize * self.channels).max(1) as f64
    }

    fn sample_count(&self) -> usize {
        self.state
            .samples
            .lock()
            .map(|samples| samples.len())
            .unwrap_or(0)
    }

    fn prepare(&self, source: &PlaybackSource) -> Result<DecodedAudio, PlayerError> {
        let decoded = decode_blob(source.data.clone(), &source.mime_type)?;
        if self.device.is_none() {
            return Ok(decoded);
        }
        let resampled = resample(decoded, self.sample_rate)?;
        Ok(DecodedAudio {
            samples: remix(&resampled.samples, resampled.channels, self.channels),
            sample_rate: self.sample_rate,
            channels: self.channels,
        })
    }
}

impl PlaybackPrimitive for CpalPlayback {
    fn set_source(&mut self, source: PlaybackSource) {
        debug!("CpalPlayback: loading {}", source.handle);
        match self.prepare(&source) {
            Ok(audio) => {
                if self.device.is_none() {
                    self.sample_rate = audio.sample_rate;
                    self.channels = audio.channels;
                }
                self.state.replace_samples(Arc::from(audio.samples));
                self.load_error = None;
            }
            Err(err) => {
                warn!("CpalPlayback: cannot load {}: {}", source.handle, err);
                self.state.replace_samples(Arc::from(Vec::new()));
                self.load_error = Some(err.to_string());
            }
        }
        self.source = Some(source);
    }

    fn clear_source(&mut self) {
        self.state.replace_samples(Arc::from(Vec::new()));
        self.source = None;
        self.load_error = None;
    }

    fn play(&mut self) -> Result<(), PlayerError> {
        if self.source.is_none() {
            return Err(PlayerError::PlaybackFailure("no source loaded".to_string()));
        }
        if let Some(reason) = &self.load_error {
            return Err(PlayerError::PlaybackFailure(reason.clone()));
        }
        let Some(stream) = self.stream.as_ref() else {
            return Err(PlayerError::PlaybackFailure(
                "output stream is not open".to_string(),
            ));
        };
        stream
            .play()
            .map_err(|err| playback_failure("output context is suspended", err))?;

        if self.state.position.load(Ordering::Relaxed) >= self.sample_count() {
            self.state.position.store(0, Ordering::Relaxed);
        }
        self.state.ended_reported.store(false, Ordering::Relaxed);
        self.state.is_playing.store(true, Ordering::Relaxed);
        publish_event(&self.bus_sender, PlaybackEvent::Play);
        Ok(())
    }

    fn pause(&mut self) {
        if self.state.is_playing.swap(false, Ordering::Relaxed) {
            publish_event(&self.bus_sender, PlaybackEvent::Pause);
        }
    }

    fn is_paused(&self) -> bool {
        !self.state.is_playing.load(Ordering::Relaxed)
    }

    fn has_source(&self) -> bool {
        self.source.is_some()
    }

    fn seek(&mut self, position_secs: f64) {
        let upper = self.duration().unwrap_or(0.0);
        let frame = (position_secs.clamp(0.0, upper) * f64::from(self.sample_rate)) as usize;
        let position = (frame * self.channels).min(self.sample_count());
        self.state.position.store(position, Ordering::Relaxed);
        self.state.ended_reported.store(false, Ordering::Relaxed);
    }

    fn current_time(&self) -> f64 {
        self.state.position.load(Ordering::Relaxed) as f64 / self.samples_per_second()
    }

    fn duration(&self) -> Option<f64> {
        if self.source.is_none() || self.load_error.is_some() {
            return None;
        }
        Some(self.sample_count() as f64 / self.samples_per_second())
    }

    fn set_volume(&mut self, volume: f32) {
        self.state
            .volume
            .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    fn resume_context(&mut self) -> Result<(), PlayerError> {
        if self.device.is_none() {
            self.setup_audio_device();
        }
        self.create_stream();
        if self.stream.is_some() {
            Ok(())
        } else {
            Err(PlayerError::PlaybackFailure(
                "no output stream available".to_string(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast;

    fn wav_bytes(sample_rate: u32, channels: u16, samples: &[i16]) -> Vec<u8> {
        let data_len = (samples.len() * 2) as u32;
        let block_align = channels * 2;
        let mut out = Vec::new();
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&(36 + data_len).to_le_bytes());
        out.extend_from_slice(b"WAVE");
        out.extend_from_slice(b"fmt ");
        out.extend_from_slice(&16u32.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&channels.to_le_bytes());
        out.extend_from_slice(&sample_rate.to_le_bytes());
        out.extend_from_slice(&(sample_rate * u32::from(block_align)).to_le_bytes());
        out.extend_from_slice(&block_align.to_le_bytes());
        out.extend_from_slice(&16u16.to_le_bytes());
        out.extend_from_slice(b"data");
        out.extend_from_slice(&data_len.to_le_bytes());
        for sample in samples {
            out.extend_from_slice(&sample.to_le_bytes());
        }
        out
    }

    fn drain_events(receiver: &mut broadcast::Receiver<Message>) -> Vec<PlaybackEvent> {
        let mut events = Vec::new();
        while let Ok(message) = receiver.try_recv() {
            if let Message::Playback(PlaybackMessage::PrimitiveEvent(event)) = message {
                events.push(event);
            }
        }
        events
    }

    #[test]
    fn test_decode_wav_blob() {
        let blob = wav_bytes(8_000, 1, &[16_384; 800]);
        let decoded = decode_blob(Arc::from(blob), "audio/wav").expect("decode");

        assert_eq!(decoded.sample_rate, 8_000);
        assert_eq!(decoded.channels, 1);
        assert_eq!(decoded.frames(), 800);
        assert!((decoded.samples[0] - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_decode_rejects_non_audio_bytes() {
        let err = decode_blob(Arc::from(vec![0x42u8; 64]), "audio/mpeg")
            .expect_err("garbage is not decodable");
        assert!(matches!(err, PlayerError::PlaybackFailure(_)));
    }

    #[test]
    fn test_resample_scales_frame_count() {
        let audio = DecodedAudio {
            samples: vec![0.25; 8_000 * 2],
            sample_rate: 8_000,
            channels: 2,
        };
        let resampled = resample(audio, 16_000).expect("resample");

        assert_eq!(resampled.sample_rate, 16_000);
        assert_eq!(resampled.channels, 2);
        assert_eq!(resampled.frames(), 16_000);
        let middle = resampled.samples[resampled.samples.len() / 2];
        assert!((middle - 0.25).abs() < 0.01);
    }

    #[test]
    fn test_resample_same_rate_is_untouched() {
        let audio = DecodedAudio {
            samples: vec![0.1, 0.2, 0.3],
            sample_rate: 44_100,
            channels: 1,
        };
        assert_eq!(resample(audio.clone(), 44_100).expect("resample"), audio);
    }

    #[test]
    fn test_remix_mono_and_stereo() {
        assert_eq!(remix(&[0.1, 0.2], 1, 2), vec![0.1, 0.1, 0.2, 0.2]);
        let mono = remix(&[0.2, 0.4, -1.0, 1.0], 2, 1);
        assert_eq!(mono.len(), 2);
        assert!((mono[0] - 0.3).abs() < 1e-6);
        assert!(mono[1].abs() < 1e-6);
        assert_eq!(remix(&[0.5, 0.5], 2, 2), vec![0.5, 0.5]);
    }

    #[test]
    fn test_render_applies_volume_and_reports_end_once() {
        let (bus_sender, mut receiver) = broadcast::channel(16);
        let state = OutputState::new();
        state.replace_samples(Arc::from(vec![1.0f32; 4]));
        state.volume.store(0.5f32.to_bits(), Ordering::Relaxed);
        state.is_playing.store(true, Ordering::Relaxed);

        let mut buffer = [9.0f32; 6];
        render_output_buffer(&mut buffer, &state, &bus_sender, 2, 2, |s| s, 0.0);

        assert_eq!(buffer, [0.5, 0.5, 0.5, 0.5, 0.0, 0.0]);
        assert!(!state.is_playing.load(Ordering::Relaxed));
        assert_eq!(drain_events(&mut receiver), vec![PlaybackEvent::Ended]);

        state.is_playing.store(true, Ordering::Relaxed);
        render_output_buffer(&mut buffer, &state, &bus_sender, 2, 2, |s| s, 0.0);
        assert!(drain_events(&mut receiver).is_empty());
    }

    #[test]
    fn test_render_outputs_silence_while_paused() {
        let (bus_sender, _receiver) = broadcast::channel(16);
        let state = OutputState::new();
        state.replace_samples(Arc::from(vec![1.0f32; 4]));

        let mut buffer = [7i16; 4];
        render_output_buffer(&mut buffer, &state, &bus_sender, 2, 2, quantize_i16, 0);

        assert_eq!(buffer, [0; 4]);
        assert_eq!(state.position.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_quantize_limits() {
        assert_eq!(quantize_i16(2.0), i16::MAX);
        assert_eq!(quantize_i16(-1.0), -i16::MAX);
        assert_eq!(quantize_u16(-1.0), 0);
        assert_eq!(quantize_u16(1.0), u16::MAX);
    }
}
