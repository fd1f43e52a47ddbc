//! Audio Pipeline — VAD/level gating, utterance segmentation, barge-in
//! detection, and the interruptible outbound send loop.
//!
//! This is the realtime core of the call: one task owns the inbound frame
//! loop (segmentation), while `speak`/`stop_speaking` are called directly by
//! the Dialogue Engine and race against barge-in via a couple of atomics —
//! the same "owned by the sender, read without locks" pattern the teacher
//! uses for its own coarse cross-task timing fields.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::warn;

use crate::audio_constants::{AUDIO_FRAME_SAMPLES, AUDIO_SAMPLE_RATE, ULAW_CHUNK_BYTES, ULAW_SILENCE_BYTE};
use crate::codec::ulaw::ulaw_encode;
use crate::session::{AgentState, Session};
use crate::vad::VoiceActivity;

/// Logical outbound event, handed to the Transport Adapter's writer task for
/// serialization onto the wire. The Audio Pipeline decides what and when to
/// send; the Transport Adapter is the one component that actually owns the
/// socket and writes bytes.
#[derive(Debug, Clone)]
pub enum OutboundEvent {
    Media { payload_b64: String },
    Mark { name: &'static str },
    Clear,
}

/// Implemented by the Dialogue Engine; held by the Audio Pipeline so barge-in
/// can be reported without a bidirectional ownership cycle between the two.
pub trait InterruptionSink: Send + Sync {
    fn interrupt(&self);
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub min_audio_level_threshold: f32,
    pub vad_silence_ms: u64,
    pub vad_min_speech_ms: u64,
    pub max_utterance_length_ms: u64,
    pub echo_cancellation_ms: u64,
    pub max_pause_tolerance_frames: u32,
}

const IDLE_POLL_MS: u64 = 100;
const CHUNK_SLEEP_MS: u64 = 10;
const STOP_SILENCE_FRAMES: usize = 5;

/// Normalized RMS level in [0, 1] for a frame of 16-bit PCM samples.
pub fn rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f64 = samples.iter().map(|&s| (s as f64).powi(2)).sum();
    let rms = (sum_squares / samples.len() as f64).sqrt();
    (rms / 32768.0) as f32
}

enum SegmentState {
    Idle,
    InSpeech,
}

struct Segmenter {
    state: SegmentState,
    buffer: Vec<i16>,
    utterance_start: Instant,
    pause_counter: u32,
    silence_timer_start: Option<Instant>,
}

impl Segmenter {
    fn new() -> Self {
        Self {
            state: SegmentState::Idle,
            buffer: Vec::new(),
            utterance_start: Instant::now(),
            pause_counter: 0,
            silence_timer_start: None,
        }
    }

    fn reset_to_idle(&mut self) {
        self.state = SegmentState::Idle;
        self.buffer.clear();
        self.pause_counter = 0;
        self.silence_timer_start = None;
    }
}

pub struct AudioPipeline {
    session: Arc<Session>,
    outbound_tx: mpsc::Sender<OutboundEvent>,
    stop_transmission: AtomicBool,
    has_spoken: AtomicBool,
    last_agent_speech_time_ms: AtomicU64,
}

impl AudioPipeline {
    pub fn new(session: Arc<Session>, outbound_tx: mpsc::Sender<OutboundEvent>) -> Arc<Self> {
        Arc::new(Self {
            session,
            outbound_tx,
            stop_transmission: AtomicBool::new(false),
            has_spoken: AtomicBool::new(false),
            last_agent_speech_time_ms: AtomicU64::new(0),
        })
    }

    fn elapsed_ms(&self) -> u64 {
        self.session.start_time.elapsed().as_millis() as u64
    }

    fn touch_last_speech_time(&self) {
        self.has_spoken.store(true, Ordering::SeqCst);
        self.last_agent_speech_time_ms
            .store(self.elapsed_ms(), Ordering::SeqCst);
    }

    fn in_echo_window(&self, echo_cancellation_ms: u64) -> bool {
        if !self.has_spoken.load(Ordering::SeqCst) {
            return false;
        }
        let last = self.last_agent_speech_time_ms.load(Ordering::SeqCst);
        self.elapsed_ms().saturating_sub(last) < echo_cancellation_ms
    }

    async fn send(&self, event: OutboundEvent) {
        if self.outbound_tx.send(event).await.is_err() {
            warn!(call_id = %self.session.call_id, "outbound channel closed, dropping event");
        }
    }

    /// Stream `pcm` to the carrier in interruptible 160-byte μ-law chunks.
    pub async fn speak(&self, pcm: &[i16]) {
        self.session.set_state(AgentState::Speaking);
        self.stop_transmission.store(false, Ordering::SeqCst);
        self.touch_last_speech_time();

        let ulaw = ulaw_encode(pcm);
        let mut interrupted = false;

        for chunk in ulaw.chunks(ULAW_CHUNK_BYTES) {
            if self.stop_transmission.load(Ordering::SeqCst) {
                interrupted = true;
                break;
            }
            self.send(OutboundEvent::Media {
                payload_b64: base64_encode(chunk),
            })
            .await;
            self.touch_last_speech_time();
            tokio::time::sleep(Duration::from_millis(CHUNK_SLEEP_MS)).await;
        }

        if !interrupted {
            self.send(OutboundEvent::Mark {
                name: "agent_speech_complete",
            })
            .await;
        }
    }

    /// Abort any in-flight send, drain the carrier's buffer, and return to
    /// LISTENING. Safe to call even if nothing is currently playing.
    pub async fn stop_speaking(&self) {
        self.stop_transmission.store(true, Ordering::SeqCst);

        let silence = vec![ULAW_SILENCE_BYTE; ULAW_CHUNK_BYTES];
        for _ in 0..STOP_SILENCE_FRAMES {
            self.send(OutboundEvent::Media {
                payload_b64: base64_encode(&silence),
            })
            .await;
        }

        self.send(OutboundEvent::Clear).await;
        self.send(OutboundEvent::Mark {
            name: "agent_speech_stopped",
        })
        .await;
        self.session.set_state(AgentState::Listening);
    }

    /// Drives the inbound frame loop until `frame_rx` closes (call ended).
    pub async fn run_inbound(
        self: Arc<Self>,
        mut frame_rx: mpsc::Receiver<Vec<u8>>,
        utterance_tx: mpsc::Sender<Vec<i16>>,
        interruption_sink: Arc<dyn InterruptionSink>,
        mut vad: Box<dyn VoiceActivity>,
        cfg: PipelineConfig,
    ) {
        let mut seg = Segmenter::new();

        loop {
            match tokio::time::timeout(Duration::from_millis(IDLE_POLL_MS), frame_rx.recv()).await
            {
                Ok(Some(frame_bytes)) => {
                    let samples = bytes_to_i16(&frame_bytes);
                    self.process_frame(
                        &samples,
                        &mut seg,
                        &utterance_tx,
                        interruption_sink.as_ref(),
                        vad.as_mut(),
                        &cfg,
                    )
                    .await;
                }
                Ok(None) => break,
                Err(_elapsed) => {
                    if matches!(seg.state, SegmentState::InSpeech) {
                        self.flush(&mut seg, &utterance_tx, &cfg).await;
                    }
                }
            }
        }
    }

    async fn process_frame(
        &self,
        samples: &[i16],
        seg: &mut Segmenter,
        utterance_tx: &mpsc::Sender<Vec<i16>>,
        interruption_sink: &dyn InterruptionSink,
        vad: &mut dyn VoiceActivity,
        cfg: &PipelineConfig,
    ) {
        let level = rms(samples);
        let vad_speech = vad.detect(samples).unwrap_or(false);
        let meaningful = level >= cfg.min_audio_level_threshold && vad_speech;

        if self.session.agent_state() == AgentState::Speaking && meaningful {
            self.stop_speaking().await;
            interruption_sink.interrupt();
        }

        if self.in_echo_window(cfg.echo_cancellation_ms) {
            return;
        }

        match seg.state {
            SegmentState::Idle => {
                if meaningful {
                    seg.utterance_start = Instant::now();
                    seg.buffer.clear();
                    seg.buffer.extend_from_slice(samples);
                    seg.pause_counter = 0;
                    seg.silence_timer_start = None;
                    seg.state = SegmentState::InSpeech;
                }
            }
            SegmentState::InSpeech => {
                if meaningful {
                    seg.buffer.extend_from_slice(samples);
                    seg.pause_counter = 0;
                    seg.silence_timer_start = None;
                } else {
                    seg.pause_counter += 1;
                    if seg.pause_counter <= cfg.max_pause_tolerance_frames {
                        seg.buffer.extend_from_slice(samples);
                    } else if seg.silence_timer_start.is_none() {
                        seg.silence_timer_start = Some(Instant::now());
                    }
                }

                let silence_exceeded = seg
                    .silence_timer_start
                    .map(|t| t.elapsed() > Duration::from_millis(cfg.vad_silence_ms))
                    .unwrap_or(false);
                let duration_exceeded =
                    seg.utterance_start.elapsed() > Duration::from_millis(cfg.max_utterance_length_ms);

                if silence_exceeded || duration_exceeded {
                    self.flush(seg, utterance_tx, cfg).await;
                }
            }
        }
    }

    async fn flush(&self, seg: &mut Segmenter, utterance_tx: &mpsc::Sender<Vec<i16>>, cfg: &PipelineConfig) {
        let duration_ms = (seg.buffer.len() as u64 * 1000) / AUDIO_SAMPLE_RATE as u64;
        if duration_ms > cfg.vad_min_speech_ms {
            let utterance = std::mem::take(&mut seg.buffer);
            if utterance_tx.send(utterance).await.is_err() {
                warn!("utterance channel closed, dropping completed utterance");
            }
        }
        seg.reset_to_idle();
    }
}

/// Enqueue a 320-byte inbound PCM frame, dropping it (and logging) if the
/// pipeline can't keep up rather than stalling the transport reader.
pub fn try_enqueue_frame(tx: &mpsc::Sender<Vec<u8>>, frame: Vec<u8>) {
    if let Err(e) = tx.try_send(frame) {
        warn!("inbound frame queue full, dropping frame: {e}");
    }
}

fn bytes_to_i16(data: &[u8]) -> Vec<i16> {
    data.chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
        .collect()
}

fn base64_encode(bytes: &[u8]) -> String {
    use base64::{engine::general_purpose::STANDARD, Engine};
    STANDARD.encode(bytes)
}
