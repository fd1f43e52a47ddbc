//! Dialogue Engine — the conversational half of the call. Consumes
//! utterances emitted by the Audio Pipeline, filters out STT hallucinations
//! and noise, coalesces rapid-fire partial utterances, talks to the LLM and
//! TTS collaborators, and drives the pipeline's `speak`/`stop_speaking`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::collaborators::{LlmReply, ReplyGenerator, SpeechSynthesizer, SpeechTranscriber};
use crate::pipeline::{AudioPipeline, InterruptionSink};
use crate::session::{AgentState, Session};

const GREETING: &str = "Hello, this is Jennifer. How can I help you today?";

const SYSTEM_PROMPT: &str = "You are Jennifer, a helpful phone-call assistant. Keep your replies \
short and conversational, as you would speak them aloud, not as chat text. Reply ONLY with a JSON \
object shaped {\"action\": \"respond\" | \"hangup\", \"text\": string}. Choose action \"hangup\" \
once the caller's request has been resolved and they have said goodbye.";

const HALLUCINATION_DENY_LIST: &[&str] = &[
    "thank you for calling",
    "how may i help you today",
    "is there anything else i can help you with",
    "end of call",
    "call ended",
    "system message",
    "automated response",
    "have a great day and thank you for calling",
];

const FILLER_WORDS: &[&str] = &["hmm", "um", "uh", "ah", "eh", "oh"];

const UTTERANCE_COALESCE_TIMEOUT: Duration = Duration::from_secs(3);
const INTERRUPTION_CLEAR_MS: u64 = 100;
const HANGUP_DELAY: Duration = Duration::from_secs(3);
const TTS_VOICE: &str = "jennifer";
const TTS_SAMPLE_RATE: u32 = 8_000;

pub struct DialogueConfig {
    pub min_meaningful_words: usize,
    pub agent_response_delay_ms: u64,
    pub max_call_duration_s: u64,
}

/// Shared with the Audio Pipeline so barge-in can reach the engine without a
/// bidirectional ownership cycle (the Transport Adapter owns both workers).
///
/// Auto-clear is lazy rather than timer-driven: `interrupt()` stamps the time
/// it fired, and `is_set()` treats the flag as expired once more than
/// `INTERRUPTION_CLEAR_MS` has elapsed since that stamp. This mirrors the
/// Audio Pipeline's own echo-window bookkeeping (`AudioPipeline::in_echo_window`)
/// rather than spawning a timer task per interruption.
pub struct Interruption {
    created: Instant,
    flag: AtomicBool,
    set_at_ms: AtomicU64,
}

impl Interruption {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            created: Instant::now(),
            flag: AtomicBool::new(false),
            set_at_ms: AtomicU64::new(0),
        })
    }

    fn elapsed_ms(&self) -> u64 {
        self.created.elapsed().as_millis() as u64
    }

    fn is_set(&self) -> bool {
        if !self.flag.load(Ordering::SeqCst) {
            return false;
        }
        let set_at = self.set_at_ms.load(Ordering::SeqCst);
        if self.elapsed_ms().saturating_sub(set_at) >= INTERRUPTION_CLEAR_MS {
            self.flag.store(false, Ordering::SeqCst);
            false
        } else {
            true
        }
    }

    fn clear(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

impl InterruptionSink for Interruption {
    /// Re-triggering while the previous auto-clear window is still pending
    /// simply restarts the window (idempotent-set, not counted).
    fn interrupt(&self) {
        self.set_at_ms.store(self.elapsed_ms(), Ordering::SeqCst);
        self.flag.store(true, Ordering::SeqCst);
    }
}

pub struct DialogueEngine {
    session: Arc<Session>,
    pipeline: Arc<AudioPipeline>,
    stt: Arc<dyn SpeechTranscriber>,
    llm: Arc<dyn ReplyGenerator>,
    tts: Arc<dyn SpeechSynthesizer>,
    interruption: Arc<Interruption>,
    cfg: DialogueConfig,
    /// Text stashed when an utterance looked incomplete, waiting for a
    /// follow-up within `UTTERANCE_COALESCE_TIMEOUT` to merge with.
    pending: Option<String>,
    /// Timestamp of the last *accepted* (non-noise) utterance, stashed or
    /// processed. The merge decision is gated on this, not on whether
    /// `pending` happens to be non-empty — a quick follow-up to an utterance
    /// that was processed immediately (not stashed) still merges.
    last_utterance_time: Option<Instant>,
}

impl DialogueEngine {
    pub fn new(
        session: Arc<Session>,
        pipeline: Arc<AudioPipeline>,
        stt: Arc<dyn SpeechTranscriber>,
        llm: Arc<dyn ReplyGenerator>,
        tts: Arc<dyn SpeechSynthesizer>,
        cfg: DialogueConfig,
    ) -> (Self, Arc<Interruption>) {
        let interruption = Interruption::new();
        (
            Self {
                session,
                pipeline,
                stt,
                llm,
                tts,
                interruption: interruption.clone(),
                cfg,
                pending: None,
                last_utterance_time: None,
            },
            interruption,
        )
    }

    /// Play the fixed greeting. Aborts cleanly if barge-in fires before it
    /// starts (the caller spoke over a greeting that never got synthesized).
    pub async fn greet(&self) {
        if self.interruption.is_set() {
            return;
        }
        self.speak_text(GREETING).await;
    }

    /// Drives the engine loop until `utterance_rx` closes (call ended).
    pub async fn run(mut self, mut utterance_rx: mpsc::Receiver<Vec<i16>>) {
        self.greet().await;

        loop {
            if self.session.should_end(self.cfg.max_call_duration_s) {
                info!(call_id = %self.session.call_id, "max call duration reached, terminating");
                break;
            }

            match tokio::time::timeout(UTTERANCE_COALESCE_TIMEOUT, utterance_rx.recv()).await {
                Ok(Some(pcm)) => {
                    if self.handle_utterance(pcm).await {
                        break;
                    }
                }
                Ok(None) => break,
                Err(_elapsed) => {
                    if let Some(pending) = self.pending.take() {
                        if self.process_text(pending.text).await {
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Returns `true` if the call should terminate (hangup action taken).
    async fn handle_utterance(&mut self, pcm: Vec<i16>) -> bool {
        self.session.set_state(AgentState::Thinking);

        let transcript = match self.stt.transcribe(&pcm, crate::audio_constants::AUDIO_SAMPLE_RATE).await {
            Ok(t) => t,
            Err(e) => {
                warn!("stt error: {e}");
                self.session.set_state(AgentState::Listening);
                return false;
            }
        };

        if self.is_noise(&transcript) {
            self.session.set_state(AgentState::Listening);
            return false;
        }

        let text = transcript.trim().to_string();

        // Merge with whatever was said last as long as it's within the
        // coalescing window, whether or not that prior utterance was
        // stashed — a quick follow-up to an utterance that was processed
        // immediately still merges, it just merges with nothing pending.
        let within_coalesce_window = self
            .last_utterance_time
            .map(|t| t.elapsed() < UTTERANCE_COALESCE_TIMEOUT)
            .unwrap_or(false);

        if within_coalesce_window {
            self.last_utterance_time = Some(Instant::now());
            let merged = match self.pending.take() {
                Some(prior) => format!("{prior} {text}"),
                None => text,
            };
            return self.process_text(merged).await;
        }

        self.last_utterance_time = Some(Instant::now());

        if looks_incomplete(&text) {
            self.pending = Some(text);
            self.session.set_state(AgentState::Listening);
            return false;
        }

        self.process_text(text).await
    }

    fn is_noise(&self, transcript: &str) -> bool {
        let trimmed = transcript.trim();
        if trimmed.is_empty() || trimmed.len() < 3 {
            return true;
        }
        let lowered = trimmed.to_lowercase();
        if HALLUCINATION_DENY_LIST.iter().any(|phrase| lowered.contains(phrase)) {
            return true;
        }
        if FILLER_WORDS.contains(&lowered.as_str()) {
            return true;
        }
        let word_count = trimmed.split_whitespace().count();
        word_count < self.cfg.min_meaningful_words
    }

    /// Returns `true` if the call should terminate (hangup action taken).
    async fn process_text(&mut self, user_text: String) -> bool {
        if self.interruption.is_set() {
            self.interruption.clear();
            self.session.set_state(AgentState::Listening);
            return false;
        }

        let history = self.session.get_context();
        let reply = match self.llm.generate(SYSTEM_PROMPT, &history, &user_text).await {
            Ok(r) => r,
            Err(e) => {
                warn!("llm error: {e}");
                LlmReply::fallback()
            }
        };

        self.session.add_exchange(&user_text, &reply.text);

        tokio::time::sleep(Duration::from_millis(self.cfg.agent_response_delay_ms)).await;

        if reply.text.trim().len() > 2 {
            self.speak_text(&reply.text).await;
        }

        if matches!(reply.action, crate::collaborators::llm::LlmAction::Hangup) {
            tokio::time::sleep(HANGUP_DELAY).await;
            info!(call_id = %self.session.call_id, "hangup action, terminating");
            return true;
        }

        false
    }

    async fn speak_text(&self, text: &str) {
        match self
            .tts
            .synthesize(text, TTS_VOICE, TTS_SAMPLE_RATE, &self.interruption.flag)
            .await
        {
            Ok(Some(pcm)) => {
                if !self.interruption.is_set() {
                    self.pipeline.speak(&pcm).await;
                }
            }
            Ok(None) => {}
            Err(e) => warn!("tts error: {e}"),
        }
    }
}

/// A reply is "incomplete" if it lacks terminal punctuation and is short —
/// a caller mid-sentence, not a finished thought.
fn looks_incomplete(text: &str) -> bool {
    let trimmed = text.trim();
    let ends_with_punctuation = trimmed
        .chars()
        .last()
        .map(|c| matches!(c, '.' | '!' | '?'))
        .unwrap_or(false);
    !ends_with_punctuation && trimmed.split_whitespace().count() < 5
}
