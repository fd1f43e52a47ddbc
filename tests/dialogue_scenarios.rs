//! End-to-end scenarios exercising the Audio Pipeline, Dialogue Engine, and
//! rate limiter together through their public APIs, with stub collaborator
//! adapters standing in for the network.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex as PlMutex;
use tokio::sync::mpsc;

use callbridge_core::collaborators::llm::{LlmAction, LlmReply, ReplyGenerator};
use callbridge_core::collaborators::stt::{SpeechTranscriber, StubSttAdapter};
use callbridge_core::collaborators::tts::{SpeechSynthesizer, StubTtsAdapter};
use callbridge_core::dialogue::{DialogueConfig, DialogueEngine};
use callbridge_core::errors::{LlmError, SttError};
use callbridge_core::pipeline::{AudioPipeline, InterruptionSink, PipelineConfig};
use callbridge_core::rate_limiter::RateLimiter;
use callbridge_core::session::{AgentState, Session, Turn};
use callbridge_core::vad::{RmsThresholdVad, VoiceActivity};

/// Counts how many times the LLM was actually invoked, so the hallucination
/// and coalescing scenarios can assert on call count rather than just output.
struct CountingLlm {
    calls: AtomicUsize,
    reply: LlmReply,
}

impl CountingLlm {
    fn new(reply: LlmReply) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            reply,
        }
    }
}

#[async_trait]
impl ReplyGenerator for CountingLlm {
    async fn generate(&self, _system_prompt: &str, _history: &[Turn], _user_input: &str) -> Result<LlmReply, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.reply.clone())
    }
}

/// Returns a different fixed transcript on each call, oldest first — used to
/// simulate two distinct utterances arriving in sequence.
struct SequentialStt {
    replies: PlMutex<VecDeque<String>>,
}

impl SequentialStt {
    fn new(replies: Vec<&str>) -> Self {
        Self {
            replies: PlMutex::new(replies.into_iter().map(String::from).collect()),
        }
    }
}

#[async_trait]
impl SpeechTranscriber for SequentialStt {
    async fn transcribe(&self, _pcm: &[i16], _sample_rate: u32) -> Result<String, SttError> {
        Ok(self.replies.lock().pop_front().unwrap_or_default())
    }
}

struct CountingSink {
    hits: AtomicUsize,
}

impl InterruptionSink for CountingSink {
    fn interrupt(&self) {
        self.hits.fetch_add(1, Ordering::SeqCst);
    }
}

fn build_engine(
    stt: Arc<dyn SpeechTranscriber>,
    llm: Arc<dyn ReplyGenerator>,
) -> (DialogueEngine, Arc<Session>) {
    let session = Arc::new(Session::new("CA-test".into(), "+15550001111".into(), "+15550009999".into()));
    let (out_tx, _out_rx) = mpsc::channel(64);
    let pipeline = AudioPipeline::new(session.clone(), out_tx);
    let tts: Arc<dyn SpeechSynthesizer> = Arc::new(StubTtsAdapter::new(160));
    let cfg = DialogueConfig {
        min_meaningful_words: 2,
        agent_response_delay_ms: 1,
        max_call_duration_s: 600,
    };
    let (engine, _interruption) = DialogueEngine::new(session.clone(), pipeline, stt, llm, tts, cfg);
    (engine, session)
}

fn sine_frame(amplitude: i16, samples: usize) -> Vec<i16> {
    (0..samples)
        .map(|i| {
            let phase = i as f32 / samples as f32 * std::f32::consts::TAU;
            (phase.sin() * amplitude as f32) as i16
        })
        .collect()
}

fn i16_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

#[test]
fn admission_denied_once_concurrent_cap_is_reached() {
    let limiter = RateLimiter::new(2, Duration::from_secs(3600), 100);
    assert!(limiter.try_admit("+15550001111"));
    assert!(limiter.try_admit("+15550002222"));
    assert!(!limiter.try_admit("+15550003333"));
    assert_eq!(limiter.active_calls(), 2);

    limiter.release();
    assert!(limiter.try_admit("+15550003333"));
}

#[test]
fn per_caller_window_admits_again_once_wall_clock_window_elapses() {
    // Scaled-down window rather than a literal 61-second wait: exercises the
    // same lazy-prune-on-access logic the production 60-second window uses.
    let limiter = RateLimiter::new(100, Duration::from_millis(30), 1);
    let caller = "+15557654321";
    assert!(limiter.try_admit(caller));
    assert!(!limiter.try_admit(caller));
    std::thread::sleep(Duration::from_millis(40));
    assert!(limiter.try_admit(caller));
}

#[tokio::test]
async fn hallucination_transcript_never_reaches_the_llm() {
    let counting = Arc::new(CountingLlm::new(LlmReply::fallback()));
    let stt: Arc<dyn SpeechTranscriber> = Arc::new(StubSttAdapter::new("Thank you for calling"));
    let (engine, session) = build_engine(stt, counting.clone());

    let (utt_tx, utt_rx) = mpsc::channel(4);
    utt_tx.send(vec![0i16; 1600]).await.unwrap();
    drop(utt_tx);

    engine.run(utt_rx).await;

    assert_eq!(counting.calls.load(Ordering::SeqCst), 0);
    assert!(session.get_context().is_empty());
}

#[tokio::test]
async fn two_quick_utterances_coalesce_into_a_single_llm_call() {
    let counting = Arc::new(CountingLlm::new(LlmReply::fallback()));
    let stt: Arc<dyn SpeechTranscriber> = Arc::new(SequentialStt::new(vec!["what is", "your name"]));
    let (engine, session) = build_engine(stt, counting.clone());

    let (utt_tx, utt_rx) = mpsc::channel(4);
    // Both utterances are already queued before the engine starts polling,
    // so the second is picked up well within the 3-second coalescing window.
    utt_tx.send(vec![0i16; 1600]).await.unwrap();
    utt_tx.send(vec![0i16; 1600]).await.unwrap();
    drop(utt_tx);

    engine.run(utt_rx).await;

    assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
    let history = session.get_context();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].content, "what is your name");
}

#[tokio::test]
async fn barge_in_during_agent_reply_stops_transmission_and_returns_to_listening() {
    let session = Arc::new(Session::new("CA-barge".into(), "+1".into(), "+2".into()));
    let (out_tx, _out_rx) = mpsc::channel(256);
    let pipeline = AudioPipeline::new(session.clone(), out_tx);

    // Long enough reply (50 chunks * 10ms/chunk = ~500ms) that speak() is
    // still streaming when the barge-in frame arrives.
    let long_reply = vec![0i16; 160 * 50];
    let speak_pipeline = pipeline.clone();
    let speak_handle = tokio::spawn(async move {
        speak_pipeline.speak(&long_reply).await;
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(session.agent_state(), AgentState::Speaking);

    let (frame_tx, frame_rx) = mpsc::channel(8);
    let (utt_tx, _utt_rx) = mpsc::channel(8);
    let sink = Arc::new(CountingSink { hits: AtomicUsize::new(0) });
    let run_sink: Arc<dyn InterruptionSink> = sink.clone();
    let vad: Box<dyn VoiceActivity> = Box::new(RmsThresholdVad::new(0.01));
    let cfg = PipelineConfig {
        min_audio_level_threshold: 0.01,
        vad_silence_ms: 600,
        vad_min_speech_ms: 150,
        max_utterance_length_ms: 10_000,
        echo_cancellation_ms: 0,
        max_pause_tolerance_frames: 10,
    };

    let run_pipeline = pipeline.clone();
    let run_handle = tokio::spawn(run_pipeline.run_inbound(frame_rx, utt_tx, run_sink, vad, cfg));

    let loud = sine_frame(20_000, 160);
    frame_tx.try_send(i16_to_le_bytes(&loud)).unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(sink.hits.load(Ordering::SeqCst) >= 1);
    assert_eq!(session.agent_state(), AgentState::Listening);

    drop(frame_tx);
    let _ = run_handle.await;
    let _ = speak_handle.await;
}

#[tokio::test]
async fn hangup_action_terminates_the_dialogue_loop() {
    let hangup_reply = LlmReply {
        action: LlmAction::Hangup,
        text: "Goodbye, have a nice day.".into(),
    };
    let counting = Arc::new(CountingLlm::new(hangup_reply));
    let stt: Arc<dyn SpeechTranscriber> = Arc::new(StubSttAdapter::new("Thanks so much, goodbye now."));
    let (engine, session) = build_engine(stt, counting.clone());

    let (utt_tx, utt_rx) = mpsc::channel(4);
    utt_tx.send(vec![0i16; 1600]).await.unwrap();
    drop(utt_tx);

    let start = Instant::now();
    engine.run(utt_rx).await;

    assert!(start.elapsed() >= Duration::from_secs(3));
    assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
    let history = session.get_context();
    assert_eq!(history.last().unwrap().content, "Goodbye, have a nice day.");
}
