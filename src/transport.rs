//! Transport Adapter — owns the WebSocket, parses the carrier's control/media
//! JSON frames, re-frames decoded PCM into exact 320-byte frames, and is the
//! sole writer of the carrier's outbound wire protocol. Also hosts the
//! call-setup HTTP webhook.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Form, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::audio_constants::AUDIO_FRAME_BYTES;
use crate::codec::ulaw::ulaw_decode;
use crate::collaborators::llm::HttpLlmAdapter;
use crate::collaborators::stt::HttpSttAdapter;
use crate::collaborators::tts::HttpTtsAdapter;
use crate::collaborators::{ReplyGenerator, SpeechSynthesizer, SpeechTranscriber};
use crate::config::Config;
use crate::dialogue::{DialogueConfig, DialogueEngine};
use crate::pipeline::{AudioPipeline, OutboundEvent, PipelineConfig};
use crate::rate_limiter::RateLimiter;
use crate::session::Session;
use crate::vad::{VoiceActivity, WebRtcVad};

pub struct AppState {
    pub config: Config,
    pub rate_limiter: RateLimiter,
    pub http_client: reqwest::Client,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/voice", post(voice_webhook))
        .route("/ws", get(ws_upgrade))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct VoiceWebhookRequest {
    #[serde(rename = "From")]
    from: String,
}

async fn voice_webhook(
    State(state): State<Arc<AppState>>,
    Form(req): Form<VoiceWebhookRequest>,
) -> impl IntoResponse {
    let body = if state.rate_limiter.try_admit(&req.from) {
        let ws_url = format!("wss://{}/ws", state.config.public_base_url);
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response><Connect><Stream url=\"{ws_url}\"/></Connect></Response>"
        )
    } else {
        warn!(caller = %req.from, "admission denied, rejecting call");
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response><Say>Sorry, we are at capacity. Please try again shortly.</Say><Hangup/></Response>".to_string()
    };

    (StatusCode::OK, [(header::CONTENT_TYPE, "text/xml")], body)
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum InboundFrame {
    Start { start: StartPayload },
    Media { media: MediaPayload },
    Mark { mark: MarkPayload },
    Stop {},
}

#[derive(Debug, Deserialize)]
struct StartPayload {
    #[serde(rename = "streamSid")]
    stream_sid: String,
    #[serde(rename = "callSid", default)]
    #[allow(dead_code)]
    call_sid: Option<String>,
    #[serde(rename = "customParameters", default)]
    custom_parameters: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct MediaPayload {
    payload: String,
}

#[derive(Debug, Deserialize)]
struct MarkPayload {
    name: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum OutboundWireEvent {
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: OutboundMedia,
    },
    Mark {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        mark: OutboundMark,
    },
    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
}

#[derive(Debug, Serialize)]
struct OutboundMedia {
    payload: String,
}

#[derive(Debug, Serialize)]
struct OutboundMark {
    name: String,
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut ws_sink, mut ws_stream) = socket.split();

    let (outbound_tx, mut outbound_rx) = mpsc::channel::<OutboundEvent>(64);
    let (frame_tx, frame_rx) = mpsc::channel::<Vec<u8>>(64);
    let (utterance_tx, utterance_rx) = mpsc::channel::<Vec<i16>>(8);

    let mut stream_sid: Option<String> = None;
    let mut pcm_accumulator: Vec<u8> = Vec::new();
    let mut call_id: Option<String> = None;
    let mut session: Option<Arc<Session>> = None;

    loop {
        let msg = match ws_stream.next().await {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                warn!("websocket error: {e}");
                break;
            }
            None => break,
        };

        let text = match msg {
            Message::Text(t) => t,
            Message::Close(_) => break,
            _ => continue,
        };

        let frame: InboundFrame = match serde_json::from_str(&text) {
            Ok(f) => f,
            Err(e) => {
                warn!("malformed control frame: {e}");
                continue;
            }
        };

        match frame {
            InboundFrame::Start { start } => {
                stream_sid = Some(start.stream_sid.clone());
                let from = start.custom_parameters.get("from").cloned().unwrap_or_default();
                let to = start.custom_parameters.get("to").cloned().unwrap_or_default();
                call_id = Some(start.stream_sid.clone());

                info!(call_id = %start.stream_sid, "call started");

                let new_session = Arc::new(Session::new(start.stream_sid.clone(), from, to));
                let pipeline = AudioPipeline::new(new_session.clone(), outbound_tx.clone());

                let http_client = state.http_client.clone();
                let cfg = &state.config;
                let stt: Arc<dyn SpeechTranscriber> = Arc::new(HttpSttAdapter::new(
                    http_client.clone(),
                    cfg.ai_api_base_url.clone(),
                    cfg.ai_api_key.clone(),
                    cfg.stt_model.clone(),
                ));
                let llm: Arc<dyn ReplyGenerator> = Arc::new(HttpLlmAdapter::new(
                    http_client.clone(),
                    cfg.ai_api_base_url.clone(),
                    cfg.ai_api_key.clone(),
                    cfg.llm_model.clone(),
                ));
                let tts: Arc<dyn SpeechSynthesizer> = Arc::new(HttpTtsAdapter::new(
                    http_client,
                    cfg.ai_api_base_url.clone(),
                    cfg.ai_api_key.clone(),
                    cfg.tts_model.clone(),
                ));

                let (engine, interruption) = DialogueEngine::new(
                    new_session.clone(),
                    pipeline.clone(),
                    stt,
                    llm,
                    tts,
                    DialogueConfig {
                        min_meaningful_words: cfg.min_meaningful_words,
                        agent_response_delay_ms: cfg.agent_response_delay_ms,
                        max_call_duration_s: cfg.max_call_duration_s,
                    },
                );

                let vad: Box<dyn VoiceActivity> = Box::new(WebRtcVad::new(cfg.vad_aggressiveness));
                let pipeline_cfg = PipelineConfig {
                    min_audio_level_threshold: cfg.min_audio_level_threshold,
                    vad_silence_ms: cfg.vad_silence_ms,
                    vad_min_speech_ms: cfg.vad_min_speech_ms,
                    max_utterance_length_ms: cfg.max_utterance_length_ms,
                    echo_cancellation_ms: cfg.echo_cancellation_ms,
                    max_pause_tolerance_frames: 10,
                };

                tokio::spawn(pipeline.run_inbound(frame_rx, utterance_tx, interruption, vad, pipeline_cfg));
                tokio::spawn(engine.run(utterance_rx));

                session = Some(new_session);
                break;
            }
            _ => {
                warn!("frame received before start event, ignoring");
            }
        }
    }

    // Carrier opened the socket and then closed or errored before ever
    // sending `start` (flaky network, abandoned handshake, health check).
    // `voice_webhook` already admitted this call, so release its slot here
    // too or it leaks forever.
    let stream_sid = match stream_sid {
        Some(sid) => sid,
        None => {
            state.rate_limiter.release();
            return;
        }
    };
    let session = match session {
        Some(s) => s,
        None => {
            state.rate_limiter.release();
            return;
        }
    };

    // Outbound writer: the only task that ever writes to the socket.
    let writer = tokio::spawn(async move {
        while let Some(event) = outbound_rx.recv().await {
            let wire = match event {
                OutboundEvent::Media { payload_b64 } => OutboundWireEvent::Media {
                    stream_sid: stream_sid.clone(),
                    media: OutboundMedia { payload: payload_b64 },
                },
                OutboundEvent::Mark { name } => OutboundWireEvent::Mark {
                    stream_sid: stream_sid.clone(),
                    mark: OutboundMark { name: name.to_string() },
                },
                OutboundEvent::Clear => OutboundWireEvent::Clear {
                    stream_sid: stream_sid.clone(),
                },
            };
            let Ok(json) = serde_json::to_string(&wire) else {
                continue;
            };
            if ws_sink.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let call_id = call_id.unwrap_or_default();

    loop {
        let msg = match ws_stream.next().await {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                warn!(call_id = %call_id, "websocket error: {e}");
                break;
            }
            None => break,
        };

        let text = match msg {
            Message::Text(t) => t,
            Message::Close(_) => break,
            _ => continue,
        };

        let frame: InboundFrame = match serde_json::from_str(&text) {
            Ok(f) => f,
            Err(e) => {
                warn!(call_id = %call_id, "malformed control frame: {e}");
                continue;
            }
        };

        match frame {
            InboundFrame::Media { media } => {
                let Ok(ulaw_bytes) = base64_decode(&media.payload) else {
                    warn!(call_id = %call_id, "invalid base64 media payload");
                    continue;
                };
                let pcm = ulaw_decode(&ulaw_bytes);
                for sample in pcm {
                    pcm_accumulator.extend_from_slice(&sample.to_le_bytes());
                }
                while pcm_accumulator.len() >= AUDIO_FRAME_BYTES {
                    let frame_bytes: Vec<u8> = pcm_accumulator.drain(0..AUDIO_FRAME_BYTES).collect();
                    crate::pipeline::try_enqueue_frame(&frame_tx, frame_bytes);
                }
            }
            InboundFrame::Mark { mark } => {
                info!(call_id = %call_id, mark = %mark.name, "playback landmark echoed");
                if mark.name == "agent_speech_complete" || mark.name == "agent_speech_stopped" {
                    session.set_state(crate::session::AgentState::Listening);
                }
            }
            InboundFrame::Stop {} => {
                info!(call_id = %call_id, "call stopped");
                break;
            }
            InboundFrame::Start { .. } => {}
        }
    }

    drop(frame_tx);
    writer.abort();
    state.rate_limiter.release();
}

fn base64_decode(s: &str) -> Result<Vec<u8>, base64::DecodeError> {
    use base64::{engine::general_purpose::STANDARD, Engine};
    STANDARD.decode(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_media_frame_deserializes() {
        let json = r#"{"event":"media","media":{"payload":"//8="}}"#;
        let frame: InboundFrame = serde_json::from_str(json).unwrap();
        assert!(matches!(frame, InboundFrame::Media { .. }));
    }

    #[test]
    fn inbound_start_frame_carries_custom_parameters() {
        let json = r#"{"event":"start","start":{"streamSid":"MZ1","callSid":"CA1","customParameters":{"from":"+15551234567","to":"+15557654321"}}}"#;
        let frame: InboundFrame = serde_json::from_str(json).unwrap();
        match frame {
            InboundFrame::Start { start } => {
                assert_eq!(start.stream_sid, "MZ1");
                assert_eq!(start.custom_parameters.get("from").unwrap(), "+15551234567");
            }
            _ => panic!("expected start frame"),
        }
    }

    #[test]
    fn outbound_media_event_serializes_with_stream_sid() {
        let wire = OutboundWireEvent::Media {
            stream_sid: "MZ1".into(),
            media: OutboundMedia { payload: "//8=".into() },
        };
        let json = serde_json::to_string(&wire).unwrap();
        assert!(json.contains("\"streamSid\":\"MZ1\""));
        assert!(json.contains("\"event\":\"media\""));
    }

    #[test]
    fn voice_webhook_denial_body_contains_hangup() {
        let limiter = RateLimiter::new(0, Duration::from_secs(60), 10);
        assert!(!limiter.try_admit("+15551234567"));
    }

    #[test]
    fn inbound_mark_frame_carries_landmark_name() {
        let json = r#"{"event":"mark","mark":{"name":"agent_speech_complete"}}"#;
        let frame: InboundFrame = serde_json::from_str(json).unwrap();
        match frame {
            InboundFrame::Mark { mark } => assert_eq!(mark.name, "agent_speech_complete"),
            _ => panic!("expected mark frame"),
        }
    }
}
