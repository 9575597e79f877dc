//! WebSocket speech-to-text session
//!
//! Task lifecycle is `run-task → audio* → finish-task`. Text frames carry
//! task control JSON; binary frames are audio and count toward the session.
//! On finish the accumulated audio is dispatched through the scheduler as a
//! `speech-to-text` request.

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::scheduler::ServeOutcome;
use crate::web::AppState;

/// Audio frames are capped at 10 MiB each.
const MAX_AUDIO_FRAME: usize = 10 * 1024 * 1024;
const VALID_SAMPLE_RATES: [u32; 5] = [8000, 16000, 22050, 44100, 48000];

#[derive(Debug, Deserialize)]
struct TaskFrame {
    task: String,
    #[serde(default)]
    parameters: TaskParameters,
}

#[derive(Debug, Default, Deserialize)]
struct TaskParameters {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    sample_rate: Option<u32>,
    #[serde(default)]
    format: Option<String>,
    #[serde(default)]
    language: Option<String>,
}

/// Per-connection session state.
struct WsSession {
    sample_rate: u32,
    return_format: String,
    language: String,
    model: Option<String>,
    audio: Vec<u8>,
    audio_bytes: u64,
    last_activity: DateTime<Utc>,
    task_running: bool,
}

impl Default for WsSession {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            return_format: "text".to_string(),
            language: "zh".to_string(),
            model: None,
            audio: Vec::new(),
            audio_bytes: 0,
            last_activity: Utc::now(),
            task_running: false,
        }
    }
}

/// `GET /services/speech-to-text-ws`
pub async fn speech_to_text_ws(
    State(state): State<AppState>,
    upgrade: WebSocketUpgrade,
) -> Response {
    upgrade.on_upgrade(move |socket| handle_session(state, socket))
}

async fn handle_session(state: AppState, mut socket: WebSocket) {
    let mut session = WsSession::default();

    while let Some(message) = socket.recv().await {
        let message = match message {
            Ok(message) => message,
            Err(error) => {
                debug!(%error, "websocket receive failed");
                return;
            }
        };
        session.last_activity = Utc::now();

        match message {
            Message::Text(text) => {
                let frame: TaskFrame = match serde_json::from_str(&text) {
                    Ok(frame) => frame,
                    Err(error) => {
                        send_error(&mut socket, &format!("invalid task frame: {error}")).await;
                        continue;
                    }
                };
                match frame.task.as_str() {
                    "run-task" => {
                        if let Err(reason) = session.start_task(frame.parameters) {
                            send_error(&mut socket, &reason).await;
                            return;
                        }
                        send_json(&mut socket, json!({"event": "task-started"})).await;
                    }
                    "finish-task" => {
                        if !session.task_running {
                            send_error(&mut socket, "finish-task before run-task").await;
                            return;
                        }
                        finish_task(&state, &mut socket, &session).await;
                        return;
                    }
                    other => {
                        send_error(&mut socket, &format!("unknown task '{other}'")).await;
                    }
                }
            }
            Message::Binary(bytes) => {
                if !session.task_running {
                    send_error(&mut socket, "audio before run-task").await;
                    return;
                }
                if bytes.len() > MAX_AUDIO_FRAME {
                    send_error(&mut socket, "audio frame exceeds 10MiB").await;
                    return;
                }
                session.audio_bytes += bytes.len() as u64;
                session.audio.extend_from_slice(&bytes);
            }
            Message::Close(_) => return,
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }
}

impl WsSession {
    fn start_task(&mut self, parameters: TaskParameters) -> Result<(), String> {
        if let Some(rate) = parameters.sample_rate {
            if !VALID_SAMPLE_RATES.contains(&rate) {
                return Err(format!(
                    "unsupported sample rate {rate}; expected one of {VALID_SAMPLE_RATES:?}"
                ));
            }
            self.sample_rate = rate;
        }
        if let Some(format) = parameters.format {
            self.return_format = format;
        }
        if let Some(language) = parameters.language {
            self.language = language;
        }
        self.model = parameters.model;
        self.task_running = true;
        Ok(())
    }
}

async fn finish_task(state: &AppState, socket: &mut WebSocket, session: &WsSession) {
    debug!(
        audio_bytes = session.audio_bytes,
        sample_rate = session.sample_rate,
        last_activity = %session.last_activity,
        "finishing speech-to-text session"
    );
    let mut payload = json!({
        "audio": BASE64.encode(&session.audio),
        "sample_rate": session.sample_rate,
        "language": session.language,
        "format": session.return_format,
    });
    if let Some(model) = &session.model {
        payload["model"] = Value::String(model.clone());
    }

    let token = CancellationToken::new();
    match state.scheduler.serve("speech-to-text", payload, token).await {
        Ok(ServeOutcome::Json { body, .. }) => {
            send_json(socket, json!({"event": "result", "data": body})).await;
        }
        Ok(ServeOutcome::Stream { .. }) => {
            send_error(socket, "unexpected streamed transcription").await;
        }
        Err(error) => {
            warn!(%error, "speech-to-text dispatch failed");
            send_error(socket, &error.to_string()).await;
        }
    }
    let _ = socket.send(Message::Close(None)).await;
}

async fn send_json(socket: &mut WebSocket, value: Value) {
    let _ = socket.send(Message::Text(value.to_string().into())).await;
}

async fn send_error(socket: &mut WebSocket, message: &str) {
    send_json(socket, json!({"event": "error", "message": message})).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_rate_validation() {
        let mut session = WsSession::default();
        assert!(
            session
                .start_task(TaskParameters {
                    sample_rate: Some(44100),
                    ..Default::default()
                })
                .is_ok()
        );
        assert_eq!(session.sample_rate, 44100);

        let mut session = WsSession::default();
        assert!(
            session
                .start_task(TaskParameters {
                    sample_rate: Some(12345),
                    ..Default::default()
                })
                .is_err()
        );
    }

    #[test]
    fn defaults_match_the_session_contract() {
        let session = WsSession::default();
        assert_eq!(session.sample_rate, 16000);
        assert_eq!(session.return_format, "text");
        assert_eq!(session.language, "zh");
        assert!(!session.task_running);
    }
}
