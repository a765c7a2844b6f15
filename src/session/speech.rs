use std::process::Stdio;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::backend::QueryBackend;
use super::storage::SessionStore;
use super::Session;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechEvent {
    /// The transcript so far. Replaces any earlier partial.
    Partial(String),
    Final(String),
    Ended,
    Error(String),
}

#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("Speech recognition is not supported here")]
    Unsupported,

    #[error("Could not start speech recognition: {0}")]
    Start(String),
}

/// A source of dictated text.
pub trait SpeechCapture: Send {
    fn is_supported(&self) -> bool;

    /// Begins capture. Events arrive on `events` until `Ended` or `stop`.
    fn start(&mut self, events: mpsc::UnboundedSender<SpeechEvent>) -> Result<(), SpeechError>;

    fn stop(&mut self);
}

/// Used when no dictation command is configured.
pub struct Unsupported;

impl SpeechCapture for Unsupported {
    fn is_supported(&self) -> bool {
        false
    }

    fn start(&mut self, _events: mpsc::UnboundedSender<SpeechEvent>) -> Result<(), SpeechError> {
        Err(SpeechError::Unsupported)
    }

    fn stop(&mut self) {}
}

/// Runs a shell command that prints recognized phrases, one per line.
pub struct CommandCapture {
    command: String,
    child: Option<Child>,
    reader: Option<JoinHandle<()>>,
}

impl CommandCapture {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            child: None,
            reader: None,
        }
    }
}

impl SpeechCapture for CommandCapture {
    fn is_supported(&self) -> bool {
        !self.command.trim().is_empty()
    }

    fn start(&mut self, events: mpsc::UnboundedSender<SpeechEvent>) -> Result<(), SpeechError> {
        if !self.is_supported() {
            return Err(SpeechError::Unsupported);
        }
        self.stop();

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SpeechError::Start(e.to_string()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SpeechError::Start("dictation command has no stdout".to_string()))?;
        info!("Started dictation command: {}", self.command);

        self.reader = Some(tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            let mut transcript = String::new();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        if !transcript.is_empty() {
                            transcript.push(' ');
                        }
                        transcript.push_str(line);
                        let _ = events.send(SpeechEvent::Partial(transcript.clone()));
                    }
                    Ok(None) => {
                        if !transcript.is_empty() {
                            let _ = events.send(SpeechEvent::Final(transcript));
                        }
                        let _ = events.send(SpeechEvent::Ended);
                        break;
                    }
                    Err(e) => {
                        let _ = events.send(SpeechEvent::Error(e.to_string()));
                        let _ = events.send(SpeechEvent::Ended);
                        break;
                    }
                }
            }
        }));
        self.child = Some(child);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.start_kill() {
                debug!("Dictation command already exited: {}", e);
            }
        }
    }
}

/// Routes dictation into a session's current question text.
pub struct Dictation {
    capture: Box<dyn SpeechCapture>,
    events: Option<mpsc::UnboundedReceiver<SpeechEvent>>,
}

impl Dictation {
    pub fn new(capture: Box<dyn SpeechCapture>) -> Self {
        Self { capture, events: None }
    }

    pub fn is_supported(&self) -> bool {
        self.capture.is_supported()
    }

    pub fn is_listening(&self) -> bool {
        self.events.is_some()
    }

    pub fn start(&mut self) -> Result<(), SpeechError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.capture.start(tx)?;
        self.events = Some(rx);
        Ok(())
    }

    pub fn stop(&mut self) {
        self.capture.stop();
        self.events = None;
    }

    /// Starts when idle, stops when listening. Returns whether it is now listening.
    pub fn toggle(&mut self) -> Result<bool, SpeechError> {
        if self.is_listening() {
            self.stop();
        } else {
            self.start()?;
        }
        Ok(self.is_listening())
    }

    /// Waits for the next event. `None` once capture has ended, failed or was never started.
    pub async fn next_event(&mut self) -> Option<SpeechEvent> {
        let event = self.events.as_mut()?.recv().await;
        if matches!(event, None | Some(SpeechEvent::Ended | SpeechEvent::Error(_))) {
            self.events = None;
        }
        event
    }

    pub fn on_partial_result<B: QueryBackend, S: SessionStore>(
        &self,
        session: &mut Session<B, S>,
        transcript: &str,
    ) {
        session.set_current_text(transcript);
    }

    pub fn on_final_result<B: QueryBackend, S: SessionStore>(
        &self,
        session: &mut Session<B, S>,
        transcript: &str,
    ) {
        debug!("Final transcript: {}", transcript);
        session.set_current_text(transcript);
    }

    /// Applies one event to the session. Errors leave the text as it was.
    pub fn apply<B: QueryBackend, S: SessionStore>(&self, session: &mut Session<B, S>, event: &SpeechEvent) {
        match event {
            SpeechEvent::Partial(t) => self.on_partial_result(session, t),
            SpeechEvent::Final(t) => self.on_final_result(session, t),
            SpeechEvent::Error(e) => warn!("Speech recognition error: {}", e),
            SpeechEvent::Ended => {}
        }
    }
}

impl Drop for Dictation {
    fn drop(&mut self) {
        self.capture.stop();
    }
}
