use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};
use voxelme_contracts::events::{SessionEvent, SessionEventLog};
use voxelme_contracts::{GenerationResult, LifecycleState, Season, SelectionState, SourceImage};

use crate::config::EngineConfig;
use crate::error::{GenerateRejected, GenerationError};
use crate::gemini::GeminiProvider;
use crate::provider::ImageProvider;
use crate::transcoder::Transcoder;

/// What happened to a completion picked up by `poll` or `wait`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionOutcome {
    Applied,
    /// The request was superseded by a reset, a new image or a newer generate.
    Discarded,
}

struct Completion {
    token: u64,
    outcome: Result<String, GenerationError>,
}

/// Lifecycle owner for one user session.
///
/// Each `generate()` runs the transcoder on a worker thread and tags it with
/// the current generation token. `reset()`, `select_image()` and every new
/// `generate()` advance the token, so a late completion from an older
/// request is dropped instead of overwriting newer state.
pub struct GenerationSession {
    config: EngineConfig,
    transcoder: Transcoder,
    selection: SelectionState,
    lifecycle: LifecycleState,
    last_result: Option<GenerationResult>,
    last_error: Option<String>,
    token: u64,
    completions_tx: mpsc::Sender<Completion>,
    completions_rx: mpsc::Receiver<Completion>,
    subscribers: Vec<mpsc::Sender<LifecycleState>>,
    events: Option<SessionEventLog>,
}

impl GenerationSession {
    pub fn new(config: EngineConfig, provider: Arc<dyn ImageProvider>) -> Self {
        let transcoder = Transcoder::new(provider, &config);
        let (completions_tx, completions_rx) = mpsc::channel();
        Self {
            config,
            transcoder,
            selection: SelectionState::default(),
            lifecycle: LifecycleState::Idle,
            last_result: None,
            last_error: None,
            token: 0,
            completions_tx,
            completions_rx,
            subscribers: Vec::new(),
            events: None,
        }
    }

    /// Session backed by the Gemini HTTP provider.
    pub fn gemini(config: EngineConfig) -> Result<Self, GenerationError> {
        let provider = Arc::new(GeminiProvider::new(&config)?);
        Ok(Self::new(config, provider))
    }

    pub fn with_events(mut self, events: SessionEventLog) -> Self {
        self.events = Some(events);
        self
    }

    pub fn state(&self) -> &LifecycleState {
        &self.lifecycle
    }

    pub fn selection(&self) -> &SelectionState {
        &self.selection
    }

    pub fn last_result(&self) -> Option<&GenerationResult> {
        self.last_result.as_ref()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn is_processing(&self) -> bool {
        self.lifecycle.is_processing()
    }

    pub fn current_token(&self) -> u64 {
        self.token
    }

    /// Receives each lifecycle change from now on. A transition into a state
    /// equal to the current one (for example the same `Error` message twice,
    /// or `Idle` after `Idle`) is not re-sent.
    pub fn subscribe(&mut self) -> mpsc::Receiver<LifecycleState> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    pub fn select_image(&mut self, image: SourceImage) {
        self.token += 1;
        let source = image.display_name();
        self.selection.selected_image = Some(image);
        self.last_result = None;
        self.last_error = None;
        self.transition(LifecycleState::Idle);
        debug!(token = self.token, source = %source, "image selected");
        self.emit(SessionEvent::ImageSelected {
            token: self.token,
            source,
        });
    }

    /// Ignored while a generation is in flight; returns whether the theme changed hands.
    pub fn select_theme(&mut self, theme: Season) -> bool {
        if self.is_processing() {
            warn!(%theme, "theme change ignored while processing");
            return false;
        }
        self.selection.selected_theme = theme;
        self.emit(SessionEvent::ThemeSelected { theme });
        true
    }

    /// Starts one generation and returns its token.
    pub fn generate(&mut self) -> Result<u64, GenerateRejected> {
        if self.is_processing() {
            warn!(token = self.token, "generate rejected: already processing");
            return Err(GenerateRejected::AlreadyProcessing);
        }
        let Some(image) = self.selection.selected_image.clone() else {
            return Err(GenerateRejected::NoImageSelected);
        };

        self.token += 1;
        let token = self.token;
        self.last_result = None;
        self.last_error = None;

        let api_key = match self.config.api_key() {
            Ok(api_key) => api_key.to_string(),
            Err(err) => {
                self.record_failure(token, err.clone());
                return Err(err.into());
            }
        };

        let theme = self.selection.selected_theme;
        self.transition(LifecycleState::Processing);

        let transcoder = self.transcoder.clone();
        let tx = self.completions_tx.clone();
        let spawned = thread::Builder::new()
            .name(format!("voxelme-generate-{token}"))
            .spawn(move || {
                let outcome = transcoder.run(&api_key, &image, theme);
                let _ = tx.send(Completion { token, outcome });
            });
        if let Err(err) = spawned {
            let err =
                GenerationError::provider(None, format!("generation thread spawn failed: {err}"));
            self.record_failure(token, err.clone());
            return Err(err.into());
        }

        info!(
            token,
            %theme,
            provider = self.transcoder.provider_name(),
            "generation started"
        );
        self.emit(SessionEvent::GenerationStarted {
            token,
            theme,
            provider: self.transcoder.provider_name().to_string(),
            model: self.config.model().to_string(),
        });
        Ok(token)
    }

    /// Clears the selected image and any result. An in-flight request keeps
    /// running but its completion will be discarded.
    pub fn reset(&mut self) {
        let superseded = self.is_processing();
        self.token += 1;
        self.selection.selected_image = None;
        self.last_result = None;
        self.last_error = None;
        self.transition(LifecycleState::Idle);
        debug!(token = self.token, superseded, "session reset");
        self.emit(SessionEvent::SessionReset {
            token: self.token,
            superseded_in_flight: superseded,
        });
    }

    /// Applies every completion that has already arrived, without blocking.
    pub fn poll(&mut self) -> Vec<CompletionOutcome> {
        let mut outcomes = Vec::new();
        while let Ok(completion) = self.completions_rx.try_recv() {
            outcomes.push(self.apply(completion));
        }
        outcomes
    }

    /// Blocks up to `timeout` for the next completion.
    pub fn wait(&mut self, timeout: Duration) -> Option<CompletionOutcome> {
        let completion = self.completions_rx.recv_timeout(timeout).ok()?;
        Some(self.apply(completion))
    }

    fn apply(&mut self, completion: Completion) -> CompletionOutcome {
        if completion.token != self.token || !self.is_processing() {
            debug!(
                token = completion.token,
                current = self.token,
                "discarding superseded completion"
            );
            self.emit(SessionEvent::GenerationDiscarded {
                token: completion.token,
                current_token: self.token,
                succeeded: completion.outcome.is_ok(),
            });
            return CompletionOutcome::Discarded;
        }

        match completion.outcome {
            Ok(image_reference) => {
                let result = GenerationResult::new(image_reference.clone());
                let produced_at = result.produced_at().to_rfc3339();
                self.last_result = Some(result);
                self.last_error = None;
                self.transition(LifecycleState::Success { image_reference });
                info!(token = completion.token, "generation succeeded");
                self.emit(SessionEvent::GenerationSucceeded {
                    token: completion.token,
                    produced_at,
                });
            }
            Err(err) => self.record_failure(completion.token, err),
        }
        CompletionOutcome::Applied
    }

    fn record_failure(&mut self, token: u64, err: GenerationError) {
        let message = err.user_message();
        warn!(
            token,
            stage = %err.stage(),
            kind = err.kind(),
            error = %err,
            "generation failed"
        );
        self.last_result = None;
        self.last_error = Some(message.clone());
        self.transition(LifecycleState::Error {
            message: message.clone(),
        });
        self.emit(SessionEvent::GenerationFailed {
            token,
            stage: err.stage().as_str().to_string(),
            kind: err.kind().to_string(),
            message,
        });
    }

    fn transition(&mut self, next: LifecycleState) {
        if self.lifecycle == next {
            return;
        }
        self.lifecycle = next;
        let state = &self.lifecycle;
        self.subscribers
            .retain(|subscriber| subscriber.send(state.clone()).is_ok());
    }

    fn emit(&self, event: SessionEvent) {
        let Some(events) = self.events.as_ref() else {
            return;
        };
        if let Err(err) = events.record(&event) {
            warn!(?event, error = %err, "failed to write session event");
        }
    }
}
