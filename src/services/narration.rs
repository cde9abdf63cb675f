use crate::core::config::NarrationConfig;
use crate::core::state::VoiceName;
use crate::services::ai::AiGateway;
use crate::services::retry::is_capacity_error;
use crate::services::script::split_script;
use crate::utils::audio::{wav_bytes, AudioBuffer, SAMPLE_RATE};
use anyhow::{anyhow, bail, Context, Result};
use log::{debug, error, info};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Lead time before the very first chunk starts.
const INITIAL_LEAD_SECS: f64 = 0.1;
/// Minimum distance from "now" for any scheduled start.
const SAFETY_MARGIN_SECS: f64 = 0.05;

pub const BUSY_MESSAGE: &str =
    "The voice service is busy right now. Please wait a minute and try again.";
pub const FAILURE_MESSAGE: &str = "Audio generation failed. Please try again.";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NarrationPhase {
    Idle,
    Cleaning,
    Generating,
    Playing,
    Error,
}

impl NarrationPhase {
    /// Transition table of the pipeline. Cancellation is the only way back to
    /// `Idle` from `Cleaning`; an empty script goes straight from
    /// `Generating` to `Idle`.
    pub fn can_transition_to(self, next: NarrationPhase) -> bool {
        use NarrationPhase::*;
        matches!(
            (self, next),
            (Idle, Cleaning)
                | (Cleaning, Generating)
                | (Cleaning, Error)
                | (Cleaning, Idle)
                | (Generating, Playing)
                | (Generating, Error)
                | (Generating, Idle)
                | (Playing, Idle)
                | (Playing, Error)
                | (Error, Idle)
        )
    }
}

/// Snapshot of the pipeline for display.
#[derive(Debug, Clone, PartialEq)]
pub struct NarrationStatus {
    pub phase: NarrationPhase,
    pub message: Option<String>,
    /// 1-based index of the chunk being synthesized.
    pub chunk: usize,
    pub total_chunks: usize,
}

impl Default for NarrationStatus {
    fn default() -> Self {
        Self {
            phase: NarrationPhase::Idle,
            message: None,
            chunk: 0,
            total_chunks: 0,
        }
    }
}

/// Where scheduled audio goes. Times are seconds on the output's own clock.
pub trait AudioOutput: Send {
    fn current_time(&self) -> f64;
    fn schedule(&mut self, buffer: &AudioBuffer, start_at: f64);
    /// Stops playing and pending sources.
    fn stop_all(&mut self);
    /// Sources that have not finished playing yet.
    fn active_sources(&self) -> usize;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledSource {
    pub start: f64,
    pub end: f64,
}

#[derive(Debug, Default)]
struct Timeline {
    live: Vec<ScheduledSource>,
    history: Vec<ScheduledSource>,
}

/// Headless output on the tokio clock. Clones share the same timeline.
#[derive(Debug, Clone)]
pub struct TimelineOutput {
    origin: Instant,
    timeline: Arc<Mutex<Timeline>>,
}

impl Default for TimelineOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl TimelineOutput {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            timeline: Arc::new(Mutex::new(Timeline::default())),
        }
    }

    /// Every source ever scheduled, in scheduling order.
    pub fn history(&self) -> Vec<ScheduledSource> {
        lock(&self.timeline).history.clone()
    }
}

impl AudioOutput for TimelineOutput {
    fn current_time(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }

    fn schedule(&mut self, buffer: &AudioBuffer, start_at: f64) {
        let source = ScheduledSource {
            start: start_at,
            end: start_at + buffer.duration(),
        };
        let mut timeline = lock(&self.timeline);
        timeline.live.push(source);
        timeline.history.push(source);
    }

    fn stop_all(&mut self) {
        lock(&self.timeline).live.clear();
    }

    fn active_sources(&self) -> usize {
        let now = self.current_time();
        lock(&self.timeline)
            .live
            .iter()
            .filter(|s| s.end > now)
            .count()
    }
}

/// One playback run: the output, the next-start cursor and every buffer
/// scheduled so far.
pub struct NarrationSession {
    output: Box<dyn AudioOutput>,
    next_start: f64,
    buffers: Vec<AudioBuffer>,
}

impl NarrationSession {
    pub fn new(output: Box<dyn AudioOutput>) -> Self {
        let next_start = output.current_time() + INITIAL_LEAD_SECS;
        Self {
            output,
            next_start,
            buffers: Vec::new(),
        }
    }

    /// Schedules `buffer` right after the previous one, or slightly in the
    /// future if playback already ran dry. Returns the start time.
    pub fn schedule(&mut self, buffer: AudioBuffer) -> f64 {
        let now = self.output.current_time();
        let start_at = self.next_start.max(now + SAFETY_MARGIN_SECS);
        self.output.schedule(&buffer, start_at);
        self.next_start = start_at + buffer.duration();
        self.buffers.push(buffer);
        start_at
    }

    /// Seconds until everything scheduled has played.
    pub fn remaining(&self) -> f64 {
        (self.next_start - self.output.current_time()).max(0.0)
    }

    pub fn active_sources(&self) -> usize {
        self.output.active_sources()
    }

    pub fn buffers(&self) -> &[AudioBuffer] {
        &self.buffers
    }

    /// Stops the output and hands back the retained buffers.
    pub fn stop(mut self) -> Vec<AudioBuffer> {
        self.output.stop_all();
        self.buffers
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NarrationOutcome {
    Completed,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct NarrationRequest {
    pub text: String,
    pub title: String,
    /// Falls back to the configured atmosphere.
    pub atmosphere: Option<String>,
    /// Falls back to the configured character voice.
    pub character_voice: Option<VoiceName>,
}

struct Shared {
    status: Mutex<NarrationStatus>,
    cancelled: AtomicBool,
    cancel_signal: Notify,
    session: Mutex<Option<NarrationSession>>,
    recording: Mutex<Vec<AudioBuffer>>,
    error_epoch: AtomicU64,
}

impl Shared {
    fn set_phase(&self, next: NarrationPhase, message: Option<String>) -> Result<()> {
        let mut status = lock(&self.status);
        if !status.phase.can_transition_to(next) {
            bail!(
                "Illegal narration transition {:?} -> {:?}",
                status.phase,
                next
            );
        }
        debug!("Narration {:?} -> {:?}", status.phase, next);
        status.phase = next;
        status.message = message;
        if next == NarrationPhase::Idle {
            status.chunk = 0;
            status.total_chunks = 0;
        }
        Ok(())
    }

    fn teardown(&self) {
        let session = lock(&self.session).take();
        if let Some(session) = session {
            *lock(&self.recording) = session.stop();
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Drives `fut` to completion, or returns `None` as soon as the run is
    /// cancelled.
    async fn until_cancelled<F: Future>(&self, fut: F) -> Option<F::Output> {
        let notified = self.cancel_signal.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_cancelled() {
            return None;
        }
        tokio::select! {
            _ = &mut notified => None,
            output = fut => Some(output),
        }
    }
}

/// Cancels a running narration from another task.
#[derive(Clone)]
pub struct CancelHandle {
    shared: Arc<Shared>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.shared.cancelled.store(true, Ordering::SeqCst);
        self.shared.cancel_signal.notify_waiters();
        self.shared.teardown();
        let mut status = lock(&self.shared.status);
        if status.phase != NarrationPhase::Idle {
            info!("Narration cancelled");
            *status = NarrationStatus::default();
        }
    }
}

type OutputFactory = Box<dyn Fn() -> Box<dyn AudioOutput> + Send + Sync>;

pub struct Narrator {
    ai: Arc<AiGateway>,
    config: NarrationConfig,
    shared: Arc<Shared>,
    running: AtomicBool,
    output_factory: OutputFactory,
}

impl Narrator {
    pub fn new(ai: Arc<AiGateway>, config: NarrationConfig) -> Self {
        Self {
            ai,
            config,
            shared: Arc::new(Shared {
                status: Mutex::new(NarrationStatus::default()),
                cancelled: AtomicBool::new(false),
                cancel_signal: Notify::new(),
                session: Mutex::new(None),
                recording: Mutex::new(Vec::new()),
                error_epoch: AtomicU64::new(0),
            }),
            running: AtomicBool::new(false),
            output_factory: Box::new(|| Box::new(TimelineOutput::new()) as Box<dyn AudioOutput>),
        }
    }

    pub fn with_output<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn AudioOutput> + Send + Sync + 'static,
    {
        self.output_factory = Box::new(factory);
        self
    }

    pub fn status(&self) -> NarrationStatus {
        lock(&self.shared.status).clone()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            shared: self.shared.clone(),
        }
    }

    pub fn cancel(&self) {
        self.cancel_handle().cancel();
    }

    /// Runs the whole pipeline: clean, split, synthesize and schedule each
    /// chunk, then wait for playback to drain.
    pub async fn narrate(&self, request: NarrationRequest) -> Result<NarrationOutcome> {
        if request.text.trim().is_empty() {
            bail!("Nothing to narrate: the selected section has no content.");
        }
        if self.running.swap(true, Ordering::SeqCst) {
            bail!("A narration is already running.");
        }

        {
            let mut status = lock(&self.shared.status);
            if status.phase == NarrationPhase::Error {
                *status = NarrationStatus::default();
            }
        }
        self.shared.cancelled.store(false, Ordering::SeqCst);
        lock(&self.shared.recording).clear();
        *lock(&self.shared.session) = Some(NarrationSession::new((self.output_factory)()));

        let result = self.run(&request).await;
        self.running.store(false, Ordering::SeqCst);

        match result {
            Ok(outcome) => {
                if outcome == NarrationOutcome::Cancelled {
                    self.cancel();
                }
                Ok(outcome)
            }
            Err(_) if self.shared.is_cancelled() => Ok(NarrationOutcome::Cancelled),
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    async fn run(&self, request: &NarrationRequest) -> Result<NarrationOutcome> {
        let shared = &self.shared;
        shared.set_phase(NarrationPhase::Cleaning, Some("Preparing the script...".to_string()))?;

        let atmosphere = request
            .atmosphere
            .as_deref()
            .unwrap_or(&self.config.atmosphere);
        let cleaning = self
            .ai
            .prepare_audio_script(&request.text, &request.title, atmosphere);
        let script = match shared.until_cancelled(cleaning).await {
            Some(script) => script.context("Failed to prepare the narration script")?,
            None => return Ok(NarrationOutcome::Cancelled),
        };
        if shared.is_cancelled() {
            return Ok(NarrationOutcome::Cancelled);
        }

        let chunks = split_script(&script, self.config.max_chunk_chars);
        info!(
            "Narrating '{}' in {} chunks ({} chars)",
            request.title,
            chunks.len(),
            script.chars().count()
        );
        shared.set_phase(NarrationPhase::Generating, None)?;
        lock(&shared.status).total_chunks = chunks.len();

        let voice = request
            .character_voice
            .unwrap_or(self.config.fallback_character_voice);
        let pause = Duration::from_millis(self.config.chunk_pause_ms);

        for (index, chunk) in chunks.iter().enumerate() {
            if shared.is_cancelled() {
                return Ok(NarrationOutcome::Cancelled);
            }
            lock(&shared.status).chunk = index + 1;
            debug!("Synthesizing chunk {}/{}", index + 1, chunks.len());

            let pcm = match shared.until_cancelled(self.ai.synthesize_script(chunk, voice)).await {
                Some(pcm) => pcm.with_context(|| format!("Failed to synthesize chunk {}", index + 1))?,
                None => return Ok(NarrationOutcome::Cancelled),
            };
            if shared.is_cancelled() {
                return Ok(NarrationOutcome::Cancelled);
            }

            let buffer = AudioBuffer::from_pcm16(&pcm, SAMPLE_RATE);
            let start_at = {
                let mut session = lock(&shared.session);
                let session = session
                    .as_mut()
                    .ok_or_else(|| anyhow!("Narration session was torn down"))?;
                session.schedule(buffer)
            };
            debug!("Chunk {} scheduled at {:.3}s", index + 1, start_at);

            if index == 0 {
                shared.set_phase(NarrationPhase::Playing, None)?;
            }
            if index + 1 < chunks.len()
                && shared.until_cancelled(tokio::time::sleep(pause)).await.is_none()
            {
                return Ok(NarrationOutcome::Cancelled);
            }
        }

        loop {
            if shared.is_cancelled() {
                return Ok(NarrationOutcome::Cancelled);
            }
            let (active, remaining) = match lock(&shared.session).as_ref() {
                Some(session) => (session.active_sources(), session.remaining()),
                None => (0, 0.0),
            };
            if active == 0 {
                break;
            }
            let drain = tokio::time::sleep(Duration::from_secs_f64(remaining.max(0.001)));
            if shared.until_cancelled(drain).await.is_none() {
                return Ok(NarrationOutcome::Cancelled);
            }
        }

        shared.teardown();
        shared.set_phase(NarrationPhase::Idle, None)?;
        info!("Narration of '{}' finished", request.title);
        Ok(NarrationOutcome::Completed)
    }

    fn fail(&self, err: &anyhow::Error) {
        error!("Narration failed: {:#}", err);
        self.shared.teardown();

        let message = if is_capacity_error(err) {
            BUSY_MESSAGE
        } else {
            FAILURE_MESSAGE
        };
        if self
            .shared
            .set_phase(NarrationPhase::Error, Some(message.to_string()))
            .is_err()
        {
            return;
        }

        let epoch = self.shared.error_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let shared = self.shared.clone();
        let delay = Duration::from_secs(self.config.error_display_secs);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if shared.error_epoch.load(Ordering::SeqCst) != epoch {
                return;
            }
            let mut status = lock(&shared.status);
            if status.phase == NarrationPhase::Error {
                *status = NarrationStatus::default();
            }
        });
    }

    /// WAV file of every chunk synthesized by the last run, in order.
    pub fn export_wav(&self) -> Result<Vec<u8>> {
        if self.running.load(Ordering::SeqCst) {
            bail!("Narration is still running.");
        }
        let recording = lock(&self.shared.recording);
        if recording.is_empty() {
            bail!("No narration audio to export.");
        }
        wav_bytes(&recording)
    }

    /// Seconds of audio retained for export.
    pub fn recorded_duration(&self) -> f64 {
        lock(&self.shared.recording).iter().map(|b| b.duration()).sum()
    }
}
