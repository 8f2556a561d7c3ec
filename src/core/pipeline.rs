//! Remix orchestration.
//!
//! A run walks `queued → downloading → separating → mixing → encoding →
//! delivering → done`, or drops into `failed` from any non-terminal stage.
//! Stages run strictly one after another; the blocking ones (acquisition,
//! separation, mixing, encoding) execute on tokio's blocking pool so many
//! runs can share one runtime. Each run owns its workspace, which is purged
//! before the terminal result is handed to the caller.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use tokio::sync::{mpsc, oneshot, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::{
    config::RemixConfig,
    core::{
        audio::write_audio,
        encoder::{encode_within_budget, AudioEncoder, FfmpegEncoder},
        mixer::mix,
        separator::{DemucsSeparator, StemSeparator},
        source::{DefaultSource, TrackSource},
    },
    error::{ErrorKind, RemixError, Result},
    io::{progress::ProgressEmitter, workspace::Workspace},
    types::{
        Direction, EncodedArtifact, MixPlan, ProgressEvent, RemixRequest, RunFailure, RunOutcome,
        Stage, Stem,
    },
};

/// State of one remix run. Owned by the task executing it; never shared.
#[derive(Debug)]
pub struct PipelineRun {
    id: Uuid,
    request: RemixRequest,
    stage: Stage,
    workspace: Option<Workspace>,
    failure: Option<RunFailure>,
    progress: ProgressEmitter,
}

impl PipelineRun {
    /// Creates a run in `queued` and announces it.
    pub fn new(id: Uuid, request: RemixRequest, progress: ProgressEmitter) -> Self {
        progress.emit(Stage::Queued, Stage::Queued.message());
        Self {
            id,
            request,
            stage: Stage::Queued,
            workspace: None,
            failure: None,
            progress,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn request(&self) -> &RemixRequest {
        &self.request
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn failure(&self) -> Option<&RunFailure> {
        self.failure.as_ref()
    }

    pub fn workspace(&self) -> Option<&Workspace> {
        self.workspace.as_ref()
    }

    pub fn open_workspace(&mut self, root: &Path) -> Result<&Path> {
        if self.workspace.is_none() {
            self.workspace = Some(Workspace::create(root, self.id)?);
        }
        self.workspace_dir()
    }

    fn workspace_dir(&self) -> Result<&Path> {
        self.workspace
            .as_ref()
            .map(Workspace::path)
            .ok_or_else(|| RemixError::Internal("workspace not open".into()))
    }

    fn subdir(&self, name: &str) -> Result<PathBuf> {
        self.workspace
            .as_ref()
            .ok_or_else(|| RemixError::Internal("workspace not open".into()))?
            .subdir(name)
    }

    pub fn track_artifact(&mut self, path: impl Into<PathBuf>) {
        if let Some(ws) = self.workspace.as_mut() {
            ws.track(path);
        }
    }

    /// Moves to the next success-path stage. Skipping or going back is an error.
    pub fn advance(&mut self, next: Stage) -> Result<()> {
        if self.stage.next() != Some(next) || next == Stage::Failed {
            return Err(RemixError::Internal(format!(
                "invalid stage transition {} -> {}",
                self.stage, next
            )));
        }
        info!("Stage {} -> {}", self.stage, next);
        self.stage = next;
        self.progress.emit(next, next.message());
        Ok(())
    }

    /// Enters `failed`, recording the error. A run that already failed keeps
    /// its first failure.
    pub fn fail(&mut self, err: &RemixError) -> RunFailure {
        if let Some(failure) = &self.failure {
            return failure.clone();
        }
        let failure = RunFailure {
            kind: err.kind(),
            message: err.to_string(),
            stage: self.stage,
        };
        error!("Run failed during {}: {}", self.stage, err);
        self.stage = Stage::Failed;
        self.progress
            .emit(Stage::Failed, format!("Failed: {}", failure.message));
        self.failure = Some(failure.clone());
        failure
    }

    /// Purges the workspace. Safe to call repeatedly; errors are only logged.
    pub fn cleanup(&mut self) {
        if let Some(ws) = self.workspace.as_mut() {
            if !ws.is_purged() {
                debug!(
                    "Purging {} artifacts of run {}",
                    ws.artifacts().len(),
                    self.id
                );
            }
            if let Err(e) = ws.purge() {
                warn!("Workspace cleanup failed for run {}: {e}", self.id);
            }
        }
    }
}

impl Drop for PipelineRun {
    fn drop(&mut self) {
        self.cleanup();
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| RemixError::Internal(format!("stage task failed: {e}")))?
}

struct Inner {
    config: RemixConfig,
    source: Arc<dyn TrackSource>,
    separator: Arc<dyn StemSeparator>,
    encoder: Arc<dyn AudioEncoder>,
    separation_gate: Arc<Semaphore>,
}

/// Entry point for callers. Cheap to clone; clones share the separation gate.
#[derive(Clone)]
pub struct RemixPipeline {
    inner: Arc<Inner>,
}

impl RemixPipeline {
    pub fn new(
        config: RemixConfig,
        source: Arc<dyn TrackSource>,
        separator: Arc<dyn StemSeparator>,
        encoder: Arc<dyn AudioEncoder>,
    ) -> Result<Self> {
        config.validate()?;
        let separation_gate = Arc::new(Semaphore::new(config.max_concurrent_separations));
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                source,
                separator,
                encoder,
                separation_gate,
            }),
        })
    }

    /// Pipeline backed by the library/URL source, `demucs` and `ffmpeg`.
    pub fn from_config(config: RemixConfig) -> Result<Self> {
        let source = Arc::new(DefaultSource::new(config.library_dir.clone()));
        let separator = Arc::new(DemucsSeparator::from_config(&config));
        let encoder = Arc::new(FfmpegEncoder::from_config(&config));
        Self::new(config, source, separator, encoder)
    }

    pub fn config(&self) -> &RemixConfig {
        &self.inner.config
    }

    /// Builds a request, falling back to the configured default gain.
    pub fn request(
        &self,
        track_reference: impl Into<String>,
        stem: Stem,
        direction: Direction,
        gain_db: Option<f32>,
    ) -> Result<RemixRequest> {
        let gain_db = gain_db.unwrap_or(self.inner.config.default_gain_db);
        if gain_db.abs() > self.inner.config.max_gain_db {
            return Err(RemixError::InvalidRequest(format!(
                "gain must be within ±{} dB",
                self.inner.config.max_gain_db
            )));
        }
        RemixRequest::new(track_reference, stem, direction, gain_db)
    }

    /// Starts a run in the background. Must be called inside a tokio runtime.
    ///
    /// The run keeps going if the handle is dropped, but treats that as
    /// withdrawn interest: it stops at the next stage boundary and cleans up.
    pub fn submit(&self, request: RemixRequest) -> RemixHandle {
        let run_id = Uuid::new_v4();
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let (mut result_tx, result_rx) = oneshot::channel();
        let cancel = CancellationToken::new();

        let span = info_span!("remix_run", %run_id, stem = %request.stem());
        let inner = Arc::clone(&self.inner);
        let token = cancel.clone();
        let task = tokio::spawn(
            async move {
                info!(
                    "Accepted `{}`: {} {} {:+} dB",
                    request.track_reference(),
                    request.effective_direction().action(),
                    request.stem(),
                    request.effective_gain_db()
                );
                let progress = ProgressEmitter::new(run_id, progress_tx);
                let outcome = inner
                    .execute(run_id, request, progress, &token, &mut result_tx)
                    .await;
                if result_tx.send(outcome).is_err() {
                    info!("Caller went away before the result was delivered");
                }
            }
            .instrument(span),
        );

        RemixHandle {
            run_id,
            progress: progress_rx,
            result: result_rx,
            cancel,
            task,
        }
    }
}

impl Inner {
    async fn execute(
        &self,
        run_id: Uuid,
        request: RemixRequest,
        progress: ProgressEmitter,
        cancel: &CancellationToken,
        result_tx: &mut oneshot::Sender<RunOutcome>,
    ) -> RunOutcome {
        let mut run = PipelineRun::new(run_id, request, progress);

        let outcome = match self.run_stages(&mut run, cancel, result_tx).await {
            Ok(artifact) => match run.advance(Stage::Done) {
                Ok(()) => {
                    info!(
                        "Delivered {} ({} bytes at {} kbps)",
                        artifact.filename, artifact.size_bytes, artifact.bitrate_kbps
                    );
                    Ok(artifact)
                }
                Err(e) => Err(run.fail(&e)),
            },
            Err(e) => Err(run.fail(&e)),
        };

        run.cleanup();
        outcome
    }

    fn checkpoint(
        &self,
        cancel: &CancellationToken,
        result_tx: &oneshot::Sender<RunOutcome>,
    ) -> Result<()> {
        if cancel.is_cancelled() || result_tx.is_closed() {
            info!("Cancellation observed at stage boundary");
            return Err(RemixError::Cancelled);
        }
        Ok(())
    }

    async fn acquire_separation_slot(
        &self,
        cancel: &CancellationToken,
        result_tx: &mut oneshot::Sender<RunOutcome>,
    ) -> Result<OwnedSemaphorePermit> {
        if self.separation_gate.available_permits() == 0 {
            info!("Waiting for a separation slot");
        }
        tokio::select! {
            permit = Arc::clone(&self.separation_gate).acquire_owned() => {
                permit.map_err(|_| RemixError::Internal("separation gate closed".into()))
            }
            _ = cancel.cancelled() => Err(RemixError::Cancelled),
            _ = result_tx.closed() => Err(RemixError::Cancelled),
        }
    }

    async fn run_stages(
        &self,
        run: &mut PipelineRun,
        cancel: &CancellationToken,
        result_tx: &mut oneshot::Sender<RunOutcome>,
    ) -> Result<EncodedArtifact> {
        let request = run.request().clone();
        run.open_workspace(&self.config.scratch_dir)?;

        // Acquisition
        self.checkpoint(cancel, result_tx)?;
        run.advance(Stage::Downloading)?;
        let input_dir = run.subdir("input")?;
        let source = Arc::clone(&self.source);
        let reference = request.track_reference().to_string();
        let track = blocking(move || source.resolve(&reference, &input_dir)).await?;
        run.track_artifact(track.local_path.clone());
        info!(
            "Acquired `{}` ({:.0}s) at {}",
            track.title,
            track.duration_secs,
            track.local_path.display()
        );

        let max_secs = self.config.max_input_duration_secs;
        if !track.duration_secs.is_finite() || track.duration_secs > max_secs as f64 {
            return Err(RemixError::TooLong {
                duration_secs: track.duration_secs,
                max_secs,
            });
        }

        // Separation, behind the process-wide gate
        self.checkpoint(cancel, result_tx)?;
        let permit = self.acquire_separation_slot(cancel, result_tx).await?;
        run.advance(Stage::Separating)?;
        let stems_dir = run.subdir("stems")?;
        run.track_artifact(stems_dir.clone());
        let separator = Arc::clone(&self.separator);
        let opts = self.config.separation_options();
        let input = track.local_path.clone();
        info!("Separating with {}", separator.name());
        let stems = blocking(move || separator.separate(&input, &stems_dir, &opts)).await?;
        drop(permit);

        // Mixing
        self.checkpoint(cancel, result_tx)?;
        run.advance(Stage::Mixing)?;
        let plan = MixPlan::from_request(&request);
        let limiter = self.config.limiter_settings();
        info!(
            "Mix plan: {} x{:.4} ({:+.1} dB)",
            request.stem(),
            plan.gain(request.stem()),
            request.effective_gain_db()
        );
        let mixed = blocking(move || mix(&stems, &plan, &limiter)).await?;

        // Encoding
        self.checkpoint(cancel, result_tx)?;
        run.advance(Stage::Encoding)?;
        let output_dir = run.subdir("output")?;
        let encoder = Arc::clone(&self.encoder);
        let filename = request.output_filename(&track.title, encoder.extension());
        let mixed_path = output_dir.join("mixed.wav");
        let encoded_path = output_dir.join(sanitize_file_name(&filename));
        run.track_artifact(mixed_path.clone());
        run.track_artifact(encoded_path.clone());
        let ladder = self.config.bitrate_ladder.clone();
        let max_bytes = self.config.max_output_bytes;
        let encoded = blocking(move || {
            write_audio(&mixed_path, &mixed)
                .map_err(|e| RemixError::Encode(format!("writing mixed waveform: {e}")))?;
            drop(mixed);
            encode_within_budget(encoder.as_ref(), &mixed_path, &encoded_path, &ladder, max_bytes)
        })
        .await?;
        if encoded.attempts.len() > 1 {
            info!(
                "Stepped down the bitrate ladder: {}",
                encoded
                    .attempts
                    .iter()
                    .map(|(kbps, size)| format!("{kbps}k={size}B"))
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        // Delivery
        self.checkpoint(cancel, result_tx)?;
        run.advance(Stage::Delivering)?;
        let bytes = tokio::fs::read(&encoded.path)
            .await
            .map_err(|e| RemixError::Internal(format!("reading encoded output: {e}")))?;

        Ok(EncodedArtifact {
            filename,
            size_bytes: bytes.len() as u64,
            bytes,
            bitrate_kbps: encoded.bitrate_kbps,
        })
    }
}

/// Replaces characters that cannot appear in a single path component.
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c => c,
        })
        .collect()
}

/// Caller's side of a submitted run.
#[derive(Debug)]
pub struct RemixHandle {
    run_id: Uuid,
    progress: mpsc::UnboundedReceiver<ProgressEvent>,
    result: oneshot::Receiver<RunOutcome>,
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

impl RemixHandle {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Next progress event, or `None` once the run has finished emitting.
    pub async fn next_event(&mut self) -> Option<ProgressEvent> {
        self.progress.recv().await
    }

    /// Requests cancellation. The stage in flight still completes.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits for the terminal result, feeding every progress event to
    /// `on_event` first.
    pub async fn wait<F>(mut self, mut on_event: F) -> RunOutcome
    where
        F: FnMut(ProgressEvent),
    {
        while let Some(event) = self.progress.recv().await {
            on_event(event);
        }
        self.finish().await
    }

    /// Waits for the terminal result, discarding unread progress events.
    pub async fn finish(self) -> RunOutcome {
        self.result.await.unwrap_or_else(|_| {
            Err(RunFailure {
                kind: ErrorKind::InternalError,
                message: "run ended without a result".into(),
                stage: Stage::Failed,
            })
        })
    }

    /// Walks away from the run. It stops at the next stage boundary and
    /// cleans up; the returned handle resolves once it has.
    pub fn detach(self) -> tokio::task::JoinHandle<()> {
        self.task
    }
}
