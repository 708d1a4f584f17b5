//! Drives one upload through its state machine.
//!
//! The orchestrator is the single owner of the [`UploadSession`]. Part
//! uploads run as futures in a bounded pool; their results flow back to the
//! driver loop, which is the only place session state is mutated.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use futures_util::stream::{FuturesUnordered, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use reelup_protocol::messages::{
    AbortUploadRequest, ChunkUploadRequest, CompleteUploadRequest, InitUploadRequest,
    RecoverSessionRequest, ValidateSessionRequest,
};
use reelup_protocol::types::UploadMetadata;
use reelup_transfer::{
    ByteRange, ByteSource, ChunkCodec, ChunkConstraints, ChunkPlan, ClassifiedError, ErrorKind,
    FileDescriptor, ProgressTracker, SessionState, ThroughputMeter, UploadSession, plan_chunks,
    validate_descriptor,
};

use crate::classifier::{ErrorClassifier, UploadFailure};
use crate::config::UploadConfig;
use crate::credentials::CredentialProvider;
use crate::error::UploadError;
use crate::events::{ProgressSnapshot, UploadEvent, UploadOutcome};
use crate::singleflight::FlightCoordinator;
use crate::transport::{SessionTransport, TransportError};

/// State shared between the orchestrator and its handles.
struct Control {
    cancel: CancellationToken,
    paused: watch::Sender<bool>,
    snapshot: Mutex<ProgressSnapshot>,
}

/// Cloneable remote control for a running upload.
#[derive(Clone)]
pub struct UploadHandle {
    control: Arc<Control>,
}

impl UploadHandle {
    /// Stops dispatching new parts; in-flight parts finish.
    pub fn pause(&self) {
        self.control.paused.send_replace(true);
    }

    pub fn resume(&self) {
        self.control.paused.send_replace(false);
    }

    /// Cancels the upload. The remote session is aborted best-effort.
    pub fn cancel(&self) {
        self.control.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.control.cancel.is_cancelled()
    }

    pub fn is_paused(&self) -> bool {
        *self.control.paused.borrow()
    }

    /// Latest published progress.
    pub fn progress(&self) -> ProgressSnapshot {
        self.control
            .snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Something that must happen once no part is in flight.
#[derive(Debug)]
enum SessionAction {
    Recover(ClassifiedError),
    /// Check the session; recover if invalid, otherwise just retry.
    Revalidate(ClassifiedError),
    RefreshCredentials,
}

impl SessionAction {
    fn rank(&self) -> u8 {
        match self {
            SessionAction::Recover(_) => 3,
            SessionAction::Revalidate(_) => 2,
            SessionAction::RefreshCredentials => 1,
        }
    }

    /// Keeps whichever of `slot` and `next` is more drastic.
    fn merge(slot: &mut Option<SessionAction>, next: SessionAction) {
        if slot.as_ref().is_none_or(|current| next.rank() > current.rank()) {
            *slot = Some(next);
        }
    }
}

struct PartDone {
    checksum: Option<String>,
    bytes: u64,
    checksum_verified: bool,
}

struct PartResult {
    part: u32,
    attempt: u32,
    outcome: Result<PartDone, UploadFailure>,
}

/// Everything needed to send one part, detached from the orchestrator.
struct PartJob {
    transport: Arc<dyn SessionTransport>,
    source: Arc<dyn ByteSource>,
    codec: ChunkCodec,
    session_ref: String,
    part: u32,
    range: ByteRange,
    checksums: bool,
    timeout: Duration,
    delay: Duration,
}

impl PartJob {
    async fn run(self) -> Result<PartDone, UploadFailure> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let raw = self.source.read_range(self.range).await?;
        let got = raw.len() as u64;
        if got != 0 && got < self.range.len() {
            return Err(UploadFailure::ShortRead {
                expected: self.range.len(),
                got,
            });
        }
        let encoded = self.codec.encode(&raw)?;
        let checksum = self.checksums.then(|| self.codec.checksum(&raw));

        let request = ChunkUploadRequest {
            session_ref: self.session_ref,
            part_number: self.part,
            chunk_data: encoded.payload,
            original_size: encoded.original_size,
            encoded_size: encoded.encoded_size,
            mime_type: encoded.mime_type,
            checksum: checksum.clone(),
        };

        let ack = match tokio::time::timeout(self.timeout, self.transport.upload_chunk(request)).await
        {
            Ok(result) => result?,
            Err(_) => return Err(TransportError::Timeout(self.timeout).into()),
        };
        if ack.part_number != self.part {
            return Err(TransportError::MalformedResponse(format!(
                "acknowledged part {} while sending part {}",
                ack.part_number, self.part
            ))
            .into());
        }

        Ok(PartDone {
            checksum,
            bytes: got,
            checksum_verified: ack.checksum_verified,
        })
    }
}

fn recovery_failed(missing: Vec<String>, reason: &str, trigger: ClassifiedError) -> UploadError {
    let instructions = if missing.is_empty() {
        format!("{reason}. Restart the upload from the beginning.")
    } else {
        format!(
            "{reason}: missing {}. Supply them and recover the session manually, or restart the upload from the beginning.",
            missing.join(", ")
        )
    };
    UploadError::RecoveryFailed {
        missing_fields: missing,
        cause: Some(trigger.escalate(instructions.clone())),
        instructions,
    }
}

/// Uploads one file over a [`SessionTransport`].
pub struct UploadOrchestrator {
    transport: Arc<dyn SessionTransport>,
    source: Arc<dyn ByteSource>,
    credentials: Option<Arc<dyn CredentialProvider>>,
    flights: Arc<FlightCoordinator>,
    config: UploadConfig,
    classifier: ErrorClassifier,
    codec: ChunkCodec,
    session: UploadSession,
    tracker: ProgressTracker,
    meter: ThroughputMeter,
    /// Chunk-level failures per part, counted against `max_attempts`.
    failures: HashMap<u32, u32>,
    /// Empty or short reads per part.
    empty_reads: HashMap<u32, u32>,
    retry_delays: HashMap<u32, Duration>,
    recoveries: u32,
    outcome: Option<UploadOutcome>,
    last_error: Option<UploadError>,
    control: Arc<Control>,
    events_tx: mpsc::UnboundedSender<UploadEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<UploadEvent>>,
}

impl UploadOrchestrator {
    /// Creates an orchestrator for one file.
    ///
    /// Fails with [`UploadError::Config`] when the configuration is invalid
    /// or asks for concurrent reads from a source that only reads forward.
    pub fn new(
        transport: Arc<dyn SessionTransport>,
        source: Arc<dyn ByteSource>,
        descriptor: FileDescriptor,
        metadata: UploadMetadata,
        config: UploadConfig,
    ) -> Result<Self, UploadError> {
        config.validate()?;
        if config.concurrency > 1 && !source.supports_ranged_reads() {
            return Err(UploadError::Config(format!(
                "concurrency {} needs a source with ranged reads; this source only reads forward, use concurrency 1",
                config.concurrency
            )));
        }

        let total_bytes = descriptor.file_size;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (paused, _) = watch::channel(false);

        Ok(Self {
            transport,
            source,
            credentials: None,
            flights: Arc::new(FlightCoordinator::new()),
            classifier: ErrorClassifier::new(config.backoff()),
            codec: ChunkCodec::new(descriptor.content_type.clone()),
            config,
            session: UploadSession::new(descriptor, metadata),
            tracker: ProgressTracker::new(total_bytes),
            meter: ThroughputMeter::default(),
            failures: HashMap::new(),
            empty_reads: HashMap::new(),
            retry_delays: HashMap::new(),
            recoveries: 0,
            outcome: None,
            last_error: None,
            control: Arc::new(Control {
                cancel: CancellationToken::new(),
                paused,
                snapshot: Mutex::new(ProgressSnapshot::initial(total_bytes)),
            }),
            events_tx,
            events_rx: Some(events_rx),
        })
    }

    /// Uses `provider` to refresh credentials when the backend rejects them.
    pub fn with_credentials(mut self, provider: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(provider);
        self
    }

    /// Shares recovery and refresh coordination with other orchestrators.
    pub fn with_coordinator(mut self, flights: Arc<FlightCoordinator>) -> Self {
        self.flights = flights;
        self
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<UploadEvent>> {
        self.events_rx.take()
    }

    pub fn handle(&self) -> UploadHandle {
        UploadHandle {
            control: Arc::clone(&self.control),
        }
    }

    pub fn pause(&self) {
        self.handle().pause();
    }

    pub fn resume(&self) {
        self.handle().resume();
    }

    pub fn cancel(&self) {
        self.handle().cancel();
    }

    pub fn progress(&self) -> ProgressSnapshot {
        self.snapshot()
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn session(&self) -> &UploadSession {
        &self.session
    }

    /// The error that ended the upload, if it failed.
    pub fn last_error(&self) -> Option<&UploadError> {
        self.last_error.as_ref()
    }

    /// Plans the upload and opens a session on the backend.
    ///
    /// Does nothing once the session is past `Created`.
    pub async fn initialize(&mut self) -> Result<(), UploadError> {
        match self.session.state() {
            SessionState::Created => {}
            state if state.is_terminal() => return Err(UploadError::Terminal(state)),
            _ => return Ok(()),
        }
        let result = self.open_session().await;
        self.settle(result).await
    }

    /// Uploads every part and completes the asset.
    ///
    /// Calling this again after success returns the stored outcome without
    /// touching the backend.
    pub async fn upload(&mut self) -> Result<UploadOutcome, UploadError> {
        match self.session.state() {
            SessionState::Completed => {
                return self.outcome.clone().ok_or_else(|| {
                    UploadError::Internal("completed session has no outcome".into())
                });
            }
            state if state.is_terminal() => return Err(UploadError::Terminal(state)),
            SessionState::Created => self.initialize().await?,
            _ => {}
        }
        let result = self.run_to_completion().await;
        self.settle(result).await
    }

    // -----------------------------------------------------------------------
    // Phases
    // -----------------------------------------------------------------------

    async fn open_session(&mut self) -> Result<(), UploadError> {
        self.set_state(SessionState::Planning)?;
        validate_descriptor(self.session.descriptor())?;

        let descriptor = self.session.descriptor().clone();
        if self.source.len() != descriptor.file_size {
            return Err(UploadError::Failed(ClassifiedError::invalid_input(format!(
                "source holds {} bytes but the file is described as {} bytes",
                self.source.len(),
                descriptor.file_size
            ))));
        }

        let constraints = ChunkConstraints::default().with_requested(self.config.chunk_size);
        let mut plan = plan_chunks(descriptor.file_size, &constraints)?;
        self.report_plan(&plan);

        let request = InitUploadRequest {
            file_name: descriptor.file_name.clone(),
            file_size: descriptor.file_size,
            content_type: descriptor.content_type.clone(),
            chunk_size: plan.chunk_size,
            total_chunks: plan.total_chunks,
            metadata: self.session.metadata().clone(),
        };
        let response = self
            .call_with_retries("initialize", self.config.max_attempts, |t| {
                let request = request.clone();
                async move { t.initialize(request).await }.boxed()
            })
            .await?;

        if let Some(negotiated) = response.chunk_size
            && negotiated != plan.chunk_size
        {
            plan = plan_chunks(
                descriptor.file_size,
                &constraints.with_requested(Some(negotiated)),
            )?;
            info!(
                chunk_size = plan.chunk_size,
                total_chunks = plan.total_chunks,
                "backend negotiated a different chunk size"
            );
            self.report_plan(&plan);
        }

        self.session.apply_plan(&plan)?;
        self.session.bind_remote(response.session);
        self.check_cancelled()?;
        self.set_state(SessionState::Uploading)?;
        info!(
            session = self.session.session_id().unwrap_or_default(),
            video = self.session.video_id().unwrap_or_default(),
            chunk_size = plan.chunk_size,
            total_chunks = plan.total_chunks,
            "upload session opened"
        );
        Ok(())
    }

    async fn run_to_completion(&mut self) -> Result<UploadOutcome, UploadError> {
        loop {
            self.drive_parts().await?;
            if self.check_session("before completion").await? {
                break;
            }
            self.recover(ClassifiedError::new(
                ErrorKind::SessionExpired,
                "backend reports the session is no longer valid",
            ))
            .await?;
        }
        self.complete().await
    }

    /// Runs the part pool until every part is uploaded.
    async fn drive_parts(&mut self) -> Result<(), UploadError> {
        let mut paused_rx = self.control.paused.subscribe();
        let mut in_flight: FuturesUnordered<BoxFuture<'static, PartResult>> =
            FuturesUnordered::new();
        let mut action: Option<SessionAction> = None;
        let mut terminal: Option<UploadError> = None;
        // Cancelled on caller cancel, or by us to abandon parts after a
        // terminal failure.
        let abandon = self.control.cancel.child_token();

        if self.session.state() == SessionState::Paused {
            self.park(&mut paused_rx).await?;
        }

        loop {
            let paused = *paused_rx.borrow_and_update();
            if !paused
                && !self.control.cancel.is_cancelled()
                && terminal.is_none()
                && action.is_none()
            {
                while in_flight.len() < self.config.concurrency {
                    let Some(part) = self.session.next_pending() else {
                        break;
                    };
                    in_flight.push(self.dispatch(part, &abandon)?);
                }
            }

            if let Some(result) = in_flight.next().await {
                if let Err(e) = self.handle_part(result, &abandon, &mut action)
                    && terminal.is_none()
                {
                    abandon.cancel();
                    terminal = Some(e);
                }
                continue;
            }

            // Nothing in flight from here on.
            self.check_cancelled()?;
            if let Some(e) = terminal {
                return Err(e);
            }
            match action.take() {
                Some(SessionAction::Recover(trigger)) => {
                    self.recover(trigger).await?;
                    continue;
                }
                Some(SessionAction::Revalidate(trigger)) => {
                    if !self.check_session("stale session reference").await? {
                        self.recover(trigger).await?;
                    }
                    continue;
                }
                Some(SessionAction::RefreshCredentials) => {
                    self.refresh_credentials().await?;
                    continue;
                }
                None => {}
            }
            if *paused_rx.borrow() {
                self.park(&mut paused_rx).await?;
                continue;
            }
            if self.session.all_uploaded() {
                return Ok(());
            }
            return Err(UploadError::Internal(
                "no part is pending but the upload is incomplete".into(),
            ));
        }
    }

    fn dispatch(
        &mut self,
        part: u32,
        abandon: &CancellationToken,
    ) -> Result<BoxFuture<'static, PartResult>, UploadError> {
        let attempt = self.session.begin_attempt(part)?;
        let range = self
            .session
            .chunk(part)
            .map(|c| c.range)
            .ok_or_else(|| UploadError::Internal(format!("part {part} vanished")))?;
        let delay = self.retry_delays.remove(&part).unwrap_or_default();

        debug!(part, attempt, range = %range, delay_ms = delay.as_millis() as u64, "dispatching part");

        let job = PartJob {
            transport: Arc::clone(&self.transport),
            source: Arc::clone(&self.source),
            codec: self.codec.clone(),
            session_ref: self.session.session_id().unwrap_or_default().to_string(),
            part,
            range,
            checksums: self.config.checksums,
            timeout: self.config.chunk_timeout(),
            delay,
        };
        let token = abandon.clone();

        Ok(async move {
            let outcome = tokio::select! {
                _ = token.cancelled() => Err(UploadFailure::Transport(TransportError::Cancelled)),
                r = job.run() => r,
            };
            PartResult {
                part,
                attempt,
                outcome,
            }
        }
        .boxed())
    }

    fn handle_part(
        &mut self,
        result: PartResult,
        abandon: &CancellationToken,
        action: &mut Option<SessionAction>,
    ) -> Result<(), UploadError> {
        let PartResult {
            part,
            attempt,
            outcome,
        } = result;

        match outcome {
            Ok(done) => {
                self.session.record_uploaded(part, done.checksum)?;
                self.empty_reads.remove(&part);
                self.meter.record(done.bytes);
                if self.config.checksums && !done.checksum_verified {
                    debug!(part, "backend did not confirm the checksum");
                }
                debug!(part, attempt, bytes = done.bytes, "part uploaded");
                self.report_progress();
                Ok(())
            }
            // Only our own cancellation puts a part back for free. A
            // transport that reports `Cancelled` on its own is charged like
            // any other failure.
            Err(_) if abandon.is_cancelled() || self.control.cancel.is_cancelled() => {
                self.session.requeue(part)?;
                Ok(())
            }
            Err(failure) => self.handle_failure(part, attempt, failure, action),
        }
    }

    fn handle_failure(
        &mut self,
        part: u32,
        attempt: u32,
        failure: UploadFailure,
        action: &mut Option<SessionAction>,
    ) -> Result<(), UploadError> {
        let count = self.failures.get(&part).copied().unwrap_or(0) + 1;
        let mut classified = self.classifier.classify(&failure, count);
        self.session.record_failure(part, classified.clone())?;

        // Session expiry is resolved by recovery and does not use up the
        // part's retry budget.
        if classified.is_session_expired {
            warn!(part, attempt, error = %classified, "upload session expired");
            self.session.requeue(part)?;
            self.emit_error(Some(part), &classified, true);
            SessionAction::merge(action, SessionAction::Recover(classified));
            if self.session.state() == SessionState::Uploading {
                self.set_state(SessionState::Recovering)?;
            }
            return Ok(());
        }
        self.failures.insert(part, count);

        if classified.kind == ErrorKind::EmptyChunk {
            let empties = self.empty_reads.entry(part).or_insert(0);
            *empties += 1;
            if *empties >= self.config.empty_chunk_max_attempts {
                let message = format!(
                    "part {part} came back empty or short {empties} times; the source is likely truncated or corrupt"
                );
                return Err(UploadError::Failed(classified.escalate(message)));
            }
        }

        let budget_left = count < self.config.max_attempts;

        if classified.requires_session_refresh && budget_left {
            warn!(part, attempt, error = %classified, "stale session reference; revalidating");
            self.session.requeue(part)?;
            self.emit_error(Some(part), &classified, true);
            SessionAction::merge(action, SessionAction::Revalidate(classified));
            return Ok(());
        }

        if classified.requires_credential_refresh {
            if self.credentials.is_some() && budget_left {
                warn!(part, attempt, "credentials rejected; refreshing");
                self.session.requeue(part)?;
                self.emit_error(Some(part), &classified, true);
                SessionAction::merge(action, SessionAction::RefreshCredentials);
                return Ok(());
            }
            classified.suggested_delay = self.config.backoff().delay(ErrorKind::Unknown, count);
        }

        if classified.is_retryable && budget_left {
            warn!(
                part,
                attempt,
                error = %classified,
                delay_ms = classified.suggested_delay.as_millis() as u64,
                "part failed; retrying"
            );
            self.session.requeue(part)?;
            self.retry_delays.insert(part, classified.suggested_delay);
            self.emit_error(Some(part), &classified, true);
            return Ok(());
        }

        let message = if classified.is_retryable {
            format!(
                "part {part} failed after {count} attempts: {}",
                classified.message
            )
        } else {
            format!("part {part}: {}", classified.message)
        };
        Err(UploadError::Failed(classified.escalate(message)))
    }

    /// Replaces the expired session, keeping credit for landed parts.
    async fn recover(&mut self, trigger: ClassifiedError) -> Result<(), UploadError> {
        if self.session.state() != SessionState::Recovering {
            self.set_state(SessionState::Recovering)?;
        }
        if self.recoveries >= self.config.max_recoveries {
            return Err(recovery_failed(
                Vec::new(),
                &format!(
                    "the session expired again after {} recoveries",
                    self.recoveries
                ),
                trigger,
            ));
        }

        let Some(expired) = self.session.remote().cloned() else {
            return Err(recovery_failed(
                vec!["expiredSessionRef".into()],
                "no session to recover",
                trigger,
            ));
        };
        let descriptor = self.session.descriptor().clone();
        let course_id = self
            .session
            .metadata()
            .course_id
            .clone()
            .filter(|c| !c.trim().is_empty());

        let mut missing = Vec::new();
        if descriptor.file_name.trim().is_empty() {
            missing.push("originalFileName".to_string());
        }
        if course_id.is_none() {
            missing.push("courseId".to_string());
        }
        if descriptor.content_type.trim().is_empty() {
            missing.push("contentType".to_string());
        }
        if !missing.is_empty() {
            return Err(recovery_failed(
                missing,
                "cannot recover the upload session",
                trigger,
            ));
        }

        let request = RecoverSessionRequest {
            expired_session_ref: expired.session_id.clone(),
            previous_video_id: expired.video_id.clone(),
            original_file_name: descriptor.file_name,
            course_id: course_id.unwrap_or_default(),
            content_type: descriptor.content_type,
            file_size: descriptor.file_size,
        };

        info!(
            session = %expired.session_id,
            video = %expired.video_id,
            recovery = self.recoveries + 1,
            "recovering upload session"
        );

        let transport = Arc::clone(&self.transport);
        let timeout = self.config.chunk_timeout();
        let cancel = self.control.cancel.clone();
        let flight = self
            .flights
            .recoveries
            .run(expired.session_id.clone(), move || {
                async move { transport.recover_session(request).await }.boxed()
            });
        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(UploadError::Cancelled),
            r = tokio::time::timeout(timeout, flight) => {
                r.unwrap_or(Err(TransportError::Timeout(timeout)))
            }
        };

        let response = match result {
            Ok(response) if response.recovery.session_recovered => response,
            Ok(_) => {
                return Err(recovery_failed(
                    Vec::new(),
                    "the backend declined to recover the session",
                    trigger,
                ));
            }
            Err(TransportError::Backend(err)) if !err.missing_fields.is_empty() => {
                return Err(recovery_failed(
                    err.missing_fields.clone(),
                    &format!("the backend rejected the recovery request ({err})"),
                    trigger,
                ));
            }
            Err(e) => {
                return Err(recovery_failed(
                    Vec::new(),
                    &format!("session recovery failed: {e}"),
                    trigger,
                ));
            }
        };

        self.recoveries += 1;
        let kept = self.session.apply_recovery(
            response.new_session.clone(),
            &response.recovery,
            self.source.supports_ranged_reads(),
        );
        self.retry_delays.clear();
        if !kept.is_empty() {
            warn!(parts = ?kept, "backend lost parts a forward-only source cannot re-read");
            self.emit(UploadEvent::Warning(format!(
                "the recovered session does not list parts {kept:?}, but the source only reads forward so they cannot be sent again; completion may fail if the backend really lost them"
            )));
        }

        info!(
            previous_video = %response.recovery.previous_video_id,
            new_video = %response.recovery.new_video_id,
            generation = self.session.generation(),
            uploaded = self.session.uploaded_chunks(),
            total = self.session.total_chunks(),
            "upload session recovered"
        );
        self.emit(UploadEvent::SessionRecovered(response.recovery));
        self.set_state(SessionState::Uploading)?;
        self.report_progress();
        Ok(())
    }

    async fn complete(&mut self) -> Result<UploadOutcome, UploadError> {
        self.set_state(SessionState::Completing)?;
        let remote = self
            .session
            .remote()
            .cloned()
            .ok_or_else(|| UploadError::Internal("no session to complete".into()))?;

        let request = CompleteUploadRequest {
            session_ref: remote.session_id.clone(),
            video_id: remote.video_id.clone(),
            total_chunks: self.session.total_chunks(),
            file_size: self.session.descriptor().file_size,
        };
        let response = self
            .call_with_retries("complete", self.config.completion_attempts, |t| {
                let request = request.clone();
                async move { t.complete_upload(request).await }.boxed()
            })
            .await?;

        self.session.set_video_id(response.video_id.clone());
        self.set_state(SessionState::Completed)?;

        let outcome = UploadOutcome {
            video_id: response.video_id,
            playback_url: response.playback_url,
            total_chunks: self.session.total_chunks(),
            file_size: self.session.descriptor().file_size,
            recoveries: self.recoveries,
        };
        self.outcome = Some(outcome.clone());
        self.report_progress();
        info!(
            video = %outcome.video_id,
            chunks = outcome.total_chunks,
            bytes = outcome.file_size,
            recoveries = outcome.recoveries,
            "upload complete"
        );
        Ok(outcome)
    }

    /// Waits while paused, then revalidates the session.
    async fn park(&mut self, paused_rx: &mut watch::Receiver<bool>) -> Result<(), UploadError> {
        if self.session.state() != SessionState::Paused {
            self.set_state(SessionState::Paused)?;
        }
        let cancel = self.control.cancel.clone();
        tokio::select! {
            _ = cancel.cancelled() => return Err(UploadError::Cancelled),
            r = paused_rx.wait_for(|paused| !*paused) => {
                if r.is_err() {
                    return Err(UploadError::Internal("pause control dropped".into()));
                }
            }
        }

        info!("upload resumed");
        if self.check_session("resume").await? {
            self.set_state(SessionState::Uploading)?;
            Ok(())
        } else {
            self.recover(ClassifiedError::new(
                ErrorKind::SessionExpired,
                "session expired while the upload was paused",
            ))
            .await
        }
    }

    // -----------------------------------------------------------------------
    // Transport helpers
    // -----------------------------------------------------------------------

    /// Calls a session-level operation with its own retry budget.
    async fn call_with_retries<T, F>(
        &mut self,
        op: &'static str,
        budget: u32,
        mut call: F,
    ) -> Result<T, UploadError>
    where
        F: FnMut(Arc<dyn SessionTransport>) -> BoxFuture<'static, Result<T, TransportError>>,
    {
        let timeout = self.config.chunk_timeout();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let cancel = self.control.cancel.clone();
            let pending = call(Arc::clone(&self.transport));
            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(UploadError::Cancelled),
                r = tokio::time::timeout(timeout, pending) => {
                    r.unwrap_or(Err(TransportError::Timeout(timeout)))
                }
            };
            let failure = match result {
                Ok(value) => return Ok(value),
                Err(e) => UploadFailure::Transport(e),
            };

            let classified = self.classifier.classify(&failure, attempt);
            let budget_left = attempt < budget && !classified.is_session_expired;

            if classified.requires_credential_refresh && self.credentials.is_some() && budget_left
            {
                self.emit_error(None, &classified, true);
                self.refresh_credentials().await?;
                continue;
            }
            if classified.is_retryable && budget_left {
                warn!(
                    op,
                    attempt,
                    error = %classified,
                    delay_ms = classified.suggested_delay.as_millis() as u64,
                    "request failed; retrying"
                );
                self.emit_error(None, &classified, true);
                self.sleep(classified.suggested_delay).await?;
                continue;
            }

            let message = if classified.is_retryable {
                format!("{op} failed after {attempt} attempts: {}", classified.message)
            } else {
                format!("{op}: {}", classified.message)
            };
            return Err(UploadError::Failed(classified.escalate(message)));
        }
    }

    /// Asks the backend whether the session is still usable.
    ///
    /// A failed check is logged and treated as valid; the next real request
    /// will tell.
    async fn check_session(&mut self, reason: &'static str) -> Result<bool, UploadError> {
        let Some(remote) = self.session.remote().cloned() else {
            return Ok(true);
        };
        let request = ValidateSessionRequest {
            session_ref: remote.session_id.clone(),
            video_id: remote.video_id.clone(),
        };
        let timeout = self.config.chunk_timeout();
        let cancel = self.control.cancel.clone();
        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(UploadError::Cancelled),
            r = tokio::time::timeout(timeout, self.transport.validate_session(request)) => {
                r.unwrap_or(Err(TransportError::Timeout(timeout)))
            }
        };

        match result {
            Ok(status) => {
                if status.is_near_expiration {
                    let warning = status
                        .expiration_warning
                        .unwrap_or_else(|| "upload session is close to expiring".into());
                    warn!(session = %remote.session_id, reason, "{warning}");
                    self.emit(UploadEvent::Warning(warning));
                }
                if !status.is_valid {
                    warn!(session = %remote.session_id, reason, "backend reports session invalid");
                }
                Ok(status.is_valid)
            }
            Err(e) => {
                warn!(session = %remote.session_id, reason, error = %e, "session check failed; continuing");
                Ok(true)
            }
        }
    }

    async fn refresh_credentials(&mut self) -> Result<(), UploadError> {
        let Some(provider) = self.credentials.clone() else {
            return Ok(());
        };
        info!("refreshing credentials");
        let cancel = self.control.cancel.clone();
        let flight = self.flights.refreshes.run((), move || {
            async move { provider.refresh().await }.boxed()
        });
        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(UploadError::Cancelled),
            r = flight => r,
        };
        result.map_err(|e| {
            UploadError::Failed(
                ClassifiedError::new(ErrorKind::AuthExpired, e.to_string()).with_retryable(false),
            )
        })
    }

    /// Best-effort abort of the remote session, then `Aborted`.
    async fn abort(&mut self) {
        if self.session.state().is_terminal() {
            return;
        }
        if let Some(remote) = self.session.remote().cloned() {
            let request = AbortUploadRequest {
                session_ref: remote.session_id.clone(),
                video_id: remote.video_id.clone(),
            };
            let timeout = self.config.abort_timeout();
            match tokio::time::timeout(timeout, self.transport.abort_upload(request)).await {
                Ok(Ok(())) => info!(session = %remote.session_id, "remote session aborted"),
                Ok(Err(e)) => {
                    warn!(session = %remote.session_id, error = %e, "abort request failed")
                }
                Err(_) => warn!(session = %remote.session_id, ?timeout, "abort request timed out"),
            }
        } else if self.session.state() == SessionState::Planning {
            // The init request may have reached the backend before we gave up
            // on its reply; there is no session id to abort with.
            warn!(
                file = %self.session.descriptor().file_name,
                "cancelled while opening the session; the backend may hold an orphaned session"
            );
        }
        if let Err(e) = self.set_state(SessionState::Aborted) {
            warn!(error = %e, "could not mark the upload aborted");
        }
    }

    /// Applies the terminal side effects of a phase result.
    async fn settle<T>(&mut self, result: Result<T, UploadError>) -> Result<T, UploadError> {
        match result {
            Ok(value) => Ok(value),
            Err(UploadError::Cancelled) => {
                info!("upload cancelled");
                self.abort().await;
                Err(UploadError::Cancelled)
            }
            Err(err) => {
                self.fail(&err);
                Err(err)
            }
        }
    }

    fn fail(&mut self, err: &UploadError) {
        match err.classified() {
            Some(classified) => {
                error!(
                    kind = %classified.kind,
                    error = %err,
                    next_step = %err.next_step(),
                    "upload failed"
                );
                self.emit_error(None, classified, false);
            }
            None => error!(error = %err, "upload failed"),
        }
        if !self.session.state().is_terminal()
            && let Err(e) = self.set_state(SessionState::Failed)
        {
            warn!(error = %e, "could not mark the upload failed");
        }
        self.last_error = Some(err.clone());
    }

    async fn sleep(&self, delay: Duration) -> Result<(), UploadError> {
        if delay.is_zero() {
            return Ok(());
        }
        tokio::select! {
            _ = self.control.cancel.cancelled() => Err(UploadError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    fn check_cancelled(&self) -> Result<(), UploadError> {
        if self.control.cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Reporting
    // -----------------------------------------------------------------------

    fn set_state(&mut self, next: SessionState) -> Result<(), UploadError> {
        let from = self.session.transition(next)?;
        info!(
            session = self.session.session_id().unwrap_or("-"),
            ?from,
            to = ?next,
            "upload state changed"
        );
        self.emit(UploadEvent::StateChanged { from, to: next });
        self.publish(self.snapshot());
        Ok(())
    }

    fn report_plan(&self, plan: &ChunkPlan) {
        debug!(
            chunk_size = plan.chunk_size,
            total_chunks = plan.total_chunks,
            last_chunk = plan.last_chunk_size(),
            "chunk plan ready"
        );
        for warning in &plan.warnings {
            warn!(%warning, "chunk plan warning");
            self.emit(UploadEvent::Warning(warning.to_string()));
        }
    }

    fn report_progress(&mut self) {
        self.tracker
            .observe(self.session.uploaded_bytes(), self.session.generation());
        let snapshot = self.snapshot();
        self.publish(snapshot.clone());
        self.emit(UploadEvent::Progress(snapshot));
    }

    fn snapshot(&self) -> ProgressSnapshot {
        let remaining = self.session.outstanding_bytes();
        ProgressSnapshot {
            percent: self.tracker.percent(),
            uploaded_chunks: self.session.uploaded_chunks(),
            total_chunks: self.session.total_chunks(),
            uploaded_bytes: self.session.uploaded_bytes(),
            total_bytes: self.session.descriptor().file_size,
            video_id: self.session.video_id().map(str::to_owned),
            state: self.session.state(),
            generation: self.session.generation(),
            bytes_per_second: self.meter.bytes_per_second(),
            eta: self.meter.eta(remaining),
        }
    }

    fn publish(&self, snapshot: ProgressSnapshot) {
        *self
            .control
            .snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = snapshot;
    }

    fn emit_error(&self, part: Option<u32>, error: &ClassifiedError, will_retry: bool) {
        self.emit(UploadEvent::Error {
            part,
            error: error.clone(),
            will_retry,
        });
    }

    fn emit(&self, event: UploadEvent) {
        // The caller may never take the receiver.
        let _ = self.events_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelup_transfer::MemorySource;

    struct NoBackend;

    impl SessionTransport for NoBackend {
        fn initialize(
            &self,
            _: InitUploadRequest,
        ) -> crate::TransportFuture<'_, reelup_protocol::messages::InitUploadResponse> {
            Box::pin(async { Err(TransportError::Unreachable("offline".into())) })
        }
        fn upload_chunk(
            &self,
            _: ChunkUploadRequest,
        ) -> crate::TransportFuture<'_, reelup_protocol::messages::ChunkAck> {
            Box::pin(async { Err(TransportError::Unreachable("offline".into())) })
        }
        fn complete_upload(
            &self,
            _: CompleteUploadRequest,
        ) -> crate::TransportFuture<'_, reelup_protocol::messages::CompleteUploadResponse> {
            Box::pin(async { Err(TransportError::Unreachable("offline".into())) })
        }
        fn abort_upload(&self, _: AbortUploadRequest) -> crate::TransportFuture<'_, ()> {
            Box::pin(async { Ok(()) })
        }
        fn validate_session(
            &self,
            _: ValidateSessionRequest,
        ) -> crate::TransportFuture<'_, reelup_protocol::messages::ValidateSessionResponse> {
            Box::pin(async { Err(TransportError::Unreachable("offline".into())) })
        }
        fn recover_session(
            &self,
            _: RecoverSessionRequest,
        ) -> crate::TransportFuture<'_, reelup_protocol::messages::RecoverSessionResponse> {
            Box::pin(async { Err(TransportError::Unreachable("offline".into())) })
        }
    }

    fn descriptor(size: u64) -> FileDescriptor {
        FileDescriptor {
            file_name: "a.mp4".into(),
            file_size: size,
            content_type: "video/mp4".into(),
        }
    }

    #[test]
    fn sequential_source_rejects_concurrency() {
        let source = reelup_transfer::SequentialSource::new(std::io::Cursor::new(vec![0u8; 4096]), 4096);
        let config = UploadConfig {
            concurrency: 2,
            ..Default::default()
        };
        let result = UploadOrchestrator::new(
            Arc::new(NoBackend),
            Arc::new(source),
            descriptor(4096),
            UploadMetadata::default(),
            config,
        );
        assert!(matches!(result, Err(UploadError::Config(_))));
    }

    #[test]
    fn invalid_config_rejected() {
        let config = UploadConfig {
            max_attempts: 0,
            ..Default::default()
        };
        let result = UploadOrchestrator::new(
            Arc::new(NoBackend),
            Arc::new(MemorySource::new(vec![0u8; 4096])),
            descriptor(4096),
            UploadMetadata::default(),
            config,
        );
        assert!(matches!(result, Err(UploadError::Config(_))));
    }

    #[test]
    fn take_events_once() {
        let mut orch = UploadOrchestrator::new(
            Arc::new(NoBackend),
            Arc::new(MemorySource::new(vec![0u8; 4096])),
            descriptor(4096),
            UploadMetadata::default(),
            UploadConfig::default(),
        )
        .unwrap();
        assert!(orch.take_events().is_some());
        assert!(orch.take_events().is_none());
    }

    #[test]
    fn handle_controls_are_shared() {
        let orch = UploadOrchestrator::new(
            Arc::new(NoBackend),
            Arc::new(MemorySource::new(vec![0u8; 4096])),
            descriptor(4096),
            UploadMetadata::default(),
            UploadConfig::default(),
        )
        .unwrap();
        let handle = orch.handle();
        handle.pause();
        assert!(orch.handle().is_paused());
        orch.resume();
        assert!(!handle.is_paused());
        orch.cancel();
        assert!(handle.is_cancelled());
        assert_eq!(handle.progress().state, SessionState::Created);
        assert_eq!(handle.progress().total_bytes, 4096);
    }

    #[tokio::test]
    async fn size_mismatch_fails_before_network() {
        let mut orch = UploadOrchestrator::new(
            Arc::new(NoBackend),
            Arc::new(MemorySource::new(vec![0u8; 4096])),
            descriptor(8192),
            UploadMetadata::default(),
            UploadConfig::default(),
        )
        .unwrap();
        let err = orch.upload().await.unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::InvalidInput));
        assert_eq!(orch.state(), SessionState::Failed);
        assert!(matches!(
            orch.upload().await,
            Err(UploadError::Terminal(SessionState::Failed))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_backend_exhausts_init_budget() {
        let mut orch = UploadOrchestrator::new(
            Arc::new(NoBackend),
            Arc::new(MemorySource::new(vec![1u8; 4096])),
            descriptor(4096),
            UploadMetadata::default(),
            UploadConfig::default(),
        )
        .unwrap();
        let mut events = orch.take_events().unwrap();
        let err = orch.upload().await.unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::NetworkFault));
        assert!(!err.classified().unwrap().is_retryable);

        let mut retries = 0;
        while let Ok(event) = events.try_recv() {
            if let UploadEvent::Error { will_retry: true, .. } = event {
                retries += 1;
            }
        }
        assert_eq!(retries, 2);
    }

    #[test]
    fn action_merge_keeps_most_drastic() {
        let expired = ClassifiedError::new(ErrorKind::SessionExpired, "x");
        let mut slot = None;
        SessionAction::merge(&mut slot, SessionAction::RefreshCredentials);
        SessionAction::merge(&mut slot, SessionAction::Recover(expired.clone()));
        SessionAction::merge(&mut slot, SessionAction::Revalidate(expired));
        assert!(matches!(slot, Some(SessionAction::Recover(_))));
    }
}
