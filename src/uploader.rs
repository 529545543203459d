//! Upload orchestration.
//!
//! `Uploader` owns one upload session end to end and sequences the phases:
//! validate, obtain the init signature, initiate the multipart upload,
//! obtain the remaining signatures, upload all chunks concurrently,
//! reconcile against the store's part listing, then complete.
//!
//! Concurrency model: every chunk PUT runs in its own task and reports
//! progress, confirmation or failure over an mpsc channel to a single
//! coordinator loop inside [`Uploader::start_upload`]. The coordinator is
//! the only writer of the ETag table, so the "last confirmation triggers
//! reconciliation" check is serialized by construction even though chunk
//! completions race.

use std::collections::HashMap;
use std::mem;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::UploadConfig;
use crate::error::UploadError;
use crate::notify::UploadNotify;
use crate::planner::plan_chunks;
use crate::protocol;
use crate::retry::RetryPolicy;
use crate::session::SessionState;
use crate::signing::{self, AllSignatures};
use crate::source::FileSource;
use crate::transport::{HttpRequest, HttpResponse, ProgressFn, Transport, TransportError};
use crate::types::{Chunk, RemotePart, Signature, UploadStatus};

const MSG_EMPTY: &str = "The file could not be uploaded because it is empty.";
const MSG_INIT_SIGNATURE: &str =
    "Max number of retries have been met. Unable to get init signature!";
const MSG_INITIATE: &str =
    "Max number of retries have been met. Unable to initiate an upload request!";
const MSG_ALL_SIGNATURES: &str =
    "Max number of retries have been met. Unable to retrieve remaining signatures!";
const MSG_VERIFY: &str =
    "Max number of retries have been met. Unable to verify all chunks have uploaded!";
const MSG_COMPLETE: &str =
    "Max number of retries have been met. Unable to complete multipart upload!";
const MSG_CHUNK_RETRY: &str =
    "Max number of retries has been met. Cannot retry uploading chunk!";

/// Why a running upload stopped short of completion.
enum Abort {
    Cancelled,
    Failed(String),
}

/// Maps a protocol-shape or I/O failure to a session failure.
fn shape<T>(result: Result<T, UploadError>) -> Result<T, Abort> {
    result.map_err(|e| Abort::Failed(e.to_string()))
}

/// Values fixed for the lifetime of one upload attempt and shared with
/// every chunk task.
struct UploadContext {
    key: String,
    file_name: String,
    content_type: String,
    upload_id: String,
}

/// Events chunk tasks report to the coordinator loop.
enum ChunkEvent {
    /// Cumulative bytes sent for this chunk's current attempt.
    Progress(u32, u64),
    /// Chunk confirmed with its quote-stripped ETag.
    Done(u32, String),
    Failed(u32, UploadError),
}

/// Outcome of comparing the store's part listing against local state.
enum Verdict {
    Consistent,
    /// Part numbers that must be re-uploaded.
    Resubmit(Vec<u32>),
}

/// Orchestrates one multipart upload.
///
/// Construct it, subscribe via the [`UploadNotify`] passed in, then call
/// [`Uploader::start_upload`]. A second `start_upload` while one is running
/// is a no-op, as is [`Uploader::cancel_upload`] while nothing is running.
pub struct Uploader {
    config: Arc<UploadConfig>,
    source: Arc<dyn FileSource>,
    transport: Arc<dyn Transport>,
    notify: Arc<dyn UploadNotify>,
    session: Arc<SessionState>,
    policy: RetryPolicy,
    cancel: CancellationToken,
    /// Abort handles for every dispatched network task. Appended on each
    /// dispatch, drained atomically on cancel.
    in_flight: Mutex<Vec<AbortHandle>>,
}

impl Uploader {
    /// Creates an uploader in the `Ready` state and fires `on_ready`.
    pub fn new(
        config: UploadConfig,
        source: Arc<dyn FileSource>,
        transport: Arc<dyn Transport>,
        notify: Arc<dyn UploadNotify>,
    ) -> Self {
        let policy = RetryPolicy::new(config.max_retries, config.retry_delay);
        let uploader = Self {
            config: Arc::new(config),
            source,
            transport,
            notify,
            session: Arc::new(SessionState::new()),
            policy,
            cancel: CancellationToken::new(),
            in_flight: Mutex::new(Vec::new()),
        };
        uploader.notify.on_ready();
        uploader
    }

    pub fn status(&self) -> UploadStatus {
        self.session.status()
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// Runs the upload to a terminal state. Outcomes are reported through
    /// the [`UploadNotify`] sink and reflected in [`Uploader::status`].
    ///
    /// Only callable from `Ready`; anything else is a no-op.
    pub async fn start_upload(&self) {
        if self.session.status() != UploadStatus::Ready {
            return;
        }

        if self.source.size() > self.config.max_file_size {
            self.fail(&UploadError::TooLarge.to_string());
            return;
        }
        if let Err(e) = self.source.probe().await {
            self.fail(&UploadError::Unreadable(e).to_string());
            return;
        }

        // The transition gate makes concurrent start calls race to a single
        // winner; losers return without side effects.
        if !self.session.transition(UploadStatus::Uploading) {
            return;
        }
        self.notify.on_start();

        match self.run().await {
            Ok(location) => {
                if self.session.transition(UploadStatus::Completed) {
                    info!(location = %location, "upload completed");
                    self.notify.on_complete(&location);
                }
            }
            Err(Abort::Failed(message)) => self.fail(&message),
            // cancel_upload already notified and transitioned.
            Err(Abort::Cancelled) => {}
        }
    }

    /// Aborts every in-flight network operation and moves the session to
    /// `Cancelled`. Idempotent; a no-op unless currently `Uploading`.
    pub fn cancel_upload(&self) {
        if self.session.status() != UploadStatus::Uploading {
            return;
        }

        let handles = mem::take(&mut *self.in_flight.lock().unwrap());
        for handle in &handles {
            handle.abort();
        }
        self.cancel.cancel();

        if self.session.transition(UploadStatus::Cancelled) {
            info!(aborted = handles.len(), "upload cancelled");
            self.notify.on_cancel();
        }
    }

    /// Full protocol sequence, returning the final object location.
    async fn run(&self) -> Result<String, Abort> {
        let total = self.source.size();
        let file_name = self.source.name().to_string();
        let key = self.config.object_key(&file_name);
        let content_type = self
            .config
            .resolved_content_type(self.source.content_type());

        let plan = plan_chunks(total, self.config.chunk_size);
        if plan.is_empty() {
            return Err(Abort::Failed(MSG_EMPTY.to_string()));
        }

        info!(
            key = %key,
            size = total,
            chunks = plan.len(),
            "starting multipart upload"
        );

        // Phase 1: init signature.
        let response = self
            .phase(
                || {
                    signing::init_signature_request(
                        &self.config,
                        &key,
                        &file_name,
                        total,
                        &content_type,
                    )
                },
                MSG_INIT_SIGNATURE,
            )
            .await?;
        let init_signature = shape(signing::parse_init_signature(&response.body))?;

        // Phase 2: initiate, yielding the upload id.
        let response = self
            .phase(
                || protocol::initiate_request(&self.config, &key, &file_name, &init_signature),
                MSG_INITIATE,
            )
            .await?;
        let upload_id = shape(protocol::parse_initiate(&response.body))?;
        debug!(upload_id = %upload_id, "upload initiated");

        // Phase 3: remaining signatures, one per chunk plus list + complete.
        let response = self
            .phase(
                || {
                    signing::all_signatures_request(
                        &self.config,
                        &key,
                        &upload_id,
                        plan.len(),
                        &content_type,
                    )
                },
                MSG_ALL_SIGNATURES,
            )
            .await?;
        let signatures = shape(signing::parse_all_signatures(&response.body, &plan))?;

        let ctx = Arc::new(UploadContext {
            key,
            file_name,
            content_type,
            upload_id,
        });

        // Phase 4: all chunks in flight at once, then reconcile + complete.
        self.transfer_chunks(total, &plan, &signatures, &ctx).await
    }

    /// Dispatches every chunk, then drives the coordinator loop until the
    /// upload completes, fails or is cancelled.
    async fn transfer_chunks(
        &self,
        total: u64,
        plan: &[Chunk],
        signatures: &AllSignatures,
        ctx: &Arc<UploadContext>,
    ) -> Result<String, Abort> {
        let (events_tx, mut events_rx) = mpsc::channel::<ChunkEvent>(256);

        for chunk in plan {
            let signature = signatures.chunk_signatures[&chunk.number].clone();
            self.dispatch_chunk(*chunk, signature, ctx, None, events_tx.clone());
        }

        loop {
            let event = tokio::select! {
                _ = self.cancel.cancelled() => return Err(Abort::Cancelled),
                event = events_rx.recv() => match event {
                    Some(event) => event,
                    // Unreachable while we hold events_tx.
                    None => return Err(Abort::Cancelled),
                },
            };

            match event {
                ChunkEvent::Progress(part, bytes) => {
                    self.session.record_progress(part, bytes);
                    self.notify.on_progress(self.session.loaded(), total);
                }

                ChunkEvent::Done(part, etag) => {
                    let chunk = plan[(part - 1) as usize];
                    self.session.record_progress(part, chunk.len());
                    let confirmed = self.session.record_etag(part, etag);
                    self.notify.on_progress(self.session.loaded(), total);
                    if self.config.log {
                        debug!(part, confirmed, "chunk confirmed");
                    }

                    // Only the confirmation that fills the table starts a
                    // reconciliation pass; earlier ones fall through.
                    if confirmed == plan.len() {
                        match self
                            .verify_parts(plan, ctx, &signatures.list_signature)
                            .await?
                        {
                            Verdict::Consistent => {
                                return self
                                    .complete_upload(ctx, &signatures.complete_signature)
                                    .await;
                            }
                            Verdict::Resubmit(parts) => {
                                self.resubmit_chunks(
                                    &parts, plan, signatures, ctx, &events_tx,
                                )?;
                            }
                        }
                    }
                }

                ChunkEvent::Failed(part, error) => {
                    if !error.is_retryable() {
                        return Err(Abort::Failed(error.to_string()));
                    }
                    let attempts = self.session.attempts(part);
                    if !self.policy.retry_available(attempts, self.session.status()) {
                        return Err(Abort::Failed(format!(
                            "Max number of retries have been met. Upload of chunk #{part} failed!"
                        )));
                    }
                    let attempt = self.session.bump_attempts(part);
                    warn!(part, attempt, error = %error, "retrying chunk");
                    self.notify.on_retry(attempt);
                    self.session.record_progress(part, 0);

                    let chunk = plan[(part - 1) as usize];
                    let signature = signatures.chunk_signatures[&part].clone();
                    self.dispatch_chunk(
                        chunk,
                        signature,
                        ctx,
                        Some(self.policy.delay(attempt)),
                        events_tx.clone(),
                    );
                }
            }
        }
    }

    /// Spawns one chunk PUT, optionally after a backoff delay, and tracks
    /// its abort handle.
    fn dispatch_chunk(
        &self,
        chunk: Chunk,
        signature: Signature,
        ctx: &Arc<UploadContext>,
        delay: Option<Duration>,
        events: mpsc::Sender<ChunkEvent>,
    ) {
        let job = ChunkJob {
            chunk,
            signature,
            config: Arc::clone(&self.config),
            ctx: Arc::clone(ctx),
            source: Arc::clone(&self.source),
            transport: Arc::clone(&self.transport),
            cancel: self.cancel.clone(),
            events,
            delay,
        };
        let handle = tokio::spawn(job.run());
        self.in_flight.lock().unwrap().push(handle.abort_handle());
    }

    /// Schedules re-uploads for the given parts, each against its own
    /// remaining attempt budget.
    fn resubmit_chunks(
        &self,
        parts: &[u32],
        plan: &[Chunk],
        signatures: &AllSignatures,
        ctx: &Arc<UploadContext>,
        events_tx: &mpsc::Sender<ChunkEvent>,
    ) -> Result<(), Abort> {
        for &part in parts {
            let attempts = self.session.attempts(part);
            if !self.policy.retry_available(attempts, self.session.status()) {
                return Err(Abort::Failed(MSG_CHUNK_RETRY.to_string()));
            }
            let attempt = self.session.bump_attempts(part);
            warn!(part, attempt, "re-uploading chunk after part list mismatch");
            self.notify.on_retry(attempt);
            // The stale ETag comes out of the table so reconciliation only
            // re-arms once the store confirms the replacement.
            self.session.remove_etag(part);
            self.session.record_progress(part, 0);

            let chunk = plan[(part - 1) as usize];
            let signature = signatures.chunk_signatures[&part].clone();
            self.dispatch_chunk(
                chunk,
                signature,
                ctx,
                Some(self.policy.delay(attempt)),
                events_tx.clone(),
            );
        }
        Ok(())
    }

    /// Fetches the store's part listing and compares it against local
    /// expectation: every planned part must appear with the locally
    /// recorded ETag and a size of exactly `end - start`.
    async fn verify_parts(
        &self,
        plan: &[Chunk],
        ctx: &Arc<UploadContext>,
        list_signature: &Signature,
    ) -> Result<Verdict, Abort> {
        let response = self
            .phase(
                || {
                    protocol::list_parts_request(
                        &self.config,
                        &ctx.key,
                        &ctx.upload_id,
                        list_signature,
                    )
                },
                MSG_VERIFY,
            )
            .await?;
        let remote = shape(protocol::parse_list_parts(&response.body))?;

        let remote_by_number: HashMap<u32, &RemotePart> =
            remote.iter().map(|p| (p.part_number, p)).collect();
        let local_etags = self.session.etags();

        let mut resubmit = Vec::new();
        if remote.len() != plan.len() {
            // The store is missing chunks (or reports extras): re-send every
            // planned part it does not list.
            for chunk in plan {
                if !remote_by_number.contains_key(&chunk.number) {
                    resubmit.push(chunk.number);
                }
            }
        } else {
            for chunk in plan {
                match remote_by_number.get(&chunk.number) {
                    Some(part) => {
                        let etag_ok =
                            local_etags.get(&chunk.number) == Some(&part.etag);
                        if !etag_ok || part.size != chunk.len() {
                            resubmit.push(chunk.number);
                        }
                    }
                    None => resubmit.push(chunk.number),
                }
            }
            for part in &remote {
                if !plan.iter().any(|c| c.number == part.part_number) {
                    warn!(part = part.part_number, "store listed an unplanned part");
                }
            }
        }

        if resubmit.is_empty() {
            debug!(parts = plan.len(), "part listing verified");
            Ok(Verdict::Consistent)
        } else {
            info!(parts = ?resubmit, "part listing mismatch, re-uploading");
            Ok(Verdict::Resubmit(resubmit))
        }
    }

    /// Sends the completion request assembling the object, returning its
    /// location.
    async fn complete_upload(
        &self,
        ctx: &Arc<UploadContext>,
        complete_signature: &Signature,
    ) -> Result<String, Abort> {
        let etags = self.session.etags();
        let request = shape(protocol::complete_request(
            &self.config,
            &ctx.key,
            &ctx.file_name,
            &ctx.content_type,
            &ctx.upload_id,
            &etags,
            complete_signature,
        ))?;
        let response = self.phase(|| request.clone(), MSG_COMPLETE).await?;
        shape(protocol::parse_complete(&response.body))
    }

    /// Sends one request under the retry policy: non-2xx statuses and
    /// transport failures are retried with linear backoff and a fresh
    /// request from `build`; exhaustion aborts with `exhausted_message`.
    async fn phase(
        &self,
        mut build: impl FnMut() -> HttpRequest,
        exhausted_message: &str,
    ) -> Result<HttpResponse, Abort> {
        let mut attempts = 0u32;
        loop {
            if self.cancel.is_cancelled() {
                return Err(Abort::Cancelled);
            }
            let request = build();
            let sent = tokio::select! {
                _ = self.cancel.cancelled() => return Err(Abort::Cancelled),
                sent = self.transport.send(request, None) => sent,
            };
            let failure = match sent {
                Ok(response) if response.is_success() => return Ok(response),
                Ok(response) => TransportError::Status(response.status),
                Err(e) => e,
            };

            if !self.policy.retry_available(attempts, self.session.status()) {
                return Err(Abort::Failed(exhausted_message.to_string()));
            }
            attempts += 1;
            warn!(attempt = attempts, error = %failure, "retrying request");
            self.notify.on_retry(attempts);
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(Abort::Cancelled),
                _ = tokio::time::sleep(self.policy.delay(attempts)) => {}
            }
        }
    }

    /// Applies the failure transition and notifies, unless a terminal state
    /// (e.g. a racing cancel) already won.
    fn fail(&self, message: &str) {
        if self.session.transition(UploadStatus::Failed) {
            error!(message, "upload failed");
            self.notify.on_error(message);
        }
    }
}

/// One chunk PUT attempt, run as its own task.
struct ChunkJob {
    chunk: Chunk,
    signature: Signature,
    config: Arc<UploadConfig>,
    ctx: Arc<UploadContext>,
    source: Arc<dyn FileSource>,
    transport: Arc<dyn Transport>,
    cancel: CancellationToken,
    events: mpsc::Sender<ChunkEvent>,
    delay: Option<Duration>,
}

impl ChunkJob {
    async fn run(self) {
        if let Some(delay) = self.delay {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let part = self.chunk.number;
        match self.send_part().await {
            Ok(etag) => {
                let _ = self.events.send(ChunkEvent::Done(part, etag)).await;
            }
            // Cancellation is reported once by cancel_upload, not per chunk.
            Err(UploadError::Cancelled) => {}
            Err(error) => {
                let _ = self.events.send(ChunkEvent::Failed(part, error)).await;
            }
        }
    }

    async fn send_part(&self) -> Result<String, UploadError> {
        let body = self
            .source
            .read_range(self.chunk.start, self.chunk.end)
            .await?;

        let progress_tx = self.events.clone();
        let part = self.chunk.number;
        // Lossy by design: a dropped progress update is corrected by the
        // next one, and Done records the final figure.
        let progress: ProgressFn = Arc::new(move |sent| {
            let _ = progress_tx.try_send(ChunkEvent::Progress(part, sent));
        });

        let request = protocol::upload_part_request(
            &self.config,
            &self.ctx.key,
            &self.ctx.file_name,
            &self.ctx.content_type,
            &self.ctx.upload_id,
            &self.chunk,
            &self.signature,
            body,
        );

        let response = tokio::select! {
            _ = self.cancel.cancelled() => return Err(UploadError::Cancelled),
            sent = self.transport.send(request, Some(progress)) => sent?,
        };
        if !response.is_success() {
            return Err(UploadError::Transport(TransportError::Status(
                response.status,
            )));
        }
        protocol::extract_etag(&response)
    }
}
