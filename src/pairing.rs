//! Sender pairing: drives one sender from "token known" to "live session".
//!
//! Two activities may run per attempt: the QR refresh loop and a fixed
//! interval status poll. Both mutate the shared session only through
//! [`Shared::update`], which drops anything tagged with an older generation.
//! Starting a new attempt or tearing down bumps the generation and cancels
//! the poll, so nothing from a previous attempt can touch the new one.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::api::models::{ConnectOptions, ConnectReply, Contact, QrReply, SessionFailure, StatusReply};
use crate::error::ApiResult;

/// The session endpoints the controller consumes. Every call is keyed by the
/// sender token; a blank token yields `Ok(None)`.
pub trait SessionBackend: Send + Sync + 'static {
    fn status(&self, token: &str) -> impl Future<Output = ApiResult<Option<StatusReply>>> + Send;

    fn connect(
        &self,
        token: &str,
        options: &ConnectOptions,
    ) -> impl Future<Output = ApiResult<Option<ConnectReply>>> + Send;

    fn qr(&self, token: &str) -> impl Future<Output = ApiResult<Option<QrReply>>> + Send;

    fn contacts(&self, token: &str) -> impl Future<Output = ApiResult<Option<Vec<Contact>>>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PairingStatus {
    /// Cleared; no attempt running.
    #[default]
    Idle,
    NotConnected,
    ShowQr,
    NotScanned,
    Connected,
    Timeout,
    CouldNotConnect,
    BadAuthentication,
}

impl PairingStatus {
    /// Terminal statuses are only left by starting a new attempt.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PairingStatus::Connected
                | PairingStatus::Timeout
                | PairingStatus::CouldNotConnect
                | PairingStatus::BadAuthentication
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            PairingStatus::Idle => "",
            PairingStatus::NotConnected => "Not connected",
            PairingStatus::ShowQr => "Preparing QR code…",
            PairingStatus::NotScanned => "Scan the QR code with your phone",
            PairingStatus::Connected => "Connected",
            PairingStatus::Timeout => "QR code expired, refresh to try again",
            PairingStatus::CouldNotConnect => "Could not connect",
            PairingStatus::BadAuthentication => "Bad authentication",
        }
    }
}

impl fmt::Display for PairingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PairingTiming {
    pub poll_interval: Duration,
    /// How long a displayed code stays up before the next one is requested.
    pub qr_refresh: Duration,
    /// Back-off after the backend answers with an empty (not yet ready) code.
    pub qr_retry: Duration,
}

impl Default for PairingTiming {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            qr_refresh: Duration::from_secs(15),
            qr_retry: Duration::from_secs(1),
        }
    }
}

/// What the hosting view renders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PairingSnapshot {
    pub status: PairingStatus,
    pub qrcode: String,
    pub scanned: bool,
    pub contacts: Vec<Contact>,
}

/// Cancellation handle of the background status poll.
pub struct PollHandle {
    cancelled: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl PollHandle {
    /// Safe to call any number of times. Returns true only for the call that
    /// actually cancelled the poll.
    pub fn cancel(&self) -> bool {
        let first = !self.cancelled.swap(true, Ordering::SeqCst);
        self.task.abort();
        first
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[derive(Default)]
struct Inner {
    generation: u64,
    token: String,
    snapshot: PairingSnapshot,
    poll: Option<PollHandle>,
    contacts_requested: bool,
    transitions: Vec<PairingStatus>,
}

impl Inner {
    fn transition(&mut self, next: PairingStatus) -> bool {
        let current = self.snapshot.status;
        if current == next {
            return false;
        }
        if current.is_terminal() {
            debug!("Ignoring {next:?}: attempt already ended in {current:?}");
            return false;
        }
        debug!("Pairing status {current:?} -> {next:?}");
        self.snapshot.status = next;
        self.transitions.push(next);
        true
    }

    fn cancel_poll(&mut self) {
        if let Some(poll) = self.poll.take() {
            if poll.cancel() {
                debug!("Status poll cancelled");
            }
        }
    }

    fn reset(&mut self) {
        self.generation += 1;
        self.cancel_poll();
        self.token.clear();
        self.snapshot = PairingSnapshot::default();
        self.contacts_requested = false;
        self.transitions.clear();
    }
}

struct Shared<B> {
    backend: Arc<B>,
    timing: PairingTiming,
    inner: Mutex<Inner>,
    tx: watch::Sender<PairingSnapshot>,
}

impl<B: SessionBackend> Shared<B> {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Applies `f` if `generation` is still the live attempt, publishes the
    /// new snapshot and fires the contacts fetch on the first entry into
    /// `Connected`. Returns `None` for stale generations.
    fn update<R>(self: &Arc<Self>, generation: u64, f: impl FnOnce(&mut Inner) -> R) -> Option<R> {
        let mut inner = self.lock();
        if inner.generation != generation {
            debug!("Dropping result of stale pairing attempt {generation}");
            return None;
        }
        let out = f(&mut inner);
        let fetch_contacts =
            inner.snapshot.status == PairingStatus::Connected && !inner.contacts_requested;
        if fetch_contacts {
            inner.contacts_requested = true;
        }
        let snapshot = inner.snapshot.clone();
        let token = inner.token.clone();
        drop(inner);

        self.tx.send_replace(snapshot);
        if fetch_contacts {
            self.spawn_contacts(generation, token);
        }
        Some(out)
    }

    fn set_status(self: &Arc<Self>, generation: u64, status: PairingStatus) {
        self.update(generation, |inner| inner.transition(status));
    }

    fn token_for(&self, generation: u64) -> Option<String> {
        let inner = self.lock();
        (inner.generation == generation).then(|| inner.token.clone())
    }

    async fn connect(&self, token: &str) -> Option<ConnectReply> {
        match self.backend.connect(token, &ConnectOptions::default()).await {
            Ok(reply) => reply,
            Err(e) => {
                error!("Connect request failed: {e}");
                None
            }
        }
    }

    async fn initialize(self: Arc<Self>, generation: u64) {
        let Some(token) = self.token_for(generation) else { return };
        if token.trim().is_empty() {
            self.set_status(generation, PairingStatus::NotConnected);
            return;
        }

        match self.backend.status(&token).await {
            Ok(None) => self.set_status(generation, PairingStatus::NotConnected),
            Ok(Some(StatusReply::Session(session))) if !session.logged_in => {
                if session.connected {
                    self.spawn_qr_loop(generation);
                } else {
                    self.set_status(generation, PairingStatus::NotConnected);
                    self.connect(&token).await;
                    self.set_status(generation, PairingStatus::Connected);
                }
            }
            Ok(Some(StatusReply::Session(session))) => {
                self.update(generation, |inner| {
                    inner.snapshot.scanned = true;
                    inner.transition(PairingStatus::Connected);
                });
                if !session.connected {
                    info!("Session logged in but transport is down, reconnecting");
                    self.connect(&token).await;
                }
            }
            Ok(Some(StatusReply::Failed(SessionFailure::NoSession))) => {
                self.set_status(generation, PairingStatus::NotConnected);
                match self.connect(&token).await {
                    Some(reply) if reply.success => self.spawn_qr_loop(generation),
                    _ => self.set_status(generation, PairingStatus::CouldNotConnect),
                }
            }
            Ok(Some(StatusReply::Failed(SessionFailure::Unauthorized))) => {
                self.set_status(generation, PairingStatus::BadAuthentication);
            }
            Err(e) if e.is_unauthorized() => {
                self.set_status(generation, PairingStatus::BadAuthentication);
            }
            // Anything unrecognized is reported as bad authentication. This is
            // a catch-all, not a diagnosis; the warning keeps the real cause.
            Ok(Some(StatusReply::Failed(SessionFailure::Other(reason)))) => {
                warn!("Unrecognized status error {reason:?}, reporting bad authentication");
                self.set_status(generation, PairingStatus::BadAuthentication);
            }
            Err(e) => {
                warn!("Status query failed ({e}), reporting bad authentication");
                self.set_status(generation, PairingStatus::BadAuthentication);
            }
        }
    }

    fn spawn_qr_loop(self: &Arc<Self>, generation: u64) {
        let shared = self.clone();
        tokio::spawn(async move { shared.qr_loop(generation).await });
    }

    async fn qr_loop(self: Arc<Self>, generation: u64) {
        if self
            .update(generation, |inner| inner.transition(PairingStatus::ShowQr))
            .is_none()
        {
            return;
        }
        self.start_poll(generation);

        loop {
            let next = self.update(generation, |inner| {
                if inner.snapshot.scanned {
                    return None;
                }
                inner.transition(PairingStatus::NotScanned);
                Some(inner.token.clone())
            });
            let Some(Some(token)) = next else { break };

            let pause = match self.backend.qr(&token).await {
                Ok(Some(QrReply::Code(code))) if code.is_empty() => {
                    debug!("QR code not ready yet");
                    self.timing.qr_retry
                }
                Ok(Some(QrReply::Code(code))) => {
                    let shown = self.update(generation, |inner| {
                        if !inner.snapshot.scanned {
                            inner.snapshot.qrcode = code;
                        }
                    });
                    if shown.is_none() {
                        break;
                    }
                    self.timing.qr_refresh
                }
                Ok(Some(QrReply::Failed(reason))) => {
                    info!("QR refresh gave up: {reason:?}");
                    self.update(generation, |inner| {
                        if !inner.snapshot.scanned {
                            inner.snapshot.scanned = true;
                            inner.cancel_poll();
                            inner.transition(PairingStatus::Timeout);
                        }
                    });
                    break;
                }
                other => {
                    if let Err(e) = other {
                        error!("QR request failed: {e}");
                    }
                    self.update(generation, |inner| {
                        if !inner.snapshot.scanned {
                            inner.cancel_poll();
                            inner.transition(PairingStatus::NotConnected);
                        }
                    });
                    break;
                }
            };
            tokio::time::sleep(pause).await;
        }
        debug!("QR loop of attempt {generation} finished");
    }

    fn start_poll(self: &Arc<Self>, generation: u64) {
        let cancelled = Arc::new(AtomicBool::new(false));
        let shared = self.clone();
        let flag = cancelled.clone();
        let task = tokio::spawn(async move { shared.poll_loop(generation, flag).await });
        let handle = PollHandle { cancelled, task };

        let mut inner = self.lock();
        if inner.generation != generation {
            handle.cancel();
            return;
        }
        if let Some(previous) = inner.poll.replace(handle) {
            previous.cancel();
        }
    }

    async fn poll_loop(self: Arc<Self>, generation: u64, cancelled: Arc<AtomicBool>) {
        loop {
            tokio::time::sleep(self.timing.poll_interval).await;
            if cancelled.load(Ordering::SeqCst) {
                break;
            }
            let Some(token) = self.token_for(generation) else { break };
            let reply = self.backend.status(&token).await;

            match reply {
                Ok(Some(StatusReply::Session(session))) if session.logged_in => {
                    self.update(generation, |inner| {
                        if cancelled.load(Ordering::SeqCst) {
                            return;
                        }
                        inner.snapshot.scanned = true;
                        inner.transition(PairingStatus::Connected);
                        inner.cancel_poll();
                    });
                    break;
                }
                Ok(Some(StatusReply::Failed(reason))) => {
                    debug!("Status poll stopped: {reason:?}");
                    self.update(generation, |inner| {
                        if !cancelled.load(Ordering::SeqCst) {
                            inner.cancel_poll();
                        }
                    });
                    break;
                }
                Ok(_) => {}
                Err(e) => debug!("Status poll tick failed: {e}"),
            }
        }
    }

    fn spawn_contacts(self: &Arc<Self>, generation: u64, token: String) {
        let shared = self.clone();
        tokio::spawn(async move {
            match shared.backend.contacts(&token).await {
                Ok(Some(contacts)) => {
                    info!("Loaded {} contacts", contacts.len());
                    shared.update(generation, |inner| inner.snapshot.contacts = contacts);
                }
                Ok(None) => debug!("No contacts returned"),
                Err(e) => error!("Failed to load contacts: {e}"),
            }
        });
    }
}

/// Owns the pairing lifecycle of the sender shown by one detail view.
pub struct PairingController<B> {
    shared: Arc<Shared<B>>,
}

impl<B> Clone for PairingController<B> {
    fn clone(&self) -> Self {
        Self { shared: self.shared.clone() }
    }
}

impl<B: SessionBackend> PairingController<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self::with_timing(backend, PairingTiming::default())
    }

    pub fn with_timing(backend: Arc<B>, timing: PairingTiming) -> Self {
        let (tx, _rx) = watch::channel(PairingSnapshot::default());
        Self {
            shared: Arc::new(Shared {
                backend,
                timing,
                inner: Mutex::new(Inner::default()),
                tx,
            }),
        }
    }

    /// Resets the controller for a new attempt on `token` and returns the
    /// attempt's generation. Whatever the previous attempt left running is
    /// cancelled before this returns; nothing is sent to the backend yet.
    pub fn begin(&self, token: &str) -> u64 {
        let generation = {
            let mut inner = self.shared.lock();
            inner.reset();
            inner.token = token.to_string();
            inner.generation
        };
        self.shared.tx.send_replace(PairingSnapshot::default());
        info!("Starting pairing attempt {generation}");
        generation
    }

    /// Runs the initial status query of attempt `generation`. A no-op once a
    /// later `begin` or `teardown` has superseded it.
    pub fn run(&self, generation: u64) -> impl Future<Output = ()> + Send + use<B> {
        self.shared.clone().initialize(generation)
    }

    /// Begins an attempt right away and returns the future that drives its
    /// initial status query; the QR loop and poll keep running in the
    /// background. A `teardown` issued before the future is polled wins.
    pub fn start(&self, token: &str) -> impl Future<Output = ()> + Send + use<B> {
        let generation = self.begin(token);
        self.run(generation)
    }

    /// Stops the poll, invalidates any in-flight QR iteration and clears the
    /// displayed state.
    pub fn teardown(&self) {
        let generation = {
            let mut inner = self.shared.lock();
            inner.reset();
            inner.generation
        };
        self.shared.tx.send_replace(PairingSnapshot::default());
        debug!("Pairing torn down, next generation {generation}");
    }

    pub fn subscribe(&self) -> watch::Receiver<PairingSnapshot> {
        self.shared.tx.subscribe()
    }

    pub fn snapshot(&self) -> PairingSnapshot {
        self.shared.lock().snapshot.clone()
    }

    pub fn status(&self) -> PairingStatus {
        self.shared.lock().snapshot.status
    }

    /// Statuses entered by the current attempt, in order.
    pub fn transitions(&self) -> Vec<PairingStatus> {
        self.shared.lock().transitions.clone()
    }

    pub fn is_polling(&self) -> bool {
        self.shared
            .lock()
            .poll
            .as_ref()
            .is_some_and(|poll| !poll.is_cancelled())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::SessionStatus;
    use crate::error::ApiError;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    const WAITING: StatusReply = StatusReply::Session(SessionStatus { connected: true, logged_in: false });
    const LOGGED_IN: StatusReply = StatusReply::Session(SessionStatus { connected: true, logged_in: true });

    /// Scripted backend. Status replies are served from the queue first, then
    /// `fallback`; `Err(code)` entries become HTTP errors.
    struct FakeBackend {
        statuses: Mutex<VecDeque<Result<StatusReply, u16>>>,
        fallback: Mutex<StatusReply>,
        connect_ok: AtomicBool,
        qr_replies: Mutex<VecDeque<Result<Option<QrReply>, u16>>>,
        seen_tokens: Mutex<Vec<String>>,
        contacts: Vec<Contact>,
        status_calls: AtomicUsize,
        connect_calls: AtomicUsize,
        qr_calls: AtomicUsize,
        contacts_calls: AtomicUsize,
    }

    impl FakeBackend {
        fn new(first: Result<StatusReply, u16>) -> Self {
            Self {
                statuses: Mutex::new(VecDeque::from([first])),
                fallback: Mutex::new(WAITING),
                connect_ok: AtomicBool::new(true),
                qr_replies: Mutex::new(VecDeque::new()),
                seen_tokens: Mutex::new(Vec::new()),
                contacts: vec![Contact {
                    jid: "628111@s.whatsapp.net".into(),
                    found: true,
                    push_name: "ani".into(),
                    ..Default::default()
                }],
                status_calls: AtomicUsize::new(0),
                connect_calls: AtomicUsize::new(0),
                qr_calls: AtomicUsize::new(0),
                contacts_calls: AtomicUsize::new(0),
            }
        }

        fn with_qr(self, replies: impl IntoIterator<Item = QrReply>) -> Self {
            self.with_qr_outcomes(replies.into_iter().map(|reply| Ok(Some(reply))))
        }

        /// `Ok(None)` is an answer without data, `Err(code)` an HTTP error.
        fn with_qr_outcomes(self, outcomes: impl IntoIterator<Item = Result<Option<QrReply>, u16>>) -> Self {
            self.qr_replies.lock().unwrap().extend(outcomes);
            self
        }

        fn seen_tokens(&self) -> Vec<String> {
            self.seen_tokens.lock().unwrap().clone()
        }

        fn set_fallback(&self, reply: StatusReply) {
            *self.fallback.lock().unwrap() = reply;
        }

        fn count(counter: &AtomicUsize) -> usize {
            counter.load(Ordering::SeqCst)
        }
    }

    impl SessionBackend for FakeBackend {
        async fn status(&self, token: &str) -> ApiResult<Option<StatusReply>> {
            self.status_calls.fetch_add(1, Ordering::SeqCst);
            self.seen_tokens.lock().unwrap().push(token.to_string());
            let next = self.statuses.lock().unwrap().pop_front();
            match next {
                Some(Ok(reply)) => Ok(Some(reply)),
                Some(Err(401)) => Err(ApiError::Unauthorized),
                Some(Err(code)) => Err(ApiError::Http {
                    status: code,
                    title: "Oops".into(),
                    message: "scripted".into(),
                }),
                None => Ok(Some(self.fallback.lock().unwrap().clone())),
            }
        }

        async fn connect(&self, _token: &str, options: &ConnectOptions) -> ApiResult<Option<ConnectReply>> {
            assert_eq!(options.events, "All");
            assert!(options.immediate);
            self.connect_calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some(ConnectReply {
                success: self.connect_ok.load(Ordering::SeqCst),
                ..Default::default()
            }))
        }

        async fn qr(&self, token: &str) -> ApiResult<Option<QrReply>> {
            let n = self.qr_calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.seen_tokens.lock().unwrap().push(token.to_string());
            let next = self.qr_replies.lock().unwrap().pop_front();
            match next {
                Some(Ok(reply)) => Ok(reply),
                Some(Err(code)) => Err(ApiError::Http {
                    status: code,
                    title: "Oops".into(),
                    message: "scripted".into(),
                }),
                None => Ok(Some(QrReply::Code(format!("qr-{n}")))),
            }
        }

        async fn contacts(&self, _token: &str) -> ApiResult<Option<Vec<Contact>>> {
            self.contacts_calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some(self.contacts.clone()))
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    fn controller(backend: &Arc<FakeBackend>) -> PairingController<FakeBackend> {
        PairingController::new(backend.clone())
    }

    #[tokio::test(start_paused = true)]
    async fn missing_session_connects_then_shows_qr() {
        let backend = Arc::new(FakeBackend::new(Ok(StatusReply::Failed(SessionFailure::NoSession))));
        let pairing = controller(&backend);

        pairing.start("token").await;
        settle().await;

        assert_eq!(
            pairing.transitions(),
            vec![PairingStatus::NotConnected, PairingStatus::ShowQr, PairingStatus::NotScanned]
        );
        assert_eq!(FakeBackend::count(&backend.connect_calls), 1);
        assert_eq!(FakeBackend::count(&backend.qr_calls), 1);
        assert_eq!(pairing.snapshot().qrcode, "qr-1");
        assert!(pairing.is_polling());
        pairing.teardown();
    }

    #[tokio::test(start_paused = true)]
    async fn logged_in_session_is_connected_without_qr() {
        let backend = Arc::new(FakeBackend::new(Ok(LOGGED_IN)));
        let pairing = controller(&backend);

        pairing.start("token").await;
        settle().await;

        let snapshot = pairing.snapshot();
        assert_eq!(snapshot.status, PairingStatus::Connected);
        assert!(snapshot.scanned);
        assert_eq!(pairing.transitions(), vec![PairingStatus::Connected]);
        assert_eq!(FakeBackend::count(&backend.qr_calls), 0);
        assert_eq!(FakeBackend::count(&backend.connect_calls), 0);
        assert!(!pairing.is_polling());
    }

    #[tokio::test(start_paused = true)]
    async fn logged_in_without_transport_reconnects_and_stays_connected() {
        let backend = Arc::new(FakeBackend::new(Ok(StatusReply::Session(SessionStatus {
            connected: false,
            logged_in: true,
        }))));
        let pairing = controller(&backend);

        pairing.start("token").await;
        settle().await;

        assert_eq!(pairing.status(), PairingStatus::Connected);
        assert_eq!(FakeBackend::count(&backend.connect_calls), 1);
        assert_eq!(FakeBackend::count(&backend.contacts_calls), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnected_session_connects_then_reports_connected() {
        let backend = Arc::new(FakeBackend::new(Ok(StatusReply::Session(SessionStatus {
            connected: false,
            logged_in: false,
        }))));
        let pairing = controller(&backend);

        pairing.start("token").await;
        settle().await;

        assert_eq!(
            pairing.transitions(),
            vec![PairingStatus::NotConnected, PairingStatus::Connected]
        );
        assert_eq!(FakeBackend::count(&backend.connect_calls), 1);
        assert_eq!(FakeBackend::count(&backend.qr_calls), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn qr_failure_times_out_and_stops_everything() {
        let backend = Arc::new(
            FakeBackend::new(Ok(WAITING)).with_qr([QrReply::Failed("timeout".into())]),
        );
        let pairing = controller(&backend);

        pairing.start("token").await;
        settle().await;

        let snapshot = pairing.snapshot();
        assert_eq!(snapshot.status, PairingStatus::Timeout);
        assert!(snapshot.scanned);
        assert!(!pairing.is_polling());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(FakeBackend::count(&backend.qr_calls), 1);
        assert_eq!(FakeBackend::count(&backend.status_calls), 1);
        assert_eq!(pairing.status(), PairingStatus::Timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_confirms_scan_between_qr_iterations() {
        let backend = Arc::new(FakeBackend::new(Ok(WAITING)));
        let pairing = controller(&backend);

        pairing.start("token").await;
        settle().await;
        assert_eq!(pairing.status(), PairingStatus::NotScanned);
        assert_eq!(pairing.snapshot().qrcode, "qr-1");

        backend.set_fallback(LOGGED_IN);
        tokio::time::sleep(Duration::from_secs(2)).await;

        let snapshot = pairing.snapshot();
        assert_eq!(snapshot.status, PairingStatus::Connected);
        assert!(snapshot.scanned);
        assert!(!pairing.is_polling());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(FakeBackend::count(&backend.qr_calls), 1);
        assert_eq!(pairing.status(), PairingStatus::Connected);
        assert_eq!(FakeBackend::count(&backend.contacts_calls), 1);
        assert_eq!(pairing.snapshot().contacts.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn qr_codes_rotate_every_refresh_window() {
        let backend = Arc::new(FakeBackend::new(Ok(WAITING)));
        let pairing = controller(&backend);

        pairing.start("token").await;
        settle().await;
        assert_eq!(pairing.snapshot().qrcode, "qr-1");

        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(FakeBackend::count(&backend.qr_calls), 2);
        assert_eq!(pairing.snapshot().qrcode, "qr-2");
        assert_eq!(pairing.status(), PairingStatus::NotScanned);
        pairing.teardown();
    }

    #[tokio::test(start_paused = true)]
    async fn empty_qr_is_retried_without_confirming_scan() {
        let backend = Arc::new(
            FakeBackend::new(Ok(WAITING)).with_qr([QrReply::Code(String::new()), QrReply::Code(String::new())]),
        );
        let pairing = controller(&backend);

        pairing.start("token").await;
        settle().await;
        assert_eq!(FakeBackend::count(&backend.qr_calls), 1);
        assert!(!pairing.snapshot().scanned);
        assert!(pairing.snapshot().qrcode.is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(FakeBackend::count(&backend.qr_calls), 3);
        let snapshot = pairing.snapshot();
        assert!(!snapshot.scanned);
        assert_eq!(snapshot.status, PairingStatus::NotScanned);
        assert_eq!(snapshot.qrcode, "qr-3");
        pairing.teardown();
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_silences_poll_and_qr_loop() {
        let backend = Arc::new(FakeBackend::new(Ok(WAITING)));
        let pairing = controller(&backend);

        pairing.start("token").await;
        settle().await;
        assert!(pairing.is_polling());

        pairing.teardown();
        assert!(!pairing.is_polling());
        assert_eq!(pairing.snapshot(), PairingSnapshot::default());

        backend.set_fallback(LOGGED_IN);
        tokio::time::sleep(Duration::from_secs(40)).await;

        assert_eq!(pairing.snapshot(), PairingSnapshot::default());
        assert_eq!(FakeBackend::count(&backend.status_calls), 1);
        assert_eq!(FakeBackend::count(&backend.qr_calls), 1);
        assert_eq!(FakeBackend::count(&backend.contacts_calls), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn restarting_keeps_a_single_poll() {
        let backend = Arc::new(FakeBackend::new(Ok(WAITING)));
        backend.statuses.lock().unwrap().push_back(Ok(WAITING));
        let pairing = controller(&backend);

        pairing.start("token").await;
        settle().await;
        pairing.start("token").await;
        settle().await;
        assert_eq!(FakeBackend::count(&backend.status_calls), 2);

        tokio::time::sleep(Duration::from_millis(3500)).await;
        // Two initial queries plus three ticks of the surviving poll.
        assert_eq!(FakeBackend::count(&backend.status_calls), 5);
        assert_eq!(pairing.transitions(), vec![PairingStatus::ShowQr, PairingStatus::NotScanned]);
        pairing.teardown();
    }

    #[tokio::test(start_paused = true)]
    async fn failed_connect_after_missing_session() {
        let backend = Arc::new(FakeBackend::new(Ok(StatusReply::Failed(SessionFailure::NoSession))));
        backend.connect_ok.store(false, Ordering::SeqCst);
        let pairing = controller(&backend);

        pairing.start("token").await;
        settle().await;

        assert_eq!(pairing.status(), PairingStatus::CouldNotConnect);
        assert_eq!(FakeBackend::count(&backend.qr_calls), 0);
        assert!(!pairing.is_polling());
    }

    #[tokio::test(start_paused = true)]
    async fn authorization_and_unknown_failures_report_bad_authentication() {
        for first in [
            Ok(StatusReply::Failed(SessionFailure::Unauthorized)),
            Err(401),
            Ok(StatusReply::Failed(SessionFailure::Other("client not found".into()))),
            Err(500),
        ] {
            let backend = Arc::new(FakeBackend::new(first));
            let pairing = controller(&backend);
            pairing.start("token").await;
            settle().await;
            assert_eq!(pairing.status(), PairingStatus::BadAuthentication);
            assert_eq!(FakeBackend::count(&backend.connect_calls), 0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn blank_token_never_reaches_backend() {
        let backend = Arc::new(FakeBackend::new(Ok(LOGGED_IN)));
        let pairing = controller(&backend);

        pairing.start("").await;

        assert_eq!(pairing.status(), PairingStatus::NotConnected);
        assert_eq!(FakeBackend::count(&backend.status_calls), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_failure_stops_poll_without_changing_status() {
        let backend = Arc::new(FakeBackend::new(Ok(WAITING)));
        let pairing = controller(&backend);

        pairing.start("token").await;
        settle().await;
        backend.set_fallback(StatusReply::Failed(SessionFailure::Other("client not found".into())));
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert!(!pairing.is_polling());
        assert_eq!(FakeBackend::count(&backend.status_calls), 2);
        assert_eq!(pairing.status(), PairingStatus::NotScanned);
        pairing.teardown();
    }

    #[tokio::test(start_paused = true)]
    async fn subscribers_see_connected_snapshot() {
        let backend = Arc::new(FakeBackend::new(Ok(LOGGED_IN)));
        let pairing = controller(&backend);
        let mut rx = pairing.subscribe();

        pairing.start("token").await;
        settle().await;

        assert!(rx.has_changed().unwrap());
        let seen = rx.borrow_and_update().clone();
        assert_eq!(seen.status, PairingStatus::Connected);
        assert_eq!(seen.contacts.len(), 1);
        // Reading the snapshot again must not refetch contacts.
        let _ = pairing.snapshot();
        let _ = pairing.snapshot();
        assert_eq!(FakeBackend::count(&backend.contacts_calls), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_qr_data_or_request_error_disconnects() {
        for outcome in [Ok(None), Err(503)] {
            let backend = Arc::new(FakeBackend::new(Ok(WAITING)).with_qr_outcomes([outcome]));
            let pairing = controller(&backend);

            pairing.start("token").await;
            settle().await;

            let snapshot = pairing.snapshot();
            assert_eq!(snapshot.status, PairingStatus::NotConnected);
            assert!(!snapshot.scanned);
            assert!(!pairing.is_polling());
            assert_eq!(
                pairing.transitions(),
                vec![PairingStatus::ShowQr, PairingStatus::NotScanned, PairingStatus::NotConnected]
            );

            tokio::time::sleep(Duration::from_secs(30)).await;
            assert_eq!(FakeBackend::count(&backend.qr_calls), 1);
            assert_eq!(FakeBackend::count(&backend.status_calls), 1);
            assert_eq!(pairing.status(), PairingStatus::NotConnected);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_before_attempt_runs_cancels_it() {
        let backend = Arc::new(FakeBackend::new(Ok(WAITING)));
        let pairing = controller(&backend);

        let attempt = pairing.start("token");
        pairing.teardown();
        attempt.await;
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(pairing.snapshot(), PairingSnapshot::default());
        assert!(!pairing.is_polling());
        assert_eq!(FakeBackend::count(&backend.status_calls), 0);
        assert_eq!(FakeBackend::count(&backend.qr_calls), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn latest_attempt_wins_when_earlier_one_runs_last() {
        let backend = Arc::new(FakeBackend::new(Ok(WAITING)));
        let pairing = controller(&backend);

        let first = pairing.start("sender-a");
        let second = pairing.start("sender-b");
        second.await;
        first.await;
        settle().await;

        let seen = backend.seen_tokens();
        assert!(!seen.is_empty());
        assert!(seen.iter().all(|token| token == "sender-b"), "{seen:?}");
        assert_eq!(pairing.status(), PairingStatus::NotScanned);
        assert!(pairing.is_polling());

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(backend.seen_tokens().iter().all(|token| token == "sender-b"));
        // One initial query plus two ticks of a single poll.
        assert_eq!(FakeBackend::count(&backend.status_calls), 3);
        pairing.teardown();
    }

    #[tokio::test]
    async fn poll_handle_cancel_is_idempotent() {
        let handle = PollHandle {
            cancelled: Arc::new(AtomicBool::new(false)),
            task: tokio::spawn(std::future::pending::<()>()),
        };
        assert!(handle.cancel());
        assert!(!handle.cancel());
        assert!(handle.is_cancelled());
    }

    #[test]
    fn terminal_status_is_never_left() {
        let mut inner = Inner::default();
        assert!(inner.transition(PairingStatus::NotScanned));
        assert!(inner.transition(PairingStatus::Connected));
        assert!(!inner.transition(PairingStatus::NotScanned));
        assert!(!inner.transition(PairingStatus::Timeout));
        assert_eq!(inner.snapshot.status, PairingStatus::Connected);
        assert_eq!(inner.transitions, vec![PairingStatus::NotScanned, PairingStatus::Connected]);
    }
}
