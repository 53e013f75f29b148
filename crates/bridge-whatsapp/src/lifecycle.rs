//! Session lifecycle manager
//!
//! Single owner of the WhatsApp Web session state. Provider events arrive
//! through an mpsc queue and each maps to one state transition:
//!
//! | State          | qr                 | ready         | disconnected   | reset/logout   |
//! |----------------|--------------------|---------------|----------------|----------------|
//! | NotInitialized | AwaitingScan       | Authenticated | no-op          | no-op          |
//! | AwaitingScan   | attempt + 1        | Authenticated | Disconnected   | NotInitialized |
//! | Authenticated  | AwaitingScan (warn)| stay          | Disconnected   | NotInitialized |
//! | Disconnected   | AwaitingScan       | Authenticated | stay           | NotInitialized |
//!
//! Once the QR attempt threshold is reached a deferred check resets the
//! session if nobody scanned within the grace window. The check belongs
//! to one authentication cycle and does nothing once that cycle is over.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bridge_core::{Disposition, InboundMessage, MessageRouter, ReplySink, SessionConfig};
use bridge_ws::{Notifier, Observer, ObserverHooks, ServerEvent};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::auth_flag::AuthFlag;
use crate::error::Result;
use crate::provider::{ProviderEvent, SessionProvider};
use crate::qr;
use crate::single_flight::SingleFlight;

pub const QR_EXPIRED_MESSAGE: &str =
    "QR code expired. Please refresh the page to get a new QR code.";
pub const PREVIOUS_AUTH_EXPIRED_MESSAGE: &str =
    "Previous authentication expired. Redirecting to login page...";
pub const AUTH_FAILED_MESSAGE: &str = "Authentication failed. Redirecting to login page...";
pub const LOGOUT_MESSAGE: &str = "Logged out successfully. Redirecting to login page...";
pub const FORCED_LOGOUT_MESSAGE: &str = "Logged out locally, but the WhatsApp session could not be closed cleanly. Redirecting to login page...";
pub const RESET_MESSAGE: &str =
    "WhatsApp session has been reset. Please refresh the page to scan a new QR code.";

/// Authentication policy knobs
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub max_qr_attempts: u32,
    pub auth_grace: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            max_qr_attempts: 3,
            auth_grace: Duration::from_secs(30),
        }
    }
}

impl From<&SessionConfig> for LifecycleConfig {
    fn from(config: &SessionConfig) -> Self {
        Self {
            max_qr_attempts: config.max_qr_attempts,
            auth_grace: config.auth_grace(),
        }
    }
}

/// Authentication state of the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    NotInitialized,
    AwaitingScan {
        /// Rendered QR image; `None` when the last payload could not be rendered
        qr_image: Option<String>,
        attempt: u32,
    },
    Authenticated,
    Disconnected,
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::NotInitialized => "not_initialized",
            SessionState::AwaitingScan { .. } => "awaiting_scan",
            SessionState::Authenticated => "authenticated",
            SessionState::Disconnected => "disconnected",
        }
    }
}

/// Outcome of a best-effort cleanup; sub-errors are collected, never raised
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    pub errors: Vec<String>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    /// Provider initialize was called and succeeded
    Started,
    /// Already initialized or in progress
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutOutcome {
    Clean,
    /// Local state was cleared but the provider did not shut down cleanly
    Forced,
}

impl LogoutOutcome {
    pub fn message(&self) -> &'static str {
        match self {
            LogoutOutcome::Clean => LOGOUT_MESSAGE,
            LogoutOutcome::Forced => FORCED_LOGOUT_MESSAGE,
        }
    }

    pub fn is_forced(&self) -> bool {
        matches!(self, LogoutOutcome::Forced)
    }
}

/// Read-only view for the status endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleStatus {
    pub state: String,
    pub qr_attempts: u32,
    pub initialized: bool,
    pub authenticated: bool,
}

struct Inner {
    state: SessionState,
    qr_attempts: u32,
    /// Bumped whenever an authentication cycle ends (ready or reset)
    auth_cycle: u64,
    timers: Vec<JoinHandle<()>>,
}

/// Replies through the live session provider
struct ProviderReplySink {
    provider: Arc<dyn SessionProvider>,
}

#[async_trait]
impl ReplySink for ProviderReplySink {
    async fn send_reply(&self, message: &InboundMessage, text: &str) -> bridge_core::Result<()> {
        self.provider
            .reply(&message.from, &message.message_id, text)
            .await?;
        Ok(())
    }
}

pub struct SessionLifecycle {
    provider: Arc<dyn SessionProvider>,
    notifier: Notifier,
    auth_flag: AuthFlag,
    router: Arc<MessageRouter>,
    reply_sink: ProviderReplySink,
    config: LifecycleConfig,
    init: SingleFlight,
    inner: Mutex<Inner>,
}

impl SessionLifecycle {
    pub fn new(
        provider: Arc<dyn SessionProvider>,
        notifier: Notifier,
        auth_flag: AuthFlag,
        router: Arc<MessageRouter>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            reply_sink: ProviderReplySink {
                provider: provider.clone(),
            },
            provider,
            notifier,
            auth_flag,
            router,
            config,
            init: SingleFlight::new(),
            inner: Mutex::new(Inner {
                state: SessionState::NotInitialized,
                qr_attempts: 0,
                auth_cycle: 0,
                timers: Vec::new(),
            }),
        }
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> SessionState {
        self.inner().state.clone()
    }

    pub fn qr_attempts(&self) -> u32 {
        self.inner().qr_attempts
    }

    /// Most recent QR image, if a scan is pending
    pub fn current_qr(&self) -> Option<String> {
        match &self.inner().state {
            SessionState::AwaitingScan { qr_image, .. } => qr_image.clone(),
            _ => None,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.init.is_set()
    }

    /// True only after `ready` while the provider still has a browser, a page and account info
    pub async fn is_authenticated(&self) -> bool {
        let ready = self.inner().state == SessionState::Authenticated;
        ready && self.provider_authenticated().await
    }

    async fn provider_authenticated(&self) -> bool {
        match self.provider.status().await {
            Ok(status) => status.is_authenticated(),
            Err(e) => {
                debug!("Provider status unavailable: {}", e);
                false
            }
        }
    }

    pub fn check_previous_auth(&self) -> bool {
        self.auth_flag.exists()
    }

    pub async fn status(&self) -> LifecycleStatus {
        let (state, qr_attempts) = {
            let inner = self.inner();
            (inner.state.name().to_string(), inner.qr_attempts)
        };
        LifecycleStatus {
            state,
            qr_attempts,
            initialized: self.is_initialized(),
            authenticated: self.is_authenticated().await,
        }
    }

    pub fn on_qr(self: &Arc<Self>, raw: &str) {
        let image = qr::render_data_url(raw);

        let (attempt, cycle) = {
            let mut inner = self.inner();
            if inner.state == SessionState::Authenticated {
                warn!("QR code received while authenticated, the session was lost");
            }
            inner.qr_attempts += 1;
            let attempt = inner.qr_attempts;
            inner.state = SessionState::AwaitingScan {
                qr_image: image.as_ref().ok().cloned(),
                attempt,
            };
            (attempt, inner.auth_cycle)
        };

        info!(
            "QR received (attempt {}/{}), scan with WhatsApp mobile app",
            attempt, self.config.max_qr_attempts
        );

        match image {
            Ok(image) => {
                let count = self.notifier.broadcast(ServerEvent::Qr(image));
                debug!("QR code emitted to {} observers", count);
            }
            Err(e) => error!("Error generating QR code: {}", e),
        }

        if attempt >= self.config.max_qr_attempts {
            info!(
                "Maximum QR code attempts reached, resetting in {:?} unless authenticated",
                self.config.auth_grace
            );
            let this = Arc::clone(self);
            let grace = self.config.auth_grace;
            let handle = tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                this.expire_qr_cycle(cycle).await;
            });

            let mut inner = self.inner();
            inner.timers.retain(|t| !t.is_finished());
            inner.timers.push(handle);
        }
    }

    async fn expire_qr_cycle(&self, cycle: u64) {
        let current = self.inner().auth_cycle;
        if current != cycle {
            debug!("QR timer for finished cycle {} ignored", cycle);
            return;
        }

        // The ready event may still be queued behind this timer
        if self.provider_authenticated().await {
            debug!("Client authenticated before QR timeout");
            return;
        }

        // Claim the cycle so sibling timers become no-ops
        {
            let mut inner = self.inner();
            if inner.auth_cycle != cycle {
                return;
            }
            inner.auth_cycle += 1;
        }

        info!("Client still not authenticated after max QR attempts, resetting session");
        self.reset_session().await;
        self.notifier
            .broadcast(ServerEvent::auth_failed(QR_EXPIRED_MESSAGE));
    }

    pub fn on_ready(&self) {
        let timers = {
            let mut inner = self.inner();
            inner.state = SessionState::Authenticated;
            inner.qr_attempts = 0;
            inner.auth_cycle += 1;
            std::mem::take(&mut inner.timers)
        };
        for timer in timers {
            timer.abort();
        }

        info!("WhatsApp Web client is ready");

        match self.auth_flag.set() {
            Ok(()) => debug!("Authentication success flag saved"),
            Err(e) => error!("Error saving authentication success flag: {}", e),
        }

        self.notifier.broadcast(ServerEvent::ready());
    }

    pub fn on_disconnected(&self, reason: Option<&str>) {
        {
            let mut inner = self.inner();
            if inner.state == SessionState::NotInitialized {
                debug!("Disconnect before initialization ignored");
                return;
            }
            inner.state = SessionState::Disconnected;
        }

        warn!(
            "WhatsApp Web client disconnected: {}",
            reason.unwrap_or("no reason given")
        );

        self.init.release();

        match self.auth_flag.clear() {
            Ok(true) => info!("Removed authentication flag due to disconnection"),
            Ok(false) => {}
            Err(e) => error!("Error removing authentication flag: {}", e),
        }

        self.notifier.broadcast(ServerEvent::Disconnected);
    }

    /// Clear local state and tear down the provider; every step always runs
    pub async fn reset_session(&self) -> CleanupReport {
        info!("Resetting WhatsApp session...");

        {
            let mut inner = self.inner();
            inner.state = SessionState::NotInitialized;
            inner.qr_attempts = 0;
            inner.auth_cycle += 1;
        }
        self.init.release();

        let mut report = CleanupReport::default();

        if let Err(e) = self.provider.destroy().await {
            warn!("Error destroying client during reset, continuing: {}", e);
            report.errors.push(format!("destroy: {}", e));
        }

        match self.auth_flag.clear() {
            Ok(true) => info!("Removed authentication flag during reset"),
            Ok(false) => {}
            Err(e) => {
                error!("Error removing authentication flag during reset: {}", e);
                report.errors.push(format!("auth flag: {}", e));
            }
        }

        info!("WhatsApp session reset complete");
        report
    }

    /// Log out of the account and reset; never fails from the caller's view
    pub async fn logout(&self) -> LogoutOutcome {
        info!("Logout requested");

        let mut forced = false;
        match self.provider.status().await {
            Ok(status) if status.can_logout() => match self.provider.logout().await {
                Ok(()) => info!("WhatsApp logout successful"),
                Err(e) => {
                    warn!("Error logging out, continuing with cleanup: {}", e);
                    forced = true;
                }
            },
            Ok(_) => info!("Client not in a valid state for logout, skipping logout call"),
            Err(e) => {
                warn!("Could not query client before logout: {}", e);
                forced = true;
            }
        }

        let report = self.reset_session().await;
        if !report.is_clean() {
            forced = true;
        }

        let outcome = if forced {
            LogoutOutcome::Forced
        } else {
            LogoutOutcome::Clean
        };

        self.notifier.broadcast(ServerEvent::Disconnected);
        self.notifier
            .broadcast(ServerEvent::auth_redirect(outcome.message()));

        outcome
    }

    /// Start the provider unless initialization is already outstanding
    pub async fn initialize_if_needed(&self) -> Result<InitOutcome> {
        let Some(guard) = self.init.try_acquire() else {
            debug!("Client already initialized, skipping initialization");
            return Ok(InitOutcome::Skipped);
        };

        info!("Initializing WhatsApp client...");

        match self.provider.initialize().await {
            Ok(()) => {
                if !guard.commit() {
                    debug!("Session was reset while initializing, initialization not retained");
                }
                Ok(InitOutcome::Started)
            }
            Err(e) => {
                error!("Error initializing WhatsApp client: {}", e);
                Err(e)
            }
        }
    }

    pub async fn route_message(&self, message: &InboundMessage) -> Disposition {
        self.router.route(message, &self.reply_sink).await
    }

    /// Apply one provider event
    pub async fn handle_event(self: &Arc<Self>, event: ProviderEvent) {
        match event {
            ProviderEvent::Qr(raw) => self.on_qr(&raw),
            ProviderEvent::Ready => self.on_ready(),
            ProviderEvent::Disconnected(reason) => self.on_disconnected(reason.as_deref()),
            ProviderEvent::Message(message) => {
                self.route_message(&message).await;
            }
        }
    }

    /// Consume the provider event queue until every sender is gone
    pub async fn run(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<ProviderEvent>) {
        info!("Session lifecycle event loop started");

        while let Some(event) = events.recv().await {
            match event {
                // Messages are independent; one slow webhook must not stall the queue
                ProviderEvent::Message(message) => {
                    let this = Arc::clone(&self);
                    tokio::spawn(async move {
                        this.route_message(&message).await;
                    });
                }
                other => self.handle_event(other).await,
            }
        }

        info!("Session lifecycle event loop stopped");
    }
}

fn notify(observer: &Observer, event: ServerEvent) {
    if let Err(e) = observer.send(event) {
        debug!("{}", e);
    }
}

#[async_trait]
impl ObserverHooks for SessionLifecycle {
    async fn on_connect(&self, observer: &Observer) {
        if self.is_authenticated().await {
            info!("Client already authenticated, sending ready event");
            notify(observer, ServerEvent::ready());
            return;
        }

        if let Some(image) = self.current_qr() {
            info!("Sending existing QR code to observer {}", observer.id);
            notify(observer, ServerEvent::Qr(image));
            return;
        }

        if self.init.is_set() {
            info!("Client initialization already in progress, waiting for QR code or authentication");
            return;
        }

        if self.check_previous_auth() {
            info!("Found previous authentication, attempting to reuse it");
            if let Err(e) = self.initialize_if_needed().await {
                error!("Error initializing client with previous auth: {}", e);
                if let Err(e) = self.auth_flag.clear() {
                    error!("Error removing auth flag: {}", e);
                }
                self.reset_session().await;
                notify(
                    observer,
                    ServerEvent::auth_redirect(PREVIOUS_AUTH_EXPIRED_MESSAGE),
                );
            }
        } else {
            info!("No previous authentication, starting new authentication");
            if let Err(e) = self.initialize_if_needed().await {
                error!("Error initializing client during connection: {}", e);
                self.reset_session().await;
                notify(observer, ServerEvent::auth_redirect(AUTH_FAILED_MESSAGE));
            }
        }
    }

    async fn on_request_qr(&self, observer: &Observer) {
        if let Some(image) = self.current_qr() {
            notify(observer, ServerEvent::Qr(image));
            return;
        }

        if self.init.is_in_flight() {
            info!("Client initialization in progress, QR code will follow");
            return;
        }

        info!("No QR code available, attempting to reinitialize WhatsApp client");

        if self.init.is_committed() {
            let browser_up = self
                .provider
                .status()
                .await
                .map(|s| s.browser)
                .unwrap_or(false);
            if !browser_up {
                info!("Client was marked as initialized but browser is not available, resetting state");
                self.init.release();
            }
        }

        if let Err(e) = self.initialize_if_needed().await {
            error!("Error reinitializing WhatsApp client: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WhatsAppError;
    use crate::provider::{AccountInfo, ProviderStatus};
    use bridge_core::{ForwardPayload, Forwarder, Settings, SettingsStore, WebhookResponse};
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::broadcast;

    #[derive(Default)]
    struct MockProvider {
        status: Mutex<ProviderStatus>,
        init_calls: AtomicUsize,
        destroy_calls: AtomicUsize,
        logout_calls: AtomicUsize,
        fail_init: AtomicBool,
        fail_destroy: AtomicBool,
        fail_logout: AtomicBool,
        init_delay: Option<Duration>,
        replies: Mutex<Vec<(String, String, String)>>,
    }

    impl MockProvider {
        fn authenticate(&self) {
            *self.status.lock().unwrap() = ProviderStatus {
                browser: true,
                page: true,
                account: Some(AccountInfo::default()),
            };
        }

        fn browser_only(&self) {
            *self.status.lock().unwrap() = ProviderStatus {
                browser: true,
                page: true,
                account: None,
            };
        }
    }

    #[async_trait]
    impl SessionProvider for MockProvider {
        async fn initialize(&self) -> Result<()> {
            self.init_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.init_delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_init.load(Ordering::SeqCst) {
                return Err(WhatsAppError::Session("browser failed to launch".into()));
            }
            Ok(())
        }

        async fn destroy(&self) -> Result<()> {
            self.destroy_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_destroy.load(Ordering::SeqCst) {
                return Err(WhatsAppError::Session("target closed".into()));
            }
            *self.status.lock().unwrap() = ProviderStatus::default();
            Ok(())
        }

        async fn logout(&self) -> Result<()> {
            self.logout_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_logout.load(Ordering::SeqCst) {
                return Err(WhatsAppError::Session("logout timed out".into()));
            }
            Ok(())
        }

        async fn reply(&self, chat_id: &str, message_id: &str, text: &str) -> Result<()> {
            self.replies.lock().unwrap().push((
                chat_id.to_string(),
                message_id.to_string(),
                text.to_string(),
            ));
            Ok(())
        }

        async fn status(&self) -> Result<ProviderStatus> {
            Ok(self.status.lock().unwrap().clone())
        }
    }

    struct EchoForwarder;

    #[async_trait]
    impl Forwarder for EchoForwarder {
        async fn trigger(&self, _payload: &ForwardPayload) -> bridge_core::Result<WebhookResponse> {
            Ok(WebhookResponse(json!({"reply": "hello back"})))
        }
    }

    struct Harness {
        lifecycle: Arc<SessionLifecycle>,
        provider: Arc<MockProvider>,
        events: broadcast::Receiver<ServerEvent>,
        flag: AuthFlag,
        _dir: tempfile::TempDir,
    }

    fn harness(provider: MockProvider) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let settings = Arc::new(SettingsStore::open_with_defaults(
            dir.path().join("settings.json"),
            || Settings::defaults_from(|_| None),
        ));
        let router = Arc::new(MessageRouter::new(settings, Arc::new(EchoForwarder)));
        let provider = Arc::new(provider);
        let notifier = Notifier::new();
        let events = notifier.subscribe();
        let flag = AuthFlag::new(dir.path().join("session"));

        let lifecycle = Arc::new(SessionLifecycle::new(
            provider.clone(),
            notifier,
            flag.clone(),
            router,
            LifecycleConfig::default(),
        ));

        Harness {
            lifecycle,
            provider,
            events,
            flag,
            _dir: dir,
        }
    }

    fn drain(rx: &mut broadcast::Receiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn observer() -> (Observer, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Observer::new("test-observer", tx), rx)
    }

    #[tokio::test]
    async fn test_qr_increments_attempts_and_broadcasts() {
        let mut h = harness(MockProvider::default());

        h.lifecycle.on_qr("payload-1");
        h.lifecycle.on_qr("payload-2");

        assert_eq!(h.lifecycle.qr_attempts(), 2);
        match h.lifecycle.state() {
            SessionState::AwaitingScan { qr_image, attempt } => {
                assert_eq!(attempt, 2);
                assert!(qr_image.unwrap().starts_with("data:image/svg+xml;base64,"));
            }
            other => panic!("unexpected state: {:?}", other),
        }

        let events = drain(&mut h.events);
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| matches!(e, ServerEvent::Qr(_))));
    }

    #[tokio::test]
    async fn test_unrenderable_qr_counts_without_broadcast() {
        let mut h = harness(MockProvider::default());

        h.lifecycle.on_qr("");

        assert_eq!(h.lifecycle.qr_attempts(), 1);
        assert!(h.lifecycle.current_qr().is_none());
        assert!(drain(&mut h.events).is_empty());
    }

    #[tokio::test]
    async fn test_ready_resets_attempts_and_sets_flag() {
        let mut h = harness(MockProvider::default());

        h.lifecycle.on_qr("payload");
        h.lifecycle.on_ready();

        assert_eq!(h.lifecycle.qr_attempts(), 0);
        assert_eq!(h.lifecycle.state(), SessionState::Authenticated);
        assert!(h.lifecycle.current_qr().is_none());
        assert!(h.flag.exists());
        assert!(h.lifecycle.check_previous_auth());
        assert_eq!(drain(&mut h.events).last(), Some(&ServerEvent::ready()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_qr_threshold_resets_once_after_grace() {
        let mut h = harness(MockProvider::default());

        for i in 0..4 {
            h.lifecycle.on_qr(&format!("payload-{}", i));
        }
        drain(&mut h.events);

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert_eq!(h.provider.destroy_calls.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(h.provider.destroy_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.lifecycle.qr_attempts(), 0);
        assert_eq!(h.lifecycle.state(), SessionState::NotInitialized);

        let events = drain(&mut h.events);
        assert_eq!(
            events,
            vec![ServerEvent::auth_failed(QR_EXPIRED_MESSAGE)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_cancels_qr_timer() {
        let h = harness(MockProvider::default());

        for i in 0..3 {
            h.lifecycle.on_qr(&format!("payload-{}", i));
        }
        h.lifecycle.on_ready();

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(h.provider.destroy_calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.lifecycle.state(), SessionState::Authenticated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_qr_timer_skips_authenticated_provider() {
        let h = harness(MockProvider::default());

        for i in 0..3 {
            h.lifecycle.on_qr(&format!("payload-{}", i));
        }
        h.provider.authenticate();

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(h.provider.destroy_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_disconnected_transitions() {
        let mut h = harness(MockProvider::default());

        h.lifecycle.on_disconnected(None);
        assert_eq!(h.lifecycle.state(), SessionState::NotInitialized);
        assert!(drain(&mut h.events).is_empty());

        h.lifecycle.on_ready();
        h.lifecycle.initialize_if_needed().await.unwrap();
        assert!(h.lifecycle.is_initialized());
        drain(&mut h.events);

        h.lifecycle.on_disconnected(Some("NAVIGATION"));
        assert_eq!(h.lifecycle.state(), SessionState::Disconnected);
        assert!(!h.flag.exists());
        assert!(!h.lifecycle.is_initialized());
        assert_eq!(drain(&mut h.events), vec![ServerEvent::Disconnected]);

        h.lifecycle.on_qr("payload");
        assert!(matches!(
            h.lifecycle.state(),
            SessionState::AwaitingScan { attempt: 1, .. }
        ));
    }

    #[tokio::test]
    async fn test_qr_while_authenticated_awaits_scan() {
        let h = harness(MockProvider::default());
        h.lifecycle.on_ready();
        h.lifecycle.on_qr("payload");
        assert_eq!(h.lifecycle.state().name(), "awaiting_scan");
    }

    #[tokio::test]
    async fn test_reset_session_survives_destroy_failure() {
        let provider = MockProvider::default();
        provider.fail_destroy.store(true, Ordering::SeqCst);
        provider.authenticate();
        let h = harness(provider);

        h.lifecycle.on_ready();
        assert!(h.lifecycle.is_authenticated().await);

        let report = h.lifecycle.reset_session().await;

        assert!(!report.is_clean());
        // The provider still reports a live account, the lifecycle does not
        assert!(h.provider.status().await.unwrap().is_authenticated());
        assert!(!h.lifecycle.is_authenticated().await);
        assert!(!h.lifecycle.status().await.authenticated);
        assert!(!h.flag.exists());
        assert_eq!(h.lifecycle.state(), SessionState::NotInitialized);

        // Idempotent
        h.lifecycle.reset_session().await;
        assert_eq!(h.lifecycle.state(), SessionState::NotInitialized);
    }

    #[tokio::test]
    async fn test_logout_clean() {
        let provider = MockProvider::default();
        provider.authenticate();
        let mut h = harness(provider);
        h.flag.set().unwrap();

        let outcome = h.lifecycle.logout().await;

        assert_eq!(outcome, LogoutOutcome::Clean);
        assert_eq!(h.provider.logout_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.provider.destroy_calls.load(Ordering::SeqCst), 1);
        assert!(!h.flag.exists());
        assert_eq!(
            drain(&mut h.events),
            vec![
                ServerEvent::Disconnected,
                ServerEvent::auth_redirect(LOGOUT_MESSAGE)
            ]
        );
    }

    #[tokio::test]
    async fn test_logout_forced_when_provider_fails() {
        let provider = MockProvider::default();
        provider.authenticate();
        provider.fail_logout.store(true, Ordering::SeqCst);
        let mut h = harness(provider);

        let outcome = h.lifecycle.logout().await;

        assert!(outcome.is_forced());
        assert_eq!(h.lifecycle.state(), SessionState::NotInitialized);
        assert_eq!(
            drain(&mut h.events).last(),
            Some(&ServerEvent::auth_redirect(FORCED_LOGOUT_MESSAGE))
        );
    }

    #[tokio::test]
    async fn test_logout_skips_provider_without_browser() {
        let h = harness(MockProvider::default());

        let outcome = h.lifecycle.logout().await;

        assert_eq!(outcome, LogoutOutcome::Clean);
        assert_eq!(h.provider.logout_calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.provider.destroy_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_is_single_flight() {
        let h = harness(MockProvider {
            init_delay: Some(Duration::from_secs(1)),
            ..Default::default()
        });

        let (first, second) = tokio::join!(
            h.lifecycle.initialize_if_needed(),
            h.lifecycle.initialize_if_needed()
        );

        assert_eq!(first.unwrap(), InitOutcome::Started);
        assert_eq!(second.unwrap(), InitOutcome::Skipped);
        assert_eq!(h.provider.init_calls.load(Ordering::SeqCst), 1);

        assert_eq!(
            h.lifecycle.initialize_if_needed().await.unwrap(),
            InitOutcome::Skipped
        );
    }

    #[tokio::test]
    async fn test_initialize_failure_clears_guard() {
        let provider = MockProvider::default();
        provider.fail_init.store(true, Ordering::SeqCst);
        let h = harness(provider);

        assert!(h.lifecycle.initialize_if_needed().await.is_err());
        assert!(!h.lifecycle.is_initialized());

        assert!(h.lifecycle.initialize_if_needed().await.is_err());
        assert_eq!(h.provider.init_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_connect_when_authenticated_sends_ready() {
        let provider = MockProvider::default();
        provider.authenticate();
        let h = harness(provider);
        h.lifecycle.on_ready();
        let (obs, mut rx) = observer();

        h.lifecycle.on_connect(&obs).await;

        assert_eq!(rx.recv().await.unwrap(), ServerEvent::ready());
        assert_eq!(h.provider.init_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_connect_after_failed_destroy_does_not_send_ready() {
        let provider = MockProvider::default();
        provider.authenticate();
        provider.fail_destroy.store(true, Ordering::SeqCst);
        let h = harness(provider);
        h.lifecycle.on_ready();
        h.lifecycle.reset_session().await;
        let (obs, mut rx) = observer();

        h.lifecycle.on_connect(&obs).await;

        assert!(rx.try_recv().is_err());
        assert_eq!(h.provider.init_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_qr_while_initializing_keeps_single_call() {
        let h = harness(MockProvider {
            init_delay: Some(Duration::from_secs(5)),
            ..Default::default()
        });
        let first = {
            let lifecycle = h.lifecycle.clone();
            tokio::spawn(async move { lifecycle.initialize_if_needed().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let (obs, _rx) = observer();

        h.lifecycle.on_request_qr(&obs).await;

        assert_eq!(first.await.unwrap().unwrap(), InitOutcome::Started);
        assert_eq!(h.provider.init_calls.load(Ordering::SeqCst), 1);
        assert!(h.lifecycle.is_initialized());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_while_initializing_keeps_single_call() {
        let h = harness(MockProvider {
            init_delay: Some(Duration::from_secs(5)),
            ..Default::default()
        });
        let first = {
            let lifecycle = h.lifecycle.clone();
            tokio::spawn(async move { lifecycle.initialize_if_needed().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        h.lifecycle.reset_session().await;
        assert_eq!(
            h.lifecycle.initialize_if_needed().await.unwrap(),
            InitOutcome::Skipped
        );
        assert_eq!(h.provider.init_calls.load(Ordering::SeqCst), 1);

        // The reset wins once the outstanding call finishes
        assert_eq!(first.await.unwrap().unwrap(), InitOutcome::Started);
        assert!(!h.lifecycle.is_initialized());
        assert_eq!(
            h.lifecycle.initialize_if_needed().await.unwrap(),
            InitOutcome::Started
        );
        assert_eq!(h.provider.init_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_connect_with_pending_qr_sends_it() {
        let h = harness(MockProvider::default());
        h.lifecycle.on_qr("payload");
        let (obs, mut rx) = observer();

        h.lifecycle.on_connect(&obs).await;

        let expected = h.lifecycle.current_qr().unwrap();
        assert_eq!(rx.recv().await.unwrap(), ServerEvent::Qr(expected));
    }

    #[tokio::test]
    async fn test_connect_with_expired_previous_auth() {
        let provider = MockProvider::default();
        provider.fail_init.store(true, Ordering::SeqCst);
        let h = harness(provider);
        h.flag.set().unwrap();
        let (obs, mut rx) = observer();

        h.lifecycle.on_connect(&obs).await;

        assert!(!h.flag.exists());
        assert_eq!(h.provider.destroy_calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            rx.recv().await.unwrap(),
            ServerEvent::auth_redirect(PREVIOUS_AUTH_EXPIRED_MESSAGE)
        );
    }

    #[tokio::test]
    async fn test_connect_fresh_init_failure_redirects() {
        let provider = MockProvider::default();
        provider.fail_init.store(true, Ordering::SeqCst);
        let h = harness(provider);
        let (obs, mut rx) = observer();

        h.lifecycle.on_connect(&obs).await;

        assert_eq!(
            rx.recv().await.unwrap(),
            ServerEvent::auth_redirect(AUTH_FAILED_MESSAGE)
        );
    }

    #[tokio::test]
    async fn test_connect_fresh_starts_session() {
        let h = harness(MockProvider::default());
        let (obs, mut rx) = observer();

        h.lifecycle.on_connect(&obs).await;
        h.lifecycle.on_connect(&obs).await;

        assert_eq!(h.provider.init_calls.load(Ordering::SeqCst), 1);
        assert!(h.lifecycle.is_initialized());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_request_qr_recovers_stale_init_flag() {
        let h = harness(MockProvider::default());
        h.lifecycle.initialize_if_needed().await.unwrap();
        let (obs, _rx) = observer();

        // No browser reported: the stale flag is cleared and init runs again
        h.lifecycle.on_request_qr(&obs).await;
        assert_eq!(h.provider.init_calls.load(Ordering::SeqCst), 2);

        // Browser up: the flag is kept
        h.provider.browser_only();
        h.lifecycle.on_request_qr(&obs).await;
        assert_eq!(h.provider.init_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_message_event_replies_through_provider() {
        let h = harness(MockProvider::default());

        h.lifecycle
            .handle_event(ProviderEvent::Message(InboundMessage::text(
                "m1", "111", "hi",
            )))
            .await;

        assert_eq!(
            h.provider.replies.lock().unwrap().clone(),
            vec![(
                "111".to_string(),
                "m1".to_string(),
                "hello back".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn test_run_consumes_queue() {
        let mut h = harness(MockProvider::default());
        let (tx, rx) = mpsc::unbounded_channel();

        tx.send(ProviderEvent::Qr("payload".to_string())).unwrap();
        tx.send(ProviderEvent::Ready).unwrap();
        drop(tx);

        h.lifecycle.clone().run(rx).await;

        assert_eq!(h.lifecycle.state(), SessionState::Authenticated);
        let events = drain(&mut h.events);
        assert_eq!(events.len(), 2);
        assert_eq!(events[1], ServerEvent::ready());
    }
}
