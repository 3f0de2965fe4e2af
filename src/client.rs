use crate::config::Config;
use crate::contacts::ContactList;
use crate::error::{ClientError, Result};
use crate::events::{EventKind, HandlerRegistry};
use crate::login::LoginState;
use crate::message::Message;
use crate::profile::Profile;
use crate::qrcode::{StdoutTokenDisplay, TokenDisplay};
use crate::session::SessionStore;
use crate::transport::Transport;
use log::{info, warn};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// A long-running web-protocol client: one login handshake, one background
/// sync loop, one shared contact directory.
///
/// The session store is deliberately lock-light: the login path is its only
/// writer before the loop starts, the loop task owns the cursor while
/// running, and `logout` resets it only once the loop has stopped. That
/// ordering is a correctness precondition enforced by this type's methods,
/// not by the store.
pub struct Client {
    pub(crate) config: Config,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) token_display: Arc<dyn TokenDisplay>,
    pub(crate) session: RwLock<SessionStore>,
    pub contacts: ContactList,
    pub profile: Profile,
    pub(crate) handlers: HandlerRegistry,

    pub(crate) is_logged_in: AtomicBool,
    pub(crate) is_alive: AtomicBool,
    /// Exactly-once latch for the logout call of the current session.
    pub(crate) logged_out: AtomicBool,
    pub(crate) shutdown_notifier: Notify,
    /// Consecutive failed sync iterations, for observability only.
    pub(crate) sync_failures: AtomicU32,
    /// Where the current (or last) login attempt stands.
    pub(crate) login_state: RwLock<LoginState>,
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Whether the login handshake has completed for the current session.
    pub fn is_logged_in(&self) -> bool {
        self.is_logged_in.load(Ordering::SeqCst)
    }

    /// Whether the sync loop is (or should be) running.
    pub fn is_alive(&self) -> bool {
        self.is_alive.load(Ordering::SeqCst)
    }

    pub fn sync_failure_count(&self) -> u32 {
        self.sync_failures.load(Ordering::SeqCst)
    }

    pub fn login_state(&self) -> LoginState {
        *self.login_state.read().expect("login state poisoned")
    }

    pub(crate) fn set_login_state(&self, state: LoginState) {
        *self.login_state.write().expect("login state poisoned") = state;
    }

    /// Registers a message handler for the given event tag.
    pub fn on<F, Fut>(&self, kind: EventKind, handler: F)
    where
        F: Fn(Arc<Message>, Arc<Client>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.handlers.register(
            kind,
            Arc::new(move |message, client| Box::pin(handler(message, client))),
        );
    }

    /// Starts the background sync loop and returns its task handle. The
    /// login handshake must have completed first.
    pub fn run(self: &Arc<Self>) -> Result<JoinHandle<()>> {
        if !self.is_logged_in() {
            return Err(ClientError::NotLoggedIn);
        }
        if self
            .is_alive
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ClientError::AlreadyRunning);
        }
        let client = self.clone();
        Ok(tokio::spawn(async move {
            client.sync_loop().await;
        }))
    }

    /// Requests loop shutdown. The loop exits within one sleep interval and
    /// performs its single logout call on the way out.
    pub fn stop(&self) {
        self.is_alive.store(false, Ordering::SeqCst);
        self.shutdown_notifier.notify_waiters();
    }

    /// Ends the session: one best-effort logout call against the backend,
    /// then an atomic reset of all local session state. Safe to call from
    /// both the loop's exit path and an interrupt path; only the first
    /// caller performs the work.
    pub async fn logout(&self) -> Result<()> {
        if self
            .logged_out
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }
        self.is_alive.store(false, Ordering::SeqCst);

        let target = self.session_read(|s| {
            match (s.hosts(), s.credentials()) {
                (Some(hosts), Some(creds)) => Some((hosts.index.clone(), creds.skey.clone())),
                _ => None,
            }
        });
        if let Some((index_url, skey)) = target {
            let url = format!("{index_url}/webwxlogout");
            let params = [
                ("redirect", "1".to_string()),
                ("type", "1".to_string()),
                ("skey", skey),
            ];
            if let Err(e) = self
                .transport
                .get(&url, &params, self.config.request_timeout)
                .await
            {
                warn!(target: "Client/Logout", "Logout call failed, resetting locally anyway: {e:#}");
            }
        }

        let nickname = self.profile.nickname();
        self.session_write(|s| s.reset());
        self.profile.clear();
        self.is_logged_in.store(false, Ordering::SeqCst);
        info!(target: "Client/Logout", "User [{nickname}] logged out");
        Ok(())
    }

    pub(crate) fn session_read<R>(&self, f: impl FnOnce(&SessionStore) -> R) -> R {
        f(&self.session.read().expect("session store poisoned"))
    }

    pub(crate) fn session_write<R>(&self, f: impl FnOnce(&mut SessionStore) -> R) -> R {
        f(&mut self.session.write().expect("session store poisoned"))
    }

    /// Base URL for the given role, available only post-login.
    pub(crate) fn index_url(&self) -> Result<String> {
        self.session_read(|s| s.hosts().map(|h| h.index.clone()))
            .ok_or(ClientError::NotLoggedIn)
    }

    pub(crate) fn push_url(&self) -> Result<String> {
        self.session_read(|s| s.hosts().map(|h| h.push.clone()))
            .ok_or(ClientError::NotLoggedIn)
    }

    /// The `{"BaseRequest": {...}}` body fragment required on every
    /// authenticated call.
    pub(crate) fn base_request_body(&self) -> Result<serde_json::Value> {
        self.session_read(|s| s.base_request().cloned())
            .map(|base| serde_json::json!({ "BaseRequest": base }))
            .ok_or(ClientError::NotLoggedIn)
    }

    /// 13-digit millisecond timestamp, as the provider expects.
    pub(crate) fn timestamp() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("logged_in", &self.is_logged_in())
            .field("alive", &self.is_alive())
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
pub struct ClientBuilder {
    config: Option<Config>,
    transport: Option<Arc<dyn Transport>>,
    token_display: Option<Arc<dyn TokenDisplay>>,
}

impl ClientBuilder {
    fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_token_display(mut self, display: Arc<dyn TokenDisplay>) -> Self {
        self.token_display = Some(display);
        self
    }

    pub fn build(self) -> Result<Arc<Client>> {
        let transport = self
            .transport
            .ok_or_else(|| ClientError::Init("a transport is required".to_string()))?;
        Ok(Arc::new(Client {
            config: self.config.unwrap_or_default(),
            transport,
            token_display: self
                .token_display
                .unwrap_or_else(|| Arc::new(StdoutTokenDisplay)),
            session: RwLock::new(SessionStore::new()),
            contacts: ContactList::new(),
            profile: Profile::new(),
            handlers: HandlerRegistry::new(),
            is_logged_in: AtomicBool::new(false),
            is_alive: AtomicBool::new(false),
            logged_out: AtomicBool::new(false),
            shutdown_notifier: Notify::new(),
            sync_failures: AtomicU32::new(0),
            login_state: RwLock::new(LoginState::Pending),
        }))
    }
}
