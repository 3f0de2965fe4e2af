use crate::client::Client;
use crate::error::{ClientError, Result};
use crate::events::EventKind;
use crate::login::check_base_response;
use crate::message::Message;
use crate::session::SyncKey;
use log::{debug, error, info, warn};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio::time::sleep;

/// Why the sync loop stopped. None of these are errors; they are the normal
/// terminal conditions of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Push-check answered cleanly but with no selector at all.
    NullSelector,
    /// The account logged out from the phone (retcode 1100).
    RemoteLogout,
    /// Logged out or logged in elsewhere (retcode 1101/1102).
    LoginElsewhere,
    /// Local `stop` request.
    Cancelled,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::NullSelector => "push-check returned no selector",
            Self::RemoteLogout => "account logged out from the phone",
            Self::LoginElsewhere => "account logged out or logged in elsewhere",
            Self::Cancelled => "cancelled by local stop request",
        };
        f.write_str(text)
    }
}

/// What one push-check result means for the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SyncAction {
    /// Nothing new; sleep and poll again.
    Continue,
    /// New data available; fetch messages before the next poll.
    Fetch,
    /// Unrecognized retcode. The loop keeps running.
    Transient,
    Stop(StopReason),
}

/// The `(retcode, selector)` classification table. Pure so the branches the
/// loop must never get wrong are testable in isolation.
pub(crate) fn classify(retcode: &str, selector: Option<&str>) -> SyncAction {
    match retcode {
        "0" => match selector {
            None => SyncAction::Stop(StopReason::NullSelector),
            Some("0") => SyncAction::Continue,
            Some(_) => SyncAction::Fetch,
        },
        "1100" => SyncAction::Stop(StopReason::RemoteLogout),
        "1101" | "1102" => SyncAction::Stop(StopReason::LoginElsewhere),
        _ => SyncAction::Transient,
    }
}

/// Parsed push-check status object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SyncCheckStatus {
    pub retcode: String,
    pub selector: Option<String>,
}

impl Client {
    /// The background sync loop. Runs until a terminal classification or
    /// cancellation, then performs the session's single logout call. A
    /// failed iteration is logged and tolerated; it never ends the loop.
    pub(crate) async fn sync_loop(self: Arc<Self>) {
        info!(target: "Client/Sync", "Sync loop started");

        while self.is_alive() {
            let outcome = tokio::select! {
                result = self.sync_iteration() => Some(result),
                _ = self.shutdown_notifier.notified() => None,
            };

            match outcome {
                None => {
                    info!(target: "Client/Sync", "Stopping: {}", StopReason::Cancelled);
                    break;
                }
                Some(Ok(Some(reason))) => {
                    info!(target: "Client/Sync", "Stopping: {reason}");
                    self.is_alive.store(false, Ordering::SeqCst);
                    break;
                }
                Some(Ok(None)) => {
                    if self.sync_failures.swap(0, Ordering::SeqCst) > 0 {
                        debug!(target: "Client/Sync", "Sync recovered");
                    }
                }
                Some(Err(e)) => {
                    let count = self.sync_failures.fetch_add(1, Ordering::SeqCst) + 1;
                    error!(target: "Client/Sync", "Iteration failed ({count} consecutive): {e}");
                }
            }

            tokio::select! {
                _ = sleep(self.config.sync_interval) => {}
                _ = self.shutdown_notifier.notified() => {
                    info!(target: "Client/Sync", "Stopping: {}", StopReason::Cancelled);
                    break;
                }
            }
        }

        self.is_alive.store(false, Ordering::SeqCst);
        if let Err(e) = self.logout().await {
            warn!(target: "Client/Sync", "Logout on loop exit failed: {e}");
        }
        info!(target: "Client/Sync", "Sync loop ended");
    }

    /// One poll-classify-act cycle. `Ok(Some(_))` is a terminal condition,
    /// `Ok(None)` a clean iteration, `Err` a tolerated failure.
    async fn sync_iteration(self: &Arc<Self>) -> Result<Option<StopReason>> {
        let status = self.sync_check().await?;
        match classify(&status.retcode, status.selector.as_deref()) {
            SyncAction::Stop(reason) => Ok(Some(reason)),
            SyncAction::Continue => Ok(None),
            SyncAction::Fetch => {
                self.fetch_messages().await?;
                Ok(None)
            }
            SyncAction::Transient => {
                if self.config.strict_sync_retcodes {
                    Err(ClientError::Protocol(
                        status.retcode.parse().unwrap_or(-1),
                    ))
                } else {
                    debug!(
                        target: "Client/Sync",
                        "Unrecognized retcode {:?}, continuing", status.retcode
                    );
                    Ok(None)
                }
            }
        }
    }

    /// Calls the push-check endpoint with the current cursor. Long-poll: the
    /// server may hold the connection, so this uses the extended timeout.
    pub(crate) async fn sync_check(&self) -> Result<SyncCheckStatus> {
        let (skey, sid, uin, device_id) = self
            .session_read(|s| {
                s.credentials().map(|c| {
                    (
                        c.skey.clone(),
                        c.sid.clone(),
                        c.uin.clone(),
                        c.device_id.clone(),
                    )
                })
            })
            .ok_or(ClientError::NotLoggedIn)?;
        let sync_key = self.session_read(|s| s.sync_key().as_query_param());

        let url = format!("{}/synccheck", self.push_url()?);
        let now = Self::timestamp();
        let params = [
            ("r", now.to_string()),
            ("skey", skey),
            ("sid", sid),
            ("uin", uin),
            ("deviceid", device_id),
            ("synckey", sync_key),
            ("_", now.to_string()),
        ];
        let response = self
            .transport
            .get(&url, &params, self.config.sync_check_timeout)
            .await?;
        let data = response.parse_js()?;
        let status = data
            .get("synccheck")
            .ok_or_else(|| ClientError::parse("js", "push-check body without synccheck object"))?;
        let retcode = status
            .get("retcode")
            .and_then(Value::as_str)
            .ok_or_else(|| ClientError::parse("js", "synccheck without retcode"))?
            .to_string();
        let selector = match status.get("selector") {
            None | Some(Value::Null) => None,
            Some(v) => v.as_str().map(str::to_string),
        };
        Ok(SyncCheckStatus { retcode, selector })
    }

    /// Fetches new messages for the current cursor, replaces the cursor only
    /// after the server acknowledged the fetch, folds contact deltas into
    /// the cache, and dispatches every message not authored by this account.
    pub(crate) async fn fetch_messages(self: &Arc<Self>) -> Result<()> {
        let (sid, skey, pass_ticket) = self
            .session_read(|s| {
                s.credentials()
                    .map(|c| (c.sid.clone(), c.skey.clone(), c.pass_ticket.clone()))
            })
            .ok_or(ClientError::NotLoggedIn)?;
        let url = format!(
            "{}/webwxsync?sid={}&skey={}&pass_ticket={}",
            self.index_url()?,
            urlencoding::encode(&sid),
            urlencoding::encode(&skey),
            urlencoding::encode(&pass_ticket),
        );

        let mut body = self.base_request_body()?;
        let cursor = self.session_read(|s| s.sync_key().clone());
        body["SyncKey"] = serde_json::to_value(&cursor)
            .map_err(|e| ClientError::parse("json", e.to_string()))?;
        body["rr"] = Value::from(format!("-{}", Self::timestamp()));

        let response = self
            .transport
            .post_json(&url, &body, self.config.sync_check_timeout)
            .await?;
        let data: Value = response.parse_json()?;
        // On failure the stored cursor stays untouched; the server only
        // returns messages strictly after the cursor we echo back.
        check_base_response(&data).map_err(ClientError::Protocol)?;

        let new_cursor = data
            .get("SyncCheckKey")
            .or_else(|| data.get("SyncKey"))
            .cloned()
            .map(serde_json::from_value::<SyncKey>)
            .transpose()
            .map_err(|e| ClientError::parse("json", format!("SyncCheckKey: {e}")))?;
        if let Some(new_cursor) = new_cursor.filter(|k| !k.is_empty()) {
            self.session_write(|s| s.set_sync_key(new_cursor));
        }

        if let Some(Value::Array(records)) = data.get("ModContactList") {
            let applied = self.contacts.batch_upsert(records);
            debug!(target: "Client/Sync", "Applied {applied} contact deltas");
        }

        let me = self.profile.username();
        if let Some(Value::Array(records)) = data.get("AddMsgList") {
            for raw in records {
                let Some(message) = Message::parse(raw) else {
                    debug!(target: "Client/Sync", "Skipping malformed message record");
                    continue;
                };
                if !me.is_empty() && message.from == me {
                    continue;
                }
                // First sighting of a sender we have never cached.
                if self.contacts.find_by_username(&message.from).is_none() {
                    self.contacts.upsert(&json!({ "UserName": message.from }));
                }
                self.dispatch_message(Arc::new(message));
            }
        }
        Ok(())
    }

    fn dispatch_message(self: &Arc<Self>, message: Arc<Message>) {
        self.handlers
            .dispatch(EventKind::Message, message.clone(), self.clone());
        if message.is_text() {
            self.handlers
                .dispatch(EventKind::Text, message.clone(), self.clone());
        }
        if message.involves_group() {
            self.handlers
                .dispatch(EventKind::Group, message, self.clone());
        }
    }
}
