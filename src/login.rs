use crate::client::Client;
use crate::error::{ClientError, Result};
use crate::qrcode::login_url;
use crate::session::{Credentials, HostUrls, SyncKey};
use log::{debug, info, warn};
use rand::Rng;
use serde_json::Value;
use tokio::time::sleep;

/// Where the current login attempt stands. One of `Confirmed`/`Expired` is
/// reached per cycle; `Expired` restarts the cycle with a fresh token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginState {
    Pending,
    TokenIssued,
    Scanned,
    Confirmed,
    Expired,
}

/// Outcome of one scan-status poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ScanStatus {
    /// The handshake succeeded; the payload is the redirect URL.
    Confirmed(String),
    /// Device scanned the token, app-side confirmation still pending.
    Scanned,
    /// Nothing happened yet; keep polling.
    Waiting,
    /// Scan window elapsed, or the endpoint answered something we do not
    /// recognize. Either way the cycle restarts.
    Expired,
}

fn fresh_device_id() -> String {
    let mut rng = rand::rng();
    let digits: String = (0..16).map(|_| rng.random_range(0..10u8).to_string()).collect();
    format!("e{digits}")
}

/// Extracts the bare host from an absolute URL, e.g. `wx.qq.com` from
/// `https://wx.qq.com/cgi-bin/...`.
fn redirect_host(url: &str) -> Option<&str> {
    let rest = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    let host = rest.split(['/', '?']).next()?;
    (!host.is_empty()).then_some(host)
}

impl Client {
    /// Runs the whole handshake: request a token, hand it to the display
    /// collaborator, poll until confirmed or expired, and on confirmation
    /// populate the session and load post-login resources. Expired cycles
    /// restart with a fresh token, without an attempt cap.
    pub async fn login(&self) -> Result<()> {
        if self.is_logged_in() {
            info!(target: "Client/Login", "Already logged in");
            return Ok(());
        }

        let mut cycle = 0u32;
        while !self.is_logged_in() {
            cycle += 1;
            self.set_login_state(LoginState::Pending);
            debug!(target: "Client/Login", "Starting login cycle {cycle}");

            let token = loop {
                match self.request_token().await {
                    Ok(Some(token)) => break token,
                    Ok(None) => {
                        info!(target: "Client/Login", "Token issuance refused, retrying")
                    }
                    Err(e) => {
                        warn!(target: "Client/Login", "Token issuance failed, retrying: {e}")
                    }
                }
                sleep(self.config.token_retry_delay).await;
            };
            self.set_login_state(LoginState::TokenIssued);
            self.token_display.show(&login_url(&self.config, &token));
            info!(target: "Client/Login", "Waiting for scan ...");

            loop {
                match self.poll_scan_status(&token).await {
                    ScanStatus::Confirmed(redirect) => {
                        self.complete_login(&redirect).await?;
                        break;
                    }
                    ScanStatus::Scanned => {
                        self.set_login_state(LoginState::Scanned);
                        info!(target: "Client/Login", "Scanned, confirm on the phone ...");
                    }
                    ScanStatus::Waiting => {}
                    ScanStatus::Expired => {
                        self.set_login_state(LoginState::Expired);
                        info!(target: "Client/Login", "Scan window expired, requesting a new token");
                        break;
                    }
                }
            }
            // An expired token never leaks into the next cycle; every cycle
            // starts from issuance.
        }

        info!(target: "Client/Login", "Loading post-login resources ...");
        self.init_session().await?;
        self.disable_notifications().await?;
        if let Err(e) = self.fetch_contacts().await {
            warn!(target: "Client/Login", "Initial contact load failed: {e}");
        }
        info!(target: "Client/Login", "User [{}] logged in", self.profile.nickname());
        Ok(())
    }

    /// Calls the token-issuance endpoint. `Ok(None)` and `Err` are both
    /// retriable; the caller owns the retry delay.
    pub(crate) async fn request_token(&self) -> Result<Option<String>> {
        let url = format!("{}/jslogin", self.config.auth_url);
        let params = [
            ("appid", self.config.app_id.clone()),
            ("fun", "new".to_string()),
            ("lang", self.config.lang.clone()),
            ("_", Self::timestamp().to_string()),
        ];
        let response = self
            .transport
            .get(&url, &params, self.config.request_timeout)
            .await?;
        let data = response.parse_js()?;
        if data.get("code").and_then(Value::as_i64) == Some(200) {
            Ok(data
                .get("uuid")
                .and_then(Value::as_str)
                .map(str::to_string))
        } else {
            Ok(None)
        }
    }

    /// One status poll. Maps provider codes 200/201/408; anything else —
    /// including transport failures — counts as `Expired` so the cycle never
    /// parks in an ambiguous state.
    pub(crate) async fn poll_scan_status(&self, token: &str) -> ScanStatus {
        let url = format!("{}/cgi-bin/mmwebwx-bin/login", self.config.auth_url);
        let now = Self::timestamp();
        let params = [
            ("loginicon", "true".to_string()),
            ("uuid", token.to_string()),
            ("tip", "0".to_string()),
            ("r", (now / 1579).to_string()),
            ("_", now.to_string()),
        ];
        let data = match self
            .transport
            .get(&url, &params, self.config.request_timeout)
            .await
        {
            Ok(response) => match response.parse_js() {
                Ok(data) => data,
                Err(e) => {
                    warn!(target: "Client/Login", "Unparseable scan status, treating as expired: {e}");
                    return ScanStatus::Expired;
                }
            },
            Err(e) => {
                warn!(target: "Client/Login", "Scan status poll failed, treating as expired: {e:#}");
                return ScanStatus::Expired;
            }
        };

        match data.get("code").and_then(Value::as_i64) {
            Some(200) => match data.get("redirect_uri").and_then(Value::as_str) {
                Some(redirect) => ScanStatus::Confirmed(redirect.to_string()),
                None => {
                    warn!(target: "Client/Login", "Confirmed status without redirect payload");
                    ScanStatus::Expired
                }
            },
            Some(201) => ScanStatus::Scanned,
            Some(408) => ScanStatus::Waiting,
            _ => ScanStatus::Expired,
        }
    }

    /// Resolves the redirect payload into a populated session store: fetches
    /// the redirect, extracts the credential fields, and fixes the backend
    /// host group for the session's lifetime. A redirect host outside the
    /// configured groups is fatal — the provider changed infrastructure.
    pub(crate) async fn complete_login(&self, redirect_url: &str) -> Result<()> {
        let host = redirect_host(redirect_url)
            .ok_or_else(|| ClientError::parse("redirect", "URL without host"))?
            .to_string();

        let group = self
            .config
            .servers
            .iter()
            .find(|g| g.index == host)
            .cloned()
            .ok_or_else(|| ClientError::UnknownServerGroup(host.clone()))?;

        let response = self
            .transport
            .get(redirect_url, &[], self.config.request_timeout)
            .await?;
        let data = response.parse_xml()?;
        let field = |name: &'static str| -> Result<String> {
            data.get(name)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| ClientError::parse("xml", format!("missing <{name}>")))
        };

        let credentials = Credentials {
            skey: field("skey")?,
            sid: field("wxsid")?,
            uin: field("wxuin")?,
            device_id: fresh_device_id(),
            pass_ticket: field("pass_ticket")?,
        };
        self.session_write(|s| s.install(credentials, HostUrls::from_group(&group)));

        self.logged_out
            .store(false, std::sync::atomic::Ordering::SeqCst);
        self.is_logged_in
            .store(true, std::sync::atomic::Ordering::SeqCst);
        self.set_login_state(LoginState::Confirmed);
        debug!(target: "Client/Login", "Session established via host group {}", group.index);
        Ok(())
    }

    /// First one-shot initialization call: seeds the sync cursor, the own
    /// profile, and the initial contact snapshot. Failures here surface
    /// immediately — the session is broken right after a successful
    /// handshake, retrying would not help.
    pub(crate) async fn init_session(&self) -> Result<()> {
        let url = format!("{}/webwxinit?r={}", self.index_url()?, Self::timestamp());
        let body = self.base_request_body()?;
        let response = self
            .transport
            .post_json(&url, &body, self.config.request_timeout)
            .await?;
        let data: Value = response.parse_json()?;
        check_base_response(&data).map_err(|ret| ClientError::Init(format!("webwxinit ret={ret}")))?;

        let sync_key: SyncKey = data
            .get("SyncKey")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| ClientError::parse("json", format!("SyncKey: {e}")))?
            .ok_or_else(|| ClientError::parse("json", "init payload without SyncKey"))?;
        self.session_write(|s| {
            s.set_sync_key(sync_key);
            if let Some(count) = data.get("InviteStartCount").and_then(Value::as_i64) {
                s.set_invite_start_count(count);
            }
        });

        if let Some(user) = data.get("User") {
            self.profile.apply(user);
        }
        if let Some(Value::Array(records)) = data.get("ContactList") {
            self.contacts.batch_upsert(records);
        }
        Ok(())
    }

    /// Second one-shot initialization call: turns off phone-side new-message
    /// notifications while this session is attached.
    pub(crate) async fn disable_notifications(&self) -> Result<()> {
        let me = self.profile.username();
        let pass_ticket = self
            .session_read(|s| s.credentials().map(|c| c.pass_ticket.clone()))
            .ok_or(ClientError::NotLoggedIn)?;
        let url = format!(
            "{}/webwxstatusnotify?lang={}&pass_ticket={}",
            self.index_url()?,
            self.config.lang,
            urlencoding::encode(&pass_ticket),
        );
        let mut body = self.base_request_body()?;
        body["Code"] = Value::from(3);
        body["FromUserName"] = Value::from(me.clone());
        body["ToUserName"] = Value::from(me);
        body["ClientMsgId"] = Value::from(Self::timestamp());

        let response = self
            .transport
            .post_json(&url, &body, self.config.request_timeout)
            .await?;
        let data: Value = response.parse_json()?;
        check_base_response(&data)
            .map_err(|ret| ClientError::Init(format!("webwxstatusnotify ret={ret}")))
    }

    /// Loads the full contact directory (friends, groups, official and
    /// special accounts) into the cache. The delta path during sync keeps
    /// the cache converging even if this fails.
    pub async fn fetch_contacts(&self) -> Result<usize> {
        let (skey, pass_ticket) = self
            .session_read(|s| {
                s.credentials()
                    .map(|c| (c.skey.clone(), c.pass_ticket.clone()))
            })
            .ok_or(ClientError::NotLoggedIn)?;
        let url = format!(
            "{}/webwxgetcontact?r={}&pass_ticket={}&skey={}",
            self.index_url()?,
            Self::timestamp(),
            urlencoding::encode(&pass_ticket),
            urlencoding::encode(&skey),
        );
        let response = self
            .transport
            .post_json(&url, &Value::Object(Default::default()), self.config.request_timeout)
            .await?;
        let data: Value = response.parse_json()?;
        check_base_response(&data).map_err(ClientError::Protocol)?;

        let applied = match data.get("MemberList") {
            Some(Value::Array(records)) => self.contacts.batch_upsert(records),
            _ => 0,
        };
        debug!(target: "Client/Contacts", "Loaded {applied} contacts");
        Ok(applied)
    }
}

/// Checks the `BaseResponse.Ret` field common to all JSON endpoints. A
/// missing field is accepted; a non-zero ret is returned for the caller to
/// wrap.
pub(crate) fn check_base_response(data: &Value) -> std::result::Result<(), i64> {
    match data
        .get("BaseResponse")
        .and_then(|b| b.get("Ret"))
        .and_then(Value::as_i64)
    {
        None | Some(0) => Ok(()),
        Some(ret) => Err(ret),
    }
}
