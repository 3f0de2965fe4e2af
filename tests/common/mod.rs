#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wechat_rust::transport::{Response, Transport};
use wechat_rust::{Client, Config};

/// One scripted exchange. `expect` must be a substring of the requested URL;
/// the client's calls are strictly sequential, so a flat script is enough.
#[derive(Clone)]
pub struct Step {
    expect: &'static str,
    outcome: Result<Response, &'static str>,
}

impl Step {
    pub fn respond(expect: &'static str, body: &str) -> Self {
        Self {
            expect,
            outcome: Ok(Response::new(200, body)),
        }
    }

    pub fn fail(expect: &'static str, error: &'static str) -> Self {
        Self {
            expect,
            outcome: Err(error),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub url: String,
    pub body: Option<String>,
}

/// Transport that plays back a fixed script and records every call. Once the
/// script runs out, every further call fails like a dead network, which the
/// client is expected to tolerate.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Step>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedTransport {
    pub fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(steps.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn record_and_pop(&self, url: &str, body: Option<String>) -> anyhow::Result<Response> {
        self.calls.lock().unwrap().push(RecordedCall {
            url: url.to_string(),
            body,
        });
        let step = self.script.lock().unwrap().pop_front();
        match step {
            None => Err(anyhow::anyhow!("script exhausted, no response for {url}")),
            Some(step) => {
                assert!(
                    url.contains(step.expect),
                    "expected a call matching {:?}, got {url}",
                    step.expect
                );
                step.outcome
                    .map_err(|e| anyhow::anyhow!("scripted failure: {e}"))
            }
        }
    }

    pub fn calls_matching(&self, fragment: &str) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.url.contains(fragment))
            .cloned()
            .collect()
    }

    pub fn count(&self, fragment: &str) -> usize {
        self.calls_matching(fragment).len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn get(
        &self,
        url: &str,
        _params: &[(&str, String)],
        _timeout: Duration,
    ) -> anyhow::Result<Response> {
        self.record_and_pop(url, None)
    }

    async fn post_json(
        &self,
        url: &str,
        body: &Value,
        _timeout: Duration,
    ) -> anyhow::Result<Response> {
        self.record_and_pop(url, Some(body.to_string()))
    }
}

/// Short timers so tests spin fast.
pub fn test_config() -> Config {
    Config {
        sync_interval: Duration::from_millis(5),
        token_retry_delay: Duration::from_millis(5),
        ..Config::default()
    }
}

pub fn build_client(transport: Arc<ScriptedTransport>) -> Arc<Client> {
    let _ = env_logger::builder().is_test(true).try_init();
    Client::builder()
        .with_config(test_config())
        .with_transport(transport)
        .build()
        .expect("client builds")
}

pub const TOKEN_BODY: &str = r#"window.QRLogin.code = 200; window.QRLogin.uuid = "uuid-one";"#;

pub const SCANNED_BODY: &str = "window.code=201;";

pub const WAITING_BODY: &str = "window.code=408;";

pub const CONFIRMED_BODY: &str = "window.code=200;window.redirect_uri=\"https://wx.qq.com/cgi-bin/mmwebwx-bin/webwxnewloginpage?ticket=t1\";";

pub const REDIRECT_XML: &str = "<error><ret>0</ret><skey>@crypt_skey</skey><wxsid>sid-1</wxsid>\
                                <wxuin>4242</wxuin><pass_ticket>pt-1</pass_ticket></error>";

pub const INIT_BODY: &str = r#"{
  "BaseResponse": {"Ret": 0},
  "SyncKey": {"Count": 2, "List": [{"Key": 1, "Val": 100}, {"Key": 2, "Val": 200}]},
  "User": {"UserName": "@me", "NickName": "TestBot"},
  "ContactList": [{"UserName": "@friend", "NickName": "Friend"}],
  "InviteStartCount": 40
}"#;

pub const NOTIFY_OK: &str = r#"{"BaseResponse": {"Ret": 0}}"#;

pub const CONTACTS_BODY: &str = r#"{
  "BaseResponse": {"Ret": 0},
  "MemberList": [
    {"UserName": "@friend", "NickName": "Friend", "Sex": 1},
    {"UserName": "@@room", "NickName": "Room"}
  ]
}"#;

/// The shortest clean handshake: token, confirm, redirect, init, notify,
/// contact directory.
pub fn login_script() -> Vec<Step> {
    vec![
        Step::respond("jslogin", TOKEN_BODY),
        Step::respond("mmwebwx-bin/login", CONFIRMED_BODY),
        Step::respond("webwxnewloginpage", REDIRECT_XML),
        Step::respond("webwxinit", INIT_BODY),
        Step::respond("webwxstatusnotify", NOTIFY_OK),
        Step::respond("webwxgetcontact", CONTACTS_BODY),
    ]
}
