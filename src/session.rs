use crate::config::ServerGroup;
use serde::{Deserialize, Serialize};

/// One entry of the server-issued sync checkpoint. Entries are opaque to the
/// client and must be echoed back exactly as received, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncKeyEntry {
    #[serde(rename = "Key")]
    pub key: i64,
    #[serde(rename = "Val")]
    pub val: i64,
}

/// The sync cursor. Sent as structured JSON on fetch calls and serialized to
/// `key_val` pairs joined by `|` when used as a query parameter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncKey {
    #[serde(rename = "Count", default)]
    pub count: usize,
    #[serde(rename = "List", default)]
    pub list: Vec<SyncKeyEntry>,
}

impl SyncKey {
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Query-parameter form: `"_"`-joined values per entry, `"|"`-joined
    /// across entries, preserving server order.
    pub fn as_query_param(&self) -> String {
        self.list
            .iter()
            .map(|e| format!("{}_{}", e.key, e.val))
            .collect::<Vec<_>>()
            .join("|")
    }
}

/// Credential fields issued by the login handshake. All five are required on
/// every post-login call; they are installed and cleared as a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub skey: String,
    pub sid: String,
    pub uin: String,
    pub device_id: String,
    pub pass_ticket: String,
}

/// The credential subset folded into every authenticated request body.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BaseRequest {
    #[serde(rename = "Skey")]
    pub skey: String,
    #[serde(rename = "Sid")]
    pub sid: String,
    #[serde(rename = "Uin")]
    pub uin: String,
    #[serde(rename = "DeviceID")]
    pub device_id: String,
}

impl Credentials {
    fn base_request(&self) -> BaseRequest {
        BaseRequest {
            skey: self.skey.clone(),
            sid: self.sid.clone(),
            uin: self.uin.clone(),
            device_id: self.device_id.clone(),
        }
    }
}

/// Resolved base URLs for the session's backend host group, one per role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostUrls {
    pub index: String,
    pub file: String,
    pub push: String,
}

impl HostUrls {
    const SCHEME: &'static str = "https";
    const API_PATH: &'static str = "/cgi-bin/mmwebwx-bin";

    pub fn from_group(group: &ServerGroup) -> Self {
        let base = |host: &str| format!("{}://{}{}", Self::SCHEME, host, Self::API_PATH);
        Self {
            index: base(group.index),
            file: base(group.file),
            push: base(group.push),
        }
    }
}

/// Session-lifetime credential and cursor store. Pure data, no I/O.
///
/// Locking contract: this store has no internal lock beyond the `RwLock` the
/// client wraps it in, and relies on the call ordering the rest of the crate
/// enforces — the login path is the only writer before the sync loop starts,
/// the loop task is the only writer of the cursor while running, and logout
/// resets the store only after the loop has stopped. Guards are never held
/// across an await.
#[derive(Debug, Default)]
pub struct SessionStore {
    credentials: Option<Credentials>,
    hosts: Option<HostUrls>,
    base_request: Option<BaseRequest>,
    sync_key: SyncKey,
    invite_start_count: i64,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the handshake output in one step, keeping the "all credential
    /// fields set iff hosts resolved" invariant. Also computes the cached
    /// base request; it stays valid until `reset`.
    pub fn install(&mut self, credentials: Credentials, hosts: HostUrls) {
        self.base_request = Some(credentials.base_request());
        self.credentials = Some(credentials);
        self.hosts = Some(hosts);
    }

    /// Returns the store to its pre-login state in a single operation.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn is_populated(&self) -> bool {
        self.credentials.is_some()
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn hosts(&self) -> Option<&HostUrls> {
        self.hosts.as_ref()
    }

    pub fn base_request(&self) -> Option<&BaseRequest> {
        self.base_request.as_ref()
    }

    pub fn sync_key(&self) -> &SyncKey {
        &self.sync_key
    }

    /// Replaces the cursor. Callers must only do this after the fetch that
    /// produced the new cursor was acknowledged successful.
    pub fn set_sync_key(&mut self, sync_key: SyncKey) {
        self.sync_key = sync_key;
    }

    pub fn invite_start_count(&self) -> i64 {
        self.invite_start_count
    }

    pub fn set_invite_start_count(&mut self, count: i64) {
        self.invite_start_count = count;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> Credentials {
        Credentials {
            skey: "@crypt_s".into(),
            sid: "sid1".into(),
            uin: "12345".into(),
            device_id: "e1234567890123456".into(),
            pass_ticket: "ticket".into(),
        }
    }

    fn hosts() -> HostUrls {
        HostUrls::from_group(&ServerGroup {
            index: "wx.qq.com",
            file: "file.wx.qq.com",
            push: "webpush.wx.qq.com",
        })
    }

    #[test]
    fn install_sets_credentials_hosts_and_base_request_together() {
        let mut store = SessionStore::new();
        assert!(!store.is_populated());
        assert!(store.hosts().is_none());
        assert!(store.base_request().is_none());

        store.install(creds(), hosts());
        assert!(store.is_populated());
        let base = store.base_request().unwrap();
        assert_eq!(base.skey, "@crypt_s");
        assert_eq!(base.device_id, "e1234567890123456");
        assert_eq!(
            store.hosts().unwrap().push,
            "https://webpush.wx.qq.com/cgi-bin/mmwebwx-bin"
        );
    }

    #[test]
    fn reset_clears_everything_at_once() {
        let mut store = SessionStore::new();
        store.install(creds(), hosts());
        store.set_sync_key(SyncKey {
            count: 1,
            list: vec![SyncKeyEntry { key: 1, val: 7 }],
        });
        store.set_invite_start_count(40);

        store.reset();
        assert!(!store.is_populated());
        assert!(store.hosts().is_none());
        assert!(store.base_request().is_none());
        assert!(store.sync_key().is_empty());
        assert_eq!(store.invite_start_count(), 0);
    }

    #[test]
    fn sync_key_query_serialization_preserves_order() {
        let key: SyncKey = serde_json::from_str(
            r#"{"Count":3,"List":[{"Key":1,"Val":661706},{"Key":2,"Val":661707},{"Key":3,"Val":0}]}"#,
        )
        .unwrap();
        assert_eq!(key.count, 3);
        assert_eq!(key.as_query_param(), "1_661706|2_661707|3_0");
    }

    #[test]
    fn sync_key_round_trips_as_structured_json() {
        let key = SyncKey {
            count: 2,
            list: vec![
                SyncKeyEntry { key: 1, val: 10 },
                SyncKeyEntry { key: 27, val: 3 },
            ],
        };
        let json = serde_json::to_value(&key).unwrap();
        assert_eq!(json["List"][1]["Key"], 27);
        let back: SyncKey = serde_json::from_value(json).unwrap();
        assert_eq!(back, key);
    }
}
