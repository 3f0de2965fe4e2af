use log::debug;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Mutex;

/// Well-known system accounts that are neither people nor groups.
const SPECIAL_USERS: &[&str] = &[
    "filehelper",
    "newsapp",
    "fmessage",
    "weibo",
    "qqmail",
    "tmessage",
    "qmessage",
    "qqsync",
    "floatbottle",
    "lbsapp",
    "shakeapp",
    "medianote",
    "qqfriend",
    "readerapp",
    "blogapp",
    "facebookapp",
    "masssendapp",
    "meishiapp",
    "feedsapp",
    "voip",
    "blogappweixin",
    "weixin",
    "brandsessionholder",
    "weixinreminder",
    "officialaccounts",
    "notification_messages",
    "wxitil",
    "userexperience_alarm",
];

/// Bit on `VerifyFlag` marking official/subscription accounts.
const VERIFY_FLAG_OFFICIAL: i64 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContactKind {
    /// A personal contact.
    User,
    /// A group chat, recognizable by the `@@` username prefix.
    Group,
    /// An official or subscription account.
    Official,
    /// A special system account (file helper, notifications, ...).
    Special,
}

/// One cached participant. `username` is the stable identity; everything
/// else may be rewritten by later payloads for the same identity. Fields the
/// client does not model are carried opaquely in `extras` and merged on
/// update.
#[derive(Debug, Clone, PartialEq)]
pub struct Contact {
    pub username: String,
    pub nickname: Option<String>,
    pub kind: ContactKind,
    pub extras: Map<String, Value>,
}

impl Contact {
    /// Parses a raw provider record. Returns `None` when the record carries
    /// no usable identity.
    pub fn parse(raw: &Value) -> Option<Self> {
        let username = raw.get("UserName")?.as_str()?;
        if username.is_empty() {
            return None;
        }
        let mut contact = Self {
            username: username.to_string(),
            nickname: None,
            kind: ContactKind::User,
            extras: Map::new(),
        };
        contact.apply(raw);
        Some(contact)
    }

    /// Merges a newer payload for the same identity in place. Applying the
    /// same payload twice leaves the contact unchanged.
    fn apply(&mut self, raw: &Value) {
        if let Some(obj) = raw.as_object() {
            for (key, value) in obj {
                match key.as_str() {
                    "UserName" => {}
                    "NickName" => self.nickname = value.as_str().map(str::to_string),
                    _ => {
                        self.extras.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        self.kind = self.derive_kind();
    }

    fn derive_kind(&self) -> ContactKind {
        if self.username.starts_with("@@") {
            ContactKind::Group
        } else if SPECIAL_USERS.contains(&self.username.as_str()) {
            ContactKind::Special
        } else if self
            .extras
            .get("VerifyFlag")
            .and_then(Value::as_i64)
            .is_some_and(|f| f & VERIFY_FLAG_OFFICIAL != 0)
        {
            ContactKind::Official
        } else {
            ContactKind::User
        }
    }
}

/// Display-name filter for category queries: an exact string or a compiled
/// pattern. Contacts without a usable display name never match either form.
#[derive(Debug, Clone)]
pub enum NamePattern {
    Exact(String),
    Matches(Regex),
}

impl NamePattern {
    fn matches(&self, nickname: Option<&str>) -> bool {
        match (self, nickname) {
            (NamePattern::Exact(wanted), Some(name)) => name == wanted,
            (NamePattern::Matches(re), Some(name)) => re.is_match(name),
            (_, None) => false,
        }
    }
}

/// In-memory directory of every participant seen so far.
///
/// One mutex covers reads and writes: the sync loop task writes while any
/// caller thread may query. Coarse on purpose — the cache tops out at a few
/// thousand entries and writes are rare relative to the polling interval.
#[derive(Debug, Default)]
pub struct ContactList {
    cache: Mutex<HashMap<String, Contact>>,
}

impl ContactList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates or updates the contact identified by the record. Idempotent:
    /// re-applying an unchanged record is a no-op beyond the merge itself.
    pub fn upsert(&self, raw: &Value) -> Option<Contact> {
        let mut cache = self.cache.lock().expect("contact cache poisoned");
        let parsed = Contact::parse(raw)?;
        let entry = cache
            .entry(parsed.username.clone())
            .and_modify(|existing| existing.apply(raw))
            .or_insert(parsed);
        Some(entry.clone())
    }

    /// Applies `upsert` in input order; for duplicate identities the later
    /// record wins on overlapping fields.
    pub fn batch_upsert(&self, records: &[Value]) -> usize {
        let mut applied = 0;
        for raw in records {
            if self.upsert(raw).is_some() {
                applied += 1;
            } else {
                debug!(target: "Client/Contacts", "Skipping contact record without identity");
            }
        }
        applied
    }

    pub fn len(&self) -> usize {
        self.cache.lock().expect("contact cache poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All cached contacts of the given category, optionally filtered by
    /// display name. Contacts whose display name is absent are skipped by
    /// the filter rather than failing the whole query.
    pub fn find_by_kind(&self, kind: ContactKind, pattern: Option<&NamePattern>) -> Vec<Contact> {
        let cache = self.cache.lock().expect("contact cache poisoned");
        cache
            .values()
            .filter(|c| c.kind == kind)
            .filter(|c| {
                pattern
                    .map(|p| p.matches(c.nickname.as_deref()))
                    .unwrap_or(true)
            })
            .cloned()
            .collect()
    }

    pub fn find_by_username(&self, username: &str) -> Option<Contact> {
        let cache = self.cache.lock().expect("contact cache poisoned");
        cache.get(username).cloned()
    }

    /// Linear scan by display name; first match wins.
    pub fn find_by_nickname(&self, nickname: &str) -> Option<Contact> {
        let cache = self.cache.lock().expect("contact cache poisoned");
        cache
            .values()
            .find(|c| c.nickname.as_deref() == Some(nickname))
            .cloned()
    }
}
