use std::time::Duration;

/// One historical web deployment region. The redirect host handed back by the
/// login handshake is matched against `index`; the whole group is then fixed
/// for the session's lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerGroup {
    pub index: &'static str,
    pub file: &'static str,
    pub push: &'static str,
}

const SERVER_GROUPS: &[ServerGroup] = &[
    ServerGroup {
        index: "wx.qq.com",
        file: "file.wx.qq.com",
        push: "webpush.wx.qq.com",
    },
    ServerGroup {
        index: "wx2.qq.com",
        file: "file.wx2.qq.com",
        push: "webpush.wx2.qq.com",
    },
    ServerGroup {
        index: "wx8.qq.com",
        file: "file.wx8.qq.com",
        push: "webpush.wx8.qq.com",
    },
    ServerGroup {
        index: "wechat.com",
        file: "file.web.wechat.com",
        push: "webpush.web.wechat.com",
    },
    ServerGroup {
        index: "web2.wechat.com",
        file: "file.web2.wechat.com",
        push: "webpush.web2.wechat.com",
    },
];

#[derive(Debug, Clone)]
pub struct Config {
    /// Fixed application id sent on token issuance.
    pub app_id: String,
    /// Host the scan token URL is built from.
    pub auth_url: String,
    pub user_agent: String,
    pub lang: String,
    /// Ordered list of known backend host groups. Resolution failure against
    /// this list is a fatal configuration error, not a retry.
    pub servers: Vec<ServerGroup>,
    /// Timeout for every call except the push-check long poll.
    pub request_timeout: Duration,
    /// Extended timeout for the push-check endpoint, which may hold the
    /// connection open until data is available.
    pub sync_check_timeout: Duration,
    /// Sleep between sync loop iterations.
    pub sync_interval: Duration,
    /// Delay before re-requesting a scan token after a failed issuance.
    pub token_retry_delay: Duration,
    /// When set, unrecognized push-check retcodes are logged as iteration
    /// failures (and counted) instead of being silently tolerated. The loop
    /// keeps running either way.
    pub strict_sync_retcodes: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_id: "wx782c26e4c19acffb".to_string(),
            auth_url: "https://login.weixin.qq.com".to_string(),
            user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_12_5) \
                         AppleWebKit/537.36 (KHTML, like Gecko) \
                         Chrome/59.0.3071.86 Safari/537.36"
                .to_string(),
            lang: "zh_CN".to_string(),
            servers: SERVER_GROUPS.to_vec(),
            request_timeout: Duration::from_secs(10),
            sync_check_timeout: Duration::from_secs(60),
            sync_interval: Duration::from_secs(1),
            token_retry_delay: Duration::from_secs(1),
            strict_sync_retcodes: false,
        }
    }
}
