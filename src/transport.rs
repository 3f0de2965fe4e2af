use crate::error::{ClientError, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::time::Duration;

/// HTTP seam the client talks through.
///
/// Implementations must persist cookies across calls for the lifetime of the
/// value (the provider's session rides on them) and send the configured
/// user agent. The client never constructs a transport itself; one is
/// injected at build time.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issues a GET with the given query parameters.
    async fn get(
        &self,
        url: &str,
        params: &[(&str, String)],
        timeout: Duration,
    ) -> anyhow::Result<Response>;

    /// Issues a POST with a JSON body.
    async fn post_json(
        &self,
        url: &str,
        body: &Value,
        timeout: Duration,
    ) -> anyhow::Result<Response>;
}

/// A fully buffered response body. The provider's payloads are small (the
/// bulkiest is the initial contact directory), so streaming is not needed.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub body: String,
}

/// Matches one `window.<path> = <value>` assignment in a loosely structured
/// JS response body. Values are an object literal, a quoted string, or a
/// bare token.
static JS_ASSIGN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"window\.(?P<path>[A-Za-z_][A-Za-z0-9_.]*)\s*=\s*(?P<value>\{[^}]*\}|"(?:[^"\\]|\\.)*"|[^;]+)"#,
    )
    .expect("static regex")
});

/// Quotes bare keys in a JS object literal so serde_json can consume it,
/// e.g. `{retcode:"0",selector:"2"}`.
static BARE_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?P<key>[A-Za-z_][A-Za-z0-9_]*)\s*:"#).expect("static regex"));

impl Response {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Deserializes a JSON body.
    pub fn parse_json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.body).map_err(|e| ClientError::parse("json", e.to_string()))
    }

    /// Scrapes a `window.*` assignment body into a flat map keyed by the last
    /// path segment, so `window.QRLogin.code = 200` yields `code: 200` and
    /// `window.synccheck={retcode:"0",selector:"2"}` yields a nested object
    /// under `synccheck`.
    pub fn parse_js(&self) -> Result<Map<String, Value>> {
        let mut out = Map::new();
        for caps in JS_ASSIGN.captures_iter(&self.body) {
            let path = &caps["path"];
            let key = path.rsplit('.').next().unwrap_or(path).to_string();
            out.insert(key, parse_js_value(caps["value"].trim()));
        }
        if out.is_empty() {
            return Err(ClientError::parse("js", "no window.* assignments found"));
        }
        Ok(out)
    }

    /// Extracts leaf `<tag>text</tag>` pairs from an XML body, as returned by
    /// the login redirect endpoint.
    pub fn parse_xml(&self) -> Result<Map<String, Value>> {
        let doc = roxmltree::Document::parse(&self.body)
            .map_err(|e| ClientError::parse("xml", e.to_string()))?;
        let mut out = Map::new();
        for node in doc.descendants().filter(|n| n.is_element()) {
            if let Some(text) = node.text() {
                let text = text.trim();
                if !text.is_empty() {
                    out.insert(
                        node.tag_name().name().to_string(),
                        Value::String(text.to_string()),
                    );
                }
            }
        }
        Ok(out)
    }
}

fn parse_js_value(raw: &str) -> Value {
    if raw.starts_with('{') {
        let quoted = BARE_KEY.replace_all(raw, "\"$key\":");
        if let Ok(value) = serde_json::from_str(&quoted) {
            return value;
        }
    } else if raw.starts_with('"') {
        if let Ok(value) = serde_json::from_str(raw) {
            return value;
        }
    } else if let Ok(n) = raw.parse::<i64>() {
        return Value::from(n);
    }
    Value::String(raw.trim_matches('"').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_token_issuance_body() {
        let r = Response::new(
            200,
            r#"window.QRLogin.code = 200; window.QRLogin.uuid = "wbd9okgPTw==";"#,
        );
        let data = r.parse_js().unwrap();
        assert_eq!(data["code"], Value::from(200));
        assert_eq!(data["uuid"], Value::from("wbd9okgPTw=="));
    }

    #[test]
    fn parses_scan_status_body_with_redirect() {
        let r = Response::new(
            200,
            "window.code=200;\nwindow.redirect_uri=\"https://wx.qq.com/cgi-bin/mmwebwx-bin/webwxnewloginpage?ticket=abc\";",
        );
        let data = r.parse_js().unwrap();
        assert_eq!(data["code"], Value::from(200));
        assert_eq!(
            data["redirect_uri"],
            Value::from("https://wx.qq.com/cgi-bin/mmwebwx-bin/webwxnewloginpage?ticket=abc")
        );
    }

    #[test]
    fn parses_push_check_object_body() {
        let r = Response::new(200, r#"window.synccheck={retcode:"0",selector:"2"}"#);
        let data = r.parse_js().unwrap();
        assert_eq!(data["synccheck"]["retcode"], Value::from("0"));
        assert_eq!(data["synccheck"]["selector"], Value::from("2"));
    }

    #[test]
    fn js_parse_fails_on_garbage() {
        let r = Response::new(200, "<html>502 Bad Gateway</html>");
        assert!(r.parse_js().is_err());
    }

    #[test]
    fn parses_redirect_xml_body() {
        let r = Response::new(
            200,
            "<error><ret>0</ret><skey>@crypt_x</skey><wxsid>sid123</wxsid>\
             <wxuin>99887766</wxuin><pass_ticket>tick%2Fet</pass_ticket></error>",
        );
        let data = r.parse_xml().unwrap();
        assert_eq!(data["skey"], Value::from("@crypt_x"));
        assert_eq!(data["wxsid"], Value::from("sid123"));
        assert_eq!(data["wxuin"], Value::from("99887766"));
        assert_eq!(data["pass_ticket"], Value::from("tick%2Fet"));
    }

    #[test]
    fn xml_parse_fails_on_truncated_body() {
        let r = Response::new(200, "<error><skey>half");
        assert!(r.parse_xml().is_err());
    }
}
