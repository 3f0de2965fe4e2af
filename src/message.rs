use serde_json::Value;

/// Provider message types the client distinguishes. Only `Text` influences
/// dispatch; everything else is carried for handlers to inspect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Image,
    Voice,
    Video,
    Emoticon,
    StatusNotify,
    System,
    Unknown(i64),
}

impl MessageKind {
    fn from_code(code: i64) -> Self {
        match code {
            1 => Self::Text,
            3 => Self::Image,
            34 => Self::Voice,
            43 => Self::Video,
            47 => Self::Emoticon,
            51 => Self::StatusNotify,
            10000 => Self::System,
            other => Self::Unknown(other),
        }
    }
}

/// One fetched message, as handed to registered handlers. Content parsing
/// beyond the type code stays with the handlers; `raw` carries the full
/// provider payload.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: String,
    pub from: String,
    pub to: String,
    pub kind: MessageKind,
    pub content: String,
    pub create_time: i64,
    pub raw: Value,
}

impl Message {
    /// Parses one entry of the fetch response's message list. Returns `None`
    /// when the record is missing its endpoints.
    pub fn parse(raw: &Value) -> Option<Self> {
        let from = raw.get("FromUserName")?.as_str()?.to_string();
        let to = raw.get("ToUserName")?.as_str()?.to_string();
        Some(Self {
            id: raw
                .get("MsgId")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            from,
            to,
            kind: MessageKind::from_code(
                raw.get("MsgType").and_then(Value::as_i64).unwrap_or(0),
            ),
            content: raw
                .get("Content")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            create_time: raw.get("CreateTime").and_then(Value::as_i64).unwrap_or(0),
            raw: raw.clone(),
        })
    }

    pub fn is_text(&self) -> bool {
        self.kind == MessageKind::Text
    }

    /// Whether either endpoint of the message is a group, recognized by the
    /// structural `@@` marker in the identifier. Incoming group traffic
    /// carries the group as sender, so both ends are checked.
    pub fn involves_group(&self) -> bool {
        self.from.starts_with("@@") || self.to.starts_with("@@")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_text_message() {
        let msg = Message::parse(&json!({
            "MsgId": "5983",
            "FromUserName": "@sender",
            "ToUserName": "@me",
            "MsgType": 1,
            "Content": "hello",
            "CreateTime": 1_500_000_000,
        }))
        .unwrap();
        assert!(msg.is_text());
        assert!(!msg.involves_group());
        assert_eq!(msg.content, "hello");
        assert_eq!(msg.create_time, 1_500_000_000);
    }

    #[test]
    fn group_marker_detected_on_either_endpoint() {
        let incoming = Message::parse(&json!({
            "FromUserName": "@@room", "ToUserName": "@me", "MsgType": 1,
        }))
        .unwrap();
        let outgoing = Message::parse(&json!({
            "FromUserName": "@me", "ToUserName": "@@room", "MsgType": 1,
        }))
        .unwrap();
        assert!(incoming.involves_group());
        assert!(outgoing.involves_group());
    }

    #[test]
    fn unknown_type_codes_are_preserved() {
        let msg = Message::parse(&json!({
            "FromUserName": "@a", "ToUserName": "@b", "MsgType": 62,
        }))
        .unwrap();
        assert_eq!(msg.kind, MessageKind::Unknown(62));
        assert!(!msg.is_text());
    }

    #[test]
    fn record_without_endpoints_is_rejected() {
        assert!(Message::parse(&json!({"MsgType": 1, "Content": "x"})).is_none());
    }
}
