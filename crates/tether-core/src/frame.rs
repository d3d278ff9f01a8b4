//! Wire frame model.
//!
//! Every message on the link is a single JSON object. Fields are kept as an
//! untyped map so unknown keys survive a round trip; [`Frame::kind`] is the
//! single place that decides what an inbound object means.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Named parameters of a call.
pub type Params = Map<String, Value>;

/// One JSON object on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame(pub Map<String, Value>);

/// What an inbound frame means, decided by which fields it carries.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameKind {
    /// `method` + `id`: the peer is calling us and expects a reply.
    Request { id: Value },
    /// `method` only: a notification, no reply expected.
    Notification { method: String, params: Option<Value> },
    /// `id` only: a response to one of our calls.
    Response { id: u64 },
    /// Neither `method` nor `id`, or an unusable `id`.
    Malformed,
}

impl Frame {
    /// Build an outbound call frame.
    ///
    /// `auth`, `params` and `dst` are only present when supplied; the field
    /// layout matches what the devices parse.
    pub fn request(
        id: u64,
        method: &str,
        src: &str,
        dst: Option<&str>,
        auth: Option<Value>,
        params: Option<Params>,
    ) -> Self {
        let mut fields = Map::new();
        fields.insert("id".into(), Value::from(id));
        fields.insert("method".into(), Value::from(method));
        fields.insert("src".into(), Value::from(src));
        if let Some(dst) = dst {
            fields.insert("dst".into(), Value::from(dst));
        }
        if let Some(auth) = auth {
            fields.insert("auth".into(), auth);
        }
        if let Some(params) = params {
            fields.insert("params".into(), Value::Object(params));
        }
        Frame(fields)
    }

    /// Build the fixed rejection reply for an inbound peer call.
    ///
    /// The inbound `id` is echoed back verbatim, whatever its JSON type.
    pub fn rejection(id: Value, src: &str) -> Self {
        let mut fields = Map::new();
        fields.insert("id".into(), id);
        fields.insert("src".into(), Value::from(src));
        fields.insert(
            "error".into(),
            json!({ "code": 500, "message": "Not Implemented" }),
        );
        Frame(fields)
    }

    /// Classify this frame.
    pub fn kind(&self) -> FrameKind {
        match (self.method(), self.0.get("id")) {
            (Some(_), Some(id)) => FrameKind::Request { id: id.clone() },
            (Some(method), None) => FrameKind::Notification {
                method: method.to_owned(),
                params: self.0.get("params").cloned(),
            },
            (None, Some(id)) => match id.as_u64() {
                Some(id) => FrameKind::Response { id },
                None => FrameKind::Malformed,
            },
            (None, None) => FrameKind::Malformed,
        }
    }

    pub fn id(&self) -> Option<&Value> {
        self.0.get("id")
    }

    pub fn method(&self) -> Option<&str> {
        self.0.get("method").and_then(Value::as_str)
    }

    pub fn src(&self) -> Option<&str> {
        self.0.get("src").and_then(Value::as_str)
    }

    pub fn result(&self) -> Option<&Value> {
        self.0.get("result")
    }

    /// The `error` payload, if it carries both a code and a message.
    pub fn error(&self) -> Option<(i64, &str)> {
        let error = self.0.get("error")?;
        let code = error.get("code")?.as_i64()?;
        let message = error.get("message")?.as_str()?;
        Some((code, message))
    }
}

impl TryFrom<Value> for Frame {
    type Error = Value;

    /// Fails on non-object values, returning them unchanged.
    fn try_from(value: Value) -> Result<Self, Value> {
        match value {
            Value::Object(fields) => Ok(Frame(fields)),
            other => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(value: Value) -> Frame {
        Frame::try_from(value).unwrap()
    }

    #[test]
    fn classifies_peer_request() {
        let f = frame(json!({"id": 7, "method": "Shelly.GetStatus", "src": "peer"}));
        assert_eq!(f.kind(), FrameKind::Request { id: json!(7) });
    }

    #[test]
    fn classifies_notification_with_and_without_params() {
        let f = frame(json!({"method": "NotifyStatus", "params": {"ts": 1}}));
        assert_eq!(
            f.kind(),
            FrameKind::Notification {
                method: "NotifyStatus".into(),
                params: Some(json!({"ts": 1})),
            }
        );

        let f = frame(json!({"method": "NotifyEvent", "src": "peer"}));
        assert_eq!(
            f.kind(),
            FrameKind::Notification {
                method: "NotifyEvent".into(),
                params: None,
            }
        );
    }

    #[test]
    fn classifies_response() {
        let f = frame(json!({"id": 3, "src": "peer", "result": {}}));
        assert_eq!(f.kind(), FrameKind::Response { id: 3 });
    }

    #[test]
    fn non_integer_response_id_is_malformed() {
        assert_eq!(frame(json!({"id": "three"})).kind(), FrameKind::Malformed);
        assert_eq!(frame(json!({"id": -1})).kind(), FrameKind::Malformed);
        assert_eq!(frame(json!({"src": "peer"})).kind(), FrameKind::Malformed);
    }

    #[test]
    fn request_builder_layout() {
        let mut params = Params::new();
        params.insert("on".into(), json!(true));
        let f = Frame::request(5, "Switch.Set", "tether-1", Some("shelly"), None, Some(params));
        assert_eq!(
            Value::Object(f.0),
            json!({
                "id": 5,
                "method": "Switch.Set",
                "src": "tether-1",
                "dst": "shelly",
                "params": {"on": true},
            })
        );
    }

    #[test]
    fn rejection_echoes_raw_id() {
        let f = Frame::rejection(json!("abc"), "tether-1");
        assert_eq!(
            Value::Object(f.0),
            json!({
                "id": "abc",
                "src": "tether-1",
                "error": {"code": 500, "message": "Not Implemented"},
            })
        );
    }

    #[test]
    fn error_accessor_requires_code_and_message() {
        let f = frame(json!({"id": 1, "error": {"code": 401, "message": "denied"}}));
        assert_eq!(f.error(), Some((401, "denied")));

        let f = frame(json!({"id": 1, "error": {"code": 401}}));
        assert_eq!(f.error(), None);
    }
}
