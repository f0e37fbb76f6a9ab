//! Security document sync (SPEC_FULL.md §4.8).
//!
//! The document's contents are opaque to this core beyond one check: it must
//! declare at least one user, or it is rejected to guard against an empty
//! document locking every agent out.

use base64::{engine::general_purpose::STANDARD, Engine};
use serde_json::Value;
use tracing::warn;

use crate::kv::KvClient;

const SECURITY_PATH: &str = "/v1/kv/appmesh/security";

/// Collaborator that applies a parsed security document locally. Validating
/// and enforcing JWT/user policy is an external concern (SPEC_FULL.md §1
/// Non-goals); this core only decodes, validates non-emptiness, and hands
/// the document off.
pub trait SecuritySink: Send + Sync {
    fn update(&self, document: Value);
}

/// Decodes and applies the security document currently stored at `security`,
/// if any. Returns true if a document was applied.
pub async fn sync(kv: &KvClient, sink: &dyn SecuritySink) -> bool {
    let resp = kv.get(SECURITY_PATH, &[("raw", "true")]).await;
    if !resp.is_success() || resp.body.is_empty() {
        return false;
    }
    apply_encoded(&resp.body, sink)
}

fn apply_encoded(raw: &str, sink: &dyn SecuritySink) -> bool {
    let decoded = match STANDARD.decode(raw.trim_matches('"')) {
        Ok(d) => d,
        Err(e) => {
            warn!(error = %e, "security document is not valid base64");
            return false;
        }
    };
    let document: Value = match serde_json::from_slice(&decoded) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "security document is not valid JSON");
            return false;
        }
    };
    if !has_users(&document) {
        warn!("rejecting empty security document to avoid accidental lockout");
        return false;
    }
    sink.update(document);
    true
}

fn has_users(document: &Value) -> bool {
    document
        .get("jwtUsers")
        .and_then(Value::as_object)
        .map(|users| !users.is_empty())
        .unwrap_or(false)
}

/// Publishes a new security document, guarded against clobbering an existing
/// one when `check_existence` is true.
pub async fn save(kv: &KvClient, document: &Value, check_existence: bool) -> bool {
    if check_existence {
        let existing = kv.get(SECURITY_PATH, &[]).await;
        if existing.is_success() && !existing.body.is_empty() {
            warn!("refusing to overwrite existing security document");
            return false;
        }
    }
    let encoded = STANDARD.encode(document.to_string());
    let (status, _) = kv.put(SECURITY_PATH, &[], &format!("\"{}\"", encoded)).await;
    status == 200
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Default)]
    struct RecordingSink {
        last: Mutex<Option<Value>>,
    }

    impl SecuritySink for RecordingSink {
        fn update(&self, document: Value) {
            *self.last.lock().unwrap() = Some(document);
        }
    }

    #[test]
    fn rejects_empty_jwt_users() {
        let sink = RecordingSink::default();
        let doc = serde_json::json!({"jwtUsers": {}});
        let encoded = STANDARD.encode(doc.to_string());
        assert!(!apply_encoded(&encoded, &sink));
        assert!(sink.last.lock().unwrap().is_none());
    }

    #[test]
    fn accepts_document_with_users() {
        let sink = RecordingSink::default();
        let doc = serde_json::json!({"jwtUsers": {"admin": {}}});
        let encoded = STANDARD.encode(doc.to_string());
        assert!(apply_encoded(&encoded, &sink));
        assert!(sink.last.lock().unwrap().is_some());
    }

    #[test]
    fn rejects_malformed_base64() {
        let sink = RecordingSink::default();
        assert!(!apply_encoded("not-base64!!", &sink));
    }

    #[tokio::test]
    async fn sync_applies_document_from_store() {
        let server = MockServer::start().await;
        let doc = serde_json::json!({"jwtUsers": {"admin": {}}});
        let encoded = STANDARD.encode(doc.to_string());
        Mock::given(method("GET"))
            .and(path("/v1/kv/appmesh/security"))
            .respond_with(ResponseTemplate::new(200).set_body_string(encoded))
            .mount(&server)
            .await;

        let kv = KvClient::new(server.uri());
        let sink = RecordingSink::default();
        assert!(sync(&kv, &sink).await);
    }

    #[tokio::test]
    async fn save_refuses_overwrite_when_key_exists() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/kv/appmesh/security"))
            .respond_with(ResponseTemplate::new(200).set_body_string("existing"))
            .mount(&server)
            .await;

        let kv = KvClient::new(server.uri());
        let doc = serde_json::json!({"jwtUsers": {"admin": {}}});
        assert!(!save(&kv, &doc, true).await);
    }
}
