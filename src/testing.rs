//! In-memory search transport for unit tests.

use crate::search::{SearchError, SearchTransport};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Mutex;

type Responder = dyn Fn(&str, &Value) -> Result<Value, SearchError> + Send + Sync;

/// Answers every request through a closure and records `(url, body)` pairs.
pub struct ScriptedTransport {
    responder: Box<Responder>,
    calls: Mutex<Vec<(String, Value)>>,
}

impl ScriptedTransport {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&str, &Value) -> Result<Value, SearchError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls_to(&self, fragment: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(url, _)| url.contains(fragment))
            .count()
    }
}

#[async_trait]
impl SearchTransport for ScriptedTransport {
    async fn post_json(&self, url: &str, body: &Value) -> Result<Value, SearchError> {
        self.calls
            .lock()
            .unwrap()
            .push((url.to_string(), body.clone()));
        (self.responder)(url, body)
    }
}

/// Response page with bare hits (`_source` empty)
pub fn page(total: u64, scroll_id: Option<&str>, ids: &[&str]) -> Value {
    let hits: Vec<Value> = ids
        .iter()
        .map(|id| json!({"_id": id, "_source": {}}))
        .collect();
    page_of(total, scroll_id, hits)
}

/// Response page with caller-built hits
pub fn page_of(total: u64, scroll_id: Option<&str>, hits: Vec<Value>) -> Value {
    let mut body = json!({
        "hits": {
            "total": {"value": total, "relation": "eq"},
            "hits": hits
        }
    });
    if let Some(id) = scroll_id {
        body["_scroll_id"] = json!(id);
    }
    body
}

/// Wallet whose primary query is recognisable from the request body
pub fn queried_wallet(body: &Value) -> Option<&str> {
    body["query"]["bool"]["should"][0]["match"]["sender"].as_str()
}

/// Transaction ids requested by a `terms` query
pub fn queried_ids(body: &Value) -> Vec<String> {
    body["query"]["bool"]["should"][0]["terms"]
        .as_object()
        .and_then(|terms| terms.values().next())
        .and_then(Value::as_array)
        .map(|ids| {
            ids.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
