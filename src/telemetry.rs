// src/telemetry.rs
//
// Grounded in `backend::telemetry` (tracing subscriber setup +
// `spawn_blocking_with_tracing`). The engine is a library, not a binary, so it
// does not call `set_global_default` itself — embedders own their own
// subscriber — but it ships the same subscriber-construction helper so an
// embedder (or this crate's own integration tests) gets identical output to
// the rest of the `summa` family.

use tracing::Subscriber;
use tracing_subscriber::{EnvFilter, Registry, fmt, layer::SubscriberExt};

/// Log an error using the alternate selector so the full `anyhow`/`thiserror`
/// source chain is emitted, not just the top-level message.
pub fn log_error(e: impl Into<anyhow::Error>) {
    let e: anyhow::Error = e.into();
    tracing::error!("{e:#}");
}

pub fn get_subscriber(default_env_filter: impl Into<String>) -> impl Subscriber + Sync + Send {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_env_filter.into()));
    let stderr = fmt::Layer::new()
        .with_writer(std::io::stderr)
        .with_span_events(fmt::format::FmtSpan::CLOSE);
    Registry::default().with(env_filter).with(stderr)
}

/// The §7 redaction field set. Applied to any `serde_json::Value` before it
/// is logged (event payloads, hook metadata) — never applied to what's
/// actually persisted, only to what reaches a log line.
const REDACTED_FIELDS: &[&str] = &["email", "phone", "ssn", "password", "token", "secret"];

pub fn redact(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                if REDACTED_FIELDS
                    .iter()
                    .any(|f| k.eq_ignore_ascii_case(f))
                {
                    out.insert(k.clone(), serde_json::Value::String("[REDACTED]".into()));
                } else {
                    out.insert(k.clone(), redact(v));
                }
            }
            serde_json::Value::Object(out)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(redact).collect())
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn redacts_sensitive_fields_recursively() {
        let input = json!({
            "holder_id": "abc",
            "contact": { "email": "a@b.com", "phone": "555" },
            "password": "hunter2",
            "notes": "keep me",
        });
        let redacted = redact(&input);
        assert_eq!(redacted["contact"]["email"], "[REDACTED]");
        assert_eq!(redacted["contact"]["phone"], "[REDACTED]");
        assert_eq!(redacted["password"], "[REDACTED]");
        assert_eq!(redacted["notes"], "keep me");
        assert_eq!(redacted["holder_id"], "abc");
    }
}
