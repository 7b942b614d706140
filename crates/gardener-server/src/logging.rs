use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

const RING_CAPACITY: usize = 500;

/// Shared in-memory log ring served by the monitoring endpoint. Holds the
/// last few hundred events as pre-rendered JSON lines.
pub type LogRing = Arc<Mutex<VecDeque<String>>>;

pub fn new_ring() -> LogRing {
    Arc::new(Mutex::new(VecDeque::with_capacity(RING_CAPACITY)))
}

pub(crate) struct RingLayer {
    pub ring: LogRing,
}

struct MessageVisitor<'a> {
    message: &'a mut String,
}

impl tracing::field::Visit for MessageVisitor<'_> {
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            *self.message = value.to_string();
        }
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message.clear();
            use std::fmt::Write;
            let _ = write!(self.message, "{value:?}");
            // Strip surrounding quotes added by Debug on &str
            if self.message.starts_with('"') && self.message.ends_with('"') {
                *self.message = self.message[1..self.message.len() - 1].to_string();
            }
        }
    }
}

impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for RingLayer {
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let level = match *event.metadata().level() {
            tracing::Level::ERROR => "err",
            tracing::Level::WARN => "warn",
            tracing::Level::INFO => "info",
            tracing::Level::DEBUG => "debug",
            tracing::Level::TRACE => return,
        };

        let target = event.metadata().target();
        let category = if target.contains("cycle") || target.contains("merge") {
            "cycle"
        } else if target.contains("agent") || target.contains("claude") || target.contains("executor")
        {
            "agent"
        } else {
            "system"
        };

        let mut message = String::new();
        event.record(&mut MessageVisitor {
            message: &mut message,
        });

        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        let json = serde_json::json!({
            "ts": ts,
            "level": level,
            "message": message,
            "category": category,
        })
        .to_string();

        if let Ok(mut ring) = self.ring.lock() {
            ring.push_back(json);
            if ring.len() > RING_CAPACITY {
                ring.pop_front();
            }
        }
    }
}
