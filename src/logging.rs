//! Structured logging: a `tracing` subscriber that renders to stderr and also
//! mirrors every record into the 64-line ring buffer shared with the guest
//! UART output (`SPEC_FULL.md` §6), so a future UI has one place to read
//! recent diagnostics and recent firmware output from.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Maximum number of lines retained; matches the guest UART ring (§6).
pub const RING_CAPACITY: usize = 64;
/// Each ring line is truncated to this many characters, matching the UART ring.
pub const LINE_MAX_CHARS: usize = 47;

/// A fixed-size ring buffer of recent log/UART lines, shared between the
/// logging subscriber and `Session`'s UART line accumulator.
#[derive(Debug, Default)]
pub struct LogRing {
    inner: Mutex<VecDeque<String>>,
}

impl LogRing {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(VecDeque::with_capacity(RING_CAPACITY)),
        })
    }

    /// Pushes a line, truncating it and evicting the oldest entry if full.
    pub fn push(&self, line: &str) {
        let truncated: String = line.chars().take(LINE_MAX_CHARS).collect();
        let mut buf = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if buf.len() == RING_CAPACITY {
            buf.pop_front();
        }
        buf.push_back(truncated);
    }

    /// Returns a snapshot of the current ring contents, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<String> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}

/// Collects the `message` field (and a couple of common ones) out of a
/// `tracing::Event` into a single formatted line.
#[derive(Default)]
struct MessageVisitor {
    message: Option<String>,
    tag: Option<String>,
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "message" => self.message = Some(value.to_string()),
            "tag" => self.tag = Some(value.to_string()),
            _ => {}
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        match field.name() {
            "message" if self.message.is_none() => self.message = Some(format!("{value:?}")),
            "tag" if self.tag.is_none() => self.tag = Some(format!("{value:?}")),
            _ => {}
        }
    }
}

/// A `tracing_subscriber::Layer` that appends a flattened "LEVEL tag: message"
/// line into a `LogRing` for every event, independent of the stderr `fmt` layer.
pub struct RingLayer {
    ring: Arc<LogRing>,
}

impl RingLayer {
    #[must_use]
    pub const fn new(ring: Arc<LogRing>) -> Self {
        Self { ring }
    }
}

impl<S: Subscriber> Layer<S> for RingLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let level = *event.metadata().level();
        let target = event.metadata().target();
        let tag = visitor.tag.unwrap_or_else(|| target.to_string());
        let message = visitor.message.unwrap_or_default();
        self.ring.push(&format!("{level} {tag}: {message}"));
    }
}

/// Verbosity knobs translated from repeated `-v`/`-q` CLI flags into an
/// `EnvFilter` default directive. `RUST_LOG`, if set, always takes precedence.
#[must_use]
pub fn default_filter_directive(verbose: u8, quiet: u8) -> &'static str {
    let level = i16::from(verbose) - i16::from(quiet);
    if level <= -2 {
        "error"
    } else if level == -1 {
        "warn"
    } else if level == 0 {
        "info"
    } else if level == 1 {
        "debug"
    } else {
        "trace"
    }
}

/// Installs the global `tracing` subscriber: an `EnvFilter`-gated `fmt` layer
/// for stderr plus a `RingLayer` mirroring everything into `ring`.
pub fn init(ring: Arc<LogRing>, verbose: u8, quiet: u8) {
    let directive = default_filter_directive(verbose, quiet);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);
    let ring_layer = RingLayer::new(ring);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(ring_layer)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_evicts_oldest_when_full() {
        let ring = LogRing::new();
        for i in 0..(RING_CAPACITY + 5) {
            ring.push(&format!("line {i}"));
        }
        let snapshot = ring.snapshot();
        assert_eq!(snapshot.len(), RING_CAPACITY);
        assert_eq!(snapshot[0], "line 5");
        assert_eq!(snapshot[RING_CAPACITY - 1], format!("line {}", RING_CAPACITY + 4));
    }

    #[test]
    fn test_ring_truncates_long_lines() {
        let ring = LogRing::new();
        let long = "x".repeat(200);
        ring.push(&long);
        let snapshot = ring.snapshot();
        assert_eq!(snapshot[0].chars().count(), LINE_MAX_CHARS);
    }

    #[test]
    fn test_default_filter_directive_levels() {
        assert_eq!(default_filter_directive(0, 0), "info");
        assert_eq!(default_filter_directive(1, 0), "debug");
        assert_eq!(default_filter_directive(2, 0), "trace");
        assert_eq!(default_filter_directive(0, 1), "warn");
        assert_eq!(default_filter_directive(0, 2), "error");
    }
}
