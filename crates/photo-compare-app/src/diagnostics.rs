//! User-visible diagnostic ring buffer fed by `tracing` events.
//!
//! [`DiagnosticLayer`] turns every event into a `stage | action | detail`
//! entry, redacts secrets, and appends it to a bounded [`DiagnosticLog`]
//! that evicts the oldest entry when full. The widget's diagnostic panel
//! reads the log; the host error channel is separate.

use std::collections::VecDeque;
use std::fmt::{self, Write as _};
use std::sync::{Arc, Mutex};

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

use crate::redact_sensitive;

/// One recorded event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticEntry {
    /// Monotonic sequence number since the log was created.
    pub sequence: u64,
    /// Event level.
    pub level: Level,
    /// `stage` field, or the event target.
    pub stage: String,
    /// `action` field, or `-`.
    pub action: String,
    /// Message and remaining fields, redacted.
    pub detail: String,
}

impl fmt::Display for DiagnosticEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} | {} | {} | {}",
            self.level, self.stage, self.action, self.detail
        )
    }
}

#[derive(Debug)]
struct Ring {
    capacity: usize,
    next_sequence: u64,
    entries: VecDeque<DiagnosticEntry>,
}

/// Bounded, shareable diagnostic log.
#[derive(Debug, Clone)]
pub struct DiagnosticLog {
    ring: Arc<Mutex<Ring>>,
}

impl DiagnosticLog {
    /// Log keeping at most `capacity` entries (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            ring: Arc::new(Mutex::new(Ring {
                capacity,
                next_sequence: 0,
                entries: VecDeque::with_capacity(capacity),
            })),
        }
    }

    /// Capacity.
    pub fn capacity(&self) -> usize {
        self.ring.lock().map(|ring| ring.capacity).unwrap_or(0)
    }

    /// Appends an entry, evicting the oldest when full.
    pub fn push(&self, level: Level, stage: &str, action: &str, detail: &str) {
        let Ok(mut ring) = self.ring.lock() else {
            return;
        };
        if ring.entries.len() == ring.capacity {
            ring.entries.pop_front();
        }
        let sequence = ring.next_sequence;
        ring.next_sequence += 1;
        ring.entries.push_back(DiagnosticEntry {
            sequence,
            level,
            stage: stage.to_string(),
            action: action.to_string(),
            detail: redact_sensitive(detail),
        });
    }

    /// Snapshot, oldest first.
    pub fn entries(&self) -> Vec<DiagnosticEntry> {
        self.ring
            .lock()
            .map(|ring| ring.entries.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot rendered as text lines, oldest first.
    pub fn lines(&self) -> Vec<String> {
        self.entries().iter().map(ToString::to_string).collect()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.ring.lock().map(|ring| ring.entries.len()).unwrap_or(0)
    }

    /// Returns `true` when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every entry.
    pub fn clear(&self) {
        if let Ok(mut ring) = self.ring.lock() {
            ring.entries.clear();
        }
    }

    /// `tracing` layer appending to this log.
    pub fn layer(&self) -> DiagnosticLayer {
        DiagnosticLayer {
            log: self.clone(),
            min_level: Level::INFO,
        }
    }
}

/// `tracing_subscriber` layer feeding a [`DiagnosticLog`].
#[derive(Debug, Clone)]
pub struct DiagnosticLayer {
    log: DiagnosticLog,
    min_level: Level,
}

impl DiagnosticLayer {
    /// Also records events down to `level` (default `INFO`).
    pub fn with_min_level(mut self, level: Level) -> Self {
        self.min_level = level;
        self
    }
}

impl<S> Layer<S> for DiagnosticLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        // Level ordering: TRACE > DEBUG > INFO > WARN > ERROR.
        if *metadata.level() > self.min_level {
            return;
        }

        let mut fields = FieldCollector::default();
        event.record(&mut fields);
        let stage = fields
            .stage
            .clone().unwrap_or_else(|| metadata.target().to_string());
        let action = fields.action.clone().unwrap_or_else(|| "-".to_string());
        self.log
            .push(*metadata.level(), &stage, &action, &fields.detail());
    }
}

#[derive(Default)]
struct FieldCollector {
    stage: Option<String>,
    action: Option<String>,
    message: Option<String>,
    rest: String,
}

impl FieldCollector {
    fn detail(&self) -> String {
        match (&self.message, self.rest.is_empty()) {
            (Some(message), true) => message.clone(),
            (Some(message), false) => format!("{message} {}", self.rest),
            (None, _) => self.rest.clone(),
        }
    }
}

impl Visit for FieldCollector {
    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "stage" => self.stage = Some(value.to_string()),
            "action" => self.action = Some(value.to_string()),
            "message" => self.message = Some(value.to_string()),
            name => {
                if !self.rest.is_empty() {
                    self.rest.push(' ');
                }
                let _ = write!(self.rest, "{name}={value}");
            }
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        match field.name() {
            "message" => self.message = Some(format!("{value:?}")),
            "stage" | "action" => self.record_str(field, &format!("{value:?}")),
            name => {
                if !self.rest.is_empty() {
                    self.rest.push(' ');
                }
                let _ = write!(self.rest, "{name}={value:?}");
            }
        }
    }
}
