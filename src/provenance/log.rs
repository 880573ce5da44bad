use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::sync::{Arc, Mutex};

/// Typed value attached to a provenance event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ProvenanceValue {
    Flag(bool),
    Bytes(u64),
    Note(String),
    Uri(String),
    Digest(String),
    Timestamp(DateTime<Utc>),
}

impl ProvenanceValue {
    pub fn note(text: impl Into<String>) -> Self {
        Self::Note(text.into())
    }

    pub fn uri(uri: impl Into<String>) -> Self {
        Self::Uri(uri.into())
    }

    pub fn now() -> Self {
        Self::Timestamp(Utc::now())
    }
}

/// One recorded event. Serialises as a single-key JSON object so document
/// order always matches insertion order.
#[derive(Debug, Clone, PartialEq)]
pub struct ProvenanceEntry {
    pub key: String,
    pub value: ProvenanceValue,
}

impl Serialize for ProvenanceEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(&self.key, &self.value)?;
        map.end()
    }
}

/// Append-only, insertion-ordered audit trail for one processing request.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ProvenanceLog {
    entries: Vec<ProvenanceEntry>,
}

impl ProvenanceLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, key: impl Into<String>, value: ProvenanceValue) {
        self.entries.push(ProvenanceEntry {
            key: key.into(),
            value,
        });
    }

    /// Appends every entry of `other`, preserving its internal order.
    pub fn merge(&mut self, other: ProvenanceLog) {
        self.entries.extend(other.entries);
    }

    pub fn entries(&self) -> &[ProvenanceEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// First value recorded under `key`, if any.
    pub fn get(&self, key: &str) -> Option<&ProvenanceValue> {
        self.entries
            .iter()
            .find(|entry| entry.key == key)
            .map(|entry| &entry.value)
    }

    /// Whether any key starts with the given unit namespace.
    pub fn has_scope(&self, scope: &str) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.key.starts_with(scope))
    }
}

/// Thread-safe handle to the job-scoped log, shared by reference across the
/// setup task, every unit in the group, and finalise.
///
/// Lock scope never spans an await point; entries are cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct SharedProvenanceLog {
    inner: Arc<Mutex<ProvenanceLog>>,
}

impl SharedProvenanceLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one event, namespacing the key by the emitting scope so
    /// parallel units cannot collide.
    pub fn record(&self, scope: &str, event: &str, value: ProvenanceValue) {
        let mut log = self.inner.lock().unwrap();
        log.record(scoped_key(scope, event), value);
    }

    /// Folds a log produced by an isolated execution into this one.
    pub fn merge(&self, other: ProvenanceLog) {
        let mut log = self.inner.lock().unwrap();
        log.merge(other);
    }

    /// Consistent copy of the log. Finalise takes its snapshot only after
    /// every group unit has reached a terminal state.
    pub fn snapshot(&self) -> ProvenanceLog {
        self.inner.lock().unwrap().clone()
    }

    pub fn scoped(&self, scope: impl Into<String>) -> ProvenanceScope {
        ProvenanceScope {
            log: self.clone(),
            scope: scope.into(),
        }
    }
}

/// Writer bound to one unit's namespace.
#[derive(Debug, Clone)]
pub struct ProvenanceScope {
    log: SharedProvenanceLog,
    scope: String,
}

impl ProvenanceScope {
    pub fn record(&self, event: &str, value: ProvenanceValue) {
        self.log.record(&self.scope, event, value);
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }
}

fn scoped_key(scope: &str, event: &str) -> String {
    format!("{scope} - {event}")
}
