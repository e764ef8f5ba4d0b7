//! Tool-call accumulation and snapshot de-duplication.
//!
//! Fragments of the same tool call are merged under an [`AccumulatorKey`].
//! Every meaningful change produces a canonical JSON snapshot; a snapshot
//! identical to the last one delivered for its key is never produced again.

use std::collections::BTreeMap;
use std::fmt;

use rustc_hash::FxHashMap;
use serde::Serialize;

use super::{FragmentLocator, MergeMode, ToolCallFragment};

/// Identity of one in-flight tool call.
///
/// Orders index keys before minted keys, each numerically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AccumulatorKey {
    /// `idx:<n>`: chunk-reported index.
    Index(u32),
    /// `response:<n>`: minted the first time an item id is seen.
    Response(u64),
}

impl fmt::Display for AccumulatorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccumulatorKey::Index(n) => write!(f, "idx:{n}"),
            AccumulatorKey::Response(n) => write!(f, "response:{n}"),
        }
    }
}

/// A partially built tool call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCallAccumulator {
    pub id: Option<String>,
    pub name: Option<String>,
    /// Raw argument text; a prefix of (or the whole) final JSON payload.
    pub arguments: String,
}

impl ToolCallAccumulator {
    fn merge(&mut self, fragment: ToolCallFragment) {
        if let Some(id) = fragment.id.filter(|id| !id.is_empty()) {
            self.id = Some(id);
        }
        if let Some(name) = fragment.name.filter(|name| !name.is_empty()) {
            self.name = Some(name);
        }
        if let Some(arguments) = fragment.arguments {
            match fragment.mode {
                MergeMode::Append => self.arguments.push_str(&arguments),
                MergeMode::Replace => self.arguments = arguments,
            }
        }
    }

    fn has_name(&self) -> bool {
        self.name.as_deref().is_some_and(|name| !name.is_empty())
    }

    /// Render the canonical snapshot JSON for the current state.
    #[must_use]
    pub fn snapshot_json(&self) -> String {
        let name = self.name.as_deref().unwrap_or_default();
        let args = canonical_arguments(&self.arguments);
        let snapshot = ToolCallSnapshot {
            tool: name,
            tool_name: name,
            args: &args,
            arguments: &args,
            id: self.id.as_deref(),
            tool_call_id: self.id.as_deref(),
        };
        // Serializing borrowed strings and a `Value` cannot fail.
        serde_json::to_string(&snapshot).unwrap_or_default()
    }
}

#[derive(Serialize)]
struct ToolCallSnapshot<'a> {
    tool: &'a str,
    tool_name: &'a str,
    args: &'a serde_json::Value,
    arguments: &'a serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<&'a str>,
}

/// Parse buffered argument text into the value placed in a snapshot.
///
/// Incomplete JSON is wrapped as `{"raw": <text>}` so the snapshot stays
/// valid JSON mid-stream; an empty buffer becomes `{}`.
#[must_use]
pub fn canonical_arguments(buffer: &str) -> serde_json::Value {
    if buffer.trim().is_empty() {
        return serde_json::Value::Object(serde_json::Map::new());
    }
    match serde_json::from_str::<serde_json::Value>(buffer) {
        Ok(value) => value,
        Err(_) => {
            let mut map = serde_json::Map::with_capacity(1);
            map.insert(
                "raw".to_string(),
                serde_json::Value::String(buffer.to_string()),
            );
            serde_json::Value::Object(map)
        }
    }
}

/// Per-stream table of in-flight tool calls.
#[derive(Debug, Default)]
pub struct ToolCallTracker {
    calls: BTreeMap<AccumulatorKey, ToolCallAccumulator>,
    item_keys: FxHashMap<String, AccumulatorKey>,
    last_emitted: FxHashMap<AccumulatorKey, String>,
    next_response_seq: u64,
}

impl ToolCallTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    /// Tracked keys in key order.
    pub fn keys(&self) -> impl Iterator<Item = AccumulatorKey> + '_ {
        self.calls.keys().copied()
    }

    #[must_use]
    pub fn get(&self, key: AccumulatorKey) -> Option<&ToolCallAccumulator> {
        self.calls.get(&key)
    }

    /// Resolve the key a fragment belongs to, minting and registering a
    /// `response:<n>` key for item ids seen for the first time.
    pub fn resolve_key(&mut self, locator: &FragmentLocator) -> AccumulatorKey {
        match locator {
            FragmentLocator::Index(index) => AccumulatorKey::Index(*index),
            FragmentLocator::Item(ids) => {
                let known = ids.iter().find_map(|id| self.item_keys.get(id).copied());
                let key = known.unwrap_or_else(|| {
                    let key = AccumulatorKey::Response(self.next_response_seq);
                    self.next_response_seq += 1;
                    key
                });
                for id in ids {
                    if !id.is_empty() {
                        self.item_keys.entry(id.clone()).or_insert(key);
                    }
                }
                key
            }
        }
    }

    /// Resolve the fragment's key, then [`update`](Self::update).
    pub fn ingest(&mut self, fragment: ToolCallFragment) -> Option<String> {
        let key = self.resolve_key(&fragment.locator);
        self.update(key, fragment)
    }

    /// Merge `fragment` into the call stored under `key` and return a new
    /// snapshot when it differs from the last one delivered for that key.
    ///
    /// Snapshots are held back while the call has no name yet; the terminal
    /// [`force_emit`](Self::force_emit) pass delivers them regardless.
    pub fn update(&mut self, key: AccumulatorKey, fragment: ToolCallFragment) -> Option<String> {
        let call = self.calls.entry(key).or_default();
        call.merge(fragment);
        if !call.has_name() {
            return None;
        }
        let snapshot = call.snapshot_json();
        self.record_if_new(key, snapshot)
    }

    /// Terminal emission for one key: returns the current snapshot unless
    /// exactly that snapshot was already delivered for the key.
    ///
    /// Forcing bypasses the hold on nameless calls, not the dedup table: a
    /// call whose complete snapshot already went out live is not repeated,
    /// so every key surfaces at least once and its final content at most once.
    pub fn force_emit(&mut self, key: AccumulatorKey) -> Option<String> {
        let snapshot = self.calls.get(&key)?.snapshot_json();
        self.record_if_new(key, snapshot)
    }

    /// Run [`force_emit`](Self::force_emit) over every tracked key in key order.
    pub fn finish(&mut self) -> Vec<String> {
        let keys: Vec<AccumulatorKey> = self.calls.keys().copied().collect();
        keys.into_iter()
            .filter_map(|key| self.force_emit(key))
            .collect()
    }

    fn record_if_new(&mut self, key: AccumulatorKey, snapshot: String) -> Option<String> {
        if self.last_emitted.get(&key) == Some(&snapshot) {
            return None;
        }
        self.last_emitted.insert(key, snapshot.clone());
        Some(snapshot)
    }
}
