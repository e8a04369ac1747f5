//! Breakpoint bookkeeping.
//!
//! This module centralizes breakpoint lifecycle tracking so the hook bridge
//! only has to ask "is there an enabled breakpoint at (source, line)?". The
//! store keeps two indexes: by id (stable handles for the host API) and by
//! location (ordered, so a source's breakpoints can be replaced or listed
//! as one block).

pub mod condition;

use std::collections::{BTreeMap, HashMap};

pub use condition::{HitCondition, LogSegment, LogTemplate};

/// Unique identifier for a breakpoint managed by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BreakpointId(u64);

impl BreakpointId
{
    /// Create a new identifier from a raw value.
    #[must_use]
    pub const fn from_raw(value: u64) -> Self
    {
        Self(value)
    }

    /// Get the raw numeric representation (useful for logging / errors).
    #[must_use]
    pub const fn raw(self) -> u64
    {
        self.0
    }
}

/// Source-independent part of a breakpoint, as requested by the client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BreakpointSpec
{
    /// Expression that must be truthy in the top frame for the breakpoint to fire.
    pub condition: Option<String>,
    /// Predicate over the hit counter.
    pub hit_condition: Option<HitCondition>,
    /// When set the breakpoint is a log point: it emits output and never stops.
    pub log_message: Option<LogTemplate>,
}

/// One breakpoint tracked by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breakpoint
{
    /// Unique identifier for this breakpoint.
    pub id: BreakpointId,
    /// Normalized source path.
    pub source: String,
    /// 1-based line number.
    pub line: i64,
    /// Whether the breakpoint is currently enabled and will trigger.
    pub enabled: bool,
    /// Conditions and log template.
    pub spec: BreakpointSpec,
    /// Number of times the location was reached with a truthy condition.
    pub hit_count: u64,
}

/// Breakpoint table keyed by id and by `(source, line)`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BreakpointStore
{
    next_id: u64,
    by_id: HashMap<BreakpointId, Breakpoint>,
    by_location: BTreeMap<(String, i64), BreakpointId>,
}

impl BreakpointStore
{
    /// Create a new empty breakpoint store.
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    fn allocate_id(&mut self) -> BreakpointId
    {
        self.next_id = self.next_id.wrapping_add(1);
        BreakpointId::from_raw(self.next_id)
    }

    /// Add (or replace) the breakpoint at `(source, line)`.
    ///
    /// Replacing keeps the existing id but resets the hit counter.
    pub fn add(&mut self, source: &str, line: i64, spec: BreakpointSpec) -> BreakpointId
    {
        let key = (normalize(source), line);
        if let Some(id) = self.by_location.get(&key).copied() {
            if let Some(bp) = self.by_id.get_mut(&id) {
                bp.spec = spec;
                bp.enabled = true;
                bp.hit_count = 0;
                return id;
            }
        }

        let id = self.allocate_id();
        self.by_id.insert(
            id,
            Breakpoint {
                id,
                source: key.0.clone(),
                line,
                enabled: true,
                spec,
                hit_count: 0,
            },
        );
        self.by_location.insert(key, id);
        id
    }

    /// Replace every breakpoint of `source` with `lines`.
    pub fn set_source(&mut self, source: &str, lines: Vec<(i64, BreakpointSpec)>) -> Vec<BreakpointId>
    {
        self.clear_source(source);
        lines
            .into_iter()
            .map(|(line, spec)| self.add(source, line, spec))
            .collect()
    }

    /// Remove every breakpoint of `source`.
    pub fn clear_source(&mut self, source: &str)
    {
        let source = normalize(source);
        let lines: Vec<i64> = self
            .by_location
            .range((source.clone(), i64::MIN)..=(source.clone(), i64::MAX))
            .map(|((_, line), _)| *line)
            .collect();
        for line in lines {
            self.remove(&source, line);
        }
    }

    /// Remove the breakpoint at `(source, line)`, returning it if present.
    pub fn remove(&mut self, source: &str, line: i64) -> Option<Breakpoint>
    {
        let id = self.by_location.remove(&(normalize(source), line))?;
        self.by_id.remove(&id)
    }

    /// Look up the breakpoint at `(source, line)`.
    #[must_use]
    pub fn get(&self, source: &str, line: i64) -> Option<&Breakpoint>
    {
        let id = self.by_location.get(&(normalize(source), line))?;
        self.by_id.get(id)
    }

    /// Mutable lookup used by the hook bridge to update hit counters.
    pub fn get_mut(&mut self, source: &str, line: i64) -> Option<&mut Breakpoint>
    {
        let id = self.by_location.get(&(normalize(source), line))?;
        self.by_id.get_mut(id)
    }

    /// Look up by id.
    #[must_use]
    pub fn by_id(&self, id: BreakpointId) -> Option<&Breakpoint>
    {
        self.by_id.get(&id)
    }

    /// Enable or disable a breakpoint. Returns `false` for unknown ids.
    pub fn set_enabled(&mut self, id: BreakpointId, enabled: bool) -> bool
    {
        self.by_id.get_mut(&id).map_or(false, |bp| {
            bp.enabled = enabled;
            true
        })
    }

    /// All breakpoints, ordered by source then line.
    #[must_use]
    pub fn list(&self) -> Vec<&Breakpoint>
    {
        self.by_location
            .values()
            .filter_map(|id| self.by_id.get(id))
            .collect()
    }

    /// Number of breakpoints.
    #[must_use]
    pub fn len(&self) -> usize
    {
        self.by_id.len()
    }

    /// `true` if no breakpoint is set.
    #[must_use]
    pub fn is_empty(&self) -> bool
    {
        self.by_id.is_empty()
    }

    /// Remove everything.
    pub fn clear(&mut self)
    {
        self.by_id.clear();
        self.by_location.clear();
    }
}

/// Normalize a source path for comparison: forward slashes, no `./` prefix.
#[must_use]
pub fn normalize(path: &str) -> String
{
    let path = path.replace('\\', "/");
    path.strip_prefix("./").map_or(path.clone(), str::to_string)
}
