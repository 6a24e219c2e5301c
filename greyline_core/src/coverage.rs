use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// One instrumentable point in the target program, identified by the
/// instrumentation site (function or module name) and a line number.
///
/// `Ord` is derived so coverage sets iterate in a stable order, which keeps
/// [`path_id`] deterministic without an explicit sort step.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Encode, Decode,
)]
pub struct Location {
    pub site: String,
    pub line: u32,
}

impl Location {
    pub fn new(site: impl Into<String>, line: u32) -> Self {
        Self {
            site: site.into(),
            line,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.site, self.line)
    }
}

/// The set of locations exercised by one execution. A `BTreeSet` keeps the
/// elements ordered, so two executions covering the same locations always
/// produce identical iteration order and therefore identical path ids.
pub type CoverageSet = BTreeSet<Location>;

/// A stable identity for one distinct execution path: the MD5 digest of the
/// ordered location list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathId([u8; 16]);

impl fmt::Display for PathId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Computes the [`PathId`] of a coverage set.
///
/// The digest is fed each location in set order with unambiguous separators,
/// so the id depends only on set membership, never on insertion order.
pub fn path_id(coverage: &CoverageSet) -> PathId {
    let mut ctx = md5::Context::new();
    for location in coverage {
        ctx.consume(location.site.as_bytes());
        ctx.consume([0u8]);
        ctx.consume(location.line.to_le_bytes());
        ctx.consume([0xffu8]);
    }
    PathId(ctx.compute().0)
}

/// Maintains the running union of every location observed across the run and
/// reports, per execution, which locations are new.
///
/// The global set is monotonically non-decreasing; `observe` has no failure
/// modes, it is pure set algebra.
#[derive(Debug, Default)]
pub struct CoverageTracker {
    global: CoverageSet,
}

impl CoverageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unions `execution` into the global set. Returns whether the execution
    /// touched at least one never-seen location, together with exactly the
    /// newly added locations (empty when nothing was new).
    pub fn observe(&mut self, execution: &CoverageSet) -> (bool, CoverageSet) {
        let delta: CoverageSet = execution.difference(&self.global).cloned().collect();
        let is_novel = !delta.is_empty();
        self.global.extend(delta.iter().cloned());
        (is_novel, delta)
    }

    pub fn global(&self) -> &CoverageSet {
        &self.global
    }

    /// The headline "covered lines" metric.
    pub fn covered_count(&self) -> usize {
        self.global.len()
    }
}
