//! Typed view of the instrumenter's coverage documents.
//!
//! A document maps each source file to its counters: `s` (statements), `f`
//! (functions) and `b` (branch arms), keyed by location id, plus the maps that
//! place each id in the source. Fields the aggregator does not need are
//! ignored.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Position {
    pub line: u32,
    #[serde(default)]
    pub column: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FunctionMeta {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decl: Option<Range>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loc: Option<Range>,
}

impl FunctionMeta {
    /// Declaration line, whichever form the instrumenter used.
    pub fn start_line(&self) -> u32 {
        self.decl
            .map(|r| r.start.line)
            .or(self.line)
            .or(self.loc.map(|r| r.start.line))
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BranchMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub locations: Vec<Range>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loc: Option<Range>,
}

impl BranchMeta {
    pub fn start_line(&self) -> u32 {
        self.line
            .or(self.loc.map(|r| r.start.line))
            .or(self.locations.first().map(|r| r.start.line))
            .unwrap_or(0)
    }
}

/// Counters for one source file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileCoverage {
    #[serde(default)]
    pub path: String,
    #[serde(rename = "statementMap", default)]
    pub statement_map: BTreeMap<String, Range>,
    #[serde(default)]
    pub s: BTreeMap<String, u64>,
    #[serde(rename = "fnMap", default)]
    pub fn_map: BTreeMap<String, FunctionMeta>,
    #[serde(default)]
    pub f: BTreeMap<String, u64>,
    #[serde(rename = "branchMap", default)]
    pub branch_map: BTreeMap<String, BranchMeta>,
    #[serde(default)]
    pub b: BTreeMap<String, Vec<u64>>,
}

impl FileCoverage {
    /// Add `other`'s hits to ours. Location metadata is unioned, first seen
    /// wins.
    pub fn merge(&mut self, other: FileCoverage) {
        if self.path.is_empty() {
            self.path = other.path;
        }
        for (id, range) in other.statement_map {
            self.statement_map.entry(id).or_insert(range);
        }
        for (id, hits) in other.s {
            *self.s.entry(id).or_insert(0) += hits;
        }
        for (id, meta) in other.fn_map {
            self.fn_map.entry(id).or_insert(meta);
        }
        for (id, hits) in other.f {
            *self.f.entry(id).or_insert(0) += hits;
        }
        for (id, meta) in other.branch_map {
            self.branch_map.entry(id).or_insert(meta);
        }
        for (id, arms) in other.b {
            let ours = self.b.entry(id).or_default();
            if ours.len() < arms.len() {
                ours.resize(arms.len(), 0);
            }
            for (slot, hits) in ours.iter_mut().zip(arms) {
                *slot += hits;
            }
        }
    }

    /// Hits per source line: the highest count of any statement starting on
    /// that line.
    pub fn line_hits(&self) -> BTreeMap<u32, u64> {
        let mut lines = BTreeMap::new();
        for (id, range) in &self.statement_map {
            let hits = self.s.get(id).copied().unwrap_or(0);
            let slot = lines.entry(range.start.line).or_insert(0);
            if hits > *slot {
                *slot = hits;
            }
        }
        lines
    }
}

/// Source path -> counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct CoverageMap(pub BTreeMap<String, FileCoverage>);

impl CoverageMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_value(value: serde_json::Value) -> serde_json::Result<Self> {
        let mut map: CoverageMap = serde_json::from_value(value)?;
        for (key, file) in map.0.iter_mut() {
            if file.path.is_empty() {
                file.path = key.clone();
            }
        }
        Ok(map)
    }

    pub fn merge(&mut self, other: CoverageMap) {
        for (key, file) in other.0 {
            match self.0.get_mut(&key) {
                Some(existing) => existing.merge(file),
                None => {
                    self.0.insert(key, file);
                }
            }
        }
    }

    pub fn files(&self) -> impl Iterator<Item = &FileCoverage> {
        self.0.values()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn range(line: u32) -> serde_json::Value {
        json!({ "start": { "line": line, "column": 0 }, "end": { "line": line, "column": 10 } })
    }

    #[test]
    fn test_merge_sums_statement_hits() {
        let mut r1 = CoverageMap::from_value(json!({
            "src/a.js": { "statementMap": { "A": range(1) }, "s": { "A": 2 } }
        }))
        .unwrap();
        let r2 = CoverageMap::from_value(json!({
            "src/a.js": {
                "statementMap": { "A": range(1), "B": range(2) },
                "s": { "A": 3, "B": 1 }
            }
        }))
        .unwrap();

        r1.merge(r2);
        let file = &r1.0["src/a.js"];
        assert_eq!(file.s["A"], 5);
        assert_eq!(file.s["B"], 1);
        assert_eq!(file.path, "src/a.js");
    }

    #[test]
    fn test_merge_is_order_independent() {
        let a = json!({ "x.js": { "s": { "1": 4 }, "f": { "1": 1 }, "b": { "1": [1, 0] } } });
        let b = json!({ "x.js": { "s": { "1": 1, "2": 7 }, "b": { "1": [0, 2, 5] } } });

        let mut ab = CoverageMap::from_value(a.clone()).unwrap();
        ab.merge(CoverageMap::from_value(b.clone()).unwrap());
        let mut ba = CoverageMap::from_value(b).unwrap();
        ba.merge(CoverageMap::from_value(a).unwrap());

        assert_eq!(ab.0["x.js"].s, ba.0["x.js"].s);
        assert_eq!(ab.0["x.js"].b["1"], vec![1, 2, 5]);
        assert_eq!(ab.0["x.js"].b, ba.0["x.js"].b);
    }

    #[test]
    fn test_merge_disjoint_files() {
        let mut m = CoverageMap::from_value(json!({ "a.js": { "s": { "1": 1 } } })).unwrap();
        m.merge(CoverageMap::from_value(json!({ "b.js": { "s": { "1": 1 } } })).unwrap());
        assert_eq!(m.len(), 2);
    }

    #[test]
    fn test_line_hits_takes_max_per_line() {
        let file: FileCoverage = serde_json::from_value(json!({
            "statementMap": { "1": range(3), "2": range(3), "3": range(4) },
            "s": { "1": 0, "2": 6, "3": 0 }
        }))
        .unwrap();
        let lines = file.line_hits();
        assert_eq!(lines[&3], 6);
        assert_eq!(lines[&4], 0);
    }

    #[test]
    fn test_accepts_legacy_function_and_branch_shapes() {
        let file: FileCoverage = serde_json::from_value(json!({
            "path": "/abs/lib.js",
            "fnMap": { "1": { "name": "(anonymous_1)", "line": 12, "loc": range(12), "skip": false } },
            "branchMap": { "1": { "line": 20, "type": "if", "locations": [range(20), range(22)] } },
            "extra": { "ignored": true }
        }))
        .unwrap();
        assert_eq!(file.fn_map["1"].start_line(), 12);
        assert_eq!(file.branch_map["1"].start_line(), 20);
        assert_eq!(file.branch_map["1"].kind, "if");
    }

    #[test]
    fn test_null_columns() {
        let file: FileCoverage = serde_json::from_value(json!({
            "statementMap": { "1": { "start": { "line": 1, "column": null }, "end": { "line": 1, "column": null } } },
            "s": { "1": 1 }
        }))
        .unwrap();
        assert_eq!(file.line_hits()[&1], 1);
    }
}
