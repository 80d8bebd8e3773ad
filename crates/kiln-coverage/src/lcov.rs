//! LCOV rendering and parsing.
//!
//! ```text
//! TN:<test name>
//! SF:<source file>
//! FN:<line>,<function name>
//! FNDA:<execution count>,<function name>
//! FNF:<functions found>
//! FNH:<functions hit>
//! DA:<line>,<execution count>
//! LF:<lines found>
//! LH:<lines hit>
//! BRDA:<line>,<block>,<branch>,<taken or ->
//! BRF:<branches found>
//! BRH:<branches hit>
//! end_of_record
//! ```

use std::collections::BTreeMap;
use std::fmt::Write;

use crate::error::{CoverageError, Result};
use crate::model::{CoverageMap, FileCoverage};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionHit {
    pub line: u32,
    pub name: String,
    pub hits: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchHit {
    pub line: u32,
    pub block: u32,
    pub branch: u32,
    /// `None` when the enclosing block never ran (`-` in LCOV).
    pub taken: Option<u64>,
}

/// One `SF` ... `end_of_record` section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LcovRecord {
    pub source_file: String,
    pub functions: Vec<FunctionHit>,
    pub lines: BTreeMap<u32, u64>,
    pub branches: Vec<BranchHit>,
}

impl LcovRecord {
    pub fn from_file(file: &FileCoverage) -> Self {
        let functions = file
            .fn_map
            .iter()
            .map(|(id, meta)| FunctionHit {
                line: meta.start_line(),
                name: meta.name.clone(),
                hits: file.f.get(id).copied().unwrap_or(0),
            })
            .collect();

        let mut branches = Vec::new();
        for (block, (id, meta)) in file.branch_map.iter().enumerate() {
            let arms = file.b.get(id).cloned().unwrap_or_default();
            let arm_count = arms.len().max(meta.locations.len());
            let block_total: u64 = arms.iter().sum();
            for branch in 0..arm_count {
                let hits = arms.get(branch).copied().unwrap_or(0);
                branches.push(BranchHit {
                    line: meta.start_line(),
                    block: block as u32,
                    branch: branch as u32,
                    taken: if block_total == 0 { None } else { Some(hits) },
                });
            }
        }

        Self {
            source_file: file.path.clone(),
            functions,
            lines: file.line_hits(),
            branches,
        }
    }

    pub fn lines_hit(&self) -> usize {
        self.lines.values().filter(|h| **h > 0).count()
    }

    pub fn functions_hit(&self) -> usize {
        self.functions.iter().filter(|f| f.hits > 0).count()
    }

    pub fn branches_hit(&self) -> usize {
        self.branches.iter().filter(|b| b.taken.unwrap_or(0) > 0).count()
    }
}

/// Totals across a report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoverageSummary {
    pub files: usize,
    pub lines_found: usize,
    pub lines_hit: usize,
    pub functions_found: usize,
    pub functions_hit: usize,
    pub branches_found: usize,
    pub branches_hit: usize,
}

impl CoverageSummary {
    pub fn from_records(records: &[LcovRecord]) -> Self {
        records.iter().fold(Self::default(), |mut acc, r| {
            acc.files += 1;
            acc.lines_found += r.lines.len();
            acc.lines_hit += r.lines_hit();
            acc.functions_found += r.functions.len();
            acc.functions_hit += r.functions_hit();
            acc.branches_found += r.branches.len();
            acc.branches_hit += r.branches_hit();
            acc
        })
    }

    /// Line coverage in percent; 100 for an empty report.
    pub fn line_percent(&self) -> f64 {
        percent(self.lines_hit, self.lines_found)
    }

    pub fn function_percent(&self) -> f64 {
        percent(self.functions_hit, self.functions_found)
    }

    pub fn branch_percent(&self) -> f64 {
        percent(self.branches_hit, self.branches_found)
    }
}

fn percent(hit: usize, found: usize) -> f64 {
    if found == 0 {
        100.0
    } else {
        hit as f64 * 100.0 / found as f64
    }
}

pub fn records_from_map(map: &CoverageMap) -> Vec<LcovRecord> {
    map.files().map(LcovRecord::from_file).collect()
}

/// Render records as LCOV text.
pub fn render(records: &[LcovRecord]) -> String {
    let mut out = String::new();
    for r in records {
        out.push_str("TN:\n");
        let _ = writeln!(out, "SF:{}", r.source_file);

        for f in &r.functions {
            let _ = writeln!(out, "FN:{},{}", f.line, f.name);
        }
        for f in &r.functions {
            let _ = writeln!(out, "FNDA:{},{}", f.hits, f.name);
        }
        let _ = writeln!(out, "FNF:{}", r.functions.len());
        let _ = writeln!(out, "FNH:{}", r.functions_hit());

        for (line, hits) in &r.lines {
            let _ = writeln!(out, "DA:{line},{hits}");
        }
        let _ = writeln!(out, "LF:{}", r.lines.len());
        let _ = writeln!(out, "LH:{}", r.lines_hit());

        for b in &r.branches {
            match b.taken {
                Some(t) => {
                    let _ = writeln!(out, "BRDA:{},{},{},{}", b.line, b.block, b.branch, t);
                }
                None => {
                    let _ = writeln!(out, "BRDA:{},{},{},-", b.line, b.block, b.branch);
                }
            }
        }
        let _ = writeln!(out, "BRF:{}", r.branches.len());
        let _ = writeln!(out, "BRH:{}", r.branches_hit());
        out.push_str("end_of_record\n");
    }
    out
}

/// Parse LCOV text. Summary lines (`LF`, `LH`, ...) are recomputed, not read.
pub fn parse(text: &str) -> Result<Vec<LcovRecord>> {
    let mut records = Vec::new();
    let mut current: Option<LcovRecord> = None;
    let mut fn_lines: BTreeMap<String, u32> = BTreeMap::new();

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim();
        let err = |reason: &str| CoverageError::Lcov {
            line: line_no,
            reason: reason.to_string(),
        };

        if line.is_empty() {
            continue;
        }
        if line == "end_of_record" {
            let record = current.take().ok_or_else(|| err("end_of_record without SF"))?;
            records.push(record);
            fn_lines.clear();
            continue;
        }

        let (tag, value) = line.split_once(':').ok_or_else(|| err("missing ':'"))?;
        if tag == "SF" {
            if current.is_some() {
                return Err(err("SF inside an open record"));
            }
            current = Some(LcovRecord {
                source_file: value.to_string(),
                ..Default::default()
            });
            continue;
        }

        let Some(record) = current.as_mut() else {
            // TN and other header lines may precede SF.
            continue;
        };

        match tag {
            "FN" => {
                let (line, name) = value.split_once(',').ok_or_else(|| err("bad FN"))?;
                let line: u32 = line.parse().map_err(|_| err("bad FN line"))?;
                fn_lines.insert(name.to_string(), line);
                record.functions.push(FunctionHit {
                    line,
                    name: name.to_string(),
                    hits: 0,
                });
            }
            "FNDA" => {
                let (hits, name) = value.split_once(',').ok_or_else(|| err("bad FNDA"))?;
                let hits: u64 = hits.parse().map_err(|_| err("bad FNDA count"))?;
                match record.functions.iter_mut().find(|f| f.name == name) {
                    Some(f) => f.hits = hits,
                    None => record.functions.push(FunctionHit {
                        line: fn_lines.get(name).copied().unwrap_or(0),
                        name: name.to_string(),
                        hits,
                    }),
                }
            }
            "DA" => {
                let mut parts = value.split(',');
                let line: u32 = parts
                    .next()
                    .and_then(|p| p.parse().ok())
                    .ok_or_else(|| err("bad DA line"))?;
                let hits: u64 = parts
                    .next()
                    .and_then(|p| p.parse().ok())
                    .ok_or_else(|| err("bad DA count"))?;
                *record.lines.entry(line).or_insert(0) += hits;
            }
            "BRDA" => {
                let parts: Vec<&str> = value.split(',').collect();
                if parts.len() != 4 {
                    return Err(err("bad BRDA"));
                }
                let num = |s: &str| s.parse::<u32>().map_err(|_| err("bad BRDA number"));
                let taken = match parts[3] {
                    "-" => None,
                    t => Some(t.parse::<u64>().map_err(|_| err("bad BRDA taken"))?),
                };
                record.branches.push(BranchHit {
                    line: num(parts[0])?,
                    block: num(parts[1])?,
                    branch: num(parts[2])?,
                    taken,
                });
            }
            _ => {}
        }
    }

    if current.is_some() {
        return Err(CoverageError::Lcov {
            line: text.lines().count(),
            reason: "missing end_of_record".to_string(),
        });
    }
    Ok(records)
}
