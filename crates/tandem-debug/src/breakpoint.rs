//! Breakpoint storage and matching
//!
//! Breakpoints are keyed by source id and one-based line, deduped by column
//! within a line. A breakpoint set at column 0 matches the first statement
//! reached on a new line; an explicit column must match exactly. The "new
//! line" part is tracked by the server's last-executed-line so the same line
//! cannot re-trigger while execution stays on it.

use crate::call_frame::TextPosition;
use rustc_hash::FxHashMap;

/// One breakpoint as set by a debugger front end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptBreakpoint {
    /// Zero-based line
    pub line: u32,
    /// Zero-based column; 0 means "first statement on the line"
    pub column: u32,
    /// Optional condition source; empty means unconditional
    pub condition: String,
}

impl ScriptBreakpoint {
    /// An unconditional breakpoint.
    pub fn new(line: u32, column: u32) -> ScriptBreakpoint {
        ScriptBreakpoint {
            line,
            column,
            condition: String::new(),
        }
    }

    /// A conditional breakpoint.
    pub fn with_condition(line: u32, column: u32, condition: impl Into<String>) -> ScriptBreakpoint {
        ScriptBreakpoint {
            line,
            column,
            condition: condition.into(),
        }
    }
}

type BreakpointsInLine = Vec<ScriptBreakpoint>;
type LineToBreakpoints = FxHashMap<i64, BreakpointsInLine>;

/// All breakpoints known to one debug server.
#[derive(Debug, Default)]
pub struct BreakpointStore {
    source_id_to_breakpoints: FxHashMap<i64, LineToBreakpoints>,
}

/// Outcome of a set request: the opaque breakpoint id plus the position the
/// breakpoint actually landed on. An empty id means the request was refused
/// (bad source id or an identical breakpoint already exists).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetBreakpointResult {
    /// `"{sourceID}:{line}:{column}"`, or empty on refusal
    pub breakpoint_id: String,
    /// Zero-based line the breakpoint is on
    pub actual_line: u32,
    /// Zero-based column the breakpoint is on
    pub actual_column: u32,
}

impl BreakpointStore {
    /// Set a breakpoint, deduping by column within the line.
    pub fn set(&mut self, source_id: i64, breakpoint: ScriptBreakpoint) -> SetBreakpointResult {
        if source_id == 0 {
            return SetBreakpointResult {
                breakpoint_id: String::new(),
                actual_line: breakpoint.line,
                actual_column: breakpoint.column,
            };
        }
        let lines = self.source_id_to_breakpoints.entry(source_id).or_default();
        let in_line = lines.entry(i64::from(breakpoint.line) + 1).or_default();
        if in_line.iter().any(|bp| bp.column == breakpoint.column) {
            return SetBreakpointResult {
                breakpoint_id: String::new(),
                actual_line: breakpoint.line,
                actual_column: breakpoint.column,
            };
        }
        let result = SetBreakpointResult {
            breakpoint_id: format!("{}:{}:{}", source_id, breakpoint.line, breakpoint.column),
            actual_line: breakpoint.line,
            actual_column: breakpoint.column,
        };
        in_line.push(breakpoint);
        result
    }

    /// Remove by id. Malformed ids are ignored.
    pub fn remove(&mut self, breakpoint_id: &str) {
        let tokens: Vec<&str> = breakpoint_id.split(':').collect();
        if tokens.len() != 3 {
            return;
        }
        let Ok(source_id) = tokens[0].parse::<i64>() else {
            return;
        };
        let Ok(line) = tokens[1].parse::<u32>() else {
            return;
        };
        let Ok(column) = tokens[2].parse::<u32>() else {
            return;
        };

        let Some(lines) = self.source_id_to_breakpoints.get_mut(&source_id) else {
            return;
        };
        let Some(in_line) = lines.get_mut(&(i64::from(line) + 1)) else {
            return;
        };
        if let Some(index) = in_line.iter().position(|bp| bp.column == column) {
            in_line.remove(index);
        }
    }

    /// Drop every breakpoint.
    pub fn clear(&mut self) {
        self.source_id_to_breakpoints.clear();
    }

    /// The breakpoint matching `position`, honoring the column-0
    /// first-statement-on-a-new-line rule against `last_executed_line`.
    pub fn find(
        &self,
        source_id: i64,
        position: TextPosition,
        last_executed_line: i64,
    ) -> Option<&ScriptBreakpoint> {
        let lines = self.source_id_to_breakpoints.get(&source_id)?;
        let line = position.zero_based_line();
        let column = position.column();
        if line < 0 || column < 0 {
            return None;
        }
        let in_line = lines.get(&(line + 1))?;
        in_line.iter().find(|bp| {
            let break_line = i64::from(bp.line);
            let break_column = i64::from(bp.column);
            (line != last_executed_line && line == break_line && break_column == 0)
                || (line == break_line && column == break_column)
        })
    }
}
