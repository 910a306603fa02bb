//! Paused-execution call frames
//!
//! While a script is paused the debugger holds a chain of call frames
//! mirroring the live stack, innermost frame first. The chain is built by
//! the engine hook adapters; the engine-specific part of a frame (a JS scope
//! handle or a Ruby binding) rides along as a plain payload instead of a
//! parallel class hierarchy.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use tandem_core::{ScriptType, Value};

/// A line/column position in a script source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextPosition {
    line_one_based: i64,
    column_zero_based: i64,
}

impl TextPosition {
    /// From a one-based line and zero-based column.
    pub fn from_one_based_line(line: i64, column: i64) -> TextPosition {
        TextPosition {
            line_one_based: line,
            column_zero_based: column,
        }
    }

    /// From a zero-based line and column.
    pub fn from_zero_based(line: i64, column: i64) -> TextPosition {
        TextPosition {
            line_one_based: line + 1,
            column_zero_based: column,
        }
    }

    /// Zero-based line.
    pub fn zero_based_line(&self) -> i64 {
        self.line_one_based - 1
    }

    /// One-based line.
    pub fn one_based_line(&self) -> i64 {
        self.line_one_based
    }

    /// Zero-based column.
    pub fn column(&self) -> i64 {
        self.column_zero_based
    }
}

/// One frame of the paused call stack.
///
/// Frames form a singly linked chain through `caller`. A frame's position
/// and payload are updated in place as execution advances within it.
pub struct CallFrame {
    script_type: ScriptType,
    caller: Option<Rc<CallFrame>>,
    source_id: Cell<i64>,
    position: Cell<TextPosition>,
    function_name: RefCell<String>,
    payload: RefCell<Value>,
}

impl CallFrame {
    /// Push a new frame on top of `caller`.
    pub fn create(
        script_type: ScriptType,
        caller: Option<Rc<CallFrame>>,
        source_id: i64,
        position: TextPosition,
        function_name: String,
        payload: Value,
    ) -> Rc<CallFrame> {
        Rc::new(CallFrame {
            script_type,
            caller,
            source_id: Cell::new(source_id),
            position: Cell::new(position),
            function_name: RefCell::new(function_name),
            payload: RefCell::new(payload),
        })
    }

    /// The engine that produced this frame.
    pub fn script_type(&self) -> ScriptType {
        self.script_type
    }

    /// The calling frame, if any.
    pub fn caller(&self) -> Option<Rc<CallFrame>> {
        self.caller.clone()
    }

    /// Engine source identifier of the executing code.
    pub fn source_id(&self) -> i64 {
        self.source_id.get()
    }

    /// Current position within the source.
    pub fn position(&self) -> TextPosition {
        self.position.get()
    }

    /// Name of the executing function, empty for top-level code.
    pub fn function_name(&self) -> String {
        self.function_name.borrow().clone()
    }

    /// The engine-specific frame handle (JS scope or Ruby binding).
    pub fn payload(&self) -> Value {
        self.payload.borrow().clone()
    }

    /// Advance this frame to a new position.
    pub fn update(&self, source_id: i64, position: TextPosition, payload: Value) {
        self.source_id.set(source_id);
        self.position.set(position);
        *self.payload.borrow_mut() = payload;
    }
}

impl std::fmt::Debug for CallFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "CallFrame({} source {} line {})",
            self.script_type,
            self.source_id(),
            self.position().one_based_line()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_and_update() {
        let outer = CallFrame::create(
            ScriptType::Js,
            None,
            1,
            TextPosition::from_one_based_line(10, 0),
            "main".to_string(),
            Value::Undefined,
        );
        let inner = CallFrame::create(
            ScriptType::Js,
            Some(outer.clone()),
            1,
            TextPosition::from_one_based_line(20, 4),
            "helper".to_string(),
            Value::Undefined,
        );
        assert!(Rc::ptr_eq(&inner.caller().unwrap(), &outer));
        assert!(outer.caller().is_none());
        assert_eq!(inner.position().zero_based_line(), 19);

        inner.update(
            1,
            TextPosition::from_one_based_line(21, 0),
            Value::Undefined,
        );
        assert_eq!(inner.position().one_based_line(), 21);
        assert_eq!(inner.function_name(), "helper");
    }
}
