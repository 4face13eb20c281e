// ABOUTME: The per-task register file and the save/restore stack protocol

use crate::cell::{cons, Cell};
use crate::scope::Env;
use num_traits::ToPrimitive;
use std::sync::Arc;

// ============================================================================
// State tags
// ============================================================================

// Tags below SAVE_MAX are save frames: a bitmask of registers snapshotted
// beneath the tag, pushed in the canonical order code, dynamic, lexical,
// scratch. Tags at or above SAVE_MAX are operations and occupy one cell.

pub const SAVE_CAR_CODE: i64 = 1;
pub const SAVE_CDR_CODE: i64 = 2;
pub const SAVE_CODE: i64 = SAVE_CAR_CODE | SAVE_CDR_CODE;
pub const SAVE_DYNAMIC: i64 = 4;
pub const SAVE_LEXICAL: i64 = 8;
pub const SAVE_SCRATCH: i64 = 16;
pub const SAVE_MAX: i64 = 32;

pub const PS_CHANGE_CONTEXT: i64 = SAVE_MAX;
pub const PS_EVAL_BLOCK: i64 = SAVE_MAX + 1;
pub const PS_EVAL_COMMAND: i64 = SAVE_MAX + 2;
pub const PS_EXEC_COMMAND: i64 = SAVE_MAX + 3;
pub const PS_EVAL_ARGUMENTS: i64 = SAVE_MAX + 4;
pub const PS_EVAL_ARGUMENTS_BUILTIN: i64 = SAVE_MAX + 5;
pub const PS_EVAL_ELEMENT: i64 = SAVE_MAX + 6;
pub const PS_EVAL_ELEMENT_BUILTIN: i64 = SAVE_MAX + 7;
pub const PS_EVAL_MEMBER: i64 = SAVE_MAX + 8;
pub const PS_EXEC_BUILTIN: i64 = SAVE_MAX + 9;
pub const PS_EXEC_METHOD: i64 = SAVE_MAX + 10;
pub const PS_EXEC_SYNTAX: i64 = SAVE_MAX + 11;
pub const PS_EXEC_IF: i64 = SAVE_MAX + 12;
pub const PS_EXEC_WHILE_BODY: i64 = SAVE_MAX + 13;
pub const PS_EXEC_WHILE_TEST: i64 = SAVE_MAX + 14;
pub const PS_EXEC_DEFINE: i64 = SAVE_MAX + 15;
pub const PS_EXEC_PUBLIC: i64 = SAVE_MAX + 16;
pub const PS_EXEC_DYNAMIC: i64 = SAVE_MAX + 17;
pub const PS_EXEC_SETENV: i64 = SAVE_MAX + 18;
pub const PS_EXEC_SET: i64 = SAVE_MAX + 19;
pub const PS_EXEC_SPLICE: i64 = SAVE_MAX + 20;
pub const PS_RETURN: i64 = SAVE_MAX + 21;

// ============================================================================
// Registers
// ============================================================================

/// The per-task machine state. The stack encodes suspended frames as a
/// cons list; the scratch holds intermediate results, newest first.
pub struct Registers {
    pub code: Cell,
    pub dynamic: Option<Arc<Env>>,
    pub lexical: Cell,
    pub scratch: Cell,
    pub stack: Cell,
}

impl Registers {
    pub fn new(dynamic: Arc<Env>, lexical: Cell) -> Self {
        Registers {
            code: Cell::Null,
            dynamic: Some(dynamic),
            lexical,
            scratch: cons(Cell::Null, Cell::Null),
            stack: Cell::Null,
        }
    }

    /// The tag on top of the stack
    pub fn state(&self) -> Option<i64> {
        match self.stack.car() {
            Cell::Int(v) => v.to_i64(),
            _ => None,
        }
    }

    fn push(&mut self, v: Cell) {
        self.stack = cons(v, self.stack.clone());
    }

    fn pop(&mut self) -> Cell {
        let top = self.stack.car();
        self.stack = self.stack.cdr();
        top
    }

    fn encode_dynamic(&self) -> Cell {
        match &self.dynamic {
            Some(e) => Cell::Env(e.clone()),
            None => Cell::Null,
        }
    }

    /// Push each requested frame. An operation tag is one cell; a save
    /// frame snapshots the flagged registers beneath its tag, unless the
    /// frame on top already covers the same bits.
    pub fn new_states(&mut self, tags: &[i64]) {
        for &tag in tags {
            if tag >= SAVE_MAX {
                self.push(Cell::int(tag));
                continue;
            }
            if let Some(top) = self.state() {
                if top < SAVE_MAX && top & tag == tag {
                    continue;
                }
            }
            if tag & SAVE_CODE != 0 {
                let snapshot = match tag & SAVE_CODE {
                    SAVE_CAR_CODE => self.code.car(),
                    SAVE_CDR_CODE => self.code.cdr(),
                    _ => self.code.clone(),
                };
                self.push(snapshot);
            }
            if tag & SAVE_DYNAMIC != 0 {
                let snapshot = self.encode_dynamic();
                self.push(snapshot);
            }
            if tag & SAVE_LEXICAL != 0 {
                let snapshot = self.lexical.clone();
                self.push(snapshot);
            }
            if tag & SAVE_SCRATCH != 0 {
                let snapshot = self.scratch.clone();
                self.push(snapshot);
            }
            self.push(Cell::int(tag));
        }
    }

    /// Pop the top frame. With `restore`, each saved register is assigned
    /// back; without, the payload is dropped.
    pub fn remove_state(&mut self, restore: bool) {
        let tag = match self.state() {
            Some(tag) => tag,
            None => return,
        };
        self.pop();
        if tag >= SAVE_MAX {
            return;
        }
        if tag & SAVE_SCRATCH != 0 {
            let v = self.pop();
            if restore {
                self.scratch = v;
            }
        }
        if tag & SAVE_LEXICAL != 0 {
            let v = self.pop();
            if restore {
                self.lexical = v;
            }
        }
        if tag & SAVE_DYNAMIC != 0 {
            let v = self.pop();
            if restore {
                self.dynamic = match v {
                    Cell::Env(e) => Some(e),
                    _ => None,
                };
            }
        }
        if tag & SAVE_CODE != 0 {
            let v = self.pop();
            if restore {
                self.code = v;
            }
        }
    }

    pub fn replace_states(&mut self, tags: &[i64]) {
        self.remove_state(false);
        self.new_states(tags);
    }

    /// Push a result onto the scratch
    pub fn scratch_push(&mut self, v: Cell) {
        self.scratch = cons(v, self.scratch.clone());
    }

    /// Drop the newest scratch entry, keeping the scratch non-empty
    pub fn scratch_drop(&mut self) {
        self.scratch = self.scratch.cdr();
        if self.scratch.is_null() {
            self.scratch = cons(Cell::Null, Cell::Null);
        }
    }

    /// Replace the newest scratch entry with a result
    pub fn scratch_replace(&mut self, v: Cell) {
        self.scratch = cons(v, self.scratch.cdr());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::list_of;
    use crate::scope::Scope;

    fn setup() -> Registers {
        let mut r = Registers::new(Env::root(), Cell::Scope(Scope::root()));
        r.code = list_of(&[Cell::sym("head"), Cell::sym("tail")]);
        r.scratch = cons(Cell::sym("result"), Cell::Null);
        r
    }

    fn snapshot(r: &Registers) -> (String, String, String) {
        (
            format!("{}", r.code),
            format!("{}", r.scratch),
            format!("{}", r.stack),
        )
    }

    #[test]
    fn test_save_then_remove_is_identity() {
        for flags in 1..SAVE_MAX {
            let mut r = setup();
            let before = snapshot(&r);
            r.new_states(&[flags]);
            r.remove_state(false);
            assert_eq!(snapshot(&r), before, "flags {}", flags);
        }
    }

    #[test]
    fn test_save_then_restore_rolls_back() {
        let mut r = setup();
        let before = snapshot(&r);
        r.new_states(&[SAVE_CODE | SAVE_DYNAMIC | SAVE_LEXICAL | SAVE_SCRATCH]);

        // Clobber everything
        r.code = Cell::Null;
        r.dynamic = None;
        r.lexical = Cell::Null;
        r.scratch = cons(Cell::sym("junk"), Cell::Null);

        r.remove_state(true);
        assert_eq!(snapshot(&r), before);
        assert!(r.dynamic.is_some());
    }

    #[test]
    fn test_save_car_and_cdr_variants() {
        let mut r = setup();
        r.new_states(&[SAVE_CAR_CODE]);
        r.code = Cell::Null;
        r.remove_state(true);
        assert_eq!(format!("{}", r.code), "head");

        let mut r = setup();
        r.new_states(&[SAVE_CDR_CODE]);
        r.code = Cell::Null;
        r.remove_state(true);
        assert_eq!(format!("{}", r.code), "(tail)");
    }

    #[test]
    fn test_operation_tags_have_no_payload() {
        let mut r = setup();
        let stack_before = format!("{}", r.stack);
        r.new_states(&[PS_EVAL_COMMAND]);
        assert_eq!(r.state(), Some(PS_EVAL_COMMAND));
        r.remove_state(false);
        assert_eq!(format!("{}", r.stack), stack_before);
    }

    #[test]
    fn test_covered_save_is_coalesced() {
        let mut r = setup();
        r.new_states(&[SAVE_CODE | SAVE_SCRATCH]);
        let depth = format!("{}", r.stack);
        // Already covered by the frame on top: skipped entirely
        r.new_states(&[SAVE_CDR_CODE]);
        assert_eq!(format!("{}", r.stack), depth);
        // Not covered: pushed as its own frame
        r.new_states(&[SAVE_LEXICAL]);
        assert_ne!(format!("{}", r.stack), depth);
    }

    #[test]
    fn test_replace_states_swaps_frames() {
        let mut r = setup();
        r.new_states(&[PS_EVAL_BLOCK]);
        r.replace_states(&[PS_EVAL_COMMAND]);
        assert_eq!(r.state(), Some(PS_EVAL_COMMAND));
        r.remove_state(false);
        assert_eq!(r.state(), None);
    }
}
