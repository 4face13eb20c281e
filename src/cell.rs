// ABOUTME: Cell is the universal value: atoms, pairs, contexts, callables

use crate::binding::Binding;
use crate::conduit::Conduit;
use crate::scope::{Env, Scope};
use crate::task::Task;
use crate::error::{ShellError, ShellResult};
use lazy_static::lazy_static;
use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::{Signed, ToPrimitive, Zero};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Largest string length that goes through the intern table
pub const INTERN_LIMIT: usize = 8;

// ============================================================================
// Lock helpers
// ============================================================================

// A poisoned lock only means another task failed mid-update; the cell data
// itself is still a valid Cell, so recover the guard instead of unwinding.

pub(crate) fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

pub(crate) fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

pub(crate) fn mutex_lock<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    lock.lock().unwrap_or_else(|e| e.into_inner())
}

// ============================================================================
// Interned symbols
// ============================================================================

/// An interned identifier. Two symbols with equal text are the same
/// allocation, so equality and hashing are pointer operations.
#[derive(Clone)]
pub struct Sym(Arc<str>);

impl Sym {
    pub fn text(&self) -> &str {
        &self.0
    }

    fn id(&self) -> usize {
        Arc::as_ptr(&self.0).cast::<()>() as usize
    }
}

impl PartialEq for Sym {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Sym {}

impl std::hash::Hash for Sym {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl fmt::Debug for Sym {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

lazy_static! {
    static ref SYMBOLS: Mutex<HashMap<String, Sym>> = Mutex::new(HashMap::new());
    static ref STRINGS: Mutex<HashMap<String, Arc<str>>> = Mutex::new(HashMap::new());
    static ref HANDLES: Mutex<HandleTable> = Mutex::new(HandleTable::new());
}

/// Intern a symbol
pub fn sym(text: &str) -> Sym {
    let mut table = mutex_lock(&SYMBOLS);
    if let Some(s) = table.get(text) {
        return s.clone();
    }
    let s = Sym(Arc::from(text));
    table.insert(text.to_string(), s.clone());
    s
}

fn intern_str(text: &str) -> Arc<str> {
    if text.len() > INTERN_LIMIT {
        return Arc::from(text);
    }
    let mut table = mutex_lock(&STRINGS);
    if let Some(s) = table.get(text) {
        return s.clone();
    }
    let s: Arc<str> = Arc::from(text);
    table.insert(text.to_string(), s.clone());
    s
}

// ============================================================================
// Pairs
// ============================================================================

/// Mutable two-field node; lists are pair chains terminated by Null
pub struct Pair {
    car: RwLock<Cell>,
    cdr: RwLock<Cell>,
}

impl Pair {
    pub fn new(car: Cell, cdr: Cell) -> Arc<Self> {
        Arc::new(Pair {
            car: RwLock::new(car),
            cdr: RwLock::new(cdr),
        })
    }

    pub fn car(&self) -> Cell {
        read_lock(&self.car).clone()
    }

    pub fn cdr(&self) -> Cell {
        read_lock(&self.cdr).clone()
    }

    pub fn set_car(&self, v: Cell) {
        *write_lock(&self.car) = v;
    }

    pub fn set_cdr(&self, v: Cell) {
        *write_lock(&self.cdr) = v;
    }
}

// ============================================================================
// Cell
// ============================================================================

/// The universal value
#[derive(Clone)]
pub enum Cell {
    Null,
    Bool(bool),
    Int(Arc<BigInt>),
    Rational(Arc<BigRational>),
    Float(f64),
    /// Wrapped process exit value; truthy when zero
    Status(i64),
    Symbol(Sym),
    Str(Arc<str>),
    Pair(Arc<Pair>),
    Scope(Arc<Scope>),
    /// A scope viewed through its public face
    Object(Arc<Scope>),
    Env(Arc<Env>),
    Conduit(Arc<dyn Conduit>),
    Binding(Arc<Binding>),
    Continuation(Arc<Continuation>),
    Task(Arc<Task>),
}

/// A captured (scratch, stack) pair; invoking it resumes the captor
pub struct Continuation {
    pub scratch: Cell,
    pub stack: Cell,
}

pub fn cons(car: Cell, cdr: Cell) -> Cell {
    Cell::Pair(Pair::new(car, cdr))
}

/// Build a proper list from the items in order
pub fn list_of(items: &[Cell]) -> Cell {
    let mut out = Cell::Null;
    for item in items.iter().rev() {
        out = cons(item.clone(), out);
    }
    out
}

impl Cell {
    pub fn sym(text: &str) -> Cell {
        Cell::Symbol(sym(text))
    }

    pub fn str(text: &str) -> Cell {
        Cell::Str(intern_str(text))
    }

    pub fn int(v: i64) -> Cell {
        Cell::Int(Arc::new(BigInt::from(v)))
    }

    pub fn bool(v: bool) -> Cell {
        Cell::Bool(v)
    }

    pub fn status(v: i64) -> Cell {
        Cell::Status(v)
    }

    /// Head of a pair; Null for anything else. The skip loops in the
    /// evaluator rely on Null-tolerance here, as does list traversal.
    pub fn car(&self) -> Cell {
        match self {
            Cell::Pair(p) => p.car(),
            _ => Cell::Null,
        }
    }

    /// Tail of a pair; Null for anything else
    pub fn cdr(&self) -> Cell {
        match self {
            Cell::Pair(p) => p.cdr(),
            _ => Cell::Null,
        }
    }

    pub fn cadr(&self) -> Cell {
        self.cdr().car()
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    pub fn is_pair(&self) -> bool {
        matches!(self, Cell::Pair(_))
    }

    /// Atom: neither a pair nor a context
    pub fn is_atom(&self) -> bool {
        matches!(
            self,
            Cell::Bool(_)
                | Cell::Int(_)
                | Cell::Rational(_)
                | Cell::Float(_)
                | Cell::Status(_)
                | Cell::Symbol(_)
                | Cell::Str(_)
        )
    }

    /// Simple values survive the builtin argv path as themselves; anything
    /// else is re-expanded from its symbol
    pub fn is_simple(&self) -> bool {
        self.is_atom()
    }

    pub fn is_context(&self) -> bool {
        matches!(
            self,
            Cell::Scope(_) | Cell::Object(_) | Cell::Env(_) | Cell::Conduit(_) | Cell::Str(_)
        )
    }

    /// Truthiness: False, Null, and non-zero Status are false
    pub fn is_true(&self) -> bool {
        match self {
            Cell::Null => false,
            Cell::Bool(b) => *b,
            Cell::Status(s) => *s == 0,
            _ => true,
        }
    }

    /// Raw text of a symbol or string; external representation otherwise
    pub fn raw(&self) -> String {
        match self {
            Cell::Symbol(s) => s.text().to_string(),
            Cell::Str(s) => s.to_string(),
            other => format!("{}", other),
        }
    }

    pub fn as_symbol(&self) -> Option<&Sym> {
        match self {
            Cell::Symbol(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_pair(&self) -> ShellResult<&Arc<Pair>> {
        match self {
            Cell::Pair(p) => Ok(p),
            other => Err(ShellError::type_error(format!("not a pair: {}", other))),
        }
    }

    pub fn as_conduit(&self) -> ShellResult<&Arc<dyn Conduit>> {
        match self {
            Cell::Conduit(c) => Ok(c),
            other => Err(ShellError::type_error(format!("not a conduit: {}", other))),
        }
    }

    pub fn as_task(&self) -> ShellResult<&Arc<Task>> {
        match self {
            Cell::Task(t) => Ok(t),
            other => Err(ShellError::type_error(format!("not a task: {}", other))),
        }
    }

    /// Identity of the backing allocation, when there is one
    pub fn identity(&self) -> Option<usize> {
        match self {
            Cell::Int(x) => Some(Arc::as_ptr(x) as usize),
            Cell::Rational(x) => Some(Arc::as_ptr(x) as usize),
            Cell::Symbol(s) => Some(s.id()),
            Cell::Str(s) => Some(Arc::as_ptr(s).cast::<()>() as usize),
            Cell::Pair(p) => Some(Arc::as_ptr(p) as usize),
            Cell::Scope(s) | Cell::Object(s) => Some(Arc::as_ptr(s) as usize),
            Cell::Env(e) => Some(Arc::as_ptr(e) as usize),
            Cell::Conduit(c) => Some(Arc::as_ptr(c).cast::<()>() as usize),
            Cell::Binding(b) => Some(Arc::as_ptr(b) as usize),
            Cell::Continuation(k) => Some(Arc::as_ptr(k) as usize),
            Cell::Task(t) => Some(Arc::as_ptr(t) as usize),
            _ => None,
        }
    }

    /// Identity comparison. Strings compare by value, other contexts by
    /// allocation; unboxed atoms by value.
    pub fn same(&self, other: &Cell) -> bool {
        match (self, other) {
            (Cell::Null, Cell::Null) => true,
            (Cell::Bool(a), Cell::Bool(b)) => a == b,
            (Cell::Int(a), Cell::Int(b)) => a == b,
            (Cell::Rational(a), Cell::Rational(b)) => a == b,
            (Cell::Float(a), Cell::Float(b)) => a == b,
            (Cell::Status(a), Cell::Status(b)) => a == b,
            (Cell::Symbol(a), Cell::Symbol(b)) => a == b,
            (Cell::Str(a), Cell::Str(b)) => a == b,
            _ => match (self.identity(), other.identity()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }

    /// Name used in handle tokens and type errors
    pub fn kind_name(&self) -> &'static str {
        match self {
            Cell::Null => "null",
            Cell::Bool(_) => "boolean",
            Cell::Int(_) => "integer",
            Cell::Rational(_) => "rational",
            Cell::Float(_) => "float",
            Cell::Status(_) => "status",
            Cell::Symbol(_) => "symbol",
            Cell::Str(_) => "string",
            Cell::Pair(_) => "pair",
            Cell::Scope(_) => "scope",
            Cell::Object(_) => "object",
            Cell::Env(_) => "environment",
            Cell::Conduit(c) => c.kind_name(),
            Cell::Binding(_) => "binding",
            Cell::Continuation(_) => "continuation",
            Cell::Task(_) => "task",
        }
    }
}

impl fmt::Debug for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

// ============================================================================
// External representation
// ============================================================================

fn escape_into(out: &mut fmt::Formatter<'_>, text: &str) -> fmt::Result {
    write!(out, "\"")?;
    for c in text.chars() {
        match c {
            '\n' => write!(out, "\\n")?,
            '\t' => write!(out, "\\t")?,
            '\r' => write!(out, "\\r")?,
            '\\' => write!(out, "\\\\")?,
            '"' => write!(out, "\\\"")?,
            '\0' => write!(out, "\\0")?,
            c => write!(out, "{}", c)?,
        }
    }
    write!(out, "\"")
}

impl fmt::Display for Cell {
    /// The wire format: what conduit writes emit and the reader accepts
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Null => write!(f, "()"),
            Cell::Bool(true) => write!(f, "true"),
            Cell::Bool(false) => write!(f, "false"),
            Cell::Int(v) => write!(f, "{}", v),
            Cell::Rational(v) => write!(f, "{}/{}", v.numer(), v.denom()),
            Cell::Float(v) => write!(f, "{:?}", v),
            Cell::Status(v) => write!(f, "{}", v),
            Cell::Symbol(s) => write!(f, "{}", s.text()),
            Cell::Str(s) => escape_into(f, s),
            Cell::Pair(_) => {
                write!(f, "(")?;
                let mut head = self.clone();
                let mut first = true;
                loop {
                    let p = match head {
                        Cell::Pair(p) => p,
                        Cell::Null => break,
                        other => {
                            write!(f, " . {}", other)?;
                            break;
                        }
                    };
                    if !first {
                        write!(f, " ")?;
                    }
                    first = false;
                    write!(f, "{}", p.car())?;
                    head = p.cdr();
                }
                write!(f, ")")
            }
            Cell::Task(t) => {
                // A finished task stands for its result
                if let Some(result) = t.finished_result() {
                    write!(f, "{}", result)
                } else {
                    write!(f, "#<{}:{:x}>", self.kind_name(), handle_for(self))
                }
            }
            _ => write!(f, "#<{}:{:x}>", self.kind_name(), handle_for(self)),
        }
    }
}

// ============================================================================
// Handle table
// ============================================================================

// Context cells round-trip through textual conduits as `#<kind:handle>`
// tokens. Handles are per-cell stable; the table pins the cell so a handle
// written into a pipe can always be dereferenced on the other side.

struct HandleTable {
    next: u64,
    by_id: HashMap<usize, u64>,
    by_handle: HashMap<u64, Cell>,
}

impl HandleTable {
    fn new() -> Self {
        HandleTable {
            next: 1,
            by_id: HashMap::new(),
            by_handle: HashMap::new(),
        }
    }
}

/// Stable handle for a heap-backed cell
pub fn handle_for(cell: &Cell) -> u64 {
    let id = match cell.identity() {
        Some(id) => id,
        None => return 0,
    };
    let mut table = mutex_lock(&HANDLES);
    if let Some(h) = table.by_id.get(&id) {
        return *h;
    }
    let h = table.next;
    table.next += 1;
    table.by_id.insert(id, h);
    table.by_handle.insert(h, cell.clone());
    h
}

/// Resolve a handle token back to the live cell. Unknown kinds or handles
/// yield Null.
pub fn deref(kind: &str, handle: u64) -> Cell {
    let table = mutex_lock(&HANDLES);
    match table.by_handle.get(&handle) {
        Some(cell) if cell.kind_name() == kind => cell.clone(),
        _ => Cell::Null,
    }
}

// ============================================================================
// Numeric tower
// ============================================================================

/// Numbers promote Integer -> Rational -> Float
#[derive(Clone, Debug)]
pub enum Number {
    Int(BigInt),
    Rational(BigRational),
    Float(f64),
}

impl Number {
    fn to_f64(&self) -> f64 {
        match self {
            Number::Int(v) => v.to_f64().unwrap_or(f64::NAN),
            Number::Rational(v) => v.to_f64().unwrap_or(f64::NAN),
            Number::Float(v) => *v,
        }
    }

    fn to_rational(&self) -> BigRational {
        match self {
            Number::Int(v) => BigRational::from_integer(v.clone()),
            Number::Rational(v) => v.clone(),
            Number::Float(_) => unreachable!("floats never demote"),
        }
    }

    fn binary(
        self,
        other: Number,
        int_op: fn(BigInt, BigInt) -> Number,
        rat_op: fn(BigRational, BigRational) -> BigRational,
        float_op: fn(f64, f64) -> f64,
    ) -> Number {
        if matches!(self, Number::Float(_)) || matches!(other, Number::Float(_)) {
            return Number::Float(float_op(self.to_f64(), other.to_f64()));
        }
        if matches!(self, Number::Rational(_)) || matches!(other, Number::Rational(_)) {
            return Number::Rational(rat_op(self.to_rational(), other.to_rational()));
        }
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => int_op(a, b),
            _ => unreachable!("floats and rationals already handled"),
        }
    }

    pub fn add(self, other: Number) -> Number {
        self.binary(other, |a, b| Number::Int(a + b), |a, b| a + b, |a, b| a + b)
    }

    pub fn sub(self, other: Number) -> Number {
        self.binary(other, |a, b| Number::Int(a - b), |a, b| a - b, |a, b| a - b)
    }

    pub fn mul(self, other: Number) -> Number {
        self.binary(other, |a, b| Number::Int(a * b), |a, b| a * b, |a, b| a * b)
    }

    /// Division; non-divisible integers yield an exact rational
    pub fn div(self, other: Number) -> ShellResult<Number> {
        match &other {
            Number::Int(v) if v.is_zero() => {
                return Err(ShellError::os("division by zero"));
            }
            Number::Rational(v) if v.is_zero() => {
                return Err(ShellError::os("division by zero"));
            }
            _ => {}
        }
        Ok(self.binary(
            other,
            |a, b| {
                if (&a % &b).is_zero() {
                    Number::Int(a / b)
                } else {
                    Number::Rational(BigRational::new(a, b))
                }
            },
            |a, b| a / b,
            |a, b| a / b,
        ))
    }

    pub fn rem(self, other: Number) -> ShellResult<Number> {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => {
                if b.is_zero() {
                    Err(ShellError::os("division by zero"))
                } else {
                    Ok(Number::Int(a % b))
                }
            }
            _ => Err(ShellError::type_error("mod: integer operands required")),
        }
    }

    pub fn compare(&self, other: &Number) -> std::cmp::Ordering {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => a.cmp(b),
            (Number::Float(_), _) | (_, Number::Float(_)) => self
                .to_f64()
                .partial_cmp(&other.to_f64())
                .unwrap_or(std::cmp::Ordering::Equal),
            _ => self.to_rational().cmp(&other.to_rational()),
        }
    }

    pub fn is_negative(&self) -> bool {
        match self {
            Number::Int(v) => v.is_negative(),
            Number::Rational(v) => v.is_negative(),
            Number::Float(v) => *v < 0.0,
        }
    }

    /// Collapse back into a cell, normalizing whole rationals to integers
    pub fn to_cell(self) -> Cell {
        match self {
            Number::Int(v) => Cell::Int(Arc::new(v)),
            Number::Rational(v) => {
                if v.is_integer() {
                    Cell::Int(Arc::new(v.to_integer()))
                } else {
                    Cell::Rational(Arc::new(v))
                }
            }
            Number::Float(v) => Cell::Float(v),
        }
    }
}

/// Parse numeric text: integer, then `p/q` rational, then float
pub fn parse_number(text: &str) -> Option<Number> {
    if let Ok(v) = text.parse::<BigInt>() {
        return Some(Number::Int(v));
    }
    if let Some((p, q)) = text.split_once('/') {
        if let (Ok(p), Ok(q)) = (p.parse::<BigInt>(), q.parse::<BigInt>()) {
            if !q.is_zero() {
                return Some(Number::Rational(BigRational::new(p, q)));
            }
        }
        return None;
    }
    text.parse::<f64>().ok().map(Number::Float)
}

impl Cell {
    /// Numeric coercion: numbers pass through, symbol and string text is
    /// parsed. Anything else is a conversion failure.
    pub fn to_number(&self) -> ShellResult<Number> {
        match self {
            Cell::Int(v) => Ok(Number::Int((**v).clone())),
            Cell::Rational(v) => Ok(Number::Rational((**v).clone())),
            Cell::Float(v) => Ok(Number::Float(*v)),
            Cell::Status(v) => Ok(Number::Int(BigInt::from(*v))),
            Cell::Symbol(_) | Cell::Str(_) => parse_number(&self.raw())
                .ok_or_else(|| ShellError::os(format!("not a number: {}", self.raw()))),
            other => Err(ShellError::type_error(format!(
                "not a number: {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbols_intern_to_identity() {
        let a = sym("walrus");
        let b = sym("walrus");
        assert!(a == b);
        assert_eq!(a.id(), b.id());

        let c = sym("oyster");
        assert!(a != c);
    }

    #[test]
    fn test_small_strings_intern_large_do_not() {
        let a = Cell::str("short");
        let b = Cell::str("short");
        assert_eq!(a.identity(), b.identity());

        let long = "much-longer-than-the-limit";
        assert!(long.len() > INTERN_LIMIT);
        let c = Cell::str(long);
        let d = Cell::str(long);
        assert_ne!(c.identity(), d.identity());
        // Value equality still holds
        assert!(c.same(&d));
    }

    #[test]
    fn test_pair_mutation() {
        let p = cons(Cell::int(1), Cell::int(2));
        let pair = p.as_pair().expect("pair");
        pair.set_car(Cell::int(9));
        assert_eq!(format!("{}", p), "(9 . 2)");
    }

    #[test]
    fn test_list_display() {
        let l = list_of(&[Cell::int(1), Cell::sym("two"), Cell::str("three")]);
        assert_eq!(format!("{}", l), "(1 two \"three\")");
        assert_eq!(format!("{}", Cell::Null), "()");
    }

    #[test]
    fn test_status_truthiness() {
        assert!(Cell::status(0).is_true());
        assert!(!Cell::status(1).is_true());
        assert!(!Cell::Bool(false).is_true());
        assert!(!Cell::Null.is_true());
        assert!(Cell::int(0).is_true());
    }

    #[test]
    fn test_number_tower_promotion() {
        let a = Cell::int(1).to_number().expect("int");
        let b = Cell::sym("2").to_number().expect("symbol coerces");
        match a.add(b) {
            Number::Int(v) => assert_eq!(v, BigInt::from(3)),
            other => panic!("expected integer, got {:?}", other),
        }

        // Non-divisible integers become exact rationals
        let q = Cell::int(1)
            .to_number()
            .expect("int")
            .div(Cell::int(3).to_number().expect("int"))
            .expect("div");
        assert_eq!(format!("{}", q.to_cell()), "1/3");

        // A float operand infects the result
        let f = Cell::int(1)
            .to_number()
            .expect("int")
            .add(Cell::Float(0.5).to_number().expect("float"));
        assert!(matches!(f, Number::Float(_)));
    }

    #[test]
    fn test_number_parse_failure() {
        assert!(Cell::sym("walrus").to_number().is_err());
        assert!(Cell::sym("1/0").to_number().is_err());
    }

    #[test]
    fn test_handle_round_trip() {
        let scope = Cell::Scope(crate::scope::Scope::root());
        let h = handle_for(&scope);
        assert!(h != 0);
        // Stable across calls
        assert_eq!(h, handle_for(&scope));
        // Round-trips to the identical cell
        let back = deref("scope", h);
        assert!(back.same(&scope));
        // Wrong kind and unknown handles yield Null
        assert!(deref("task", h).is_null());
        assert!(deref("scope", 0xdead_beef).is_null());
    }
}
