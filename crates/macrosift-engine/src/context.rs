use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use macrosift_model::Value;

use crate::ast::Procedure;
use crate::error::EngineError;

/// Where a `set` lands in the two-tier namespace.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Scope {
    /// Local if the name already exists locally, otherwise global.
    #[default]
    Default,
    ForceLocal,
    ForceGlobal,
}

/// What a name resolves to in the execution environment.
///
/// The distinction matters: the resolution engine and the JIT variable
/// collector must not treat a procedure definition as a plain value, and a
/// `Value::Null` binding (uninitialized) is distinct from the name being
/// absent entirely.
#[derive(Clone)]
pub enum Binding {
    Value(Value),
    Procedure(Rc<Procedure>),
    Library(Rc<dyn LibraryFunc>),
}

impl std::fmt::Debug for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Binding::Value(v) => write!(f, "Value({v:?})"),
            Binding::Procedure(p) => write!(f, "Procedure({})", p.name),
            Binding::Library(_) => write!(f, "Library(..)"),
        }
    }
}

/// The type a library routine returns, used by the JIT to infer types for
/// undefined variables from how they are assigned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReturnType {
    Integer,
    String,
}

/// An emulated built-in routine. The engine looks these up by lower-cased
/// name and invokes them with a fully resolved argument list; the routine
/// reports any observable action through the context.
pub trait LibraryFunc {
    fn call(&self, ctx: &mut dyn Context, args: &[Value]) -> Result<Value, EngineError>;

    fn return_type(&self) -> ReturnType {
        ReturnType::Integer
    }
}

/// The mutable execution environment. The core consumes this by reference
/// through the whole call tree and never owns or clones it.
pub trait Context {
    /// Look `name` up in the two-tier (local, global) namespace. `None`
    /// means the name is absent, which is distinct from a binding to the
    /// uninitialized sentinel. With `global_only`, locals are skipped.
    fn get(&self, name: &str, global_only: bool) -> Option<Binding>;

    fn set(&mut self, name: &str, value: Value, scope: Scope);

    fn contains(&self, name: &str) -> bool {
        self.get(name, false).is_some()
    }

    /// Named string values recovered from the document container (drawing
    /// text, custom properties, form control text).
    fn get_doc_var(&self, name: &str) -> Option<Value>;

    /// Document metadata (author, subject, comments, ...).
    fn read_metadata_item(&self, name: &str) -> Option<Value>;

    /// A cell from the loaded workbook, if any. Coordinates are 0-based.
    fn sheet_cell(&self, sheet: &str, row: u32, col: u32) -> Option<Value>;

    /// Record an emulated action (shell command, file write, ...) for the
    /// analyst. Fire-and-forget; the core never reads these back.
    fn report_action(&mut self, action: &str, params: &[Value], description: &str);

    /// Offer an intermediate value to the IOC scanner.
    fn save_intermediate_iocs(&mut self, value: &Value);

    fn report_general_error(&mut self, msg: &str);

    /// Whether loop subtrees may be routed through the JIT fast path.
    fn do_jit(&self) -> bool {
        false
    }

    /// VBScript dialect rather than Office VBA.
    fn is_vbscript(&self) -> bool {
        false
    }

    /// Whether `name` is a recognized VB constant.
    fn is_constant_name(&self, _name: &str) -> bool {
        false
    }
}

/// A recorded emulated action.
#[derive(Clone, Debug, PartialEq)]
pub struct Action {
    pub action: String,
    pub params: Vec<Value>,
    pub description: String,
}

/// A complete in-memory [`Context`], used by hosts that drive the engine
/// directly and by the test suite.
#[derive(Default)]
pub struct InMemoryContext {
    locals: HashMap<String, Binding>,
    globals: HashMap<String, Binding>,
    doc_vars: HashMap<String, Value>,
    metadata: HashMap<String, Value>,
    sheets: HashMap<String, HashMap<(u32, u32), Value>>,
    constants: HashSet<String>,
    pub actions: Vec<Action>,
    pub iocs: Vec<Value>,
    pub errors: Vec<String>,
    pub jit: bool,
    pub vbscript: bool,
}

impl InMemoryContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_jit(mut self) -> Self {
        self.jit = true;
        self
    }

    pub fn with_vbscript(mut self) -> Self {
        self.vbscript = true;
        self
    }

    pub fn add_procedure(&mut self, proc: Procedure) {
        let name = proc.name.to_ascii_lowercase();
        self.globals.insert(name, Binding::Procedure(Rc::new(proc)));
    }

    pub fn add_library_func(&mut self, name: &str, func: Rc<dyn LibraryFunc>) {
        self.globals
            .insert(name.to_ascii_lowercase(), Binding::Library(func));
    }

    pub fn set_doc_var(&mut self, name: &str, value: impl Into<Value>) {
        self.doc_vars
            .insert(name.to_ascii_lowercase(), value.into());
    }

    pub fn set_metadata_item(&mut self, name: &str, value: impl Into<Value>) {
        self.metadata
            .insert(name.to_ascii_lowercase(), value.into());
    }

    pub fn set_sheet_cell(&mut self, sheet: &str, row: u32, col: u32, value: impl Into<Value>) {
        self.sheets
            .entry(sheet.to_ascii_lowercase())
            .or_default()
            .insert((row, col), value.into());
    }

    pub fn add_constant_name(&mut self, name: &str) {
        self.constants.insert(name.to_ascii_lowercase());
    }

    /// The current plain value of a variable, if any. Test convenience.
    pub fn value_of(&self, name: &str) -> Option<Value> {
        match self.get(name, false) {
            Some(Binding::Value(v)) => Some(v),
            _ => None,
        }
    }
}

impl Context for InMemoryContext {
    fn get(&self, name: &str, global_only: bool) -> Option<Binding> {
        let key = name.to_ascii_lowercase();
        if !global_only {
            if let Some(binding) = self.locals.get(&key) {
                return Some(binding.clone());
            }
        }
        self.globals.get(&key).cloned()
    }

    fn set(&mut self, name: &str, value: Value, scope: Scope) {
        let key = name.to_ascii_lowercase();
        let binding = Binding::Value(value);
        match scope {
            Scope::ForceLocal => {
                self.locals.insert(key, binding);
            }
            Scope::ForceGlobal => {
                self.globals.insert(key, binding);
            }
            Scope::Default => {
                if self.locals.contains_key(&key) {
                    self.locals.insert(key, binding);
                } else {
                    self.globals.insert(key, binding);
                }
            }
        }
    }

    fn get_doc_var(&self, name: &str) -> Option<Value> {
        self.doc_vars.get(&name.to_ascii_lowercase()).cloned()
    }

    fn read_metadata_item(&self, name: &str) -> Option<Value> {
        self.metadata.get(&name.to_ascii_lowercase()).cloned()
    }

    fn sheet_cell(&self, sheet: &str, row: u32, col: u32) -> Option<Value> {
        self.sheets
            .get(&sheet.to_ascii_lowercase())
            .and_then(|cells| cells.get(&(row, col)))
            .cloned()
    }

    fn report_action(&mut self, action: &str, params: &[Value], description: &str) {
        self.actions.push(Action {
            action: action.to_string(),
            params: params.to_vec(),
            description: description.to_string(),
        });
    }

    fn save_intermediate_iocs(&mut self, value: &Value) {
        // Only string-ish values are interesting to the IOC scanner.
        if let Value::Str(s) = value {
            if !s.is_empty() {
                self.iocs.push(value.clone());
            }
        }
    }

    fn report_general_error(&mut self, msg: &str) {
        log::warn!("{msg}");
        self.errors.push(msg.to_string());
    }

    fn do_jit(&self) -> bool {
        self.jit
    }

    fn is_vbscript(&self) -> bool {
        self.vbscript
    }

    fn is_constant_name(&self, name: &str) -> bool {
        self.constants.contains(&name.to_ascii_lowercase())
    }
}
