//! Data model of a compiled program.
//!
//! Everything the pipeline builds lives in one owning [`Program`]: the
//! statement array, the postfix slot pool, the FIP (function invocation
//! parameters) pool, the string constant pool, the symbol tables and the
//! function table. Pools are append-only and referenced by integer index, so
//! there are no pointer graphs to invalidate; dropping the `Program` is the
//! whole teardown, which keeps repeated compilations in one process fully
//! independent.

use crate::functions::{Function, UndefinedFunction};
use crate::symbols::{ConstInt, ConstStr, Symbol, VarTables};
use crate::types::{BaseType, CompareOp, OptimizerHint, Scope, VarRef};

/// One element of the pre-postfix expression list.
///
/// `obr` open brackets precede the operand, `cbr` close brackets follow it,
/// and `op` is the binary operator trailing the closes (the last item of a
/// list has no operator).
#[derive(Debug, Clone)]
pub struct ExprItem {
    pub operand: ExprOperand,
    pub obr: u32,
    pub cbr: u32,
    pub op: Option<char>,
}

/// Operand of an expression item.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExprOperand {
    IntConst(i32),
    /// Index into the string pool.
    StrConst(usize),
    /// Scalar variable read.
    Var(VarRef),
    /// Array element read; the index expression lives in the FIP slot.
    ArrayVar { var: VarRef, fipslot: usize },
    /// Call; arguments live in the FIP slot.
    Func { kind: FuncKind, fipslot: usize },
}

/// Which table a called function resolves against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuncKind {
    /// Built-in catalog entry.
    Intern,
    /// User-defined function.
    Extern,
    /// Forward reference, rewritten to `Extern` during resolution.
    Undefined,
}

/// Target of a FIP slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallTarget {
    /// Built-in catalog index.
    Builtin(usize),
    /// User function index.
    User(usize),
    /// Index into the undefined-function list.
    Undefined(usize),
    /// Array-element access; the single "argument" is the index expression.
    Index(VarRef),
}

/// Function invocation parameters: one per call or array access.
///
/// Arguments are parsed into expression lists and converted to postfix slots
/// when the surrounding expression is converted; `arg_slots` is empty until
/// then.
#[derive(Debug)]
pub struct FipSlot {
    pub target: CallTarget,
    /// Source line of the occurrence, for late diagnostics.
    pub line: u32,
    pub arg_exprs: Vec<Vec<ExprItem>>,
    pub arg_slots: Vec<usize>,
}

/// One element of a compiled postfix expression.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PostfixElem {
    /// Binary operator (`<`/`>` are the shifts).
    Op(char),
    IntConst(i32),
    /// Index into the string pool.
    StrConst(usize),
    /// Scalar variable read.
    Var(VarRef),
    /// Array element read; `index_slot` is the postfix slot of the index.
    ArrayVar { var: VarRef, index_slot: usize },
    /// Built-in call, payload is the FIP slot.
    InternFunc(usize),
    /// User-function call, payload is the FIP slot.
    ExternFunc(usize),
    /// Unresolved forward reference, payload is the FIP slot.
    UndefFunc(usize),
}

/// One compiled expression in reverse Polish form. The element count is the
/// emitted depth; there is no explicit end marker.
#[derive(Debug)]
pub struct PostfixSlot {
    pub elems: Vec<PostfixElem>,
    pub hint: OptimizerHint,
}

/// Pool of string constants. Entries are never removed, only deactivated
/// (emptied) when string folding splices them together; interning would make
/// that in-place rewrite unsound, so every literal gets its own slot.
#[derive(Debug, Default)]
pub struct StringPool {
    pub entries: Vec<String>,
}

impl StringPool {
    pub fn add(&mut self, text: &str) -> usize {
        self.entries.push(text.to_string());
        self.entries.len() - 1
    }

    pub fn get(&self, idx: usize) -> &str {
        &self.entries[idx]
    }

    pub fn set(&mut self, idx: usize, text: String) {
        self.entries[idx] = text;
    }

    pub fn deactivate(&mut self, idx: usize) {
        self.entries[idx].clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn byte_size(&self) -> usize {
        self.entries.iter().map(|s| s.len()).sum()
    }
}

/// Assignment destination of a statement.
#[derive(Debug, Clone, Copy)]
pub struct AssignTarget {
    pub var: VarRef,
    /// Postfix slot of the index expression for array writes.
    pub index_slot: Option<usize>,
}

/// Statement payload.
#[derive(Debug, Clone, Copy)]
pub enum StatementKind {
    /// `v = v + k` rewritten; no postfix machinery at runtime.
    Increment { var: VarRef, step: i32 },
    /// Assignment or bare call; `target` is `None` for a bare call.
    Assign {
        target: Option<AssignTarget>,
        expr_slot: usize,
    },
    If {
        left: usize,
        cmp: CompareOp,
        right: usize,
        /// Where to jump when the condition is false; patched exactly once
        /// by `elseif`, `else` or the matching `endif`.
        false_idx: Option<usize>,
    },
    /// Closer of an `if`, and the synthetic jump-over-the-rest emitted for
    /// `elseif`/`else` (whose `next` is patched to the real `endif`).
    EndIf { if_idx: usize },
    While {
        left: usize,
        cmp: CompareOp,
        right: usize,
        end_idx: usize,
    },
    EndWhile { while_idx: usize },
    Loop { end_idx: usize },
    EndLoop { loop_idx: usize },
    For {
        var: VarRef,
        start: usize,
        stop: usize,
        step: Option<usize>,
        end_idx: usize,
    },
    EndFor { for_idx: usize },
    Repeat { count: usize, end_idx: usize },
    EndRepeat { repeat_idx: usize },
    Break,
    Continue,
    Return { expr_slot: Option<usize> },
}

/// One statement. `next` is the index of the statement executed afterwards;
/// it defaults to the following statement and is patched for jumps.
#[derive(Debug, Clone, Copy)]
pub struct Statement {
    pub line: u32,
    pub next: usize,
    pub kind: StatementKind,
}

/// A name resolved against the scope search order.
#[derive(Debug, Clone, Copy)]
pub enum Resolved {
    Var { var: VarRef, array: bool },
    ConstInt(usize),
    ConstStr(usize),
}

/// The owning context of one compilation.
#[derive(Debug, Default)]
pub struct Program {
    pub statements: Vec<Statement>,
    pub postfix: Vec<PostfixSlot>,
    pub fips: Vec<FipSlot>,
    pub strings: StringPool,
    pub globals: VarTables,
    pub const_ints: Vec<ConstInt>,
    pub const_strs: Vec<ConstStr>,
    pub functions: Vec<Function>,
    pub undefined: Vec<UndefinedFunction>,
}

impl Program {
    pub fn find_function(&self, name: &str) -> Option<usize> {
        self.functions.iter().position(|f| f.name == name)
    }

    pub fn find_const_int(&self, name: &str) -> Option<usize> {
        self.const_ints.iter().position(|c| c.name == name)
    }

    pub fn find_const_str(&self, name: &str) -> Option<usize> {
        self.const_strs.iter().position(|c| c.name == name)
    }

    /// Resolve a name inside `current_fn` (or at global scope): locals first,
    /// then static locals under the mangled name, then constants, then
    /// globals.
    pub fn resolve_name(&self, current_fn: Option<usize>, name: &str) -> Option<Resolved> {
        if let Some(f) = current_fn {
            let func = &self.functions[f];
            if let Some((ty, array, idx)) = func.locals.find_any(name) {
                return Some(Resolved::Var {
                    var: VarRef {
                        scope: Scope::Local,
                        ty,
                        idx,
                    },
                    array,
                });
            }
            let mangled = crate::symbols::static_local_name(&func.name, name);
            if let Some((ty, array, idx)) = self.globals.find_any(&mangled) {
                return Some(Resolved::Var {
                    var: VarRef {
                        scope: Scope::Global,
                        ty,
                        idx,
                    },
                    array,
                });
            }
        }
        if let Some(idx) = self.find_const_int(name) {
            return Some(Resolved::ConstInt(idx));
        }
        if let Some(idx) = self.find_const_str(name) {
            return Some(Resolved::ConstStr(idx));
        }
        if let Some((ty, array, idx)) = self.globals.find_any(name) {
            return Some(Resolved::Var {
                var: VarRef {
                    scope: Scope::Global,
                    ty,
                    idx,
                },
                array,
            });
        }
        None
    }

    /// The symbol behind a variable reference. Local references are resolved
    /// through `current_fn`, which must name the owning function.
    pub fn symbol(&self, current_fn: Option<usize>, var: VarRef, array: bool) -> &Symbol {
        let tables = match var.scope {
            Scope::Global => &self.globals,
            Scope::Local => {
                let f = current_fn.expect("local reference outside a function");
                &self.functions[f].locals
            }
        };
        &tables.table(var.ty, array).entries[var.idx]
    }

    pub fn symbol_mut(
        &mut self,
        current_fn: Option<usize>,
        var: VarRef,
        array: bool,
    ) -> &mut Symbol {
        let tables = match var.scope {
            Scope::Global => &mut self.globals,
            Scope::Local => {
                let f = current_fn.expect("local reference outside a function");
                &mut self.functions[f].locals
            }
        };
        &mut tables.table_mut(var.ty, array).entries[var.idx]
    }
}
