//! Object writer.
//!
//! Emits the textual object image the interpreter loads. The image is
//! line-oriented; every section starts with a decimal count line and the
//! sections follow a fixed order:
//!
//! 1. statements, one per line: `line next code payload...`
//! 2. postfix slots: `depth hint elem...` with element tags `o` operator,
//!    `c` int constant, `C` string constant, `v`/`V` local/global int,
//!    `b`/`B` byte, `s`/`S` string, with an `a` prefix and a trailing
//!    `[pslot]` for arrays, and `f`/`F` for builtin/user calls (payload is
//!    the FIP slot)
//! 3. FIP slots: `f|F|a target argc pslot...`
//! 4. string constants: `len text`
//! 5. global scalar initial values (int, byte, string)
//! 6. global array sizes (int, byte, string)
//! 7. functions: header `name ret first_stmt argc`, one argument reference
//!    per line, the six local-table counts, then the local array sizes
//! 8. the index of `main`
//!
//! Statement codes: 1 increment, 2 assign/call, 3 if, 4 endif, 5 while,
//! 6 endwhile, 7 loop, 8 endloop, 9 for, 10 endfor, 11 repeat, 12 endrepeat,
//! 13 break, 14 continue, 15 return. `-` marks a missing assign target and
//! `-1` a missing slot.

use crate::ast::{CallTarget, PostfixElem, Program, StatementKind};
use crate::symbols::{InitValue, SymbolTable};
use crate::types::{BaseType, Scope, VarRef};
use std::fmt::{self, Write};

/// Error type for object emission.
///
/// Logic errors mean the program failed an invariant that parsing should
/// have guaranteed (an unresolved call, an unpatched jump); format errors
/// come from the underlying writer.
#[derive(Debug)]
pub enum ObjectError {
    Logic(String),
    Format(fmt::Error),
}

impl fmt::Display for ObjectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectError::Logic(s) => write!(f, "{}", s),
            ObjectError::Format(e) => write!(f, "object rendering error: {}", e),
        }
    }
}

impl std::error::Error for ObjectError {}

impl From<String> for ObjectError {
    fn from(s: String) -> Self {
        ObjectError::Logic(s)
    }
}

impl From<fmt::Error> for ObjectError {
    fn from(e: fmt::Error) -> Self {
        ObjectError::Format(e)
    }
}

/// Variable tag: scope/type letter plus table index, `a`-prefixed for arrays.
fn var_tag(var: VarRef, array: bool) -> String {
    let c = match (var.scope, var.ty) {
        (Scope::Local, BaseType::Int) => 'v',
        (Scope::Global, BaseType::Int) => 'V',
        (Scope::Local, BaseType::Byte) => 'b',
        (Scope::Global, BaseType::Byte) => 'B',
        (Scope::Local, BaseType::Str) => 's',
        (Scope::Global, BaseType::Str) => 'S',
    };
    if array {
        format!("a{}{}", c, var.idx)
    } else {
        format!("{}{}", c, var.idx)
    }
}

fn elem_text(elem: &PostfixElem) -> Result<String, ObjectError> {
    Ok(match *elem {
        PostfixElem::Op(c) => format!("o{}", c),
        PostfixElem::IntConst(v) => format!("c{}", v),
        PostfixElem::StrConst(i) => format!("C{}", i),
        PostfixElem::Var(var) => var_tag(var, false),
        PostfixElem::ArrayVar { var, index_slot } => {
            format!("{}[{}]", var_tag(var, true), index_slot)
        }
        PostfixElem::InternFunc(f) => format!("f{}", f),
        PostfixElem::ExternFunc(f) => format!("F{}", f),
        PostfixElem::UndefFunc(_) => {
            return Err(ObjectError::Logic(
                "internal: unresolved function reached the object writer".to_string(),
            ));
        }
    })
}

fn slot_text(slot: Option<usize>) -> String {
    match slot {
        Some(s) => s.to_string(),
        None => "-1".to_string(),
    }
}

/// Render the object image of a compiled program.
pub fn write_object(program: &Program) -> Result<String, ObjectError> {
    let main_idx = program
        .find_function("main")
        .ok_or_else(|| ObjectError::Logic("no 'main' function defined".to_string()))?;

    let mut out = String::new();

    // statements
    writeln!(out, "{}", program.statements.len())?;
    for stmt in &program.statements {
        write!(out, "{} {} ", stmt.line, stmt.next)?;
        match stmt.kind {
            StatementKind::Increment { var, step } => {
                writeln!(out, "1 {} {}", var_tag(var, false), step)?;
            }
            StatementKind::Assign { target, expr_slot } => {
                let (tag, islot) = match target {
                    Some(t) => (
                        var_tag(t.var, t.index_slot.is_some()),
                        slot_text(t.index_slot),
                    ),
                    None => ("-".to_string(), "-1".to_string()),
                };
                writeln!(out, "2 {} {} {}", tag, islot, expr_slot)?;
            }
            StatementKind::If {
                left,
                cmp,
                right,
                false_idx,
            } => {
                let false_idx = false_idx.ok_or_else(|| {
                    ObjectError::Logic("internal: unpatched if statement".to_string())
                })?;
                writeln!(out, "3 {} {} {} {}", left, cmp.code(), right, false_idx)?;
            }
            StatementKind::EndIf { if_idx } => writeln!(out, "4 {}", if_idx)?,
            StatementKind::While {
                left,
                cmp,
                right,
                end_idx,
            } => writeln!(out, "5 {} {} {} {}", left, cmp.code(), right, end_idx)?,
            StatementKind::EndWhile { while_idx } => writeln!(out, "6 {}", while_idx)?,
            StatementKind::Loop { end_idx } => writeln!(out, "7 {}", end_idx)?,
            StatementKind::EndLoop { loop_idx } => writeln!(out, "8 {}", loop_idx)?,
            StatementKind::For {
                var,
                start,
                stop,
                step,
                end_idx,
            } => writeln!(
                out,
                "9 {} {} {} {} {}",
                var_tag(var, false),
                start,
                stop,
                slot_text(step),
                end_idx
            )?,
            StatementKind::EndFor { for_idx } => writeln!(out, "10 {}", for_idx)?,
            StatementKind::Repeat { count, end_idx } => {
                writeln!(out, "11 {} {}", count, end_idx)?;
            }
            StatementKind::EndRepeat { repeat_idx } => writeln!(out, "12 {}", repeat_idx)?,
            StatementKind::Break => writeln!(out, "13")?,
            StatementKind::Continue => writeln!(out, "14")?,
            StatementKind::Return { expr_slot } => {
                writeln!(out, "15 {}", slot_text(expr_slot))?;
            }
        }
    }

    // postfix slots
    writeln!(out, "{}", program.postfix.len())?;
    for slot in &program.postfix {
        write!(out, "{} {}", slot.elems.len(), slot.hint.code())?;
        for elem in &slot.elems {
            write!(out, " {}", elem_text(elem)?)?;
        }
        writeln!(out)?;
    }

    // FIP slots
    writeln!(out, "{}", program.fips.len())?;
    for fip in &program.fips {
        let target = match fip.target {
            CallTarget::Builtin(b) => format!("f {}", b),
            CallTarget::User(f) => format!("F {}", f),
            CallTarget::Index(var) => format!("a {}", var_tag(var, true)),
            CallTarget::Undefined(_) => {
                return Err(ObjectError::Logic(
                    "internal: unresolved function reached the object writer".to_string(),
                ));
            }
        };
        write!(out, "{} {}", target, fip.arg_slots.len())?;
        for s in &fip.arg_slots {
            write!(out, " {}", s)?;
        }
        writeln!(out)?;
    }

    // string constants
    writeln!(out, "{}", program.strings.len())?;
    for s in &program.strings.entries {
        writeln!(out, "{} {}", s.len(), s)?;
    }

    // global scalar initial values
    let int_init = |table: &SymbolTable, out: &mut String| -> Result<(), ObjectError> {
        writeln!(out, "{}", table.len())?;
        for sym in &table.entries {
            let v = match sym.init {
                Some(InitValue::Int(v)) => v,
                _ => 0,
            };
            writeln!(out, "{}", v)?;
        }
        Ok(())
    };
    int_init(&program.globals.int_vars, &mut out)?;
    int_init(&program.globals.byte_vars, &mut out)?;
    writeln!(out, "{}", program.globals.str_vars.len())?;
    for sym in &program.globals.str_vars.entries {
        let v = match sym.init {
            Some(InitValue::Str(i)) => i as i64,
            _ => -1,
        };
        writeln!(out, "{}", v)?;
    }

    // global array sizes
    for table in [
        &program.globals.int_arrays,
        &program.globals.byte_arrays,
        &program.globals.str_arrays,
    ] {
        writeln!(out, "{}", table.len())?;
        for sym in &table.entries {
            writeln!(out, "{}", sym.size)?;
        }
    }

    // functions
    writeln!(out, "{}", program.functions.len())?;
    for func in &program.functions {
        writeln!(
            out,
            "{} {} {} {}",
            func.name,
            func.return_type.code(),
            func.first_statement,
            func.args.len()
        )?;
        for arg in &func.args {
            let var = VarRef {
                scope: Scope::Local,
                ty: arg.ty,
                idx: arg.idx,
            };
            writeln!(out, "{}", var_tag(var, false))?;
        }
        let l = &func.locals;
        writeln!(
            out,
            "{} {} {} {} {} {}",
            l.int_vars.len(),
            l.byte_vars.len(),
            l.str_vars.len(),
            l.int_arrays.len(),
            l.byte_arrays.len(),
            l.str_arrays.len()
        )?;
        for table in [&l.int_arrays, &l.byte_arrays, &l.str_arrays] {
            for sym in &table.entries {
                writeln!(out, "{}", sym.size)?;
            }
        }
    }

    // entry point
    writeln!(out, "{}", main_idx)?;
    Ok(out)
}

/// Human-readable postfix listing for `-vv`.
pub fn dump_postfix(program: &Program) -> String {
    let mut out = String::new();
    for (i, slot) in program.postfix.iter().enumerate() {
        let _ = write!(out, "slot {:4} [{:?}]:", i, slot.hint);
        for elem in &slot.elems {
            match elem_text(elem) {
                Ok(text) => {
                    let _ = write!(out, " {}", text);
                }
                Err(_) => {
                    let _ = write!(out, " ?undef");
                }
            }
        }
        let _ = writeln!(out);
    }
    out
}

/// Human-readable statement listing for `-vv`.
pub fn dump_statements(program: &Program) -> String {
    let mut out = String::new();
    for (i, stmt) in program.statements.iter().enumerate() {
        let _ = writeln!(
            out,
            "{:4}: line {:4} next {:4} {:?}",
            i, stmt.line, stmt.next, stmt.kind
        );
    }
    out
}
