//! Postfix peephole optimizer.
//!
//! Two passes over a postfix slot. The folding pass walks the slot once with
//! a value stack and collapses operators whose operands are both constants:
//! integer arithmetic uses wrapping 32-bit semantics, shifts are unsigned,
//! and `:` splices int/string constants into a single string constant. The
//! hint pass tags slots whose final shape the interpreter can dispatch
//! without running the generic postfix machine; it runs after
//! forward-reference resolution so single-call slots classify correctly.

use crate::ast::{PostfixElem, Program};
use crate::stats::CompileStats;
use crate::types::{BaseType, OptimizerHint, Scope};

/// What the folding stack knows about a value.
#[derive(Debug, Clone, Copy)]
enum FoldVal {
    Int(i32),
    Str(usize),
    Opaque,
}

/// Fold constant subexpressions of one slot in place.
pub fn fold_slot(program: &mut Program, slot: usize, stats: &mut CompileStats) -> Result<(), String> {
    let elems = std::mem::take(&mut program.postfix[slot].elems);
    let mut out: Vec<PostfixElem> = Vec::with_capacity(elems.len());
    let mut stack: Vec<FoldVal> = Vec::with_capacity(8);

    for elem in elems {
        match elem {
            PostfixElem::Op(op) => {
                let b = stack
                    .pop()
                    .ok_or_else(|| "internal: postfix stack underflow".to_string())?;
                let a = stack
                    .pop()
                    .ok_or_else(|| "internal: postfix stack underflow".to_string())?;

                match (a, b) {
                    (FoldVal::Int(x), FoldVal::Int(y))
                        if op != ':' && foldable_int(op, y) =>
                    {
                        let v = apply_int(op, x, y);
                        out.truncate(out.len() - 2);
                        out.push(PostfixElem::IntConst(v));
                        stack.push(FoldVal::Int(v));
                        stats.folded_constants += 1;
                    }
                    (a @ (FoldVal::Int(_) | FoldVal::Str(_)), b @ (FoldVal::Int(_) | FoldVal::Str(_)))
                        if op == ':' =>
                    {
                        let idx = fold_concat(program, a, b);
                        out.truncate(out.len() - 2);
                        out.push(PostfixElem::StrConst(idx));
                        stack.push(FoldVal::Str(idx));
                        stats.folded_strings += 1;
                    }
                    _ => {
                        out.push(PostfixElem::Op(op));
                        stack.push(FoldVal::Opaque);
                    }
                }
            }
            operand => {
                stack.push(match operand {
                    PostfixElem::IntConst(v) => FoldVal::Int(v),
                    PostfixElem::StrConst(i) => FoldVal::Str(i),
                    _ => FoldVal::Opaque,
                });
                out.push(operand);
            }
        }
    }

    program.postfix[slot].elems = out;
    Ok(())
}

/// Division and modulo by a constant zero stay unfolded; the interpreter owns
/// that failure.
fn foldable_int(op: char, rhs: i32) -> bool {
    !(matches!(op, '/' | '%') && rhs == 0)
}

fn apply_int(op: char, a: i32, b: i32) -> i32 {
    match op {
        '+' => a.wrapping_add(b),
        '-' => a.wrapping_sub(b),
        '*' => a.wrapping_mul(b),
        '/' => a.wrapping_div(b),
        '%' => a.wrapping_rem(b),
        '&' => a & b,
        '|' => a | b,
        '^' => a ^ b,
        '~' => !b,
        '<' => (a as u32).wrapping_shl(b as u32) as i32,
        '>' => (a as u32).wrapping_shr(b as u32) as i32,
        _ => unreachable!("non-arithmetic operator '{}'", op),
    }
}

/// Splice two constants. The first operand's string slot is reused when it
/// has one, otherwise a fresh constant is allocated; a consumed second-operand
/// string slot is deactivated.
fn fold_concat(program: &mut Program, a: FoldVal, b: FoldVal) -> usize {
    let text_of = |program: &Program, v: FoldVal| match v {
        FoldVal::Int(x) => x.to_string(),
        FoldVal::Str(i) => program.strings.get(i).to_string(),
        FoldVal::Opaque => unreachable!("opaque operand in string fold"),
    };
    let joined = format!("{}{}", text_of(program, a), text_of(program, b));

    if let FoldVal::Str(j) = b {
        program.strings.deactivate(j);
    }
    match a {
        FoldVal::Str(i) => {
            program.strings.set(i, joined);
            i
        }
        _ => program.strings.add(&joined),
    }
}

/// Assign the fast-path hint of one slot.
pub fn classify_slot(program: &mut Program, slot: usize) -> OptimizerHint {
    let hint = classify(&program.postfix[slot].elems);
    program.postfix[slot].hint = hint;
    hint
}

fn classify(elems: &[PostfixElem]) -> OptimizerHint {
    match elems {
        [single] => match *single {
            PostfixElem::IntConst(_) | PostfixElem::StrConst(_) => OptimizerHint::ConstNoOp,
            PostfixElem::Var(var) => match (var.scope, var.ty) {
                (Scope::Local, BaseType::Int) => OptimizerHint::LocIntNoOp,
                (Scope::Global, BaseType::Int) => OptimizerHint::GlobIntNoOp,
                (Scope::Local, BaseType::Byte) => OptimizerHint::LocByteNoOp,
                (Scope::Global, BaseType::Byte) => OptimizerHint::GlobByteNoOp,
                // a bare string variable reads like a constant slot
                (_, BaseType::Str) => OptimizerHint::ConstNoOp,
            },
            PostfixElem::InternFunc(_) => OptimizerHint::IntFuncNoOp,
            PostfixElem::ExternFunc(_) => OptimizerHint::ExtFuncNoOp,
            _ => OptimizerHint::None,
        },
        [a, b, PostfixElem::Op(_)] => {
            let int_scalar = |e: &PostfixElem| match *e {
                PostfixElem::Var(var) if var.ty == BaseType::Int => Some(var.scope),
                _ => None,
            };
            match (int_scalar(a), b) {
                (Some(Scope::Local), PostfixElem::Var(v))
                    if v.ty == BaseType::Int && v.scope == Scope::Local =>
                {
                    OptimizerHint::LocIntLocIntOp
                }
                (Some(Scope::Local), PostfixElem::IntConst(_)) => OptimizerHint::LocIntConstIntOp,
                (Some(Scope::Global), PostfixElem::Var(v))
                    if v.ty == BaseType::Int && v.scope == Scope::Global =>
                {
                    OptimizerHint::GlobIntGlobIntOp
                }
                (Some(Scope::Global), PostfixElem::IntConst(_)) => {
                    OptimizerHint::GlobIntConstIntOp
                }
                _ => OptimizerHint::None,
            }
        }
        _ => OptimizerHint::None,
    }
}
