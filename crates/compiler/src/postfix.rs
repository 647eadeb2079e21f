//! Infix to postfix conversion.
//!
//! A shunting-yard walk over an expression list. Operator precedence, lowest
//! to highest: `+ -` < `*` < `/` < `%` < `|` < `^` < `&` < `< >` (the shifts)
//! < `:` (string concatenation); all operators are left-associative. Unary
//! `-`/`~` never reach this stage, the expression parser has already
//! rewritten them as bracketed `(0 op x)` groups.
//!
//! Function and array operands first convert their FIP-slot argument
//! expressions into fresh postfix slots of their own, so nested calls recurse
//! naturally and argument slots always precede the slot that references them.

use crate::ast::{ExprItem, ExprOperand, FuncKind, PostfixElem, PostfixSlot, Program};
use crate::builtins;
use crate::types::{OptimizerHint, ValueClass};

/// Binding strength of a binary operator.
pub fn precedence(op: char) -> u8 {
    match op {
        '+' | '-' => 1,
        '*' => 2,
        '/' => 3,
        '%' => 4,
        '|' => 5,
        '^' => 6,
        '&' => 7,
        '<' | '>' => 8,
        ':' => 9,
        _ => 0,
    }
}

/// Convert an expression list into a new postfix slot and return its index.
pub fn convert(program: &mut Program, items: &[ExprItem]) -> Result<usize, String> {
    let elems = convert_elems(program, items)?;

    // a well-formed conversion reduces to exactly one value
    let mut depth: i32 = 0;
    for elem in &elems {
        match elem {
            PostfixElem::Op(_) => depth -= 1,
            _ => depth += 1,
        }
        if depth < 1 {
            return Err("internal: postfix stack underflow".to_string());
        }
    }
    if depth != 1 {
        return Err("malformed expression".to_string());
    }

    program.postfix.push(PostfixSlot {
        elems,
        hint: OptimizerHint::None,
    });
    Ok(program.postfix.len() - 1)
}

fn convert_elems(program: &mut Program, items: &[ExprItem]) -> Result<Vec<PostfixElem>, String> {
    let mut out = Vec::with_capacity(items.len());
    let mut ops: Vec<char> = Vec::new();

    for item in items {
        for _ in 0..item.obr {
            ops.push('(');
        }

        match item.operand {
            ExprOperand::IntConst(v) => out.push(PostfixElem::IntConst(v)),
            ExprOperand::StrConst(i) => out.push(PostfixElem::StrConst(i)),
            ExprOperand::Var(var) => out.push(PostfixElem::Var(var)),
            ExprOperand::ArrayVar { var, fipslot } => {
                let args = std::mem::take(&mut program.fips[fipslot].arg_exprs);
                let index_slot = convert(program, &args[0])?;
                program.fips[fipslot].arg_slots = vec![index_slot];
                out.push(PostfixElem::ArrayVar { var, index_slot });
            }
            ExprOperand::Func { kind, fipslot } => {
                let args = std::mem::take(&mut program.fips[fipslot].arg_exprs);
                let mut slots = Vec::with_capacity(args.len());
                for arg in &args {
                    slots.push(convert(program, arg)?);
                }
                program.fips[fipslot].arg_slots = slots;
                out.push(match kind {
                    FuncKind::Intern => PostfixElem::InternFunc(fipslot),
                    FuncKind::Extern => PostfixElem::ExternFunc(fipslot),
                    FuncKind::Undefined => PostfixElem::UndefFunc(fipslot),
                });
            }
        }

        for _ in 0..item.cbr {
            loop {
                match ops.pop() {
                    Some('(') => break,
                    Some(op) => out.push(PostfixElem::Op(op)),
                    None => return Err("unbalanced brackets in expression".to_string()),
                }
            }
        }

        if let Some(op) = item.op {
            while let Some(&top) = ops.last() {
                if top != '(' && precedence(top) >= precedence(op) {
                    out.push(PostfixElem::Op(ops.pop().unwrap()));
                } else {
                    break;
                }
            }
            ops.push(op);
        }
    }

    while let Some(op) = ops.pop() {
        if op == '(' {
            return Err("unbalanced brackets in expression".to_string());
        }
        out.push(PostfixElem::Op(op));
    }

    Ok(out)
}

/// Coarse result class of a postfix slot.
///
/// Also rejects string operands fed into arithmetic/bit operators; `:`
/// accepts any mix and always yields text. Unresolved forward references are
/// `Unknown` and pass everywhere; resolution re-checks them.
pub fn value_class(program: &Program, slot: usize) -> Result<ValueClass, String> {
    let mut stack: Vec<ValueClass> = Vec::new();

    for elem in &program.postfix[slot].elems {
        match *elem {
            PostfixElem::IntConst(_) => stack.push(ValueClass::Numeric),
            PostfixElem::StrConst(_) => stack.push(ValueClass::Text),
            PostfixElem::Var(var) => stack.push(var.ty.class()),
            PostfixElem::ArrayVar { var, .. } => stack.push(var.ty.class()),
            PostfixElem::InternFunc(fip) => {
                let idx = match program.fips[fip].target {
                    crate::ast::CallTarget::Builtin(b) => b,
                    _ => return Err("internal: builtin call without catalog target".to_string()),
                };
                stack.push(match builtins::get(idx).ret.class() {
                    Some(c) => c,
                    None => ValueClass::Unknown,
                });
            }
            PostfixElem::ExternFunc(fip) => {
                let idx = match program.fips[fip].target {
                    crate::ast::CallTarget::User(f) => f,
                    _ => return Err("internal: function call without function target".to_string()),
                };
                stack.push(
                    program.functions[idx]
                        .return_type
                        .class()
                        .unwrap_or(ValueClass::Unknown),
                );
            }
            PostfixElem::UndefFunc(_) => stack.push(ValueClass::Unknown),
            PostfixElem::Op(op) => {
                let b = stack
                    .pop()
                    .ok_or_else(|| "internal: postfix stack underflow".to_string())?;
                let a = stack
                    .pop()
                    .ok_or_else(|| "internal: postfix stack underflow".to_string())?;
                if op == ':' {
                    stack.push(ValueClass::Text);
                } else {
                    if a == ValueClass::Text || b == ValueClass::Text {
                        return Err(format!("string operand cannot be used with '{}'", op));
                    }
                    stack.push(ValueClass::Numeric);
                }
            }
        }
    }

    match stack.len() {
        1 => Ok(stack[0]),
        _ => Err("internal: malformed postfix slot".to_string()),
    }
}
