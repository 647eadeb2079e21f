//! Function table and forward-reference resolution.
//!
//! Calls to names that are neither built-ins nor already-defined functions
//! are captured as [`UndefinedFunction`] entries, one per call site. After
//! the whole source has been parsed, [`resolve_forward_references`] walks
//! every postfix slot, retargets each undefined operand to the now-defined
//! function, and validates argument count and value use.

use crate::ast::{CallTarget, PostfixElem, Program};
use crate::symbols::VarTables;
use crate::types::{BaseType, ReturnType};

/// One argument of a user-defined function: a reference into the function's
/// local scalar table of the given type.
#[derive(Debug, Clone, Copy)]
pub struct FunctionArg {
    pub idx: usize,
    pub ty: BaseType,
}

/// A user-defined function.
#[derive(Debug)]
pub struct Function {
    pub name: String,
    /// Source line of the `function` header.
    pub line: u32,
    /// Index of the first statement of the body in the program-wide array.
    pub first_statement: usize,
    pub return_type: ReturnType,
    pub args: Vec<FunctionArg>,
    pub locals: VarTables,
    /// Number of call sites seen during compilation.
    pub used_cnt: u32,
}

/// A call to a function that has not been defined yet. One entry per call
/// site, so each site's argument count is validated independently.
#[derive(Debug)]
pub struct UndefinedFunction {
    pub name: String,
    /// Source line of the call.
    pub line: u32,
    /// Argument count observed at the call site.
    pub argc: usize,
    /// Whether the call's result is consumed. Set unless the call is a bare
    /// call statement; a void function resolved against a set flag is an
    /// error.
    pub needs_return_value: bool,
}

/// Resolve every undefined-function operand in the postfix pool.
///
/// Returns the errors found, each with the source line of the call site.
pub fn resolve_forward_references(program: &mut Program) -> Vec<(u32, String)> {
    let mut errors = Vec::new();

    for slot in 0..program.postfix.len() {
        for e in 0..program.postfix[slot].elems.len() {
            let PostfixElem::UndefFunc(fip_idx) = program.postfix[slot].elems[e] else {
                continue;
            };
            let CallTarget::Undefined(u) = program.fips[fip_idx].target else {
                errors.push((
                    0,
                    "internal: undefined-function operand without a matching slot".to_string(),
                ));
                continue;
            };

            let (name, line, argc, needs_value) = {
                let und = &program.undefined[u];
                (und.name.clone(), und.line, und.argc, und.needs_return_value)
            };

            let Some(fidx) = program.find_function(&name) else {
                errors.push((line, format!("function '{}' is not defined", name)));
                continue;
            };

            let func = &program.functions[fidx];
            if func.args.len() != argc {
                errors.push((
                    line,
                    format!(
                        "function '{}' expects {} argument(s), got {}",
                        name,
                        func.args.len(),
                        argc
                    ),
                ));
                continue;
            }
            if needs_value && func.return_type == ReturnType::Void {
                errors.push((
                    line,
                    format!(
                        "'{}' returns no value and cannot be used in an expression",
                        name
                    ),
                ));
                continue;
            }

            program.postfix[slot].elems[e] = PostfixElem::ExternFunc(fip_idx);
            program.fips[fip_idx].target = CallTarget::User(fidx);
            program.functions[fidx].used_cnt += 1;
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{FipSlot, PostfixSlot};
    use crate::types::OptimizerHint;

    fn program_with_call(name: &str, argc: usize, needs_value: bool) -> Program {
        let mut p = Program::default();
        p.undefined.push(UndefinedFunction {
            name: name.to_string(),
            line: 2,
            argc,
            needs_return_value: needs_value,
        });
        p.fips.push(FipSlot {
            target: CallTarget::Undefined(0),
            line: 2,
            arg_exprs: Vec::new(),
            arg_slots: Vec::new(),
        });
        p.postfix.push(PostfixSlot {
            elems: vec![PostfixElem::UndefFunc(0)],
            hint: OptimizerHint::None,
        });
        p
    }

    fn define(p: &mut Program, name: &str, ret: ReturnType, argc: usize) {
        let mut locals = VarTables::default();
        let mut args = Vec::new();
        for i in 0..argc {
            let idx = locals
                .table_mut(BaseType::Int, false)
                .insert(&format!("a{}", i), 1, None, 0);
            args.push(FunctionArg {
                idx,
                ty: BaseType::Int,
            });
        }
        p.functions.push(Function {
            name: name.to_string(),
            line: 1,
            first_statement: 0,
            return_type: ret,
            args,
            locals,
            used_cnt: 0,
        });
    }

    #[test]
    fn test_resolution_retargets_operand() {
        let mut p = program_with_call("foo", 1, false);
        define(&mut p, "foo", ReturnType::Void, 1);

        let errors = resolve_forward_references(&mut p);
        assert!(errors.is_empty(), "{:?}", errors);
        assert_eq!(p.postfix[0].elems[0], PostfixElem::ExternFunc(0));
        assert!(matches!(p.fips[0].target, CallTarget::User(0)));
        assert_eq!(p.functions[0].used_cnt, 1);
    }

    #[test]
    fn test_unresolved_call_is_an_error() {
        let mut p = program_with_call("ghost", 0, false);
        let errors = resolve_forward_references(&mut p);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].1.contains("ghost"));
        assert_eq!(errors[0].0, 2);
    }

    #[test]
    fn test_argument_count_is_checked() {
        let mut p = program_with_call("foo", 3, false);
        define(&mut p, "foo", ReturnType::Void, 1);
        let errors = resolve_forward_references(&mut p);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].1.contains("expects 1 argument(s), got 3"));
    }

    #[test]
    fn test_void_function_in_value_position() {
        let mut p = program_with_call("foo", 0, true);
        define(&mut p, "foo", ReturnType::Void, 0);
        let errors = resolve_forward_references(&mut p);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].1.contains("returns no value"));
    }

    #[test]
    fn test_zero_undefined_operands_after_resolution() {
        let mut p = program_with_call("foo", 0, true);
        define(&mut p, "foo", ReturnType::Int, 0);
        let errors = resolve_forward_references(&mut p);
        assert!(errors.is_empty());
        for slot in &p.postfix {
            for elem in &slot.elems {
                assert!(!matches!(elem, PostfixElem::UndefFunc(_)));
            }
        }
    }
}
