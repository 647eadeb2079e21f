//! Expression parser.
//!
//! Builds the annotated expression list (operands with open/close bracket
//! counts and trailing operators) that the infix-to-postfix converter
//! consumes. Prefix `-` and `~` are normalized here into bracketed
//! `(0 - x)` / `(0 ~ x)` groups applied to the next primary, so the converter
//! only ever sees binary operators.
//!
//! The parser runs in one of four modes that differ only in what terminates
//! the expression: nothing but the end of line (`Normal`), a comparison
//! operator (`Compare`, for `if`/`while` conditions), or the `to`/`step`
//! keywords of a `for` header. Function-call arguments and array indices are
//! parsed recursively with their own terminators (`,`/`)` and `]`).

use crate::ast::{
    CallTarget, ExprItem, ExprOperand, FipSlot, FuncKind, Program, Resolved,
};
use crate::builtins;
use crate::functions::UndefinedFunction;
use crate::token::{Token, Tokenizer};
use crate::types::{BaseType, CompareOp, ReturnType};

/// Deepest allowed nesting of call arguments and array indices.
const MAX_EXPR_DEPTH: u32 = 24;

/// What terminates the expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExprMode {
    /// Terminates at end of line.
    Normal,
    /// Terminates at a comparison operator, which is returned.
    Compare,
    /// Terminates at the `to` keyword.
    ForTo,
    /// Terminates at the `step` keyword or end of line.
    ForStep,
}

/// How a parse ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExprEnd {
    Finished,
    Compare(CompareOp),
    To,
    Step,
}

/// A parsed expression list plus its terminator.
#[derive(Debug)]
pub struct ParsedExpr {
    pub items: Vec<ExprItem>,
    pub end: ExprEnd,
}

/// Internal parse context: top level with a mode, a call argument, or an
/// array index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ctx {
    Top(ExprMode),
    Arg,
    Index,
}

/// Internal terminator, including the nested delimiters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EndTok {
    Line,
    Compare(CompareOp),
    To,
    Step,
    Comma,
    Close,
    BracketClose,
}

/// Accumulates expression items with bracket bookkeeping.
struct ListBuilder {
    items: Vec<ExprItem>,
    expect_operand: bool,
    depth: u32,
    pending_obr: u32,
    /// Depths at which a synthetic unary group is waiting for its close.
    pending_unary: Vec<u32>,
}

impl ListBuilder {
    fn new() -> Self {
        ListBuilder {
            items: Vec::new(),
            expect_operand: true,
            depth: 0,
            pending_obr: 0,
            pending_unary: Vec::new(),
        }
    }

    fn open_bracket(&mut self) -> Result<(), String> {
        if !self.expect_operand {
            return Err("missing operator before '('".to_string());
        }
        self.pending_obr += 1;
        self.depth += 1;
        Ok(())
    }

    /// Close one real bracket; the caller has checked `depth > 0`.
    fn close_bracket(&mut self) -> Result<(), String> {
        if self.expect_operand {
            return Err("missing operand before ')'".to_string());
        }
        let last = self
            .items
            .last_mut()
            .ok_or_else(|| "missing operand before ')'".to_string())?;
        last.cbr += 1;
        self.depth -= 1;
        self.settle_unary();
        Ok(())
    }

    fn push_operand(&mut self, operand: ExprOperand) -> Result<(), String> {
        if !self.expect_operand {
            return Err("missing operator in expression".to_string());
        }
        self.items.push(ExprItem {
            operand,
            obr: std::mem::take(&mut self.pending_obr),
            cbr: 0,
            op: None,
        });
        self.expect_operand = false;
        self.settle_unary();
        Ok(())
    }

    /// Rewrite a prefix `-`/`~` as the start of a `(0 op ...)` group; the
    /// matching close is added once the next primary completes.
    fn push_unary(&mut self, op: char) {
        self.items.push(ExprItem {
            operand: ExprOperand::IntConst(0),
            obr: std::mem::take(&mut self.pending_obr) + 1,
            cbr: 0,
            op: Some(op),
        });
        self.depth += 1;
        self.pending_unary.push(self.depth);
    }

    fn push_op(&mut self, op: char) -> Result<(), String> {
        let last = self
            .items
            .last_mut()
            .filter(|it| it.op.is_none())
            .ok_or_else(|| format!("missing operand before '{}'", op))?;
        last.op = Some(op);
        self.expect_operand = true;
        Ok(())
    }

    /// Close synthetic unary groups whose primary just completed.
    fn settle_unary(&mut self) {
        while self.pending_unary.last() == Some(&self.depth) {
            self.items
                .last_mut()
                .expect("unary group without an operand")
                .cbr += 1;
            self.depth -= 1;
            self.pending_unary.pop();
        }
    }

    fn finish(&self) -> Result<(), String> {
        if self.expect_operand {
            if self.items.is_empty() {
                return Err("expression expected".to_string());
            }
            return Err("expression ends with an operator".to_string());
        }
        if self.depth != 0 {
            return Err("missing ')' in expression".to_string());
        }
        Ok(())
    }
}

/// Parses one expression against a program's symbol tables. Short-lived: one
/// instance per expression site.
pub struct ExprParser<'p> {
    program: &'p mut Program,
    current_fn: Option<usize>,
    line: u32,
    nesting: u32,
}

impl<'p> ExprParser<'p> {
    pub fn new(program: &'p mut Program, current_fn: Option<usize>, line: u32) -> Self {
        ExprParser {
            program,
            current_fn,
            line,
            nesting: 0,
        }
    }

    /// Parse a top-level expression in the given mode.
    pub fn parse(&mut self, tz: &mut Tokenizer, mode: ExprMode) -> Result<ParsedExpr, String> {
        let (items, end) = self.parse_list(tz, Ctx::Top(mode))?;
        let end = match end {
            EndTok::Line => ExprEnd::Finished,
            EndTok::Compare(op) => ExprEnd::Compare(op),
            EndTok::To => ExprEnd::To,
            EndTok::Step => ExprEnd::Step,
            EndTok::Comma | EndTok::Close | EndTok::BracketClose => {
                unreachable!("nested terminator at top level")
            }
        };
        Ok(ParsedExpr { items, end })
    }

    /// Parse a bare call statement whose name has already been read. The rest
    /// of the line must be the argument list.
    pub fn parse_call_statement(
        &mut self,
        name: &str,
        tz: &mut Tokenizer,
    ) -> Result<Vec<ExprItem>, String> {
        let operand = self.parse_call(name, tz)?;
        let trailing = tz.next(false)?;
        if trailing != Token::Empty {
            return Err(format!("unexpected {} after call", trailing.describe()));
        }
        Ok(vec![ExprItem {
            operand,
            obr: 0,
            cbr: 0,
            op: None,
        }])
    }

    /// Parse an array-index expression; the opening `[` has been consumed and
    /// the closing `]` is consumed here.
    pub fn parse_index(&mut self, tz: &mut Tokenizer) -> Result<Vec<ExprItem>, String> {
        let (items, _end) = self.parse_nested(tz, Ctx::Index)?;
        check_value_uses(self.program, &items, false)?;
        Ok(items)
    }

    fn parse_nested(
        &mut self,
        tz: &mut Tokenizer,
        ctx: Ctx,
    ) -> Result<(Vec<ExprItem>, EndTok), String> {
        if self.nesting >= MAX_EXPR_DEPTH {
            return Err("expression too deeply nested".to_string());
        }
        self.nesting += 1;
        let result = self.parse_list(tz, ctx);
        self.nesting -= 1;
        result
    }

    fn parse_list(
        &mut self,
        tz: &mut Tokenizer,
        ctx: Ctx,
    ) -> Result<(Vec<ExprItem>, EndTok), String> {
        let mut b = ListBuilder::new();

        loop {
            let tok = tz.next(b.expect_operand)?;
            match tok {
                Token::Empty => {
                    let end = match ctx {
                        Ctx::Top(ExprMode::Normal) => EndTok::Line,
                        Ctx::Top(ExprMode::ForStep) => EndTok::Line,
                        Ctx::Top(ExprMode::Compare) => {
                            return Err("expected a comparison operator".to_string());
                        }
                        Ctx::Top(ExprMode::ForTo) => {
                            return Err("expected 'to'".to_string());
                        }
                        Ctx::Arg | Ctx::Index => {
                            return Err("unexpected end of line inside brackets".to_string());
                        }
                    };
                    b.finish()?;
                    return Ok((b.items, end));
                }
                Token::OpenParen => b.open_bracket()?,
                Token::CloseParen => {
                    if b.depth == 0 {
                        if ctx == Ctx::Arg {
                            b.finish()?;
                            return Ok((b.items, EndTok::Close));
                        }
                        return Err("unbalanced ')'".to_string());
                    }
                    b.close_bracket()?;
                }
                Token::OpenBracket => return Err("unexpected '['".to_string()),
                Token::CloseBracket => {
                    if ctx == Ctx::Index && b.depth == 0 {
                        b.finish()?;
                        return Ok((b.items, EndTok::BracketClose));
                    }
                    return Err("unexpected ']'".to_string());
                }
                Token::Comma => {
                    if ctx == Ctx::Arg && b.depth == 0 {
                        b.finish()?;
                        return Ok((b.items, EndTok::Comma));
                    }
                    return Err("unexpected ','".to_string());
                }
                Token::Int(v) => b.push_operand(ExprOperand::IntConst(v))?,
                Token::Str(text) => {
                    let idx = self.program.strings.add(&text);
                    b.push_operand(ExprOperand::StrConst(idx))?;
                }
                Token::Ident(name) => {
                    if ctx == Ctx::Top(ExprMode::ForTo) && b.depth == 0 && name == "to" {
                        b.finish()?;
                        return Ok((b.items, EndTok::To));
                    }
                    if ctx == Ctx::Top(ExprMode::ForStep) && b.depth == 0 && name == "step" {
                        b.finish()?;
                        return Ok((b.items, EndTok::Step));
                    }
                    if !b.expect_operand {
                        return Err(format!("missing operator before '{}'", name));
                    }
                    let operand = if tz.peek(false)? == Token::OpenParen {
                        self.parse_call(&name, tz)?
                    } else {
                        self.resolve_ident(&name, tz)?
                    };
                    b.push_operand(operand)?;
                }
                Token::Op(op) => {
                    if b.expect_operand {
                        match op {
                            '-' | '~' => b.push_unary(op),
                            _ => return Err(format!("missing operand before '{}'", op)),
                        }
                    } else if op == '~' {
                        return Err("'~' is a prefix operator".to_string());
                    } else {
                        b.push_op(op)?;
                    }
                }
                Token::Equal
                | Token::NotEqual
                | Token::Less
                | Token::LessEq
                | Token::Greater
                | Token::GreaterEq => {
                    let cmp = match tok {
                        Token::Equal => CompareOp::Eq,
                        Token::NotEqual => CompareOp::Ne,
                        Token::Less => CompareOp::Lt,
                        Token::LessEq => CompareOp::Le,
                        Token::Greater => CompareOp::Gt,
                        Token::GreaterEq => CompareOp::Ge,
                        _ => unreachable!(),
                    };
                    if ctx == Ctx::Top(ExprMode::Compare) && b.depth == 0 && !b.expect_operand {
                        b.finish()?;
                        return Ok((b.items, EndTok::Compare(cmp)));
                    }
                    return Err(format!("unexpected '{}'", cmp.symbol()));
                }
            }
        }
    }

    /// Parse a call after its name; consumes `(`, the arguments and `)`.
    fn parse_call(&mut self, name: &str, tz: &mut Tokenizer) -> Result<ExprOperand, String> {
        let open = tz.next(false)?;
        debug_assert_eq!(open, Token::OpenParen);

        let mut arg_exprs: Vec<Vec<ExprItem>> = Vec::new();
        if tz.peek(false)? == Token::CloseParen {
            tz.next(false)?;
        } else {
            loop {
                let (items, end) = self.parse_nested(tz, Ctx::Arg)?;
                check_value_uses(self.program, &items, false)?;
                arg_exprs.push(items);
                match end {
                    EndTok::Comma => continue,
                    EndTok::Close => break,
                    _ => unreachable!("argument ended without delimiter"),
                }
            }
        }
        let argc = arg_exprs.len();

        let (target, kind) = if let Some(b) = builtins::lookup(name) {
            let entry = builtins::get(b);
            if argc < entry.min_args || argc > entry.max_args {
                return Err(format!(
                    "'{}' expects {} argument(s), got {}",
                    name,
                    builtins::arity_text(entry),
                    argc
                ));
            }
            (CallTarget::Builtin(b), FuncKind::Intern)
        } else if let Some(f) = self.program.find_function(name) {
            if self.program.functions[f].args.len() != argc {
                return Err(format!(
                    "function '{}' expects {} argument(s), got {}",
                    name,
                    self.program.functions[f].args.len(),
                    argc
                ));
            }
            self.program.functions[f].used_cnt += 1;
            (CallTarget::User(f), FuncKind::Extern)
        } else {
            let u = self.program.undefined.len();
            self.program.undefined.push(UndefinedFunction {
                name: name.to_string(),
                line: self.line,
                argc,
                needs_return_value: true,
            });
            (CallTarget::Undefined(u), FuncKind::Undefined)
        };

        let fipslot = self.program.fips.len();
        self.program.fips.push(FipSlot {
            target,
            line: self.line,
            arg_exprs,
            arg_slots: Vec::new(),
        });
        Ok(ExprOperand::Func { kind, fipslot })
    }

    /// Resolve an identifier operand: variable, constant or array read.
    fn resolve_ident(&mut self, name: &str, tz: &mut Tokenizer) -> Result<ExprOperand, String> {
        match self.program.resolve_name(self.current_fn, name) {
            Some(Resolved::ConstInt(i)) => {
                self.program.const_ints[i].used_cnt += 1;
                Ok(ExprOperand::IntConst(self.program.const_ints[i].value))
            }
            Some(Resolved::ConstStr(i)) => {
                self.program.const_strs[i].used_cnt += 1;
                Ok(ExprOperand::StrConst(self.program.const_strs[i].str_idx))
            }
            Some(Resolved::Var { var, array: false }) => {
                if tz.peek(false)? == Token::OpenBracket {
                    return Err(format!("'{}' is not an array", name));
                }
                self.program.symbol_mut(self.current_fn, var, false).used_cnt += 1;
                Ok(ExprOperand::Var(var))
            }
            Some(Resolved::Var { var, array: true }) => {
                let open = tz.next(false)?;
                if open != Token::OpenBracket {
                    return Err(format!("array '{}' needs an index", name));
                }
                let (items, _end) = self.parse_nested(tz, Ctx::Index)?;
                check_value_uses(self.program, &items, false)?;
                let fipslot = self.program.fips.len();
                self.program.fips.push(FipSlot {
                    target: CallTarget::Index(var),
                    line: self.line,
                    arg_exprs: vec![items],
                    arg_slots: Vec::new(),
                });
                self.program.symbol_mut(self.current_fn, var, true).used_cnt += 1;
                Ok(ExprOperand::ArrayVar { var, fipslot })
            }
            None => {
                if builtins::lookup(name).is_some() || self.program.find_function(name).is_some() {
                    Err(format!("function '{}' needs argument brackets", name))
                } else {
                    Err(format!("'{}' is not defined", name))
                }
            }
        }
    }
}

/// Reject void-returning calls in value positions.
///
/// The only position where a void call is legal is a bare call statement
/// (`allow_sole_call`, a single-item list); an undefined call in that
/// position has its `needs_return_value` flag cleared so resolution accepts a
/// void definition later.
pub fn check_value_uses(
    program: &mut Program,
    items: &[ExprItem],
    allow_sole_call: bool,
) -> Result<(), String> {
    for item in items {
        let ExprOperand::Func { kind, fipslot } = item.operand else {
            continue;
        };
        let sole = allow_sole_call && items.len() == 1;
        match kind {
            FuncKind::Intern => {
                let CallTarget::Builtin(b) = program.fips[fipslot].target else {
                    continue;
                };
                let entry = builtins::get(b);
                if entry.ret == ReturnType::Void && !sole {
                    return Err(format!(
                        "'{}' returns no value and cannot be used in an expression",
                        entry.name
                    ));
                }
            }
            FuncKind::Extern => {
                let CallTarget::User(f) = program.fips[fipslot].target else {
                    continue;
                };
                if program.functions[f].return_type == ReturnType::Void && !sole {
                    return Err(format!(
                        "'{}' returns no value and cannot be used in an expression",
                        program.functions[f].name
                    ));
                }
            }
            FuncKind::Undefined => {
                let CallTarget::Undefined(u) = program.fips[fipslot].target else {
                    continue;
                };
                if sole {
                    program.undefined[u].needs_return_value = false;
                }
            }
        }
    }
    Ok(())
}

/// A parsed `function` header.
#[derive(Debug, PartialEq)]
pub struct ParsedSignature {
    pub name: String,
    pub ret: ReturnType,
    pub args: Vec<(String, BaseType)>,
}

/// Parse the remainder of a `function` line:
/// `<void|int|byte|string> name([type name, ...])`.
pub fn parse_signature(tz: &mut Tokenizer) -> Result<ParsedSignature, String> {
    let ret = match tz.next(false)? {
        Token::Ident(kw) => match kw.as_str() {
            "void" => ReturnType::Void,
            "int" => ReturnType::Int,
            "byte" => ReturnType::Byte,
            "string" => ReturnType::Str,
            _ => return Err(format!("unknown return type '{}'", kw)),
        },
        t => return Err(format!("expected a return type, got {}", t.describe())),
    };
    let name = match tz.next(false)? {
        Token::Ident(n) => n,
        t => return Err(format!("expected a function name, got {}", t.describe())),
    };
    match tz.next(false)? {
        Token::OpenParen => {}
        t => return Err(format!("expected '(' after function name, got {}", t.describe())),
    }

    let mut args = Vec::new();
    if tz.peek(false)? == Token::CloseParen {
        tz.next(false)?;
    } else {
        loop {
            let ty = match tz.next(false)? {
                Token::Ident(kw) => match kw.as_str() {
                    "int" => BaseType::Int,
                    "byte" => BaseType::Byte,
                    "string" => BaseType::Str,
                    "void" => return Err("an argument cannot be void".to_string()),
                    _ => return Err(format!("unknown argument type '{}'", kw)),
                },
                t => return Err(format!("expected an argument type, got {}", t.describe())),
            };
            let arg_name = match tz.next(false)? {
                Token::Ident(n) => n,
                t => return Err(format!("expected an argument name, got {}", t.describe())),
            };
            args.push((arg_name, ty));
            match tz.next(false)? {
                Token::Comma => continue,
                Token::CloseParen => break,
                t => {
                    return Err(format!(
                        "expected ',' or ')' in argument list, got {}",
                        t.describe()
                    ));
                }
            }
        }
    }

    Ok(ParsedSignature { name, ret, args })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Program;
    use crate::types::{Scope, VarRef};

    fn test_program() -> Program {
        let mut p = Program::default();
        p.globals.table_mut(BaseType::Int, false).insert("x", 1, None, 0);
        p.globals.table_mut(BaseType::Int, false).insert("y", 1, None, 0);
        p.globals.table_mut(BaseType::Int, true).insert("arr", 1, None, 10);
        p.globals.table_mut(BaseType::Str, false).insert("s", 1, None, 0);
        p
    }

    fn parse_normal(p: &mut Program, text: &str) -> Result<ParsedExpr, String> {
        let mut tz = Tokenizer::new(text);
        ExprParser::new(p, None, 1).parse(&mut tz, ExprMode::Normal)
    }

    #[test]
    fn test_simple_binary_expression() {
        let mut p = test_program();
        let expr = parse_normal(&mut p, "x + 2 * y").unwrap();
        assert_eq!(expr.end, ExprEnd::Finished);
        assert_eq!(expr.items.len(), 3);
        assert_eq!(expr.items[0].op, Some('+'));
        assert_eq!(expr.items[1].op, Some('*'));
        assert_eq!(expr.items[2].op, None);
        assert_eq!(expr.items[1].operand, ExprOperand::IntConst(2));
    }

    #[test]
    fn test_brackets_are_counted_on_items() {
        let mut p = test_program();
        let expr = parse_normal(&mut p, "(x + y) * 2").unwrap();
        assert_eq!(expr.items[0].obr, 1);
        assert_eq!(expr.items[1].cbr, 1);
        assert_eq!(expr.items[1].op, Some('*'));
    }

    #[test]
    fn test_unary_minus_becomes_zero_minus() {
        let mut p = test_program();
        let expr = parse_normal(&mut p, "-x").unwrap();
        assert_eq!(expr.items.len(), 2);
        assert_eq!(expr.items[0].operand, ExprOperand::IntConst(0));
        assert_eq!(expr.items[0].obr, 1);
        assert_eq!(expr.items[0].op, Some('-'));
        assert_eq!(expr.items[1].cbr, 1);
    }

    #[test]
    fn test_unary_applies_to_bracketed_group() {
        let mut p = test_program();
        // -(x + y) * 2  ->  (0 - (x + y)) * 2
        let expr = parse_normal(&mut p, "-(x + y) * 2").unwrap();
        assert_eq!(expr.items[0].operand, ExprOperand::IntConst(0));
        assert_eq!(expr.items[0].obr, 1);
        assert_eq!(expr.items[1].obr, 1); // the real '('
        assert_eq!(expr.items[2].cbr, 2); // ')' plus the synthetic close
        assert_eq!(expr.items[2].op, Some('*'));
    }

    #[test]
    fn test_double_unary() {
        let mut p = test_program();
        let expr = parse_normal(&mut p, "- -x").unwrap();
        // (0 - (0 - x))
        assert_eq!(expr.items.len(), 3);
        assert_eq!(expr.items[2].cbr, 2);
    }

    #[test]
    fn test_unary_complement() {
        let mut p = test_program();
        let expr = parse_normal(&mut p, "~x").unwrap();
        assert_eq!(expr.items[0].op, Some('~'));
    }

    #[test]
    fn test_negative_literal_is_not_a_unary_group() {
        let mut p = test_program();
        let expr = parse_normal(&mut p, "-5").unwrap();
        assert_eq!(expr.items.len(), 1);
        assert_eq!(expr.items[0].operand, ExprOperand::IntConst(-5));
    }

    #[test]
    fn test_builtin_call_with_arguments() {
        let mut p = test_program();
        let expr = parse_normal(&mut p, "math.min(x, 3)").unwrap();
        assert_eq!(expr.items.len(), 1);
        let ExprOperand::Func { kind, fipslot } = expr.items[0].operand else {
            panic!("expected a call operand");
        };
        assert_eq!(kind, FuncKind::Intern);
        assert_eq!(p.fips[fipslot].arg_exprs.len(), 2);
        assert!(matches!(p.fips[fipslot].target, CallTarget::Builtin(_)));
    }

    #[test]
    fn test_builtin_arity_is_checked() {
        let mut p = test_program();
        let err = parse_normal(&mut p, "math.min(1)").unwrap_err();
        assert!(err.contains("expects 2 argument(s), got 1"), "{}", err);
    }

    #[test]
    fn test_unknown_call_becomes_undefined() {
        let mut p = test_program();
        let expr = parse_normal(&mut p, "later(1, 2, 3)").unwrap();
        let ExprOperand::Func { kind, fipslot } = expr.items[0].operand else {
            panic!("expected a call operand");
        };
        assert_eq!(kind, FuncKind::Undefined);
        assert!(matches!(p.fips[fipslot].target, CallTarget::Undefined(0)));
        assert_eq!(p.undefined[0].argc, 3);
        assert!(p.undefined[0].needs_return_value);
    }

    #[test]
    fn test_array_read_allocates_fip() {
        let mut p = test_program();
        let expr = parse_normal(&mut p, "arr[x + 1]").unwrap();
        let ExprOperand::ArrayVar { var, fipslot } = expr.items[0].operand else {
            panic!("expected an array operand");
        };
        assert_eq!(var.ty, BaseType::Int);
        assert!(matches!(p.fips[fipslot].target, CallTarget::Index(_)));
        assert_eq!(p.fips[fipslot].arg_exprs.len(), 1);
    }

    #[test]
    fn test_scalar_with_index_is_an_error() {
        let mut p = test_program();
        let err = parse_normal(&mut p, "x[1]").unwrap_err();
        assert!(err.contains("not an array"), "{}", err);
    }

    #[test]
    fn test_array_without_index_is_an_error() {
        let mut p = test_program();
        let err = parse_normal(&mut p, "arr + 1").unwrap_err();
        assert!(err.contains("needs an index"), "{}", err);
    }

    #[test]
    fn test_undefined_name_is_an_error() {
        let mut p = test_program();
        let err = parse_normal(&mut p, "nope + 1").unwrap_err();
        assert!(err.contains("'nope' is not defined"), "{}", err);
    }

    #[test]
    fn test_constants_fold_into_operands() {
        let mut p = test_program();
        p.const_ints.push(crate::symbols::ConstInt {
            name: "N".to_string(),
            line: 1,
            value: 8,
            used_cnt: 0,
        });
        let expr = parse_normal(&mut p, "N + 1").unwrap();
        assert_eq!(expr.items[0].operand, ExprOperand::IntConst(8));
        assert_eq!(p.const_ints[0].used_cnt, 1);
    }

    #[test]
    fn test_compare_mode_returns_operator() {
        let mut p = test_program();
        let mut tz = Tokenizer::new("x + 1 <= y");
        let expr = ExprParser::new(&mut p, None, 1)
            .parse(&mut tz, ExprMode::Compare)
            .unwrap();
        assert_eq!(expr.end, ExprEnd::Compare(CompareOp::Le));
        assert_eq!(expr.items.len(), 2);
        // the right-hand side is still unread
        assert_eq!(tz.next(false).unwrap(), Token::Ident("y".to_string()));
    }

    #[test]
    fn test_compare_mode_without_operator_is_an_error() {
        let mut p = test_program();
        let mut tz = Tokenizer::new("x + 1");
        let err = ExprParser::new(&mut p, None, 1)
            .parse(&mut tz, ExprMode::Compare)
            .unwrap_err();
        assert!(err.contains("comparison"), "{}", err);
    }

    #[test]
    fn test_comparison_in_normal_mode_is_an_error() {
        let mut p = test_program();
        assert!(parse_normal(&mut p, "x = y").is_err());
        assert!(parse_normal(&mut p, "x < y").is_err());
    }

    #[test]
    fn test_shift_operator_is_not_a_comparison() {
        let mut p = test_program();
        let expr = parse_normal(&mut p, "x << 2").unwrap();
        assert_eq!(expr.items[0].op, Some('<'));
    }

    #[test]
    fn test_for_mode_terminators() {
        let mut p = test_program();
        let mut tz = Tokenizer::new("1 to 10 step 2");
        let start = ExprParser::new(&mut p, None, 1)
            .parse(&mut tz, ExprMode::ForTo)
            .unwrap();
        assert_eq!(start.end, ExprEnd::To);
        let stop = ExprParser::new(&mut p, None, 1)
            .parse(&mut tz, ExprMode::ForStep)
            .unwrap();
        assert_eq!(stop.end, ExprEnd::Step);
        let step = ExprParser::new(&mut p, None, 1)
            .parse(&mut tz, ExprMode::Normal)
            .unwrap();
        assert_eq!(step.end, ExprEnd::Finished);
        assert_eq!(step.items[0].operand, ExprOperand::IntConst(2));
    }

    #[test]
    fn test_for_stop_without_step_ends_at_line() {
        let mut p = test_program();
        let mut tz = Tokenizer::new("x + 1");
        let stop = ExprParser::new(&mut p, None, 1)
            .parse(&mut tz, ExprMode::ForStep)
            .unwrap();
        assert_eq!(stop.end, ExprEnd::Finished);
    }

    #[test]
    fn test_void_call_in_argument_is_rejected() {
        let mut p = test_program();
        let err = parse_normal(&mut p, "math.abs(time.delay(1))").unwrap_err();
        assert!(err.contains("returns no value"), "{}", err);
    }

    #[test]
    fn test_trailing_operator_is_an_error() {
        let mut p = test_program();
        assert!(parse_normal(&mut p, "x +").is_err());
    }

    #[test]
    fn test_unbalanced_brackets_are_errors() {
        let mut p = test_program();
        assert!(parse_normal(&mut p, "(x + 1").is_err());
        assert!(parse_normal(&mut p, "x + 1)").is_err());
    }

    #[test]
    fn test_call_statement_rejects_trailing_tokens() {
        let mut p = test_program();
        let mut tz = Tokenizer::new("(1) + 2");
        let err = ExprParser::new(&mut p, None, 1)
            .parse_call_statement("time.delay", &mut tz)
            .unwrap_err();
        assert!(err.contains("after call"), "{}", err);
    }

    #[test]
    fn test_signature_parsing() {
        let mut tz = Tokenizer::new("int add(int a, byte b, string s)");
        let sig = parse_signature(&mut tz).unwrap();
        assert_eq!(sig.name, "add");
        assert_eq!(sig.ret, ReturnType::Int);
        assert_eq!(sig.args, vec![
            ("a".to_string(), BaseType::Int),
            ("b".to_string(), BaseType::Byte),
            ("s".to_string(), BaseType::Str),
        ]);
    }

    #[test]
    fn test_signature_without_arguments() {
        let mut tz = Tokenizer::new("void main()");
        let sig = parse_signature(&mut tz).unwrap();
        assert_eq!(sig.name, "main");
        assert_eq!(sig.ret, ReturnType::Void);
        assert!(sig.args.is_empty());
    }

    #[test]
    fn test_signature_rejects_void_argument() {
        let mut tz = Tokenizer::new("void f(void x)");
        assert!(parse_signature(&mut tz).is_err());
    }

    #[test]
    fn test_local_resolution_marks_use() {
        let mut p = test_program();
        let expr = parse_normal(&mut p, "x + x").unwrap();
        let ExprOperand::Var(var) = expr.items[0].operand else {
            panic!("expected a variable");
        };
        assert_eq!(var, VarRef {
            scope: Scope::Global,
            ty: BaseType::Int,
            idx: 0,
        });
        assert_eq!(p.symbol(None, var, false).used_cnt, 2);
    }

    #[test]
    fn test_string_literal_becomes_pool_entry() {
        let mut p = test_program();
        let expr = parse_normal(&mut p, "\"hi\" : x").unwrap();
        let ExprOperand::StrConst(idx) = expr.items[0].operand else {
            panic!("expected a string constant");
        };
        assert_eq!(p.strings.get(idx), "hi");
        assert_eq!(expr.items[0].op, Some(':'));
    }
}
