//! Statement parser and control-flow assembly.
//!
//! The line-oriented driver of the whole pipeline. Each source line is routed
//! by its first identifier: declarations, `function`/`endfunction`, control
//! flow, `break`/`continue`/`return`, or a generic assignment/call. The
//! parser owns the [`Program`] being built and a compile-time stack of open
//! blocks; `break` and `continue` targets that cannot be known yet are
//! recorded on two auxiliary stacks and patched when the matching closer
//! arrives.
//!
//! Errors are collected per line so one bad line does not hide the rest of
//! the diagnostics; any recorded error blocks object emission later.

use crate::ast::{
    AssignTarget, CallTarget, ExprItem, PostfixElem, PostfixSlot, Program, Resolved, Statement,
    StatementKind,
};
use crate::builtins;
use crate::expr::{self, ExprEnd, ExprMode, ExprParser};
use crate::functions::{self, Function, FunctionArg};
use crate::lint::{Diagnostic, WarnKind};
use crate::optimizer;
use crate::postfix;
use crate::stats::CompileStats;
use crate::symbols::{static_local_name, ConstInt, ConstStr, InitValue, VarTables};
use crate::token::{Token, Tokenizer, MAX_LINE_LEN};
use crate::types::{BaseType, CompareOp, OptimizerHint, ReturnType, ValueClass, VarRef};

/// Deepest allowed nesting of open blocks.
const MAX_BLOCK_DEPTH: usize = 32;

/// Result of one compilation, errors and all.
#[derive(Debug)]
pub struct Compilation {
    pub program: Program,
    pub diagnostics: Vec<Diagnostic>,
    pub stats: CompileStats,
}

impl Compilation {
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == crate::lint::Severity::Error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == crate::lint::Severity::Error)
    }
}

/// One open block on the compile-time stack.
#[derive(Debug, Clone, Copy)]
enum Frame {
    If { stmt_idx: usize, from_elseif: bool },
    /// Synthetic jump emitted for `elseif`/`else`, patched at `endif`.
    EndIf { stmt_idx: usize },
    While { stmt_idx: usize },
    For { stmt_idx: usize },
    Loop { stmt_idx: usize },
    Repeat { stmt_idx: usize },
}

impl Frame {
    fn stmt_idx(&self) -> usize {
        match *self {
            Frame::If { stmt_idx, .. }
            | Frame::EndIf { stmt_idx }
            | Frame::While { stmt_idx }
            | Frame::For { stmt_idx }
            | Frame::Loop { stmt_idx }
            | Frame::Repeat { stmt_idx } => stmt_idx,
        }
    }

    fn keyword(&self) -> &'static str {
        match self {
            Frame::If { .. } | Frame::EndIf { .. } => "if",
            Frame::While { .. } => "while",
            Frame::For { .. } => "for",
            Frame::Loop { .. } => "loop",
            Frame::Repeat { .. } => "repeat",
        }
    }

    fn is_loop(&self) -> bool {
        matches!(
            self,
            Frame::While { .. } | Frame::For { .. } | Frame::Loop { .. } | Frame::Repeat { .. }
        )
    }
}

/// A `break`/`continue` waiting for its loop closer.
#[derive(Debug, Clone, Copy)]
struct PendingJump {
    stmt_idx: usize,
    opener_idx: usize,
}

/// The statement parser. One instance per compilation; consumed by
/// [`Parser::parse`].
pub struct Parser {
    program: Program,
    stats: CompileStats,
    diagnostics: Vec<Diagnostic>,
    current_fn: Option<usize>,
    stack: Vec<Frame>,
    breaks: Vec<PendingJump>,
    continues: Vec<PendingJump>,
    line: u32,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    pub fn new() -> Self {
        Parser {
            program: Program::default(),
            stats: CompileStats::default(),
            diagnostics: Vec::new(),
            current_fn: None,
            stack: Vec::new(),
            breaks: Vec::new(),
            continues: Vec::new(),
            line: 0,
        }
    }

    /// Compile a whole source text.
    pub fn parse(mut self, source: &str) -> Compilation {
        for (i, raw) in source.lines().enumerate() {
            self.line = (i + 1) as u32;
            self.stats.lines += 1;
            if raw.len() > MAX_LINE_LEN {
                self.error(format!("line exceeds {} characters", MAX_LINE_LEN));
                continue;
            }
            if let Err(msg) = self.parse_line(raw) {
                self.error(msg);
            }
        }
        self.finish();
        Compilation {
            program: self.program,
            diagnostics: self.diagnostics,
            stats: self.stats,
        }
    }

    fn parse_line(&mut self, text: &str) -> Result<(), String> {
        let mut tz = Tokenizer::new(text);
        let word = match tz.next(false)? {
            Token::Empty => return Ok(()),
            Token::Ident(w) => w,
            t => return Err(format!("a statement cannot start with {}", t.describe())),
        };
        match word.as_str() {
            "function" => self.stmt_function(&mut tz),
            "endfunction" => self.stmt_endfunction(&mut tz),
            "const" => self.stmt_const(&mut tz),
            "static" => self.stmt_static(&mut tz),
            "int" => self.declare(&mut tz, BaseType::Int, false),
            "byte" => self.declare(&mut tz, BaseType::Byte, false),
            "string" => self.declare(&mut tz, BaseType::Str, false),
            "if" => self.stmt_if(&mut tz),
            "elseif" => self.stmt_elseif(&mut tz),
            "else" => self.stmt_else(&mut tz),
            "endif" => self.stmt_endif(&mut tz),
            "while" => self.stmt_while(&mut tz),
            "endwhile" => self.close_loop(&mut tz, "endwhile"),
            "loop" => self.stmt_loop(&mut tz),
            "endloop" => self.close_loop(&mut tz, "endloop"),
            "for" => self.stmt_for(&mut tz),
            "endfor" => self.close_loop(&mut tz, "endfor"),
            "repeat" => self.stmt_repeat(&mut tz),
            "endrepeat" => self.close_loop(&mut tz, "endrepeat"),
            "break" => self.stmt_break(&mut tz),
            "continue" => self.stmt_continue(&mut tz),
            "return" => self.stmt_return(&mut tz),
            _ => self.stmt_assign_or_call(&word, &mut tz),
        }
    }

    // ------------------------------------------------------------------
    // helpers
    // ------------------------------------------------------------------

    fn error(&mut self, message: String) {
        self.diagnostics.push(Diagnostic::error(self.line, message));
    }

    fn warn(&mut self, kind: WarnKind, message: String) {
        self.diagnostics
            .push(Diagnostic::warning(self.line, kind, message));
    }

    fn emit(&mut self, kind: StatementKind) -> usize {
        let idx = self.program.statements.len();
        self.program.statements.push(Statement {
            line: self.line,
            next: idx + 1,
            kind,
        });
        idx
    }

    fn expect_line_end(&mut self, tz: &mut Tokenizer, what: &str) -> Result<(), String> {
        match tz.next(false)? {
            Token::Empty => Ok(()),
            t => Err(format!("unexpected {} after {}", t.describe(), what)),
        }
    }

    fn require_function(&self, kw: &str) -> Result<usize, String> {
        self.current_fn
            .ok_or_else(|| format!("'{}' outside of a function", kw))
    }

    fn check_block_depth(&self) -> Result<(), String> {
        if self.stack.len() >= MAX_BLOCK_DEPTH {
            return Err("blocks nested too deeply".to_string());
        }
        Ok(())
    }

    fn parse_expr(&mut self, tz: &mut Tokenizer, mode: ExprMode) -> Result<expr::ParsedExpr, String> {
        ExprParser::new(&mut self.program, self.current_fn, self.line).parse(tz, mode)
    }

    /// Convert an expression list: new postfix slot(s), constant folding and
    /// a type-sanity walk over everything that was allocated.
    fn expr_to_slot(&mut self, items: &[ExprItem]) -> Result<(usize, ValueClass), String> {
        let before = self.program.postfix.len();
        let slot = postfix::convert(&mut self.program, items)?;
        let mut class = ValueClass::Unknown;
        for s in before..self.program.postfix.len() {
            optimizer::fold_slot(&mut self.program, s, &mut self.stats)?;
            let c = postfix::value_class(&self.program, s)?;
            if s == slot {
                class = c;
            }
        }
        Ok((slot, class))
    }

    /// Fold a declaration initializer down to a single constant; scratch
    /// pool entries are reclaimed so no artifact of the folding remains.
    fn fold_const(&mut self, items: &[ExprItem]) -> Result<InitValue, String> {
        let before_slots = self.program.postfix.len();
        let before_fips = self.program.fips.len();
        let slot = postfix::convert(&mut self.program, items)?;
        optimizer::fold_slot(&mut self.program, slot, &mut self.stats)?;

        let constant = if slot == before_slots && self.program.fips.len() == before_fips {
            match self.program.postfix[slot].elems[..] {
                [PostfixElem::IntConst(v)] => Some(InitValue::Int(v)),
                [PostfixElem::StrConst(i)] => Some(InitValue::Str(i)),
                _ => None,
            }
        } else {
            None
        };
        self.program.postfix.truncate(before_slots);
        self.program.fips.truncate(before_fips);
        constant.ok_or_else(|| "initializer must be a constant expression".to_string())
    }

    // ------------------------------------------------------------------
    // declarations
    // ------------------------------------------------------------------

    fn stmt_function(&mut self, tz: &mut Tokenizer) -> Result<(), String> {
        if self.current_fn.is_some() {
            return Err("nested function definitions are not allowed".to_string());
        }
        let sig = expr::parse_signature(tz)?;
        self.expect_line_end(tz, "function header")?;

        if builtins::lookup(&sig.name).is_some() {
            return Err(format!("'{}' is a built-in function", sig.name));
        }
        if let Some(existing) = self.program.find_function(&sig.name) {
            return Err(format!(
                "function '{}' is already defined at line {}",
                sig.name, self.program.functions[existing].line
            ));
        }

        let mut func = Function {
            name: sig.name,
            line: self.line,
            first_statement: self.program.statements.len(),
            return_type: sig.ret,
            args: Vec::new(),
            locals: VarTables::default(),
            used_cnt: 0,
        };
        let mut shadowed = Vec::new();
        for (arg_name, ty) in &sig.args {
            if func.locals.find_any(arg_name).is_some() {
                return Err(format!("duplicate argument '{}'", arg_name));
            }
            let table = func.locals.table_mut(*ty, false);
            let idx = table.insert(arg_name, self.line, None, 0);
            table.entries[idx].set_cnt = 1; // written by the caller
            func.args.push(FunctionArg { idx, ty: *ty });
            if self.program.globals.find_any(arg_name).is_some()
                || self.program.find_const_int(arg_name).is_some()
                || self.program.find_const_str(arg_name).is_some()
            {
                shadowed.push(arg_name.clone());
            }
        }
        for name in shadowed {
            self.warn(
                WarnKind::Shadowing,
                format!("argument '{}' shadows a global", name),
            );
        }
        self.current_fn = Some(self.program.functions.len());
        self.program.functions.push(func);
        Ok(())
    }

    fn stmt_endfunction(&mut self, tz: &mut Tokenizer) -> Result<(), String> {
        let Some(f) = self.current_fn else {
            return Err("'endfunction' without 'function'".to_string());
        };
        self.expect_line_end(tz, "'endfunction'")?;
        self.current_fn = None;

        if let Some(frame) = self.stack.last() {
            let msg = format!(
                "unclosed '{}' opened at line {}",
                frame.keyword(),
                self.program.statements[frame.stmt_idx()].line
            );
            self.stack.clear();
            self.breaks.clear();
            self.continues.clear();
            return Err(msg);
        }

        let first_statement = self.program.functions[f].first_statement;
        let return_type = self.program.functions[f].return_type;
        let ends_with_return = self.program.statements.len() > first_statement
            && matches!(
                self.program.statements.last().map(|s| s.kind),
                Some(StatementKind::Return { .. })
            );
        if !ends_with_return {
            if return_type == ReturnType::Void {
                self.emit(StatementKind::Return { expr_slot: None });
            } else {
                return Err(format!(
                    "function '{}' is missing a return statement",
                    self.program.functions[f].name
                ));
            }
        }
        Ok(())
    }

    fn stmt_const(&mut self, tz: &mut Tokenizer) -> Result<(), String> {
        let ty = match tz.next(false)? {
            Token::Ident(kw) => kw,
            t => return Err(format!("expected 'int' or 'string' after 'const', got {}", t.describe())),
        };
        match ty.as_str() {
            "int" | "string" => {}
            "byte" => return Err("'const byte' is not supported; use 'const int'".to_string()),
            _ => return Err(format!("expected 'int' or 'string' after 'const', got '{}'", ty)),
        }
        let name = match tz.next(false)? {
            Token::Ident(n) => n,
            t => return Err(format!("expected a constant name, got {}", t.describe())),
        };
        match tz.next(false)? {
            Token::Equal => {}
            t => return Err(format!("expected '=' after constant name, got {}", t.describe())),
        }

        if self.program.find_const_int(&name).is_some()
            || self.program.find_const_str(&name).is_some()
        {
            return Err(format!("constant '{}' is already defined", name));
        }
        if self.program.globals.find_any(&name).is_some() {
            self.warn(
                WarnKind::Shadowing,
                format!("constant '{}' shadows a global variable", name),
            );
        }

        let parsed = self.parse_expr(tz, ExprMode::Normal)?;
        expr::check_value_uses(&mut self.program, &parsed.items, false)?;
        let value = self.fold_const(&parsed.items)?;

        match (ty.as_str(), value) {
            ("int", InitValue::Int(v)) => self.program.const_ints.push(ConstInt {
                name,
                line: self.line,
                value: v,
                used_cnt: 0,
            }),
            ("string", InitValue::Str(i)) => self.program.const_strs.push(ConstStr {
                name,
                line: self.line,
                str_idx: i,
                used_cnt: 0,
            }),
            ("int", InitValue::Str(_)) => {
                return Err(format!("string initializer for int constant '{}'", name));
            }
            ("string", InitValue::Int(_)) => {
                return Err(format!("numeric initializer for string constant '{}'", name));
            }
            _ => unreachable!("constant type was validated above"),
        }
        Ok(())
    }

    fn stmt_static(&mut self, tz: &mut Tokenizer) -> Result<(), String> {
        let ty = match tz.next(false)? {
            Token::Ident(kw) => match kw.as_str() {
                "int" => BaseType::Int,
                "byte" => BaseType::Byte,
                "string" => BaseType::Str,
                _ => return Err(format!("expected a type after 'static', got '{}'", kw)),
            },
            t => return Err(format!("expected a type after 'static', got {}", t.describe())),
        };
        if self.current_fn.is_none() {
            // globals are static anyway
            self.warn(
                WarnKind::StaticGlobal,
                "'static' at global scope has no effect".to_string(),
            );
            return self.declare(tz, ty, false);
        }
        self.declare(tz, ty, true)
    }

    fn declare(&mut self, tz: &mut Tokenizer, ty: BaseType, is_static: bool) -> Result<(), String> {
        let name = match tz.next(false)? {
            Token::Ident(n) => n,
            t => return Err(format!("expected a variable name, got {}", t.describe())),
        };

        let mut array_size: Option<usize> = None;
        let mut init: Option<InitValue> = None;
        match tz.next(false)? {
            Token::Empty => {}
            Token::OpenBracket => {
                let size = match tz.next(false)? {
                    Token::Int(v) => v,
                    Token::Ident(cn) => match self.program.find_const_int(&cn) {
                        Some(i) => {
                            self.program.const_ints[i].used_cnt += 1;
                            self.program.const_ints[i].value
                        }
                        None => return Err(format!("array size '{}' is not a const int", cn)),
                    },
                    t => return Err(format!("expected an array size, got {}", t.describe())),
                };
                if size <= 0 {
                    return Err("array size must be positive".to_string());
                }
                match tz.next(false)? {
                    Token::CloseBracket => {}
                    t => return Err(format!("expected ']', got {}", t.describe())),
                }
                self.expect_line_end(tz, "array declaration")?;
                array_size = Some(size as usize);
            }
            Token::Equal => {
                let parsed = self.parse_expr(tz, ExprMode::Normal)?;
                expr::check_value_uses(&mut self.program, &parsed.items, false)?;
                let value = self.fold_const(&parsed.items)?;
                init = Some(match (ty, value) {
                    (BaseType::Int, v @ InitValue::Int(_)) => v,
                    (BaseType::Byte, InitValue::Int(v)) => {
                        if !(0..=255).contains(&v) {
                            return Err(format!("byte initializer {} is out of range 0..255", v));
                        }
                        InitValue::Int(v)
                    }
                    (BaseType::Str, v @ InitValue::Str(_)) => v,
                    (BaseType::Str, InitValue::Int(_)) => {
                        return Err(format!("numeric initializer for string variable '{}'", name));
                    }
                    (_, InitValue::Str(_)) => {
                        return Err(format!("string initializer for {} variable '{}'", ty, name));
                    }
                });
            }
            t => return Err(format!("unexpected {} in declaration", t.describe())),
        }
        let array = array_size.is_some();
        let size = array_size.unwrap_or(0);

        match self.current_fn {
            Some(f) => {
                let func_name = self.program.functions[f].name.clone();
                let mangled = static_local_name(&func_name, &name);
                if self.program.functions[f].locals.find_any(&name).is_some()
                    || self.program.globals.find_any(&mangled).is_some()
                {
                    return Err(format!("'{}' is already defined in this function", name));
                }
                if self.program.globals.find_any(&name).is_some()
                    || self.program.find_const_int(&name).is_some()
                    || self.program.find_const_str(&name).is_some()
                {
                    self.warn(
                        WarnKind::Shadowing,
                        format!("local '{}' shadows a global", name),
                    );
                }
                if is_static {
                    // statics live in the global tables; initialized once
                    self.program
                        .globals
                        .table_mut(ty, array)
                        .insert(&mangled, self.line, init, size);
                } else {
                    let idx = self.program.functions[f]
                        .locals
                        .table_mut(ty, array)
                        .insert(&name, self.line, init, size);
                    // a local initializer runs where it is declared
                    if let Some(init) = init {
                        let elems = vec![match init {
                            InitValue::Int(v) => PostfixElem::IntConst(v),
                            InitValue::Str(i) => PostfixElem::StrConst(i),
                        }];
                        self.program.postfix.push(PostfixSlot {
                            elems,
                            hint: OptimizerHint::None,
                        });
                        let slot = self.program.postfix.len() - 1;
                        let var = VarRef {
                            scope: crate::types::Scope::Local,
                            ty,
                            idx,
                        };
                        self.emit(StatementKind::Assign {
                            target: Some(AssignTarget {
                                var,
                                index_slot: None,
                            }),
                            expr_slot: slot,
                        });
                    }
                }
            }
            None => {
                if self.program.globals.find_any(&name).is_some() {
                    return Err(format!("'{}' is already defined", name));
                }
                if self.program.find_const_int(&name).is_some()
                    || self.program.find_const_str(&name).is_some()
                {
                    self.warn(
                        WarnKind::Shadowing,
                        format!("variable '{}' is shadowed by a constant", name),
                    );
                }
                self.program
                    .globals
                    .table_mut(ty, array)
                    .insert(&name, self.line, init, size);
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // control flow
    // ------------------------------------------------------------------

    /// Parse `expr CMP expr` and return the two postfix slots.
    fn parse_condition(&mut self, tz: &mut Tokenizer) -> Result<(usize, CompareOp, usize), String> {
        let left = self.parse_expr(tz, ExprMode::Compare)?;
        let ExprEnd::Compare(cmp) = left.end else {
            unreachable!("compare mode ends at a comparison operator");
        };
        expr::check_value_uses(&mut self.program, &left.items, false)?;
        let (left_slot, left_class) = self.expr_to_slot(&left.items)?;

        let right = self.parse_expr(tz, ExprMode::Normal)?;
        expr::check_value_uses(&mut self.program, &right.items, false)?;
        let (right_slot, right_class) = self.expr_to_slot(&right.items)?;

        if !left_class.compatible(right_class) {
            return Err("cannot compare a number with a string".to_string());
        }
        Ok((left_slot, cmp, right_slot))
    }

    fn stmt_if(&mut self, tz: &mut Tokenizer) -> Result<(), String> {
        self.require_function("if")?;
        self.check_block_depth()?;
        let (left, cmp, right) = self.parse_condition(tz)?;
        let idx = self.emit(StatementKind::If {
            left,
            cmp,
            right,
            false_idx: None,
        });
        self.stack.push(Frame::If {
            stmt_idx: idx,
            from_elseif: false,
        });
        Ok(())
    }

    /// The most recent open `if` of the innermost block, looking through the
    /// pending jump frames of its earlier branches.
    fn innermost_if(&self) -> Option<usize> {
        for frame in self.stack.iter().rev() {
            match frame {
                Frame::EndIf { .. } => continue,
                Frame::If { stmt_idx, .. } => return Some(*stmt_idx),
                _ => return None,
            }
        }
        None
    }

    fn if_false_idx(&self, if_idx: usize) -> Option<usize> {
        match self.program.statements[if_idx].kind {
            StatementKind::If { false_idx, .. } => false_idx,
            _ => None,
        }
    }

    fn patch_false_idx(&mut self, if_idx: usize, target: usize) {
        if let StatementKind::If { false_idx, .. } = &mut self.program.statements[if_idx].kind {
            *false_idx = Some(target);
        }
    }

    fn stmt_elseif(&mut self, tz: &mut Tokenizer) -> Result<(), String> {
        let if_idx = self
            .innermost_if()
            .ok_or_else(|| "'elseif' without 'if'".to_string())?;
        if self.if_false_idx(if_idx).is_some() {
            return Err("'elseif' after 'else'".to_string());
        }
        // jump over the remaining branches once this branch has run
        let goto = self.emit(StatementKind::EndIf { if_idx });
        self.stack.push(Frame::EndIf { stmt_idx: goto });
        // the failed condition falls through to the new one
        self.patch_false_idx(if_idx, goto + 1);

        let (left, cmp, right) = self.parse_condition(tz)?;
        let idx = self.emit(StatementKind::If {
            left,
            cmp,
            right,
            false_idx: None,
        });
        self.stack.push(Frame::If {
            stmt_idx: idx,
            from_elseif: true,
        });
        Ok(())
    }

    fn stmt_else(&mut self, tz: &mut Tokenizer) -> Result<(), String> {
        self.expect_line_end(tz, "'else'")?;
        let if_idx = self
            .innermost_if()
            .ok_or_else(|| "'else' without 'if'".to_string())?;
        if self.if_false_idx(if_idx).is_some() {
            return Err("'else' after 'else'".to_string());
        }
        let goto = self.emit(StatementKind::EndIf { if_idx });
        self.stack.push(Frame::EndIf { stmt_idx: goto });
        self.patch_false_idx(if_idx, goto + 1);
        Ok(())
    }

    fn stmt_endif(&mut self, tz: &mut Tokenizer) -> Result<(), String> {
        self.expect_line_end(tz, "'endif'")?;
        match self.stack.last() {
            Some(Frame::If { .. }) | Some(Frame::EndIf { .. }) => {}
            Some(other) => {
                return Err(format!(
                    "'endif' found but the innermost open block is '{}'",
                    other.keyword()
                ));
            }
            None => return Err("'endif' without 'if'".to_string()),
        }

        let n = self.emit(StatementKind::EndIf { if_idx: 0 });
        loop {
            match self.stack.pop() {
                Some(Frame::EndIf { stmt_idx }) => {
                    // branch jumps land on the endif
                    self.program.statements[stmt_idx].next = n;
                }
                Some(Frame::If {
                    stmt_idx,
                    from_elseif,
                }) => {
                    if self.if_false_idx(stmt_idx).is_none() {
                        self.patch_false_idx(stmt_idx, n);
                    }
                    if let StatementKind::EndIf { if_idx } = &mut self.program.statements[n].kind {
                        *if_idx = stmt_idx;
                    }
                    if !from_elseif {
                        break;
                    }
                }
                _ => return Err("internal: malformed if chain".to_string()),
            }
        }
        Ok(())
    }

    fn stmt_while(&mut self, tz: &mut Tokenizer) -> Result<(), String> {
        self.require_function("while")?;
        self.check_block_depth()?;
        let (left, cmp, right) = self.parse_condition(tz)?;
        let idx = self.emit(StatementKind::While {
            left,
            cmp,
            right,
            end_idx: 0,
        });
        self.stack.push(Frame::While { stmt_idx: idx });
        Ok(())
    }

    fn stmt_loop(&mut self, tz: &mut Tokenizer) -> Result<(), String> {
        self.require_function("loop")?;
        self.check_block_depth()?;
        self.expect_line_end(tz, "'loop'")?;
        let idx = self.emit(StatementKind::Loop { end_idx: 0 });
        self.stack.push(Frame::Loop { stmt_idx: idx });
        Ok(())
    }

    fn stmt_repeat(&mut self, tz: &mut Tokenizer) -> Result<(), String> {
        self.require_function("repeat")?;
        self.check_block_depth()?;
        let parsed = self.parse_expr(tz, ExprMode::Normal)?;
        expr::check_value_uses(&mut self.program, &parsed.items, false)?;
        let (count, class) = self.expr_to_slot(&parsed.items)?;
        if class == ValueClass::Text {
            return Err("repeat count must be numeric".to_string());
        }
        let idx = self.emit(StatementKind::Repeat { count, end_idx: 0 });
        self.stack.push(Frame::Repeat { stmt_idx: idx });
        Ok(())
    }

    fn stmt_for(&mut self, tz: &mut Tokenizer) -> Result<(), String> {
        self.require_function("for")?;
        self.check_block_depth()?;
        let name = match tz.next(false)? {
            Token::Ident(n) => n,
            t => return Err(format!("expected a variable after 'for', got {}", t.describe())),
        };
        let var = match self.program.resolve_name(self.current_fn, &name) {
            Some(Resolved::Var { var, array: false }) if var.ty == BaseType::Int => var,
            Some(Resolved::Var { .. }) => {
                return Err(format!("for variable '{}' must be a scalar int", name));
            }
            Some(_) => return Err(format!("cannot use constant '{}' as a for variable", name)),
            None => return Err(format!("'{}' is not defined", name)),
        };
        match tz.next(false)? {
            Token::Equal => {}
            t => return Err(format!("expected '=' after for variable, got {}", t.describe())),
        }

        let start = self.parse_expr(tz, ExprMode::ForTo)?;
        expr::check_value_uses(&mut self.program, &start.items, false)?;
        let (start_slot, start_class) = self.expr_to_slot(&start.items)?;

        let stop = self.parse_expr(tz, ExprMode::ForStep)?;
        expr::check_value_uses(&mut self.program, &stop.items, false)?;
        let (stop_slot, stop_class) = self.expr_to_slot(&stop.items)?;

        let step_slot = if stop.end == ExprEnd::Step {
            let step = self.parse_expr(tz, ExprMode::Normal)?;
            expr::check_value_uses(&mut self.program, &step.items, false)?;
            let (slot, class) = self.expr_to_slot(&step.items)?;
            if class == ValueClass::Text {
                return Err("for step must be numeric".to_string());
            }
            Some(slot)
        } else {
            None
        };
        if start_class == ValueClass::Text || stop_class == ValueClass::Text {
            return Err("for bounds must be numeric".to_string());
        }

        self.program.symbol_mut(self.current_fn, var, false).set_cnt += 1;
        let idx = self.emit(StatementKind::For {
            var,
            start: start_slot,
            stop: stop_slot,
            step: step_slot,
            end_idx: 0,
        });
        self.stack.push(Frame::For { stmt_idx: idx });
        Ok(())
    }

    /// Shared closer for the four loop forms: emits the closer statement,
    /// links it to its opener both ways, and resolves the pending
    /// break/continue jumps recorded for this loop.
    fn close_loop(&mut self, tz: &mut Tokenizer, kw: &'static str) -> Result<(), String> {
        self.expect_line_end(tz, kw)?;
        let opener_kw = &kw[3..];
        let frame = match self.stack.pop() {
            Some(f) => f,
            None => return Err(format!("'{}' without '{}'", kw, opener_kw)),
        };
        let opener = frame.stmt_idx();

        let (closer_kind, closer_next) = match (kw, frame) {
            ("endwhile", Frame::While { .. }) => {
                (StatementKind::EndWhile { while_idx: opener }, opener)
            }
            ("endfor", Frame::For { .. }) => (StatementKind::EndFor { for_idx: opener }, opener + 1),
            ("endloop", Frame::Loop { .. }) => {
                (StatementKind::EndLoop { loop_idx: opener }, opener + 1)
            }
            ("endrepeat", Frame::Repeat { .. }) => {
                (StatementKind::EndRepeat { repeat_idx: opener }, opener + 1)
            }
            _ => {
                self.stack.push(frame);
                return Err(format!(
                    "'{}' found but the innermost open block is '{}'",
                    kw,
                    frame.keyword()
                ));
            }
        };

        let n = self.emit(closer_kind);
        self.program.statements[n].next = closer_next;
        match &mut self.program.statements[opener].kind {
            StatementKind::While { end_idx, .. }
            | StatementKind::Loop { end_idx }
            | StatementKind::For { end_idx, .. }
            | StatementKind::Repeat { end_idx, .. } => *end_idx = n,
            _ => {}
        }

        // breaks leave the loop, continues re-run the closer so that loop
        // variables and counters keep moving
        let breaks = std::mem::take(&mut self.breaks);
        for jump in breaks {
            if jump.opener_idx == opener {
                self.program.statements[jump.stmt_idx].next = n + 1;
            } else {
                self.breaks.push(jump);
            }
        }
        let continues = std::mem::take(&mut self.continues);
        for jump in continues {
            if jump.opener_idx == opener {
                self.program.statements[jump.stmt_idx].next = n;
            } else {
                self.continues.push(jump);
            }
        }
        Ok(())
    }

    fn stmt_break(&mut self, tz: &mut Tokenizer) -> Result<(), String> {
        self.expect_line_end(tz, "'break'")?;
        let frame = self
            .stack
            .iter()
            .rev()
            .find(|f| f.is_loop())
            .copied()
            .ok_or_else(|| "'break' outside of a loop".to_string())?;
        let n = self.emit(StatementKind::Break);
        self.breaks.push(PendingJump {
            stmt_idx: n,
            opener_idx: frame.stmt_idx(),
        });
        Ok(())
    }

    fn stmt_continue(&mut self, tz: &mut Tokenizer) -> Result<(), String> {
        self.expect_line_end(tz, "'continue'")?;
        let frame = self
            .stack
            .iter()
            .rev()
            .find(|f| f.is_loop())
            .copied()
            .ok_or_else(|| "'continue' outside of a loop".to_string())?;
        let n = self.emit(StatementKind::Continue);
        match frame {
            // while re-evaluates its condition, loop restarts its body
            Frame::While { stmt_idx } => self.program.statements[n].next = stmt_idx,
            Frame::Loop { stmt_idx } => self.program.statements[n].next = stmt_idx + 1,
            // for/repeat must run the closer to advance; patched there
            Frame::For { stmt_idx } | Frame::Repeat { stmt_idx } => {
                self.continues.push(PendingJump {
                    stmt_idx: n,
                    opener_idx: stmt_idx,
                });
            }
            _ => {}
        }
        Ok(())
    }

    fn stmt_return(&mut self, tz: &mut Tokenizer) -> Result<(), String> {
        let f = self.require_function("return")?;
        let ret = self.program.functions[f].return_type;
        let name = self.program.functions[f].name.clone();

        if tz.peek(false)? == Token::Empty {
            if ret != ReturnType::Void {
                return Err(format!("function '{}' must return a value", name));
            }
            self.emit(StatementKind::Return { expr_slot: None });
            return Ok(());
        }
        if ret == ReturnType::Void {
            return Err(format!("void function '{}' cannot return a value", name));
        }

        let parsed = self.parse_expr(tz, ExprMode::Normal)?;
        expr::check_value_uses(&mut self.program, &parsed.items, false)?;
        let (slot, class) = self.expr_to_slot(&parsed.items)?;
        let wanted = ret.class().expect("non-void return");
        if !class.compatible(wanted) {
            return Err(format!(
                "return value of '{}' must be {}",
                name,
                match wanted {
                    ValueClass::Text => "a string",
                    _ => "numeric",
                }
            ));
        }
        self.emit(StatementKind::Return {
            expr_slot: Some(slot),
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // assignments and calls
    // ------------------------------------------------------------------

    fn stmt_assign_or_call(&mut self, word: &str, tz: &mut Tokenizer) -> Result<(), String> {
        if self.current_fn.is_none() {
            return Err("executable statements must be inside a function".to_string());
        }

        if tz.peek(false)? == Token::OpenParen {
            let items = ExprParser::new(&mut self.program, self.current_fn, self.line)
                .parse_call_statement(word, tz)?;
            expr::check_value_uses(&mut self.program, &items, true)?;
            let (slot, _class) = self.expr_to_slot(&items)?;
            self.emit(StatementKind::Assign {
                target: None,
                expr_slot: slot,
            });
            return Ok(());
        }

        let (var, is_array) = match self.program.resolve_name(self.current_fn, word) {
            Some(Resolved::Var { var, array }) => (var, array),
            Some(Resolved::ConstInt(_)) | Some(Resolved::ConstStr(_)) => {
                return Err(format!("cannot assign to constant '{}'", word));
            }
            None => {
                if builtins::lookup(word).is_some() || self.program.find_function(word).is_some() {
                    return Err(format!("function '{}' needs argument brackets", word));
                }
                return Err(format!("'{}' is not defined", word));
            }
        };

        let mut index_slot = None;
        let mut next = tz.next(false)?;
        if is_array {
            if next != Token::OpenBracket {
                return Err(format!("array '{}' needs an index", word));
            }
            let items = ExprParser::new(&mut self.program, self.current_fn, self.line)
                .parse_index(tz)?;
            let (slot, class) = self.expr_to_slot(&items)?;
            if class == ValueClass::Text {
                return Err("array index must be numeric".to_string());
            }
            index_slot = Some(slot);
            next = tz.next(false)?;
        } else if next == Token::OpenBracket {
            return Err(format!("'{}' is not an array", word));
        }
        if next != Token::Equal {
            return Err(format!("expected '=' after '{}', got {}", word, next.describe()));
        }

        let parsed = self.parse_expr(tz, ExprMode::Normal)?;
        expr::check_value_uses(&mut self.program, &parsed.items, false)?;
        let (slot, class) = self.expr_to_slot(&parsed.items)?;
        if !class.compatible(var.ty.class()) {
            return Err(format!(
                "cannot assign {} to {} '{}'",
                match class {
                    ValueClass::Text => "a string",
                    _ => "a number",
                },
                var.ty.keyword(),
                word
            ));
        }
        self.program.symbol_mut(self.current_fn, var, is_array).set_cnt += 1;

        // v = v + k and v = k + v collapse to a single increment; the
        // self-read disappears with the rewrite, so its count is deducted
        if !is_array && var.ty != BaseType::Str {
            if let Some(step) = increment_step(&self.program.postfix[slot].elems, var) {
                self.program.symbol_mut(self.current_fn, var, false).used_cnt -= 1;
                debug_assert_eq!(slot, self.program.postfix.len() - 1);
                self.program.postfix.pop();
                self.stats.increment_rewrites += 1;
                self.emit(StatementKind::Increment { var, step });
                return Ok(());
            }
        }

        self.emit(StatementKind::Assign {
            target: Some(AssignTarget { var, index_slot }),
            expr_slot: slot,
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // end of file
    // ------------------------------------------------------------------

    fn finish(&mut self) {
        if let Some(f) = self.current_fn.take() {
            let func = &self.program.functions[f];
            self.diagnostics.push(Diagnostic::error(
                func.line,
                format!("missing 'endfunction' for function '{}'", func.name),
            ));
        }
        let frames: Vec<Frame> = self.stack.drain(..).collect();
        for frame in frames {
            let line = self.program.statements[frame.stmt_idx()].line;
            self.diagnostics
                .push(Diagnostic::error(line, format!("unclosed '{}'", frame.keyword())));
        }
        self.breaks.clear();
        self.continues.clear();

        for (line, msg) in functions::resolve_forward_references(&mut self.program) {
            self.diagnostics.push(Diagnostic::error(line, msg));
        }
        for (line, msg) in self.check_call_types() {
            self.diagnostics.push(Diagnostic::error(line, msg));
        }

        match self.program.find_function("main") {
            None => self
                .diagnostics
                .push(Diagnostic::error(0, "no 'main' function defined".to_string())),
            Some(m) if self.program.functions[m].return_type != ReturnType::Void => {
                self.diagnostics.push(Diagnostic::error(
                    self.program.functions[m].line,
                    "'main' must be a void function".to_string(),
                ));
            }
            _ => {}
        }

        // fast-path hints, now that forward references are call operands
        for slot in 0..self.program.postfix.len() {
            if optimizer::classify_slot(&mut self.program, slot) != OptimizerHint::None {
                self.stats.hinted_slots += 1;
            }
        }
    }

    /// Late type checks that need resolved calls: array indices must be
    /// numeric and user-function arguments must match the declared types.
    fn check_call_types(&self) -> Vec<(u32, String)> {
        let mut errors = Vec::new();
        for fip in &self.program.fips {
            match fip.target {
                CallTarget::Index(_) => {
                    if let Some(&slot) = fip.arg_slots.first() {
                        if postfix::value_class(&self.program, slot) == Ok(ValueClass::Text) {
                            errors.push((fip.line, "array index must be numeric".to_string()));
                        }
                    }
                }
                CallTarget::User(f) => {
                    let func = &self.program.functions[f];
                    for (i, (arg, &slot)) in
                        func.args.iter().zip(fip.arg_slots.iter()).enumerate()
                    {
                        if let Ok(class) = postfix::value_class(&self.program, slot) {
                            if !class.compatible(arg.ty.class()) {
                                errors.push((
                                    fip.line,
                                    format!(
                                        "argument {} of '{}' must be {}",
                                        i + 1,
                                        func.name,
                                        match arg.ty {
                                            BaseType::Str => "a string",
                                            _ => "numeric",
                                        }
                                    ),
                                ));
                            }
                        }
                    }
                }
                _ => {}
            }
        }
        errors
    }
}

/// Match the increment shapes `v k +`, `v k -` and `k v +` against the
/// assignment target.
fn increment_step(elems: &[PostfixElem], var: VarRef) -> Option<i32> {
    match *elems {
        [PostfixElem::Var(v), PostfixElem::IntConst(k), PostfixElem::Op('+')] if v == var => {
            Some(k)
        }
        [PostfixElem::Var(v), PostfixElem::IntConst(k), PostfixElem::Op('-')] if v == var => {
            Some(k.wrapping_neg())
        }
        [PostfixElem::IntConst(k), PostfixElem::Var(v), PostfixElem::Op('+')] if v == var => {
            Some(k)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Scope;

    fn compile(source: &str) -> Compilation {
        Parser::new().parse(source)
    }

    fn compile_ok(source: &str) -> Compilation {
        let c = compile(source);
        assert!(
            !c.has_errors(),
            "unexpected errors: {:?}",
            c.errors().collect::<Vec<_>>()
        );
        c
    }

    #[test]
    fn test_empty_void_main() {
        let c = compile_ok("function void main()\nendfunction\n");
        assert_eq!(c.program.functions.len(), 1);
        let main = &c.program.functions[0];
        assert_eq!(main.name, "main");
        assert_eq!(main.first_statement, 0);
        // only the synthesized implicit return
        assert_eq!(c.program.statements.len(), 1);
        assert!(matches!(
            c.program.statements[0].kind,
            StatementKind::Return { expr_slot: None }
        ));
    }

    #[test]
    fn test_missing_main_is_fatal() {
        let c = compile("function void helper()\nendfunction\n");
        assert!(c.has_errors());
        assert!(c.errors().any(|d| d.message.contains("no 'main'")));
    }

    #[test]
    fn test_non_void_main_is_fatal() {
        let c = compile("function int main()\n  return 0\nendfunction\n");
        assert!(c.has_errors());
        assert!(c.errors().any(|d| d.message.contains("must be a void")));
    }

    #[test]
    fn test_global_initializer_is_folded() {
        let c = compile_ok("int x = 2 + 3 * 4\nfunction void main()\n  x = 0\nendfunction\n");
        let sym = &c.program.globals.int_vars.entries[0];
        assert_eq!(sym.init, Some(InitValue::Int(14)));
        // the scratch slot was reclaimed: only the assignment's slot remains
        assert_eq!(c.program.postfix.len(), 1);
    }

    #[test]
    fn test_non_constant_initializer_is_an_error() {
        let c = compile("int x = 1\nint y = x + 1\nfunction void main()\nendfunction\n");
        assert!(c.has_errors());
        assert!(c
            .errors()
            .any(|d| d.message.contains("constant expression") && d.line == 2));
    }

    #[test]
    fn test_string_concat_folds_to_single_constant() {
        let c = compile_ok(
            "string s\nfunction void main()\n  s = \"a\" : 42 : \"b\"\nendfunction\n",
        );
        // assignment slot holds one folded constant tagged as such
        let assign_slot = c
            .program
            .statements
            .iter()
            .find_map(|s| match s.kind {
                StatementKind::Assign {
                    target: Some(_),
                    expr_slot,
                } => Some(expr_slot),
                _ => None,
            })
            .unwrap();
        let slot = &c.program.postfix[assign_slot];
        let [PostfixElem::StrConst(idx)] = slot.elems[..] else {
            panic!("expected a single folded string, got {:?}", slot.elems);
        };
        assert_eq!(c.program.strings.get(idx), "a42b");
        assert_eq!(slot.hint, OptimizerHint::ConstNoOp);
    }

    #[test]
    fn test_forward_reference_resolves() {
        let c = compile_ok(
            "function void main()\n  foo(3)\nendfunction\nfunction void foo(int x)\n  x = 0\nendfunction\n",
        );
        let foo = c.program.find_function("foo").unwrap();
        assert_eq!(c.program.functions[foo].used_cnt, 1);
        for slot in &c.program.postfix {
            for elem in &slot.elems {
                assert!(!matches!(elem, PostfixElem::UndefFunc(_)));
            }
        }
        // the call operand now targets foo
        let call = c
            .program
            .fips
            .iter()
            .find(|f| matches!(f.target, CallTarget::User(_)))
            .unwrap();
        assert!(matches!(call.target, CallTarget::User(i) if i == foo));
    }

    #[test]
    fn test_unresolved_forward_reference_is_fatal() {
        let c = compile("function void main()\n  ghost(1)\nendfunction\n");
        assert!(c.has_errors());
        assert!(c.errors().any(|d| d.message.contains("'ghost' is not defined")));
    }

    #[test]
    fn test_increment_rewrite_plus() {
        let c = compile_ok(
            "function void main()\n  int i\n  i = i + 1\nendfunction\n",
        );
        let inc = c
            .program
            .statements
            .iter()
            .find_map(|s| match s.kind {
                StatementKind::Increment { var, step } => Some((var, step)),
                _ => None,
            })
            .expect("increment statement");
        assert_eq!(inc.1, 1);
        assert_eq!(inc.0.scope, Scope::Local);
        // the rewrite consumed the rhs slot
        assert!(c.program.postfix.is_empty());
        assert_eq!(c.stats.increment_rewrites, 1);
    }

    #[test]
    fn test_increment_rewrite_variants() {
        let c = compile_ok(
            "function void main()\n  int i\n  i = 1 + i\n  i = i - 3\nendfunction\n",
        );
        let steps: Vec<i32> = c
            .program
            .statements
            .iter()
            .filter_map(|s| match s.kind {
                StatementKind::Increment { step, .. } => Some(step),
                _ => None,
            })
            .collect();
        assert_eq!(steps, vec![1, -3]);
    }

    #[test]
    fn test_increment_rewrite_corrects_used_count() {
        let c = compile_ok(
            "function void main()\n  int i\n  i = i + 1\nendfunction\n",
        );
        let sym = &c.program.functions[0].locals.int_vars.entries[0];
        // the self-read was deducted; only the two writes remain
        assert_eq!(sym.used_cnt, 0);
        assert_eq!(sym.set_cnt, 1);
    }

    #[test]
    fn test_k_minus_v_is_not_an_increment() {
        let c = compile_ok(
            "function void main()\n  int i\n  i = 3 - i\nendfunction\n",
        );
        assert!(c
            .program
            .statements
            .iter()
            .all(|s| !matches!(s.kind, StatementKind::Increment { .. })));
    }

    #[test]
    fn test_if_endif_linkage() {
        let c = compile_ok(
            "function void main()\n  int x\n  if x = 5\n    x = 0\n  endif\nendfunction\n",
        );
        let (if_idx, false_idx) = c
            .program
            .statements
            .iter()
            .enumerate()
            .find_map(|(i, s)| match s.kind {
                StatementKind::If { false_idx, .. } => Some((i, false_idx)),
                _ => None,
            })
            .unwrap();
        let endif_idx = c
            .program
            .statements
            .iter()
            .position(|s| matches!(s.kind, StatementKind::EndIf { .. }))
            .unwrap();
        let false_idx = false_idx.expect("false_idx patched");
        assert!(false_idx > if_idx);
        assert!(false_idx <= endif_idx);
    }

    #[test]
    fn test_elseif_chain_patches_each_branch() {
        let c = compile_ok(
            "function void main()\n  int x\n  if x = 1\n    x = 10\n  elseif x = 2\n    x = 20\n  else\n    x = 30\n  endif\nendfunction\n",
        );
        let p = &c.program;
        let ifs: Vec<(usize, Option<usize>)> = p
            .statements
            .iter()
            .enumerate()
            .filter_map(|(i, s)| match s.kind {
                StatementKind::If { false_idx, .. } => Some((i, false_idx)),
                _ => None,
            })
            .collect();
        assert_eq!(ifs.len(), 2);
        let final_endif = p.statements.len() - 2; // before the implicit return
        for (i, false_idx) in &ifs {
            let fi = false_idx.expect("every if was patched");
            assert!(fi > *i && fi <= final_endif);
        }
        // the synthetic jumps land on the final endif
        for (i, s) in p.statements.iter().enumerate() {
            if let StatementKind::EndIf { .. } = s.kind {
                if i != final_endif {
                    assert_eq!(s.next, final_endif);
                }
            }
        }
    }

    #[test]
    fn test_double_else_is_an_error() {
        let c = compile(
            "function void main()\n  int x\n  if x = 1\n  else\n  else\n  endif\nendfunction\n",
        );
        assert!(c.has_errors());
        assert!(c.errors().any(|d| d.message.contains("'else' after 'else'")));
    }

    #[test]
    fn test_while_linkage_and_break_target() {
        let c = compile_ok(
            "function void main()\n  int x\n  while x < 10\n    if x = 5\n      break\n    endif\n    x = x + 1\n  endwhile\nendfunction\n",
        );
        let p = &c.program;
        let while_idx = p
            .statements
            .iter()
            .position(|s| matches!(s.kind, StatementKind::While { .. }))
            .unwrap();
        let endwhile_idx = p
            .statements
            .iter()
            .position(|s| matches!(s.kind, StatementKind::EndWhile { .. }))
            .unwrap();
        match p.statements[while_idx].kind {
            StatementKind::While { end_idx, .. } => assert_eq!(end_idx, endwhile_idx),
            _ => unreachable!(),
        }
        match p.statements[endwhile_idx].kind {
            StatementKind::EndWhile { while_idx: w } => assert_eq!(w, while_idx),
            _ => unreachable!(),
        }
        assert_eq!(p.statements[endwhile_idx].next, while_idx);
        let break_idx = p
            .statements
            .iter()
            .position(|s| matches!(s.kind, StatementKind::Break))
            .unwrap();
        assert_eq!(p.statements[break_idx].next, endwhile_idx + 1);
    }

    #[test]
    fn test_continue_targets_by_loop_kind() {
        let c = compile_ok(
            "function void main()\n  int i\n  while i < 3\n    continue\n  endwhile\n  for i = 0 to 5\n    continue\n  endfor\n  loop\n    break\n    continue\n  endloop\nendfunction\n",
        );
        let p = &c.program;
        let mut continues = p
            .statements
            .iter()
            .enumerate()
            .filter(|(_, s)| matches!(s.kind, StatementKind::Continue));
        let while_idx = p
            .statements
            .iter()
            .position(|s| matches!(s.kind, StatementKind::While { .. }))
            .unwrap();
        let (_, c1) = continues.next().unwrap();
        assert_eq!(c1.next, while_idx);

        let endfor_idx = p
            .statements
            .iter()
            .position(|s| matches!(s.kind, StatementKind::EndFor { .. }))
            .unwrap();
        let (_, c2) = continues.next().unwrap();
        assert_eq!(c2.next, endfor_idx);

        let loop_idx = p
            .statements
            .iter()
            .position(|s| matches!(s.kind, StatementKind::Loop { .. }))
            .unwrap();
        let (_, c3) = continues.next().unwrap();
        assert_eq!(c3.next, loop_idx + 1);
    }

    #[test]
    fn test_for_with_step() {
        let c = compile_ok(
            "function void main()\n  int i\n  for i = 10 to 0 step -2\n    i = i\n  endfor\nendfunction\n",
        );
        let p = &c.program;
        let for_stmt = p
            .statements
            .iter()
            .find_map(|s| match s.kind {
                StatementKind::For { step, .. } => Some(step),
                _ => None,
            })
            .unwrap();
        let step_slot = for_stmt.expect("step slot present");
        assert_eq!(p.postfix[step_slot].elems, vec![PostfixElem::IntConst(-2)]);
    }

    #[test]
    fn test_for_variable_must_be_int() {
        let c = compile(
            "function void main()\n  string s\n  for s = 0 to 5\n  endfor\nendfunction\n",
        );
        assert!(c.has_errors());
        assert!(c.errors().any(|d| d.message.contains("must be a scalar int")));
    }

    #[test]
    fn test_break_outside_loop_is_an_error() {
        let c = compile("function void main()\n  break\nendfunction\n");
        assert!(c.errors().any(|d| d.message.contains("outside of a loop")));
    }

    #[test]
    fn test_mismatched_closer_is_an_error() {
        let c = compile(
            "function void main()\n  int x\n  while x < 1\n  endfor\n  endwhile\nendfunction\n",
        );
        assert!(c.has_errors());
        assert!(c
            .errors()
            .any(|d| d.message.contains("'endfor' found but the innermost open block is 'while'")));
    }

    #[test]
    fn test_unclosed_block_at_endfunction() {
        let c = compile("function void main()\n  int x\n  if x = 1\nendfunction\n");
        assert!(c.errors().any(|d| d.message.contains("unclosed 'if'")));
    }

    #[test]
    fn test_missing_endfunction_at_eof() {
        let c = compile("function void main()\n");
        assert!(c
            .errors()
            .any(|d| d.message.contains("missing 'endfunction'")));
    }

    #[test]
    fn test_missing_return_in_non_void_function() {
        let c = compile(
            "function void main()\n  f(1)\nendfunction\nfunction int f(int x)\n  x = 1\nendfunction\n",
        );
        assert!(c
            .errors()
            .any(|d| d.message.contains("missing a return statement")));
    }

    #[test]
    fn test_return_value_in_void_function_is_an_error() {
        let c = compile("function void main()\n  return 1\nendfunction\n");
        assert!(c
            .errors()
            .any(|d| d.message.contains("cannot return a value")));
    }

    #[test]
    fn test_void_call_as_rhs_is_an_error() {
        let c = compile(
            "function void main()\n  int x\n  x = time.delay(1)\nendfunction\n",
        );
        assert!(c.errors().any(|d| d.message.contains("returns no value")));
    }

    #[test]
    fn test_static_local_is_mangled_into_globals() {
        let c = compile_ok(
            "function void main()\n  tick()\n  tick()\nendfunction\nfunction void tick()\n  static int count\n  count = count + 1\nendfunction\n",
        );
        let p = &c.program;
        assert!(p.globals.int_vars.find("tick.count").is_some());
        assert!(p.functions[1].locals.int_vars.is_empty());
    }

    #[test]
    fn test_static_at_global_scope_warns_and_declares() {
        let c = compile_ok(
            "static int x\nfunction void main()\n  x = 1\nendfunction\n",
        );
        assert!(c
            .diagnostics
            .iter()
            .any(|d| d.kind == Some(WarnKind::StaticGlobal)));
        assert!(c.program.globals.int_vars.find("x").is_some());
    }

    #[test]
    fn test_redefinition_is_an_error() {
        let c = compile("int x\nbyte x\nfunction void main()\nendfunction\n");
        assert!(c.errors().any(|d| d.message.contains("already defined")));
    }

    #[test]
    fn test_local_shadowing_warns() {
        let c = compile_ok(
            "int x\nfunction void main()\n  int x\n  x = 1\nendfunction\n",
        );
        assert!(c
            .diagnostics
            .iter()
            .any(|d| d.kind == Some(WarnKind::Shadowing)));
    }

    #[test]
    fn test_array_declaration_with_const_size() {
        let c = compile_ok(
            "const int SIZE = 8\nint buf[SIZE]\nfunction void main()\n  buf[0] = 1\nendfunction\n",
        );
        let sym = &c.program.globals.int_arrays.entries[0];
        assert_eq!(sym.size, 8);
        assert_eq!(c.program.const_ints[0].used_cnt, 1);
    }

    #[test]
    fn test_array_write_records_index_slot() {
        let c = compile_ok(
            "byte data[4]\nfunction void main()\n  int i\n  data[i + 1] = 7\nendfunction\n",
        );
        let target = c
            .program
            .statements
            .iter()
            .find_map(|s| match s.kind {
                StatementKind::Assign {
                    target: Some(t), ..
                } => Some(t),
                _ => None,
            })
            .unwrap();
        assert!(target.index_slot.is_some());
        assert_eq!(target.var.ty, BaseType::Byte);
    }

    #[test]
    fn test_assignment_type_mismatch_is_an_error() {
        let c = compile(
            "function void main()\n  int x\n  x = \"oops\"\nendfunction\n",
        );
        assert!(c
            .errors()
            .any(|d| d.message.contains("cannot assign a string to int 'x'")));
    }

    #[test]
    fn test_string_argument_type_is_checked() {
        let c = compile(
            "function void main()\n  show(1)\nendfunction\nfunction void show(string msg)\n  console.print(msg)\nendfunction\n",
        );
        assert!(c
            .errors()
            .any(|d| d.message.contains("argument 1 of 'show' must be a string")));
    }

    #[test]
    fn test_condition_requires_comparison() {
        let c = compile("function void main()\n  int x\n  if x\n  endif\nendfunction\n");
        assert!(c.has_errors());
    }

    #[test]
    fn test_assignment_outside_function_is_an_error() {
        let c = compile("int x\nx = 1\nfunction void main()\nendfunction\n");
        assert!(c
            .errors()
            .any(|d| d.message.contains("inside a function")));
    }

    #[test]
    fn test_local_initializer_becomes_assignment() {
        let c = compile_ok(
            "function void main()\n  int x = 5\n  x = x\nendfunction\n",
        );
        let assigns = c
            .program
            .statements
            .iter()
            .filter(|s| matches!(s.kind, StatementKind::Assign { .. }))
            .count();
        assert_eq!(assigns, 2);
    }

    #[test]
    fn test_repeat_loop_linkage() {
        let c = compile_ok(
            "function void main()\n  repeat 3\n    continue\n  endrepeat\nendfunction\n",
        );
        let p = &c.program;
        let repeat_idx = p
            .statements
            .iter()
            .position(|s| matches!(s.kind, StatementKind::Repeat { .. }))
            .unwrap();
        let endrepeat_idx = p
            .statements
            .iter()
            .position(|s| matches!(s.kind, StatementKind::EndRepeat { .. }))
            .unwrap();
        match p.statements[repeat_idx].kind {
            StatementKind::Repeat { end_idx, .. } => assert_eq!(end_idx, endrepeat_idx),
            _ => unreachable!(),
        }
        assert_eq!(p.statements[endrepeat_idx].next, repeat_idx + 1);
    }

    #[test]
    fn test_errors_do_not_stop_later_lines() {
        let c = compile(
            "function void main()\n  bogus $$$\n  int x\n  x = 1\nendfunction\n",
        );
        // the bad line is reported, the rest still compiled
        assert!(c.has_errors());
        assert!(c.program.globals.int_vars.is_empty());
        assert_eq!(c.program.functions[0].locals.int_vars.len(), 1);
    }

    #[test]
    fn test_line_length_limit() {
        let long = format!("int {}\n", "x".repeat(300));
        let c = compile(&long);
        assert!(c.errors().any(|d| d.message.contains("line exceeds")));
    }

    #[test]
    fn test_builtin_call_statement() {
        let c = compile_ok("function void main()\n  time.delay(100)\nendfunction\n");
        let slot = c
            .program
            .statements
            .iter()
            .find_map(|s| match s.kind {
                StatementKind::Assign {
                    target: None,
                    expr_slot,
                } => Some(expr_slot),
                _ => None,
            })
            .unwrap();
        assert!(matches!(
            c.program.postfix[slot].elems[..],
            [PostfixElem::InternFunc(_)]
        ));
        assert_eq!(c.program.postfix[slot].hint, OptimizerHint::IntFuncNoOp);
    }
}
