//! Compilation statistics.
//!
//! The original MCU build tracked every heap region in a slot table to catch
//! leaks and measure peaks. Ownership makes the leak side moot, so this
//! module keeps the part with observable value: counters collected while
//! compiling and a per-pool size report over the finished program, printed to
//! stderr at `-v`.

use crate::ast::{PostfixElem, Program};
use std::fmt;

/// Counters collected while compiling.
#[derive(Debug, Default, Clone, Copy)]
pub struct CompileStats {
    /// Source lines read (including blank and comment lines).
    pub lines: u32,
    /// Constant subexpressions folded away.
    pub folded_constants: u32,
    /// String concatenations folded away.
    pub folded_strings: u32,
    /// Assignments rewritten to increments.
    pub increment_rewrites: u32,
    /// Postfix slots that received a fast-path hint.
    pub hinted_slots: u32,
}

impl fmt::Display for CompileStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "lines read:          {}", self.lines)?;
        writeln!(f, "constants folded:    {}", self.folded_constants)?;
        writeln!(f, "strings folded:      {}", self.folded_strings)?;
        writeln!(f, "increment rewrites:  {}", self.increment_rewrites)?;
        write!(f, "hinted slots:        {}", self.hinted_slots)
    }
}

/// Entry counts and byte estimates of every pool in a [`Program`].
#[derive(Debug, Default, Clone, Copy)]
pub struct PoolReport {
    pub statements: usize,
    pub statement_bytes: usize,
    pub postfix_slots: usize,
    pub postfix_elems: usize,
    pub postfix_bytes: usize,
    pub fip_slots: usize,
    pub fip_bytes: usize,
    pub strings: usize,
    pub string_bytes: usize,
    pub global_symbols: usize,
    pub local_symbols: usize,
    pub constants: usize,
    pub symbol_bytes: usize,
    pub functions: usize,
}

impl PoolReport {
    pub fn measure(program: &Program) -> Self {
        let postfix_elems: usize = program.postfix.iter().map(|s| s.elems.len()).sum();
        let fip_bytes: usize = program
            .fips
            .iter()
            .map(|f| {
                std::mem::size_of_val(f) + f.arg_slots.len() * std::mem::size_of::<usize>()
            })
            .sum();
        let const_bytes: usize = program
            .const_ints
            .iter()
            .map(|c| std::mem::size_of_val(c) + c.name.len())
            .sum::<usize>()
            + program
                .const_strs
                .iter()
                .map(|c| std::mem::size_of_val(c) + c.name.len())
                .sum::<usize>();
        let local_symbols: usize = program
            .functions
            .iter()
            .map(|f| f.locals.entry_count())
            .sum();
        let local_bytes: usize = program.functions.iter().map(|f| f.locals.byte_size()).sum();

        PoolReport {
            statements: program.statements.len(),
            statement_bytes: program.statements.len()
                * std::mem::size_of::<crate::ast::Statement>(),
            postfix_slots: program.postfix.len(),
            postfix_elems,
            postfix_bytes: postfix_elems * std::mem::size_of::<PostfixElem>(),
            fip_slots: program.fips.len(),
            fip_bytes,
            strings: program.strings.len(),
            string_bytes: program.strings.byte_size(),
            global_symbols: program.globals.entry_count(),
            local_symbols,
            constants: program.const_ints.len() + program.const_strs.len(),
            symbol_bytes: program.globals.byte_size() + local_bytes + const_bytes,
            functions: program.functions.len(),
        }
    }

    pub fn total_bytes(&self) -> usize {
        self.statement_bytes + self.postfix_bytes + self.fip_bytes + self.string_bytes
            + self.symbol_bytes
    }
}

impl fmt::Display for PoolReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "statements:  {:5} entries {:7} bytes",
            self.statements, self.statement_bytes
        )?;
        writeln!(
            f,
            "postfix:     {:5} slots   {:7} bytes ({} elements)",
            self.postfix_slots, self.postfix_bytes, self.postfix_elems
        )?;
        writeln!(
            f,
            "fip slots:   {:5} entries {:7} bytes",
            self.fip_slots, self.fip_bytes
        )?;
        writeln!(
            f,
            "strings:     {:5} entries {:7} bytes",
            self.strings, self.string_bytes
        )?;
        writeln!(
            f,
            "symbols:     {:5} global  {:5} local {:5} const {:7} bytes",
            self.global_symbols, self.local_symbols, self.constants, self.symbol_bytes
        )?;
        writeln!(f, "functions:   {:5}", self.functions)?;
        write!(f, "total:       {:7} bytes", self.total_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::PostfixSlot;
    use crate::types::OptimizerHint;

    #[test]
    fn test_measure_counts_pools() {
        let mut p = Program::default();
        p.strings.add("hello");
        p.postfix.push(PostfixSlot {
            elems: vec![PostfixElem::IntConst(1), PostfixElem::IntConst(2)],
            hint: OptimizerHint::None,
        });

        let report = PoolReport::measure(&p);
        assert_eq!(report.strings, 1);
        assert_eq!(report.string_bytes, 5);
        assert_eq!(report.postfix_slots, 1);
        assert_eq!(report.postfix_elems, 2);
        assert!(report.total_bytes() > 0);
    }

    #[test]
    fn test_display_renders() {
        let p = Program::default();
        let report = PoolReport::measure(&p);
        let text = format!("{}", report);
        assert!(text.contains("statements"));
        assert!(text.contains("total"));
    }
}
