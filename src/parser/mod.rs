//! Recursive-descent parser with fused semantic actions.
//!
//! Each parse function plays the role of the grammar rule it is named after
//! and runs the rule's semantic action inline: it checks types against the
//! symbol table, emits three-address code, and returns a synthesized
//! attribute bundle. Backpatch marker points are explicit captures of
//! `tac.next_index()` taken where the grammar would have had a marker
//! production.
//!
//! Syntax errors abort the parse (the diagnostic is recorded before the
//! `Err` travels up). Semantic errors poison the offending attribute and let
//! parsing continue, so several diagnostics can surface in one run.

mod decl;
mod expr;
mod stmt;

use crate::diag::Diagnostics;
use crate::lexer::{LexDiag, Token, tokenize};
use crate::symtab::{SymKind, SymbolTable};
use crate::tac::{Instr, Operand, Tac};
use crate::types::{TypeSeq, scalar_size};
use tracing::debug;

/// Everything the semantic actions mutate, owned in one place.
pub struct Compiler {
    pub symtab: SymbolTable,
    pub tac: Tac,
    pub diags: Diagnostics,
}

impl Compiler {
    pub fn new(source: &str, color: bool) -> Self {
        let mut symtab = SymbolTable::new();
        crate::builtins::register(&mut symtab);
        Compiler {
            symtab,
            tac: Tac::new(),
            diags: Diagnostics::new(source, color),
        }
    }
}

/// Marker for an already-reported fatal syntax error.
#[derive(Debug)]
pub struct SyntaxAbort;

pub type PResult<T> = Result<T, SyntaxAbort>;

/// Synthesized attributes of an expression node.
#[derive(Debug, Clone, Default)]
pub struct ExprAttr {
    /// `None` marks a poisoned node: an error was already reported and
    /// downstream actions must stay quiet.
    pub ty: Option<TypeSeq>,
    pub temp: Option<Operand>,
    pub is_var: bool,
    pub true_list: Vec<usize>,
    pub false_list: Vec<usize>,
    /// Set when the node names a function (callee position).
    pub func: Option<String>,
    pub line: usize,
    pub col: usize,
}

impl ExprAttr {
    pub fn poisoned() -> Self {
        ExprAttr::default()
    }

    pub fn ok(&self) -> bool {
        self.ty.is_some()
    }

    pub fn value(ty: TypeSeq, temp: Operand) -> Self {
        ExprAttr {
            ty: Some(ty),
            temp: Some(temp),
            ..ExprAttr::default()
        }
    }

    /// A pure control-flow node (short-circuit result).
    pub fn control(ty: TypeSeq, true_list: Vec<usize>, false_list: Vec<usize>) -> Self {
        ExprAttr {
            ty: Some(ty),
            true_list,
            false_list,
            ..ExprAttr::default()
        }
    }
}

/// Synthesized attributes of a statement node: pending jump lists.
#[derive(Debug, Default)]
pub struct StmtAttr {
    pub next_list: Vec<usize>,
    pub break_list: Vec<usize>,
    pub continue_list: Vec<usize>,
}

impl StmtAttr {
    pub fn absorb(&mut self, other: StmtAttr) {
        self.break_list.extend(other.break_list);
        self.continue_list.extend(other.continue_list);
        self.next_list.extend(other.next_list);
    }
}

/// Per-switch translation state.
pub(crate) struct SwitchCtx {
    pub temp: Operand,
    pub cases: Vec<CaseRec>,
    pub default_entry: Option<usize>,
    pub default_line: usize,
    /// A case's code region is open until the next label or the body end.
    pub open: bool,
    /// Implicit and explicit jumps to the statement after the switch.
    pub joins: Vec<usize>,
}

/// One `(case value, case code entry, case test entry)` triple.
pub(crate) struct CaseRec {
    pub test_start: usize,
    pub code_start: usize,
    pub cond: Operand,
}

/// Enclosing-function context for `return` checking.
pub(crate) struct FnCtx {
    pub ret_type: TypeSeq,
    pub struct_return: bool,
}

pub struct Parser<'a> {
    toks: Vec<Token>,
    pos: usize,
    pub comp: &'a mut Compiler,
    pub(crate) current_fn: Option<FnCtx>,
    pub(crate) switch_stack: Vec<SwitchCtx>,
    /// Name being declared while its initializer is parsed, for catching
    /// self-referencing uses (`int x = x;`).
    pub(crate) declaring: Option<String>,
    /// True while a struct body is being parsed (nested definitions are an
    /// error).
    pub(crate) in_struct_def: bool,
}

impl<'a> Parser<'a> {
    pub fn new(source: &str, comp: &'a mut Compiler) -> Self {
        let (toks, lex_diags) = tokenize(source);
        report_lex_diags(&lex_diags, comp);
        Parser {
            toks,
            pos: 0,
            comp,
            current_fn: None,
            switch_stack: Vec::new(),
            declaring: None,
            in_struct_def: false,
        }
    }

    /// Parse a whole translation unit. TAC finishing (pools, renumbering) is
    /// left to the caller so tests can inspect the raw buffer.
    pub fn parse(&mut self) -> PResult<()> {
        while !self.at_end() {
            self.external_declaration()?;
        }
        debug!(
            instrs = self.comp.tac.next_index(),
            errors = self.comp.diags.error_count(),
            "translation unit done"
        );
        Ok(())
    }

    // ---- token cursor -------------------------------------------------

    pub(crate) fn at_end(&self) -> bool {
        self.pos >= self.toks.len()
    }

    pub(crate) fn current(&self) -> Option<&Token> {
        self.toks.get(self.pos)
    }

    pub(crate) fn peek_text(&self) -> &str {
        self.toks.get(self.pos).map(|t| t.text.as_str()).unwrap_or("")
    }

    pub(crate) fn peek_ahead(&self, n: usize) -> &str {
        self.toks
            .get(self.pos + n)
            .map(|t| t.text.as_str())
            .unwrap_or("")
    }

    pub(crate) fn check(&self, text: &str) -> bool {
        self.peek_text() == text
    }

    pub(crate) fn bump(&mut self) -> Token {
        let t = self.toks[self.pos].clone();
        self.pos += 1;
        t
    }

    pub(crate) fn consume(&mut self, text: &str) -> bool {
        if self.check(text) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// Consume `text` or record a syntax error and abort.
    pub(crate) fn expect(&mut self, text: &str) -> PResult<Token> {
        if self.check(text) {
            Ok(self.bump())
        } else {
            Err(self.syntax_error(&format!("expected '{}'", text)))
        }
    }

    /// Record the syntax error diagnostic for the current token.
    pub(crate) fn syntax_error(&mut self, detail: &str) -> SyntaxAbort {
        let (line, col, len, text) = match self.current() {
            Some(t) => (t.line, t.col, t.text.len(), t.text.clone()),
            None => (
                self.toks.last().map(|t| t.line).unwrap_or(1),
                self.toks.last().map(|t| t.col + t.text.len()).unwrap_or(1),
                1,
                "<end of input>".to_string(),
            ),
        };
        self.comp.diags.syntax_error(
            line,
            col,
            len,
            format!("Unexpected token {} ({})", text, detail),
        );
        SyntaxAbort
    }

    pub(crate) fn here(&self) -> (usize, usize) {
        match self.current() {
            Some(t) => (t.line, t.col),
            None => (self.toks.last().map(|t| t.line).unwrap_or(1), 1),
        }
    }

    // ---- shared translation helpers ----------------------------------

    /// Size of a value of `ty`, struct registry consulted. Reports the error
    /// and returns `None` for an undeclared struct type.
    pub(crate) fn size_of(&mut self, ty: &TypeSeq, line: usize, col: usize) -> Option<u32> {
        if ty.is_pointer() {
            return Some(4);
        }
        let elem = if ty.is_array() { ty.element() } else { ty.clone() };
        let base = if elem.is_struct() {
            match self.comp.symtab.lookup_struct(elem.struct_name().unwrap_or("")) {
                Some(info) => info.size,
                None => {
                    self.comp.diags.error(
                        line,
                        col,
                        format!("The data structure struct {} is not declared", elem.describe()),
                    );
                    return None;
                }
            }
        } else {
            scalar_size(&elem)
        };
        if ty.is_array() {
            Some(ty.dims().iter().product::<u32>() * base)
        } else {
            Some(base)
        }
    }

    /// Allocate a fresh temporary of `ty`: a frame slot registered in the
    /// symbol table like any other local.
    pub(crate) fn new_temp(&mut self, ty: &TypeSeq, line: usize) -> Operand {
        let size = self
            .size_of(ty, line, 0)
            .unwrap_or(4)
            .max(1);
        let name = self.comp.tac.fresh_temp_name();
        let off = self.comp.symtab.alloc_local(size);
        self.comp.symtab.insert(&name, line, SymKind::Temp);
        self.comp.symtab.modify(&name, |e| {
            e.ty = ty.clone();
            e.size = size;
            e.offset = off;
            e.operand = Some(Operand::Stack(off));
        });
        Operand::Stack(off)
    }

    /// Emit the uniform boolean-context pair `ifnz goto _, v; goto _`,
    /// returning `(true_index, false_index)`.
    pub(crate) fn emit_bool_pair(&mut self, v: Operand) -> (usize, usize) {
        let t = self.comp.tac.emit(Instr::IfnzGoto {
            target: None,
            cond: v,
        });
        let f = self.comp.tac.emit(Instr::Goto { target: None });
        (t, f)
    }

    /// Drain an expression's pending lists for use in a boolean context,
    /// synthesizing the jump pair if the node only carries a value.
    pub(crate) fn bool_lists(&mut self, e: &mut ExprAttr) -> (Vec<usize>, Vec<usize>) {
        if !e.true_list.is_empty() || !e.false_list.is_empty() {
            return (
                std::mem::take(&mut e.true_list),
                std::mem::take(&mut e.false_list),
            );
        }
        match e.temp.clone() {
            Some(v) => {
                let (t, f) = self.emit_bool_pair(v);
                (vec![t], vec![f])
            }
            None => (Vec::new(), Vec::new()),
        }
    }

    /// An expression's value as an operand, materializing short-circuit
    /// results into `0`/`1` when the node is control-only.
    pub(crate) fn rvalue(&mut self, e: &mut ExprAttr) -> Option<Operand> {
        if let Some(op) = e.temp.clone() {
            return Some(op);
        }
        if !e.ok() {
            return None;
        }
        let ty = TypeSeq::base("int");
        let line = e.line;
        let dst = self.new_temp(&ty, line);
        let t_entry = self.comp.tac.next_index();
        self.comp.tac.emit(Instr::Assign {
            ty: crate::types::ValType::Int,
            dst: dst.clone(),
            src: Operand::imm(1),
        });
        let skip = self.comp.tac.emit(Instr::Goto { target: None });
        let f_entry = self.comp.tac.next_index();
        self.comp.tac.emit(Instr::Assign {
            ty: crate::types::ValType::Int,
            dst: dst.clone(),
            src: Operand::imm(0),
        });
        let join = self.comp.tac.next_index();
        self.comp.tac.backpatch(&e.true_list, t_entry);
        self.comp.tac.backpatch(&e.false_list, f_entry);
        self.comp.tac.backpatch(&[skip], join);
        e.true_list.clear();
        e.false_list.clear();
        e.temp = Some(dst.clone());
        e.ty = Some(ty);
        Some(dst)
    }

    /// Insert a `cast` instruction when the operand's type and the resolved
    /// operator type disagree on representation. Returns the operand to use.
    pub(crate) fn cast_to(
        &mut self,
        src: Operand,
        from: &TypeSeq,
        to: &TypeSeq,
        line: usize,
    ) -> Operand {
        let from_ct = from.cast_ty();
        let to_ct = to.cast_ty();
        if from_ct == to_ct {
            return src;
        }
        let dst = self.new_temp(to, line);
        self.comp.tac.emit(Instr::Cast {
            dst: dst.clone(),
            src,
            to: to_ct,
            from: from_ct,
        });
        dst
    }
}

fn report_lex_diags(diags: &[LexDiag], comp: &mut Compiler) {
    for d in diags {
        comp.diags
            .syntax_error(d.line, d.col, d.len, d.error.message());
    }
}
