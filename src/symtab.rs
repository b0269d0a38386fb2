//! Nested-scope symbol table, frame offset assignment and the struct type
//! registry.
//!
//! Scopes form an owned tree; the active lexical path is kept as a stack
//! whose last element is the current scope. Locals (and temporaries, which
//! are ordinary entries of kind `Temp`) grow downward from the frame
//! pointer; parameters grow upward from `+8`, or `+12` when the function
//! returns a struct through a hidden pointer argument.
//!
//! Scope entry emits a `PushScope` placeholder into the TAC; scope exit
//! rewrites every placeholder recorded for that scope into an
//! `UNARY& %esp, N(%ebp)` adjustment covering the deepest slot live while
//! the scope was active, then re-arms the enclosing scope with a fresh
//! placeholder so the stack retracts when an inner block dies.

use crate::tac::{Instr, Operand, Tac};
use crate::types::TypeSeq;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymKind {
    Variable,
    Parameter,
    Function,
    Temp,
    Struct,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeTag {
    Global,
    Local,
}

#[derive(Debug, Clone)]
pub struct Entry {
    pub line: usize,
    pub kind: SymKind,
    pub ty: TypeSeq,
    pub size: u32,
    pub offset: i32,
    pub scope_tag: ScopeTag,
    /// The operand naming this symbol's storage in TAC and assembly.
    pub operand: Option<Operand>,
    pub num_params: usize,
    pub param_types: Vec<TypeSeq>,
    pub ret_type: Option<TypeSeq>,
}

impl Entry {
    pub fn new(line: usize, kind: SymKind, scope_tag: ScopeTag) -> Self {
        Entry {
            line,
            kind,
            ty: TypeSeq::new(),
            size: 0,
            offset: 0,
            scope_tag,
            operand: None,
            num_params: 0,
            param_types: Vec::new(),
            ret_type: None,
        }
    }
}

/// A struct type: ordered fields with cached offsets.
#[derive(Debug, Clone)]
pub struct StructInfo {
    pub line: usize,
    pub fields: Vec<(String, Entry)>,
    pub size: u32,
}

impl StructInfo {
    pub fn field(&self, name: &str) -> Option<&Entry> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, e)| e)
    }
}

#[derive(Debug)]
pub struct Scope {
    pub scope_num: usize,
    pub entries: Vec<(String, Entry)>,
    pub children: Vec<Scope>,
    /// Deepest `cur_offset` reached while this scope was the top of stack.
    max_alloc: u32,
    /// Indices of `PushScope` placeholders to rewrite when this scope pops.
    tac_slots: Vec<usize>,
}

impl Scope {
    fn new(scope_num: usize) -> Self {
        Scope {
            scope_num,
            entries: Vec::new(),
            children: Vec::new(),
            max_alloc: 0,
            tac_slots: Vec::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Entry> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, e)| e)
    }

    fn get_mut(&mut self, name: &str) -> Option<&mut Entry> {
        self.entries
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, e)| e)
    }
}

/// Outcome of an insert, so the caller can raise the right diagnostic.
#[derive(Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    Fresh,
    /// Declared again in the same scope; `line` is the prior declaration.
    Redeclared { prior_line: usize },
    /// Shadows a declaration from an outer scope at `line`.
    Shadows { prior_line: usize },
}

pub struct SymbolTable {
    stack: Vec<Scope>,
    /// Bytes allocated below `%ebp` in the current function.
    cur_offset: u32,
    saved_offsets: Vec<u32>,
    /// Next parameter offset above `%ebp`.
    param_offset: i32,
    structs: HashMap<String, StructInfo>,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable {
            stack: vec![Scope::new(0)],
            cur_offset: 0,
            saved_offsets: Vec::new(),
            param_offset: 8,
            structs: HashMap::new(),
        }
    }

    pub fn is_global(&self) -> bool {
        self.stack.len() == 1
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    fn top(&mut self) -> &mut Scope {
        self.stack.last_mut().unwrap()
    }

    /// Open a lexical scope and record its TAC placeholder.
    pub fn push_scope(&mut self, tac: &mut Tac) {
        let num = tac.fresh_scope_num();
        let mut scope = Scope::new(num);
        scope.max_alloc = self.cur_offset;
        scope.tac_slots.push(tac.emit(Instr::PushScope));
        self.saved_offsets.push(self.cur_offset);
        self.stack.push(scope);
    }

    /// Close the current scope: rewrite its placeholders into the frame
    /// adjustment, re-arm the parent, and release the scope's slots.
    pub fn pop_scope(&mut self, tac: &mut Tac) {
        debug_assert!(self.stack.len() > 1, "pop of the global scope");
        let scope = self.stack.pop().unwrap();
        if scope.max_alloc > 0 {
            let adjust = Instr::AddrOf {
                dst: Operand::Reg("%esp"),
                src: Operand::Stack(-(scope.max_alloc as i32)),
            };
            for &slot in &scope.tac_slots {
                tac.code[slot] = adjust.clone();
            }
        }
        self.cur_offset = self.saved_offsets.pop().unwrap_or(0);
        let in_local_parent = self.stack.len() > 1;
        let parent = self.stack.last_mut().unwrap();
        parent.children.push(scope);
        if in_local_parent {
            parent.tac_slots.push(tac.emit(Instr::PushScope));
        }
    }

    /// Reset per-function allocation state. `struct_return` reserves the
    /// hidden pointer slot, moving the first parameter to `+12`.
    pub fn start_function(&mut self, struct_return: bool) {
        self.cur_offset = 0;
        self.param_offset = if struct_return { 12 } else { 8 };
    }

    /// Allocate `size` bytes of frame space, returning the (negative) offset.
    pub fn alloc_local(&mut self, size: u32) -> i32 {
        self.cur_offset += size;
        let off = -(self.cur_offset as i32);
        let cur = self.cur_offset;
        let top = self.top();
        top.max_alloc = top.max_alloc.max(cur);
        off
    }

    /// Allocate the next parameter slot, returning the (positive) offset.
    pub fn alloc_param(&mut self, size: u32) -> i32 {
        let off = self.param_offset;
        // every push is word sized; sub-word params still burn 4 bytes
        self.param_offset += size.max(4).div_ceil(4) as i32 * 4;
        off
    }

    /// Insert a name into the current scope. The entry is created bare;
    /// callers fill type/size/offset through `modify`.
    pub fn insert(&mut self, name: &str, line: usize, kind: SymKind) -> InsertOutcome {
        if let Some(prior) = self.top().get(name) {
            return InsertOutcome::Redeclared {
                prior_line: prior.line,
            };
        }
        let shadowed = self.stack[..self.stack.len() - 1]
            .iter()
            .rev()
            .find_map(|s| s.get(name))
            .map(|e| e.line);
        let tag = if self.is_global() {
            ScopeTag::Global
        } else {
            ScopeTag::Local
        };
        let entry = Entry::new(line, kind, tag);
        self.top().entries.push((name.to_string(), entry));
        match shadowed {
            Some(prior_line) => InsertOutcome::Shadows { prior_line },
            None => InsertOutcome::Fresh,
        }
    }

    /// Innermost-first lookup.
    pub fn lookup(&self, name: &str) -> Option<&Entry> {
        self.stack.iter().rev().find_map(|s| s.get(name))
    }

    /// Mutate the innermost entry for `name`.
    pub fn modify<F: FnOnce(&mut Entry)>(&mut self, name: &str, f: F) -> bool {
        for scope in self.stack.iter_mut().rev() {
            if let Some(e) = scope.get_mut(name) {
                f(e);
                return true;
            }
        }
        false
    }

    pub fn register_struct(&mut self, name: &str, info: StructInfo) -> Result<(), usize> {
        if let Some(prior) = self.structs.get(name) {
            return Err(prior.line);
        }
        self.structs.insert(name.to_string(), info);
        Ok(())
    }

    pub fn lookup_struct(&self, name: &str) -> Option<&StructInfo> {
        self.structs.get(name)
    }

    pub fn global_scope(&self) -> &Scope {
        &self.stack[0]
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Lay out struct fields: offsets strictly increasing in declaration order,
/// total size the plain sum of field sizes.
pub fn finalize_struct_layout(fields: &mut [(String, Entry)]) -> u32 {
    let mut offset = 0u32;
    for (_, entry) in fields.iter_mut() {
        entry.offset = offset as i32;
        offset += entry.size;
    }
    offset
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_offsets_grow_down() {
        let mut st = SymbolTable::new();
        let mut tac = Tac::new();
        st.push_scope(&mut tac);
        assert_eq!(st.alloc_local(4), -4);
        assert_eq!(st.alloc_local(4), -8);
        assert_eq!(st.alloc_local(1), -9);
        st.pop_scope(&mut tac);
    }

    #[test]
    fn inner_scope_offsets_are_distinct_then_reused() {
        let mut st = SymbolTable::new();
        let mut tac = Tac::new();
        st.push_scope(&mut tac);
        let outer = st.alloc_local(4);
        st.push_scope(&mut tac);
        let inner = st.alloc_local(4);
        assert_ne!(outer, inner);
        assert_eq!(inner, -8);
        st.pop_scope(&mut tac);
        // a sibling block may reuse the dead block's slot
        st.push_scope(&mut tac);
        assert_eq!(st.alloc_local(4), -8);
        st.pop_scope(&mut tac);
        st.pop_scope(&mut tac);
    }

    #[test]
    fn pop_rewrites_placeholder_into_adjustment() {
        let mut st = SymbolTable::new();
        let mut tac = Tac::new();
        st.push_scope(&mut tac);
        st.alloc_local(8);
        st.pop_scope(&mut tac);
        assert!(matches!(
            &tac.code[0],
            Instr::AddrOf { dst: Operand::Reg("%esp"), src: Operand::Stack(-8) }
        ));
    }

    #[test]
    fn empty_scope_leaves_placeholder_for_finish_to_drop() {
        let mut st = SymbolTable::new();
        let mut tac = Tac::new();
        st.push_scope(&mut tac);
        st.pop_scope(&mut tac);
        assert!(matches!(&tac.code[0], Instr::PushScope));
        tac.finish();
        assert!(!tac.code.iter().any(|i| matches!(i, Instr::PushScope)));
    }

    #[test]
    fn child_adjustment_covers_parent_slots() {
        let mut st = SymbolTable::new();
        let mut tac = Tac::new();
        st.push_scope(&mut tac);
        st.alloc_local(12);
        st.push_scope(&mut tac);
        st.alloc_local(4);
        st.pop_scope(&mut tac);
        st.pop_scope(&mut tac);
        // inner scope placeholder covers both the outer 12 and its own 4
        assert!(matches!(
            &tac.code[1],
            Instr::AddrOf { src: Operand::Stack(-16), .. }
        ));
    }

    #[test]
    fn insert_reports_redeclaration_and_shadowing() {
        let mut st = SymbolTable::new();
        let mut tac = Tac::new();
        st.push_scope(&mut tac);
        assert_eq!(st.insert("x", 1, SymKind::Variable), InsertOutcome::Fresh);
        assert_eq!(
            st.insert("x", 2, SymKind::Variable),
            InsertOutcome::Redeclared { prior_line: 1 }
        );
        st.push_scope(&mut tac);
        assert_eq!(
            st.insert("x", 3, SymKind::Variable),
            InsertOutcome::Shadows { prior_line: 1 }
        );
        st.pop_scope(&mut tac);
        st.pop_scope(&mut tac);
    }

    #[test]
    fn param_offsets_start_at_8_or_12() {
        let mut st = SymbolTable::new();
        st.start_function(false);
        assert_eq!(st.alloc_param(4), 8);
        assert_eq!(st.alloc_param(1), 12);
        assert_eq!(st.alloc_param(4), 16);
        st.start_function(true);
        assert_eq!(st.alloc_param(4), 12);
    }

    #[test]
    fn struct_layout_offsets_and_size() {
        let mut fields = vec![
            ("x".to_string(), {
                let mut e = Entry::new(1, SymKind::Variable, ScopeTag::Local);
                e.size = 4;
                e
            }),
            ("c".to_string(), {
                let mut e = Entry::new(1, SymKind::Variable, ScopeTag::Local);
                e.size = 1;
                e
            }),
            ("y".to_string(), {
                let mut e = Entry::new(1, SymKind::Variable, ScopeTag::Local);
                e.size = 4;
                e
            }),
        ];
        let size = finalize_struct_layout(&mut fields);
        assert_eq!(size, 9);
        assert_eq!(fields[0].1.offset, 0);
        assert_eq!(fields[1].1.offset, 4);
        assert_eq!(fields[2].1.offset, 5);
    }

    #[test]
    fn struct_registry_rejects_duplicates() {
        let mut st = SymbolTable::new();
        let info = StructInfo { line: 3, fields: vec![], size: 0 };
        assert!(st.register_struct("p", info.clone()).is_ok());
        assert_eq!(st.register_struct("p", info), Err(3));
    }
}
