//! Declaration translation: specifiers, declarators, struct definitions and
//! function definitions with parameter frames.

use super::{ExprAttr, FnCtx, PResult, Parser};
use crate::lexer::TokKind;
use crate::symtab::{finalize_struct_layout, Entry, InsertOutcome, ScopeTag, StructInfo, SymKind};
use crate::tac::{Instr, Operand};
use crate::types::TypeSeq;
use tracing::debug;

const TYPE_TOKENS: [&str; 9] = [
    "int", "short", "char", "bool", "float", "void", "signed", "unsigned", "struct",
];

/// A parsed declarator: pointer depth, name, array dimensions (`None` for an
/// empty bound) and, for function declarators, the parameter list.
pub(crate) struct Declarator {
    pub stars: usize,
    pub name: String,
    pub dims: Vec<Option<i64>>,
    pub params: Option<Vec<ParamDecl>>,
    pub line: usize,
    pub col: usize,
}

#[derive(Clone)]
pub(crate) struct ParamDecl {
    pub name: String,
    pub ty: TypeSeq,
    pub line: usize,
}

impl<'a> Parser<'a> {
    pub(crate) fn is_type_token(&self, text: &str) -> bool {
        TYPE_TOKENS.contains(&text)
    }

    pub(crate) fn starts_declaration(&self) -> bool {
        self.is_type_token(self.peek_text())
    }

    /// `type-name` for casts and `sizeof`: specifiers plus pointer stars.
    pub(crate) fn parse_type_name(&mut self) -> PResult<TypeSeq> {
        let mut ty = self.declaration_specifiers()?;
        while self.consume("*") {
            ty.add_pointer();
        }
        ty.normalize();
        Ok(ty)
    }

    /// Collect base type and sign qualifiers; struct specifiers may define a
    /// new struct type as a side effect.
    pub(crate) fn declaration_specifiers(&mut self) -> PResult<TypeSeq> {
        let (line, col) = self.here();
        let mut base: Option<String> = None;
        let mut struct_name: Option<String> = None;
        let mut quals: Vec<String> = Vec::new();
        loop {
            let text = self.peek_text().to_string();
            if text == "signed" || text == "unsigned" {
                self.bump();
                let other = if text == "signed" { "unsigned" } else { "signed" };
                if quals.iter().any(|q| q == other) {
                    self.comp
                        .diags
                        .error(line, col, "Conflicting signed and unsigned specifiers");
                } else if !quals.contains(&text) {
                    quals.push(text);
                }
                continue;
            }
            if text == "struct" {
                if base.is_some() {
                    self.comp
                        .diags
                        .error(line, col, "Conflicting type specifiers");
                }
                let name = self.struct_specifier()?;
                base = Some("struct".to_string());
                struct_name = Some(name);
                continue;
            }
            if self.is_type_token(&text) {
                self.bump();
                if base.is_some() {
                    self.comp
                        .diags
                        .error(line, col, "Conflicting type specifiers");
                }
                base = Some(text);
                continue;
            }
            break;
        }
        let mut tokens = Vec::new();
        match base {
            Some(b) => tokens.push(b),
            None => tokens.push("int".to_string()),
        }
        if let Some(n) = struct_name {
            tokens.push(n);
        }
        tokens.extend(quals);
        Ok(TypeSeq::from_tokens(tokens))
    }

    /// `struct NAME [{ fields }]` - returns the struct name; a body
    /// finalizes the layout and registers the type.
    fn struct_specifier(&mut self) -> PResult<String> {
        let (line, col) = self.here();
        self.expect("struct")?;
        let name = match self.current() {
            Some(t) if t.kind == TokKind::Ident => self.bump().text,
            _ => return Err(self.syntax_error("expected a struct name")),
        };
        if !self.check("{") {
            return Ok(name);
        }
        if self.in_struct_def {
            self.comp
                .diags
                .error(line, col, "Nested struct definitions are not allowed");
        }
        self.bump();
        self.in_struct_def = true;

        let mut fields: Vec<(String, Entry)> = Vec::new();
        while !self.check("}") && !self.at_end() {
            let spec = self.declaration_specifiers()?;
            loop {
                let d = self.declarator_no_params()?;
                if let Some(entry) = self.build_field(&name, &spec, &d, &fields) {
                    fields.push((d.name.clone(), entry));
                }
                if !self.consume(",") {
                    break;
                }
            }
            self.expect(";")?;
        }
        self.expect("}")?;
        self.in_struct_def = false;

        let size = finalize_struct_layout(&mut fields);
        let info = StructInfo { line, fields, size };
        if let Err(prior) = self.comp.symtab.register_struct(&name, info) {
            self.comp.diags.error(
                line,
                col,
                format!(
                    "Redeclaration of existing data structure struct {} (prior declaration on line {})",
                    name, prior
                ),
            );
        } else {
            debug!(name = %name, size, "struct registered");
        }
        Ok(name)
    }

    fn build_field(
        &mut self,
        owner: &str,
        spec: &TypeSeq,
        d: &Declarator,
        fields: &[(String, Entry)],
    ) -> Option<Entry> {
        let (line, col) = (d.line, d.col);
        if fields.iter().any(|(n, _)| n == &d.name) {
            self.comp.diags.error(
                line,
                col,
                format!("Redeclaration of member {} in struct {}", d.name, owner),
            );
            return None;
        }
        let ty = match self.finish_type(spec, d, false) {
            Some(t) => t,
            None => return None,
        };
        if ty.is_struct() && ty.struct_name() == Some(owner) {
            self.comp.diags.error(
                line,
                col,
                format!("struct {} cannot contain itself by value", owner),
            );
            return None;
        }
        let size = self.size_of(&ty, line, col)?;
        let mut entry = Entry::new(line, SymKind::Variable, ScopeTag::Local);
        entry.ty = ty;
        entry.size = size;
        Some(entry)
    }

    /// Apply declarator modifiers to the specifier type and run the
    /// declaration error catalog. `param` relaxes the outermost array bound.
    fn finish_type(&mut self, spec: &TypeSeq, d: &Declarator, param: bool) -> Option<TypeSeq> {
        let (line, col) = (d.line, d.col);
        let mut ty = spec.clone();
        for _ in 0..d.stars {
            ty.add_pointer();
        }
        ty.normalize();

        if ty.base_name() == "struct" && ty.pointer_depth() > 1 {
            self.comp.diags.error(
                line,
                col,
                "Multi-level struct pointers are not supported",
            );
            return None;
        }
        if ty.is_void() {
            self.comp
                .diags
                .error(line, col, format!("Variable {} declared void", d.name));
            return None;
        }
        if ty.is_struct()
            && self
                .comp
                .symtab
                .lookup_struct(ty.struct_name().unwrap_or(""))
                .is_none()
        {
            self.comp.diags.error(
                line,
                col,
                format!(
                    "The data structure struct {} is not declared",
                    ty.struct_name().unwrap_or("")
                ),
            );
            return None;
        }

        for (i, dim) in d.dims.iter().enumerate() {
            match dim {
                None => {
                    if !(param && i == 0) {
                        self.comp.diags.error(
                            line,
                            col,
                            format!("Array bound missing for dimension {} of {}", i + 1, d.name),
                        );
                        return None;
                    }
                    ty.push_dim(0);
                }
                Some(n) if *n <= 0 => {
                    self.comp.diags.error(
                        line,
                        col,
                        format!("Array bound of {} must be positive", d.name),
                    );
                    return None;
                }
                Some(n) => ty.push_dim(*n as u32),
            }
        }
        ty.normalize();
        Some(ty)
    }

    /// `pointer* IDENT ('[' bound? ']')*` - the form used for struct fields
    /// and parameters.
    fn declarator_no_params(&mut self) -> PResult<Declarator> {
        let mut d = self.declarator()?;
        if d.params.take().is_some() {
            return Err(self.syntax_error("function declarator not allowed here"));
        }
        Ok(d)
    }

    pub(crate) fn declarator(&mut self) -> PResult<Declarator> {
        let (line, col) = self.here();
        let mut stars = 0usize;
        while self.consume("*") {
            stars += 1;
        }
        let name = match self.current() {
            Some(t) if t.kind == TokKind::Ident => self.bump().text,
            _ => return Err(self.syntax_error("expected an identifier")),
        };
        let mut dims = Vec::new();
        let mut params = None;
        if self.check("(") {
            params = Some(self.parameter_list()?);
        } else {
            while self.consume("[") {
                if self.consume("]") {
                    dims.push(None);
                    continue;
                }
                let bound = match self.current() {
                    Some(t) if t.kind == TokKind::IntConst => self.bump().int_val,
                    _ => return Err(self.syntax_error("expected an array bound")),
                };
                self.expect("]")?;
                dims.push(Some(bound));
            }
        }
        Ok(Declarator {
            stars,
            name,
            dims,
            params,
            line,
            col,
        })
    }

    fn parameter_list(&mut self) -> PResult<Vec<ParamDecl>> {
        self.expect("(")?;
        let mut out = Vec::new();
        if self.consume(")") {
            return Ok(out);
        }
        if self.check("void") && self.peek_ahead(1) == ")" {
            self.bump();
            self.expect(")")?;
            return Ok(out);
        }
        loop {
            let spec = self.declaration_specifiers()?;
            let d = self.declarator_no_params()?;
            let line = d.line;
            if let Some(ty) = self.finish_type(&spec, &d, true) {
                out.push(ParamDecl {
                    name: d.name,
                    ty,
                    line,
                });
            }
            if !self.consume(",") {
                break;
            }
        }
        self.expect(")")?;
        Ok(out)
    }

    /// Block-level declaration: specifiers plus an init-declarator list.
    pub(crate) fn declaration(&mut self) -> PResult<()> {
        let spec = self.declaration_specifiers()?;
        if self.consume(";") {
            return Ok(()); // bare struct definition
        }
        loop {
            let d = self.declarator()?;
            if d.params.is_some() {
                return Err(self.syntax_error("nested function definitions are not allowed"));
            }
            self.declare_variable(&spec, &d)?;
            if !self.consume(",") {
                break;
            }
        }
        self.expect(";")?;
        Ok(())
    }

    fn declare_variable(&mut self, spec: &TypeSeq, d: &Declarator) -> PResult<()> {
        let (line, col) = (d.line, d.col);
        let ty = self.finish_type(spec, d, false);
        let global = self.comp.symtab.is_global();

        let (size, operand) = match &ty {
            Some(t) => {
                let size = self.size_of(t, line, col).unwrap_or(0).max(1);
                let operand = if global {
                    self.comp.tac.add_global(&d.name, size);
                    Operand::Global(d.name.clone())
                } else {
                    Operand::Stack(self.comp.symtab.alloc_local(size))
                };
                (size, Some(operand))
            }
            None => (0, None),
        };

        match self.comp.symtab.insert(&d.name, line, SymKind::Variable) {
            InsertOutcome::Redeclared { prior_line } => {
                self.comp.diags.error(
                    line,
                    col,
                    format!(
                        "Redeclaration of existing variable {} (prior declaration on line {})",
                        d.name, prior_line
                    ),
                );
            }
            InsertOutcome::Shadows { prior_line } => {
                self.comp.diags.warning(
                    line,
                    col,
                    format!("{} shadows an earlier declaration on line {}", d.name, prior_line),
                );
            }
            InsertOutcome::Fresh => {}
        }
        if let (Some(t), Some(op)) = (&ty, &operand) {
            let (t, op) = (t.clone(), op.clone());
            let offset = match &op {
                Operand::Stack(n) => *n,
                _ => 0,
            };
            self.comp.symtab.modify(&d.name, |e| {
                e.ty = t;
                e.size = size;
                e.offset = offset;
                e.operand = Some(op);
            });
        }

        if self.check("=") {
            self.bump();
            if self.check("{") {
                self.comp
                    .diags
                    .error(line, col, "Aggregate initializers are not supported");
                self.skip_braced_initializer()?;
                return Ok(());
            }
            if global {
                self.comp.diags.error(
                    line,
                    col,
                    format!("Global variable {} cannot have an initializer", d.name),
                );
                // still parse the expression to keep the cursor in sync,
                // but emit nothing for it
                let save = self.comp.tac.next_index();
                self.declaring = Some(d.name.clone());
                let _ = self.assignment_expr()?;
                self.declaring = None;
                self.comp.tac.code.truncate(save);
                return Ok(());
            }
            self.declaring = Some(d.name.clone());
            let rhs = self.assignment_expr()?;
            self.declaring = None;
            if let (Some(t), Some(op)) = (ty, operand) {
                let mut lhs = ExprAttr::value(t, op);
                lhs.is_var = true;
                lhs.line = line;
                let _ = self.translate_assign(lhs, "=", rhs, line, col);
            }
        }
        Ok(())
    }

    fn skip_braced_initializer(&mut self) -> PResult<()> {
        self.expect("{")?;
        let mut depth = 1usize;
        while depth > 0 {
            if self.at_end() {
                return Err(self.syntax_error("unterminated initializer"));
            }
            let t = self.bump();
            if t.text == "{" {
                depth += 1;
            } else if t.text == "}" {
                depth -= 1;
            }
        }
        Ok(())
    }

    /// Top level: a function definition or a (list of) global declarations.
    pub(crate) fn external_declaration(&mut self) -> PResult<()> {
        let spec = self.declaration_specifiers()?;
        if self.consume(";") {
            return Ok(());
        }
        let d = self.declarator()?;
        if d.params.is_some() && self.check("{") {
            return self.function_definition(&spec, d);
        }
        if d.params.is_some() {
            // forward declaration: register the signature, no code
            self.register_function(&spec, &d, true)?;
            self.expect(";")?;
            return Ok(());
        }
        self.declare_variable(&spec, &d)?;
        while self.consume(",") {
            let d = self.declarator()?;
            self.declare_variable(&spec, &d)?;
        }
        self.expect(";")?;
        Ok(())
    }

    fn register_function(
        &mut self,
        spec: &TypeSeq,
        d: &Declarator,
        forward: bool,
    ) -> PResult<(TypeSeq, Vec<ParamDecl>)> {
        let (line, col) = (d.line, d.col);
        let mut ret_type = spec.clone();
        for _ in 0..d.stars {
            ret_type.add_pointer();
        }
        ret_type.normalize();

        let params = d.params.clone().expect("function declarator");
        match self.comp.symtab.insert(&d.name, line, SymKind::Function) {
            InsertOutcome::Redeclared { prior_line } if !forward => {
                self.comp.diags.error(
                    line,
                    col,
                    format!(
                        "Redeclaration of function {} (prior declaration on line {})",
                        d.name, prior_line
                    ),
                );
            }
            _ => {}
        }
        let rt = ret_type.clone();
        let pts: Vec<TypeSeq> = params.iter().map(|p| p.ty.clone()).collect();
        let n = params.len();
        self.comp.symtab.modify(&d.name, |e| {
            e.kind = SymKind::Function;
            e.ty = TypeSeq::base("function");
            e.ret_type = Some(rt);
            e.num_params = n;
            e.param_types = pts;
        });
        Ok((ret_type, params))
    }

    fn function_definition(&mut self, spec: &TypeSeq, d: Declarator) -> PResult<()> {
        let name = d.name.clone();
        let (ret_type, params) = self.register_function(spec, &d, false)?;
        let struct_return = ret_type.is_struct();
        debug!(name = %name, params = params.len(), "function definition");

        self.comp.symtab.start_function(struct_return);
        self.comp.tac.emit(Instr::FuncLabel(name.clone()));
        self.comp.symtab.push_scope(&mut self.comp.tac);

        for p in &params {
            let line = p.line;
            // arrays and structs arrive differently: an array parameter is
            // the caller's address (one word), a struct is pushed by value
            let push_size = if p.ty.is_array() {
                4
            } else {
                self.size_of(&p.ty, line, 0).unwrap_or(4).max(1)
            };
            let off = self.comp.symtab.alloc_param(push_size);
            match self.comp.symtab.insert(&p.name, line, SymKind::Parameter) {
                InsertOutcome::Redeclared { prior_line } => {
                    self.comp.diags.error(
                        line,
                        0,
                        format!(
                            "Redeclaration of parameter {} (prior declaration on line {})",
                            p.name, prior_line
                        ),
                    );
                }
                InsertOutcome::Shadows { prior_line } => {
                    self.comp.diags.warning(
                        line,
                        0,
                        format!(
                            "{} shadows an earlier declaration on line {}",
                            p.name, prior_line
                        ),
                    );
                }
                InsertOutcome::Fresh => {}
            }
            let ty = p.ty.clone();
            self.comp.symtab.modify(&p.name, |e| {
                e.ty = ty;
                e.size = push_size;
                e.offset = off;
                e.operand = Some(Operand::Stack(off));
            });
        }

        self.current_fn = Some(FnCtx {
            ret_type: ret_type.clone(),
            struct_return,
        });
        self.expect("{")?;
        let body = self.block_body()?;
        self.expect("}")?;
        self.current_fn = None;

        // pending fall-through jumps land on the synthesized return
        let here = self.comp.tac.next_index();
        self.comp.tac.backpatch(&body.next_list, here);
        let needs_ret = !body.next_list.is_empty()
            || !matches!(
                self.comp.tac.code.last(),
                Some(Instr::Ret { .. }) | Some(Instr::RetStruct { .. })
            );
        if needs_ret {
            let val = if ret_type.is_void() || struct_return {
                None
            } else {
                Some(Operand::imm(0))
            };
            self.comp.tac.emit(Instr::Ret { val });
        }
        self.comp.symtab.pop_scope(&mut self.comp.tac);
        Ok(())
    }
}
