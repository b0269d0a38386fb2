//! Type sequences and conversion rules.
//!
//! A type is an ordered list of tokens: the base type first (pointer depth
//! glued onto it as trailing ` *`s, struct name as the second token), then
//! sign qualifiers, then an `arr` marker followed by `[N]` dimension tokens.
//! All type comparisons happen on the normalized form, so normalization is
//! re-applied after every attribute synthesis step.

use std::fmt;

/// Pointer and word size for the 32-bit target.
pub const WORD_SIZE: u32 = 4;

/// Scalar category that selects the opcode suffix on typed TAC instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValType {
    Int,
    Char,
    Float,
}

impl ValType {
    pub fn suffix(self) -> &'static str {
        match self {
            ValType::Int => "int",
            ValType::Char => "char",
            ValType::Float => "float",
        }
    }
}

impl fmt::Display for ValType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

/// Cast endpoints as they appear in `cast` TAC instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastTy {
    Int,
    UnsignedInt,
    Char,
    Float,
}

impl CastTy {
    pub fn name(self) -> &'static str {
        match self {
            CastTy::Int => "int",
            CastTy::UnsignedInt => "unsigned_int",
            CastTy::Char => "char",
            CastTy::Float => "float",
        }
    }
}

impl fmt::Display for CastTy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Normalized ordered-token encoding of a composite type.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TypeSeq {
    pub tokens: Vec<String>,
}

const BASES: [&str; 8] = ["int", "short", "char", "bool", "float", "void", "str", "struct"];

fn is_base(tok: &str) -> bool {
    let root = tok.trim_end_matches(" *").trim_end_matches('*').trim_end();
    BASES.contains(&root)
}

impl TypeSeq {
    pub fn new() -> Self {
        TypeSeq { tokens: Vec::new() }
    }

    pub fn base(name: &str) -> Self {
        TypeSeq {
            tokens: vec![name.to_string()],
        }
    }

    pub fn named_struct(name: &str) -> Self {
        TypeSeq {
            tokens: vec!["struct".to_string(), name.to_string()],
        }
    }

    pub fn from_tokens(tokens: Vec<String>) -> Self {
        let mut t = TypeSeq { tokens };
        t.normalize();
        t
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// The base token with pointer stars stripped (`int`, `struct`, ...).
    pub fn base_name(&self) -> &str {
        match self.tokens.first() {
            Some(t) => t.split(' ').next().unwrap_or(""),
            None => "",
        }
    }

    /// For struct types the registry key is the second token.
    pub fn struct_name(&self) -> Option<&str> {
        if self.base_name() == "struct" {
            self.tokens.get(1).map(|s| s.as_str())
        } else {
            None
        }
    }

    pub fn pointer_depth(&self) -> usize {
        self.tokens
            .first()
            .map(|t| t.matches('*').count())
            .unwrap_or(0)
    }

    pub fn is_pointer(&self) -> bool {
        self.pointer_depth() > 0
    }

    pub fn is_array(&self) -> bool {
        self.tokens.iter().any(|t| t == "arr")
    }

    pub fn is_struct(&self) -> bool {
        self.base_name() == "struct" && !self.is_pointer()
    }

    pub fn is_void(&self) -> bool {
        self.base_name() == "void" && !self.is_pointer()
    }

    pub fn is_unsigned(&self) -> bool {
        self.tokens.iter().any(|t| t == "unsigned")
    }

    pub fn is_string(&self) -> bool {
        self.base_name() == "str" && !self.is_array()
    }

    /// Scalar: something an `ifnz` test or a cast can operate on.
    pub fn is_scalar(&self) -> bool {
        !self.is_struct() && !self.is_array() && !self.is_void() && !self.is_empty()
    }

    pub fn is_arith(&self) -> bool {
        !self.is_pointer()
            && !self.is_array()
            && matches!(self.base_name(), "int" | "short" | "char" | "bool" | "float")
    }

    pub fn is_integral(&self) -> bool {
        self.is_arith() && self.base_name() != "float"
    }

    /// Array dimensions in declaration order.
    pub fn dims(&self) -> Vec<u32> {
        let mut out = Vec::new();
        let mut in_arr = false;
        for tok in &self.tokens {
            if tok == "arr" {
                in_arr = true;
            } else if in_arr && tok.starts_with('[') {
                let inner = tok.trim_start_matches('[').trim_end_matches(']');
                out.push(inner.parse().unwrap_or(0));
            }
        }
        out
    }

    pub fn add_pointer(&mut self) {
        if let Some(first) = self.tokens.first_mut() {
            first.push_str(" *");
        }
    }

    /// Strip one pointer level (dereference).
    pub fn deref(&self) -> Option<TypeSeq> {
        if !self.is_pointer() {
            return None;
        }
        let mut t = self.clone();
        let first = t.tokens.first_mut().unwrap();
        let stripped = first.strip_suffix(" *").map(|s| s.to_string());
        match stripped {
            Some(s) => *first = s,
            None => return None,
        }
        Some(t)
    }

    /// Pointer to this type (address-of).
    pub fn addr_of(&self) -> TypeSeq {
        let mut t = self.clone();
        t.add_pointer();
        t
    }

    pub fn push_dim(&mut self, n: u32) {
        if !self.is_array() {
            self.tokens.push("arr".to_string());
        }
        self.tokens.push(format!("[{}]", n));
    }

    /// Drop the array part (the element type of a fully subscripted array).
    pub fn element(&self) -> TypeSeq {
        let toks: Vec<String> = self
            .tokens
            .iter()
            .take_while(|t| *t != "arr")
            .cloned()
            .collect();
        TypeSeq { tokens: toks }
    }

    /// Reorder tokens into the canonical form: base (with glued stars) first,
    /// qualifiers next, `arr` + dims last. Idempotent.
    pub fn normalize(&mut self) {
        let mut base: Option<String> = None;
        let mut struct_name: Option<String> = None;
        let mut quals: Vec<String> = Vec::new();
        let mut stars = 0usize;
        let mut dims: Vec<String> = Vec::new();
        let mut prev_was_base = false;

        for tok in &self.tokens {
            if tok == "arr" {
                prev_was_base = false;
                continue;
            }
            if tok.starts_with('[') {
                dims.push(tok.clone());
                prev_was_base = false;
            } else if tok == "*" {
                stars += 1;
                prev_was_base = false;
            } else if tok == "signed" || tok == "unsigned" {
                if !quals.contains(tok) {
                    quals.push(tok.clone());
                }
                prev_was_base = false;
            } else if is_base(tok) {
                stars += tok.matches('*').count();
                let root = tok.split(' ').next().unwrap_or("").to_string();
                prev_was_base = root == "struct";
                base = Some(root);
            } else if prev_was_base {
                struct_name = Some(tok.clone());
                prev_was_base = false;
            } else {
                // unknown token, keep as qualifier position
                quals.push(tok.clone());
                prev_was_base = false;
            }
        }

        let mut out = Vec::new();
        if let Some(mut b) = base {
            for _ in 0..stars {
                b.push_str(" *");
            }
            out.push(b);
        }
        if let Some(n) = struct_name {
            out.push(n);
        }
        out.extend(quals);
        if !dims.is_empty() {
            out.push("arr".to_string());
            out.extend(dims);
        }
        self.tokens = out;
    }

    /// Promotion rank over the arithmetic lattice.
    pub fn rank(&self) -> u32 {
        match self.base_name() {
            "bool" => 1,
            "char" => 2,
            "short" => 3,
            "int" => 4,
            "float" => 5,
            _ => 4,
        }
    }

    /// The opcode-suffix category for values of this type.
    pub fn carrier(&self) -> ValType {
        if self.is_pointer() || self.is_array() {
            return ValType::Int;
        }
        match self.base_name() {
            "float" => ValType::Float,
            "char" => ValType::Char,
            _ => ValType::Int,
        }
    }

    /// The endpoint tag used by `cast` instructions.
    pub fn cast_ty(&self) -> CastTy {
        if self.is_pointer() || self.is_array() {
            return CastTy::Int;
        }
        match self.base_name() {
            "float" => CastTy::Float,
            "char" => CastTy::Char,
            _ => {
                if self.is_unsigned() {
                    CastTy::UnsignedInt
                } else {
                    CastTy::Int
                }
            }
        }
    }

    /// Display form for diagnostics (`int *`, `struct point`, ...).
    pub fn describe(&self) -> String {
        self.tokens.join(" ")
    }
}

impl fmt::Display for TypeSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// Size of one scalar of the given base, pointers included.
pub fn scalar_size(ty: &TypeSeq) -> u32 {
    if ty.is_pointer() {
        return WORD_SIZE;
    }
    match ty.base_name() {
        "char" | "bool" => 1,
        "short" => 2,
        "str" => WORD_SIZE,
        _ => WORD_SIZE,
    }
}

/// Result of promoting two arithmetic operands to a common type.
pub struct Promotion {
    pub result: TypeSeq,
    pub cast_lhs: bool,
    pub cast_rhs: bool,
}

/// Promote both sides to the larger of the two arithmetic types, propagating
/// `unsigned` when either side carries it and the result stays integral.
pub fn promote(lhs: &TypeSeq, rhs: &TypeSeq) -> Promotion {
    let (wider, cast_lhs, cast_rhs) = if lhs.rank() >= rhs.rank() {
        (lhs, false, lhs.rank() != rhs.rank())
    } else {
        (rhs, true, false)
    };
    let mut result = TypeSeq::base(wider.base_name());
    if result.base_name() != "float" && (lhs.is_unsigned() || rhs.is_unsigned()) {
        result.tokens.push("unsigned".to_string());
    }
    Promotion {
        result,
        cast_lhs,
        cast_rhs,
    }
}

/// Promote a single unary operand to at least `int`.
pub fn promote_unary(ty: &TypeSeq) -> TypeSeq {
    if ty.rank() < TypeSeq::base("int").rank() {
        let mut t = TypeSeq::base("int");
        if ty.is_unsigned() {
            t.tokens.push("unsigned".to_string());
        }
        t
    } else {
        ty.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_orders_tokens() {
        let mut t = TypeSeq {
            tokens: vec![
                "unsigned".to_string(),
                "int".to_string(),
                "*".to_string(),
                "[3]".to_string(),
            ],
        };
        t.normalize();
        assert_eq!(t.tokens, vec!["int *", "unsigned", "arr", "[3]"]);
    }

    #[test]
    fn normalize_is_idempotent() {
        let mut t = TypeSeq::from_tokens(vec![
            "int".to_string(),
            "*".to_string(),
            "unsigned".to_string(),
        ]);
        let once = t.clone();
        t.normalize();
        assert_eq!(t, once);
    }

    #[test]
    fn pointer_round_trip() {
        let mut t = TypeSeq::base("char");
        t.add_pointer();
        assert!(t.is_pointer());
        assert_eq!(t.carrier(), ValType::Int);
        let back = t.deref().unwrap();
        assert_eq!(back.base_name(), "char");
        assert_eq!(back.carrier(), ValType::Char);
    }

    #[test]
    fn struct_tokens() {
        let t = TypeSeq::named_struct("point");
        assert!(t.is_struct());
        assert_eq!(t.struct_name(), Some("point"));
        let p = t.addr_of();
        assert!(!p.is_struct());
        assert!(p.is_pointer());
        assert_eq!(p.struct_name(), None);
    }

    #[test]
    fn promotion_picks_wider_and_keeps_unsigned() {
        let c = TypeSeq::base("char");
        let mut u = TypeSeq::base("int");
        u.tokens.push("unsigned".to_string());
        let p = promote(&c, &u);
        assert_eq!(p.result.base_name(), "int");
        assert!(p.result.is_unsigned());
        assert!(p.cast_lhs);
        assert!(!p.cast_rhs);
    }

    #[test]
    fn float_result_drops_unsigned() {
        let f = TypeSeq::base("float");
        let mut u = TypeSeq::base("int");
        u.tokens.push("unsigned".to_string());
        let p = promote(&f, &u);
        assert_eq!(p.result.base_name(), "float");
        assert!(!p.result.is_unsigned());
    }

    #[test]
    fn dims_parse_back() {
        let mut t = TypeSeq::base("int");
        t.push_dim(2);
        t.push_dim(3);
        assert_eq!(t.dims(), vec![2, 3]);
        assert_eq!(t.element().base_name(), "int");
    }
}
