//! Code generation error types.

/// Error type for code generation.
///
/// Register pressure is reported as a hard error instead of silently
/// emitting wrong code; with the per-instruction register reset no lowering
/// requests more than five registers, so seeing it means an internal bug.
#[derive(Debug)]
pub enum CodeGenError {
    /// A malformed instruction reached the backend.
    Logic(String),
    /// The register file could not satisfy a request.
    RegisterPressure,
}

impl std::fmt::Display for CodeGenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodeGenError::Logic(s) => write!(f, "{}", s),
            CodeGenError::RegisterPressure => {
                write!(f, "internal error: out of registers during lowering")
            }
        }
    }
}

impl std::error::Error for CodeGenError {}

impl From<String> for CodeGenError {
    fn from(s: String) -> Self {
        CodeGenError::Logic(s)
    }
}
