use crate::{ast_to_ir, Function};
use redstone_frontend::Module;
use redstone_utils::RedstoneResult;

/// A compilation unit: the functions being compiled and the options passed to
/// passes.
#[derive(Debug, Clone, Default)]
pub struct Context {
    pub functions: Vec<Function>,
    /// Extra options of the form `pass:opt` or `pass:opt=val`.
    /// Interpreted by individual passes.
    pub extra_opts: Vec<String>,
}

impl Context {
    pub fn new(functions: Vec<Function>, extra_opts: Vec<String>) -> Self {
        Self {
            functions,
            extra_opts,
        }
    }

    /// Flatten `module` into a single-function context.
    pub fn from_module(
        module: &Module,
        extra_opts: Vec<String>,
    ) -> RedstoneResult<Self> {
        Ok(Self::new(vec![ast_to_ir(module)?], extra_opts))
    }
}
