//! Implements a visitor for the blocks of [ir::Function]s.
//! Passes implemented as a Visitor are directly invoked on [ir::Context] to
//! compile every [ir::Function] using the pass.
use super::{ConstructVisitor, Named};
use redstone_ir as ir;
use redstone_utils::RedstoneResult;

/// The visiting interface for functions.
///
/// A pass will usually override [Visitor::block] and rely on the default
/// traversal to call it on every block of every function.
pub trait Visitor {
    /// Executed before the blocks of a function are visited.
    fn start(&mut self, _func: &mut ir::Function) -> RedstoneResult<()> {
        Ok(())
    }

    /// Executed for the block at index `block` of `func`.
    fn block(
        &mut self,
        _func: &mut ir::Function,
        _block: usize,
    ) -> RedstoneResult<()> {
        Ok(())
    }

    /// Executed after every block of a function has been visited.
    fn finish(&mut self, _func: &mut ir::Function) -> RedstoneResult<()> {
        Ok(())
    }

    /// Define the traversal over a function.
    /// Calls [Visitor::start], visits each block, and finally calls
    /// [Visitor::finish].
    fn traverse_function(
        &mut self,
        func: &mut ir::Function,
    ) -> RedstoneResult<()> {
        self.start(func)?;
        for block in 0..func.blocks.len() {
            self.block(func, block)?;
        }
        self.finish(func)
    }

    /// Run the visitor on a given program [`ir::Context`].
    ///
    /// After visiting a function, it calls [ConstructVisitor::clear_data] to
    /// reset the struct.
    fn do_pass(&mut self, context: &mut ir::Context) -> RedstoneResult<()>
    where
        Self: Sized + ConstructVisitor + Named,
    {
        log::debug!("Running `{}'", Self::name());
        for func in context.functions.iter_mut() {
            self.traverse_function(func)?;
            self.clear_data();
        }
        Ok(())
    }

    /// Build the pass from the context and call [Visitor::do_pass] using it.
    #[inline(always)]
    fn do_pass_default(context: &mut ir::Context) -> RedstoneResult<Self>
    where
        Self: ConstructVisitor + Sized + Named,
    {
        let mut visitor = Self::from(&*context)?;
        visitor.do_pass(context)?;
        Ok(visitor)
    }
}
