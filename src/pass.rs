// SPDX-FileCopyrightText: 2024 University of Rochester
//
// SPDX-License-Identifier: MIT

/*! The pass surface a host compilation driver schedules.

The analysis is packaged as the named function pass "BoundsCheck". It
reads the IR, never mutates it, and reports that it preserves everything.
Functions of a module are analyzed strictly one after another; each
analysis owns its own context, so no state crosses function boundaries.
*/

use log::info as log_info;

use crate::analysis::{bounds, engine};
use crate::diagnostics::Diagnostic;
use crate::ir::{Function, Module};
use crate::AnalyzerError;

/// What a pass leaves intact. An analysis pass preserves everything.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Preservation {
    All,
    None,
}

/// A pass the host driver runs once per function.
pub trait FunctionPass {
    /// The name the pass is registered under.
    fn name(&self) -> &'static str;

    /// Which analyses and IR facts survive a run of this pass.
    fn preserves(&self) -> Preservation;

    /// Run on a single function, producing its diagnostics.
    ///
    /// # Errors
    /// An [`AnalyzerError`] abandons the function without partial
    /// results and propagates to the host scheduler.
    fn run_on_function(&mut self, func: &Function) -> Result<Vec<Diagnostic>, AnalyzerError>;

    /// Run on every function of a module in order, accumulating the
    /// diagnostics of all of them.
    ///
    /// # Errors
    /// Stops at the first function whose analysis aborts.
    fn run_on_module(&mut self, module: &Module) -> Result<Vec<Diagnostic>, AnalyzerError> {
        let mut diagnostics = Vec::new();
        for func in &module.functions {
            log_info!("running {} on `{}`", self.name(), func.name());
            diagnostics.extend(self.run_on_function(func)?);
        }
        Ok(diagnostics)
    }
}

/// The interval analysis plus bounds check, as a schedulable pass.
#[derive(Clone, Copy, Debug, Default)]
pub struct BoundsCheckPass;

impl FunctionPass for BoundsCheckPass {
    fn name(&self) -> &'static str {
        "BoundsCheck"
    }

    fn preserves(&self) -> Preservation {
        Preservation::All
    }

    fn run_on_function(&mut self, func: &Function) -> Result<Vec<Diagnostic>, AnalyzerError> {
        let ctx = engine::analyze(func)?;
        Ok(bounds::check(func, &ctx))
    }
}
