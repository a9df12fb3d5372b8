//! Generated callable - the finished step program for one native function

use super::step::{Env, Frame, Invocation, Step};
use super::vars::Var;
use crate::errors::{MarshalError, Result};
use crate::interop::{CallOutput, NativeContext, NativeInvoker, Value};
use std::fmt;

/// Build-once marshaling program for one native symbol
///
/// Execution order is `pre`, the invocation, `post`, `late_post`, then
/// `cleanup`. Cleanup runs even when an earlier phase failed.
#[derive(Debug, Clone)]
pub struct GeneratedCallable {
    pub(crate) name: String,
    pub(crate) inputs: Vec<(String, Var)>,
    pub(crate) outputs: Vec<Var>,
    pub(crate) pre: Vec<Step>,
    pub(crate) invocation: Invocation,
    pub(crate) post: Vec<Step>,
    pub(crate) late_post: Vec<Step>,
    pub(crate) cleanup: Vec<Step>,
    pub(crate) frame_size: usize,
}

impl GeneratedCallable {
    /// Qualified managed name (`Namespace.function`)
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn symbol(&self) -> &str {
        &self.invocation.symbol
    }

    /// Visible parameter names, in call order
    pub fn parameters(&self) -> Vec<&str> {
        self.inputs.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Number of visible results
    pub fn result_count(&self) -> usize {
        self.outputs.len()
    }

    /// Number of native call arguments
    pub fn arity(&self) -> usize {
        self.invocation.arity()
    }

    pub fn pre_steps(&self) -> &[Step] {
        &self.pre
    }

    pub fn invocation(&self) -> &Invocation {
        &self.invocation
    }

    pub fn post_steps(&self) -> &[Step] {
        &self.post
    }

    pub fn late_post_steps(&self) -> &[Step] {
        &self.late_post
    }

    pub fn cleanup_steps(&self) -> &[Step] {
        &self.cleanup
    }

    pub fn step_count(&self) -> usize {
        self.pre.len() + 1 + self.post.len() + self.late_post.len() + self.cleanup.len()
    }

    /// Run the program with the visible arguments
    pub fn call(&self, args: &[Value], invoker: &dyn NativeInvoker, context: &NativeContext) -> Result<CallOutput> {
        if args.len() != self.inputs.len() {
            return Err(MarshalError::ArityMismatch {
                callable: self.name.clone(),
                expected: self.inputs.len(),
                found: args.len(),
            });
        }

        let mut frame = Frame::new(self.frame_size);
        for ((_, var), arg) in self.inputs.iter().zip(args) {
            frame.set_value(*var, arg.clone());
        }

        let env = Env {
            invoker,
            context,
            symbol: &self.invocation.symbol,
        };
        let body = self.run_body(&mut frame, &env);
        let cleanup = self.run_cleanup(&mut frame, &env);
        body?;
        cleanup?;

        let values = self
            .outputs
            .iter()
            .map(|var| frame.take_value(*var))
            .collect::<Result<Vec<_>>>()?;
        Ok(CallOutput::from_values(values))
    }

    fn run_body(&self, frame: &mut Frame, env: &Env<'_>) -> Result<()> {
        for step in &self.pre {
            step.run(frame, env)?;
        }
        self.invocation.run(frame, env, self.arity())?;
        for step in self.post.iter().chain(&self.late_post) {
            step.run(frame, env)?;
        }
        Ok(())
    }

    /// Every cleanup step runs; the first failure is reported
    fn run_cleanup(&self, frame: &mut Frame, env: &Env<'_>) -> Result<()> {
        let mut first_error = None;
        for step in &self.cleanup {
            if let Err(err) = step.run(frame, env) {
                tracing::warn!(symbol = env.symbol, step = %step, error = %err, "cleanup step failed");
                first_error.get_or_insert(err);
            }
        }
        crate::logging::log_cleanup(env.symbol, self.cleanup.len(), first_error.is_some());
        first_error.map_or(Ok(()), Err)
    }
}

impl fmt::Display for GeneratedCallable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "def {}(", self.name)?;
        for (i, (name, var)) in self.inputs.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={}", name, var)?;
        }
        writeln!(f, "):")?;

        for step in &self.pre {
            writeln!(f, "    {}", step)?;
        }
        writeln!(f, "    {}", self.invocation)?;
        for step in self.post.iter().chain(&self.late_post) {
            writeln!(f, "    {}", step)?;
        }
        if !self.cleanup.is_empty() {
            writeln!(f, "  finally:")?;
            for step in &self.cleanup {
                writeln!(f, "    {}", step)?;
            }
        }
        write!(f, "    return (")?;
        for (i, var) in self.outputs.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", var)?;
        }
        f.write_str(")")
    }
}
