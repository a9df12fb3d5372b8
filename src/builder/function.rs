//! Signature builder - orchestrates plans into a generated callable
//!
//! Design: plans are classified first, then every plan gets its slots, then
//! length links are wired, and only then are steps emitted. Emitting last
//! lets a plan's steps refer to slots owned by the plans it is linked with.

use super::argument::ArgumentPlan;
use super::callable::GeneratedCallable;
use super::error_arg::ErrorPlan;
use super::linkage::LengthLinkage;
use super::return_value::ReturnPlan;
use super::step::{Invocation, Step};
use super::vars::VariableAllocator;
use crate::config::BindingConfig;
use crate::core::signature::FunctionInfo;
use crate::errors::Result;
use crate::logging::perf;
use smallvec::SmallVec;

pub struct SignatureBuilder<'a> {
    info: &'a FunctionInfo,
    binding: &'a BindingConfig,
}

impl<'a> SignatureBuilder<'a> {
    pub fn new(info: &'a FunctionInfo, binding: &'a BindingConfig) -> Self {
        Self { info, binding }
    }

    /// Generate the callable; nothing partial is returned on error
    pub fn build(&self) -> Result<GeneratedCallable> {
        let info = self.info;
        let _perf = perf::track("build_binding");
        let span = tracing::debug_span!("build_binding", symbol = %info.symbol);
        let _enter = span.enter();

        let mut receiver = info.receiver.as_ref().map(ArgumentPlan::receiver).transpose()?;
        let mut params = info
            .args
            .iter()
            .enumerate()
            .map(|(index, spec)| ArgumentPlan::new(index, spec))
            .collect::<Result<Vec<_>>>()?;
        let mut ret = ReturnPlan::new(&info.return_type, info.constructor, self.binding)?;
        let mut error = info.throws.then(ErrorPlan::new);

        let mut vars = VariableAllocator::new();
        if let Some(plan) = receiver.as_mut() {
            plan.prepare(&mut vars);
        }
        for plan in params.iter_mut() {
            plan.prepare(&mut vars);
        }
        ret.prepare(&mut vars);
        if let Some(plan) = error.as_mut() {
            plan.prepare(&mut vars);
        }

        let linkage = LengthLinkage::link(&mut params, &mut ret)?;

        if let Some(plan) = receiver.as_mut() {
            plan.process()?;
        }
        for plan in params.iter_mut() {
            plan.process()?;
        }
        ret.process()?;
        if let Some(plan) = error.as_mut() {
            plan.process();
        }

        // Pre-call: declaration order, computed lengths right before their array
        let mut pre = Vec::new();
        if let Some(plan) = &receiver {
            pre.extend(plan.steps.pre.iter().cloned());
        }
        for (index, plan) in params.iter().enumerate() {
            if plan.is_deferred() {
                continue;
            }
            for holder in linkage.deferred_for(index, &params) {
                pre.extend(params[holder].steps.pre.iter().cloned());
            }
            pre.extend(plan.steps.pre.iter().cloned());
        }
        // User data boxed for this call lives as long as a notify-retained trampoline
        let user_data: Vec<_> = params.iter().filter_map(ArgumentPlan::opaque_input).collect();
        if !user_data.is_empty() {
            for trampoline in params.iter().filter_map(ArgumentPlan::notify_trampoline) {
                pre.push(Step::Retain {
                    trampoline,
                    values: user_data.clone(),
                });
            }
        }
        if let Some(plan) = &error {
            pre.extend(plan.steps.pre.iter().cloned());
        }

        // Native arguments: receiver, every parameter, error slot
        let mut args = SmallVec::new();
        if let Some(var) = receiver.as_ref().and_then(ArgumentPlan::call_arg) {
            args.push(var);
        }
        args.extend(params.iter().filter_map(ArgumentPlan::call_arg));
        if let Some(slot) = error.as_ref().and_then(|plan| plan.slot) {
            args.push(slot);
        }
        let invocation = Invocation {
            symbol: info.symbol.clone(),
            args,
            capture: ret.capture,
        };

        // Post-call: the error check runs before anything is read
        let mut post = Vec::new();
        if let Some(plan) = &error {
            post.extend(plan.steps.post.iter().cloned());
        }
        for plan in &params {
            post.extend(plan.steps.post.iter().cloned());
        }
        post.extend(ret.steps.post.iter().cloned());

        let mut late_post = Vec::new();
        for plan in &params {
            late_post.extend(plan.steps.late_post.iter().cloned());
        }
        late_post.extend(ret.steps.late_post.iter().cloned());

        let mut cleanup = Vec::new();
        for plan in receiver.iter().chain(params.iter()) {
            cleanup.extend(plan.steps.cleanup.iter().cloned());
        }
        cleanup.extend(ret.steps.cleanup.iter().cloned());
        if let Some(plan) = &error {
            cleanup.extend(plan.steps.cleanup.iter().cloned());
        }

        let mut inputs = Vec::new();
        for plan in receiver.iter().chain(params.iter()) {
            if let Some(var) = plan.visible_input() {
                inputs.push((plan.name().to_string(), var));
            }
        }
        let mut outputs: Vec<_> = params.iter().filter_map(ArgumentPlan::visible_output).collect();
        outputs.extend(ret.output);

        let callable = GeneratedCallable {
            name: info.qualified_name(),
            inputs,
            outputs,
            pre,
            invocation,
            post,
            late_post,
            cleanup,
            frame_size: vars.count(),
        };
        tracing::trace!(listing = %callable, "generated callable");
        Ok(callable)
    }
}
