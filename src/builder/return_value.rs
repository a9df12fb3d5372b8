//! Return value plan, including the constructor convention

use super::argument::{check_outbound_array, outbound_release, PlanSteps};
use super::step::Step;
use super::vars::{Var, VariableAllocator};
use crate::config::BindingConfig;
use crate::core::types::{Direction, TypeDescriptor, TypeTag};
use crate::errors::{MarshalError, Result};

#[derive(Debug, Clone)]
pub struct ReturnPlan {
    pub(crate) ty: TypeDescriptor,
    constructor: bool,
    /// Ref-sink function to call when the constructed type starts floating
    ref_sink: Option<String>,
    pub(crate) capture: Option<Var>,
    pub(crate) output: Option<Var>,
    pub(crate) length_var: Option<Var>,
    pub(crate) steps: PlanSteps,
}

impl ReturnPlan {
    pub fn new(ty: &TypeDescriptor, constructor: bool, binding: &BindingConfig) -> Result<Self> {
        ty.validate("return", Direction::Out)?;
        if ty.caller_allocates() {
            return Err(MarshalError::unsupported_because(
                "return",
                ty,
                Direction::Out,
                "return values cannot be caller-allocated",
            ));
        }
        check_outbound_array("return", ty)?;

        let ref_sink = match ty.tag() {
            TypeTag::Object(reg) if constructor && reg.is_a(&binding.unowned_base) => {
                Some(binding.ref_sink_symbol.clone())
            }
            _ => None,
        };

        Ok(Self {
            ty: ty.clone(),
            constructor,
            ref_sink,
            capture: None,
            output: None,
            length_var: None,
            steps: PlanSteps::default(),
        })
    }

    #[inline]
    pub fn ty(&self) -> &TypeDescriptor {
        &self.ty
    }

    /// Whether a ref-sink call follows construction
    pub fn sinks_reference(&self) -> bool {
        self.ref_sink.is_some()
    }

    pub fn steps(&self) -> &PlanSteps {
        &self.steps
    }

    pub fn prepare(&mut self, vars: &mut VariableAllocator) {
        if !self.ty.is_void() {
            self.capture = Some(vars.request());
            self.output = Some(vars.request());
        }
    }

    pub fn process(&mut self) -> Result<()> {
        let (capture, output) = match (self.capture, self.output) {
            (Some(capture), Some(output)) => (capture, output),
            _ => return Ok(()),
        };

        if self.constructor && self.ty.tag().is_registered() {
            self.steps.post.push(Step::Construct {
                src: capture,
                dest: output,
                ty: self.ty.clone(),
            });
            if let Some(symbol) = &self.ref_sink {
                self.steps.post.push(Step::RefSink {
                    src: capture,
                    symbol: symbol.clone(),
                });
            }
            return Ok(());
        }

        let convert = Step::ToManaged {
            src: capture,
            dest: output,
            ty: self.ty.clone(),
            length: self.length_var,
        };
        if self.length_var.is_some() {
            self.steps.late_post.push(convert);
        } else {
            self.steps.post.push(convert);
        }
        if let Some(release) = outbound_release(capture, &self.ty) {
            self.steps.cleanup.push(release);
        }
        Ok(())
    }
}
