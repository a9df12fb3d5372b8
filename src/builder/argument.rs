//! Per-parameter marshaling plans
//!
//! A plan is built in three phases: `new` classifies the parameter and
//! rejects combinations with no defined conversion, `prepare` allocates its
//! slots, and `process` emits its steps once length linkage has been wired.

use super::step::Step;
use super::vars::{Var, VariableAllocator};
use crate::core::signature::ArgumentSpec;
use crate::core::types::{Direction, Ownership, TypeDescriptor, TypeTag};
use crate::errors::{MarshalError, Result};
use crate::interop::Retention;

/// Which plan of a signature a link or step belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanRef {
    Receiver,
    Param(usize),
    Return,
}

/// Slots owned by one plan
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct PlanVars {
    /// Managed input
    pub input: Option<Var>,
    /// Native value passed to the call
    pub call_arg: Option<Var>,
    /// Inbound native value staged before being stored in an inout slot
    pub staged: Option<Var>,
    /// Native value available after the call
    pub native_out: Option<Var>,
    /// Managed result
    pub output: Option<Var>,
}

/// Emitted steps of one plan, by phase
#[derive(Debug, Clone, Default)]
pub struct PlanSteps {
    pub pre: Vec<Step>,
    pub post: Vec<Step>,
    pub late_post: Vec<Step>,
    pub cleanup: Vec<Step>,
}

/// Marshaling plan for one declared parameter or the method receiver
#[derive(Debug, Clone)]
pub struct ArgumentPlan {
    pub(crate) origin: PlanRef,
    pub(crate) spec: ArgumentSpec,
    pub(crate) vars: PlanVars,
    /// Excluded from the visible parameters and results
    pub(crate) subsumed: bool,
    /// Array whose element count this plan carries
    pub(crate) length_for: Option<PlanRef>,
    /// Managed array this plan's inbound count is computed from
    pub(crate) length_source: Option<Var>,
    /// Slot holding this array's element count after the call
    pub(crate) length_var: Option<Var>,
    pub(crate) steps: PlanSteps,
}

impl ArgumentPlan {
    /// Classify a declared parameter
    pub fn new(index: usize, spec: &ArgumentSpec) -> Result<Self> {
        classify(&spec.name, spec.direction, &spec.ty)?;
        Ok(Self::unchecked(PlanRef::Param(index), spec.clone()))
    }

    /// Plan for the instance a method is called on
    pub fn receiver(ty: &TypeDescriptor) -> Result<Self> {
        let spec = ArgumentSpec::input("self", ty.clone());
        if !ty.tag().is_registered() {
            return Err(MarshalError::unsupported_because(
                "self",
                ty,
                Direction::In,
                "receiver must be a struct, object or interface",
            ));
        }
        classify(&spec.name, spec.direction, &spec.ty)?;
        Ok(Self::unchecked(PlanRef::Receiver, spec))
    }

    fn unchecked(origin: PlanRef, spec: ArgumentSpec) -> Self {
        Self {
            origin,
            spec,
            vars: PlanVars::default(),
            subsumed: false,
            length_for: None,
            length_source: None,
            length_var: None,
            steps: PlanSteps::default(),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    #[inline]
    pub fn direction(&self) -> Direction {
        self.spec.direction
    }

    #[inline]
    pub fn ty(&self) -> &TypeDescriptor {
        &self.spec.ty
    }

    #[inline]
    pub fn is_subsumed(&self) -> bool {
        self.subsumed
    }

    pub fn steps(&self) -> &PlanSteps {
        &self.steps
    }

    /// Visible managed input slot
    pub(crate) fn visible_input(&self) -> Option<Var> {
        if self.subsumed {
            None
        } else {
            self.vars.input
        }
    }

    /// Visible managed output slot
    pub(crate) fn visible_output(&self) -> Option<Var> {
        if self.subsumed {
            None
        } else {
            self.vars.output
        }
    }

    /// Native argument slot; present after `prepare`
    pub(crate) fn call_arg(&self) -> Option<Var> {
        self.vars.call_arg
    }

    /// Slot another plan reads this plan's count from
    pub(crate) fn count_var(&self) -> Option<Var> {
        if self.direction().is_outbound() {
            self.vars.native_out
        } else {
            self.vars.call_arg
        }
    }

    /// Trampoline slot of a callback that stays registered after the call
    pub(crate) fn notify_trampoline(&self) -> Option<Var> {
        match self.ty().tag() {
            TypeTag::Callback(_)
                if self.direction() == Direction::In
                    && Retention::for_ownership(self.ty().ownership()) == Retention::UntilNotify =>
            {
                self.vars.call_arg
            }
            _ => None,
        }
    }

    /// Managed slot of an inbound opaque pointer, holding its boxed value once converted
    pub(crate) fn opaque_input(&self) -> Option<Var> {
        match self.ty().tag() {
            TypeTag::Void | TypeTag::Pointer if self.direction() == Direction::In && !self.subsumed => {
                self.vars.input
            }
            _ => None,
        }
    }

    /// Inbound length computed from an array rather than supplied by the caller
    pub(crate) fn is_deferred(&self) -> bool {
        self.subsumed && self.direction().is_inbound()
    }

    pub fn prepare(&mut self, vars: &mut VariableAllocator) {
        let direction = self.direction();
        self.vars.call_arg = Some(vars.request());
        if direction.is_inbound() {
            self.vars.input = Some(vars.request());
        }
        if direction == Direction::InOut {
            self.vars.staged = Some(vars.request());
        }
        if direction.is_outbound() {
            self.vars.native_out = if self.ty().caller_allocates() {
                self.vars.call_arg
            } else {
                Some(vars.request())
            };
            self.vars.output = Some(vars.request());
        }
    }

    /// Emit this plan's steps
    pub fn process(&mut self) -> Result<()> {
        let call_arg = self.slot(self.vars.call_arg)?;
        match self.direction() {
            Direction::In => {
                let pre = self.inbound_steps(call_arg)?;
                self.steps.pre.extend(pre);
            }
            Direction::InOut => {
                let staged = self.slot(self.vars.staged)?;
                let mut pre = self.inbound_steps(staged)?;
                pre.push(Step::AllocOut { dest: call_arg });
                pre.push(Step::StoreSlot {
                    slot: call_arg,
                    src: staged,
                });
                self.steps.pre.extend(pre);
                self.outbound_steps(call_arg)?;
            }
            Direction::Out if self.ty().caller_allocates() => {
                let output = self.slot(self.vars.output)?;
                self.steps.pre.push(Step::AllocCaller {
                    dest: call_arg,
                    ty: self.ty().clone(),
                });
                self.steps.post.push(Step::WrapCaller {
                    src: call_arg,
                    dest: output,
                    ty: self.ty().clone(),
                });
                self.steps.cleanup.push(Step::DiscardCaller {
                    src: call_arg,
                    wrapped: output,
                });
            }
            Direction::Out => {
                self.steps.pre.push(Step::AllocOut { dest: call_arg });
                self.outbound_steps(call_arg)?;
            }
        }
        Ok(())
    }

    /// Conversion of the managed input into `dest`
    fn inbound_steps(&mut self, dest: Var) -> Result<Vec<Step>> {
        let name = self.name().to_string();
        let ty = self.ty().clone();

        if let Some(array) = self.length_source {
            return Ok(vec![Step::LengthOf { array, dest, ty, name }]);
        }

        let src = self.slot(self.vars.input)?;
        let step = match ty.tag() {
            TypeTag::Void | TypeTag::Pointer => Step::Opaque { src, dest, name },
            TypeTag::Callback(_) => {
                let retention = Retention::for_ownership(ty.ownership());
                if retention == Retention::Call {
                    self.steps.cleanup.push(Step::Untrack { src: dest });
                }
                Step::Callback {
                    src,
                    dest,
                    ty,
                    name,
                    retention,
                }
            }
            _ => {
                // inout buffers are handed over to the callee
                if self.direction() == Direction::In && ty.ownership() != Ownership::None && ty.is_buffer() {
                    self.steps.cleanup.push(Step::Release {
                        src: dest,
                        ty: ty.clone(),
                        ownership: ty.ownership(),
                    });
                }
                Step::ToNative { src, dest, ty, name }
            }
        };
        Ok(vec![step])
    }

    /// Read-back through the out-slot `slot` and conversion to a managed value
    fn outbound_steps(&mut self, slot: Var) -> Result<()> {
        let native_out = self.slot(self.vars.native_out)?;
        self.steps.post.push(Step::ReadSlot {
            slot,
            dest: native_out,
        });
        self.steps.cleanup.push(Step::FreeSlot { slot });

        if self.subsumed {
            return Ok(());
        }

        let output = self.slot(self.vars.output)?;
        let convert = Step::ToManaged {
            src: native_out,
            dest: output,
            ty: self.ty().clone(),
            length: self.length_var,
        };
        if self.length_var.is_some() {
            self.steps.late_post.push(convert);
        } else {
            self.steps.post.push(convert);
        }
        if let Some(release) = outbound_release(native_out, self.ty()) {
            self.steps.cleanup.push(release);
        }
        Ok(())
    }

    fn slot(&self, var: Option<Var>) -> Result<Var> {
        var.ok_or_else(|| MarshalError::Frame {
            slot: self.name().to_string(),
            expected: "prepared",
        })
    }
}

/// Release of a returned buffer once its managed copy exists
pub(crate) fn outbound_release(src: Var, ty: &TypeDescriptor) -> Option<Step> {
    if ty.ownership() != Ownership::None && ty.is_buffer() {
        Some(Step::Release {
            src,
            ty: ty.clone(),
            ownership: ty.ownership(),
        })
    } else {
        None
    }
}

/// Reject direction/tag combinations with no defined conversion
pub(crate) fn classify(name: &str, direction: Direction, ty: &TypeDescriptor) -> Result<()> {
    ty.validate(name, direction)?;

    if ty.caller_allocates()
        && !(direction == Direction::Out && matches!(ty.tag(), TypeTag::Struct(_) | TypeTag::Object(_)))
    {
        return Err(MarshalError::unsupported_because(
            name,
            ty,
            direction,
            "caller-allocates applies only to struct and object out parameters",
        ));
    }

    if direction == Direction::InOut {
        match ty.tag() {
            TypeTag::Struct(_)
            | TypeTag::Object(_)
            | TypeTag::Interface(_)
            | TypeTag::GList
            | TypeTag::GSList
            | TypeTag::GHashTable => {
                return Err(MarshalError::not_implemented(format!(
                    "inout parameter '{}' of type {}",
                    name, ty
                )));
            }
            TypeTag::Callback(_) => return Err(MarshalError::unsupported(name, ty, direction)),
            _ => {}
        }
    }

    if direction.is_outbound() {
        check_outbound_array(name, ty)?;
    }
    Ok(())
}

/// Outbound C arrays need a fixed size or a linked length
pub(crate) fn check_outbound_array(name: &str, ty: &TypeDescriptor) -> Result<()> {
    if matches!(ty.tag(), TypeTag::Array) && ty.fixed_size().is_none() && ty.length_index().is_none() {
        return Err(MarshalError::not_implemented(format!(
            "outbound array '{}' without fixed size or length parameter",
            name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::RegisteredType;
    use std::sync::Arc;

    fn planned(spec: ArgumentSpec) -> ArgumentPlan {
        let mut vars = VariableAllocator::new();
        let mut plan = ArgumentPlan::new(0, &spec).unwrap();
        plan.prepare(&mut vars);
        plan.process().unwrap();
        plan
    }

    #[test]
    fn test_owned_string_schedules_cleanup() {
        let plan = planned(ArgumentSpec::input(
            "path",
            TypeDescriptor::utf8().with_ownership(Ownership::Everything),
        ));
        assert_eq!(plan.steps.pre.len(), 1);
        assert!(matches!(plan.steps.cleanup[..], [Step::Release { .. }]));

        let plan = planned(ArgumentSpec::input("path", TypeDescriptor::utf8()));
        assert!(plan.steps.cleanup.is_empty());
    }

    #[test]
    fn test_out_scalar_reads_slot() {
        let plan = planned(ArgumentSpec::output("n", TypeDescriptor::int32()));
        assert!(matches!(plan.steps.pre[..], [Step::AllocOut { .. }]));
        assert!(matches!(plan.steps.post[..], [Step::ReadSlot { .. }, Step::ToManaged { .. }]));
        assert!(matches!(plan.steps.cleanup[..], [Step::FreeSlot { .. }]));
        assert!(plan.visible_input().is_none());
        assert!(plan.visible_output().is_some());
    }

    #[test]
    fn test_inout_stores_then_reads() {
        let plan = planned(ArgumentSpec::inout("n", TypeDescriptor::int32()));
        assert!(matches!(
            plan.steps.pre[..],
            [Step::ToNative { .. }, Step::AllocOut { .. }, Step::StoreSlot { .. }]
        ));
        assert!(plan.visible_input().is_some());
        assert!(plan.visible_output().is_some());
    }

    #[test]
    fn test_caller_allocates_struct() {
        let rect = Arc::new(RegisteredType::structure("Regress", "TestStructA", 16));
        let plan = planned(ArgumentSpec::output(
            "out",
            TypeDescriptor::structure(rect).caller_allocated(),
        ));
        assert!(matches!(plan.steps.pre[..], [Step::AllocCaller { .. }]));
        assert!(matches!(plan.steps.post[..], [Step::WrapCaller { .. }]));
    }

    #[test]
    fn test_rejected_combinations() {
        let obj = TypeDescriptor::object(Arc::new(RegisteredType::object("Regress", "TestObj")));
        let err = ArgumentPlan::new(0, &ArgumentSpec::inout("obj", obj)).unwrap_err();
        assert!(matches!(err, MarshalError::NotImplemented { .. }));

        let list = TypeDescriptor::glist_of(TypeDescriptor::utf8());
        let err = ArgumentPlan::new(0, &ArgumentSpec::inout("l", list)).unwrap_err();
        assert!(matches!(err, MarshalError::NotImplemented { .. }));

        let err = ArgumentPlan::new(0, &ArgumentSpec::output("n", TypeDescriptor::int32().caller_allocated()))
            .unwrap_err();
        assert!(matches!(err, MarshalError::UnsupportedType { .. }));

        let err = ArgumentPlan::new(0, &ArgumentSpec::output("a", TypeDescriptor::array_of(TypeDescriptor::int32())))
            .unwrap_err();
        assert!(matches!(err, MarshalError::NotImplemented { .. }));
    }

    #[test]
    fn test_call_scoped_callback_untracked() {
        let info = Arc::new(crate::core::types::CallbackInfo::new(
            "Regress",
            "TestCallback",
            vec![],
            TypeDescriptor::int32(),
        ));
        let plan = planned(ArgumentSpec::input("cb", TypeDescriptor::callback(info.clone())));
        assert!(matches!(plan.steps.cleanup[..], [Step::Untrack { .. }]));

        let plan = planned(ArgumentSpec::input(
            "cb",
            TypeDescriptor::callback(info).with_ownership(Ownership::Everything),
        ));
        assert!(plan.steps.cleanup.is_empty());
    }
}
