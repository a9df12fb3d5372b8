//! Trailing error out-parameter of fallible functions

use super::argument::PlanSteps;
use super::step::Step;
use super::vars::{Var, VariableAllocator};

#[derive(Debug, Clone, Default)]
pub struct ErrorPlan {
    pub(crate) slot: Option<Var>,
    pub(crate) steps: PlanSteps,
}

impl ErrorPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prepare(&mut self, vars: &mut VariableAllocator) {
        self.slot = Some(vars.request());
    }

    /// The check goes first among post steps; the slot is always freed
    pub fn process(&mut self) {
        if let Some(slot) = self.slot {
            self.steps.pre.push(Step::AllocOut { dest: slot });
            self.steps.post.push(Step::CheckError { slot });
            self.steps.cleanup.push(Step::FreeSlot { slot });
        }
    }

    pub fn steps(&self) -> &PlanSteps {
        &self.steps
    }
}
