//! Binding generation - from a function signature to a step program
//!
//! Architecture:
//! - `vars.rs` - frame slot allocation
//! - `step.rs` - steps, frames and the native invocation
//! - `argument.rs` - per-parameter plans
//! - `linkage.rs` - array ↔ length parameter wiring
//! - `return_value.rs` - return plan and constructor ref-sink
//! - `error_arg.rs` - trailing error slot of fallible calls
//! - `function.rs` - orchestration into a `GeneratedCallable`
//! - `callable.rs` - the finished program and its execution

mod vars;
mod step;
mod argument;
mod linkage;
mod return_value;
mod error_arg;
mod function;
mod callable;

pub use vars::{Var, VariableAllocator};
pub use step::{Env, Frame, Invocation, Step};
pub use argument::{ArgumentPlan, PlanRef, PlanSteps};
pub use linkage::{LengthLinkage, Link};
pub use return_value::ReturnPlan;
pub use error_arg::ErrorPlan;
pub use function::SignatureBuilder;
pub use callable::GeneratedCallable;
