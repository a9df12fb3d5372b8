//! Length linkage between arrays and the parameters carrying their counts
//!
//! An array whose descriptor names a length parameter gets that parameter's
//! count slot; the length parameter is subsumed when its value is derived
//! from the array (inbound) or consumed to size it (outbound). A length the
//! caller chooses for an outbound array stays visible.

use super::argument::{ArgumentPlan, PlanRef};
use super::return_value::ReturnPlan;
use crate::core::types::{Direction, TypeDescriptor};
use crate::errors::{MarshalError, Result};

/// One array ↔ length relationship
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link {
    pub array: PlanRef,
    pub holder: usize,
    pub subsumed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct LengthLinkage {
    links: Vec<Link>,
}

impl LengthLinkage {
    /// Wire every length link among `params` and the return value
    ///
    /// Plans must already be prepared so their slots can be shared.
    pub fn link(params: &mut [ArgumentPlan], ret: &mut ReturnPlan) -> Result<Self> {
        let mut links = Vec::new();

        for index in 0..params.len() {
            let Some(holder) = params[index].ty().length_index() else {
                continue;
            };
            let origin = params[index].origin;
            let name = params[index].name().to_string();
            let direction = params[index].direction();
            check_holder(&name, params[index].ty(), direction, Some(index), holder, params)?;

            let subsumed = if direction.is_inbound() {
                if !params[holder].direction().is_inbound() {
                    return Err(MarshalError::unsupported_because(
                        &name,
                        params[index].ty(),
                        direction,
                        format!("length parameter '{}' is not inbound", params[holder].name()),
                    ));
                }
                let source = params[index].vars.input;
                if params[holder].length_source.is_none() {
                    params[holder].length_source = source;
                }
                true
            } else {
                params[holder].direction() == Direction::Out
            };

            if direction.is_outbound() {
                params[index].length_var = params[holder].count_var();
            }
            mark_holder(&mut params[holder], origin, subsumed);
            links.push(Link {
                array: origin,
                holder,
                subsumed,
            });
        }

        if let Some(holder) = ret.ty().length_index() {
            check_holder("return", ret.ty(), Direction::Out, None, holder, params)?;
            let subsumed = params[holder].direction() == Direction::Out;
            ret.length_var = params[holder].count_var();
            mark_holder(&mut params[holder], PlanRef::Return, subsumed);
            links.push(Link {
                array: PlanRef::Return,
                holder,
                subsumed,
            });
        }

        for link in &links {
            tracing::trace!(array = ?link.array, holder = link.holder, subsumed = link.subsumed, "length link");
        }
        Ok(Self { links })
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    /// Length parameter feeding `array`
    pub fn holder_of(&self, array: PlanRef) -> Option<usize> {
        self.links.iter().find(|l| l.array == array).map(|l| l.holder)
    }

    /// Subsumed inbound length parameters whose steps go right before `array`
    pub fn deferred_for<'p>(
        &'p self,
        array: usize,
        params: &'p [ArgumentPlan],
    ) -> impl Iterator<Item = usize> + 'p {
        self.links
            .iter()
            .filter(move |l| l.array == PlanRef::Param(array))
            .map(|l| l.holder)
            .filter(move |&h| params[h].is_deferred() && params[h].length_for == Some(PlanRef::Param(array)))
    }
}

fn mark_holder(holder: &mut ArgumentPlan, array: PlanRef, subsumed: bool) {
    holder.subsumed |= subsumed;
    if holder.length_for.is_none() {
        holder.length_for = Some(array);
    }
}

fn check_holder(
    name: &str,
    ty: &TypeDescriptor,
    direction: Direction,
    own_index: Option<usize>,
    holder: usize,
    params: &[ArgumentPlan],
) -> Result<()> {
    let reject = |detail: String| Err(MarshalError::unsupported_because(name, ty, direction, detail));

    if holder >= params.len() || Some(holder) == own_index {
        return reject(format!("length index {} does not name another parameter", holder));
    }
    if !params[holder].ty().tag().is_integer() {
        return reject(format!("length parameter '{}' is not an integer", params[holder].name()));
    }
    Ok(())
}
