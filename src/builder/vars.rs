//! Temporary slots threading values between steps

use std::fmt;

/// Index of one frame slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Var(pub(crate) u32);

impl Var {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "_v{}", self.0)
    }
}

/// Hands out uniquely named slots for one callable
#[derive(Debug, Default)]
pub struct VariableAllocator {
    next: u32,
}

impl VariableAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&mut self) -> Var {
        let var = Var(self.next);
        self.next += 1;
        var
    }

    /// Slots handed out so far; the frame size of the finished callable
    pub fn count(&self) -> usize {
        self.next as usize
    }
}
