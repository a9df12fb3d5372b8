//! Function signatures as supplied by the introspection repository

use super::types::{Direction, TypeDescriptor};
use std::fmt;

/// One declared native parameter
#[derive(Debug, Clone, PartialEq)]
pub struct ArgumentSpec {
    pub name: String,
    pub direction: Direction,
    pub ty: TypeDescriptor,
}

impl ArgumentSpec {
    pub fn new(name: impl Into<String>, direction: Direction, ty: TypeDescriptor) -> Self {
        Self {
            name: name.into(),
            direction,
            ty,
        }
    }

    pub fn input(name: impl Into<String>, ty: TypeDescriptor) -> Self {
        Self::new(name, Direction::In, ty)
    }

    pub fn output(name: impl Into<String>, ty: TypeDescriptor) -> Self {
        Self::new(name, Direction::Out, ty)
    }

    pub fn inout(name: impl Into<String>, ty: TypeDescriptor) -> Self {
        Self::new(name, Direction::InOut, ty)
    }
}

/// Resolved signature of one native function
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionInfo {
    pub namespace: String,
    pub name: String,
    /// Native link symbol
    pub symbol: String,
    pub args: Vec<ArgumentSpec>,
    pub return_type: TypeDescriptor,
    /// Trailing error out-parameter
    pub throws: bool,
    pub constructor: bool,
    /// Instance type for methods; converted as the first native argument
    pub receiver: Option<TypeDescriptor>,
}

impl FunctionInfo {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            symbol: symbol.into(),
            args: Vec::new(),
            return_type: TypeDescriptor::void(),
            throws: false,
            constructor: false,
            receiver: None,
        }
    }

    pub fn with_arg(mut self, arg: ArgumentSpec) -> Self {
        self.args.push(arg);
        self
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = ArgumentSpec>) -> Self {
        self.args.extend(args);
        self
    }

    pub fn with_return(mut self, ty: TypeDescriptor) -> Self {
        self.return_type = ty;
        self
    }

    pub fn throws(mut self) -> Self {
        self.throws = true;
        self
    }

    pub fn constructor(mut self) -> Self {
        self.constructor = true;
        self
    }

    pub fn method_of(mut self, receiver: TypeDescriptor) -> Self {
        self.receiver = Some(receiver);
        self
    }

    #[inline]
    pub fn is_method(&self) -> bool {
        self.receiver.is_some()
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.namespace, self.name)
    }
}

impl fmt::Display for FunctionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.symbol)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{} {}: {}", arg.direction, arg.name, arg.ty)?;
        }
        write!(f, ") -> {}", self.return_type)?;
        if self.throws {
            f.write_str(" throws")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_signature() {
        let info = FunctionInfo::new("Regress", "test_array_int_in", "regress_test_array_int_in")
            .with_arg(ArgumentSpec::input(
                "ints",
                TypeDescriptor::array_of(TypeDescriptor::int32()).with_length_index(1),
            ))
            .with_arg(ArgumentSpec::input("n_ints", TypeDescriptor::int32()))
            .with_return(TypeDescriptor::int32());

        assert_eq!(
            info.to_string(),
            "regress_test_array_int_in(in ints: array<gint32>, in n_ints: gint32) -> gint32"
        );
        assert_eq!(info.qualified_name(), "Regress.test_array_int_in");
        assert!(!info.is_method());
    }
}
