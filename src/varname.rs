use std::fmt;

use itertools::Itertools;

/// One step of a sub-path into a named entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Accessor {
    /// Zero based multi-index, `x[i]` or `x[i, j]`.
    Index(Vec<usize>),
    /// Field access, `x.a`.
    Field(String),
}

impl fmt::Display for Accessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Accessor::Index(idx) => write!(f, "[{}]", idx.iter().join(", ")),
            Accessor::Field(name) => write!(f, ".{name}"),
        }
    }
}

/// Identifier of a model variable: a root symbol plus an optional path
/// into the value bound to that symbol.
///
/// The derived order compares the symbol first, so sorting groups
/// names by their root symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarName {
    symbol: String,
    path: Vec<Accessor>,
}

impl VarName {
    pub fn new(symbol: impl Into<String>) -> VarName {
        VarName {
            symbol: symbol.into(),
            path: Vec::new(),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn path(&self) -> &[Accessor] {
        &self.path
    }

    /// Append an index accessor.
    pub fn index(mut self, idx: impl IntoIterator<Item = usize>) -> VarName {
        self.path.push(Accessor::Index(idx.into_iter().collect()));
        self
    }

    /// Append a field accessor.
    pub fn field(mut self, name: impl Into<String>) -> VarName {
        self.path.push(Accessor::Field(name.into()));
        self
    }

    /// True if `other` is this name or a sub-path of it.
    pub fn subsumes(&self, other: &VarName) -> bool {
        self.remainder(other).is_some()
    }

    /// The part of `other`'s path below this name, if this name subsumes it.
    pub fn remainder<'a>(&self, other: &'a VarName) -> Option<&'a [Accessor]> {
        if self.symbol != other.symbol || !other.path.starts_with(&self.path) {
            return None;
        }
        Some(&other.path[self.path.len()..])
    }

    /// Move the name into the namespace `prefix`.
    pub fn prefixed(&self, prefix: &str) -> VarName {
        VarName {
            symbol: format!("{prefix}.{}", self.symbol),
            path: self.path.clone(),
        }
    }
}

impl fmt::Display for VarName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.symbol)?;
        self.path.iter().try_for_each(|step| write!(f, "{step}"))
    }
}

impl From<&str> for VarName {
    fn from(symbol: &str) -> Self {
        VarName::new(symbol)
    }
}

impl From<String> for VarName {
    fn from(symbol: String) -> Self {
        VarName::new(symbol)
    }
}

impl From<&VarName> for VarName {
    fn from(name: &VarName) -> Self {
        name.clone()
    }
}

/// Which variables of a trace are free parameters.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum VarSelection {
    #[default]
    All,
    /// Every variable subsumed by one of the names.
    Names(Vec<VarName>),
}

impl VarSelection {
    pub fn names<I, N>(names: I) -> VarSelection
    where
        I: IntoIterator<Item = N>,
        N: Into<VarName>,
    {
        VarSelection::Names(names.into_iter().map(Into::into).collect())
    }

    pub fn selects(&self, name: &VarName) -> bool {
        match self {
            VarSelection::All => true,
            VarSelection::Names(names) => names.iter().any(|sel| sel.subsumes(name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn display() {
        let name = VarName::new("x").index([1, 2]).field("a");
        assert_eq!(name.to_string(), "x[1, 2].a");
        assert_eq!(VarName::new("y").prefixed("sub").to_string(), "sub.y");
    }

    #[test]
    fn subsumes() {
        let x = VarName::new("x");
        let x1 = VarName::new("x").index([1]);
        let x1a = VarName::new("x").index([1]).field("a");
        assert!(x.subsumes(&x));
        assert!(x.subsumes(&x1));
        assert!(x1.subsumes(&x1a));
        assert!(!x1.subsumes(&x));
        assert!(!x.subsumes(&VarName::new("xy")));
        assert!(!x1.subsumes(&VarName::new("x").index([2])));
        assert_eq!(x.remainder(&x1a).map(|rest| rest.len()), Some(2));
    }

    #[test]
    fn ordering_groups_symbols() {
        let mut names = vec![
            VarName::new("b"),
            VarName::new("a").index([1]),
            VarName::new("b").index([0]),
            VarName::new("a"),
        ];
        names.sort();
        let symbols: Vec<_> = names.iter().map(|n| n.symbol()).collect();
        assert_eq!(symbols, vec!["a", "a", "b", "b"]);
        assert_eq!(names[0], VarName::new("a"));
    }

    #[test]
    fn selection() {
        let sel = VarSelection::names(["mu"]);
        assert!(sel.selects(&VarName::new("mu").index([3])));
        assert!(!sel.selects(&VarName::new("sigma")));
        assert!(VarSelection::All.selects(&VarName::new("sigma")));
    }
}
