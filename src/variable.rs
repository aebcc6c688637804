//! Variable keys - structured identifiers into scoped contexts
//!
//! A `Variable` locates a value: an optional scope atom, a base identifier,
//! and an ordered chain of member/subscript segments. Two reserved forms
//! exist: `self` (the implicit current iteration target) and `define(name)`
//! (a reference resolved against scoped block definitions).
//!
//! Atoms are interned, so cloning a variable never re-allocates its names.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::atom::atom;

/// The implicit iteration target
const SELF_ATOM: &str = "self";
/// Reserved scope holding block definitions; never host-registrable
const DEFINE_SCOPE: &str = "#define";

/// Set of variable keys a node depends on
pub type SymbolSet = BTreeSet<Variable>;

/// One step of a variable's access path
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Segment {
    /// Dot-member access on a dictionary
    Member(Arc<str>),
    /// Constant subscript into an array
    Index(usize),
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Member(name) => write!(f, ".{}", name),
            Segment::Index(i) => write!(f, "[{}]", i),
        }
    }
}

/// A path-structured key locating a value within scoped contexts
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Variable {
    scope: Option<Arc<str>>,
    member: Arc<str>,
    path: Vec<Segment>,
}

impl Variable {
    /// An unscoped variable resolved against frames, then the default scope
    pub fn named(name: impl AsRef<str>) -> Self {
        Self {
            scope: None,
            member: atom(name.as_ref()),
            path: Vec::new(),
        }
    }

    /// A variable pinned to an explicit scope
    pub fn in_scope(scope: impl AsRef<str>, name: impl AsRef<str>) -> Self {
        Self {
            scope: Some(atom(scope.as_ref())),
            member: atom(name.as_ref()),
            path: Vec::new(),
        }
    }

    /// The whole scope database itself (always a dictionary)
    pub fn scope_root(scope: impl AsRef<str>) -> Self {
        Self {
            scope: Some(atom(scope.as_ref())),
            member: atom(""),
            path: Vec::new(),
        }
    }

    /// The implicit current iteration target
    pub fn own() -> Self {
        Self {
            scope: None,
            member: atom(SELF_ATOM),
            path: Vec::new(),
        }
    }

    /// A reference into scoped block definitions
    pub fn define(name: impl AsRef<str>) -> Self {
        Self {
            scope: Some(atom(DEFINE_SCOPE)),
            member: atom(name.as_ref()),
            path: Vec::new(),
        }
    }

    /// Extend with a dot-member segment
    pub fn member(mut self, name: impl AsRef<str>) -> Self {
        self.path.push(Segment::Member(atom(name.as_ref())));
        self
    }

    /// Extend with a constant subscript segment
    pub fn index(mut self, i: usize) -> Self {
        self.path.push(Segment::Index(i));
        self
    }

    pub fn scope(&self) -> Option<&Arc<str>> {
        self.scope.as_ref()
    }

    pub fn base(&self) -> &Arc<str> {
        &self.member
    }

    pub fn segments(&self) -> &[Segment] {
        &self.path
    }

    pub fn is_self_referent(&self) -> bool {
        self.scope.is_none() && &*self.member == SELF_ATOM && self.path.is_empty()
    }

    pub fn is_define(&self) -> bool {
        self.scope.as_deref() == Some(DEFINE_SCOPE)
    }

    pub fn is_scoped(&self) -> bool {
        self.scope.is_some() && !self.is_define()
    }

    pub fn is_pathed(&self) -> bool {
        !self.path.is_empty()
    }

    /// True iff the static shape forces a collection: only a scope root
    /// qualifies, since a scope database is always a dictionary.
    pub fn is_collection(&self) -> bool {
        self.scope.is_some() && self.member.is_empty() && self.path.is_empty()
    }

    /// The variable one access-step shorter, if pathed
    pub fn ancestor(&self) -> Option<Variable> {
        if self.path.is_empty() {
            return None;
        }
        let mut shorter = self.clone();
        shorter.path.pop();
        Some(shorter)
    }

    /// The prefix variables this key transitively depends on, self included.
    ///
    /// `user.name.first` cannot bind unless `user` and `user.name` do.
    pub fn symbols(&self) -> SymbolSet {
        let mut set = SymbolSet::new();
        let mut current = Some(self.clone());
        while let Some(variable) = current {
            current = variable.ancestor();
            set.insert(variable);
        }
        set
    }

    /// Rendering without the scope qualifier
    pub fn short(&self) -> String {
        if self.is_define() {
            return format!("define({})", self.member);
        }
        let mut out = self.member.to_string();
        for segment in &self.path {
            out.push_str(&segment.to_string());
        }
        out
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_define() {
            return write!(f, "define({})", self.member);
        }
        if let Some(scope) = &self.scope {
            write!(f, "${}", scope)?;
            if !self.member.is_empty() {
                f.write_str(":")?;
            }
        }
        f.write_str(&self.member)?;
        for segment in &self.path {
            write!(f, "{}", segment)?;
        }
        Ok(())
    }
}
