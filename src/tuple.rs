//! Ordered, optionally labeled parameter sequences
//!
//! A tuple is three things depending on position and labels: an argument
//! list at a call site, an array literal, or (all-labeled) a dictionary
//! literal. Grouping tuples (parentheses in source) are transparent and
//! collapse through the parameter factory; literal collections never do.

use std::fmt;
use std::sync::Arc;

use crate::data::{Data, DataKind};
use crate::error::ErrorKind;
use crate::parameter::Parameter;
use crate::stack::VarStack;
use crate::symbol::Symbol;
use crate::variable::SymbolSet;

#[derive(Debug, Clone, PartialEq)]
pub struct Tuple {
    values: Vec<Parameter>,
    /// Parallel to `values`; empty when no member is labeled
    labels: Vec<Option<Arc<str>>>,
    /// True for explicit `[...]` array/dictionary literals
    collection: bool,
}

impl Tuple {
    /// An argument or grouping tuple (transparent, collapsible)
    pub fn new(values: impl IntoIterator<Item = Parameter>) -> Self {
        Self {
            values: values.into_iter().collect(),
            labels: Vec::new(),
            collection: false,
        }
    }

    /// An argument tuple with per-position labels
    pub fn labeled(
        values: impl IntoIterator<Item = Parameter>,
        labels: impl IntoIterator<Item = Option<Arc<str>>>,
    ) -> Self {
        let values: Vec<Parameter> = values.into_iter().collect();
        let mut labels: Vec<Option<Arc<str>>> = labels.into_iter().collect();
        labels.resize(values.len(), None);
        Self {
            values,
            labels,
            collection: false,
        }
    }

    /// An explicit array literal; never collapses
    pub fn array_literal(values: impl IntoIterator<Item = Parameter>) -> Self {
        Self {
            values: values.into_iter().collect(),
            labels: Vec::new(),
            collection: true,
        }
    }

    /// An explicit dictionary literal; every member is labeled
    pub fn dictionary_literal(
        entries: impl IntoIterator<Item = (Arc<str>, Parameter)>,
    ) -> Self {
        let (labels, values): (Vec<Option<Arc<str>>>, Vec<Parameter>) = entries
            .into_iter()
            .map(|(label, value)| (Some(label), value))
            .unzip();
        Self {
            values,
            labels,
            collection: true,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[Parameter] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Parameter> {
        self.values
    }

    pub fn label_at(&self, index: usize) -> Option<&Arc<str>> {
        self.labels.get(index).and_then(Option::as_ref)
    }

    /// True for explicit collection literals
    pub fn is_collection_literal(&self) -> bool {
        self.collection
    }

    pub fn all_labeled(&self) -> bool {
        !self.values.is_empty()
            && self.labels.len() == self.values.len()
            && self.labels.iter().all(Option::is_some)
    }

    /// All-labeled equal-length form: a dictionary literal
    pub fn is_dictionary(&self) -> bool {
        self.all_labeled()
    }

    /// Evaluable iff every member may produce a value
    pub fn is_evaluable(&self) -> bool {
        self.values.iter().all(Parameter::is_valued)
    }

    /// The unified member type when uniform and knowable, else none
    pub fn base_type(&self) -> Option<DataKind> {
        let mut unified: Option<DataKind> = None;
        for value in &self.values {
            match (unified, value.base_type()) {
                (_, None) => return None,
                (None, Some(kind)) => unified = Some(kind),
                (Some(seen), Some(kind)) if seen == kind => {}
                _ => return None,
            }
        }
        unified
    }
}

impl Symbol for Tuple {
    fn resolved(&self) -> bool {
        self.values.iter().all(Parameter::resolved)
    }

    fn invariant(&self) -> bool {
        self.values.iter().all(Parameter::invariant)
    }

    fn symbols(&self) -> SymbolSet {
        let mut set = SymbolSet::new();
        for value in &self.values {
            set.extend(value.symbols());
        }
        set
    }

    fn resolve(self, stack: &mut VarStack<'_>) -> Self {
        Self {
            values: self
                .values
                .into_iter()
                .map(|value| value.resolve(stack))
                .collect(),
            labels: self.labels,
            collection: self.collection,
        }
    }

    /// Evaluable tuples only: produce an array or dictionary value.
    ///
    /// Under strict policy the first errored member propagates; otherwise
    /// errored members decay to nil in place.
    fn evaluate(&self, stack: &mut VarStack<'_>) -> Data {
        if !self.is_evaluable() {
            return Data::error(
                ErrorKind::Internal,
                "non-evaluable tuple reached evaluation",
            );
        }

        let strict = stack.missing_variable_throws();
        let mut evaluated = Vec::with_capacity(self.values.len());
        for value in &self.values {
            let result = value.evaluate(stack);
            if result.errored() {
                if strict {
                    return result;
                }
                evaluated.push(Data::Void);
            } else {
                evaluated.push(result);
            }
        }

        if self.is_dictionary() {
            Data::Dictionary(
                self.labels
                    .iter()
                    .flatten()
                    .map(|label| label.to_string())
                    .zip(evaluated)
                    .collect(),
            )
        } else {
            Data::Array(evaluated)
        }
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (open, close) = if self.collection { ("[", "]") } else { ("(", ")") };
        f.write_str(open)?;
        for (i, value) in self.values.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            if let Some(label) = self.label_at(i) {
                write!(f, "{}: ", label)?;
            }
            write!(f, "{}", value)?;
        }
        f.write_str(close)
    }
}
