//! The unit stored inside the AST
//!
//! A `Parameter` is a discriminated container over everything an expression
//! slot can hold: a literal value, a keyword, an operator, a variable key, a
//! nested expression, a tuple, or a function call. Construction goes through
//! factories that enforce the container invariants; the structural flags
//! (`resolved`, `invariant`, `symbols`, `literal`) are cached at construction
//! and rematerialized whenever the container is rebuilt.
//!
//! Reduction is two-phase: `resolve` folds what the stack already knows
//! (variable lookups, overload binding, invariant subtrees), `evaluate` is
//! the terminal reduction to a concrete `Data` under the stack's soft-error
//! policy.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::data::{Data, DataError, DataKind};
use crate::entities::{CallValues, Function, Method};
use crate::error::{ErrorKind, SourceLocation};
use crate::expression::{Expression, ExpressionForm, Operator};
use crate::stack::{Definition, VarStack};
use crate::symbol::Symbol;
use crate::tuple::Tuple;
use crate::variable::{SymbolSet, Variable};

/// Unvalued control tokens the parser may hand over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keyword {
    True,
    False,
    Yes,
    No,
    Nil,
    SelfRef,
    In,
}

impl Keyword {
    /// May decay to a value or variable and be evaluated
    pub fn is_evaluable(self) -> bool {
        !matches!(self, Keyword::In)
    }

    pub fn is_boolean(self) -> bool {
        matches!(self, Keyword::True | Keyword::False | Keyword::Yes | Keyword::No)
    }

    pub fn bool_value(self) -> Option<bool> {
        match self {
            Keyword::True | Keyword::Yes => Some(true),
            Keyword::False | Keyword::No => Some(false),
            _ => None,
        }
    }

    pub fn token(self) -> &'static str {
        match self {
            Keyword::True => "true",
            Keyword::False => "false",
            Keyword::Yes => "yes",
            Keyword::No => "no",
            Keyword::Nil => "nil",
            Keyword::SelfRef => "self",
            Keyword::In => "in",
        }
    }
}

/// How a call site relates to a receiver
#[derive(Debug, Clone, PartialEq)]
pub enum MethodStyle {
    /// Plain function call
    Function,
    /// Method call; the receiver is the first argument
    NonMutating,
    /// Mutating method call on the given variable (also the first argument)
    Mutating(Variable),
}

/// The call target, as far as resolution has narrowed it
#[derive(Clone)]
pub enum Callee {
    /// Several candidates pending; disambiguated at evaluation
    Unbound,
    Bound(Arc<dyn Function>),
    BoundMethod(Arc<dyn Method>),
    /// Reference to a named block definition, with an optional fallback
    Evaluate { default: Option<Box<Parameter>> },
}

impl Callee {
    fn bound(&self) -> bool {
        !matches!(self, Callee::Unbound)
    }

    fn invariant(&self) -> bool {
        match self {
            Callee::Bound(function) => function.invariant(),
            Callee::BoundMethod(method) => method.invariant(),
            // Block definitions are render state; never fold them early
            Callee::Evaluate { .. } => false,
            Callee::Unbound => false,
        }
    }
}

impl fmt::Debug for Callee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callee::Unbound => f.write_str("Unbound"),
            Callee::Bound(_) => f.write_str("Bound(..)"),
            Callee::BoundMethod(_) => f.write_str("BoundMethod(..)"),
            Callee::Evaluate { default } => {
                write!(f, "Evaluate {{ default: {} }}", default.is_some())
            }
        }
    }
}

impl PartialEq for Callee {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Callee::Unbound, Callee::Unbound) => true,
            (Callee::Bound(a), Callee::Bound(b)) => Arc::ptr_eq(a, b),
            (Callee::BoundMethod(a), Callee::BoundMethod(b)) => Arc::ptr_eq(a, b),
            (Callee::Evaluate { default: a }, Callee::Evaluate { default: b }) => a == b,
            _ => false,
        }
    }
}

/// A call site
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    pub name: Arc<str>,
    pub callee: Callee,
    pub args: Tuple,
    pub style: MethodStyle,
    pub location: SourceLocation,
}

impl FunctionCall {
    fn resolved(&self) -> bool {
        let args_resolved = self.args.resolved();
        match &self.callee {
            Callee::Evaluate { default } => {
                args_resolved && default.as_deref().map_or(true, Parameter::resolved)
            }
            callee => callee.bound() && args_resolved,
        }
    }

    fn invariant(&self) -> bool {
        // A mutating call writes render state regardless of its callee
        if matches!(self.style, MethodStyle::Mutating(_)) {
            return false;
        }
        self.callee.invariant() && self.args.invariant()
    }

    fn symbols(&self) -> SymbolSet {
        let mut set = self.args.symbols();
        match &self.callee {
            Callee::Evaluate { default } => {
                set.insert(Variable::define(&*self.name));
                if let Some(default) = default {
                    set.extend(default.symbols());
                }
            }
            _ => {
                if let MethodStyle::Mutating(variable) = &self.style {
                    set.insert(variable.clone());
                }
            }
        }
        set
    }
}

impl fmt::Display for FunctionCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.name, self.args)
    }
}

/// The container variants of §3
#[derive(Debug, Clone, PartialEq)]
pub enum Container {
    Value(Data),
    Keyword(Keyword),
    Operator(Operator),
    Variable(Variable),
    Expression(Box<Expression>),
    Tuple(Box<Tuple>),
    Function(Box<FunctionCall>),
}

#[derive(Debug, Clone)]
pub struct Parameter {
    container: Container,
    // structural field cache, rematerialized on container reassignment
    resolved: bool,
    invariant: bool,
    symbols: SymbolSet,
    literal: bool,
}

impl PartialEq for Parameter {
    fn eq(&self, other: &Self) -> bool {
        self.container == other.container
    }
}

impl Parameter {
    /// Rebuild the structural cache from a container
    fn materialize(container: Container) -> Self {
        let (resolved, invariant, symbols, literal) = match &container {
            Container::Value(data) => {
                let invariant = if data.is_lazy() { data.invariant() } else { true };
                let literal = invariant && !data.errored();
                (true, invariant, SymbolSet::new(), literal)
            }
            Container::Keyword(keyword) => {
                let symbols = if *keyword == Keyword::SelfRef {
                    [Variable::own()].into_iter().collect()
                } else {
                    SymbolSet::new()
                };
                (true, true, symbols, false)
            }
            Container::Operator(_) => (true, true, SymbolSet::new(), false),
            Container::Variable(variable) => {
                (false, true, [variable.clone()].into_iter().collect(), false)
            }
            Container::Expression(expression) => (
                expression.resolved(),
                expression.invariant(),
                expression.symbols(),
                false,
            ),
            Container::Tuple(tuple) => {
                (tuple.resolved(), tuple.invariant(), tuple.symbols(), false)
            }
            Container::Function(call) => (call.resolved(), call.invariant(), call.symbols(), false),
        };
        Self {
            container,
            resolved,
            invariant,
            symbols,
            literal,
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Construction factories
    // ─────────────────────────────────────────────────────────────

    pub fn value(data: Data) -> Self {
        Self::materialize(Container::Value(data))
    }

    pub fn variable(variable: Variable) -> Self {
        Self::materialize(Container::Variable(variable))
    }

    /// A keyword held structurally, without decay
    pub fn keyword(keyword: Keyword) -> Self {
        Self::materialize(Container::Keyword(keyword))
    }

    /// Eager decay: booleans collapse to value literals, `nil` to the void
    /// literal, `self` to the self variable. Everything else stays a keyword.
    pub fn keyword_reduced(keyword: Keyword) -> Self {
        match keyword {
            kw if kw.is_boolean() => Self::value(Data::Bool(kw.bool_value().unwrap_or(false))),
            Keyword::Nil => Self::value(Data::Void),
            Keyword::SelfRef => Self::variable(Variable::own()),
            other => Self::keyword(other),
        }
    }

    /// A parser-visible operator. `None` for operators the parser can never
    /// emit as a token.
    pub fn operator(op: Operator) -> Option<Self> {
        if !op.parseable() {
            return None;
        }
        Some(Self::materialize(Container::Operator(op)))
    }

    /// Unchecked operator container, for expression assembly
    pub(crate) fn raw_operator(op: Operator) -> Self {
        Self::materialize(Container::Operator(op))
    }

    /// The invalid sentinel: the open-subscript operator can never appear in
    /// a finished AST.
    pub fn invalid() -> Self {
        Self::raw_operator(Operator::SubOpen)
    }

    pub fn expression(expression: Expression) -> Self {
        Self::materialize(Container::Expression(Box::new(expression)))
    }

    /// Tuple factory with the single-member collapse.
    ///
    /// Grouping tuples are transparent: a chain of single-unlabeled-member
    /// tuples reduces to the innermost member, and an empty grouping tuple
    /// collapses to the void literal. Explicit collection literals are kept
    /// as-is.
    pub fn tuple(tuple: Tuple) -> Self {
        let mut current = tuple;
        loop {
            if current.is_collection_literal() {
                return Self::materialize(Container::Tuple(Box::new(current)));
            }
            if current.is_empty() {
                return Self::value(Data::Void);
            }
            if current.len() == 1 && current.label_at(0).is_none() {
                let Some(member) = current.into_values().pop() else {
                    return Self::value(Data::Void);
                };
                match member.container {
                    Container::Tuple(inner) => current = *inner,
                    _ => return member,
                }
            } else {
                return Self::materialize(Container::Tuple(Box::new(current)));
            }
        }
    }

    /// An unbound function call
    pub fn call(name: impl AsRef<str>, args: Tuple, location: SourceLocation) -> Self {
        Self::materialize(Container::Function(Box::new(FunctionCall {
            name: crate::atom::atom(name.as_ref()),
            callee: Callee::Unbound,
            args,
            style: MethodStyle::Function,
            location,
        })))
    }

    /// An unbound method call. The receiver is the first argument; a
    /// mutating call also names the variable receiving the update.
    pub fn method_call(
        name: impl AsRef<str>,
        args: Tuple,
        mutates: Option<Variable>,
        location: SourceLocation,
    ) -> Self {
        let style = match mutates {
            Some(variable) => MethodStyle::Mutating(variable),
            None => MethodStyle::NonMutating,
        };
        Self::materialize(Container::Function(Box::new(FunctionCall {
            name: crate::atom::atom(name.as_ref()),
            callee: Callee::Unbound,
            args,
            style,
            location,
        })))
    }

    /// A reference to a named block definition, with an optional default
    pub fn evaluate_call(
        identifier: impl AsRef<str>,
        default: Option<Parameter>,
        location: SourceLocation,
    ) -> Self {
        Self::materialize(Container::Function(Box::new(FunctionCall {
            name: crate::atom::atom(identifier.as_ref()),
            callee: Callee::Evaluate {
                default: default.map(Box::new),
            },
            args: Tuple::new([]),
            style: MethodStyle::Function,
            location,
        })))
    }

    // ─────────────────────────────────────────────────────────────
    // Observers
    // ─────────────────────────────────────────────────────────────

    pub fn container(&self) -> &Container {
        &self.container
    }

    /// Literal: a value container that is invariant and not errored
    pub fn is_literal(&self) -> bool {
        self.literal
    }

    pub fn as_value(&self) -> Option<&Data> {
        match &self.container {
            Container::Value(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_operator(&self) -> Option<Operator> {
        match &self.container {
            Container::Operator(op) => Some(*op),
            _ => None,
        }
    }

    pub fn errored(&self) -> bool {
        matches!(&self.container, Container::Value(data) if data.errored())
    }

    /// May this parameter produce a value at evaluation time?
    pub fn is_valued(&self) -> bool {
        match &self.container {
            Container::Value(_) | Container::Variable(_) | Container::Function(_) => true,
            Container::Operator(_) => false,
            Container::Keyword(keyword) => keyword.is_evaluable(),
            Container::Tuple(tuple) => tuple.is_evaluable(),
            Container::Expression(expression) => expression.form() != ExpressionForm::Custom,
        }
    }

    /// Statically-known stored type, when provable from structure
    pub fn base_type(&self) -> Option<DataKind> {
        match &self.container {
            Container::Value(data) => Some(data.stored_type()),
            Container::Expression(expression) => expression.base_type(),
            Container::Tuple(tuple) if tuple.is_evaluable() => Some(if tuple.is_dictionary() {
                DataKind::Dictionary
            } else {
                DataKind::Array
            }),
            Container::Tuple(_) => None,
            Container::Function(call) => match &call.callee {
                Callee::Bound(function) => single_kind(function.return_types()),
                Callee::BoundMethod(method) => single_kind(method.return_types()),
                _ => None,
            },
            Container::Keyword(keyword) if keyword.is_boolean() => Some(DataKind::Bool),
            Container::Keyword(Keyword::Nil) => Some(DataKind::Void),
            Container::Keyword(_) => None,
            Container::Variable(_) | Container::Operator(_) => None,
        }
    }

    /// Tri-valued collection shape: `None` when a variable could resolve to
    /// either
    pub fn is_collection(&self) -> Option<bool> {
        match &self.container {
            Container::Value(data) => Some(data.is_collection()),
            Container::Expression(expression) => {
                expression.base_type().map(DataKind::is_collection)
            }
            Container::Tuple(tuple) => Some(tuple.is_evaluable()),
            Container::Function(call) => {
                let returns = match &call.callee {
                    Callee::Bound(function) => function.return_types(),
                    Callee::BoundMethod(method) => method.return_types(),
                    _ => return None,
                };
                if returns.is_empty() {
                    None
                } else if returns.iter().all(|kind| kind.is_collection()) {
                    Some(true)
                } else if returns.iter().all(|kind| !kind.is_collection()) {
                    Some(false)
                } else {
                    None
                }
            }
            Container::Variable(variable) => {
                if variable.is_collection() {
                    Some(true)
                } else {
                    None
                }
            }
            Container::Keyword(_) | Container::Operator(_) => Some(false),
        }
    }

    /// Cheap output-size upper bound used by the renderer for preallocation
    pub fn underestimated_size(&self) -> usize {
        match &self.container {
            Container::Value(_) | Container::Function(_) | Container::Variable(_) => 16,
            Container::Expression(_) => 16,
            Container::Operator(_) | Container::Tuple(_) => 0,
            Container::Keyword(keyword) if keyword.is_boolean() => keyword.token().len(),
            Container::Keyword(_) => 0,
        }
    }
}

fn single_kind(kinds: &[DataKind]) -> Option<DataKind> {
    match kinds {
        [kind] => Some(*kind),
        _ => None,
    }
}

impl Symbol for Parameter {
    fn resolved(&self) -> bool {
        self.resolved
    }

    fn invariant(&self) -> bool {
        self.invariant
    }

    fn symbols(&self) -> SymbolSet {
        self.symbols.clone()
    }

    /// Same-kind reduction, never weaker.
    ///
    /// Variables fold to values when the stack already binds them; function
    /// calls bind their overload; resolved invariant subtrees fold eagerly
    /// to literals.
    fn resolve(self, stack: &mut VarStack<'_>) -> Self {
        match self.container {
            Container::Value(_) | Container::Keyword(_) | Container::Operator(_) => self,
            Container::Variable(variable) => {
                let bound = stack.match_variable(&variable);
                if bound.errored() {
                    // May succeed later; keep the key
                    Self::variable(variable)
                } else {
                    debug!(variable = %variable, "resolved variable to literal");
                    Self::value(bound)
                }
            }
            Container::Expression(expression) => {
                let rebuilt = Self::materialize(Container::Expression(Box::new(
                    expression.resolve(stack),
                )));
                rebuilt.fold(stack)
            }
            Container::Tuple(tuple) => {
                if !tuple.is_evaluable() {
                    return Self::materialize(Container::Tuple(tuple));
                }
                let rebuilt =
                    Self::materialize(Container::Tuple(Box::new(tuple.resolve(stack))));
                rebuilt.fold(stack)
            }
            Container::Function(call) => Self::resolve_call(*call, stack),
        }
    }

    /// Terminal reduction under the stack's soft-error policy
    fn evaluate(&self, stack: &mut VarStack<'_>) -> Data {
        match &self.container {
            Container::Value(data) => data.evaluate(),
            Container::Variable(variable) => {
                let bound = stack.match_variable(variable);
                if bound.errored() && !stack.missing_variable_throws() {
                    Data::Void
                } else {
                    bound.evaluate()
                }
            }
            Container::Expression(expression) => expression.evaluate(stack),
            Container::Tuple(tuple) => tuple.evaluate(stack),
            Container::Keyword(keyword) if keyword.is_evaluable() => {
                Self::keyword_reduced(*keyword).evaluate(stack)
            }
            Container::Function(call) => Self::dispatch_call(call, stack),
            Container::Keyword(_) | Container::Operator(_) => Data::error(
                ErrorKind::Internal,
                "structural parameter reached evaluation",
            ),
        }
    }
}

impl Parameter {
    /// Eagerly fold a resolved invariant node to a literal
    fn fold(self, stack: &mut VarStack<'_>) -> Self {
        if self.resolved && self.invariant && !matches!(self.container, Container::Value(_)) {
            debug!(node = %self, "folding invariant node");
            let folded = self.evaluate(stack);
            Self::value(folded)
        } else {
            self
        }
    }

    fn resolve_call(call: FunctionCall, stack: &mut VarStack<'_>) -> Self {
        let FunctionCall {
            name,
            callee,
            args,
            style,
            location,
        } = call;
        let args = args.resolve(stack);

        let rebuilt = match callee {
            // A bound callee or an Evaluate reference keeps its binding
            Callee::Bound(_) | Callee::BoundMethod(_) => FunctionCall {
                name,
                callee,
                args,
                style,
                location,
            },
            Callee::Evaluate { default } => {
                let default = default.map(|d| Box::new(d.resolve(stack)));
                FunctionCall {
                    name,
                    callee: Callee::Evaluate { default },
                    args,
                    style,
                    location,
                }
            }
            Callee::Unbound => {
                let entities = stack.entities();
                match &style {
                    MethodStyle::Function => {
                        match entities.validate_function(&name, Some(&args)) {
                            Ok(mut matches) if matches.len() == 1 => {
                                let single = matches.remove(0);
                                FunctionCall {
                                    name,
                                    callee: Callee::Bound(single.callee),
                                    args: single.normalized,
                                    style,
                                    location,
                                }
                            }
                            Ok(_) => FunctionCall {
                                name,
                                callee: Callee::Unbound,
                                args,
                                style,
                                location,
                            },
                            Err(diagnostic) => {
                                return Self::value(Data::fault(
                                    DataError::new(
                                        ErrorKind::OverloadNone,
                                        diagnostic,
                                    )
                                    .in_function(name.to_string())
                                    .at(location),
                                ));
                            }
                        }
                    }
                    MethodStyle::NonMutating | MethodStyle::Mutating(_) => {
                        let mutating = matches!(style, MethodStyle::Mutating(_));
                        match entities.validate_method(&name, Some(&args), mutating) {
                            Ok(mut matches) if matches.len() == 1 => {
                                let single = matches.remove(0);
                                FunctionCall {
                                    name,
                                    callee: Callee::BoundMethod(single.callee),
                                    args: single.normalized,
                                    style,
                                    location,
                                }
                            }
                            Ok(_) => FunctionCall {
                                name,
                                callee: Callee::Unbound,
                                args,
                                style,
                                location,
                            },
                            Err(diagnostic) => {
                                return Self::value(Data::fault(
                                    DataError::new(
                                        ErrorKind::OverloadNone,
                                        diagnostic,
                                    )
                                    .in_function(name.to_string())
                                    .at(location),
                                ));
                            }
                        }
                    }
                }
            }
        };

        Self::materialize(Container::Function(Box::new(rebuilt))).fold(stack)
    }

    fn dispatch_call(call: &FunctionCall, stack: &mut VarStack<'_>) -> Data {
        if let Callee::Evaluate { default } = &call.callee {
            return Self::evaluate_definition(call, default.as_deref(), stack);
        }

        let strict = stack.missing_variable_throws();

        // 1. Reduce arguments to concrete values
        let mut values: Vec<Data> = Vec::with_capacity(call.args.len());
        for argument in call.args.values() {
            let value = if argument.is_literal() && !argument.errored() {
                argument
                    .as_value()
                    .map(Data::evaluate)
                    .unwrap_or(Data::Void)
            } else {
                argument.evaluate(stack)
            };
            if value.errored() {
                if strict {
                    return value;
                }
                values.push(Data::Void);
            } else {
                values.push(value);
            }
        }

        // 3. Late disambiguation for dynamic calls
        let callee = match &call.callee {
            Callee::Bound(function) => CalleeRef::Function(Arc::clone(function)),
            Callee::BoundMethod(method) => CalleeRef::Method(Arc::clone(method)),
            Callee::Unbound => {
                let concrete = Tuple::labeled(
                    values.iter().cloned().map(Parameter::value),
                    (0..values.len()).map(|i| call.args.label_at(i).cloned()),
                );
                match Self::disambiguate(call, &concrete, stack) {
                    Ok((callee, normalized)) => {
                        values = normalized
                            .values()
                            .iter()
                            .map(|parameter| {
                                parameter
                                    .as_value()
                                    .cloned()
                                    .unwrap_or(Data::Void)
                            })
                            .collect();
                        callee
                    }
                    Err(errored) => return errored,
                }
            }
            Callee::Evaluate { .. } => unreachable!("handled above"),
        };

        // 2. Void arguments against the now-known signature
        let signature = callee.signature();
        for (index, value) in values.iter().enumerate() {
            let optional = signature.get(index).map(|p| p.optional).unwrap_or(true);
            if value.is_void() && !optional {
                if strict {
                    return Data::fault(
                        DataError::new(
                            ErrorKind::VoidArgument,
                            format!("argument {} returned void", index),
                        )
                        .in_function(call.name.to_string())
                        .at(call.location.clone()),
                    );
                }
                // Soft policy: nil stands in for the missing value
            }
        }

        // 4. Type-check into the call-values record
        let Some(mut call_values) = CallValues::bind(signature, values) else {
            return Data::fault(
                DataError::new(
                    ErrorKind::TypeMismatch,
                    format!("couldn't validate parameter types for '{}'", call),
                )
                .at(call.location.clone()),
            );
        };

        // 5. Unsafe entities receive a snapshot of the host object map
        if callee.is_unsafe() {
            if let Some(objects) = stack.unsafe_objects() {
                call_values.grant_unsafe(objects);
            }
        }

        // 6./7. Invocation
        match (&callee, &call.style) {
            (CalleeRef::Method(method), MethodStyle::Mutating(variable)) => {
                let (updated, returned) = method.invoke_mutating(&call_values);
                if let Some(updated) = updated {
                    stack.update(variable, updated);
                }
                returned
            }
            (CalleeRef::Method(method), _) => method.invoke(&call_values),
            (CalleeRef::Function(function), _) => function.invoke(&call_values),
        }
    }

    fn disambiguate(
        call: &FunctionCall,
        concrete: &Tuple,
        stack: &mut VarStack<'_>,
    ) -> std::result::Result<(CalleeRef, Tuple), Data> {
        let entities = stack.entities();
        match &call.style {
            MethodStyle::Function => {
                match entities.validate_function(&call.name, Some(concrete)) {
                    Ok(mut matches) if matches.len() == 1 => {
                        let single = matches.remove(0);
                        Ok((CalleeRef::Function(single.callee), single.normalized))
                    }
                    Ok(_) => Err(Data::fault(
                        DataError::new(
                            ErrorKind::OverloadAmbiguous,
                            "dynamic call had too many matches at evaluation",
                        )
                        .in_function(call.name.to_string())
                        .at(call.location.clone()),
                    )),
                    Err(diagnostic) => Err(Data::fault(
                        DataError::new(ErrorKind::OverloadNone, diagnostic)
                            .in_function(call.name.to_string())
                            .at(call.location.clone()),
                    )),
                }
            }
            MethodStyle::NonMutating | MethodStyle::Mutating(_) => {
                let mutating = matches!(call.style, MethodStyle::Mutating(_));
                match entities.validate_method(&call.name, Some(concrete), mutating) {
                    Ok(mut matches) if matches.len() == 1 => {
                        let single = matches.remove(0);
                        Ok((CalleeRef::Method(single.callee), single.normalized))
                    }
                    Ok(_) => Err(Data::fault(
                        DataError::new(
                            ErrorKind::OverloadAmbiguous,
                            "dynamic call had too many matches at evaluation",
                        )
                        .in_function(call.name.to_string())
                        .at(call.location.clone()),
                    )),
                    Err(diagnostic) => Err(Data::fault(
                        DataError::new(ErrorKind::OverloadNone, diagnostic)
                            .in_function(call.name.to_string())
                            .at(call.location.clone()),
                    )),
                }
            }
        }
    }

    /// `Evaluate` semantics: a reference to a named block definition
    fn evaluate_definition(
        call: &FunctionCall,
        default: Option<&Parameter>,
        stack: &mut VarStack<'_>,
    ) -> Data {
        let definition = stack.definition(&call.name).cloned();
        match definition {
            Some(Definition::Evaluable(parameter)) => parameter.evaluate(stack),
            Some(Definition::Literal(data)) => data,
            None => match default {
                Some(default) => default.evaluate(stack),
                None => Data::fault(
                    DataError::new(
                        ErrorKind::UndefinedEvaluate,
                        format!(
                            "'{}' is undefined and has no default value",
                            call.name
                        ),
                    )
                    .at(call.location.clone()),
                ),
            },
        }
    }
}

/// A locally pinned callee during one evaluation
enum CalleeRef {
    Function(Arc<dyn Function>),
    Method(Arc<dyn Method>),
}

impl CalleeRef {
    fn signature(&self) -> &[crate::entities::CallParameter] {
        match self {
            CalleeRef::Function(function) => function.signature(),
            CalleeRef::Method(method) => method.signature(),
        }
    }

    fn is_unsafe(&self) -> bool {
        match self {
            CalleeRef::Function(function) => function.is_unsafe(),
            CalleeRef::Method(method) => method.is_unsafe(),
        }
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.container {
            Container::Value(Data::String(s)) => write!(f, "\"{}\"", s),
            Container::Value(data) => write!(f, "{}", data),
            Container::Keyword(keyword) => f.write_str(keyword.token()),
            Container::Operator(op) => write!(f, "{}", op),
            Container::Variable(variable) => write!(f, "{}", variable),
            Container::Expression(expression) => write!(f, "{}", expression),
            Container::Tuple(tuple) => write!(f, "{}", tuple),
            Container::Function(call) => write!(f, "{}", call),
        }
    }
}
