//! Constrained expressions over parameters
//!
//! An expression is a 2-operand (prefix, infix including subscript) or
//! 3-operand (ternary) form. The operand slots hold plain parameters; infix
//! and prefix forms keep their operator in a slot of its own, the ternary
//! form needs none. `Custom` covers host-library block forms the renderer
//! drives itself; those are never valued here.

use std::fmt;

use smallvec::SmallVec;

use crate::data::{Data, DataKind};
use crate::error::ErrorKind;
use crate::parameter::Parameter;
use crate::stack::VarStack;
use crate::symbol::Symbol;
use crate::variable::SymbolSet;

/// Every operator the parser or the evaluator knows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    // prefix
    Not,
    UnaryMinus,
    // infix, arithmetic
    Plus,
    Minus,
    Multiply,
    Divide,
    Modulo,
    // infix, comparison
    Equal,
    NotEqual,
    Lesser,
    LesserEqual,
    Greater,
    GreaterEqual,
    // infix, logical
    And,
    Or,
    // infix, rescue
    NilCoalesce,
    // computed access; assembled by the parser from subOpen/subClose
    Subscript,
    // structural only
    SubOpen,
    SubClose,
    TernaryTrue,
    TernaryFalse,
    Assignment,
}

impl Operator {
    /// Visible to the parser as a source token
    pub fn parseable(self) -> bool {
        !matches!(self, Operator::Subscript)
    }

    /// May appear inside a finished expression
    pub fn evaluable(self) -> bool {
        !matches!(
            self,
            Operator::SubOpen
                | Operator::SubClose
                | Operator::TernaryTrue
                | Operator::TernaryFalse
                | Operator::Assignment
        )
    }

    pub fn infix(self) -> bool {
        self.evaluable() && !self.unary_prefix()
    }

    pub fn unary_prefix(self) -> bool {
        matches!(self, Operator::Not | Operator::UnaryMinus)
    }

    /// The stored type this operator forces on its result, if any
    pub fn forces_type(self) -> Option<DataKind> {
        match self {
            Operator::Not
            | Operator::Equal
            | Operator::NotEqual
            | Operator::Lesser
            | Operator::LesserEqual
            | Operator::Greater
            | Operator::GreaterEqual
            | Operator::And
            | Operator::Or => Some(DataKind::Bool),
            _ => None,
        }
    }

    pub fn token(self) -> &'static str {
        match self {
            Operator::Not => "!",
            Operator::UnaryMinus => "-",
            Operator::Plus => "+",
            Operator::Minus => "-",
            Operator::Multiply => "*",
            Operator::Divide => "/",
            Operator::Modulo => "%",
            Operator::Equal => "==",
            Operator::NotEqual => "!=",
            Operator::Lesser => "<",
            Operator::LesserEqual => "<=",
            Operator::Greater => ">",
            Operator::GreaterEqual => ">=",
            Operator::And => "&&",
            Operator::Or => "||",
            Operator::NilCoalesce => "??",
            Operator::Subscript => "[]",
            Operator::SubOpen => "[",
            Operator::SubClose => "]",
            Operator::TernaryTrue => "?",
            Operator::TernaryFalse => ":",
            Operator::Assignment => "=",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpressionForm {
    /// `[op, operand]`
    Prefix,
    /// `[lhs, op, rhs]`
    Infix,
    /// `[condition, then, else]`
    Ternary,
    /// Host-library form; structurally held, never valued here
    Custom,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    operands: SmallVec<[Parameter; 3]>,
    form: ExpressionForm,
}

impl Expression {
    /// Build `lhs op rhs`. The parser upholds operand shape; a `None` here
    /// means it failed to.
    pub fn infix(lhs: Parameter, op: Operator, rhs: Parameter) -> Option<Self> {
        if !op.infix() || !lhs.is_valued() || !rhs.is_valued() {
            return None;
        }
        let mut operands = SmallVec::new();
        operands.push(lhs);
        operands.push(Parameter::raw_operator(op));
        operands.push(rhs);
        Some(Self {
            operands,
            form: ExpressionForm::Infix,
        })
    }

    /// Build `op operand`
    pub fn prefix(op: Operator, operand: Parameter) -> Option<Self> {
        if !op.unary_prefix() || !operand.is_valued() {
            return None;
        }
        let mut operands = SmallVec::new();
        operands.push(Parameter::raw_operator(op));
        operands.push(operand);
        Some(Self {
            operands,
            form: ExpressionForm::Prefix,
        })
    }

    /// Build `collection[index]` from the parser's subOpen/subClose pair
    pub fn subscript(collection: Parameter, index: Parameter) -> Option<Self> {
        if !collection.is_valued() || !index.is_valued() {
            return None;
        }
        let mut operands = SmallVec::new();
        operands.push(collection);
        operands.push(Parameter::raw_operator(Operator::Subscript));
        operands.push(index);
        Some(Self {
            operands,
            form: ExpressionForm::Infix,
        })
    }

    /// Build `condition ? then : else`
    pub fn ternary(condition: Parameter, then: Parameter, alternative: Parameter) -> Option<Self> {
        if !condition.is_valued() || !then.is_valued() || !alternative.is_valued() {
            return None;
        }
        let mut operands = SmallVec::new();
        operands.push(condition);
        operands.push(then);
        operands.push(alternative);
        Some(Self {
            operands,
            form: ExpressionForm::Ternary,
        })
    }

    /// A host-library form carried structurally
    pub fn custom(operands: impl IntoIterator<Item = Parameter>) -> Self {
        Self {
            operands: operands.into_iter().collect(),
            form: ExpressionForm::Custom,
        }
    }

    pub fn form(&self) -> ExpressionForm {
        self.form
    }

    pub fn operands(&self) -> &[Parameter] {
        &self.operands
    }

    /// The operator slot, for forms that have one
    pub fn op(&self) -> Option<Operator> {
        let slot = match self.form {
            ExpressionForm::Prefix => 0,
            ExpressionForm::Infix => 1,
            _ => return None,
        };
        self.operands.get(slot).and_then(Parameter::as_operator)
    }

    /// Statically-known result type, when the operator or operands force one
    pub fn base_type(&self) -> Option<DataKind> {
        match self.form {
            ExpressionForm::Custom => None,
            ExpressionForm::Ternary => {
                unify(self.operands[1].base_type(), self.operands[2].base_type())
            }
            ExpressionForm::Prefix => {
                let op = self.op()?;
                op.forces_type().or_else(|| self.operands[1].base_type())
            }
            ExpressionForm::Infix => {
                let op = self.op()?;
                if let Some(forced) = op.forces_type() {
                    return Some(forced);
                }
                match op {
                    Operator::Subscript => None,
                    Operator::NilCoalesce => {
                        unify(self.operands[0].base_type(), self.operands[2].base_type())
                    }
                    _ => numeric_unify(
                        self.operands[0].base_type(),
                        self.operands[2].base_type(),
                    ),
                }
            }
        }
    }

    fn value_operands(&self) -> impl Iterator<Item = &Parameter> {
        let operator_slot = match self.form {
            ExpressionForm::Prefix => Some(0),
            ExpressionForm::Infix => Some(1),
            _ => None,
        };
        self.operands
            .iter()
            .enumerate()
            .filter(move |(i, _)| Some(*i) != operator_slot)
            .map(|(_, p)| p)
    }
}

fn unify(a: Option<DataKind>, b: Option<DataKind>) -> Option<DataKind> {
    match (a, b) {
        (Some(x), Some(y)) if x == y => Some(x),
        _ => None,
    }
}

/// Unification with int-to-double promotion
fn numeric_unify(a: Option<DataKind>, b: Option<DataKind>) -> Option<DataKind> {
    match (a?, b?) {
        (x, y) if x == y => Some(x),
        (DataKind::Int, DataKind::Double) | (DataKind::Double, DataKind::Int) => {
            Some(DataKind::Double)
        }
        _ => None,
    }
}

impl Symbol for Expression {
    fn resolved(&self) -> bool {
        self.operands.iter().all(Parameter::resolved)
    }

    fn invariant(&self) -> bool {
        self.value_operands().all(Parameter::invariant)
    }

    fn symbols(&self) -> SymbolSet {
        let mut set = SymbolSet::new();
        for operand in self.value_operands() {
            set.extend(operand.symbols());
        }
        set
    }

    fn resolve(self, stack: &mut VarStack<'_>) -> Self {
        Self {
            operands: self
                .operands
                .into_iter()
                .map(|operand| operand.resolve(stack))
                .collect(),
            form: self.form,
        }
    }

    fn evaluate(&self, stack: &mut VarStack<'_>) -> Data {
        match self.form {
            ExpressionForm::Custom => Data::error(
                ErrorKind::Internal,
                "custom expression form reached evaluation",
            ),
            ExpressionForm::Prefix => self.evaluate_prefix(stack),
            ExpressionForm::Infix => self.evaluate_infix(stack),
            ExpressionForm::Ternary => self.evaluate_ternary(stack),
        }
    }
}

impl Expression {
    /// Evaluate one operand, applying the soft-error policy: under strict
    /// policy the errored value is handed back for propagation, otherwise it
    /// decays to nil.
    fn operand(&self, index: usize, stack: &mut VarStack<'_>) -> Result<Data, Data> {
        let result = self.operands[index].evaluate(stack);
        if result.errored() {
            if stack.missing_variable_throws() {
                Err(result)
            } else {
                Ok(Data::Void)
            }
        } else {
            Ok(result)
        }
    }

    fn evaluate_prefix(&self, stack: &mut VarStack<'_>) -> Data {
        let op = match self.op() {
            Some(op) => op,
            None => return Data::error(ErrorKind::Internal, "prefix form without operator"),
        };
        let operand = match self.operand(1, stack) {
            Ok(value) => value,
            Err(errored) => return errored,
        };

        match op {
            Operator::Not => match operand.as_bool() {
                Some(b) => Data::Bool(!b),
                None => type_error(op, &operand, None),
            },
            Operator::UnaryMinus => match operand {
                Data::Int(i) => Data::Int(-i),
                Data::Double(d) => Data::Double(-d),
                other => type_error(op, &other, None),
            },
            _ => Data::error(ErrorKind::Internal, "non-prefix operator in prefix form"),
        }
    }

    fn evaluate_infix(&self, stack: &mut VarStack<'_>) -> Data {
        let op = match self.op() {
            Some(op) => op,
            None => return Data::error(ErrorKind::Internal, "infix form without operator"),
        };

        // Short-circuit forms decide from the left side alone
        match op {
            Operator::And | Operator::Or => {
                let lhs = match self.operand(0, stack) {
                    Ok(value) => value,
                    Err(errored) => return errored,
                };
                let Some(left) = lhs.as_bool() else {
                    return type_error(op, &lhs, None);
                };
                if (op == Operator::And && !left) || (op == Operator::Or && left) {
                    return Data::Bool(left);
                }
                let rhs = match self.operand(2, stack) {
                    Ok(value) => value,
                    Err(errored) => return errored,
                };
                return match rhs.as_bool() {
                    Some(right) => Data::Bool(right),
                    None => type_error(op, &rhs, None),
                };
            }
            Operator::NilCoalesce => {
                // The rescue operator: an errored or void left side yields
                // the right side regardless of policy.
                let lhs = self.operands[0].evaluate(stack);
                if !lhs.errored() && !lhs.is_void() {
                    return lhs;
                }
                return self.operands[2].evaluate(stack);
            }
            _ => {}
        }

        let lhs = match self.operand(0, stack) {
            Ok(value) => value,
            Err(errored) => return errored,
        };
        let rhs = match self.operand(2, stack) {
            Ok(value) => value,
            Err(errored) => return errored,
        };
        apply_infix(op, lhs, rhs)
    }

    fn evaluate_ternary(&self, stack: &mut VarStack<'_>) -> Data {
        let condition = match self.operand(0, stack) {
            Ok(value) => value,
            Err(errored) => return errored,
        };
        match condition.as_bool() {
            Some(true) => self.operands[1].evaluate(stack),
            Some(false) => self.operands[2].evaluate(stack),
            None => type_error(Operator::TernaryTrue, &condition, None),
        }
    }
}

fn type_error(op: Operator, lhs: &Data, rhs: Option<&Data>) -> Data {
    let message = match rhs {
        Some(rhs) => format!(
            "operator '{}' cannot combine {} and {}",
            op,
            lhs.stored_type(),
            rhs.stored_type()
        ),
        None => format!("operator '{}' cannot apply to {}", op, lhs.stored_type()),
    };
    Data::error(ErrorKind::TypeMismatch, message)
}

/// Apply a non-short-circuiting infix operator to concrete operands
fn apply_infix(op: Operator, lhs: Data, rhs: Data) -> Data {
    match op {
        Operator::Plus => match (&lhs, &rhs) {
            (Data::Int(a), Data::Int(b)) => match a.checked_add(*b) {
                Some(sum) => Data::Int(sum),
                None => Data::error(ErrorKind::TypeMismatch, "integer overflow in '+'"),
            },
            (Data::String(a), Data::String(b)) => {
                let mut out = String::with_capacity(a.len() + b.len());
                out.push_str(a);
                out.push_str(b);
                Data::String(out)
            }
            (Data::Array(a), Data::Array(b)) => {
                Data::Array(a.iter().chain(b.iter()).cloned().collect())
            }
            _ => numeric_op(op, &lhs, &rhs, |a, b| a + b),
        },
        Operator::Minus => match (&lhs, &rhs) {
            (Data::Int(a), Data::Int(b)) => match a.checked_sub(*b) {
                Some(diff) => Data::Int(diff),
                None => Data::error(ErrorKind::TypeMismatch, "integer overflow in '-'"),
            },
            _ => numeric_op(op, &lhs, &rhs, |a, b| a - b),
        },
        Operator::Multiply => match (&lhs, &rhs) {
            (Data::Int(a), Data::Int(b)) => match a.checked_mul(*b) {
                Some(product) => Data::Int(product),
                None => Data::error(ErrorKind::TypeMismatch, "integer overflow in '*'"),
            },
            _ => numeric_op(op, &lhs, &rhs, |a, b| a * b),
        },
        Operator::Divide => match (&lhs, &rhs) {
            (Data::Int(_), Data::Int(0)) => {
                Data::error(ErrorKind::TypeMismatch, "integer division by zero")
            }
            (Data::Int(a), Data::Int(b)) => Data::Int(a / b),
            _ => numeric_op(op, &lhs, &rhs, |a, b| a / b),
        },
        Operator::Modulo => match (&lhs, &rhs) {
            (Data::Int(_), Data::Int(0)) => {
                Data::error(ErrorKind::TypeMismatch, "integer modulo by zero")
            }
            (Data::Int(a), Data::Int(b)) => Data::Int(a % b),
            _ => numeric_op(op, &lhs, &rhs, |a, b| a % b),
        },
        Operator::Equal => Data::Bool(loose_equal(&lhs, &rhs)),
        Operator::NotEqual => Data::Bool(!loose_equal(&lhs, &rhs)),
        Operator::Lesser => ordered(op, &lhs, &rhs, |ord| ord.is_lt()),
        Operator::LesserEqual => ordered(op, &lhs, &rhs, |ord| ord.is_le()),
        Operator::Greater => ordered(op, &lhs, &rhs, |ord| ord.is_gt()),
        Operator::GreaterEqual => ordered(op, &lhs, &rhs, |ord| ord.is_ge()),
        Operator::Subscript => subscript(&lhs, &rhs),
        _ => Data::error(ErrorKind::Internal, "structural operator in infix form"),
    }
}

fn numeric_op(op: Operator, lhs: &Data, rhs: &Data, apply: impl Fn(f64, f64) -> f64) -> Data {
    match (lhs.as_double(), rhs.as_double()) {
        (Some(a), Some(b)) => Data::Double(apply(a, b)),
        _ => type_error(op, lhs, Some(rhs)),
    }
}

/// Equality with int/double promotion; mismatched kinds are unequal
fn loose_equal(lhs: &Data, rhs: &Data) -> bool {
    match (lhs, rhs) {
        (Data::Int(a), Data::Double(b)) | (Data::Double(b), Data::Int(a)) => (*a as f64) == *b,
        _ => lhs == rhs,
    }
}

fn ordered(op: Operator, lhs: &Data, rhs: &Data, test: impl Fn(std::cmp::Ordering) -> bool) -> Data {
    let ordering = match (lhs, rhs) {
        (Data::String(a), Data::String(b)) => Some(a.cmp(b)),
        _ => match (lhs.as_double(), rhs.as_double()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => None,
        },
    };
    match ordering {
        Some(ord) => Data::Bool(test(ord)),
        None => type_error(op, lhs, Some(rhs)),
    }
}

/// Computed access. Misses surface as missing-variable faults so the
/// soft-error policy decides whether they propagate or decay.
fn subscript(collection: &Data, index: &Data) -> Data {
    match (collection, index) {
        (Data::Array(items), Data::Int(i)) => {
            if *i >= 0 && (*i as usize) < items.len() {
                items[*i as usize].clone()
            } else {
                Data::error(
                    ErrorKind::MissingVariable,
                    format!("index {} out of bounds (length {})", i, items.len()),
                )
            }
        }
        (Data::Dictionary(map), Data::String(key)) => match map.get(key) {
            Some(value) => value.clone(),
            None => Data::error(
                ErrorKind::MissingVariable,
                format!("key '{}' not found", key),
            ),
        },
        _ => type_error(Operator::Subscript, collection, Some(index)),
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.form {
            ExpressionForm::Prefix => {
                write!(f, "{}{}", self.operands[0], self.operands[1])
            }
            ExpressionForm::Infix if self.op() == Some(Operator::Subscript) => {
                write!(f, "{}[{}]", self.operands[0], self.operands[2])
            }
            ExpressionForm::Infix => write!(
                f,
                "{} {} {}",
                self.operands[0], self.operands[1], self.operands[2]
            ),
            ExpressionForm::Ternary => write!(
                f,
                "{} ? {} : {}",
                self.operands[0], self.operands[1], self.operands[2]
            ),
            ExpressionForm::Custom => {
                f.write_str("custom(")?;
                for (i, operand) in self.operands.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", operand)?;
                }
                f.write_str(")")
            }
        }
    }
}
