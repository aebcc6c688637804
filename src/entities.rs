//! Entity registry - the functions, methods and blocks a render may call
//!
//! Overload resolution happens in two passes. At resolve time the registry
//! is queried with whatever static shape the argument tuple exposes; exactly
//! one match binds the callee, several keep the call dynamic, none turns the
//! call into an errored value. At evaluation time a still-dynamic call is
//! re-validated against the concrete argument values.

use std::fmt;
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use crate::context::UnsafeObjects;
use crate::data::{Data, DataKind};
use crate::error::{EngineError, Result};
use crate::parameter::Parameter;
use crate::tuple::Tuple;

/// One slot of a callable signature
#[derive(Debug, Clone, PartialEq)]
pub struct CallParameter {
    pub label: Option<Arc<str>>,
    /// Accepted stored kinds; empty accepts anything
    pub types: SmallVec<[DataKind; 2]>,
    pub optional: bool,
    pub default: Option<Data>,
}

impl CallParameter {
    /// Accepts any value
    pub fn any() -> Self {
        Self {
            label: None,
            types: SmallVec::new(),
            optional: false,
            default: None,
        }
    }

    /// Accepts the listed kinds only.
    ///
    /// The set is canonicalized to the fixed `DataKind` order, so two
    /// signatures declaring the same kinds compare equal regardless of
    /// declaration order.
    pub fn of(kinds: impl IntoIterator<Item = DataKind>) -> Self {
        let mut types: SmallVec<[DataKind; 2]> = kinds.into_iter().collect();
        types.sort_unstable();
        types.dedup();
        Self {
            types,
            ..Self::any()
        }
    }

    pub fn labeled(mut self, label: impl AsRef<str>) -> Self {
        self.label = Some(crate::atom::atom(label.as_ref()));
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn with_default(mut self, default: Data) -> Self {
        self.optional = true;
        self.default = Some(default);
        self
    }

    /// Membership over the canonically ordered set
    fn accepts_kind(&self, kind: DataKind) -> bool {
        self.types.is_empty() || self.types.binary_search(&kind).is_ok()
    }
}

impl fmt::Display for CallParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(label) = &self.label {
            write!(f, "{}: ", label)?;
        }
        if self.types.is_empty() {
            f.write_str("Any")?;
        } else {
            for (i, kind) in self.types.iter().enumerate() {
                if i > 0 {
                    f.write_str("|")?;
                }
                write!(f, "{}", kind)?;
            }
        }
        if self.optional {
            f.write_str("?")?;
        }
        Ok(())
    }
}

/// Evaluated arguments in signature order, type-checked and default-filled
#[derive(Debug, Clone)]
pub struct CallValues {
    values: Vec<Data>,
    /// Snapshot of the host's unsafe objects; present only for unsafe
    /// entities under a context that allows them
    unsafe_objects: Option<Arc<UnsafeObjects>>,
}

impl CallValues {
    /// Type-check concrete values against a signature.
    ///
    /// Values arrive in signature order (normalization happened at match
    /// time). Void passes the filter: the void-argument rule upstream owns
    /// that decision.
    pub fn bind(signature: &[CallParameter], values: Vec<Data>) -> Option<Self> {
        if values.len() != signature.len() {
            return None;
        }
        for (parameter, value) in signature.iter().zip(&values) {
            if value.is_void() {
                continue;
            }
            if !parameter.accepts_kind(value.stored_type()) {
                return None;
            }
        }
        Some(Self {
            values,
            unsafe_objects: None,
        })
    }

    pub(crate) fn grant_unsafe(&mut self, objects: Arc<UnsafeObjects>) {
        self.unsafe_objects = Some(objects);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> &Data {
        self.values.get(index).unwrap_or(&Data::Void)
    }

    /// The method receiver: by convention the first argument
    pub fn operand(&self) -> &Data {
        self.get(0)
    }

    /// The host object snapshot, for unsafe entities only
    pub fn unsafe_objects(&self) -> Option<&UnsafeObjects> {
        self.unsafe_objects.as_deref()
    }
}

/// A callable entity
pub trait Function: Send + Sync {
    fn signature(&self) -> &[CallParameter];

    /// Declared result kinds; a single entry makes the static type knowable
    fn return_types(&self) -> &[DataKind];

    /// Evaluation is independent of external time/state
    fn invariant(&self) -> bool {
        true
    }

    /// Requires the host object map at invocation
    fn is_unsafe(&self) -> bool {
        false
    }

    fn invoke(&self, values: &CallValues) -> Data;
}

/// A callable entity with a receiver. The receiver is the first argument.
pub trait Method: Function {
    fn mutating(&self) -> bool {
        false
    }

    /// Mutating entry point: (updated receiver, return value).
    /// `None` for the updated receiver means "no mutation".
    fn invoke_mutating(&self, values: &CallValues) -> (Option<Data>, Data) {
        (None, self.invoke(values))
    }
}

/// One overload candidate: the callee plus its normalized argument tuple
/// (labels resolved to positions, defaults filled)
#[derive(Clone)]
pub struct FunctionMatch {
    pub callee: Arc<dyn Function>,
    pub normalized: Tuple,
}

impl std::fmt::Debug for FunctionMatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionMatch")
            .field("normalized", &self.normalized)
            .finish()
    }
}

#[derive(Clone)]
pub struct MethodMatch {
    pub callee: Arc<dyn Method>,
    pub normalized: Tuple,
}

/// Registry of recognized entities
///
/// Blocks and raw blocks are the tag library's concern; the registry only
/// tracks their names so the parser can recognize them.
#[derive(Default)]
pub struct Entities {
    functions: FxHashMap<String, Vec<Arc<dyn Function>>>,
    methods: FxHashMap<String, Vec<Arc<dyn Method>>>,
    blocks: FxHashSet<String>,
    raw_blocks: FxHashSet<String>,
}

impl Entities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_function(
        &mut self,
        name: impl Into<String>,
        function: impl Function + 'static,
    ) -> Result<()> {
        let name = name.into();
        let overloads = self.functions.entry(name.clone()).or_default();
        if overloads
            .iter()
            .any(|existing| existing.signature() == function.signature())
        {
            return Err(EngineError::DuplicateEntity { name });
        }
        overloads.push(Arc::new(function));
        Ok(())
    }

    pub fn register_method(
        &mut self,
        name: impl Into<String>,
        method: impl Method + 'static,
    ) -> Result<()> {
        let name = name.into();
        let overloads = self.methods.entry(name.clone()).or_default();
        if overloads.iter().any(|existing| {
            existing.signature() == method.signature() && existing.mutating() == method.mutating()
        }) {
            return Err(EngineError::DuplicateEntity { name });
        }
        overloads.push(Arc::new(method));
        Ok(())
    }

    pub fn register_block(&mut self, name: impl Into<String>) {
        self.blocks.insert(name.into());
    }

    pub fn register_raw_block(&mut self, name: impl Into<String>) {
        self.raw_blocks.insert(name.into());
    }

    pub fn is_block(&self, name: &str) -> bool {
        self.blocks.contains(name) || self.raw_blocks.contains(name)
    }

    pub fn function_count(&self) -> usize {
        self.functions.values().map(Vec::len).sum()
    }

    /// Candidates whose signature admits the argument shape.
    ///
    /// `Ok` always carries at least one candidate; an empty or unknown name
    /// is the error case with the caller-facing diagnostic.
    pub fn validate_function(
        &self,
        name: &str,
        args: Option<&Tuple>,
    ) -> std::result::Result<Vec<FunctionMatch>, String> {
        let overloads = self
            .functions
            .get(name)
            .ok_or_else(|| format!("unknown function '{}'", name))?;

        let empty = Tuple::new([]);
        let args = args.unwrap_or(&empty);
        let matches: Vec<FunctionMatch> = overloads
            .iter()
            .filter_map(|callee| {
                normalize(callee.signature(), args).map(|normalized| FunctionMatch {
                    callee: Arc::clone(callee),
                    normalized,
                })
            })
            .collect();

        if matches.is_empty() {
            Err(format!("no matching signature for '{}{}'", name, args))
        } else {
            Ok(matches)
        }
    }

    pub fn validate_method(
        &self,
        name: &str,
        args: Option<&Tuple>,
        mutating: bool,
    ) -> std::result::Result<Vec<MethodMatch>, String> {
        let overloads = self
            .methods
            .get(name)
            .ok_or_else(|| format!("unknown method '{}'", name))?;

        let empty = Tuple::new([]);
        let args = args.unwrap_or(&empty);
        let matches: Vec<MethodMatch> = overloads
            .iter()
            .filter(|callee| callee.mutating() == mutating)
            .filter_map(|callee| {
                normalize(callee.signature(), args).map(|normalized| MethodMatch {
                    callee: Arc::clone(callee),
                    normalized,
                })
            })
            .collect();

        if matches.is_empty() {
            Err(format!("no matching signature for method '{}{}'", name, args))
        } else {
            Ok(matches)
        }
    }
}

/// Match an argument tuple against a signature, producing the normalized
/// tuple (signature order, labels dropped, defaults filled) on success.
///
/// Static type information is advisory: an argument with an unknowable base
/// type passes here and is re-checked against concrete values at evaluation.
fn normalize(signature: &[CallParameter], args: &Tuple) -> Option<Tuple> {
    let values = args.values();
    let mut consumed = vec![false; values.len()];
    let mut normalized: Vec<Parameter> = Vec::with_capacity(signature.len());

    for parameter in signature {
        let found = match &parameter.label {
            Some(label) => (0..values.len())
                .find(|&i| !consumed[i] && args.label_at(i) == Some(label)),
            None => (0..values.len()).find(|&i| !consumed[i] && args.label_at(i).is_none()),
        };

        match found {
            Some(i) => {
                consumed[i] = true;
                let argument = &values[i];
                if let Some(kind) = argument.base_type() {
                    if kind != DataKind::Void && !parameter.accepts_kind(kind) {
                        return None;
                    }
                }
                normalized.push(argument.clone());
            }
            None => match &parameter.default {
                Some(default) => normalized.push(Parameter::value(default.clone())),
                None if parameter.optional => normalized.push(Parameter::value(Data::Void)),
                None => return None,
            },
        }
    }

    if consumed.iter().any(|used| !used) {
        return None;
    }
    Some(Tuple::new(normalized))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Data;

    struct Upper;

    impl Function for Upper {
        fn signature(&self) -> &[CallParameter] {
            static SIG: once_cell::sync::Lazy<Vec<CallParameter>> =
                once_cell::sync::Lazy::new(|| vec![CallParameter::of([DataKind::String])]);
            SIG.as_slice()
        }

        fn return_types(&self) -> &[DataKind] {
            &[DataKind::String]
        }

        fn invoke(&self, values: &CallValues) -> Data {
            match values.get(0).as_str() {
                Some(s) => Data::string(s.to_uppercase()),
                None => Data::Void,
            }
        }
    }

    struct Count;

    impl Function for Count {
        fn signature(&self) -> &[CallParameter] {
            static SIG: once_cell::sync::Lazy<Vec<CallParameter>> =
                once_cell::sync::Lazy::new(|| {
                    vec![CallParameter::of([DataKind::Array, DataKind::Dictionary])]
                });
            SIG.as_slice()
        }

        fn return_types(&self) -> &[DataKind] {
            &[DataKind::Int]
        }

        fn invoke(&self, values: &CallValues) -> Data {
            match values.get(0) {
                Data::Array(items) => Data::Int(items.len() as i64),
                Data::Dictionary(map) => Data::Int(map.len() as i64),
                _ => Data::Void,
            }
        }
    }

    fn args(values: impl IntoIterator<Item = Data>) -> Tuple {
        Tuple::new(values.into_iter().map(Parameter::value))
    }

    #[test]
    fn unknown_function_is_an_error() {
        let entities = Entities::new();
        let result = entities.validate_function("upper", None);
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("unknown function"));
    }

    #[test]
    fn single_match_binds() {
        let mut entities = Entities::new();
        entities.register_function("upper", Upper).unwrap();

        let matches = entities
            .validate_function("upper", Some(&args([Data::string("hi")])))
            .unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].normalized.len(), 1);
    }

    #[test]
    fn static_type_mismatch_rejects() {
        let mut entities = Entities::new();
        entities.register_function("upper", Upper).unwrap();

        let result = entities.validate_function("upper", Some(&args([Data::Int(3)])));
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("no matching signature"));
    }

    #[test]
    fn unknowable_argument_type_stays_matchable() {
        let mut entities = Entities::new();
        entities.register_function("upper", Upper).unwrap();

        // A variable has no static base type; the overload stays alive
        let args = Tuple::new([Parameter::variable(crate::variable::Variable::named("x"))]);
        let matches = entities.validate_function("upper", Some(&args)).unwrap();
        assert_eq!(matches.len(), 1);
    }

    #[test]
    fn defaults_fill_missing_arguments() {
        struct Pad;
        impl Function for Pad {
            fn signature(&self) -> &[CallParameter] {
                static SIG: once_cell::sync::Lazy<Vec<CallParameter>> =
                    once_cell::sync::Lazy::new(|| {
                        vec![
                            CallParameter::of([DataKind::String]),
                            CallParameter::of([DataKind::Int])
                                .labeled("width")
                                .with_default(Data::Int(8)),
                        ]
                    });
                SIG.as_slice()
            }
            fn return_types(&self) -> &[DataKind] {
                &[DataKind::String]
            }
            fn invoke(&self, values: &CallValues) -> Data {
                let width = values.get(1).as_int().unwrap_or(8) as usize;
                match values.get(0).as_str() {
                    Some(s) => Data::string(format!("{:>width$}", s)),
                    None => Data::Void,
                }
            }
        }

        let mut entities = Entities::new();
        entities.register_function("pad", Pad).unwrap();

        let matches = entities
            .validate_function("pad", Some(&args([Data::string("x")])))
            .unwrap();
        assert_eq!(matches.len(), 1);
        let filled = &matches[0].normalized;
        assert_eq!(filled.len(), 2);
    }

    #[test]
    fn duplicate_signature_is_rejected() {
        let mut entities = Entities::new();
        entities.register_function("upper", Upper).unwrap();
        let result = entities.register_function("upper", Upper);
        assert!(matches!(result, Err(EngineError::DuplicateEntity { .. })));
    }

    #[test]
    fn type_sets_canonicalize_to_the_matching_order() {
        let shuffled =
            CallParameter::of([DataKind::Dictionary, DataKind::Int, DataKind::Int]);
        let ordered = CallParameter::of([DataKind::Int, DataKind::Dictionary]);

        assert_eq!(shuffled, ordered);
        assert!(shuffled.accepts_kind(DataKind::Int));
        assert!(shuffled.accepts_kind(DataKind::Dictionary));
        assert!(!shuffled.accepts_kind(DataKind::String));
    }

    #[test]
    fn duplicate_detection_ignores_declaration_order() {
        struct Spread;
        impl Function for Spread {
            fn signature(&self) -> &[CallParameter] {
                static SIG: once_cell::sync::Lazy<Vec<CallParameter>> =
                    once_cell::sync::Lazy::new(|| {
                        vec![CallParameter::of([DataKind::Int, DataKind::Double])]
                    });
                SIG.as_slice()
            }
            fn return_types(&self) -> &[DataKind] {
                &[DataKind::Double]
            }
            fn invoke(&self, values: &CallValues) -> Data {
                values.get(0).clone()
            }
        }
        struct Daerps;
        impl Function for Daerps {
            fn signature(&self) -> &[CallParameter] {
                static SIG: once_cell::sync::Lazy<Vec<CallParameter>> =
                    once_cell::sync::Lazy::new(|| {
                        vec![CallParameter::of([DataKind::Double, DataKind::Int])]
                    });
                SIG.as_slice()
            }
            fn return_types(&self) -> &[DataKind] {
                &[DataKind::Double]
            }
            fn invoke(&self, values: &CallValues) -> Data {
                values.get(0).clone()
            }
        }

        // Same kind set declared in opposite order: one canonical signature
        let mut entities = Entities::new();
        entities.register_function("widen", Spread).unwrap();
        let result = entities.register_function("widen", Daerps);
        assert!(matches!(result, Err(EngineError::DuplicateEntity { .. })));
    }

    #[test]
    fn distinct_overloads_coexist() {
        let mut entities = Entities::new();
        entities.register_function("size", Upper).unwrap();
        entities.register_function("size", Count).unwrap();

        // A string argument selects the Upper-shaped overload only
        let matches = entities
            .validate_function("size", Some(&args([Data::string("hi")])))
            .unwrap();
        assert_eq!(matches.len(), 1);
    }

    #[test]
    fn call_values_type_check() {
        let signature = vec![CallParameter::of([DataKind::String])];

        assert!(CallValues::bind(&signature, vec![Data::string("ok")]).is_some());
        assert!(CallValues::bind(&signature, vec![Data::Int(1)]).is_none());
        // Void passes the filter; the void-argument rule upstream owns it
        assert!(CallValues::bind(&signature, vec![Data::Void]).is_some());
    }

    #[test]
    fn mutating_filter_separates_method_kinds() {
        struct Bump;
        impl Function for Bump {
            fn signature(&self) -> &[CallParameter] {
                static SIG: once_cell::sync::Lazy<Vec<CallParameter>> =
                    once_cell::sync::Lazy::new(|| vec![CallParameter::of([DataKind::Int])]);
                SIG.as_slice()
            }
            fn return_types(&self) -> &[DataKind] {
                &[DataKind::Int]
            }
            fn invoke(&self, values: &CallValues) -> Data {
                values.get(0).clone()
            }
        }
        impl Method for Bump {
            fn mutating(&self) -> bool {
                true
            }
            fn invoke_mutating(&self, values: &CallValues) -> (Option<Data>, Data) {
                let bumped = values.get(0).as_int().map(|i| i + 1).unwrap_or(0);
                (Some(Data::Int(bumped)), Data::Int(bumped))
            }
        }

        let mut entities = Entities::new();
        entities.register_method("bump", Bump).unwrap();

        assert!(entities
            .validate_method("bump", Some(&args([Data::Int(1)])), true)
            .is_ok());
        assert!(entities
            .validate_method("bump", Some(&args([Data::Int(1)])), false)
            .is_err());
    }
}
