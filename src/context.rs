//! Scoped databases of named values
//!
//! A `Context` maps scope names to cells of [`DataValue`]. Hosts feed it
//! through [`ContextPublisher`]s or plain generator maps; the render reads it
//! through the symbol stack. Locking a scope flattens every cell to a literal,
//! after which the scope's names behave as parse-time constants and the
//! resolver may inline them.
//!
//! The context also carries the render policy record: the soft-error switch
//! (`missing_variable_throws`), the object-mode flags, and the map of unsafe
//! host objects handed to unsafe entities as a snapshot.

use std::any::Any;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde_json::Value;
use tracing::debug;

use crate::atom::atom;
use crate::data::{Data, DataKind, LazyData};
use crate::error::{EngineError, Result};

/// The scope unscoped variables fall back to
pub const DEFAULT_SCOPE: &str = "context";

/// Host objects available to unsafe entities, by name
pub type UnsafeObjects = FxHashMap<String, Arc<dyn Any + Send + Sync>>;

/// What a publisher provides per name: a ready value or a deferred producer
#[derive(Debug, Clone)]
pub enum DataGenerator {
    Immediate(Data),
    Lazy(LazyData),
}

impl DataGenerator {
    pub fn immediate(data: impl Into<Data>) -> Self {
        DataGenerator::Immediate(data.into())
    }

    pub fn lazy(
        returns: DataKind,
        invariant: bool,
        producer: impl Fn() -> Data + Send + Sync + 'static,
    ) -> Self {
        DataGenerator::Lazy(LazyData::new(returns, invariant, producer))
    }
}

/// One cell of a scope
///
/// `Literal` is fixed and must never be downgraded to a variable cell.
/// `Variable` re-invokes its generator on refresh and memoizes the result.
#[derive(Debug, Clone)]
pub enum DataValue {
    Literal(Data),
    Variable {
        generator: LazyData,
        cached: Option<Data>,
    },
}

impl DataValue {
    pub fn from_generator(generator: DataGenerator) -> Self {
        match generator {
            DataGenerator::Immediate(data) => DataValue::Literal(data),
            DataGenerator::Lazy(lazy) => DataValue::Variable {
                generator: lazy,
                cached: None,
            },
        }
    }

    /// Literal-non-lazy, or variable with a memoized refresh
    pub fn cached(&self) -> bool {
        match self {
            DataValue::Literal(data) => !data.is_lazy(),
            DataValue::Variable { cached, .. } => cached.is_some(),
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, DataValue::Literal(_))
    }

    /// Current value: literals evaluate in place, variable cells serve the
    /// memo or refresh once
    pub fn read(&mut self) -> Data {
        match self {
            DataValue::Literal(data) => data.evaluate(),
            DataValue::Variable { cached: Some(data), .. } => data.clone(),
            DataValue::Variable { generator, cached } => {
                let produced = generator.force();
                *cached = Some(produced.clone());
                produced
            }
        }
    }

    /// Force to a literal, discarding generator identity
    pub fn flatten(&mut self) {
        if let DataValue::Variable { generator, cached } = self {
            let value = cached.take().unwrap_or_else(|| generator.force());
            *self = DataValue::Literal(value);
        } else if let DataValue::Literal(data) = self {
            *data = data.evaluate();
        }
    }

    /// Re-invoke the generator and memoize (no-op for literals)
    pub fn refresh(&mut self) -> Data {
        match self {
            DataValue::Literal(data) => data.evaluate(),
            DataValue::Variable { generator, cached } => {
                let produced = generator.force();
                *cached = Some(produced.clone());
                produced
            }
        }
    }

    /// Drop the memoized value, retaining the generator
    pub fn uncache(&mut self) {
        if let DataValue::Variable { cached, .. } = self {
            *cached = None;
        }
    }
}

/// Object-mode flags of the render policy record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObjectMode {
    /// Allow unsafe entities to receive the host object snapshot
    pub unsafe_entities: bool,
    /// Publishers registered as contextual objects (informational)
    pub contextualized: bool,
}

/// Host-supplied source of named generators
pub trait ContextPublisher {
    fn variables(&self) -> FxHashMap<String, DataGenerator>;

    /// Additional generators registered into the same scope
    fn extended_variables(&self) -> FxHashMap<String, DataGenerator> {
        FxHashMap::default()
    }
}

/// A raw generator map publishes itself
impl ContextPublisher for FxHashMap<String, DataGenerator> {
    fn variables(&self) -> FxHashMap<String, DataGenerator> {
        self.clone()
    }
}

/// A JSON object is directly publishable: each field becomes an immediate
/// generator.
impl ContextPublisher for Value {
    fn variables(&self) -> FxHashMap<String, DataGenerator> {
        match self {
            Value::Object(map) => map
                .iter()
                .map(|(k, v)| (k.clone(), DataGenerator::Immediate(Data::from(v.clone()))))
                .collect(),
            _ => FxHashMap::default(),
        }
    }
}

#[derive(Debug, Default)]
struct Scope {
    cells: FxHashMap<Arc<str>, DataValue>,
    locked: bool,
}

/// Scoped variable database plus render policy record
#[derive(Debug, Default)]
pub struct Context {
    scopes: FxHashMap<Arc<str>, Scope>,
    /// Strict mode: errored lookups propagate instead of decaying to nil
    pub missing_variable_throws: bool,
    pub object_mode: ObjectMode,
    unsafe_objects: Arc<UnsafeObjects>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a publisher's generators under a caller-chosen scope
    pub fn register_publisher(
        &mut self,
        scope: impl AsRef<str>,
        publisher: &dyn ContextPublisher,
    ) -> Result<()> {
        let mut generators = publisher.variables();
        generators.extend(publisher.extended_variables());
        self.register_generators(scope, generators)
    }

    /// Register raw generators under a scope
    pub fn register_generators(
        &mut self,
        scope: impl AsRef<str>,
        generators: impl IntoIterator<Item = (String, DataGenerator)>,
    ) -> Result<()> {
        let scope_atom = atom(scope.as_ref());
        let entry = self.scopes.entry(Arc::clone(&scope_atom)).or_default();
        if entry.locked {
            return Err(EngineError::ScopeLocked {
                scope: scope_atom.to_string(),
            });
        }

        for (name, generator) in generators {
            let name_atom = atom(&name);
            let incoming = DataValue::from_generator(generator);
            if let Some(existing) = entry.cells.get(&name_atom) {
                // A literal never downgrades to a variable cell
                if existing.is_literal() && !incoming.is_literal() {
                    return Err(EngineError::LiteralOverwrite {
                        scope: scope_atom.to_string(),
                        name,
                    });
                }
            }
            entry.cells.insert(name_atom, incoming);
        }
        Ok(())
    }

    /// Register a JSON object's fields under a scope
    pub fn register_json(&mut self, scope: impl AsRef<str>, object: Value) -> Result<()> {
        self.register_publisher(scope, &object)
    }

    /// Fix a single name to a literal value
    pub fn set_literal(
        &mut self,
        scope: impl AsRef<str>,
        name: impl AsRef<str>,
        data: Data,
    ) -> Result<()> {
        let scope_atom = atom(scope.as_ref());
        let entry = self.scopes.entry(Arc::clone(&scope_atom)).or_default();
        if entry.locked {
            return Err(EngineError::ScopeLocked {
                scope: scope_atom.to_string(),
            });
        }
        entry
            .cells
            .insert(atom(name.as_ref()), DataValue::Literal(data));
        Ok(())
    }

    /// Flatten every cell to a literal and refuse further registration.
    /// After locking, the scope's names behave as parse-time constants.
    pub fn lock_scope(&mut self, scope: impl AsRef<str>) {
        let scope_atom = atom(scope.as_ref());
        let entry = self.scopes.entry(scope_atom).or_default();
        for cell in entry.cells.values_mut() {
            cell.flatten();
        }
        entry.locked = true;
        debug!(scope = scope.as_ref(), "scope locked and flattened");
    }

    pub fn is_locked(&self, scope: &str) -> bool {
        self.scopes.get(scope).map(|s| s.locked).unwrap_or(false)
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.contains_key(scope)
    }

    pub fn scope_names(&self) -> Vec<Arc<str>> {
        self.scopes.keys().cloned().collect()
    }

    /// Read a cell, refreshing variable cells on first access
    pub fn fetch(&mut self, scope: &str, name: &str) -> Option<Data> {
        self.scopes
            .get_mut(scope)?
            .cells
            .get_mut(name)
            .map(DataValue::read)
    }

    /// The whole scope as a dictionary value
    pub fn fetch_scope(&mut self, scope: &str) -> Option<Data> {
        let entry = self.scopes.get_mut(scope)?;
        Some(Data::Dictionary(
            entry
                .cells
                .iter_mut()
                .map(|(name, cell)| (name.to_string(), cell.read()))
                .collect(),
        ))
    }

    /// Peek a cell without refreshing (used by tests and observers)
    pub fn cell(&self, scope: &str, name: &str) -> Option<&DataValue> {
        self.scopes.get(scope)?.cells.get(name)
    }

    /// Write a concrete value back into a cell (mutating methods).
    ///
    /// Literal cells are replaced; variable cells memoize the update and
    /// keep their generator. Locked scopes reject writes.
    pub fn write(&mut self, scope: &str, name: &str, data: Data) -> Result<()> {
        let entry = self
            .scopes
            .get_mut(scope)
            .ok_or_else(|| EngineError::Internal {
                reason: format!("write into unknown scope '{}'", scope),
            })?;
        if entry.locked {
            return Err(EngineError::ScopeLocked {
                scope: scope.to_string(),
            });
        }
        match entry.cells.get_mut(name) {
            Some(DataValue::Literal(existing)) => *existing = data,
            Some(DataValue::Variable { cached, .. }) => *cached = Some(data),
            None => {
                entry.cells.insert(atom(name), DataValue::Literal(data));
            }
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────
    // Unsafe host objects
    // ─────────────────────────────────────────────────────────────

    /// Make a host object available to unsafe entities
    pub fn set_unsafe_object(
        &mut self,
        name: impl Into<String>,
        object: Arc<dyn Any + Send + Sync>,
    ) {
        Arc::make_mut(&mut self.unsafe_objects).insert(name.into(), object);
    }

    /// Snapshot of the object map, only when the mode flag allows it
    pub fn unsafe_objects(&self) -> Option<Arc<UnsafeObjects>> {
        if self.object_mode.unsafe_entities {
            Some(Arc::clone(&self.unsafe_objects))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn register_and_fetch() {
        let mut context = Context::new();
        context
            .register_generators(
                DEFAULT_SCOPE,
                [("name".to_string(), DataGenerator::immediate("ada"))],
            )
            .unwrap();

        assert_eq!(
            context.fetch(DEFAULT_SCOPE, "name"),
            Some(Data::string("ada"))
        );
        assert_eq!(context.fetch(DEFAULT_SCOPE, "missing"), None);
    }

    #[test]
    fn lazy_generator_refreshes_and_memoizes() {
        use std::sync::atomic::{AtomicU64, Ordering};

        let counter = Arc::new(AtomicU64::new(0));
        let seen = Arc::clone(&counter);
        let mut context = Context::new();
        context
            .register_generators(
                DEFAULT_SCOPE,
                [(
                    "tick".to_string(),
                    DataGenerator::lazy(DataKind::Int, false, move || {
                        Data::Int(seen.fetch_add(1, Ordering::SeqCst) as i64)
                    }),
                )],
            )
            .unwrap();

        // First read invokes the producer, second serves the memo
        assert_eq!(context.fetch(DEFAULT_SCOPE, "tick"), Some(Data::Int(0)));
        assert_eq!(context.fetch(DEFAULT_SCOPE, "tick"), Some(Data::Int(0)));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn uncache_forces_a_new_refresh() {
        use std::sync::atomic::{AtomicU64, Ordering};

        let counter = Arc::new(AtomicU64::new(0));
        let seen = Arc::clone(&counter);
        let mut context = Context::new();
        context
            .register_generators(
                DEFAULT_SCOPE,
                [(
                    "tick".to_string(),
                    DataGenerator::lazy(DataKind::Int, false, move || {
                        Data::Int(seen.fetch_add(1, Ordering::SeqCst) as i64)
                    }),
                )],
            )
            .unwrap();

        assert_eq!(context.fetch(DEFAULT_SCOPE, "tick"), Some(Data::Int(0)));

        // Reach into the scope and drop the memo
        let mut cell = context.cell(DEFAULT_SCOPE, "tick").unwrap().clone();
        cell.uncache();
        assert!(!cell.cached());
        assert_eq!(cell.read(), Data::Int(1));
    }

    #[test]
    fn locked_scope_flattens_every_cell() {
        let mut context = Context::new();
        context
            .register_generators(
                "server",
                [
                    ("host".to_string(), DataGenerator::immediate("example.org")),
                    (
                        "port".to_string(),
                        DataGenerator::lazy(DataKind::Int, true, || Data::Int(8080)),
                    ),
                ],
            )
            .unwrap();

        context.lock_scope("server");

        assert!(context.is_locked("server"));
        for name in ["host", "port"] {
            let cell = context.cell("server", name).unwrap();
            assert!(cell.is_literal(), "cell '{}' not flattened", name);
            assert!(cell.cached(), "cell '{}' not cached", name);
        }
    }

    #[test]
    fn locked_scope_rejects_registration() {
        let mut context = Context::new();
        context
            .register_generators("server", [("a".to_string(), DataGenerator::immediate(1i64))])
            .unwrap();
        context.lock_scope("server");

        let result = context
            .register_generators("server", [("b".to_string(), DataGenerator::immediate(2i64))]);
        assert!(matches!(result, Err(EngineError::ScopeLocked { .. })));
    }

    #[test]
    fn literal_never_downgrades_to_variable() {
        let mut context = Context::new();
        context
            .set_literal(DEFAULT_SCOPE, "fixed", Data::Int(1))
            .unwrap();

        let result = context.register_generators(
            DEFAULT_SCOPE,
            [(
                "fixed".to_string(),
                DataGenerator::lazy(DataKind::Int, true, || Data::Int(2)),
            )],
        );
        assert!(matches!(result, Err(EngineError::LiteralOverwrite { .. })));

        // Literal-over-literal stays allowed
        assert!(context
            .register_generators(
                DEFAULT_SCOPE,
                [("fixed".to_string(), DataGenerator::immediate(3i64))]
            )
            .is_ok());
    }

    #[test]
    fn generator_map_publishes_itself() {
        let mut generators: FxHashMap<String, DataGenerator> = FxHashMap::default();
        generators.insert("host".to_string(), DataGenerator::immediate("example.org"));
        generators.insert(
            "port".to_string(),
            DataGenerator::lazy(DataKind::Int, true, || Data::Int(8080)),
        );

        let mut context = Context::new();
        context.register_publisher("server", &generators).unwrap();

        assert_eq!(
            context.fetch("server", "host"),
            Some(Data::string("example.org"))
        );
        assert_eq!(context.fetch("server", "port"), Some(Data::Int(8080)));
    }

    #[test]
    fn json_publisher_registers_fields() {
        let mut context = Context::new();
        context
            .register_json(DEFAULT_SCOPE, json!({"user": {"name": "ada"}, "count": 3}))
            .unwrap();

        assert_eq!(context.fetch(DEFAULT_SCOPE, "count"), Some(Data::Int(3)));
        let user = context.fetch(DEFAULT_SCOPE, "user").unwrap();
        assert_eq!(user.stored_type(), DataKind::Dictionary);
    }

    #[test]
    fn fetch_scope_returns_dictionary() {
        let mut context = Context::new();
        context
            .register_generators(
                "server",
                [("host".to_string(), DataGenerator::immediate("example.org"))],
            )
            .unwrap();

        let scope = context.fetch_scope("server").unwrap();
        assert_eq!(
            scope,
            Data::dictionary([("host".to_string(), Data::string("example.org"))])
        );
    }

    #[test]
    fn unsafe_objects_gated_by_mode_flag() {
        let mut context = Context::new();
        context.set_unsafe_object("clock", Arc::new(42u64));

        assert!(context.unsafe_objects().is_none());

        context.object_mode.unsafe_entities = true;
        let objects = context.unsafe_objects().unwrap();
        assert!(objects.contains_key("clock"));
    }
}
