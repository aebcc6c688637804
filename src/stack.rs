//! The lookup surface passed through resolution and evaluation
//!
//! A `VarStack` borrows the render's [`Context`], carries its policy record,
//! the iteration frames the renderer pushes (each with a `self` target and
//! locals), the scoped block definitions `Evaluate` resolves against, and the
//! entity registry the render was given.
//!
//! A missing variable yields an errored Data with the missing-variable kind;
//! whether that propagates or decays to nil is the caller's policy decision.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::warn;

use crate::atom::atom;
use crate::context::{Context, UnsafeObjects, DEFAULT_SCOPE};
use crate::data::Data;
use crate::entities::Entities;
use crate::error::ErrorKind;
use crate::parameter::Parameter;
use crate::variable::{Segment, Variable};

/// A scoped block definition: either a literal bound by the renderer or an
/// evaluable AST subtree evaluated in place
#[derive(Debug, Clone, PartialEq)]
pub enum Definition {
    Literal(Data),
    Evaluable(Parameter),
}

/// One iteration frame: the implicit `self` target plus loop locals
#[derive(Debug, Default)]
struct Frame {
    target: Option<Data>,
    locals: FxHashMap<Arc<str>, Data>,
}

pub struct VarStack<'ctx> {
    context: &'ctx mut Context,
    entities: Arc<Entities>,
    frames: Vec<Frame>,
    defines: FxHashMap<Arc<str>, Definition>,
}

impl<'ctx> VarStack<'ctx> {
    /// A stack over the process-default entity registry. This is "the first
    /// borrow by a render": it seals the runtime configuration.
    pub fn new(context: &'ctx mut Context) -> Self {
        let entities = crate::config::seal_and_borrow();
        Self::with_entities(context, entities)
    }

    /// A stack over an explicit registry
    pub fn with_entities(context: &'ctx mut Context, entities: Arc<Entities>) -> Self {
        Self {
            context,
            entities,
            frames: Vec::new(),
            defines: FxHashMap::default(),
        }
    }

    pub fn entities(&self) -> Arc<Entities> {
        Arc::clone(&self.entities)
    }

    /// Strict mode: errored lookups propagate instead of decaying to nil
    pub fn missing_variable_throws(&self) -> bool {
        self.context.missing_variable_throws
    }

    pub fn unsafe_objects(&self) -> Option<Arc<UnsafeObjects>> {
        self.context.unsafe_objects()
    }

    pub fn context(&self) -> &Context {
        self.context
    }

    // ─────────────────────────────────────────────────────────────
    // Frames and definitions (renderer-facing)
    // ─────────────────────────────────────────────────────────────

    pub fn push_frame(&mut self, target: Option<Data>) {
        self.frames.push(Frame {
            target,
            locals: FxHashMap::default(),
        });
    }

    pub fn pop_frame(&mut self) {
        self.frames.pop();
    }

    pub fn set_local(&mut self, name: impl AsRef<str>, value: Data) {
        if let Some(frame) = self.frames.last_mut() {
            frame.locals.insert(atom(name.as_ref()), value);
        }
    }

    pub fn define(&mut self, name: impl AsRef<str>, definition: Definition) {
        self.defines.insert(atom(name.as_ref()), definition);
    }

    pub fn undefine(&mut self, name: &str) {
        self.defines.remove(name);
    }

    pub fn definition(&self, name: &str) -> Option<&Definition> {
        self.defines.get(name)
    }

    // ─────────────────────────────────────────────────────────────
    // Lookup and update
    // ─────────────────────────────────────────────────────────────

    /// Dot-path resolution with scope fallback
    pub fn match_variable(&mut self, variable: &Variable) -> Data {
        if variable.is_define() {
            let definition = self.defines.get(variable.base()).cloned();
            return match definition {
                Some(Definition::Literal(data)) => data,
                Some(Definition::Evaluable(parameter)) => {
                    crate::symbol::Symbol::evaluate(&parameter, self)
                }
                None => miss(variable),
            };
        }

        let base = match self.base_value(variable) {
            Some(data) => data,
            None => return miss(variable),
        };
        walk(base, variable.segments()).unwrap_or_else(|| miss(variable))
    }

    /// Write a concrete value back through a variable key (mutating methods)
    pub fn update(&mut self, variable: &Variable, value: Data) -> bool {
        if variable.is_define() {
            warn!(variable = %variable, "update targeting a definition is ignored");
            return false;
        }

        // Frame-held bases update in place
        let base = variable.base();
        for frame in self.frames.iter_mut().rev() {
            if &**base == "self" {
                if let Some(target) = frame.target.as_mut() {
                    return set_path(target, variable.segments(), value);
                }
            } else if let Some(local) = frame.locals.get_mut(base) {
                return set_path(local, variable.segments(), value);
            }
        }

        // Context cells: read, mutate along the path, write back
        let scope = variable
            .scope()
            .cloned()
            .unwrap_or_else(|| atom(DEFAULT_SCOPE));
        if variable.segments().is_empty() {
            match self.context.write(&scope, base, value) {
                Ok(()) => true,
                Err(error) => {
                    warn!(variable = %variable, %error, "context rejected update");
                    false
                }
            }
        } else {
            let Some(mut current) = self.context.fetch(&scope, base) else {
                return false;
            };
            if !set_path(&mut current, variable.segments(), value) {
                return false;
            }
            match self.context.write(&scope, base, current) {
                Ok(()) => true,
                Err(error) => {
                    warn!(variable = %variable, %error, "context rejected update");
                    false
                }
            }
        }
    }

    /// The base value a variable's path walks from
    fn base_value(&mut self, variable: &Variable) -> Option<Data> {
        if let Some(scope) = variable.scope() {
            let scope = Arc::clone(scope);
            return if variable.base().is_empty() {
                self.context.fetch_scope(&scope)
            } else {
                self.context.fetch(&scope, variable.base())
            };
        }

        let base = variable.base();
        for frame in self.frames.iter().rev() {
            if &**base == "self" {
                if let Some(target) = &frame.target {
                    return Some(target.clone());
                }
            } else if let Some(local) = frame.locals.get(base) {
                return Some(local.clone());
            }
        }

        self.context.fetch(DEFAULT_SCOPE, base)
    }
}

fn miss(variable: &Variable) -> Data {
    Data::error(
        ErrorKind::MissingVariable,
        format!("unable to bind '{}'", variable),
    )
}

/// Follow member/subscript segments through a value
fn walk(mut current: Data, segments: &[Segment]) -> Option<Data> {
    for segment in segments {
        current = current.evaluate();
        current = match (segment, current) {
            (Segment::Member(name), Data::Dictionary(mut map)) => map.remove(&**name)?,
            (Segment::Index(i), Data::Array(items)) => items.into_iter().nth(*i)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Set a nested position inside a value, in place
fn set_path(target: &mut Data, segments: &[Segment], value: Data) -> bool {
    match segments {
        [] => {
            *target = value;
            true
        }
        [first, rest @ ..] => match (first, target) {
            (Segment::Member(name), Data::Dictionary(map)) => match map.get_mut(&**name) {
                Some(inner) => set_path(inner, rest, value),
                None => false,
            },
            (Segment::Index(i), Data::Array(items)) => match items.get_mut(*i) {
                Some(inner) => set_path(inner, rest, value),
                None => false,
            },
            _ => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::DataGenerator;
    use crate::symbol::Symbol;
    use serde_json::json;

    fn user_context() -> Context {
        let mut context = Context::new();
        context
            .register_json(DEFAULT_SCOPE, json!({"user": {"name": "ada"}}))
            .unwrap();
        context
    }

    #[test]
    fn bound_variable_matches() {
        let mut context = user_context();
        let mut stack = VarStack::new(&mut context);

        let name = Variable::named("user").member("name");
        assert_eq!(stack.match_variable(&name), Data::string("ada"));
    }

    #[test]
    fn unbound_variable_is_a_missing_variable_fault() {
        let mut context = Context::new();
        let mut stack = VarStack::new(&mut context);

        let ghost = Variable::named("ghost");
        let result = stack.match_variable(&ghost);
        assert!(result.errored());
        assert_eq!(
            result.fault_ref().unwrap().kind,
            ErrorKind::MissingVariable
        );
    }

    #[test]
    fn parameter_evaluation_applies_policy() {
        // Scenario: unbound variable, strict vs. soft
        let parameter = Parameter::variable(Variable::named("user").member("name"));

        let mut strict = Context::new();
        strict.missing_variable_throws = true;
        let mut stack = VarStack::new(&mut strict);
        assert!(parameter.evaluate(&mut stack).errored());

        let mut soft = Context::new();
        let mut stack = VarStack::new(&mut soft);
        assert_eq!(parameter.evaluate(&mut stack), Data::Void);
    }

    #[test]
    fn frames_shadow_the_default_scope() {
        let mut context = user_context();
        let mut stack = VarStack::new(&mut context);
        stack.push_frame(None);
        stack.set_local("user", Data::string("frame-bound"));

        assert_eq!(
            stack.match_variable(&Variable::named("user")),
            Data::string("frame-bound")
        );

        stack.pop_frame();
        let through = stack.match_variable(&Variable::named("user"));
        assert_eq!(through.stored_type(), crate::data::DataKind::Dictionary);
    }

    #[test]
    fn self_binds_to_the_innermost_frame_target() {
        let mut context = Context::new();
        let mut stack = VarStack::new(&mut context);
        stack.push_frame(Some(Data::Int(7)));

        assert_eq!(stack.match_variable(&Variable::own()), Data::Int(7));
        stack.push_frame(Some(Data::Int(9)));
        assert_eq!(stack.match_variable(&Variable::own()), Data::Int(9));
    }

    #[test]
    fn scoped_variable_reads_its_scope_only() {
        let mut context = Context::new();
        context
            .register_generators("server", [("host".to_string(), DataGenerator::immediate("a"))])
            .unwrap();
        let mut stack = VarStack::new(&mut context);

        assert_eq!(
            stack.match_variable(&Variable::in_scope("server", "host")),
            Data::string("a")
        );
        assert!(stack
            .match_variable(&Variable::named("host"))
            .errored());
    }

    #[test]
    fn scope_root_resolves_to_dictionary() {
        let mut context = Context::new();
        context
            .register_generators("server", [("host".to_string(), DataGenerator::immediate("a"))])
            .unwrap();
        let mut stack = VarStack::new(&mut context);

        let root = stack.match_variable(&Variable::scope_root("server"));
        assert_eq!(root.stored_type(), crate::data::DataKind::Dictionary);
    }

    #[test]
    fn update_writes_through_to_context() {
        let mut context = user_context();
        let mut stack = VarStack::new(&mut context);

        let name = Variable::named("user").member("name");
        assert!(stack.update(&name, Data::string("grace")));
        assert_eq!(stack.match_variable(&name), Data::string("grace"));
    }

    #[test]
    fn update_respects_locked_scopes() {
        let mut context = Context::new();
        context
            .register_generators("server", [("host".to_string(), DataGenerator::immediate("a"))])
            .unwrap();
        context.lock_scope("server");
        let mut stack = VarStack::new(&mut context);

        assert!(!stack.update(&Variable::in_scope("server", "host"), Data::string("b")));
    }

    #[test]
    fn definitions_resolve_through_define_variables() {
        let mut context = Context::new();
        let mut stack = VarStack::new(&mut context);
        stack.define("header", Definition::Literal(Data::string("Welcome")));

        assert_eq!(
            stack.match_variable(&Variable::define("header")),
            Data::string("Welcome")
        );
        assert!(stack
            .match_variable(&Variable::define("footer"))
            .errored());
    }
}
