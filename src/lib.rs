//! Stencil - expression/AST evaluation core for a sigil-marked template engine
//!
//! The crate is the evaluation substrate of a template engine: the typed
//! value model, the symbol/parameter algebra, the two-phase resolve/evaluate
//! reduction, and the thread-safe compiled-template cache. The lexer/parser,
//! source loader, renderer driver, and built-in tag library are external
//! collaborators that consume the interfaces exposed here.
//!
//! ## Architecture
//!
//! - `data`: tagged value model with void/nil, errors-as-values, lazy deferral
//! - `variable`: path-structured keys into scoped contexts, built over a
//!   process-wide table of shared name atoms (DashMap)
//! - `symbol`: the uniform resolve/evaluate contract of every AST node
//! - `parameter`: the discriminated AST container with cached structural flags
//! - `expression`: constrained 2-3 operand expressions and their operators
//! - `tuple`: labeled/unlabeled parameter sequences
//! - `entities`: registry of functions and methods, overload validation
//! - `context`: scoped databases of generator-backed values, scope locking
//! - `stack`: the lookup surface carrying policy, frames and definitions
//! - `cache`: compiled-AST store with touch telemetry (parking_lot RwLocks)
//! - `config`: write-once runtime configuration, sealed at first render
//! - `error`: error types with fix suggestions

mod atom;

pub mod cache;
pub mod config;
pub mod context;
pub mod data;
pub mod entities;
pub mod error;
pub mod expression;
pub mod parameter;
pub mod stack;
pub mod symbol;
pub mod tuple;
pub mod variable;

pub use cache::{Ast, AstCache, AstInfo, AstKey, CacheHandle, Touch, TOUCH_ROTATION};
pub use context::{
    Context, ContextPublisher, DataGenerator, DataValue, ObjectMode, UnsafeObjects,
    DEFAULT_SCOPE,
};
pub use data::{Data, DataError, DataKind, LazyData};
pub use entities::{CallParameter, CallValues, Entities, Function, Method};
pub use error::{EngineError, ErrorKind, FixSuggestion, Result, SourceLocation};
pub use expression::{Expression, ExpressionForm, Operator};
pub use parameter::{Callee, Container, FunctionCall, Keyword, MethodStyle, Parameter};
pub use stack::{Definition, VarStack};
pub use symbol::Symbol;
pub use tuple::Tuple;
pub use variable::{Segment, SymbolSet, Variable};
