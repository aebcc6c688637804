//! Compiled-template cache with usage telemetry
//!
//! A concurrent map from AST key to compiled AST, paired with a map from key
//! to [`Touch`] usage aggregates. Two reader/writer locks guard the two maps.
//! Lock ordering is invariant: **cache before touch**, never the reverse;
//! `remove` takes the locks sequentially, not nested.
//!
//! Telemetry rotates on the read path: once a key accumulates
//! [`TOUCH_ROTATION`] touches, the next retrieve swaps the Touch for empty
//! and folds the drained values into the AST's own [`AstInfo`].

use std::hash::Hasher;
use std::mem;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHasher};
use tracing::{debug, warn};

use crate::error::{EngineError, Result};
use crate::parameter::Parameter;
use crate::symbol::Symbol;
use crate::variable::SymbolSet;

/// Touches accumulated before the read path drains them into the AST info.
/// A power of two, so a masked fast path stays available if ever needed.
pub const TOUCH_ROTATION: u32 = 128;

/// Content-and-name fingerprint of a compiled template
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AstKey {
    name: Arc<str>,
    fingerprint: u64,
}

impl AstKey {
    pub fn new(name: impl AsRef<str>, source: &str) -> Self {
        let mut hasher = FxHasher::default();
        hasher.write(source.as_bytes());
        Self {
            name: crate::atom::atom(name.as_ref()),
            fingerprint: hasher.finish(),
        }
    }

    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }
}

impl std::fmt::Display for AstKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{:016x}", self.name, self.fingerprint)
    }
}

/// Per-retrieval usage aggregate
///
/// The empty Touch is distinguishable from any non-trivial one: even a
/// zero-duration render carries `count >= 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Touch {
    pub count: u32,
    pub exec_time: Duration,
    pub size_hint: u32,
}

impl Touch {
    pub const EMPTY: Touch = Touch {
        count: 0,
        exec_time: Duration::ZERO,
        size_hint: 0,
    };

    /// A single render's footprint
    pub fn once(exec_time: Duration, size_hint: u32) -> Self {
        Self {
            count: 1,
            exec_time,
            size_hint,
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::EMPTY
    }

    /// Merge another aggregate: counts and times add, size hints keep the max
    pub fn aggregate(&mut self, other: Touch) {
        self.count = self.count.saturating_add(other.count);
        self.exec_time = self.exec_time.saturating_add(other.exec_time);
        self.size_hint = self.size_hint.max(other.size_hint);
    }
}

impl Default for Touch {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Symbol dependencies and render statistics of a compiled AST
#[derive(Debug, Clone, Default)]
pub struct AstInfo {
    /// Variables the template needs bound to render fully
    pub symbols: SymbolSet,
    /// Output-size lower bound summed from the tree
    pub underestimated_size: usize,
    /// Total renders folded in from touches
    pub renders: u64,
    /// Cumulative render time folded in from touches
    pub total_exec: Duration,
    /// Largest serialized-size estimate observed
    pub max_size_hint: u32,
}

impl AstInfo {
    pub fn average_exec(&self) -> Duration {
        if self.renders == 0 {
            Duration::ZERO
        } else {
            self.total_exec / self.renders as u32
        }
    }

    fn fold(&mut self, touch: Touch) {
        self.renders += u64::from(touch.count);
        self.total_exec = self.total_exec.saturating_add(touch.exec_time);
        self.max_size_hint = self.max_size_hint.max(touch.size_hint);
    }
}

/// A compiled template: immutable post-insert except for its telemetry info,
/// which is mutated only during read-path rotations under the touch lock
#[derive(Debug)]
pub struct Ast {
    key: AstKey,
    root: Vec<Parameter>,
    info: RwLock<AstInfo>,
}

impl Ast {
    pub fn new(key: AstKey, root: Vec<Parameter>) -> Self {
        let mut symbols = SymbolSet::new();
        let mut underestimated_size = 0;
        for parameter in &root {
            symbols.extend(parameter.symbols());
            underestimated_size += parameter.underestimated_size();
        }
        Self {
            key,
            root,
            info: RwLock::new(AstInfo {
                symbols,
                underestimated_size,
                ..AstInfo::default()
            }),
        }
    }

    pub fn key(&self) -> &AstKey {
        &self.key
    }

    pub fn root(&self) -> &[Parameter] {
        &self.root
    }

    /// Snapshot of the current info
    pub fn info(&self) -> AstInfo {
        self.info.read().clone()
    }

    fn fold_touch(&self, touch: Touch) {
        self.info.write().fold(touch);
    }
}

/// Thread-safe compiled-AST store with touch telemetry
#[derive(Default)]
pub struct AstCache {
    cache: RwLock<FxHashMap<AstKey, Arc<Ast>>>,
    touches: RwLock<FxHashMap<AstKey, Touch>>,
}

impl AstCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a compiled AST. An existing key fails unless `replace` is set;
    /// the Touch entry is initialized empty either way.
    pub fn insert(&self, ast: Ast, replace: bool) -> Result<Arc<Ast>> {
        let mut cache = self.cache.write();
        if cache.contains_key(&ast.key) && !replace {
            return Err(EngineError::KeyExists {
                name: ast.key.name.to_string(),
            });
        }
        let key = ast.key.clone();
        let shared = Arc::new(ast);
        cache.insert(key.clone(), Arc::clone(&shared));
        self.touches.write().insert(key, Touch::EMPTY);
        debug!(key = %shared.key, "cached compiled template");
        Ok(shared)
    }

    /// Fetch a compiled AST, rotating its telemetry past the threshold
    pub fn retrieve(&self, key: &AstKey) -> Option<Arc<Ast>> {
        let cache = self.cache.read();
        let ast = Arc::clone(cache.get(key)?);

        let mut touches = self.touches.write();
        if let Some(entry) = touches.get_mut(key) {
            if entry.count >= TOUCH_ROTATION {
                let drained = mem::replace(entry, Touch::EMPTY);
                ast.fold_touch(drained);
                debug!(key = %key, count = drained.count, "rotated touch telemetry");
            }
        }
        Some(ast)
    }

    /// Merge a usage aggregate for a key; unknown keys are silently ignored
    pub fn touch(&self, key: &AstKey, values: Touch) {
        let mut touches = self.touches.write();
        if let Some(entry) = touches.get_mut(key) {
            entry.aggregate(values);
        }
    }

    /// Drop a cached AST. `None` when the key was absent, `Some(true)` after
    /// a removal. Undrained telemetry is discarded.
    pub fn remove(&self, key: &AstKey) -> Option<bool> {
        let removed = self.touches.write().remove(key)?;
        if !removed.is_empty() {
            warn!(key = %key, count = removed.count, "discarding undrained telemetry");
        }
        self.cache.write().remove(key);
        Some(true)
    }

    /// Info snapshot with the same rotation discipline as `retrieve`, except
    /// any nonempty Touch folds in regardless of the threshold
    pub fn info(&self, key: &AstKey) -> Option<AstInfo> {
        let cache = self.cache.read();
        let ast = cache.get(key)?;

        let mut touches = self.touches.write();
        if let Some(entry) = touches.get_mut(key) {
            if !entry.is_empty() {
                let drained = mem::replace(entry, Touch::EMPTY);
                ast.fold_touch(drained);
            }
        }
        Some(ast.info())
    }

    /// Clear both maps (cache lock first, touch lock nested)
    pub fn drop_all(&self) {
        let mut cache = self.cache.write();
        let mut touches = self.touches.write();
        cache.clear();
        touches.clear();
    }

    pub fn count(&self) -> usize {
        self.cache.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.read().is_empty()
    }

    pub fn keys(&self) -> Vec<AstKey> {
        self.cache.read().keys().cloned().collect()
    }
}

/// Future-returning adapter over the synchronous cache
///
/// The cache's critical sections are short and never suspend; the adapter
/// merely schedules the synchronous call onto the caller's runtime.
#[derive(Clone)]
pub struct CacheHandle {
    cache: Arc<AstCache>,
    handle: tokio::runtime::Handle,
}

impl CacheHandle {
    pub fn new(cache: Arc<AstCache>, handle: tokio::runtime::Handle) -> Self {
        Self { cache, handle }
    }

    pub async fn insert(&self, ast: Ast, replace: bool) -> Result<Arc<Ast>> {
        let cache = Arc::clone(&self.cache);
        self.handle
            .spawn_blocking(move || cache.insert(ast, replace))
            .await
            .map_err(|join| EngineError::Background {
                reason: join.to_string(),
            })?
    }

    pub async fn retrieve(&self, key: AstKey) -> Option<Arc<Ast>> {
        let cache = Arc::clone(&self.cache);
        self.handle
            .spawn_blocking(move || cache.retrieve(&key))
            .await
            .ok()
            .flatten()
    }

    pub async fn touch(&self, key: AstKey, values: Touch) {
        let cache = Arc::clone(&self.cache);
        let _ = self
            .handle
            .spawn_blocking(move || cache.touch(&key, values))
            .await;
    }

    pub async fn remove(&self, key: AstKey) -> Option<bool> {
        let cache = Arc::clone(&self.cache);
        self.handle
            .spawn_blocking(move || cache.remove(&key))
            .await
            .ok()
            .flatten()
    }

    pub async fn info(&self, key: AstKey) -> Option<AstInfo> {
        let cache = Arc::clone(&self.cache);
        self.handle
            .spawn_blocking(move || cache.info(&key))
            .await
            .ok()
            .flatten()
    }

    pub async fn drop_all(&self) {
        let cache = Arc::clone(&self.cache);
        let _ = self.handle.spawn_blocking(move || cache.drop_all()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Data;

    fn ast(name: &str, source: &str) -> Ast {
        Ast::new(
            AstKey::new(name, source),
            vec![Parameter::value(Data::string(source))],
        )
    }

    #[test]
    fn key_fingerprints_content_and_name() {
        let a = AstKey::new("welcome", "hello #(name)");
        let same = AstKey::new("welcome", "hello #(name)");
        let renamed = AstKey::new("goodbye", "hello #(name)");
        let edited = AstKey::new("welcome", "hello #(user)");

        assert_eq!(a, same);
        assert_ne!(a, renamed);
        assert_ne!(a, edited);
    }

    #[test]
    fn insert_and_retrieve() {
        let cache = AstCache::new();
        let stored = cache.insert(ast("welcome", "hi"), false).unwrap();

        let fetched = cache.retrieve(stored.key()).unwrap();
        assert!(Arc::ptr_eq(&stored, &fetched));
        assert_eq!(cache.count(), 1);
        assert!(!cache.is_empty());
    }

    #[test]
    fn duplicate_insert_fails_without_replace() {
        // Scenario: insert(k, A); insert(k, B, replace=false) fails;
        // retrieve(k) still returns A.
        let cache = AstCache::new();
        let first = cache.insert(ast("page", "A"), false).unwrap();

        let same_key = Ast::new(first.key().clone(), vec![Parameter::value(Data::string("B"))]);
        let result = cache.insert(same_key, false);
        assert!(matches!(result, Err(EngineError::KeyExists { .. })));

        let fetched = cache.retrieve(first.key()).unwrap();
        assert!(Arc::ptr_eq(&first, &fetched));
    }

    #[test]
    fn replace_swaps_the_ast() {
        let cache = AstCache::new();
        let first = cache.insert(ast("page", "A"), false).unwrap();
        let replacement =
            Ast::new(first.key().clone(), vec![Parameter::value(Data::string("B"))]);

        let second = cache.insert(replacement, true).unwrap();
        let fetched = cache.retrieve(first.key()).unwrap();
        assert!(Arc::ptr_eq(&second, &fetched));
    }

    #[test]
    fn touch_threshold_rotates_on_retrieve() {
        // Scenario: touch(k, t) x128 then retrieve(k): touches[k] empties and
        // the AST info reflects the aggregate.
        let cache = AstCache::new();
        let stored = cache.insert(ast("page", "A"), false).unwrap();
        let key = stored.key().clone();

        for _ in 0..TOUCH_ROTATION {
            cache.touch(&key, Touch::once(Duration::from_millis(2), 64));
        }
        // Pre-rotation: nothing folded yet
        assert_eq!(stored.info().renders, 0);

        let _ = cache.retrieve(&key).unwrap();
        let info = stored.info();
        assert_eq!(info.renders, u64::from(TOUCH_ROTATION));
        assert_eq!(info.total_exec, Duration::from_millis(2 * u64::from(TOUCH_ROTATION)));
        assert_eq!(info.max_size_hint, 64);

        // The touch entry is empty again: another retrieve folds nothing new
        let _ = cache.retrieve(&key).unwrap();
        assert_eq!(stored.info().renders, u64::from(TOUCH_ROTATION));
    }

    #[test]
    fn below_threshold_retrieve_does_not_rotate() {
        let cache = AstCache::new();
        let stored = cache.insert(ast("page", "A"), false).unwrap();
        let key = stored.key().clone();

        cache.touch(&key, Touch::once(Duration::from_millis(1), 8));
        let _ = cache.retrieve(&key).unwrap();
        assert_eq!(stored.info().renders, 0);
    }

    #[test]
    fn info_drains_any_nonempty_touch() {
        let cache = AstCache::new();
        let stored = cache.insert(ast("page", "A"), false).unwrap();
        let key = stored.key().clone();

        cache.touch(&key, Touch::once(Duration::from_millis(3), 16));
        let info = cache.info(&key).unwrap();
        assert_eq!(info.renders, 1);
        assert_eq!(info.total_exec, Duration::from_millis(3));
    }

    #[test]
    fn touch_on_unknown_key_is_ignored() {
        let cache = AstCache::new();
        cache.touch(
            &AstKey::new("ghost", ""),
            Touch::once(Duration::from_millis(1), 1),
        );
        assert!(cache.is_empty());
    }

    #[test]
    fn remove_distinguishes_absent_from_present() {
        let cache = AstCache::new();
        let stored = cache.insert(ast("page", "A"), false).unwrap();
        let key = stored.key().clone();

        assert_eq!(cache.remove(&AstKey::new("ghost", "")), None);
        assert_eq!(cache.remove(&key), Some(true));
        assert_eq!(cache.remove(&key), None);
        assert!(cache.retrieve(&key).is_none());
    }

    #[test]
    fn drop_all_clears_everything() {
        let cache = AstCache::new();
        cache.insert(ast("a", "1"), false).unwrap();
        cache.insert(ast("b", "2"), false).unwrap();
        assert_eq!(cache.keys().len(), 2);

        cache.drop_all();
        assert!(cache.is_empty());
        assert!(cache.keys().is_empty());
    }

    #[test]
    fn ast_info_collects_symbols_and_size() {
        let root = vec![
            Parameter::value(Data::string("hello ")),
            Parameter::variable(crate::variable::Variable::named("name")),
        ];
        let ast = Ast::new(AstKey::new("page", "hello #(name)"), root);
        let info = ast.info();

        assert_eq!(info.symbols.len(), 1);
        assert_eq!(info.underestimated_size, 32);
    }

    #[test]
    fn concurrent_use_preserves_lock_order() {
        use std::thread;

        let cache = Arc::new(AstCache::new());
        let stored = cache.insert(ast("shared", "A"), false).unwrap();
        let key = stored.key().clone();

        let mut handles = vec![];
        for worker in 0..8 {
            let cache = Arc::clone(&cache);
            let key = key.clone();
            handles.push(thread::spawn(move || {
                for i in 0..200 {
                    match (worker + i) % 4 {
                        0 => {
                            let _ = cache.retrieve(&key);
                        }
                        1 => cache.touch(&key, Touch::once(Duration::from_micros(5), 32)),
                        2 => {
                            let _ = cache.info(&key);
                        }
                        _ => {
                            let _ = cache.insert(
                                Ast::new(
                                    AstKey::new(format!("w{}-{}", worker, i), "B"),
                                    vec![Parameter::value(Data::Int(i))],
                                ),
                                false,
                            );
                        }
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        // Every touch was either pending or folded; none lost
        let folded = cache.info(&key).unwrap().renders;
        assert_eq!(folded, (8 * 200 / 4) as u64);
    }

    #[tokio::test]
    async fn async_facade_wraps_sync_cache() {
        let cache = Arc::new(AstCache::new());
        let handle = CacheHandle::new(Arc::clone(&cache), tokio::runtime::Handle::current());

        let stored = handle.insert(ast("page", "A"), false).await.unwrap();
        let fetched = handle.retrieve(stored.key().clone()).await.unwrap();
        assert!(Arc::ptr_eq(&stored, &fetched));

        handle
            .touch(stored.key().clone(), Touch::once(Duration::from_millis(1), 4))
            .await;
        let info = handle.info(stored.key().clone()).await.unwrap();
        assert_eq!(info.renders, 1);

        assert_eq!(handle.remove(stored.key().clone()).await, Some(true));
        handle.drop_all().await;
        assert!(cache.is_empty());
    }
}
