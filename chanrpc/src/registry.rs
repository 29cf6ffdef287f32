//! Operation registry.
//!
//! Maps ids to operations of one of three fixed shapes. The registry is
//! filled in before the server is shared and is read-only afterwards, so
//! lookups need no synchronization.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use tracing::debug;

use crate::envelope::Output;
use crate::{CallError, CallResult};

/// Arity class of an operation: what it hands back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    /// Returns nothing.
    Zero,
    /// Returns a single value.
    One,
    /// Returns a sequence of values.
    Many,
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Zero => write!(f, "0"),
            Shape::One => write!(f, "1"),
            Shape::Many => write!(f, "n"),
        }
    }
}

type ZeroFn<V> = dyn Fn(Vec<V>) + Send + Sync;
type OneFn<V> = dyn Fn(Vec<V>) -> V + Send + Sync;
type ManyFn<V> = dyn Fn(Vec<V>) -> Vec<V> + Send + Sync;

/// A registered operation.
///
/// Every operation takes its arguments as a `Vec<V>`; the variant fixes what
/// comes back.
pub enum Operation<V> {
    /// Takes arguments, returns nothing.
    Zero(Arc<ZeroFn<V>>),
    /// Takes arguments, returns one value.
    One(Arc<OneFn<V>>),
    /// Takes arguments, returns a sequence.
    Many(Arc<ManyFn<V>>),
}

impl<V> Operation<V> {
    /// Wraps a closure that returns nothing.
    pub fn zero<F>(f: F) -> Self
    where
        F: Fn(Vec<V>) + Send + Sync + 'static,
    {
        Operation::Zero(Arc::new(f))
    }

    /// Wraps a closure that returns a single value.
    pub fn one<F>(f: F) -> Self
    where
        F: Fn(Vec<V>) -> V + Send + Sync + 'static,
    {
        Operation::One(Arc::new(f))
    }

    /// Wraps a closure that returns a sequence.
    pub fn many<F>(f: F) -> Self
    where
        F: Fn(Vec<V>) -> Vec<V> + Send + Sync + 'static,
    {
        Operation::Many(Arc::new(f))
    }

    pub fn shape(&self) -> Shape {
        match self {
            Operation::Zero(_) => Shape::Zero,
            Operation::One(_) => Shape::One,
            Operation::Many(_) => Shape::Many,
        }
    }

    /// Runs the operation and packages its result according to its shape.
    pub(crate) fn invoke(&self, args: Vec<V>) -> Output<V> {
        match self {
            Operation::Zero(f) => {
                f(args);
                Output::Unit
            }
            Operation::One(f) => Output::One(f(args)),
            Operation::Many(f) => Output::Many(f(args)),
        }
    }
}

impl<V> Clone for Operation<V> {
    fn clone(&self) -> Self {
        match self {
            Operation::Zero(f) => Operation::Zero(Arc::clone(f)),
            Operation::One(f) => Operation::One(Arc::clone(f)),
            Operation::Many(f) => Operation::Many(Arc::clone(f)),
        }
    }
}

impl<V> fmt::Debug for Operation<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Operation({})", self.shape())
    }
}

/// Id to operation mapping owned by a server.
pub struct Registry<K, V> {
    functions: HashMap<K, Operation<V>>,
}

impl<K, V> Default for Registry<K, V> {
    fn default() -> Self {
        Self {
            functions: HashMap::new(),
        }
    }
}

impl<K, V> Registry<K, V>
where
    K: Eq + Hash + fmt::Debug,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `operation` under `id`.
    ///
    /// # Panics
    /// Panics if `id` is already registered. Duplicate ids are a wiring bug,
    /// not a runtime condition.
    pub fn register(&mut self, id: K, operation: Operation<V>) {
        if self.functions.contains_key(&id) {
            panic!("function id {id:?}: already registered");
        }

        debug!(id = ?id, shape = %operation.shape(), "registered operation");
        self.functions.insert(id, operation);
    }

    pub fn get<Q>(&self, id: &Q) -> Option<&Operation<V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.functions.get(id)
    }

    /// Looks up `id` and checks that it was registered with `shape`.
    pub fn resolve<Q>(&self, id: &Q, shape: Shape) -> CallResult<Operation<V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + fmt::Debug + ?Sized,
    {
        let operation = self.get(id).ok_or_else(|| CallError::NotRegistered {
            id: format!("{id:?}"),
        })?;

        if operation.shape() != shape {
            return Err(CallError::ShapeMismatch {
                id: format!("{id:?}"),
                registered: operation.shape(),
                requested: shape,
            });
        }

        Ok(operation.clone())
    }

    pub fn contains<Q>(&self, id: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.functions.contains_key(id)
    }

    pub fn shape_of<Q>(&self, id: &Q) -> Option<Shape>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get(id).map(Operation::shape)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Registry<&'static str, i64> {
        let mut registry = Registry::new();
        registry.register("noop", Operation::zero(|_| {}));
        registry.register("add", Operation::one(|args: Vec<i64>| args[0] + args[1]));
        registry.register("split", Operation::many(|args: Vec<i64>| args));
        registry
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = registry();

        assert_eq!(registry.len(), 3);
        assert!(!registry.is_empty());
        assert!(registry.contains("add"));
        assert!(!registry.contains("sub"));
        assert_eq!(registry.shape_of("noop"), Some(Shape::Zero));
        assert_eq!(registry.shape_of("add"), Some(Shape::One));
        assert_eq!(registry.shape_of("split"), Some(Shape::Many));
        assert_eq!(registry.shape_of("sub"), None);
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn test_duplicate_id_panics() {
        let mut registry = registry();
        registry.register("add", Operation::one(|args: Vec<i64>| args[0]));
    }

    #[test]
    fn test_resolve() {
        let registry = registry();

        let add = registry.resolve("add", Shape::One).unwrap();
        assert!(matches!(add.invoke(vec![2, 3]), Output::One(5)));

        let split = registry.resolve("split", Shape::Many).unwrap();
        assert!(matches!(split.invoke(vec![1, 2]), Output::Many(v) if v == vec![1, 2]));
    }

    #[test]
    fn test_resolve_unknown_id() {
        let registry = registry();

        let err = registry.resolve("sub", Shape::One).unwrap_err();
        assert_eq!(
            err,
            CallError::NotRegistered {
                id: "\"sub\"".to_string()
            }
        );
        assert_eq!(err.to_string(), "function id \"sub\": function not registered");
    }

    #[test]
    fn test_resolve_shape_mismatch() {
        let registry = registry();

        let err = registry.resolve("add", Shape::Many).unwrap_err();
        assert_eq!(
            err,
            CallError::ShapeMismatch {
                id: "\"add\"".to_string(),
                registered: Shape::One,
                requested: Shape::Many,
            }
        );
    }

    #[test]
    fn test_operation_debug() {
        let op: Operation<i64> = Operation::many(|args| args);
        assert_eq!(format!("{op:?}"), "Operation(n)");
    }
}
