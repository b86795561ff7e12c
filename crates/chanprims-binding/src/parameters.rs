//! A typed property bag that travels with a build.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Values keyed by their type, at most one per type.
///
/// Cloning is shallow: the clone sees the same values, and inserts into one
/// copy are invisible to the other.
#[derive(Clone, Default)]
pub struct BindingParameterCollection {
    values: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl BindingParameterCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value`, returning whatever value of the same type it replaced.
    pub fn insert<T: Any + Send + Sync>(&mut self, value: T) -> Option<Arc<T>> {
        self.insert_arc(Arc::new(value))
    }

    pub fn insert_arc<T: Any + Send + Sync>(&mut self, value: Arc<T>) -> Option<Arc<T>> {
        self.values
            .insert(TypeId::of::<T>(), value)
            .and_then(|old| old.downcast::<T>().ok())
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.get_any(TypeId::of::<T>())
            .and_then(|value| value.downcast::<T>().ok())
    }

    pub fn get_any(&self, type_id: TypeId) -> Option<Arc<dyn Any + Send + Sync>> {
        self.values.get(&type_id).cloned()
    }

    pub fn remove<T: Any + Send + Sync>(&mut self) -> Option<Arc<T>> {
        self.values
            .remove(&TypeId::of::<T>())
            .and_then(|value| value.downcast::<T>().ok())
    }

    pub fn contains<T: Any + Send + Sync>(&self) -> bool {
        self.values.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for BindingParameterCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingParameterCollection")
            .field("len", &self.values.len())
            .finish()
    }
}
