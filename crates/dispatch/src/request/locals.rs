use std::any::Any;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;

type AnyValue = Box<dyn Any + Send + Sync>;

/// Per request key/value storage shared by the steps of one middleware chain.
///
/// Values are stored type-erased and read back with the type they were stored with; a
/// lookup with the wrong type behaves like a missing key.
///
/// # Example
/// ```
/// use micro_dispatch::Locals;
///
/// let mut locals = Locals::default();
/// locals.insert("user_id", 42_u64);
/// assert_eq!(locals.get::<u64>("user_id"), Some(&42));
/// assert_eq!(locals.get::<String>("user_id"), None);
/// ```
#[derive(Default)]
pub struct Locals {
    inner: HashMap<Cow<'static, str>, AnyValue>,
}

impl Locals {
    /// Stores `value` under `key`, returning the previous value if it had the same type.
    pub fn insert<T>(&mut self, key: impl Into<Cow<'static, str>>, value: T) -> Option<T>
    where
        T: Any + Send + Sync,
    {
        self.inner.insert(key.into(), Box::new(value)).and_then(|old| old.downcast::<T>().ok()).map(|old| *old)
    }

    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.inner.get(key).and_then(|value| value.downcast_ref::<T>())
    }

    pub fn get_mut<T: Any>(&mut self, key: &str) -> Option<&mut T> {
        self.inner.get_mut(key).and_then(|value| value.downcast_mut::<T>())
    }

    /// Removes the value under `key`. A value of another type is left in place.
    pub fn remove<T: Any>(&mut self, key: &str) -> Option<T> {
        if !self.inner.get(key).is_some_and(|value| value.is::<T>()) {
            return None;
        }
        self.inner.remove(key).and_then(|value| value.downcast::<T>().ok()).map(|value| *value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl fmt::Debug for Locals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.inner.keys()).finish()
    }
}
