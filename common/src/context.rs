//! Request-scoped value bag keyed by type.
//!
//! The dispatcher seeds a [`Context`] with the shared broker handle before
//! running a request; middleware deposits whatever downstream handlers
//! need, such as the resolved session key. Each type occupies one slot.

use std::{
    any::{type_name, Any, TypeId},
    collections::HashMap,
    hash::{BuildHasherDefault, Hasher},
};

use anyhow::{anyhow, Result};

/// Identity hasher for `TypeId` keys. The id is already a well-mixed
/// 64-bit value, so it passes straight through to the bucket index.
#[derive(Debug, Default, Clone, Copy)]
pub struct TypeIdHasher(u64);

impl Hasher for TypeIdHasher {
    fn write(&mut self, bytes: &[u8]) {
        // Fallback path, taken only if TypeId stops hashing as a single
        // u64 in some future std.
        for &byte in bytes {
            self.0 = self.0.rotate_left(8) ^ u64::from(byte);
        }
    }

    fn write_u64(&mut self, id: u64) {
        self.0 = id;
    }

    fn finish(&self) -> u64 {
        self.0
    }
}

type Slots = HashMap<TypeId, Box<dyn Any + Send + Sync>, BuildHasherDefault<TypeIdHasher>>;

pub struct Context {
    slots: Slots,
}

impl Context {
    pub fn new() -> Self {
        Self {
            slots: Slots::default(),
        }
    }

    /// Store a value, displacing any previous value of the same type.
    pub fn store<T: Send + Sync + 'static>(&mut self, value: T) {
        self.slots.insert(TypeId::of::<T>(), Box::new(value));
    }

    pub fn try_get<T: 'static>(&self) -> Option<&T> {
        self.slots.get(&TypeId::of::<T>())?.downcast_ref()
    }

    /// Fetch a stored value; the error names the missing type so a
    /// mis-wired handler chain is diagnosable from the log line.
    pub fn get<T: 'static>(&self) -> Result<&T> {
        self.try_get::<T>()
            .ok_or_else(|| anyhow!("no {} in request context", type_name::<T>()))
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct ConnectionTag(u64);

    #[test]
    fn store_and_fetch_by_type() {
        let mut context = Context::new();
        context.store(ConnectionTag(7));
        context.store("label");
        assert_eq!(context.get::<ConnectionTag>().unwrap(), &ConnectionTag(7));
        assert_eq!(context.get::<&str>().unwrap(), &"label");
    }

    #[test]
    fn storing_again_displaces_the_previous_value() {
        let mut context = Context::new();
        context.store(ConnectionTag(1));
        context.store(ConnectionTag(2));
        assert_eq!(context.get::<ConnectionTag>().unwrap(), &ConnectionTag(2));
    }

    #[test]
    fn missing_type_is_named_in_the_error() {
        let context = Context::new();
        assert!(context.try_get::<ConnectionTag>().is_none());
        let err = context.get::<ConnectionTag>().unwrap_err();
        assert!(err.to_string().contains("ConnectionTag"));
    }
}
