//! In-memory `KvBackend` for host-side tests, simulation, and demos.
//!
//! Clones share the underlying map, which is how a "reboot" is modeled: the
//! old guard instance is dropped, a new one opens the same backend, and the
//! data survives. Write-fault injection cuts power mid-protocol: after a
//! budget of `n` further mutations, every put reports rejection and every
//! remove becomes a no-op, exactly as a dead flash controller would behave.

use crate::kv::{KvBackend, KvSession, KvString};
use crg_error::{CrgError, Result};
use crg_types::Namespace;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq)]
enum Value {
    U8(u8),
    U32(u32),
    Str(String),
}

#[derive(Default)]
struct Shared {
    namespaces: HashMap<String, HashMap<String, Value>>,
    writes_until_fault: Option<u64>,
    open_fails: bool,
    mutations: u64,
}

impl Shared {
    fn consume_write_budget(&mut self) -> bool {
        match &mut self.writes_until_fault {
            None => {
                self.mutations += 1;
                true
            }
            Some(0) => false,
            Some(budget) => {
                *budget -= 1;
                self.mutations += 1;
                true
            }
        }
    }

    fn entry(&mut self, namespace: &str) -> &mut HashMap<String, Value> {
        self.namespaces.entry(namespace.to_owned()).or_default()
    }
}

/// Host-side key-value backend over a shared in-memory map.
#[derive(Clone, Default)]
pub struct MemoryKv {
    shared: Arc<Mutex<Shared>>,
}

impl MemoryKv {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow `remaining` more mutations, then reject every one after that.
    pub fn fail_writes_after(&self, remaining: u64) {
        self.shared.lock().writes_until_fault = Some(remaining);
    }

    /// Lift a previously injected write fault.
    pub fn clear_write_fault(&self) {
        self.shared.lock().writes_until_fault = None;
    }

    /// Make every subsequent `open` fail with `StoreUnavailable`.
    pub fn set_open_fails(&self, fails: bool) {
        self.shared.lock().open_fails = fails;
    }

    /// Overwrite a u32 record directly, bypassing sessions and fault budgets.
    pub fn corrupt_u32(&self, namespace: &Namespace, key: &str, value: u32) {
        self.shared
            .lock()
            .entry(namespace.as_str())
            .insert(key.to_owned(), Value::U32(value));
    }

    /// Overwrite a u8 record directly.
    pub fn corrupt_u8(&self, namespace: &Namespace, key: &str, value: u8) {
        self.shared
            .lock()
            .entry(namespace.as_str())
            .insert(key.to_owned(), Value::U8(value));
    }

    /// Overwrite a string record directly.
    pub fn corrupt_str(&self, namespace: &Namespace, key: &str, value: &str) {
        self.shared
            .lock()
            .entry(namespace.as_str())
            .insert(key.to_owned(), Value::Str(value.to_owned()));
    }

    /// Read a u32 record without a session, for test assertions.
    #[must_use]
    pub fn raw_u32(&self, namespace: &Namespace, key: &str) -> Option<u32> {
        match self.shared.lock().namespaces.get(namespace.as_str())?.get(key)? {
            Value::U32(v) => Some(*v),
            _ => None,
        }
    }

    /// Read a u8 record without a session, for test assertions.
    #[must_use]
    pub fn raw_u8(&self, namespace: &Namespace, key: &str) -> Option<u8> {
        match self.shared.lock().namespaces.get(namespace.as_str())?.get(key)? {
            Value::U8(v) => Some(*v),
            _ => None,
        }
    }

    /// Read a string record without a session, for test assertions.
    #[must_use]
    pub fn raw_str(&self, namespace: &Namespace, key: &str) -> Option<String> {
        match self.shared.lock().namespaces.get(namespace.as_str())?.get(key)? {
            Value::Str(v) => Some(v.clone()),
            _ => None,
        }
    }

    /// Session mutations (puts and removes) accepted so far.
    #[must_use]
    pub fn mutation_count(&self) -> u64 {
        self.shared.lock().mutations
    }

    /// Whether a record of any type exists.
    #[must_use]
    pub fn contains_key(&self, namespace: &Namespace, key: &str) -> bool {
        self.shared
            .lock()
            .namespaces
            .get(namespace.as_str())
            .is_some_and(|map| map.contains_key(key))
    }
}

impl KvBackend for MemoryKv {
    fn open(&self, namespace: &Namespace, read_only: bool) -> Result<Box<dyn KvSession + '_>> {
        if self.shared.lock().open_fails {
            return Err(CrgError::StoreUnavailable {
                namespace: namespace.as_str().to_owned(),
                detail: "simulated open failure".to_owned(),
            });
        }
        Ok(Box::new(MemorySession {
            shared: Arc::clone(&self.shared),
            namespace: namespace.as_str().to_owned(),
            read_only,
        }))
    }
}

struct MemorySession {
    shared: Arc<Mutex<Shared>>,
    namespace: String,
    read_only: bool,
}

impl MemorySession {
    fn get(&self, key: &str) -> Option<Value> {
        self.shared
            .lock()
            .namespaces
            .get(&self.namespace)?
            .get(key)
            .cloned()
    }

    fn put(&mut self, key: &str, value: Value) -> bool {
        if self.read_only {
            return false;
        }
        let mut shared = self.shared.lock();
        if !shared.consume_write_budget() {
            return false;
        }
        shared.entry(&self.namespace).insert(key.to_owned(), value);
        true
    }
}

impl KvSession for MemorySession {
    fn get_u32(&mut self, key: &str) -> Option<u32> {
        match self.get(key)? {
            Value::U32(v) => Some(v),
            _ => None,
        }
    }

    fn put_u32(&mut self, key: &str, value: u32) -> bool {
        self.put(key, Value::U32(value))
    }

    fn get_u8(&mut self, key: &str) -> Option<u8> {
        match self.get(key)? {
            Value::U8(v) => Some(v),
            _ => None,
        }
    }

    fn put_u8(&mut self, key: &str, value: u8) -> bool {
        self.put(key, Value::U8(value))
    }

    fn get_str(&mut self, key: &str) -> Option<KvString> {
        match self.get(key)? {
            Value::Str(v) => {
                let mut out = KvString::new();
                for ch in v.chars() {
                    if out.push(ch).is_err() {
                        break;
                    }
                }
                Some(out)
            }
            _ => None,
        }
    }

    fn put_str(&mut self, key: &str, value: &str) -> bool {
        self.put(key, Value::Str(value.to_owned()))
    }

    fn contains(&mut self, key: &str) -> bool {
        self.get(key).is_some()
    }

    fn remove(&mut self, key: &str) {
        if self.read_only {
            return;
        }
        let mut shared = self.shared.lock();
        if !shared.consume_write_budget() {
            return;
        }
        if let Some(map) = shared.namespaces.get_mut(&self.namespace) {
            map.remove(key);
        }
    }
}
