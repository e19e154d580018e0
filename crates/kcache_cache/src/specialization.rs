//! In-process specialization tables.
//!
//! Each registered callable owns a table mapping [`SpecializationKey`]s to
//! small integer ids. Ids are handed out in order and never reused, so an id
//! that was invalidated cannot later name a different variant.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use kcache_common::{Ident, LogicalId};
use kcache_fingerprint::{Specialization, SpecializationKey, WeakObject};
use log::debug;

/// Called with `(callable, specialization id)` for every invalidated entry.
pub type InvalidationCallback = Box<dyn Fn(Ident, u32) + Send + Sync>;

struct Entry {
    key: SpecializationKey,
    objects: Vec<WeakObject>,
    live: bool,
}

#[derive(Default)]
struct SpecializationTable {
    entries: Vec<Entry>,
    index: HashMap<SpecializationKey, u32>,
}

impl SpecializationTable {
    fn lookup(&mut self, spec: Specialization) -> u32 {
        if let Some(&id) = self.index.get(&spec.key) {
            return id;
        }
        let id = self.entries.len() as u32;
        self.index.insert(spec.key.clone(), id);
        self.entries.push(Entry {
            key: spec.key,
            objects: spec.objects,
            live: true,
        });
        id
    }

    fn retire_where(&mut self, mut pred: impl FnMut(&Entry) -> bool) -> Vec<u32> {
        let mut retired = Vec::new();
        for (id, entry) in self.entries.iter_mut().enumerate() {
            if entry.live && pred(entry) {
                entry.live = false;
                self.index.remove(&entry.key);
                retired.push(id as u32);
            }
        }
        retired
    }
}

/// Per-callable specialization tables.
#[derive(Default)]
pub struct SpecializationMapper {
    tables: RwLock<HashMap<Ident, SpecializationTable>>,
    on_invalidate: RwLock<Option<InvalidationCallback>>,
}

impl SpecializationMapper {
    /// Creates a mapper with no registered callables.
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the callback run for every invalidated entry.
    pub fn set_invalidation_callback(&self, callback: InvalidationCallback) {
        *self
            .on_invalidate
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    /// Creates an empty table for `callable`. Existing tables are kept.
    pub fn register(&self, callable: Ident) {
        self.tables
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(callable)
            .or_default();
    }

    /// Drops the table of `callable`. Returns `false` if there was none.
    pub fn unregister(&self, callable: Ident) -> bool {
        self.tables
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&callable)
            .is_some()
    }

    /// Returns `true` if `callable` has a table.
    pub fn is_registered(&self, callable: Ident) -> bool {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&callable)
    }

    /// Returns the id of `spec` in the table of `callable`, assigning the
    /// next id if the key is new. `None` if `callable` is not registered.
    pub fn lookup(&self, callable: Ident, spec: Specialization) -> Option<u32> {
        {
            let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
            let table = tables.get(&callable)?;
            if let Some(&id) = table.index.get(&spec.key) {
                return Some(id);
            }
        }
        // re-checked under the write lock
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        Some(tables.get_mut(&callable)?.lookup(spec))
    }

    /// Number of ids ever assigned for `callable`, live or not.
    pub fn assigned(&self, callable: Ident) -> Option<usize> {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&callable)
            .map(|t| t.entries.len())
    }

    /// Number of live entries for `callable`.
    pub fn live(&self, callable: Ident) -> Option<usize> {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&callable)
            .map(|t| t.index.len())
    }

    /// Retires every entry whose key names the object `id`.
    pub fn invalidate_object(&self, id: LogicalId) -> Vec<(Ident, u32)> {
        let retired = self.retire(|e| e.key.mentions_object(id));
        debug!("object {id} invalidated {} specialization(s)", retired.len());
        retired
    }

    /// Retires every entry that holds a dropped object.
    pub fn prune_dead(&self) -> Vec<(Ident, u32)> {
        let retired = self.retire(|e| e.objects.iter().any(|o| !o.is_alive()));
        if !retired.is_empty() {
            debug!("pruned {} specialization(s) of dropped objects", retired.len());
        }
        retired
    }

    /// Empties every table without forgetting registrations. Ids restart at
    /// zero, so only call this when every consumer of old ids is reset too.
    pub fn clear(&self) {
        for table in self
            .tables
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .values_mut()
        {
            *table = SpecializationTable::default();
        }
    }

    fn retire(&self, mut pred: impl FnMut(&Entry) -> bool) -> Vec<(Ident, u32)> {
        let retired: Vec<(Ident, u32)> = {
            let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
            tables
                .iter_mut()
                .flat_map(|(&callable, table)| {
                    table
                        .retire_where(&mut pred)
                        .into_iter()
                        .map(move |id| (callable, id))
                })
                .collect()
        };
        // the callback may call back into the mapper
        if let Some(callback) = self
            .on_invalidate
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            for &(callable, id) in &retired {
                callback(callable, id);
            }
        }
        retired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kcache_common::Epoch;
    use kcache_fingerprint::{specialize, ArgValue, Scalar, Signature, StructuralObject};
    use std::sync::{Arc, Mutex};

    fn spec(sig: &Signature, args: &[ArgValue]) -> Specialization {
        specialize(sig, args).unwrap()
    }

    #[test]
    fn equal_keys_share_an_id() {
        let mapper = SpecializationMapper::new();
        let k = Ident::from_raw(0);
        mapper.register(k);
        let sig = Signature::new().value("a");
        let a = mapper.lookup(k, spec(&sig, &[Scalar::I32(5).into()])).unwrap();
        let b = mapper.lookup(k, spec(&sig, &[Scalar::I32(9).into()])).unwrap();
        let c = mapper.lookup(k, spec(&sig, &[Scalar::F32(9.0).into()])).unwrap();
        assert_eq!(a, b);
        assert_eq!((a, c), (0, 1));
        assert_eq!(mapper.assigned(k), Some(2));
    }

    #[test]
    fn unregistered_has_no_table() {
        let mapper = SpecializationMapper::new();
        let k = Ident::from_raw(3);
        let sig = Signature::new();
        assert!(mapper.lookup(k, spec(&sig, &[])).is_none());
        mapper.register(k);
        assert!(mapper.is_registered(k));
        assert_eq!(mapper.lookup(k, spec(&sig, &[])), Some(0));
        assert!(mapper.unregister(k));
        assert!(!mapper.unregister(k));
        assert!(mapper.lookup(k, spec(&sig, &[])).is_none());
    }

    #[test]
    fn tables_are_per_callable() {
        let mapper = SpecializationMapper::new();
        let (a, b) = (Ident::from_raw(0), Ident::from_raw(1));
        mapper.register(a);
        mapper.register(b);
        let sig = Signature::new().value("x");
        mapper.lookup(a, spec(&sig, &[Scalar::I32(1).into()]));
        assert_eq!(mapper.lookup(b, spec(&sig, &[Scalar::F64(1.0).into()])), Some(0));
    }

    #[test]
    fn invalidated_ids_are_not_reused() {
        let epoch = Epoch::new();
        let mapper = SpecializationMapper::new();
        let k = Ident::from_raw(0);
        mapper.register(k);
        let sig = Signature::new().structural("s");
        let obj = StructuralObject::new(&epoch, "S");
        let first = mapper.lookup(k, spec(&sig, &[obj.clone().into()])).unwrap();

        assert_eq!(mapper.invalidate_object(obj.id()), vec![(k, first)]);
        assert_eq!(mapper.live(k), Some(0));
        assert!(mapper.invalidate_object(obj.id()).is_empty());

        let again = mapper.lookup(k, spec(&sig, &[obj.into()])).unwrap();
        assert_ne!(first, again);
    }

    #[test]
    fn callback_sees_every_retired_entry() {
        let epoch = Epoch::new();
        let mapper = SpecializationMapper::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        mapper.set_invalidation_callback(Box::new(move |c: Ident, id: u32| sink.lock().unwrap().push((c, id))));

        let (a, b) = (Ident::from_raw(0), Ident::from_raw(1));
        mapper.register(a);
        mapper.register(b);
        let sig = Signature::new().structural("s");
        let obj = StructuralObject::new(&epoch, "S");
        let other = StructuralObject::new(&epoch, "S");
        mapper.lookup(a, spec(&sig, &[obj.clone().into()]));
        mapper.lookup(a, spec(&sig, &[other.into()]));
        mapper.lookup(b, spec(&sig, &[obj.clone().into()]));

        mapper.invalidate_object(obj.id());
        let mut seen = seen.lock().unwrap().clone();
        seen.sort_by_key(|(c, id)| (c.as_raw(), *id));
        assert_eq!(seen, vec![(a, 0), (b, 0)]);
        assert_eq!(mapper.live(a), Some(1));
    }

    #[test]
    fn prune_dead_objects() {
        let epoch = Epoch::new();
        let mapper = SpecializationMapper::new();
        let k = Ident::from_raw(0);
        mapper.register(k);
        let sig = Signature::new().structural("s");
        let kept = StructuralObject::new(&epoch, "S");
        let dropped = StructuralObject::new(&epoch, "S");
        mapper.lookup(k, spec(&sig, &[kept.clone().into()]));
        let gone = mapper.lookup(k, spec(&sig, &[dropped.clone().into()])).unwrap();

        assert!(mapper.prune_dead().is_empty());
        drop(dropped);
        assert_eq!(mapper.prune_dead(), vec![(k, gone)]);
        assert_eq!(mapper.live(k), Some(1));
    }

    #[test]
    fn concurrent_lookups_agree() {
        let mapper = SpecializationMapper::new();
        let k = Ident::from_raw(0);
        mapper.register(k);
        let sig = Signature::new().value("a");

        let ids: Vec<(u32, u32)> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|t| {
                    let (mapper, sig) = (&mapper, &sig);
                    s.spawn(move || {
                        let int = mapper.lookup(k, spec(sig, &[Scalar::I32(t).into()])).unwrap();
                        let float = mapper
                            .lookup(k, spec(sig, &[Scalar::F64(f64::from(t)).into()]))
                            .unwrap();
                        (int, float)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let (int, float) = ids[0];
        assert_ne!(int, float);
        assert!(ids.iter().all(|&pair| pair == (int, float)));
        assert_eq!(mapper.assigned(k), Some(2));
    }

    #[test]
    fn clear_keeps_registrations() {
        let mapper = SpecializationMapper::new();
        let k = Ident::from_raw(0);
        mapper.register(k);
        let sig = Signature::new().value("a");
        mapper.lookup(k, spec(&sig, &[Scalar::I32(1).into()]));
        mapper.clear();
        assert!(mapper.is_registered(k));
        assert_eq!(mapper.assigned(k), Some(0));
    }
}
