use log::trace;

use crate::fatal;
use crate::header::{Header, HeaderFlags};
use crate::instance::{Instance, Payload, WeakRef};
use crate::value::{ClassId, ObjRef, Value};

/// Limits applied to non-permanent allocations.
#[derive(Debug, Clone)]
pub struct HeapConfig {
    /// Maximum number of live instances.
    pub max_objects: usize,
    /// Maximum field count of one instance.
    pub max_fields: usize,
    /// Maximum item count of one list payload.
    pub max_items: usize,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            max_objects: 1 << 22,
            max_fields: 1 << 16,
            max_items: 1 << 24,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllocError {
    #[error("object quota of {limit} live instances exhausted")]
    Quota { limit: usize },
    #[error("instance with {requested} fields exceeds the limit of {limit}")]
    TooLarge { requested: usize, limit: usize },
    #[error("list of {requested} items exceeds the limit of {limit}")]
    TooManyItems { requested: usize, limit: usize },
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
    pub allocated: u64,
    pub freed: u64,
    pub finalized: u64,
    pub live: usize,
}

#[derive(Debug)]
enum Slot {
    Occupied { generation: u32, instance: Instance },
    Free { generation: u32, next_free: Option<u32> },
}

/// Arena of refcounted instances addressed by generational [`ObjRef`]s.
///
/// Counting discipline: [`alloc`](Heap::alloc) hands out one reference;
/// every additional holder calls [`retain`](Heap::retain) and every holder
/// that lets go calls [`release`](Heap::release). The release that brings
/// the count to zero frees the instance (iteratively releasing whatever it
/// held) or, when its class has a destructor, queues it for finalization.
pub struct Heap {
    slots: Vec<Slot>,
    free_head: Option<u32>,
    config: HeapConfig,
    stats: HeapStats,
    finalize_queue: Vec<ObjRef>,
    scratch: Vec<ObjRef>,
}

impl Heap {
    pub fn new(config: HeapConfig) -> Self {
        Self {
            slots: Vec::new(),
            free_head: None,
            config,
            stats: HeapStats::default(),
            finalize_queue: Vec::new(),
            scratch: Vec::new(),
        }
    }

    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    pub fn stats(&self) -> HeapStats {
        self.stats
    }

    // ── Allocation ─────────────────────────────────────────────────

    /// Allocate an instance with refcount 1.
    ///
    /// `fields` are moved in: every object they reference must already
    /// carry a count for the new holder.
    pub fn alloc(
        &mut self,
        class: ClassId,
        fields: Vec<Value>,
        payload: Payload,
    ) -> Result<ObjRef, AllocError> {
        self.check_alloc(fields.len())?;
        Ok(self.insert(Instance {
            header: Header::new(class),
            fields,
            payload,
        }))
    }

    /// Whether an instance with `field_count` fields fits the quota.
    pub fn check_alloc(&self, field_count: usize) -> Result<(), AllocError> {
        if field_count > self.config.max_fields {
            return Err(AllocError::TooLarge {
                requested: field_count,
                limit: self.config.max_fields,
            });
        }
        if self.stats.live >= self.config.max_objects {
            return Err(AllocError::Quota {
                limit: self.config.max_objects,
            });
        }
        Ok(())
    }

    /// Whether a list payload of `len` items fits the quota.
    pub fn check_items(&self, len: usize) -> Result<(), AllocError> {
        if len > self.config.max_items {
            return Err(AllocError::TooManyItems {
                requested: len,
                limit: self.config.max_items,
            });
        }
        Ok(())
    }

    /// Allocate an instance that is never freed (compile-time constants).
    pub fn alloc_permanent(
        &mut self,
        class: ClassId,
        fields: Vec<Value>,
        payload: Payload,
    ) -> ObjRef {
        self.insert(Instance {
            header: Header::permanent(class),
            fields,
            payload,
        })
    }

    fn insert(&mut self, instance: Instance) -> ObjRef {
        self.stats.allocated += 1;
        self.stats.live += 1;
        match self.free_head {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                let (generation, next_free) = match slot {
                    Slot::Free {
                        generation,
                        next_free,
                    } => (*generation, *next_free),
                    Slot::Occupied { .. } => {
                        fatal!("free list points at a live slot {index}")
                    }
                };
                *slot = Slot::Occupied {
                    generation,
                    instance,
                };
                self.free_head = next_free;
                ObjRef { index, generation }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot::Occupied {
                    generation: 0,
                    instance,
                });
                ObjRef {
                    index,
                    generation: 0,
                }
            }
        }
    }

    // ── Access ─────────────────────────────────────────────────────

    #[inline]
    pub fn get(&self, r: ObjRef) -> Option<&Instance> {
        match self.slots.get(r.index as usize)? {
            Slot::Occupied {
                generation,
                instance,
            } if *generation == r.generation => Some(instance),
            _ => None,
        }
    }

    #[inline]
    pub fn get_mut(&mut self, r: ObjRef) -> Option<&mut Instance> {
        match self.slots.get_mut(r.index as usize)? {
            Slot::Occupied {
                generation,
                instance,
            } if *generation == r.generation => Some(instance),
            _ => None,
        }
    }

    pub fn is_live(&self, r: ObjRef) -> bool {
        self.get(r).is_some()
    }

    pub fn refcount(&self, r: ObjRef) -> Option<u32> {
        self.get(r).map(|i| i.header.refcount)
    }

    pub fn class_of(&self, r: ObjRef) -> Option<ClassId> {
        self.get(r).map(|i| i.header.class)
    }

    // ── Counting ───────────────────────────────────────────────────

    /// Count one more holder of `v`. No-op for non-heap values.
    #[inline]
    pub fn retain(&mut self, v: Value) {
        if let Value::Object(r) = v {
            self.retain_ref(r);
        }
    }

    pub fn retain_ref(&mut self, r: ObjRef) {
        let Some(instance) = self.get_mut(r) else {
            fatal!("retain of freed instance {}.{}", r.index, r.generation);
        };
        let header = &mut instance.header;
        if !header.is_permanent() {
            header.refcount += 1;
        }
    }

    /// Drop one holder of `v`. No-op for non-heap values.
    #[inline]
    pub fn release(&mut self, v: Value) {
        if let Value::Object(r) = v {
            self.release_ref(r);
        }
    }

    pub fn release_ref(&mut self, r: ObjRef) {
        let mut work = std::mem::take(&mut self.scratch);
        work.push(r);
        while let Some(r) = work.pop() {
            let Some(instance) = self.get_mut(r) else {
                fatal!("release of freed instance {}.{}", r.index, r.generation);
            };
            let header = &mut instance.header;
            if header.is_permanent() {
                continue;
            }
            if header.refcount == 0 {
                fatal!("release of instance {}.{} with zero refcount", r.index, r.generation);
            }
            header.refcount -= 1;
            if header.refcount > 0 {
                continue;
            }
            if header.flags.contains(HeaderFlags::FINALIZING) {
                fatal!("destructor re-entrancy on instance {}.{}", r.index, r.generation);
            }
            if header.flags.contains(HeaderFlags::HAS_DESTRUCTOR)
                && !header.flags.contains(HeaderFlags::FINALIZED)
            {
                header.flags.insert(HeaderFlags::FINALIZING);
                self.finalize_queue.push(r);
                continue;
            }

            let mut dead = self.free_slot(r);
            work.extend(dead.fields.drain(..).filter_map(Value::as_object));
            dead.payload.drain_refs(&mut work);
        }
        self.scratch = work;
    }

    fn free_slot(&mut self, r: ObjRef) -> Instance {
        let next_free = self.free_head;
        let slot = &mut self.slots[r.index as usize];
        let old = std::mem::replace(slot, Slot::Free {
            generation: r.generation.wrapping_add(1),
            next_free,
        });
        let Slot::Occupied { instance, .. } = old else {
            fatal!("double free of slot {}", r.index);
        };
        self.free_head = Some(r.index);
        self.stats.freed += 1;
        self.stats.live -= 1;
        trace!("freed instance {}.{}", r.index, r.generation);
        instance
    }

    // ── Finalization ───────────────────────────────────────────────

    pub fn has_pending_finalizers(&self) -> bool {
        !self.finalize_queue.is_empty()
    }

    /// Next instance whose count reached zero and whose destructor chain
    /// must run. Its count is raised back to 1 for the duration; finish
    /// with [`finish_finalize`](Heap::finish_finalize).
    pub fn next_finalizable(&mut self) -> Option<ObjRef> {
        let r = self.finalize_queue.pop()?;
        if let Some(instance) = self.get_mut(r) {
            instance.header.refcount = 1;
        }
        Some(r)
    }

    /// Mark the destructor chain of `r` as run and drop the count taken by
    /// [`next_finalizable`](Heap::next_finalizable). The instance is freed
    /// unless the destructor stored it somewhere.
    pub fn finish_finalize(&mut self, r: ObjRef) {
        let Some(instance) = self.get_mut(r) else {
            fatal!("finalized instance {}.{} vanished", r.index, r.generation);
        };
        instance.header.flags.remove(HeaderFlags::FINALIZING);
        instance.header.flags.insert(HeaderFlags::FINALIZED);
        self.stats.finalized += 1;
        self.release_ref(r);
    }

    // ── Weak references ────────────────────────────────────────────

    /// Generation-checked handle; the target carries no back-link.
    pub fn downgrade(&self, r: ObjRef) -> Option<WeakRef> {
        self.is_live(r).then(|| WeakRef::from(r))
    }

    /// The target of `w` if it is still alive (and not being finalized).
    /// Does not retain.
    pub fn upgrade(&self, w: WeakRef) -> Option<ObjRef> {
        let r = ObjRef {
            index: w.index,
            generation: w.generation,
        };
        let instance = self.get(r)?;
        (!instance.header.flags.contains(HeaderFlags::FINALIZING)).then_some(r)
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new(HeapConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::PERMANENT;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::HashMap;

    const CLASS: ClassId = ClassId(0);

    fn plain(heap: &mut Heap) -> ObjRef {
        heap.alloc(CLASS, Vec::new(), Payload::None)
            .expect("alloc failed")
    }

    #[test]
    fn alloc_starts_at_one_and_frees_at_zero() {
        let mut heap = Heap::default();
        let r = plain(&mut heap);
        assert_eq!(heap.refcount(r), Some(1));
        heap.retain_ref(r);
        assert_eq!(heap.refcount(r), Some(2));
        heap.release_ref(r);
        heap.release_ref(r);
        assert!(!heap.is_live(r));
        assert_eq!(heap.stats().freed, 1);
        assert_eq!(heap.stats().live, 0);
    }

    #[test]
    fn freeing_releases_fields_and_list_items() {
        let mut heap = Heap::default();
        let a = plain(&mut heap);
        let b = plain(&mut heap);
        let list = heap
            .alloc(CLASS, Vec::new(), Payload::List(vec![Value::Object(b)]))
            .expect("alloc failed");
        let holder = heap
            .alloc(CLASS, vec![Value::Object(a), Value::Object(list)], Payload::None)
            .expect("alloc failed");
        heap.release_ref(holder);
        assert_eq!(heap.stats().live, 0);
        assert_eq!(heap.stats().freed, 4);
    }

    #[test]
    fn deep_chains_free_without_recursion() {
        let mut heap = Heap::default();
        let mut head = plain(&mut heap);
        for _ in 0..100_000 {
            head = heap
                .alloc(CLASS, vec![Value::Object(head)], Payload::None)
                .expect("alloc failed");
        }
        heap.release_ref(head);
        assert_eq!(heap.stats().live, 0);
    }

    #[test]
    fn stale_reference_does_not_alias_new_instance() {
        let mut heap = Heap::default();
        let old = plain(&mut heap);
        heap.release_ref(old);
        let new = plain(&mut heap);
        assert_eq!(old.index, new.index);
        assert_ne!(old.generation, new.generation);
        assert!(heap.get(old).is_none());
        assert!(heap.get(new).is_some());
    }

    #[test]
    fn permanent_instances_ignore_counting() {
        let mut heap = Heap::default();
        let r = heap.alloc_permanent(CLASS, Vec::new(), Payload::Str("k".into()));
        heap.release_ref(r);
        heap.release_ref(r);
        heap.retain_ref(r);
        assert_eq!(heap.refcount(r), Some(PERMANENT));
    }

    #[test]
    fn weak_reference_is_checked() {
        let mut heap = Heap::default();
        let r = plain(&mut heap);
        let w = heap.downgrade(r).expect("live");
        assert_eq!(heap.upgrade(w), Some(r));
        heap.release_ref(r);
        assert_eq!(heap.upgrade(w), None);
    }

    #[test]
    fn destructor_instances_are_queued_then_freed() {
        let mut heap = Heap::default();
        let child = plain(&mut heap);
        let r = heap
            .alloc(CLASS, vec![Value::Object(child)], Payload::None)
            .expect("alloc failed");
        heap.get_mut(r)
            .expect("live")
            .header
            .flags
            .insert(HeaderFlags::HAS_DESTRUCTOR);

        heap.release_ref(r);
        assert!(heap.is_live(r));
        assert!(heap.has_pending_finalizers());

        let queued = heap.next_finalizable().expect("queued");
        assert_eq!(queued, r);
        assert_eq!(heap.refcount(r), Some(1));
        heap.finish_finalize(r);
        assert!(!heap.is_live(r));
        assert!(!heap.is_live(child));
        assert_eq!(heap.stats().finalized, 1);
    }

    #[test]
    fn resurrected_instance_is_not_finalized_twice() {
        let mut heap = Heap::default();
        let r = plain(&mut heap);
        heap.get_mut(r)
            .expect("live")
            .header
            .flags
            .insert(HeaderFlags::HAS_DESTRUCTOR);
        heap.release_ref(r);
        let r = heap.next_finalizable().expect("queued");
        heap.retain_ref(r); // destructor stored `this`
        heap.finish_finalize(r);
        assert!(heap.is_live(r));
        heap.release_ref(r);
        assert!(!heap.is_live(r));
        assert!(!heap.has_pending_finalizers());
    }

    #[test]
    fn quota_and_size_limits() {
        let mut heap = Heap::new(HeapConfig {
            max_objects: 2,
            max_fields: 3,
            ..HeapConfig::default()
        });
        plain(&mut heap);
        plain(&mut heap);
        assert_eq!(
            heap.alloc(CLASS, Vec::new(), Payload::None),
            Err(AllocError::Quota { limit: 2 })
        );
        let mut heap = Heap::new(HeapConfig {
            max_objects: 10,
            max_fields: 3,
            max_items: 5,
        });
        assert_eq!(heap.check_items(5), Ok(()));
        assert_eq!(
            heap.check_items(6),
            Err(AllocError::TooManyItems { requested: 6, limit: 5 })
        );
        assert_eq!(
            heap.alloc(CLASS, vec![Value::Nil; 4], Payload::None),
            Err(AllocError::TooLarge {
                requested: 4,
                limit: 3
            })
        );
    }

    /// Reference model of the counting discipline.
    #[derive(Default)]
    struct Model {
        counts: HashMap<ObjRef, u32>,
        fields: HashMap<ObjRef, Vec<ObjRef>>,
        deaths: u64,
    }

    impl Model {
        fn release(&mut self, r: ObjRef) {
            let count = self.counts.get_mut(&r).expect("model: released dead object");
            *count -= 1;
            if *count == 0 {
                self.counts.remove(&r);
                self.deaths += 1;
                for child in self.fields.remove(&r).unwrap_or_default() {
                    self.release(child);
                }
            }
        }
    }

    #[test]
    fn randomized_alias_store_release_sequences() {
        for seed in 0..20u64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut heap = Heap::default();
            let mut model = Model::default();
            // External holders; each entry owns one count.
            let mut holders: Vec<ObjRef> = Vec::new();
            // Allocation order, for keeping the field graph acyclic.
            let mut born: HashMap<ObjRef, usize> = HashMap::new();

            for step in 0..400 {
                match rng.gen_range(0..4) {
                    0 => {
                        let r = plain(&mut heap);
                        born.insert(r, step);
                        model.counts.insert(r, 1);
                        holders.push(r);
                    }
                    1 if !holders.is_empty() => {
                        let r = holders[rng.gen_range(0..holders.len())];
                        heap.retain_ref(r);
                        *model.counts.get_mut(&r).expect("live") += 1;
                        holders.push(r);
                    }
                    2 if holders.len() >= 2 => {
                        let a = holders[rng.gen_range(0..holders.len())];
                        let b = holders[rng.gen_range(0..holders.len())];
                        if born[&a] < born[&b] {
                            heap.retain_ref(a);
                            heap.get_mut(b)
                                .expect("live")
                                .fields
                                .push(Value::Object(a));
                            *model.counts.get_mut(&a).expect("live") += 1;
                            model.fields.entry(b).or_default().push(a);
                        }
                    }
                    _ if !holders.is_empty() => {
                        let r = holders.swap_remove(rng.gen_range(0..holders.len()));
                        heap.release_ref(r);
                        model.release(r);
                    }
                    _ => {}
                }

                for (r, count) in &model.counts {
                    assert_eq!(heap.refcount(*r), Some(*count), "seed {seed} step {step}");
                }
                assert_eq!(heap.stats().freed, model.deaths, "seed {seed} step {step}");
            }

            for r in holders.drain(..) {
                heap.release_ref(r);
                model.release(r);
            }
            assert_eq!(heap.stats().live, 0, "seed {seed} leaked");
            assert_eq!(heap.stats().freed, heap.stats().allocated, "seed {seed}");
            for r in born.keys() {
                assert!(!heap.is_live(*r));
            }
        }
    }
}
