use crate::frame::{Frame, FrameId, FrameKind, Snapshot};

/// The maximum number of released frame slots kept for reuse
///
/// Block and catch entry/exit dominate call frequency, so released frames are
/// recycled in strict LIFO order to keep the hot path allocation-free and
/// cache-friendly.
pub const FRAME_POOL_CAPACITY: usize = 128;

#[derive(Debug, Default)]
struct Slot {
    frame: Frame,
    generation: u32,
    live: bool,
}

/// A slot arena for control frames with a bounded LIFO free list
///
/// `acquire` hands out the most recently released slot when one is available,
/// growing the arena otherwise. `release` zeroes the frame and bumps the
/// slot's generation, which makes any surviving [FrameId] for it stale.
/// Releasing through a stale id (including a double release) panics: it can
/// only arise from a bug in the chain logic.
#[derive(Debug, Default)]
pub struct FramePool {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl FramePool {
    /// Takes a frame slot, initialized with the given kind and snapshot
    pub fn acquire(&mut self, kind: FrameKind, snapshot: Snapshot) -> FrameId {
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                debug_assert!(!slot.live);
                slot.live = true;
                slot.frame.kind = kind;
                slot.frame.snapshot = snapshot;
                FrameId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = u32::try_from(self.slots.len())
                    .expect("FramePool::acquire: arena index overflow");
                self.slots.push(Slot {
                    frame: Frame::with(kind, snapshot),
                    generation: 0,
                    live: true,
                });
                FrameId {
                    index,
                    generation: 0,
                }
            }
        }
    }

    /// Returns a frame to the pool, zeroing it first
    ///
    /// The slot is only retained for reuse while the free list has capacity;
    /// beyond that it's simply retired.
    pub fn release(&mut self, id: FrameId) {
        let slot = self.slot_mut(id);
        slot.frame.clear();
        slot.live = false;
        slot.generation = slot.generation.wrapping_add(1);
        if self.free.len() < FRAME_POOL_CAPACITY {
            self.free.push(id.index);
        }
    }

    /// True if the id refers to a frame that hasn't been released
    pub fn is_live(&self, id: FrameId) -> bool {
        self.slots
            .get(id.index as usize)
            .is_some_and(|slot| slot.live && slot.generation == id.generation)
    }

    /// The frame for a live id
    pub fn get(&self, id: FrameId) -> &Frame {
        &self.slot(id).frame
    }

    /// The frame for a live id, mutably
    pub fn get_mut(&mut self, id: FrameId) -> &mut Frame {
        &mut self.slot_mut(id).frame
    }

    fn slot(&self, id: FrameId) -> &Slot {
        let slot = self
            .slots
            .get(id.index as usize)
            .unwrap_or_else(|| panic!("FramePool: frame id {id} out of bounds"));
        if !slot.live || slot.generation != id.generation {
            panic!("FramePool: stale frame id {id}");
        }
        slot
    }

    fn slot_mut(&mut self, id: FrameId) -> &mut Slot {
        let slot = self
            .slots
            .get_mut(id.index as usize)
            .unwrap_or_else(|| panic!("FramePool: frame id {id} out of bounds"));
        if !slot.live || slot.generation != id.generation {
            panic!("FramePool: stale frame id {id}");
        }
        slot
    }
}
