use crate::message::PayloadClass;

/// A single fixed-size slot: a byte buffer, how much of it is valid, and how
/// many live [`PayloadHandle`]s point at it.
struct Slot<const N: usize> {
    data: [u8; N],
    len: usize,
    refcount: u8,
}

impl<const N: usize> Slot<N> {
    const fn empty() -> Self {
        Self {
            data: [0u8; N],
            len: 0,
            refcount: 0,
        }
    }

    fn is_free(&self) -> bool {
        self.refcount == 0
    }
}

/// A handle identifying one payload buffer held by a [`BufferPool`].
///
/// This is the owned stand-in for the original design's raw pointer into a
/// message's payload array: cheap to copy, but only meaningful together with
/// the pool that issued it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PayloadHandle {
    class: PayloadClass,
    index: usize,
}

impl PayloadHandle {
    /// Which size class this payload was allocated from.
    pub fn class(&self) -> PayloadClass {
        self.class
    }
}

/// Errors returned by [`BufferPool`] operations.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PoolError {
    /// Every slot in the required size class is currently in use.
    Exhausted,
    /// `data` did not fit in any fixed-size class this pool carries.
    PayloadTooLarge,
    /// A handle referred to a slot that has since been fully freed.
    Stale,
}

/// Segregated, reference-counted payload storage with one fixed-size array
/// per [`PayloadClass`] (§4.3).
///
/// `BASIC`, `DATAGRAM`, and `SNIP` size the Basic (≤8 byte), Datagram (≤72
/// byte) and Snip (≤253 byte) slot arrays respectively; `STREAM` sizes a
/// fourth array of the same per-slot capacity as Snip, used for stream
/// transfers, which this engine caps at that size and expects hosts to
/// chunk through repeated allocations rather than buffering unbounded
/// stream data in one slot.
pub struct BufferPool<const BASIC: usize, const DATAGRAM: usize, const SNIP: usize, const STREAM: usize>
{
    basic: [Slot<8>; BASIC],
    datagram: [Slot<72>; DATAGRAM],
    snip: [Slot<253>; SNIP],
    stream: [Slot<253>; STREAM],
}

impl<const BASIC: usize, const DATAGRAM: usize, const SNIP: usize, const STREAM: usize>
    BufferPool<BASIC, DATAGRAM, SNIP, STREAM>
{
    /// Builds an empty pool; every slot starts free.
    pub const fn new() -> Self {
        Self {
            basic: [const { Slot::<8>::empty() }; BASIC],
            datagram: [const { Slot::<72>::empty() }; DATAGRAM],
            snip: [const { Slot::<253>::empty() }; SNIP],
            stream: [const { Slot::<253>::empty() }; STREAM],
        }
    }

    /// Copies `data` into a free slot of the smallest class that fits it and
    /// returns a handle with refcount 1.
    pub fn allocate(&mut self, data: &[u8]) -> Result<PayloadHandle, PoolError> {
        let class = PayloadClass::smallest_fit(data.len()).ok_or(PoolError::PayloadTooLarge)?;
        match class {
            PayloadClass::Basic => Self::allocate_in(&mut self.basic, data, PayloadClass::Basic),
            PayloadClass::Datagram => {
                Self::allocate_in(&mut self.datagram, data, PayloadClass::Datagram)
            }
            PayloadClass::Snip => Self::allocate_in(&mut self.snip, data, PayloadClass::Snip),
            PayloadClass::Stream => Self::allocate_in(&mut self.stream, data, PayloadClass::Stream),
        }
    }

    /// Allocates an empty slot of exactly `class`, for payloads built up
    /// incrementally across several CAN frames (multi-frame reassembly).
    pub fn allocate_empty(&mut self, class: PayloadClass) -> Result<PayloadHandle, PoolError> {
        match class {
            PayloadClass::Basic => Self::allocate_in(&mut self.basic, &[], PayloadClass::Basic),
            PayloadClass::Datagram => {
                Self::allocate_in(&mut self.datagram, &[], PayloadClass::Datagram)
            }
            PayloadClass::Snip => Self::allocate_in(&mut self.snip, &[], PayloadClass::Snip),
            PayloadClass::Stream => Self::allocate_in(&mut self.stream, &[], PayloadClass::Stream),
        }
    }

    fn allocate_in<const N: usize>(
        slots: &mut [Slot<N>],
        data: &[u8],
        class: PayloadClass,
    ) -> Result<PayloadHandle, PoolError> {
        let index = slots
            .iter()
            .position(Slot::is_free)
            .ok_or(PoolError::Exhausted)?;
        let slot = &mut slots[index];
        slot.data[..data.len()].copy_from_slice(data);
        slot.len = data.len();
        slot.refcount = 1;
        Ok(PayloadHandle { class, index })
    }

    /// Appends `extra` to the payload already held by `handle`, for
    /// reassembling a multi-frame message. Fails if it would overflow the
    /// slot's fixed capacity.
    pub fn append(&mut self, handle: PayloadHandle, extra: &[u8]) -> Result<(), PoolError> {
        match handle.class {
            PayloadClass::Basic => Self::append_in(&mut self.basic, handle.index, extra),
            PayloadClass::Datagram => Self::append_in(&mut self.datagram, handle.index, extra),
            PayloadClass::Snip => Self::append_in(&mut self.snip, handle.index, extra),
            PayloadClass::Stream => Self::append_in(&mut self.stream, handle.index, extra),
        }
    }

    fn append_in<const N: usize>(
        slots: &mut [Slot<N>],
        index: usize,
        extra: &[u8],
    ) -> Result<(), PoolError> {
        let slot = slots.get_mut(index).ok_or(PoolError::Stale)?;
        if slot.is_free() {
            return Err(PoolError::Stale);
        }
        if slot.len + extra.len() > N {
            return Err(PoolError::PayloadTooLarge);
        }
        slot.data[slot.len..slot.len + extra.len()].copy_from_slice(extra);
        slot.len += extra.len();
        Ok(())
    }

    /// Reads the bytes currently held by `handle`.
    pub fn read(&self, handle: PayloadHandle) -> Result<&[u8], PoolError> {
        match handle.class {
            PayloadClass::Basic => Self::read_in(&self.basic, handle.index),
            PayloadClass::Datagram => Self::read_in(&self.datagram, handle.index),
            PayloadClass::Snip => Self::read_in(&self.snip, handle.index),
            PayloadClass::Stream => Self::read_in(&self.stream, handle.index),
        }
    }

    fn read_in<const N: usize>(slots: &[Slot<N>], index: usize) -> Result<&[u8], PoolError> {
        let slot = slots.get(index).ok_or(PoolError::Stale)?;
        if slot.is_free() {
            return Err(PoolError::Stale);
        }
        Ok(&slot.data[..slot.len])
    }

    /// Increments the reference count of the slot behind `handle` — a second
    /// [`Message`](crate::message::Message) now shares the same payload.
    pub fn retain(&mut self, handle: PayloadHandle) -> Result<(), PoolError> {
        match handle.class {
            PayloadClass::Basic => Self::retain_in(&mut self.basic, handle.index),
            PayloadClass::Datagram => Self::retain_in(&mut self.datagram, handle.index),
            PayloadClass::Snip => Self::retain_in(&mut self.snip, handle.index),
            PayloadClass::Stream => Self::retain_in(&mut self.stream, handle.index),
        }
    }

    fn retain_in<const N: usize>(slots: &mut [Slot<N>], index: usize) -> Result<(), PoolError> {
        let slot = slots.get_mut(index).ok_or(PoolError::Stale)?;
        if slot.is_free() {
            return Err(PoolError::Stale);
        }
        slot.refcount = slot.refcount.saturating_add(1);
        Ok(())
    }

    /// Decrements the reference count of the slot behind `handle`, freeing it
    /// for reuse once it reaches zero.
    pub fn release(&mut self, handle: PayloadHandle) {
        match handle.class {
            PayloadClass::Basic => Self::release_in(&mut self.basic, handle.index),
            PayloadClass::Datagram => Self::release_in(&mut self.datagram, handle.index),
            PayloadClass::Snip => Self::release_in(&mut self.snip, handle.index),
            PayloadClass::Stream => Self::release_in(&mut self.stream, handle.index),
        }
    }

    fn release_in<const N: usize>(slots: &mut [Slot<N>], index: usize) {
        if let Some(slot) = slots.get_mut(index) {
            slot.refcount = slot.refcount.saturating_sub(1);
            if slot.refcount == 0 {
                slot.len = 0;
            }
        }
    }

    /// Number of currently free slots in `class`, for diagnostics/tests.
    pub fn free_count(&self, class: PayloadClass) -> usize {
        match class {
            PayloadClass::Basic => self.basic.iter().filter(|s| s.is_free()).count(),
            PayloadClass::Datagram => self.datagram.iter().filter(|s| s.is_free()).count(),
            PayloadClass::Snip => self.snip.iter().filter(|s| s.is_free()).count(),
            PayloadClass::Stream => self.stream.iter().filter(|s| s.is_free()).count(),
        }
    }
}

impl<const BASIC: usize, const DATAGRAM: usize, const SNIP: usize, const STREAM: usize> Default
    for BufferPool<BASIC, DATAGRAM, SNIP, STREAM>
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestPool = BufferPool<2, 2, 1, 1>;

    #[test]
    fn allocate_and_read_round_trips() {
        let mut pool = TestPool::new();
        let handle = pool.allocate(&[1, 2, 3]).unwrap();
        assert_eq!(pool.read(handle).unwrap(), &[1, 2, 3]);
        assert_eq!(handle.class(), PayloadClass::Basic);
    }

    #[test]
    fn exhaustion_is_reported_per_class() {
        let mut pool = TestPool::new();
        let _a = pool.allocate(&[1]).unwrap();
        let _b = pool.allocate(&[2]).unwrap();
        assert_eq!(pool.allocate(&[3]), Err(PoolError::Exhausted));
    }

    #[test]
    fn release_frees_slot_for_reuse() {
        let mut pool = TestPool::new();
        let a = pool.allocate(&[1]).unwrap();
        let _b = pool.allocate(&[2]).unwrap();
        pool.release(a);
        let c = pool.allocate(&[3]).unwrap();
        assert_eq!(pool.read(c).unwrap(), &[3]);
    }

    #[test]
    fn retained_payload_survives_one_release() {
        let mut pool = TestPool::new();
        let a = pool.allocate(&[9]).unwrap();
        pool.retain(a).unwrap();
        pool.release(a);
        assert_eq!(pool.read(a).unwrap(), &[9]);
        pool.release(a);
        assert_eq!(pool.read(a), Err(PoolError::Stale));
    }

    #[test]
    fn append_grows_payload_within_capacity() {
        let mut pool = TestPool::new();
        let handle = pool.allocate_empty(PayloadClass::Basic).unwrap();
        pool.append(handle, &[1, 2]).unwrap();
        pool.append(handle, &[3]).unwrap();
        assert_eq!(pool.read(handle).unwrap(), &[1, 2, 3]);
    }

    #[test]
    fn append_past_capacity_fails() {
        let mut pool = TestPool::new();
        let handle = pool.allocate(&[0; 8]).unwrap();
        assert_eq!(pool.append(handle, &[1]), Err(PoolError::PayloadTooLarge));
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let mut pool = TestPool::new();
        assert_eq!(pool.allocate(&[0; 254]), Err(PoolError::PayloadTooLarge));
    }
}
