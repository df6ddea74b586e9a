//! Bounded slot table for accepted stream connections.
//!
//! Slots are reused after removal. The capacity is fixed at construction;
//! an insert into a full table hands the item back so the caller can close
//! it.

/// Index of an occupied slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(usize);

impl ConnectionId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Fixed-capacity slot table.
#[derive(Debug)]
pub struct ConnectionSlots<T> {
    slots: Vec<Option<T>>,
    free: Vec<usize>,
    len: usize,
    capacity: usize,
}

impl<T> ConnectionSlots<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
            capacity,
        }
    }

    /// Store `item`, or return it when every slot is taken.
    pub fn insert(&mut self, item: T) -> Result<ConnectionId, T> {
        if self.len >= self.capacity {
            return Err(item);
        }
        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index] = Some(item);
                index
            }
            None => {
                self.slots.push(Some(item));
                self.slots.len() - 1
            }
        };
        self.len += 1;
        Ok(ConnectionId(index))
    }

    pub fn remove(&mut self, id: ConnectionId) -> Option<T> {
        let item = self.slots.get_mut(id.0)?.take()?;
        self.free.push(id.0);
        self.len -= 1;
        Some(item)
    }

    pub fn get(&self, id: ConnectionId) -> Option<&T> {
        self.slots.get(id.0)?.as_ref()
    }

    /// Occupied slots in index order.
    pub fn iter(&self) -> impl Iterator<Item = (ConnectionId, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|item| (ConnectionId(i), item)))
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
