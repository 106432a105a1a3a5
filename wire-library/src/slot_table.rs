use std::collections::BTreeSet;

/// Fixed-capacity table handing out the lowest free slot first.
///
/// Slot numbers start at 1, which matches how AMQP numbers channels (channel 0 belongs to the
/// connection itself).
#[derive(Debug, Clone)]
pub struct SlotTable<T> {
    entries: Vec<Option<T>>,
    free_entries: BTreeSet<usize>,
    limit: usize,
}

impl<T> SlotTable<T> {
    pub fn new(limit: usize) -> Self {
        SlotTable {
            entries: vec![],
            free_entries: BTreeSet::new(),
            limit,
        }
    }

    pub fn insert(&mut self, value: T) -> Option<usize> {
        self.insert_with(|_| value)
    }

    /// Like `insert`, but builds the value from the slot it is going to occupy.
    pub fn insert_with<F: FnOnce(usize) -> T>(&mut self, build: F) -> Option<usize> {
        let index = match self.free_entries.pop_first() {
            Some(i) => i,
            None => {
                if self.entries.len() >= self.limit {
                    return None;
                }

                self.entries.push(None);
                self.entries.len() - 1
            }
        };

        self.entries[index] = Some(build(index + 1));
        Some(index + 1)
    }

    pub fn remove(&mut self, slot: usize) -> Option<T> {
        let index = slot.checked_sub(1)?;
        let value = self.entries.get_mut(index)?.take()?;

        if index + 1 == self.entries.len() {
            self.entries.pop();
            while let Some(None) = self.entries.last() {
                self.entries.pop();
                self.free_entries.remove(&self.entries.len());
            }
        } else {
            self.free_entries.insert(index);
        }

        Some(value)
    }

    pub fn get(&self, slot: usize) -> Option<&T> {
        let index = slot.checked_sub(1)?;
        self.entries.get(index)?.as_ref()
    }

    pub fn len(&self) -> usize {
        self.entries.len() - self.free_entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Empties the table, returning every occupied slot in ascending order.
    pub fn drain(&mut self) -> Vec<(usize, T)> {
        let entries = std::mem::take(&mut self.entries);
        self.free_entries.clear();

        entries
            .into_iter()
            .enumerate()
            .filter_map(|(index, entry)| entry.map(|value| (index + 1, value)))
            .collect()
    }
}

impl<T: Clone> SlotTable<T> {
    pub fn clone_slot(&self, slot: usize) -> Option<T> {
        self.get(slot).cloned()
    }
}
