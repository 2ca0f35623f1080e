//! Entity arena
//!
//! Entities hosted on a fiber live in one flat table keyed by instance id.
//! Ownership is expressed with non-owning parent ids: removing an entity
//! removes its whole subtree, and nothing else points into the table.

use crate::error::{FiberError, Result};
use std::collections::HashMap;

#[derive(Debug)]
struct Slot<T> {
    parent: Option<i64>,
    children: Vec<i64>,
    value: T,
}

#[derive(Debug)]
pub struct EntityArena<T> {
    slots: HashMap<i64, Slot<T>>,
}

impl<T> Default for EntityArena<T> {
    fn default() -> Self {
        Self {
            slots: HashMap::new(),
        }
    }
}

impl<T> EntityArena<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `value` under `instance`, optionally as a child of `parent`
    pub fn insert(&mut self, instance: i64, parent: Option<i64>, value: T) -> Result<()> {
        if self.slots.contains_key(&instance) {
            return Err(FiberError::DuplicateEntity { instance });
        }
        if let Some(parent) = parent {
            self.slots
                .get_mut(&parent)
                .ok_or(FiberError::UnknownEntity { instance: parent })?
                .children
                .push(instance);
        }
        self.slots.insert(
            instance,
            Slot {
                parent,
                children: Vec::new(),
                value,
            },
        );
        Ok(())
    }

    pub fn get(&self, instance: i64) -> Option<&T> {
        self.slots.get(&instance).map(|slot| &slot.value)
    }

    pub fn get_mut(&mut self, instance: i64) -> Option<&mut T> {
        self.slots.get_mut(&instance).map(|slot| &mut slot.value)
    }

    pub fn parent(&self, instance: i64) -> Option<i64> {
        self.slots.get(&instance).and_then(|slot| slot.parent)
    }

    pub fn children(&self, instance: i64) -> &[i64] {
        self.slots
            .get(&instance)
            .map_or(&[][..], |slot| slot.children.as_slice())
    }

    /// Remove `instance` and all of its descendants
    ///
    /// Returns the removed values, descendants before their parents.
    pub fn remove(&mut self, instance: i64) -> Vec<(i64, T)> {
        let Some(parent) = self.slots.get(&instance).map(|slot| slot.parent) else {
            return Vec::new();
        };
        if let Some(parent) = parent.and_then(|p| self.slots.get_mut(&p)) {
            parent.children.retain(|&child| child != instance);
        }

        let mut removed = Vec::new();
        let mut stack = vec![(instance, false)];
        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                if let Some(slot) = self.slots.remove(&id) {
                    removed.push((id, slot.value));
                }
                continue;
            }
            stack.push((id, true));
            for &child in self.children(id) {
                stack.push((child, false));
            }
        }
        removed
    }

    pub fn contains(&self, instance: i64) -> bool {
        self.slots.contains_key(&instance)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = i64> + '_ {
        self.slots.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remove_cascades_to_descendants() {
        let mut arena = EntityArena::new();
        arena.insert(1, None, "scene").unwrap();
        arena.insert(2, Some(1), "player").unwrap();
        arena.insert(3, Some(2), "bag").unwrap();
        arena.insert(4, Some(1), "npc").unwrap();
        arena.insert(5, None, "other").unwrap();

        let removed = arena.remove(2);
        let ids: Vec<i64> = removed.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![3, 2]);
        assert_eq!(arena.children(1), &[4i64][..]);
        assert_eq!(arena.len(), 3);

        let removed = arena.remove(1);
        assert_eq!(removed.len(), 2);
        assert_eq!(removed.last().unwrap().0, 1);
        assert!(arena.contains(5));
        assert!(arena.remove(1).is_empty());
    }

    #[test]
    fn test_insert_validation() {
        let mut arena = EntityArena::new();
        arena.insert(1, None, ()).unwrap();
        assert!(matches!(
            arena.insert(1, None, ()),
            Err(FiberError::DuplicateEntity { instance: 1 })
        ));
        assert!(matches!(
            arena.insert(2, Some(9), ()),
            Err(FiberError::UnknownEntity { instance: 9 })
        ));
        assert_eq!(arena.parent(1), None);
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_get_mut() {
        let mut arena = EntityArena::new();
        arena.insert(10, None, 1u32).unwrap();
        arena.insert(11, Some(10), 2u32).unwrap();
        *arena.get_mut(11).unwrap() += 5;
        assert_eq!(arena.get(11), Some(&7));
        assert_eq!(arena.parent(11), Some(10));
    }
}
