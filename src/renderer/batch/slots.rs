use crate::renderer::resources::texture::TextureId;

/// Outcome of resolving a texture identity against the slot array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotResolution {
    /// The texture already occupies this slot.
    Existing(u32),
    /// The texture was appended into this slot.
    Assigned(u32),
    /// All slots taken; the draw proceeds with slot 0 and the array is
    /// left untouched.
    Overflow,
}

impl SlotResolution {
    pub fn index(self) -> u32 {
        match self {
            Self::Existing(slot) | Self::Assigned(slot) => slot,
            Self::Overflow => 0,
        }
    }
}

/// Bounded, append-only mapping from texture identity to slot index.
///
/// Slots are never vacated individually; the array only grows until
/// `max_slots` and is emptied as a whole by `reset`.
pub struct TextureSlots {
    entries: Vec<TextureId>,
    max_slots: usize,
    generation: u64,
}

impl TextureSlots {
    pub fn new(max_slots: usize) -> Self {
        Self {
            entries: Vec::with_capacity(max_slots),
            max_slots,
            generation: 0,
        }
    }

    /// Linear scan; `max_slots` is small so this beats a map.
    pub fn resolve_or_assign(&mut self, id: TextureId) -> SlotResolution {
        if let Some(slot) = self.entries.iter().position(|entry| *entry == id) {
            return SlotResolution::Existing(slot as u32);
        }
        if self.entries.len() < self.max_slots {
            self.entries.push(id);
            self.generation += 1;
            return SlotResolution::Assigned(self.entries.len() as u32 - 1);
        }
        SlotResolution::Overflow
    }

    /// Bumped on every new assignment (and on reset). Descriptor writes for
    /// the sampler array only need to happen when this changes.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn reset(&mut self) {
        self.entries.clear();
        self.generation += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_identity_always_resolves_to_the_same_slot() {
        let mut slots = TextureSlots::new(8);
        let a = TextureId::next();
        let b = TextureId::next();

        assert_eq!(slots.resolve_or_assign(a), SlotResolution::Assigned(0));
        assert_eq!(slots.resolve_or_assign(b), SlotResolution::Assigned(1));
        assert_eq!(slots.resolve_or_assign(a), SlotResolution::Existing(0));
        assert_eq!(slots.resolve_or_assign(b), SlotResolution::Existing(1));
        assert_eq!(slots.len(), 2);
    }

    #[test]
    fn ninth_distinct_texture_falls_back_to_slot_zero() {
        let mut slots = TextureSlots::new(8);
        let ids: Vec<TextureId> = (0..9).map(|_| TextureId::next()).collect();

        for (i, id) in ids[..8].iter().enumerate() {
            assert_eq!(slots.resolve_or_assign(*id), SlotResolution::Assigned(i as u32));
        }
        let overflow = slots.resolve_or_assign(ids[8]);
        assert_eq!(overflow, SlotResolution::Overflow);
        assert_eq!(overflow.index(), 0);
        // Overflow must not mutate the array.
        assert_eq!(slots.len(), 8);
        assert_eq!(slots.resolve_or_assign(ids[0]), SlotResolution::Existing(0));
    }

    #[test]
    fn assignments_are_stable_across_frames() {
        // The array is append-only for the life of its owner: resolving the
        // same ids over many frame-shaped rounds must never move a texture,
        // and slot 0 keeps its first occupant even under overflow pressure.
        let mut slots = TextureSlots::new(4);
        let ids: Vec<TextureId> = (0..4).map(|_| TextureId::next()).collect();
        for (i, id) in ids.iter().enumerate() {
            assert_eq!(slots.resolve_or_assign(*id), SlotResolution::Assigned(i as u32));
        }
        let generation = slots.generation();

        for _frame in 0..100 {
            for (i, id) in ids.iter().enumerate() {
                assert_eq!(slots.resolve_or_assign(*id), SlotResolution::Existing(i as u32));
            }
            let latecomer = TextureId::next();
            assert_eq!(slots.resolve_or_assign(latecomer), SlotResolution::Overflow);
        }
        assert_eq!(slots.resolve_or_assign(ids[0]), SlotResolution::Existing(0));
        assert_eq!(slots.generation(), generation);
    }

    #[test]
    fn generation_bumps_only_on_new_assignments() {
        let mut slots = TextureSlots::new(4);
        let a = TextureId::next();
        let b = TextureId::next();

        assert_eq!(slots.generation(), 0);
        slots.resolve_or_assign(a);
        assert_eq!(slots.generation(), 1);
        slots.resolve_or_assign(a);
        assert_eq!(slots.generation(), 1);
        slots.resolve_or_assign(b);
        assert_eq!(slots.generation(), 2);
    }

    #[test]
    fn reset_clears_all_assignments() {
        let mut slots = TextureSlots::new(4);
        let a = TextureId::next();
        slots.resolve_or_assign(a);
        assert!(!slots.is_empty());

        slots.reset();
        assert!(slots.is_empty());
        assert_eq!(slots.resolve_or_assign(a), SlotResolution::Assigned(0));
    }
}
