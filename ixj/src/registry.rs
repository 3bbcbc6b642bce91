//! Card arena addressed by checked handles.

use std::sync::Arc;

use log::info;

use crate::card::Card;
use crate::error::{Error, Result};

pub const MAX_CARDS: usize = 16;

/// Handle to a registered card. Goes stale once the card is removed, even if
/// its slot is reused.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct CardId {
    index: usize,
    generation: u32,
}

impl CardId {
    pub fn index(self) -> usize {
        self.index
    }
}

#[derive(Default)]
struct Slot {
    generation: u32,
    card: Option<Arc<Card>>,
}

pub struct CardRegistry {
    slots: Vec<Slot>,
}

impl Default for CardRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CardRegistry {
    pub fn new() -> Self {
        Self {
            slots: (0..MAX_CARDS).map(|_| Slot::default()).collect(),
        }
    }

    pub fn register(&mut self, card: Card) -> Result<CardId> {
        let index = self.slots.iter().position(|s| s.card.is_none()).ok_or(Error::Busy)?;
        let slot = &mut self.slots[index];
        info!("card {index}: {:?}", card.kind());
        slot.card = Some(Arc::new(card));
        Ok(CardId {
            index,
            generation: slot.generation,
        })
    }

    fn slot(&self, id: CardId) -> Option<&Slot> {
        self.slots.get(id.index).filter(|s| s.generation == id.generation)
    }

    pub fn get(&self, id: CardId) -> Result<Arc<Card>> {
        self.slot(id).and_then(|s| s.card.clone()).ok_or(Error::NoCard)
    }

    pub fn remove(&mut self, id: CardId) -> Result<Arc<Card>> {
        match self.slots.get_mut(id.index) {
            Some(slot) if slot.generation == id.generation => {
                let card = slot.card.take().ok_or(Error::NoCard)?;
                slot.generation = slot.generation.wrapping_add(1);
                info!("card {} removed", id.index);
                Ok(card)
            }
            _ => Err(Error::NoCard),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.card.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (CardId, &Arc<Card>)> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            let id = CardId {
                index,
                generation: slot.generation,
            };
            slot.card.as_ref().map(|card| (id, card))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::card::CardConfig;
    use crate::clock::ManualClock;
    use crate::hook::CardKind;
    use crate::sim::SimCard;

    fn card(kind: CardKind) -> Card {
        let sim = Arc::new(SimCard::new(kind, 0x300, 0x310));
        let config = CardConfig {
            kind,
            ..Default::default()
        };
        Card::new(sim, config, Arc::new(ManualClock::new(1000))).unwrap()
    }

    #[test]
    fn stale_handles_are_refused() {
        let mut registry = CardRegistry::new();
        let first = registry.register(card(CardKind::LineJack)).unwrap();
        assert_eq!(registry.get(first).unwrap().kind(), CardKind::LineJack);

        registry.remove(first).unwrap();
        assert!(matches!(registry.get(first), Err(Error::NoCard)));
        assert!(matches!(registry.remove(first), Err(Error::NoCard)));

        // Same slot, new generation.
        let second = registry.register(card(CardKind::PhoneJackLite)).unwrap();
        assert_eq!(second.index(), first.index());
        assert!(matches!(registry.get(first), Err(Error::NoCard)));
        assert_eq!(registry.get(second).unwrap().kind(), CardKind::PhoneJackLite);
    }

    #[test]
    fn arena_fills_up() {
        let mut registry = CardRegistry::new();
        for _ in 0..MAX_CARDS {
            registry.register(card(CardKind::PhoneJack)).unwrap();
        }
        assert_eq!(registry.len(), MAX_CARDS);
        assert!(matches!(registry.register(card(CardKind::PhoneJack)), Err(Error::Busy)));

        let ids: Vec<_> = registry.iter().map(|(id, _)| id).collect();
        assert_eq!(ids.len(), MAX_CARDS);
        registry.remove(ids[3]).unwrap();
        assert_eq!(registry.register(card(CardKind::PhoneJack)).unwrap().index(), 3);
    }
}
