use crate::id::MaterialId;
use serde::{Deserialize, Serialize};

/// A stack of a single material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemStack {
    pub material: MaterialId,
    pub quantity: u32,
}

impl ItemStack {
    pub fn new(material: impl Into<MaterialId>, quantity: u32) -> Self {
        Self {
            material: material.into(),
            quantity,
        }
    }
}

/// A machine slot: holds at most one material, up to `capacity` units.
///
/// An empty slot holds `None`; a stack is never kept at quantity zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    stack: Option<ItemStack>,
    capacity: u32,
}

impl Slot {
    pub fn new(capacity: u32) -> Self {
        Self {
            stack: None,
            capacity,
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn stack(&self) -> Option<&ItemStack> {
        self.stack.as_ref()
    }

    pub fn material(&self) -> Option<&MaterialId> {
        self.stack.as_ref().map(|s| &s.material)
    }

    /// Quantity held, regardless of material.
    pub fn quantity(&self) -> u32 {
        self.stack.as_ref().map(|s| s.quantity).unwrap_or(0)
    }

    /// Quantity held of a specific material.
    pub fn quantity_of(&self, material: &MaterialId) -> u32 {
        match &self.stack {
            Some(s) if &s.material == material => s.quantity,
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_none()
    }

    pub fn is_full(&self) -> bool {
        self.quantity() >= self.capacity
    }

    /// How many more units of `material` this slot can take. A slot holding a
    /// different material has no room for it.
    pub fn space_for(&self, material: &MaterialId) -> u32 {
        match &self.stack {
            None => self.capacity,
            Some(s) if &s.material == material => self.capacity.saturating_sub(s.quantity),
            Some(_) => 0,
        }
    }

    /// Add units of a material. Returns the amount that didn't fit.
    #[must_use = "overflow count indicates items that did not fit"]
    pub fn add(&mut self, material: &MaterialId, quantity: u32) -> u32 {
        let to_add = quantity.min(self.space_for(material));
        let overflow = quantity - to_add;

        if to_add > 0 {
            match &mut self.stack {
                Some(stack) => stack.quantity += to_add,
                None => self.stack = Some(ItemStack::new(material.clone(), to_add)),
            }
        }

        overflow
    }

    /// Remove units from the slot. Returns the amount actually removed.
    #[must_use = "returns the quantity actually removed, which may be less than requested"]
    pub fn remove(&mut self, quantity: u32) -> u32 {
        let Some(stack) = &mut self.stack else {
            return 0;
        };
        let to_remove = quantity.min(stack.quantity);
        stack.quantity -= to_remove;
        if stack.quantity == 0 {
            self.stack = None;
        }
        to_remove
    }

    /// Replace the slot contents. Quantity beyond capacity is not stored;
    /// the overflow is returned.
    #[must_use = "overflow count indicates items that did not fit"]
    pub fn set(&mut self, stack: Option<ItemStack>) -> u32 {
        match stack {
            Some(s) if s.quantity > 0 => {
                let kept = s.quantity.min(self.capacity);
                self.stack = (kept > 0).then(|| ItemStack::new(s.material, kept));
                s.quantity - kept
            }
            _ => {
                self.stack = None;
                0
            }
        }
    }

    /// Put back persisted contents as they were, even past capacity. A slot
    /// over capacity has no space until it is drained.
    pub(crate) fn restore(&mut self, stack: Option<ItemStack>) {
        self.stack = stack.filter(|s| s.quantity > 0);
    }

    /// Empty the slot, returning whatever it held.
    pub fn take(&mut self) -> Option<ItemStack> {
        self.stack.take()
    }
}
