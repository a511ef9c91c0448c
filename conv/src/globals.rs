// globals.rs - Persisted per-conversation globals
//
// Each conversation slot owns a fixed number of 16-bit globals that survive
// between conversations. The save layout is a sequence of
// (u16 slot, u16 size, size x u16) records.

use crate::error::GlobalsError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConvGlobals {
    slots: Vec<Vec<u16>>,
}

impl ConvGlobals {
    /// Zero-initialized slots of the given sizes
    pub fn with_sizes(sizes: &[u16]) -> Self {
        ConvGlobals {
            slots: sizes.iter().map(|&size| vec![0; size as usize]).collect(),
        }
    }

    /// Parse saved globals
    pub fn parse(data: &[u8]) -> Result<Self, GlobalsError> {
        let word = |offset: usize| {
            data.get(offset..offset + 2)
                .map(|b| u16::from_le_bytes([b[0], b[1]]))
        };

        let mut globals = ConvGlobals::default();
        let mut offset = 0;
        while offset < data.len() {
            let header = word(offset).zip(word(offset + 2));
            let (slot, size) = header.ok_or(GlobalsError::TruncatedHeader { offset })?;
            offset += 4;

            let mut values = Vec::with_capacity(size as usize);
            for _ in 0..size {
                values.push(word(offset).ok_or(GlobalsError::TruncatedSlot { slot, offset })?);
                offset += 2;
            }

            let slot = slot as usize;
            if globals.slots.len() <= slot {
                globals.slots.resize(slot + 1, Vec::new());
            }
            globals.slots[slot] = values;
        }

        Ok(globals)
    }

    /// Serialize in the save layout
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = Vec::new();
        for (slot, values) in self.slots.iter().enumerate() {
            data.extend_from_slice(&(slot as u16).to_le_bytes());
            data.extend_from_slice(&(values.len() as u16).to_le_bytes());
            for value in values {
                data.extend_from_slice(&value.to_le_bytes());
            }
        }
        data
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Globals of one slot; empty for unknown slots
    pub fn slot(&self, slot: u16) -> &[u16] {
        self.slots.get(slot as usize).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn slot_mut(&mut self, slot: u16) -> Option<&mut Vec<u16>> {
        self.slots.get_mut(slot as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_globals() {
        let mut globals = ConvGlobals::with_sizes(&[2, 0, 3]);
        if let Some(slot) = globals.slot_mut(2) {
            slot.copy_from_slice(&[7, 8, 9]);
        }

        let parsed = ConvGlobals::parse(&globals.to_bytes()).unwrap();
        assert_eq!(parsed.slot_count(), 3);
        assert_eq!(parsed.slot(0), &[0, 0]);
        assert_eq!(parsed.slot(2), &[7, 8, 9]);
        assert!(parsed.slot(5).is_empty());
    }

    #[test]
    fn test_truncated_globals() {
        let data = [0u8, 0, 2, 0, 1, 0];
        let err = ConvGlobals::parse(&data).unwrap_err();
        assert_eq!(err, GlobalsError::TruncatedSlot { slot: 0, offset: 6 });
        assert_eq!(err.to_string(), "globals of slot 0 cut off at offset 0x6");

        assert_eq!(
            ConvGlobals::parse(&[1u8, 0, 2]).unwrap_err(),
            GlobalsError::TruncatedHeader { offset: 0 }
        );
    }
}
