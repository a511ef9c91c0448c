// stack.rs - Operand stack of the conversation VM
//
// Fixed-capacity array of 16-bit cells. The bottom cells double as global
// memory, so everything is also reachable by absolute index.

use crate::error::StackError;

/// Stack pointer value of an empty stack
pub const EMPTY_STACK: u16 = 0xffff;

#[derive(Debug, Clone)]
pub struct ConvStack {
    cells: Vec<u16>,
    sp: u16,
}

impl Default for ConvStack {
    fn default() -> Self {
        ConvStack::new(0)
    }
}

impl ConvStack {
    pub fn new(capacity: usize) -> Self {
        ConvStack {
            cells: vec![0; capacity],
            sp: EMPTY_STACK,
        }
    }

    pub fn capacity(&self) -> usize {
        self.cells.len()
    }

    pub fn push(&mut self, value: u16) -> Result<(), StackError> {
        let next = self.sp.wrapping_add(1);
        let capacity = self.cells.len();
        let cell = self
            .cells
            .get_mut(next as usize)
            .ok_or(StackError::Overflow { capacity })?;
        *cell = value;
        self.sp = next;
        Ok(())
    }

    pub fn pop(&mut self) -> Result<u16, StackError> {
        if self.sp == EMPTY_STACK {
            return Err(StackError::Underflow);
        }
        let value = *self
            .cells
            .get(self.sp as usize)
            .ok_or(StackError::Underflow)?;
        self.sp = self.sp.wrapping_sub(1);
        Ok(value)
    }

    pub fn at(&self, index: u16) -> Result<u16, StackError> {
        self.cells
            .get(index as usize)
            .copied()
            .ok_or(StackError::OutOfRange { index })
    }

    pub fn set(&mut self, index: u16, value: u16) -> Result<(), StackError> {
        let cell = self
            .cells
            .get_mut(index as usize)
            .ok_or(StackError::OutOfRange { index })?;
        *cell = value;
        Ok(())
    }

    pub fn stack_pointer(&self) -> u16 {
        self.sp
    }

    pub fn set_stack_pointer(&mut self, sp: u16) {
        self.sp = sp;
    }

    /// Number of cells currently in use
    pub fn size(&self) -> usize {
        self.sp.wrapping_add(1) as usize
    }
}
