//! Seam to a dex object model. Decoding and re-encoding dex files is left to
//! an implementation of [`DexCodec`]; the confusers only need to walk methods
//! and append instructions.

use crate::error::Result;

/// `fill-array-data-payload` pseudo-instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayData {
    pub element_width: u16,
    pub element_count: u32,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    ArrayData(ArrayData),
    /// Any other instruction, identified by opcode only.
    Op(u8),
}

pub trait DexMethod {
    fn instruction_count(&self) -> usize;
    fn instruction(&self, index: usize) -> Option<&Instruction>;
    fn append_instruction(&mut self, instruction: Instruction);

    fn last_instruction(&self) -> Option<&Instruction> {
        self.instruction_count()
            .checked_sub(1)
            .and_then(|i| self.instruction(i))
    }
}

pub trait DexClass {
    fn method_count(&self) -> usize;
    fn method_mut(&mut self, index: usize) -> &mut dyn DexMethod;
}

pub trait DexFile {
    fn class_count(&self) -> usize;
    fn class_mut(&mut self, index: usize) -> &mut dyn DexClass;
    /// Recomputes derived structures after edits.
    fn refresh(&mut self);
    /// Drops structures that are no longer referenced.
    fn shrink(&mut self);
    /// Fully re-lays out the file and returns its bytes.
    fn encode(&mut self) -> Result<Vec<u8>>;
}

pub trait DexCodec {
    fn decode(&self, bytes: &[u8]) -> Result<Box<dyn DexFile>>;
}
