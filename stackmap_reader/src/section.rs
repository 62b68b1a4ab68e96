use std::fmt;

use byteorder::ByteOrder;
use thiserror::Error;

use crate::parser::{ParseError, Parser};

/// Parsed image of one stack map section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackMapSection {
    pub version: u8,
    pub functions: Vec<StackSizeRecord>,
    pub constants: Vec<u64>,
    pub records: Vec<StackMapRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackSizeRecord {
    pub addr: u64,
    pub stack_size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackMapRecord {
    pub patch_point_id: u64,
    pub instruction_offset: u32,
    pub flags: u16,
    pub locations: Vec<LocationRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocationRecord {
    pub kind: LocationKind,
    pub size: u8,
    pub dwarf_reg: u16,
    pub offset: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LocationKind {
    Unprocessed = 0,
    Register = 1,
    Direct = 2,
    Indirect = 3,
    Constant = 4,
    ConstantIndex = 5,
}

impl LocationKind {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(LocationKind::Unprocessed),
            1 => Some(LocationKind::Register),
            2 => Some(LocationKind::Direct),
            3 => Some(LocationKind::Indirect),
            4 => Some(LocationKind::Constant),
            5 => Some(LocationKind::ConstantIndex),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LocationKind::Unprocessed => "Unprocessed",
            LocationKind::Register => "Register",
            LocationKind::Direct => "Direct",
            LocationKind::Indirect => "Indirect",
            LocationKind::Constant => "Constant",
            LocationKind::ConstantIndex => "ConstantIndex",
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum VerifyError {
    #[error("section carries unsupported layout version {0}")]
    BadVersion(u8),
    #[error("record {record} carries non-zero flags {actual}")]
    NonZeroFlags { record: usize, actual: u16 },
}

impl StackSizeRecord {
    /// Dynamically sized frames are recorded with an all-ones sentinel
    /// instead of a byte count.
    pub fn is_fixed_size_frame(&self) -> bool {
        self.stack_size != u64::MAX
    }
}

impl StackMapSection {
    pub fn parse<BO: ByteOrder>(data: &[u8]) -> Result<Self, ParseError> {
        Parser::<BO>::parse(data)
    }

    /// Re-check an already-built section. The parser enforces the same
    /// rules, so this mainly guards hand-assembled sections.
    pub fn verify(&self) -> Result<(), VerifyError> {
        if self.version != 1 {
            return Err(VerifyError::BadVersion(self.version));
        }
        for (idx, record) in self.records.iter().enumerate() {
            if record.flags != 0 {
                return Err(VerifyError::NonZeroFlags {
                    record: idx,
                    actual: record.flags,
                });
            }
        }
        Ok(())
    }

    /// The first record whose instruction offset equals `rel_pc`.
    pub fn find_record_for_rel_pc(&self, rel_pc: u32) -> Option<&StackMapRecord> {
        // brute force search for the moment, could be improved
        self.records
            .iter()
            .find(|rec| rec.instruction_offset == rel_pc)
    }

    pub fn has_record_for_rel_pc(&self, rel_pc: u32) -> bool {
        self.find_record_for_rel_pc(rel_pc).is_some()
    }
}

impl fmt::Display for StackMapSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Functions ({}) [", self.functions.len())?;
        for func in &self.functions {
            writeln!(f, "  addr = {:#x}, size = {}", func.addr, func.stack_size)?;
        }
        writeln!(f, "]")?;

        writeln!(f, "Constants ({}) [", self.constants.len())?;
        for value in &self.constants {
            writeln!(f, "  value = {}", value)?;
        }
        writeln!(f, "]")?;

        writeln!(f, "Records ({}) [", self.records.len())?;
        for rec in &self.records {
            writeln!(
                f,
                "  id = {}, offset = {}, flags = {}",
                rec.patch_point_id, rec.instruction_offset, rec.flags
            )?;
            writeln!(f, "  Locations ({}) [", rec.locations.len())?;
            for loc in &rec.locations {
                writeln!(
                    f,
                    "    type = {}, size = {}, dwarfreg = {}, offset = {}",
                    loc.kind.as_str(),
                    loc.size,
                    loc.dwarf_reg,
                    loc.offset
                )?;
            }
            writeln!(f, "  ]")?;
        }
        writeln!(f, "]")
    }
}
