use std::marker::PhantomData;

use byteorder::ByteOrder;
use thiserror::Error;

use crate::section::{
    LocationKind, LocationRecord, StackMapRecord, StackMapSection, StackSizeRecord,
};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    #[error("cannot parse stack map layout version {0}")]
    UnsupportedVersion(u8),
    #[error("reserved field at {offset} expected to be 0, actually {actual}")]
    NonZeroReserved { offset: usize, actual: u64 },
    #[error("record flags at {offset} expected to be 0, actually {actual}")]
    NonZeroFlags { offset: usize, actual: u16 },
    #[error("padding at {offset} expected to be 0, actually {actual}")]
    NonZeroPadding { offset: usize, actual: u32 },
    #[error("read unsupported location type {0}")]
    UnsupportedLocationType(u8),
    #[error("live-out parsing is not implemented, refusing {0} live-outs")]
    UnsupportedLiveOuts(u16),
    #[error("unexpectedly hit end of input data while reading {0} bytes")]
    UnexpectedEof(usize),
}

type Result<T> = std::result::Result<T, ParseError>;

/// Streaming parser over a stack map section in layout version 1.
///
/// Layout:
///
/// Header { uint8 version; uint8 reserved; uint16 reserved }
/// uint32 : NumFunctions
/// uint32 : NumConstants
/// uint32 : NumRecords
/// StkSizeRecord[NumFunctions] { uint64 addr; uint64 stack size }
/// Constants[NumConstants]     { uint64 }
/// StkMapRecord[NumRecords] {
///   uint64 : PatchPoint ID
///   uint32 : Instruction Offset
///   uint16 : Record flags (must be 0)
///   uint16 : NumLocations
///   Location[NumLocations] { uint8 kind; uint8 size; uint16 dwarf reg; int32 offset }
///   uint16 : Padding (must be 0)
///   uint16 : NumLiveOuts (must be 0, live-out parsing is unimplemented)
///   zero bytes up to the next 8-byte boundary
/// }
pub struct Parser<'a, BO: ByteOrder> {
    data: &'a [u8],
    pos: usize,
    _phantom: PhantomData<BO>,
}

impl<'a, BO: ByteOrder + 'a> Parser<'a, BO> {
    pub fn parse(data: &'a [u8]) -> Result<StackMapSection> {
        let mut parser = Parser {
            data,
            pos: 0,
            _phantom: PhantomData::<BO>,
        };

        parser.parse_section()
    }

    fn parse_section(&mut self) -> Result<StackMapSection> {
        let version = self.read_u8()?;
        if version != 1 {
            return Err(ParseError::UnsupportedVersion(version));
        }
        self.expect_reserved_u8()?;
        self.expect_reserved_u16()?;

        let num_functions = self.read_u32()?;
        let num_constants = self.read_u32()?;
        let num_records = self.read_u32()?;

        let mut functions = Vec::with_capacity(num_functions as usize);
        for _ in 0..num_functions {
            let addr = self.read_u64()?;
            let stack_size = self.read_u64()?;
            functions.push(StackSizeRecord { addr, stack_size });
        }

        let mut constants = Vec::with_capacity(num_constants as usize);
        for _ in 0..num_constants {
            constants.push(self.read_u64()?);
        }

        let mut records = Vec::with_capacity(num_records as usize);
        for _ in 0..num_records {
            records.push(self.parse_record()?);
        }

        Ok(StackMapSection {
            version,
            functions,
            constants,
            records,
        })
    }

    fn parse_record(&mut self) -> Result<StackMapRecord> {
        let patch_point_id = self.read_u64()?;
        let instruction_offset = self.read_u32()?;

        let flags_offset = self.pos;
        let flags = self.read_u16()?;
        if flags != 0 {
            return Err(ParseError::NonZeroFlags {
                offset: flags_offset,
                actual: flags,
            });
        }

        let num_locations = self.read_u16()?;
        let mut locations = Vec::with_capacity(num_locations as usize);
        for _ in 0..num_locations {
            locations.push(self.parse_location()?);
        }

        self.expect_padding_u16()?;

        let num_live_outs = self.read_u16()?;
        if num_live_outs != 0 {
            return Err(ParseError::UnsupportedLiveOuts(num_live_outs));
        }

        // skip the zero padding inserted to realign the stream
        while self.pos % 8 != 0 {
            let offset = self.pos;
            let byte = self.read_u8()?;
            if byte != 0 {
                return Err(ParseError::NonZeroPadding {
                    offset,
                    actual: byte as u32,
                });
            }
        }

        Ok(StackMapRecord {
            patch_point_id,
            instruction_offset,
            flags,
            locations,
        })
    }

    fn parse_location(&mut self) -> Result<LocationRecord> {
        let raw_kind = self.read_u8()?;
        let kind = LocationKind::from_u8(raw_kind)
            .ok_or(ParseError::UnsupportedLocationType(raw_kind))?;
        let size = self.read_u8()?;
        let dwarf_reg = self.read_u16()?;
        let offset = self.read_i32()?;

        Ok(LocationRecord {
            kind,
            size,
            dwarf_reg,
            offset,
        })
    }

    fn read_n(&mut self, n: usize) -> Result<&[u8]> {
        let (new_pos, over) = self.pos.overflowing_add(n);
        if over || new_pos > self.data.len() {
            return Err(ParseError::UnexpectedEof(n));
        }
        let res = &self.data[self.pos..new_pos];
        self.pos = new_pos;
        Ok(res)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_n(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16> {
        Ok(BO::read_u16(self.read_n(2)?))
    }

    fn read_u32(&mut self) -> Result<u32> {
        Ok(BO::read_u32(self.read_n(4)?))
    }

    fn read_u64(&mut self) -> Result<u64> {
        Ok(BO::read_u64(self.read_n(8)?))
    }

    fn read_i32(&mut self) -> Result<i32> {
        Ok(BO::read_i32(self.read_n(4)?))
    }

    fn expect_reserved_u8(&mut self) -> Result<()> {
        let offset = self.pos;
        let n = self.read_u8()?;
        if n != 0 {
            Err(ParseError::NonZeroReserved {
                offset,
                actual: n as u64,
            })
        } else {
            Ok(())
        }
    }

    fn expect_reserved_u16(&mut self) -> Result<()> {
        let offset = self.pos;
        let n = self.read_u16()?;
        if n != 0 {
            Err(ParseError::NonZeroReserved {
                offset,
                actual: n as u64,
            })
        } else {
            Ok(())
        }
    }

    fn expect_padding_u16(&mut self) -> Result<()> {
        let offset = self.pos;
        let n = self.read_u16()?;
        if n != 0 {
            Err(ParseError::NonZeroPadding {
                offset,
                actual: n as u32,
            })
        } else {
            Ok(())
        }
    }
}
