use super::{Chunk, Prototype, UpValueDesc};
use crate::errors::LoadError;
use crate::interpreter::{ByteString, Instruction, Value};
use std::rc::Rc;

const SIGNATURE: &[u8] = b"\x1BLua";
const VERSION: u8 = 0x53;
const CONVERSION_MARKER: &[u8] = b"\x19\x93\r\n\x1A\n";
const INTEGER_SENTINEL: i64 = 0x5678;
const NUMBER_SENTINEL: f64 = 370.5;

// constant tags, variant bits included
const TAG_NIL: u8 = 0x00;
const TAG_BOOL: u8 = 0x01;
const TAG_FLOAT: u8 = 0x03;
const TAG_INT: u8 = 0x13;
const TAG_SHORT_STR: u8 = 0x04;
const TAG_LONG_STR: u8 = 0x14;

/// Declared widths and byte order of the chunk's producer. Mismatches with
/// the host are resolved by byte swapping and sign extension at read time.
#[derive(Clone, Copy)]
struct Layout {
    little: bool,
    int_size: u8,
    size_t_size: u8,
    instruction_size: u8,
    integer_size: u8,
    number_size: u8,
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn byte(&mut self) -> Result<u8, LoadError> {
        let b = *self
            .data
            .get(self.pos)
            .ok_or(LoadError::UnexpectedEof(self.pos))?;
        self.pos += 1;
        Ok(b)
    }

    fn peek(&self) -> Result<u8, LoadError> {
        self.data
            .get(self.pos)
            .copied()
            .ok_or(LoadError::UnexpectedEof(self.pos))
    }

    fn block(&mut self, len: usize) -> Result<&'a [u8], LoadError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(LoadError::UnexpectedEof(self.pos))?;

        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    /// Unsigned integer of a declared width, in the declared byte order.
    fn unsigned(&mut self, size: u8, little: bool) -> Result<u64, LoadError> {
        let bytes = self.block(size as usize)?;
        let mut word = 0u64;

        if little {
            for &b in bytes.iter().rev() {
                word = (word << 8) | b as u64;
            }
        } else {
            for &b in bytes {
                word = (word << 8) | b as u64;
            }
        }

        Ok(word)
    }

    /// Signed integer of a declared width, sign-extended to 64 bits.
    fn signed(&mut self, size: u8, little: bool) -> Result<i64, LoadError> {
        let word = self.unsigned(size, little)?;
        let shift = 64 - (size as u32) * 8;

        if shift == 0 {
            Ok(word as i64)
        } else {
            Ok(((word << shift) as i64) >> shift)
        }
    }

    fn native_int(&mut self, layout: Layout) -> Result<i64, LoadError> {
        self.signed(layout.int_size, layout.little)
    }

    fn count(&mut self, layout: Layout) -> Result<usize, LoadError> {
        let n = self.native_int(layout)?;
        usize::try_from(n).map_err(|_| LoadError::BadCount(n))
    }

    fn size_t(&mut self, layout: Layout) -> Result<u64, LoadError> {
        self.unsigned(layout.size_t_size, layout.little)
    }

    fn integer(&mut self, layout: Layout) -> Result<i64, LoadError> {
        self.signed(layout.integer_size, layout.little)
    }

    fn number(&mut self, layout: Layout) -> Result<f64, LoadError> {
        let word = self.unsigned(layout.number_size, layout.little)?;

        Ok(match layout.number_size {
            4 => f32::from_bits(word as u32) as f64,
            _ => f64::from_bits(word),
        })
    }

    /// Instruction words wider than 32 bits keep their low operand half.
    fn instruction(&mut self, layout: Layout) -> Result<Instruction, LoadError> {
        let word = self.unsigned(layout.instruction_size, layout.little)? as u32;
        let instruction = Instruction(word);

        if instruction.opcode().is_none() {
            return Err(LoadError::BadOpcode(word));
        }

        Ok(instruction)
    }

    /// Length-prefixed string: zero byte for empty, `0xFF` prefix for a
    /// size_t length word, anything else is the length plus one.
    fn string(&mut self, layout: Layout) -> Result<Option<ByteString>, LoadError> {
        let prefix = self.byte()?;

        let len = match prefix {
            0 => return Ok(None),
            0xFF => match self.size_t(layout)? as usize {
                0 => return Ok(None),
                n => n,
            },
            b => b as usize,
        };

        let bytes = self.block(len - 1)?;
        Ok(Some(ByteString::from(bytes)))
    }
}

fn check_size(name: &'static str, size: u8, allowed: &[u8]) -> Result<(), LoadError> {
    if allowed.contains(&size) {
        Ok(())
    } else {
        Err(LoadError::UnsupportedSize { name, size })
    }
}

fn read_header(reader: &mut Reader) -> Result<Layout, LoadError> {
    if reader.block(4)? != SIGNATURE {
        return Err(LoadError::BadSignature);
    }

    let version = reader.byte()?;
    if version != VERSION {
        return Err(LoadError::UnsupportedVersion(version));
    }

    let format = reader.byte()?;
    if format != 0 {
        return Err(LoadError::UnsupportedFormat(format));
    }

    if reader.block(6)? != CONVERSION_MARKER {
        return Err(LoadError::CorruptMarker);
    }

    let int_size = reader.byte()?;
    let size_t_size = reader.byte()?;
    let instruction_size = reader.byte()?;
    let integer_size = reader.byte()?;
    let number_size = reader.byte()?;

    check_size("int", int_size, &[2, 4, 8])?;
    check_size("size_t", size_t_size, &[2, 4, 8])?;
    check_size("instruction", instruction_size, &[4, 8])?;
    check_size("lua_integer", integer_size, &[2, 4, 8])?;
    check_size("lua_number", number_size, &[4, 8])?;

    let layout = Layout {
        // the integer sentinel is 0x5678; its first byte tells the order
        little: reader.peek()? == 0x78,
        int_size,
        size_t_size,
        instruction_size,
        integer_size,
        number_size,
    };

    if reader.integer(layout)? != INTEGER_SENTINEL {
        return Err(LoadError::IntegerSentinelMismatch);
    }

    if reader.number(layout)? != NUMBER_SENTINEL {
        return Err(LoadError::NumberSentinelMismatch);
    }

    Ok(layout)
}

fn read_prototype(reader: &mut Reader, layout: Layout) -> Result<Prototype, LoadError> {
    let mut proto = Prototype {
        source: reader.string(layout)?,
        line_defined: reader.native_int(layout)?,
        last_line_defined: reader.native_int(layout)?,
        num_params: reader.byte()?,
        is_vararg: reader.byte()? != 0,
        max_stack_size: reader.byte()?,
        ..Default::default()
    };

    let num_instructions = reader.count(layout)?;
    for _ in 0..num_instructions {
        proto.instructions.push(reader.instruction(layout)?);
    }

    let num_constants = reader.count(layout)?;
    for _ in 0..num_constants {
        let tag = reader.byte()?;
        let constant = match tag {
            TAG_NIL => Value::Nil,
            TAG_BOOL => Value::Bool(reader.byte()? != 0),
            TAG_FLOAT => Value::Float(reader.number(layout)?),
            TAG_INT => Value::Integer(reader.integer(layout)?),
            TAG_SHORT_STR | TAG_LONG_STR => {
                let bytes = reader.string(layout)?.unwrap_or_else(|| ByteString::from(""));
                Value::String(bytes)
            }
            _ => return Err(LoadError::BadConstantTag(tag)),
        };
        proto.constants.push(constant);
    }

    let num_up_values = reader.count(layout)?;
    for _ in 0..num_up_values {
        proto.up_values.push(UpValueDesc {
            in_stack: reader.byte()? != 0,
            index: reader.byte()?,
        });
    }

    let num_protos = reader.count(layout)?;
    for _ in 0..num_protos {
        proto.protos.push(Rc::new(read_prototype(reader, layout)?));
    }

    // debug information is discarded, but the stream must advance past it
    let num_line_info = reader.count(layout)?;
    for _ in 0..num_line_info {
        reader.native_int(layout)?;
    }

    let num_local_vars = reader.count(layout)?;
    for _ in 0..num_local_vars {
        reader.string(layout)?;
        reader.native_int(layout)?;
        reader.native_int(layout)?;
    }

    let num_up_value_names = reader.count(layout)?;
    for _ in 0..num_up_value_names {
        reader.string(layout)?;
    }

    Ok(proto)
}

/// Decodes a compiled Lua 5.3 chunk.
///
/// Fails without side effects; a VM that rejected one chunk can load another.
pub fn read_chunk(data: &[u8]) -> Result<Chunk, LoadError> {
    let mut reader = Reader::new(data);
    let layout = read_header(&mut reader)?;
    let num_up_values = reader.byte()?;
    let root = read_prototype(&mut reader, layout)?;

    log::debug!(
        "loaded chunk: {} instructions, {} constants, {} nested prototypes",
        root.instructions.len(),
        root.constants.len(),
        root.protos.len()
    );

    Ok(Chunk {
        num_up_values,
        root: Rc::new(root),
    })
}
