use thiserror::Error;

/// Failure while decoding a bytecode stream.
///
/// Load failures are detected before any VM state is touched, so a VM that
/// rejected a chunk can immediately load another one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("bad signature, not a compiled lua chunk")]
    BadSignature,
    #[error("unsupported bytecode version {0:#04x}, expected 0x53")]
    UnsupportedVersion(u8),
    #[error("unsupported bytecode format {0}")]
    UnsupportedFormat(u8),
    #[error("conversion check marker is corrupt")]
    CorruptMarker,
    #[error("unsupported {name} size of {size} bytes")]
    UnsupportedSize { name: &'static str, size: u8 },
    #[error("integer sentinel mismatch, expected 0x5678")]
    IntegerSentinelMismatch,
    #[error("number sentinel mismatch, expected 370.5")]
    NumberSentinelMismatch,
    #[error("unknown constant tag {0:#04x}")]
    BadConstantTag(u8),
    #[error("instruction {0:#010x} has no known opcode")]
    BadOpcode(u32),
    #[error("implausible count {0} in prototype")]
    BadCount(i64),
    #[error("unexpected end of stream at offset {0}")]
    UnexpectedEof(usize),
}
