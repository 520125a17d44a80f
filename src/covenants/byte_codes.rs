//! Covenant bytecode tags

// Argument types
pub const ARG_HASH: u8 = 0x01;
pub const ARG_PUBLIC_KEY: u8 = 0x02;
pub const ARG_COMMITMENT: u8 = 0x03;
pub const ARG_SCRIPT: u8 = 0x04;
pub const ARG_COVENANT: u8 = 0x05;
pub const ARG_VAR_INT: u8 = 0x06;
pub const ARG_OUTPUT_FIELD: u8 = 0x07;
pub const ARG_OUTPUT_FIELDS: u8 = 0x08;
pub const ARG_BYTES: u8 = 0x09;

// Set operations
pub const OP_IDENTITY: u8 = 0x20;
pub const OP_AND: u8 = 0x21;
pub const OP_OR: u8 = 0x22;
pub const OP_XOR: u8 = 0x23;
pub const OP_NOT: u8 = 0x24;
pub const OP_EMPTY: u8 = 0x25;

// Filters
pub const FILTER_OUTPUT_HASH_EQ: u8 = 0x30;
pub const FILTER_FIELDS_PRESERVED: u8 = 0x31;
pub const FILTER_FIELD_INT_EQ: u8 = 0x32;
pub const FILTER_FIELDS_HASHED_EQ: u8 = 0x33;
pub const FILTER_RELATIVE_HEIGHT: u8 = 0x34;

