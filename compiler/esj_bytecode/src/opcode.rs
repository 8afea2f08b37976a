//! Opcode table and operand formats.
//!
//! Every instruction is a single opcode byte followed by fixed-width
//! operands described by its [`Format`]. Multi-byte operands are
//! little-endian. Jump immediates are signed and relative to the pc of the
//! jump instruction itself.

use std::fmt;

/// Operand layout of an instruction (after the opcode byte).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Format {
    /// No operands.
    None,
    /// One signed 8-bit immediate.
    Imm8,
    /// One signed 16-bit immediate.
    Imm16,
    /// One signed 32-bit immediate.
    Imm32,
    /// One 64-bit immediate (raw bits).
    Imm64,
    /// One 8-bit register.
    V8,
    /// Two 8-bit registers.
    V8V8,
    /// Inline-cache slot, register.
    Imm8V8,
    /// Inline-cache slot, register, register.
    Imm8V8V8,
    /// Inline-cache slot, constant-pool id.
    Imm8Id16,
    /// Inline-cache slot, constant-pool id, register.
    Imm8Id16V8,
    /// Inline-cache slot, count, first register of a range.
    Imm8Imm8V8,
    /// Two unsigned 8-bit immediates.
    Imm8Imm8,
}

impl Format {
    /// Encoded size of an instruction with this format, opcode byte included.
    pub const fn size(self) -> u32 {
        match self {
            Format::None => 1,
            Format::Imm8 | Format::V8 => 2,
            Format::Imm16 | Format::V8V8 | Format::Imm8V8 | Format::Imm8Imm8 => 3,
            Format::Imm8V8V8 | Format::Imm8Id16 | Format::Imm8Imm8V8 => 4,
            Format::Imm32 | Format::Imm8Id16V8 => 5,
            Format::Imm64 => 9,
        }
    }
}

macro_rules! define_opcodes {
    ($( $variant:ident = $byte:literal, $mnemonic:literal, $format:ident; )*) => {
        /// Opcodes of the supported bytecode subset.
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(u8)]
        pub enum Opcode {
            $( $variant = $byte, )*
        }

        impl Opcode {
            /// All opcodes, in encoding order.
            pub const ALL: &'static [Opcode] = &[$( Opcode::$variant, )*];

            /// Decode an opcode byte.
            pub fn from_byte(byte: u8) -> Option<Self> {
                match byte {
                    $( $byte => Some(Opcode::$variant), )*
                    _ => None,
                }
            }

            /// Operand layout.
            pub const fn format(self) -> Format {
                match self {
                    $( Opcode::$variant => Format::$format, )*
                }
            }

            /// Assembly mnemonic.
            pub const fn mnemonic(self) -> &'static str {
                match self {
                    $( Opcode::$variant => $mnemonic, )*
                }
            }
        }
    };
}

define_opcodes! {
    Nop = 0x00, "nop", None;
    LdUndefined = 0x01, "ldundefined", None;
    LdNull = 0x02, "ldnull", None;
    LdTrue = 0x03, "ldtrue", None;
    LdFalse = 0x04, "ldfalse", None;
    Ldai = 0x05, "ldai", Imm32;
    Fldai = 0x06, "fldai", Imm64;
    Lda = 0x07, "lda", V8;
    Sta = 0x08, "sta", V8;
    Mov = 0x09, "mov", V8V8;
    Add2 = 0x0a, "add2", Imm8V8;
    Sub2 = 0x0b, "sub2", Imm8V8;
    Mul2 = 0x0c, "mul2", Imm8V8;
    Less = 0x0d, "less", Imm8V8;
    StrictEq = 0x0e, "stricteq", Imm8V8;
    Inc = 0x0f, "inc", Imm8;
    TryLdGlobalByName = 0x10, "tryldglobalbyname", Imm8Id16;
    LdObjByName = 0x11, "ldobjbyname", Imm8Id16;
    StObjByName = 0x12, "stobjbyname", Imm8Id16V8;
    LdObjByValue = 0x13, "ldobjbyvalue", Imm8V8;
    CallArg0 = 0x14, "callarg0", Imm8;
    CallArg1 = 0x15, "callarg1", Imm8V8;
    CallArgs2 = 0x16, "callargs2", Imm8V8V8;
    CallThis1 = 0x17, "callthis1", Imm8V8V8;
    NewObjRange = 0x18, "newobjrange", Imm8Imm8V8;
    NewLexEnv = 0x19, "newlexenv", Imm8;
    PopLexEnv = 0x1a, "poplexenv", None;
    LdLexVar = 0x1b, "ldlexvar", Imm8Imm8;
    StLexVar = 0x1c, "stlexvar", Imm8Imm8;
    Jmp = 0x1d, "jmp", Imm8;
    Jmp16 = 0x1e, "jmp", Imm16;
    Jeqz = 0x1f, "jeqz", Imm8;
    Jeqz16 = 0x20, "jeqz", Imm16;
    Jnez = 0x21, "jnez", Imm8;
    Jnez16 = 0x22, "jnez", Imm16;
    Return = 0x23, "return", None;
    ReturnUndefined = 0x24, "returnundefined", None;
    Throw = 0x25, "throw", None;
    SuspendGenerator = 0x26, "suspendgenerator", V8;
    ResumeGenerator = 0x27, "resumegenerator", None;
    CreateEmptyObject = 0x28, "createemptyobject", None;
}

impl Opcode {
    /// Encoded size in bytes, opcode byte included.
    #[inline]
    pub const fn size(self) -> u32 {
        self.format().size()
    }

    /// Conditional or unconditional jump.
    pub const fn is_jump(self) -> bool {
        matches!(
            self,
            Opcode::Jmp
                | Opcode::Jmp16
                | Opcode::Jeqz
                | Opcode::Jeqz16
                | Opcode::Jnez
                | Opcode::Jnez16
        )
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}
