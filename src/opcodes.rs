//! The 8051 instruction catalog and the lookups both passes run against it.

use std::{
    fmt::{self, Display, Formatter},
    sync::OnceLock,
};

use indexmap::IndexMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Mne(pub &'static str);

#[rustfmt::skip]
impl Mne {
    pub const ACALL: Self = Self("ACALL");
    pub const ADD: Self = Self("ADD");
    pub const ADDC: Self = Self("ADDC");
    pub const AJMP: Self = Self("AJMP");
    pub const ANL: Self = Self("ANL");
    pub const CJNE: Self = Self("CJNE");
    pub const CLR: Self = Self("CLR");
    pub const CPL: Self = Self("CPL");
    pub const DA: Self = Self("DA");
    pub const DEC: Self = Self("DEC");
    pub const DIV: Self = Self("DIV");
    pub const DJNZ: Self = Self("DJNZ");
    pub const INC: Self = Self("INC");
    pub const JB: Self = Self("JB");
    pub const JBC: Self = Self("JBC");
    pub const JC: Self = Self("JC");
    pub const JMP: Self = Self("JMP");
    pub const JNB: Self = Self("JNB");
    pub const JNC: Self = Self("JNC");
    pub const JNZ: Self = Self("JNZ");
    pub const JZ: Self = Self("JZ");
    pub const LCALL: Self = Self("LCALL");
    pub const LJMP: Self = Self("LJMP");
    pub const MOV: Self = Self("MOV");
    pub const MOVC: Self = Self("MOVC");
    pub const MOVX: Self = Self("MOVX");
    pub const MUL: Self = Self("MUL");
    pub const NOP: Self = Self("NOP");
    pub const ORL: Self = Self("ORL");
    pub const POP: Self = Self("POP");
    pub const PUSH: Self = Self("PUSH");
    pub const RET: Self = Self("RET");
    pub const RETI: Self = Self("RETI");
    pub const RL: Self = Self("RL");
    pub const RLC: Self = Self("RLC");
    pub const RR: Self = Self("RR");
    pub const RRC: Self = Self("RRC");
    pub const SETB: Self = Self("SETB");
    pub const SJMP: Self = Self("SJMP");
    pub const SUBB: Self = Self("SUBB");
    pub const SWAP: Self = Self("SWAP");
    pub const XCH: Self = Self("XCH");
    pub const XCHD: Self = Self("XCHD");
    pub const XRL: Self = Self("XRL");

    // 0xA5 and the table terminator
    pub const INVALID: Self = Self("???");
}

impl Mne {
    /// Case-insensitive lookup of a source mnemonic.
    pub fn parse(text: &str) -> Option<Self> {
        Table::get()
            .forms
            .keys()
            .copied()
            .find(|mne| mne.0.eq_ignore_ascii_case(text))
    }
}

impl Display for Mne {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// One operand slot of an encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opnd {
    A,
    C,
    Ab,
    Dptr,
    /// `Rn`, register number
    Reg(u8),
    /// `@Ri`
    Ind(u8),
    IndDptr,
    IndADptr,
    IndAPc,
    Imm,
    Imm16,
    Direct,
    Bit,
    NotBit,
    Rel,
    Addr11,
    Addr16,
}

impl Opnd {
    /// Bytes this slot contributes after the opcode.
    pub fn width(self) -> usize {
        match self {
            Self::Imm | Self::Direct | Self::Bit | Self::NotBit | Self::Rel | Self::Addr11 => 1,
            Self::Imm16 | Self::Addr16 => 2,
            _ => 0,
        }
    }
}

impl Display for Opnd {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::A => f.write_str("A"),
            Self::C => f.write_str("C"),
            Self::Ab => f.write_str("AB"),
            Self::Dptr => f.write_str("DPTR"),
            Self::Reg(n) => write!(f, "R{n}"),
            Self::Ind(n) => write!(f, "@R{n}"),
            Self::IndDptr => f.write_str("@DPTR"),
            Self::IndADptr => f.write_str("@A+DPTR"),
            Self::IndAPc => f.write_str("@A+PC"),
            Self::Imm | Self::Imm16 => f.write_str("#DATA"),
            Self::Direct | Self::Bit | Self::Rel | Self::Addr11 | Self::Addr16 => {
                f.write_str("ADDR")
            }
            Self::NotBit => f.write_str("/ADDR"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Insn {
    pub opcode: u8,
    pub mne: Mne,
    /// Operands in source order.
    pub operands: &'static [Opnd],
    /// Encoded length in bytes, 0 for unassigned opcodes.
    pub len: u8,
}

impl Insn {
    const fn new(opcode: u8, mne: Mne, operands: &'static [Opnd], len: u8) -> Self {
        Self {
            opcode,
            mne,
            operands,
            len,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.len != 0
    }

    /// Canonical source pattern, e.g. `MOV A,@R1` or `CJNE A,#DATA,ADDR`.
    pub fn pattern(&self) -> String {
        let mut pattern = self.mne.0.to_string();
        for (i, operand) in self.operands.iter().enumerate() {
            pattern.push(if i == 0 { ' ' } else { ',' });
            pattern.push_str(&operand.to_string());
        }
        pattern
    }
}

pub use table::OPCODES;

mod table {
    use super::{Insn, Mne, Opnd::*};

    /// Indexed by opcode, closed by a zero-length entry.
    #[rustfmt::skip]
    pub static OPCODES: [Insn; 257] = [
        Insn::new(0x00, Mne::NOP,   &[],                         1),
        Insn::new(0x01, Mne::AJMP,  &[Addr11],                   2),
        Insn::new(0x02, Mne::LJMP,  &[Addr16],                   3),
        Insn::new(0x03, Mne::RR,    &[A],                        1),
        Insn::new(0x04, Mne::INC,   &[A],                        1),
        Insn::new(0x05, Mne::INC,   &[Direct],                   2),
        Insn::new(0x06, Mne::INC,   &[Ind(0)],                   1),
        Insn::new(0x07, Mne::INC,   &[Ind(1)],                   1),
        Insn::new(0x08, Mne::INC,   &[Reg(0)],                   1),
        Insn::new(0x09, Mne::INC,   &[Reg(1)],                   1),
        Insn::new(0x0A, Mne::INC,   &[Reg(2)],                   1),
        Insn::new(0x0B, Mne::INC,   &[Reg(3)],                   1),
        Insn::new(0x0C, Mne::INC,   &[Reg(4)],                   1),
        Insn::new(0x0D, Mne::INC,   &[Reg(5)],                   1),
        Insn::new(0x0E, Mne::INC,   &[Reg(6)],                   1),
        Insn::new(0x0F, Mne::INC,   &[Reg(7)],                   1),
        Insn::new(0x10, Mne::JBC,   &[Bit, Rel],                 3),
        Insn::new(0x11, Mne::ACALL, &[Addr11],                   2),
        Insn::new(0x12, Mne::LCALL, &[Addr16],                   3),
        Insn::new(0x13, Mne::RRC,   &[A],                        1),
        Insn::new(0x14, Mne::DEC,   &[A],                        1),
        Insn::new(0x15, Mne::DEC,   &[Direct],                   2),
        Insn::new(0x16, Mne::DEC,   &[Ind(0)],                   1),
        Insn::new(0x17, Mne::DEC,   &[Ind(1)],                   1),
        Insn::new(0x18, Mne::DEC,   &[Reg(0)],                   1),
        Insn::new(0x19, Mne::DEC,   &[Reg(1)],                   1),
        Insn::new(0x1A, Mne::DEC,   &[Reg(2)],                   1),
        Insn::new(0x1B, Mne::DEC,   &[Reg(3)],                   1),
        Insn::new(0x1C, Mne::DEC,   &[Reg(4)],                   1),
        Insn::new(0x1D, Mne::DEC,   &[Reg(5)],                   1),
        Insn::new(0x1E, Mne::DEC,   &[Reg(6)],                   1),
        Insn::new(0x1F, Mne::DEC,   &[Reg(7)],                   1),
        Insn::new(0x20, Mne::JB,    &[Bit, Rel],                 3),
        Insn::new(0x21, Mne::AJMP,  &[Addr11],                   2),
        Insn::new(0x22, Mne::RET,   &[],                         1),
        Insn::new(0x23, Mne::RL,    &[A],                        1),
        Insn::new(0x24, Mne::ADD,   &[A, Imm],                   2),
        Insn::new(0x25, Mne::ADD,   &[A, Direct],                2),
        Insn::new(0x26, Mne::ADD,   &[A, Ind(0)],                1),
        Insn::new(0x27, Mne::ADD,   &[A, Ind(1)],                1),
        Insn::new(0x28, Mne::ADD,   &[A, Reg(0)],                1),
        Insn::new(0x29, Mne::ADD,   &[A, Reg(1)],                1),
        Insn::new(0x2A, Mne::ADD,   &[A, Reg(2)],                1),
        Insn::new(0x2B, Mne::ADD,   &[A, Reg(3)],                1),
        Insn::new(0x2C, Mne::ADD,   &[A, Reg(4)],                1),
        Insn::new(0x2D, Mne::ADD,   &[A, Reg(5)],                1),
        Insn::new(0x2E, Mne::ADD,   &[A, Reg(6)],                1),
        Insn::new(0x2F, Mne::ADD,   &[A, Reg(7)],                1),
        Insn::new(0x30, Mne::JNB,   &[Bit, Rel],                 3),
        Insn::new(0x31, Mne::ACALL, &[Addr11],                   2),
        Insn::new(0x32, Mne::RETI,  &[],                         1),
        Insn::new(0x33, Mne::RLC,   &[A],                        1),
        Insn::new(0x34, Mne::ADDC,  &[A, Imm],                   2),
        Insn::new(0x35, Mne::ADDC,  &[A, Direct],                2),
        Insn::new(0x36, Mne::ADDC,  &[A, Ind(0)],                1),
        Insn::new(0x37, Mne::ADDC,  &[A, Ind(1)],                1),
        Insn::new(0x38, Mne::ADDC,  &[A, Reg(0)],                1),
        Insn::new(0x39, Mne::ADDC,  &[A, Reg(1)],                1),
        Insn::new(0x3A, Mne::ADDC,  &[A, Reg(2)],                1),
        Insn::new(0x3B, Mne::ADDC,  &[A, Reg(3)],                1),
        Insn::new(0x3C, Mne::ADDC,  &[A, Reg(4)],                1),
        Insn::new(0x3D, Mne::ADDC,  &[A, Reg(5)],                1),
        Insn::new(0x3E, Mne::ADDC,  &[A, Reg(6)],                1),
        Insn::new(0x3F, Mne::ADDC,  &[A, Reg(7)],                1),
        Insn::new(0x40, Mne::JC,    &[Rel],                      2),
        Insn::new(0x41, Mne::AJMP,  &[Addr11],                   2),
        Insn::new(0x42, Mne::ORL,   &[Direct, A],                2),
        Insn::new(0x43, Mne::ORL,   &[Direct, Imm],              3),
        Insn::new(0x44, Mne::ORL,   &[A, Imm],                   2),
        Insn::new(0x45, Mne::ORL,   &[A, Direct],                2),
        Insn::new(0x46, Mne::ORL,   &[A, Ind(0)],                1),
        Insn::new(0x47, Mne::ORL,   &[A, Ind(1)],                1),
        Insn::new(0x48, Mne::ORL,   &[A, Reg(0)],                1),
        Insn::new(0x49, Mne::ORL,   &[A, Reg(1)],                1),
        Insn::new(0x4A, Mne::ORL,   &[A, Reg(2)],                1),
        Insn::new(0x4B, Mne::ORL,   &[A, Reg(3)],                1),
        Insn::new(0x4C, Mne::ORL,   &[A, Reg(4)],                1),
        Insn::new(0x4D, Mne::ORL,   &[A, Reg(5)],                1),
        Insn::new(0x4E, Mne::ORL,   &[A, Reg(6)],                1),
        Insn::new(0x4F, Mne::ORL,   &[A, Reg(7)],                1),
        Insn::new(0x50, Mne::JNC,   &[Rel],                      2),
        Insn::new(0x51, Mne::ACALL, &[Addr11],                   2),
        Insn::new(0x52, Mne::ANL,   &[Direct, A],                2),
        Insn::new(0x53, Mne::ANL,   &[Direct, Imm],              3),
        Insn::new(0x54, Mne::ANL,   &[A, Imm],                   2),
        Insn::new(0x55, Mne::ANL,   &[A, Direct],                2),
        Insn::new(0x56, Mne::ANL,   &[A, Ind(0)],                1),
        Insn::new(0x57, Mne::ANL,   &[A, Ind(1)],                1),
        Insn::new(0x58, Mne::ANL,   &[A, Reg(0)],                1),
        Insn::new(0x59, Mne::ANL,   &[A, Reg(1)],                1),
        Insn::new(0x5A, Mne::ANL,   &[A, Reg(2)],                1),
        Insn::new(0x5B, Mne::ANL,   &[A, Reg(3)],                1),
        Insn::new(0x5C, Mne::ANL,   &[A, Reg(4)],                1),
        Insn::new(0x5D, Mne::ANL,   &[A, Reg(5)],                1),
        Insn::new(0x5E, Mne::ANL,   &[A, Reg(6)],                1),
        Insn::new(0x5F, Mne::ANL,   &[A, Reg(7)],                1),
        Insn::new(0x60, Mne::JZ,    &[Rel],                      2),
        Insn::new(0x61, Mne::AJMP,  &[Addr11],                   2),
        Insn::new(0x62, Mne::XRL,   &[Direct, A],                2),
        Insn::new(0x63, Mne::XRL,   &[Direct, Imm],              3),
        Insn::new(0x64, Mne::XRL,   &[A, Imm],                   2),
        Insn::new(0x65, Mne::XRL,   &[A, Direct],                2),
        Insn::new(0x66, Mne::XRL,   &[A, Ind(0)],                1),
        Insn::new(0x67, Mne::XRL,   &[A, Ind(1)],                1),
        Insn::new(0x68, Mne::XRL,   &[A, Reg(0)],                1),
        Insn::new(0x69, Mne::XRL,   &[A, Reg(1)],                1),
        Insn::new(0x6A, Mne::XRL,   &[A, Reg(2)],                1),
        Insn::new(0x6B, Mne::XRL,   &[A, Reg(3)],                1),
        Insn::new(0x6C, Mne::XRL,   &[A, Reg(4)],                1),
        Insn::new(0x6D, Mne::XRL,   &[A, Reg(5)],                1),
        Insn::new(0x6E, Mne::XRL,   &[A, Reg(6)],                1),
        Insn::new(0x6F, Mne::XRL,   &[A, Reg(7)],                1),
        Insn::new(0x70, Mne::JNZ,   &[Rel],                      2),
        Insn::new(0x71, Mne::ACALL, &[Addr11],                   2),
        Insn::new(0x72, Mne::ORL,   &[C, Bit],                   2),
        Insn::new(0x73, Mne::JMP,   &[IndADptr],                 1),
        Insn::new(0x74, Mne::MOV,   &[A, Imm],                   2),
        Insn::new(0x75, Mne::MOV,   &[Direct, Imm],              3),
        Insn::new(0x76, Mne::MOV,   &[Ind(0), Imm],              2),
        Insn::new(0x77, Mne::MOV,   &[Ind(1), Imm],              2),
        Insn::new(0x78, Mne::MOV,   &[Reg(0), Imm],              2),
        Insn::new(0x79, Mne::MOV,   &[Reg(1), Imm],              2),
        Insn::new(0x7A, Mne::MOV,   &[Reg(2), Imm],              2),
        Insn::new(0x7B, Mne::MOV,   &[Reg(3), Imm],              2),
        Insn::new(0x7C, Mne::MOV,   &[Reg(4), Imm],              2),
        Insn::new(0x7D, Mne::MOV,   &[Reg(5), Imm],              2),
        Insn::new(0x7E, Mne::MOV,   &[Reg(6), Imm],              2),
        Insn::new(0x7F, Mne::MOV,   &[Reg(7), Imm],              2),
        Insn::new(0x80, Mne::SJMP,  &[Rel],                      2),
        Insn::new(0x81, Mne::AJMP,  &[Addr11],                   2),
        Insn::new(0x82, Mne::ANL,   &[C, Bit],                   2),
        Insn::new(0x83, Mne::MOVC,  &[A, IndAPc],                1),
        Insn::new(0x84, Mne::DIV,   &[Ab],                       1),
        Insn::new(0x85, Mne::MOV,   &[Direct, Direct],           3),
        Insn::new(0x86, Mne::MOV,   &[Direct, Ind(0)],           2),
        Insn::new(0x87, Mne::MOV,   &[Direct, Ind(1)],           2),
        Insn::new(0x88, Mne::MOV,   &[Direct, Reg(0)],           2),
        Insn::new(0x89, Mne::MOV,   &[Direct, Reg(1)],           2),
        Insn::new(0x8A, Mne::MOV,   &[Direct, Reg(2)],           2),
        Insn::new(0x8B, Mne::MOV,   &[Direct, Reg(3)],           2),
        Insn::new(0x8C, Mne::MOV,   &[Direct, Reg(4)],           2),
        Insn::new(0x8D, Mne::MOV,   &[Direct, Reg(5)],           2),
        Insn::new(0x8E, Mne::MOV,   &[Direct, Reg(6)],           2),
        Insn::new(0x8F, Mne::MOV,   &[Direct, Reg(7)],           2),
        Insn::new(0x90, Mne::MOV,   &[Dptr, Imm16],              3),
        Insn::new(0x91, Mne::ACALL, &[Addr11],                   2),
        Insn::new(0x92, Mne::MOV,   &[Bit, C],                   2),
        Insn::new(0x93, Mne::MOVC,  &[A, IndADptr],              1),
        Insn::new(0x94, Mne::SUBB,  &[A, Imm],                   2),
        Insn::new(0x95, Mne::SUBB,  &[A, Direct],                2),
        Insn::new(0x96, Mne::SUBB,  &[A, Ind(0)],                1),
        Insn::new(0x97, Mne::SUBB,  &[A, Ind(1)],                1),
        Insn::new(0x98, Mne::SUBB,  &[A, Reg(0)],                1),
        Insn::new(0x99, Mne::SUBB,  &[A, Reg(1)],                1),
        Insn::new(0x9A, Mne::SUBB,  &[A, Reg(2)],                1),
        Insn::new(0x9B, Mne::SUBB,  &[A, Reg(3)],                1),
        Insn::new(0x9C, Mne::SUBB,  &[A, Reg(4)],                1),
        Insn::new(0x9D, Mne::SUBB,  &[A, Reg(5)],                1),
        Insn::new(0x9E, Mne::SUBB,  &[A, Reg(6)],                1),
        Insn::new(0x9F, Mne::SUBB,  &[A, Reg(7)],                1),
        Insn::new(0xA0, Mne::ORL,   &[C, NotBit],                2),
        Insn::new(0xA1, Mne::AJMP,  &[Addr11],                   2),
        Insn::new(0xA2, Mne::MOV,   &[C, Bit],                   2),
        Insn::new(0xA3, Mne::INC,   &[Dptr],                     1),
        Insn::new(0xA4, Mne::MUL,   &[Ab],                       1),
        Insn::new(0xA5, Mne::INVALID, &[],                         0),
        Insn::new(0xA6, Mne::MOV,   &[Ind(0), Direct],           2),
        Insn::new(0xA7, Mne::MOV,   &[Ind(1), Direct],           2),
        Insn::new(0xA8, Mne::MOV,   &[Reg(0), Direct],           2),
        Insn::new(0xA9, Mne::MOV,   &[Reg(1), Direct],           2),
        Insn::new(0xAA, Mne::MOV,   &[Reg(2), Direct],           2),
        Insn::new(0xAB, Mne::MOV,   &[Reg(3), Direct],           2),
        Insn::new(0xAC, Mne::MOV,   &[Reg(4), Direct],           2),
        Insn::new(0xAD, Mne::MOV,   &[Reg(5), Direct],           2),
        Insn::new(0xAE, Mne::MOV,   &[Reg(6), Direct],           2),
        Insn::new(0xAF, Mne::MOV,   &[Reg(7), Direct],           2),
        Insn::new(0xB0, Mne::ANL,   &[C, NotBit],                2),
        Insn::new(0xB1, Mne::ACALL, &[Addr11],                   2),
        Insn::new(0xB2, Mne::CPL,   &[Bit],                      2),
        Insn::new(0xB3, Mne::CPL,   &[C],                        1),
        Insn::new(0xB4, Mne::CJNE,  &[A, Imm, Rel],              3),
        Insn::new(0xB5, Mne::CJNE,  &[A, Direct, Rel],           3),
        Insn::new(0xB6, Mne::CJNE,  &[Ind(0), Imm, Rel],         3),
        Insn::new(0xB7, Mne::CJNE,  &[Ind(1), Imm, Rel],         3),
        Insn::new(0xB8, Mne::CJNE,  &[Reg(0), Imm, Rel],         3),
        Insn::new(0xB9, Mne::CJNE,  &[Reg(1), Imm, Rel],         3),
        Insn::new(0xBA, Mne::CJNE,  &[Reg(2), Imm, Rel],         3),
        Insn::new(0xBB, Mne::CJNE,  &[Reg(3), Imm, Rel],         3),
        Insn::new(0xBC, Mne::CJNE,  &[Reg(4), Imm, Rel],         3),
        Insn::new(0xBD, Mne::CJNE,  &[Reg(5), Imm, Rel],         3),
        Insn::new(0xBE, Mne::CJNE,  &[Reg(6), Imm, Rel],         3),
        Insn::new(0xBF, Mne::CJNE,  &[Reg(7), Imm, Rel],         3),
        Insn::new(0xC0, Mne::PUSH,  &[Direct],                   2),
        Insn::new(0xC1, Mne::AJMP,  &[Addr11],                   2),
        Insn::new(0xC2, Mne::CLR,   &[Bit],                      2),
        Insn::new(0xC3, Mne::CLR,   &[C],                        1),
        Insn::new(0xC4, Mne::SWAP,  &[A],                        1),
        Insn::new(0xC5, Mne::XCH,   &[A, Direct],                2),
        Insn::new(0xC6, Mne::XCH,   &[A, Ind(0)],                1),
        Insn::new(0xC7, Mne::XCH,   &[A, Ind(1)],                1),
        Insn::new(0xC8, Mne::XCH,   &[A, Reg(0)],                1),
        Insn::new(0xC9, Mne::XCH,   &[A, Reg(1)],                1),
        Insn::new(0xCA, Mne::XCH,   &[A, Reg(2)],                1),
        Insn::new(0xCB, Mne::XCH,   &[A, Reg(3)],                1),
        Insn::new(0xCC, Mne::XCH,   &[A, Reg(4)],                1),
        Insn::new(0xCD, Mne::XCH,   &[A, Reg(5)],                1),
        Insn::new(0xCE, Mne::XCH,   &[A, Reg(6)],                1),
        Insn::new(0xCF, Mne::XCH,   &[A, Reg(7)],                1),
        Insn::new(0xD0, Mne::POP,   &[Direct],                   2),
        Insn::new(0xD1, Mne::ACALL, &[Addr11],                   2),
        Insn::new(0xD2, Mne::SETB,  &[Bit],                      2),
        Insn::new(0xD3, Mne::SETB,  &[C],                        1),
        Insn::new(0xD4, Mne::DA,    &[A],                        1),
        Insn::new(0xD5, Mne::DJNZ,  &[Direct, Rel],              3),
        Insn::new(0xD6, Mne::XCHD,  &[A, Ind(0)],                1),
        Insn::new(0xD7, Mne::XCHD,  &[A, Ind(1)],                1),
        Insn::new(0xD8, Mne::DJNZ,  &[Reg(0), Rel],              2),
        Insn::new(0xD9, Mne::DJNZ,  &[Reg(1), Rel],              2),
        Insn::new(0xDA, Mne::DJNZ,  &[Reg(2), Rel],              2),
        Insn::new(0xDB, Mne::DJNZ,  &[Reg(3), Rel],              2),
        Insn::new(0xDC, Mne::DJNZ,  &[Reg(4), Rel],              2),
        Insn::new(0xDD, Mne::DJNZ,  &[Reg(5), Rel],              2),
        Insn::new(0xDE, Mne::DJNZ,  &[Reg(6), Rel],              2),
        Insn::new(0xDF, Mne::DJNZ,  &[Reg(7), Rel],              2),
        Insn::new(0xE0, Mne::MOVX,  &[A, IndDptr],               1),
        Insn::new(0xE1, Mne::AJMP,  &[Addr11],                   2),
        Insn::new(0xE2, Mne::MOVX,  &[A, Ind(0)],                1),
        Insn::new(0xE3, Mne::MOVX,  &[A, Ind(1)],                1),
        Insn::new(0xE4, Mne::CLR,   &[A],                        1),
        Insn::new(0xE5, Mne::MOV,   &[A, Direct],                2),
        Insn::new(0xE6, Mne::MOV,   &[A, Ind(0)],                1),
        Insn::new(0xE7, Mne::MOV,   &[A, Ind(1)],                1),
        Insn::new(0xE8, Mne::MOV,   &[A, Reg(0)],                1),
        Insn::new(0xE9, Mne::MOV,   &[A, Reg(1)],                1),
        Insn::new(0xEA, Mne::MOV,   &[A, Reg(2)],                1),
        Insn::new(0xEB, Mne::MOV,   &[A, Reg(3)],                1),
        Insn::new(0xEC, Mne::MOV,   &[A, Reg(4)],                1),
        Insn::new(0xED, Mne::MOV,   &[A, Reg(5)],                1),
        Insn::new(0xEE, Mne::MOV,   &[A, Reg(6)],                1),
        Insn::new(0xEF, Mne::MOV,   &[A, Reg(7)],                1),
        Insn::new(0xF0, Mne::MOVX,  &[IndDptr, A],               1),
        Insn::new(0xF1, Mne::ACALL, &[Addr11],                   2),
        Insn::new(0xF2, Mne::MOVX,  &[Ind(0), A],                1),
        Insn::new(0xF3, Mne::MOVX,  &[Ind(1), A],                1),
        Insn::new(0xF4, Mne::CPL,   &[A],                        1),
        Insn::new(0xF5, Mne::MOV,   &[Direct, A],                2),
        Insn::new(0xF6, Mne::MOV,   &[Ind(0), A],                1),
        Insn::new(0xF7, Mne::MOV,   &[Ind(1), A],                1),
        Insn::new(0xF8, Mne::MOV,   &[Reg(0), A],                1),
        Insn::new(0xF9, Mne::MOV,   &[Reg(1), A],                1),
        Insn::new(0xFA, Mne::MOV,   &[Reg(2), A],                1),
        Insn::new(0xFB, Mne::MOV,   &[Reg(3), A],                1),
        Insn::new(0xFC, Mne::MOV,   &[Reg(4), A],                1),
        Insn::new(0xFD, Mne::MOV,   &[Reg(5), A],                1),
        Insn::new(0xFE, Mne::MOV,   &[Reg(6), A],                1),
        Insn::new(0xFF, Mne::MOV,   &[Reg(7), A],                1),
        Insn::new(0x00, Mne::INVALID, &[],                         0),
    ];
}

/// Special function registers accepted by name wherever a direct address is.
#[rustfmt::skip]
pub const SFRS: &[(&str, u8)] = &[
    ("B",    0xF0),
    ("PSW",  0xD0),
    ("DPH",  0x83),
    ("DPL",  0x82),
    ("P0",   0x80),
    ("P1",   0x90),
    ("P2",   0xA0),
    ("P3",   0xB0),
    ("IP",   0xB8),
    ("SP",   0x81),
    ("IE",   0xA8),
    ("TMOD", 0x89),
    ("TCON", 0x88),
    ("TH0",  0x8C),
    ("TL0",  0x8A),
    ("TH1",  0x8D),
    ("TL1",  0x8B),
    ("SCON", 0x98),
    ("SBUF", 0x99),
    ("PCON", 0x87),
];

pub fn sfr(name: &str) -> Option<u8> {
    SFRS.iter()
        .find(|(sfr, _)| sfr.eq_ignore_ascii_case(name))
        .map(|&(_, addr)| addr)
}

/// Decision tables derived from [`OPCODES`].
pub struct Table {
    forms: IndexMap<Mne, Vec<&'static Insn>>,
    arity: IndexMap<Mne, usize>,
    one_byte: Vec<(String, &'static Insn)>,
}

impl Table {
    pub fn get() -> &'static Table {
        static TABLE: OnceLock<Table> = OnceLock::new();
        TABLE.get_or_init(Self::build)
    }

    fn build() -> Self {
        let mut forms: IndexMap<Mne, Vec<&'static Insn>> = IndexMap::new();
        let mut one_byte = Vec::new();
        for insn in OPCODES.iter().filter(|insn| insn.is_valid()) {
            if insn.len == 1 {
                one_byte.push((insn.pattern(), insn));
            }
            let forms = forms.entry(insn.mne).or_default();
            // AJMP and ACALL repeat once per page; the page-0 opcode stands for all
            if forms.iter().any(|form| form.operands == insn.operands) {
                continue;
            }
            forms.push(insn);
        }

        let arity = forms
            .iter()
            .map(|(&mne, forms)| {
                let multi = forms
                    .iter()
                    .filter(|insn| insn.len > 1)
                    .map(|insn| insn.operands.len())
                    .max();
                let any = forms.iter().map(|insn| insn.operands.len()).max();
                (mne, 1 + multi.or(any).unwrap_or(0))
            })
            .collect();

        Self {
            forms,
            arity,
            one_byte,
        }
    }

    pub fn forms(&self, mne: Mne) -> &[&'static Insn] {
        self.forms.get(&mne).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Expected token count (mnemonic included) for multi-byte forms.
    pub fn arity(&self, mne: Mne) -> Option<usize> {
        self.arity.get(&mne).copied()
    }

    /// Exact, case-insensitive match of a collapsed line against the
    /// one-byte patterns.
    pub fn one_byte(&self, line: &str) -> Option<&'static Insn> {
        let line = line.trim();
        self.one_byte
            .iter()
            .find(|(pattern, _)| pattern.eq_ignore_ascii_case(line))
            .map(|&(_, insn)| insn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_indexed_by_opcode() {
        for (i, insn) in OPCODES.iter().take(256).enumerate() {
            assert_eq!(insn.opcode as usize, i);
            let width: usize = insn.operands.iter().map(|op| op.width()).sum();
            if insn.is_valid() {
                assert_eq!(width + 1, insn.len as usize, "{:02X}", insn.opcode);
            }
        }
        assert!(!OPCODES[0xA5].is_valid());
        assert!(!OPCODES[256].is_valid());
    }

    #[test]
    fn patterns() {
        assert_eq!(OPCODES[0x00].pattern(), "NOP");
        assert_eq!(OPCODES[0xE7].pattern(), "MOV A,@R1");
        assert_eq!(OPCODES[0xB4].pattern(), "CJNE A,#DATA,ADDR");
        assert_eq!(OPCODES[0xA0].pattern(), "ORL C,/ADDR");
        assert_eq!(OPCODES[0x73].pattern(), "JMP @A+DPTR");
    }

    #[test]
    fn one_byte_lookup() {
        let table = Table::get();
        assert_eq!(table.one_byte("mov a,r7").map(|i| i.opcode), Some(0xEF));
        assert_eq!(table.one_byte("RET ").map(|i| i.opcode), Some(0x22));
        assert_eq!(table.one_byte("MOVX @DPTR,A").map(|i| i.opcode), Some(0xF0));
        assert!(table.one_byte("MOV A,#01").is_none());
    }

    #[test]
    fn arity_comes_from_operand_counts() {
        let table = Table::get();
        assert_eq!(table.arity(Mne::NOP), Some(1));
        assert_eq!(table.arity(Mne::SJMP), Some(2));
        assert_eq!(table.arity(Mne::JC), Some(2));
        assert_eq!(table.arity(Mne::MOV), Some(3));
        assert_eq!(table.arity(Mne::CJNE), Some(4));
        assert_eq!(table.arity(Mne::JB), Some(3));
    }

    #[test]
    fn paged_jumps_collapse_to_one_form() {
        let table = Table::get();
        let forms = table.forms(Mne::AJMP);
        assert_eq!(forms.len(), 1);
        assert_eq!(forms[0].opcode, 0x01);
        assert_eq!(table.forms(Mne::ACALL)[0].opcode, 0x11);
    }

    #[test]
    fn mnemonics_and_sfrs() {
        assert_eq!(Mne::parse("cjne"), Some(Mne::CJNE));
        assert_eq!(Mne::parse("LDA"), None);
        assert_eq!(sfr("psw"), Some(0xD0));
        assert_eq!(sfr("SBUF"), Some(0x99));
        assert_eq!(sfr("R0"), None);
    }
}
