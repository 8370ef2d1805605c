//! Pass 1: labels, `.org`, and a provisional encoding of every instruction.
//!
//! Operands naming labels are left as placeholders in the entry list and
//! resolved by [`crate::reloc`] once every label has an address.

use std::fmt::{self, Display, Formatter};

use indexmap::IndexMap;

use crate::{
    opcodes::{self, Insn, Mne, Opnd, Table},
    preprocess::{FileStack, INCLUDE_MARKER},
    reloc, text, ErrKind, Error, Pos, Result,
};

/// Marks the reserved low-byte slot after a 16-bit placeholder in
/// [`Entry`] listings.
pub const SECOND_SLOT: char = '\u{B9}';

/// How a label operand gets encoded once resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Signed 8-bit displacement from the following byte.
    Rel,
    /// Low 8 bits here, bits 8..11 folded into the opcode.
    Addr11,
    /// High byte here, low byte in the next slot.
    Addr16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cell {
    Byte(u8),
    Label { name: String, pos: Pos, mode: Mode },
    /// Reserved for the low byte of a preceding [`Mode::Addr16`] label.
    Second,
}

/// One provisional byte of output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub addr: u16,
    pub cell: Cell,
}

impl Display for Entry {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.cell {
            Cell::Byte(byte) => write!(f, "{:04X} {byte:02X}", self.addr),
            Cell::Label { name, pos, .. } => {
                write!(f, "{:04X} {name}    {}  {}", self.addr, pos.file, pos.line)
            }
            Cell::Second => write!(f, "{:04X} {SECOND_SLOT}", self.addr),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Const(u16),
    Label(String),
}

/// A classified source operand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    A,
    C,
    Ab,
    Dptr,
    Reg(u8),
    Ind(u8),
    IndDptr,
    IndADptr,
    IndAPc,
    Imm(Value),
    Addr(Value),
    NotBit(Value),
}

impl Display for Operand {
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
            Self::Imm(_) => f.write_str("#DATA"),
            Self::Addr(_) => f.write_str("ADDR"),
            Self::NotBit(_) => f.write_str("/ADDR"),
        }
    }
}

impl Operand {
    fn fits(&self, slot: Opnd) -> bool {
        match (slot, self) {
            (Opnd::A, Self::A)
            | (Opnd::C, Self::C)
            | (Opnd::Ab, Self::Ab)
            | (Opnd::Dptr, Self::Dptr)
            | (Opnd::IndDptr, Self::IndDptr)
            | (Opnd::IndADptr, Self::IndADptr)
            | (Opnd::IndAPc, Self::IndAPc)
            | (Opnd::Imm | Opnd::Imm16, Self::Imm(_))
            | (Opnd::NotBit, Self::NotBit(_)) => true,
            (Opnd::Direct | Opnd::Bit | Opnd::Rel | Opnd::Addr11 | Opnd::Addr16, Self::Addr(_)) => {
                true
            }
            (Opnd::Reg(n), Self::Reg(m)) | (Opnd::Ind(n), Self::Ind(m)) => n == *m,
            _ => false,
        }
    }
}

/// Bytes following the opcode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    Byte(u8),
    /// Takes two slots for [`Mode::Addr16`], one otherwise.
    Label(String, Mode),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoding {
    pub opcode: u8,
    pub fields: Vec<Field>,
}

impl Encoding {
    pub fn len(&self) -> usize {
        1 + self
            .fields
            .iter()
            .map(|field| match field {
                Field::Label(_, Mode::Addr16) => 2,
                _ => 1,
            })
            .sum::<usize>()
    }
}

/// Splits `MNE op,op,...` into the mnemonic and its operand tokens.
pub fn tokenize(line: &str) -> Vec<&str> {
    line.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|token| !token.is_empty())
        .collect()
}

fn register(token: &str) -> Option<u8> {
    match token.as_bytes() {
        [b'R' | b'r', n @ b'0'..=b'7'] => Some(n - b'0'),
        _ => None,
    }
}

fn address(token: &str) -> Result<Value> {
    if let Some(addr) = opcodes::sfr(token) {
        return Ok(Value::Const(addr as u16));
    }
    match token.as_bytes().first() {
        Some(&c) if text::is_ident_start(c) => {
            if text::is_ident(token) {
                Ok(Value::Label(token.to_string()))
            } else {
                Err(Error::new(
                    ErrKind::IllegalOperand,
                    format!("`{token}` is not a label"),
                ))
            }
        }
        Some(_) => text::parse_hex(token).map(Value::Const).ok_or_else(|| {
            Error::new(ErrKind::IllegalOperand, format!("`{token}` is not a hex number"))
        }),
        None => Err(Error::new(ErrKind::IllegalOperand, "missing operand")),
    }
}

fn immediate(token: &str) -> Result<Value> {
    if let Some(value) = text::parse_hex(token) {
        return Ok(Value::Const(value));
    }
    if text::is_ident(token) {
        return Ok(Value::Label(token.to_string()));
    }
    Err(Error::new(
        ErrKind::IllegalOperand,
        format!("`#{token}` is not a hex number"),
    ))
}

pub fn classify(token: &str) -> Result<Operand> {
    let upper = token.to_ascii_uppercase();
    let operand = match upper.as_str() {
        "A" => Operand::A,
        "C" => Operand::C,
        "AB" => Operand::Ab,
        "DPTR" => Operand::Dptr,
        "@R0" => Operand::Ind(0),
        "@R1" => Operand::Ind(1),
        "@DPTR" => Operand::IndDptr,
        "@A+DPTR" => Operand::IndADptr,
        "@A+PC" => Operand::IndAPc,
        _ => {
            if let Some(n) = register(token) {
                Operand::Reg(n)
            } else if let Some(rest) = token.strip_prefix('#') {
                Operand::Imm(immediate(rest)?)
            } else if let Some(rest) = token.strip_prefix('/') {
                Operand::NotBit(address(rest)?)
            } else {
                Operand::Addr(address(token)?)
            }
        }
    };
    Ok(operand)
}

fn byte(value: &Value) -> Result<u8> {
    match value {
        Value::Const(n) => u8::try_from(*n).map_err(|_| {
            Error::new(
                ErrKind::IllegalOperand,
                format!("{n:X} does not fit in 8 bits"),
            )
        }),
        Value::Label(name) => Err(Error::new(
            ErrKind::IllegalOperand,
            format!("label `{name}` cannot be used as an 8-bit value"),
        )),
    }
}

fn encode(insn: &Insn, operands: &[Operand], pc: u16) -> Result<Encoding> {
    let mut opcode = insn.opcode;
    let mut fields = Vec::with_capacity(insn.operands.iter().map(|op| op.width()).sum());
    for (&slot, operand) in insn.operands.iter().zip(operands) {
        match (slot, operand) {
            (Opnd::Imm, Operand::Imm(value))
            | (Opnd::Direct | Opnd::Bit, Operand::Addr(value))
            | (Opnd::NotBit, Operand::NotBit(value)) => fields.push(Field::Byte(byte(value)?)),
            (Opnd::Imm16, Operand::Imm(value)) | (Opnd::Addr16, Operand::Addr(value)) => {
                match value {
                    Value::Const(word) => {
                        fields.push(Field::Byte((word >> 8) as u8));
                        fields.push(Field::Byte(*word as u8));
                    }
                    Value::Label(name) => fields.push(Field::Label(name.clone(), Mode::Addr16)),
                }
            }
            (Opnd::Rel, Operand::Addr(value)) => match value {
                Value::Const(_) => fields.push(Field::Byte(byte(value)?)),
                Value::Label(name) => fields.push(Field::Label(name.clone(), Mode::Rel)),
            },
            (Opnd::Addr11, Operand::Addr(value)) => match value {
                Value::Const(target) => {
                    opcode = reloc::page(opcode, pc.wrapping_add(2), *target)?;
                    fields.push(Field::Byte(*target as u8));
                }
                Value::Label(name) => fields.push(Field::Label(name.clone(), Mode::Addr11)),
            },
            // registers and fixed operands live in the opcode
            _ => {}
        }
    }
    // MOV direct,direct stores the source address first
    if insn.opcode == 0x85 {
        fields.reverse();
    }
    let encoding = Encoding { opcode, fields };
    debug_assert_eq!(encoding.len(), insn.len as usize, "{}", insn.pattern());
    Ok(encoding)
}

/// Encodes one collapsed instruction line assembled at `pc`.
pub fn assemble(line: &str, pc: u16) -> Result<Encoding> {
    let table = Table::get();
    if let Some(insn) = table.one_byte(line) {
        return Ok(Encoding {
            opcode: insn.opcode,
            fields: Vec::new(),
        });
    }

    let tokens = tokenize(line);
    let Some((&mne, operands)) = tokens.split_first() else {
        return Err(Error::new(ErrKind::Parse, "empty instruction"));
    };
    let mne = Mne::parse(mne).ok_or_else(|| {
        Error::new(
            ErrKind::IllegalInstruction,
            format!("unknown mnemonic `{mne}`"),
        )
    })?;
    let arity = table.arity(mne).unwrap_or(1);
    if tokens.len() > arity {
        return Err(Error::new(
            ErrKind::ExtraTokens,
            format!("{mne} takes {} operands, found {}", arity - 1, operands.len()),
        ));
    }
    if tokens.len() < arity {
        return Err(Error::new(
            ErrKind::IncompleteInstruction,
            format!("{mne} takes {} operands, found {}", arity - 1, operands.len()),
        ));
    }

    let operands = operands
        .iter()
        .map(|token| classify(token))
        .collect::<Result<Vec<_>>>()?;
    let insn = table
        .forms(mne)
        .iter()
        .find(|insn| {
            insn.operands.len() == operands.len()
                && insn
                    .operands
                    .iter()
                    .zip(&operands)
                    .all(|(&slot, operand)| operand.fits(slot))
        })
        .ok_or_else(|| {
            let pattern = operands
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(",");
            Error::new(
                ErrKind::IllegalInstruction,
                format!("no encoding for `{mne} {pattern}`"),
            )
        })?;
    encode(insn, &operands, pc)
}

/// Assembler state for pass 1.
#[derive(Debug)]
pub struct Asm {
    pc: u32,
    files: FileStack,
    symbols: IndexMap<String, u16>,
    entries: Vec<Entry>,
}

impl Asm {
    pub fn new(file: &str, origin: u16) -> Self {
        Self {
            pc: origin as u32,
            files: FileStack::new(file),
            symbols: IndexMap::new(),
            entries: Vec::new(),
        }
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn symbols(&self) -> &IndexMap<String, u16> {
        &self.symbols
    }

    pub fn into_symbols(self) -> IndexMap<String, u16> {
        self.symbols
    }

    pub fn pass1(&mut self, lines: &[String]) -> Result<()> {
        for line in lines {
            if self.files.step(line)? {
                continue;
            }
            self.line(line).map_err(|e| e.at(self.files.pos()))?;
        }
        if self.files.depth() != 0 {
            return Err(Error::new(ErrKind::Parse, "include without an end marker")
                .at(self.files.pos()));
        }
        Ok(())
    }

    fn line(&mut self, line: &str) -> Result<()> {
        let mut code = text::strip_comment(line).trim();
        if code.starts_with(INCLUDE_MARKER) {
            return Err(Error::new(ErrKind::Parse, "malformed include marker"));
        }

        if let Some(at) = text::pattern_index(code, ":") {
            let name = code[..at - 1].trim();
            self.define_label(name)?;
            code = code[at..].trim();
        }
        if code.is_empty() {
            return Ok(());
        }

        let code = text::trim_and_collapse(code);
        if text::pattern_index(&code, ".org") == Some(1) {
            let arg = text::substring(&code, 5, code.len() - 4)
                .map_err(|e| Error::new(ErrKind::Parse, e.to_string()))?
                .trim();
            let origin = text::parse_hex(arg)
                .ok_or_else(|| Error::new(ErrKind::Parse, format!("bad .org address `{arg}`")))?;
            tracing::trace!("{}: origin {origin:04X}", self.files.pos());
            self.pc = origin as u32;
            return Ok(());
        }

        let pc = self.addr()?;
        let encoding = assemble(&code, pc)?;
        tracing::trace!("{}: {pc:04X} {code} ({} bytes)", self.files.pos(), encoding.len());
        self.emit(Cell::Byte(encoding.opcode))?;
        for field in encoding.fields {
            match field {
                Field::Byte(byte) => self.emit(Cell::Byte(byte))?,
                Field::Label(name, mode) => {
                    let pos = self.files.pos().clone();
                    self.emit(Cell::Label { name, pos, mode })?;
                    if mode == Mode::Addr16 {
                        self.emit(Cell::Second)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn define_label(&mut self, name: &str) -> Result<()> {
        if !text::is_ident(name) {
            return Err(Error::new(
                ErrKind::Parse,
                format!("invalid label `{name}`"),
            ));
        }
        if self.symbols.contains_key(name) {
            return Err(Error::new(
                ErrKind::Parse,
                format!("symbol `{name}` already defined"),
            ));
        }
        let addr = self.addr()?;
        tracing::trace!("{}: {name} = {addr:04X}", self.files.pos());
        self.symbols.insert(name.to_string(), addr);
        Ok(())
    }

    fn addr(&self) -> Result<u16> {
        u16::try_from(self.pc).map_err(|_| {
            Error::new(
                ErrKind::ResourceExhausted,
                "location counter past FFFF",
            )
        })
    }

    fn emit(&mut self, cell: Cell) -> Result<()> {
        let addr = self.addr()?;
        self.entries.push(Entry { addr, cell });
        self.pc += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(line: &str) -> Vec<u8> {
        let encoding = assemble(&text::trim_and_collapse(line), 0).unwrap();
        let mut out = vec![encoding.opcode];
        for field in encoding.fields {
            match field {
                Field::Byte(byte) => out.push(byte),
                Field::Label(name, _) => panic!("unexpected label {name}"),
            }
        }
        out
    }

    fn kind(line: &str) -> ErrKind {
        assemble(&text::trim_and_collapse(line), 0).unwrap_err().kind()
    }

    fn pass1(source: &str) -> Result<Asm> {
        let lines: Vec<String> = source.lines().map(str::to_string).collect();
        let mut asm = Asm::new("main.asm", 0);
        asm.pass1(&lines)?;
        Ok(asm)
    }

    #[test]
    fn one_byte_forms() {
        assert_eq!(bytes("NOP"), [0x00]);
        assert_eq!(bytes("mov a, r3"), [0xEB]);
        assert_eq!(bytes("MOVC A,@A+DPTR"), [0x93]);
        assert_eq!(bytes("ret"), [0x22]);
    }

    #[test]
    fn immediate_and_direct_forms() {
        assert_eq!(bytes("MOV A,#01"), [0x74, 0x01]);
        assert_eq!(bytes("MOV R7,#0FFh"), [0x7F, 0xFF]);
        assert_eq!(bytes("MOV 30,#12"), [0x75, 0x30, 0x12]);
        assert_eq!(bytes("ADD A,B"), [0x25, 0xF0]);
        assert_eq!(bytes("MOV P1,A"), [0xF5, 0x90]);
        assert_eq!(bytes("ORL 20,A"), [0x42, 0x20]);
        assert_eq!(bytes("MOV 40,@R1"), [0x87, 0x40]);
    }

    #[test]
    fn move_direct_to_direct_stores_source_first() {
        assert_eq!(bytes("MOV 30,40"), [0x85, 0x40, 0x30]);
    }

    #[test]
    fn sixteen_bit_forms() {
        assert_eq!(bytes("MOV DPTR,#1234"), [0x90, 0x12, 0x34]);
        assert_eq!(bytes("LJMP 0x0800"), [0x02, 0x08, 0x00]);
    }

    #[test]
    fn bit_forms() {
        assert_eq!(bytes("SETB C"), [0xD3]);
        assert_eq!(bytes("SETB 90"), [0xD2, 0x90]);
        assert_eq!(bytes("ANL C,/20"), [0xB0, 0x20]);
        assert_eq!(bytes("MOV C,21"), [0xA2, 0x21]);
        assert_eq!(bytes("JB 20,05"), [0x20, 0x20, 0x05]);
    }

    #[test]
    fn numeric_ajmp_is_page_checked() {
        assert_eq!(bytes("AJMP 0123"), [0x21, 0x23]);
        let err = assemble("AJMP 0800", 0).unwrap_err();
        assert_eq!(err.kind(), ErrKind::JumpOutOfRange);
    }

    #[test]
    fn labels_become_fields() {
        let encoding = assemble("SJMP loop", 0).unwrap();
        assert_eq!(encoding.opcode, 0x80);
        assert_eq!(encoding.fields, [Field::Label("loop".into(), Mode::Rel)]);
        let encoding = assemble("CJNE A,#10,again", 0).unwrap();
        assert_eq!(encoding.opcode, 0xB4);
        assert_eq!(
            encoding.fields,
            [Field::Byte(0x10), Field::Label("again".into(), Mode::Rel)]
        );
        assert_eq!(encoding.len(), 3);
        let encoding = assemble("MOV DPTR,#table", 0).unwrap();
        assert_eq!(encoding.len(), 3);
    }

    #[test]
    fn operand_errors() {
        assert_eq!(kind("MOV A,#100"), ErrKind::IllegalOperand);
        assert_eq!(kind("MOV A,#zz!"), ErrKind::IllegalOperand);
        assert_eq!(kind("MOV A,label"), ErrKind::IllegalOperand);
        assert_eq!(kind("FOO A"), ErrKind::IllegalInstruction);
        assert_eq!(kind("MOV A,C"), ErrKind::IllegalInstruction);
        assert_eq!(kind("SJMP"), ErrKind::IncompleteInstruction);
        assert_eq!(kind("MOV A"), ErrKind::IncompleteInstruction);
        assert_eq!(kind("SJMP a,b"), ErrKind::ExtraTokens);
    }

    #[test]
    fn labels_and_origin() {
        let asm = pass1("start: nop\n.org 0100\nnext:\n  mov a,#01 ; x\n").unwrap();
        assert_eq!(asm.symbols().get("start"), Some(&0x0000));
        assert_eq!(asm.symbols().get("next"), Some(&0x0100));
        let addrs: Vec<u16> = asm.entries().iter().map(|e| e.addr).collect();
        assert_eq!(addrs, [0x0000, 0x0100, 0x0101]);
    }

    #[test]
    fn ljmp_reserves_second_slot() {
        let asm = pass1("ljmp far\nfar: ret\n").unwrap();
        let cells: Vec<&Cell> = asm.entries().iter().map(|e| &e.cell).collect();
        assert_eq!(cells.len(), 4);
        assert!(matches!(cells[1], Cell::Label { mode: Mode::Addr16, .. }));
        assert_eq!(cells[2], &Cell::Second);
        assert_eq!(asm.entries()[1].to_string(), "0001 far    main.asm  1");
        assert_eq!(asm.entries()[2].to_string(), format!("0002 {SECOND_SLOT}"));
    }

    #[test]
    fn duplicate_label_is_rejected() {
        let err = pass1("a1: nop\na1: nop\n").unwrap_err();
        assert_eq!(err.kind(), ErrKind::Parse);
        assert_eq!(err.pos(), Some(&Pos::new("main.asm", 2)));
    }

    #[test]
    fn errors_carry_position() {
        let err = pass1("nop\n\n  bogus a\n").unwrap_err();
        assert_eq!(err.kind(), ErrKind::IllegalInstruction);
        assert_eq!(err.pos(), Some(&Pos::new("main.asm", 3)));
    }

    #[test]
    fn location_counter_overflow() {
        let err = pass1(".org 0FFFF\nnop\nnop\n").unwrap_err();
        assert_eq!(err.kind(), ErrKind::ResourceExhausted);
        assert_eq!(err.pos(), Some(&Pos::new("main.asm", 3)));
    }

    #[test]
    fn unterminated_include_is_rejected() {
        let lines = vec![
            "nop".to_string(),
            crate::preprocess::start_marker("a.inc"),
            "ret".to_string(),
        ];
        let err = Asm::new("main.asm", 0).pass1(&lines).unwrap_err();
        assert_eq!(err.kind(), ErrKind::Parse);
        assert_eq!(err.pos(), Some(&Pos::new("a.inc", 1)));
    }

    #[test]
    fn encoding_length_counts_label_slots() {
        assert_eq!(assemble("LJMP far", 0).unwrap().len(), 3);
        assert_eq!(assemble("SJMP back", 0).unwrap().len(), 2);
        assert_eq!(assemble("MOV 30,31", 0).unwrap().len(), 3);
    }
}
