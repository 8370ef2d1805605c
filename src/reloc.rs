//! Pass 2: resolve label placeholders against the symbol table.

use indexmap::IndexMap;

use crate::{
    asm::{Cell, Entry, Mode},
    ErrKind, Error, Result,
};

/// Folds bits 8..11 of `target` into an AJMP/ACALL opcode. `next` is the
/// address after the instruction; both must share a 2KB page.
pub fn page(opcode: u8, next: u16, target: u16) -> Result<u8> {
    if (target & 0xF800) != (next & 0xF800) {
        return Err(Error::new(
            ErrKind::JumpOutOfRange,
            format!("{target:04X} is outside the 2KB page of {next:04X}"),
        ));
    }
    Ok((((target >> 8) & 0x07) as u8) << 5 | (opcode & 0x1F))
}

/// Signed displacement from `next` to `target`.
pub fn displacement(next: u16, target: u16) -> Result<u8> {
    let disp = target as i32 - next as i32;
    if !(-128..=127).contains(&disp) {
        return Err(Error::new(
            ErrKind::JumpOutOfRange,
            format!("{target:04X} is {disp} bytes from {next:04X}"),
        ));
    }
    Ok(disp as i8 as u8)
}

/// Produces the final `(address, byte)` stream from the pass 1 entries.
pub fn resolve(entries: &[Entry], symbols: &IndexMap<String, u16>) -> Result<Vec<(u16, u8)>> {
    let mut out: Vec<(u16, u8)> = Vec::with_capacity(entries.len());
    let mut entries = entries.iter();
    while let Some(entry) = entries.next() {
        tracing::trace!("{entry}");
        let (name, pos, mode) = match &entry.cell {
            Cell::Byte(byte) => {
                out.push((entry.addr, *byte));
                continue;
            }
            Cell::Label { name, pos, mode } => (name, pos, *mode),
            Cell::Second => {
                return Err(Error::new(
                    ErrKind::Parse,
                    format!("stray second slot at {:04X}", entry.addr),
                ))
            }
        };

        let target = *symbols.get(name).ok_or_else(|| {
            Error::new(ErrKind::IllegalOperand, format!("undefined label `{name}`")).at(pos)
        })?;
        match mode {
            Mode::Rel => {
                let disp = displacement(entry.addr.wrapping_add(1), target).map_err(|e| e.at(pos))?;
                out.push((entry.addr, disp));
            }
            Mode::Addr11 => {
                let opcode = match out.last_mut() {
                    Some((addr, opcode)) if addr.wrapping_add(1) == entry.addr => opcode,
                    _ => {
                        return Err(Error::new(
                            ErrKind::Parse,
                            format!("`{name}` has no opcode to patch"),
                        )
                        .at(pos))
                    }
                };
                *opcode = page(*opcode, entry.addr.wrapping_add(1), target).map_err(|e| e.at(pos))?;
                out.push((entry.addr, target as u8));
            }
            Mode::Addr16 => {
                let Some(Entry {
                    addr: low,
                    cell: Cell::Second,
                }) = entries.next()
                else {
                    return Err(Error::new(
                        ErrKind::Parse,
                        format!("`{name}` is missing its low byte slot"),
                    )
                    .at(pos));
                };
                out.push((entry.addr, (target >> 8) as u8));
                out.push((*low, target as u8));
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Pos;

    fn byte(addr: u16, byte: u8) -> Entry {
        Entry {
            addr,
            cell: Cell::Byte(byte),
        }
    }

    fn label(addr: u16, name: &str, mode: Mode) -> Entry {
        Entry {
            addr,
            cell: Cell::Label {
                name: name.to_string(),
                pos: Pos::new("main.asm", 7),
                mode,
            },
        }
    }

    fn symbols(pairs: &[(&str, u16)]) -> IndexMap<String, u16> {
        pairs.iter().map(|&(name, addr)| (name.to_string(), addr)).collect()
    }

    #[test]
    fn relative_displacements() {
        assert_eq!(displacement(0x0002, 0x0004).unwrap(), 0x02);
        assert_eq!(displacement(0x0002, 0x0000).unwrap(), 0xFE);
        assert_eq!(displacement(0x0100, 0x0100 + 127).unwrap(), 0x7F);
        assert_eq!(displacement(0x0100, 0x0100 - 128).unwrap(), 0x80);
        assert_eq!(
            displacement(0x0100, 0x0100 + 128).unwrap_err().kind(),
            ErrKind::JumpOutOfRange
        );
    }

    #[test]
    fn page_folding() {
        assert_eq!(page(0x01, 0x0002, 0x0734).unwrap(), 0xE1);
        assert_eq!(page(0x11, 0x0802, 0x0900).unwrap(), 0x31);
        assert!(page(0x01, 0x07FE, 0x0800).is_err());
    }

    #[test]
    fn resolves_each_mode() {
        let entries = [
            byte(0x0000, 0x80),
            label(0x0001, "near", Mode::Rel),
            byte(0x0002, 0x11),
            label(0x0003, "fwd", Mode::Addr11),
            byte(0x0004, 0x02),
            label(0x0005, "fwd", Mode::Addr16),
            Entry {
                addr: 0x0006,
                cell: Cell::Second,
            },
        ];
        let out = resolve(&entries, &symbols(&[("near", 0x0010), ("fwd", 0x0123)])).unwrap();
        assert_eq!(
            out,
            [
                (0x0000, 0x80),
                (0x0001, 0x0E),
                (0x0002, 0x31),
                (0x0003, 0x23),
                (0x0004, 0x02),
                (0x0005, 0x01),
                (0x0006, 0x23),
            ]
        );
    }

    #[test]
    fn undefined_label_reports_placeholder_position() {
        let entries = [byte(0x0000, 0x80), label(0x0001, "nowhere", Mode::Rel)];
        let err = resolve(&entries, &IndexMap::new()).unwrap_err();
        assert_eq!(err.kind(), ErrKind::IllegalOperand);
        assert_eq!(err.pos(), Some(&Pos::new("main.asm", 7)));
    }

    #[test]
    fn out_of_range_branch() {
        let entries = [byte(0x0000, 0x80), label(0x0001, "far", Mode::Rel)];
        let err = resolve(&entries, &symbols(&[("far", 0x0200)])).unwrap_err();
        assert_eq!(err.kind(), ErrKind::JumpOutOfRange);
    }
}
