//! Conjunto de instrucciones de la máquina objetivo.
//!
//! Cada instrucción ocupa una palabra de 32 bits con cuatro campos:
//!
//! ```text
//!  31    28 27   24 23   20 19                               0
//! +--------+-------+-------+----------------------------------+
//! | opcode |  cmp  |  reg  |             address              |
//! +--------+-------+-------+----------------------------------+
//! ```
//!
//! Las instrucciones se manipulan como [`Instruction`] estructurada
//! durante toda la generación de código; el empaquetado a bits ocurre
//! únicamente al serializar.

use std::fmt::{self, Display};

use crate::ir::Cmp;

/// Máscara del campo de dirección, 20 bits.
pub const ADDRESS_MASK: u32 = 0xf_ffff;

/// Registro que actúa como contador de programa en un `JMP`.
pub const PC: u8 = 1;

/// Operación de máquina. El ordinal es el opcode en el formato binario.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MachineOp {
    Clr = 0,
    Add = 1,
    Sub = 2,
    Mul = 3,
    Div = 4,
    Jmp = 5,
    Cmp = 6,
    Lod = 7,
    Sto = 8,
    Hlt = 9,
}

impl MachineOp {
    const ALL: [MachineOp; 10] = [
        MachineOp::Clr,
        MachineOp::Add,
        MachineOp::Sub,
        MachineOp::Mul,
        MachineOp::Div,
        MachineOp::Jmp,
        MachineOp::Cmp,
        MachineOp::Lod,
        MachineOp::Sto,
        MachineOp::Hlt,
    ];

    pub fn from_opcode(opcode: u8) -> Option<MachineOp> {
        MachineOp::ALL.get(opcode as usize).copied()
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            MachineOp::Clr => "CLR",
            MachineOp::Add => "ADD",
            MachineOp::Sub => "SUB",
            MachineOp::Mul => "MUL",
            MachineOp::Div => "DIV",
            MachineOp::Jmp => "JMP",
            MachineOp::Cmp => "CMP",
            MachineOp::Lod => "LOD",
            MachineOp::Sto => "STO",
            MachineOp::Hlt => "HLT",
        }
    }
}

/// Una instrucción de máquina sin empaquetar.
///
/// `cmp` y `register` son campos de 4 bits; `address` es de 20 bits.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Instruction {
    pub op: MachineOp,
    pub cmp: u8,
    pub register: u8,
    pub address: u32,
}

impl Instruction {
    pub fn new(op: MachineOp, address: u32) -> Self {
        Instruction {
            op,
            cmp: 0,
            register: 0,
            address,
        }
    }

    /// Comparación contra el acumulador.
    pub fn compare(cmp: Cmp, address: u32) -> Self {
        Instruction {
            cmp: cmp.code(),
            ..Instruction::new(MachineOp::Cmp, address)
        }
    }

    /// Salto condicional por medio del contador de programa.
    ///
    /// La dirección se desconoce durante la emisión y se reubica luego.
    pub fn jump() -> Self {
        Instruction {
            register: PC,
            ..Instruction::new(MachineOp::Jmp, 0)
        }
    }

    /// Empaqueta en una palabra de 32 bits.
    pub fn encode(&self) -> u32 {
        (self.op as u32) << 28
            | (self.cmp as u32 & 0xf) << 24
            | (self.register as u32 & 0xf) << 20
            | (self.address & ADDRESS_MASK)
    }

    /// Desempaqueta una palabra. Falla si el opcode no existe.
    pub fn decode(word: u32) -> Option<Self> {
        let op = MachineOp::from_opcode((word >> 28) as u8)?;

        Some(Instruction {
            op,
            cmp: ((word >> 24) & 0xf) as u8,
            register: ((word >> 20) & 0xf) as u8,
            address: word & ADDRESS_MASK,
        })
    }
}

impl Display for Instruction {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cmp = match (self.op, Cmp::from_code(self.cmp)) {
            (MachineOp::Cmp, Some(cmp)) => cmp.symbol(),
            _ => "",
        };

        let register = match self.register {
            0 => String::new(),
            register => format!("r{}", register),
        };

        match self.op {
            MachineOp::Clr | MachineOp::Hlt => write!(fmt, "{}", self.op.mnemonic()),
            op => write!(
                fmt,
                "{} {:>2} {:>3} @{:#07x}",
                op.mnemonic(),
                cmp,
                register,
                self.address
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_layout() {
        let instruction = Instruction {
            op: MachineOp::Cmp,
            cmp: Cmp::Less.code(),
            register: 3,
            address: 0xabcde,
        };

        assert_eq!(instruction.encode(), 0x6_5_3_abcde);
        assert_eq!(Instruction::jump().encode(), 0x5010_0000);
        assert_eq!(Instruction::new(MachineOp::Hlt, 0).encode(), 0x9000_0000);
    }

    #[test]
    fn encoding_is_a_bijection() {
        let addresses = [0, 1, 0x200, 0x7_ffff, ADDRESS_MASK];

        for &op in MachineOp::ALL.iter() {
            for cmp in 0..16 {
                for register in 0..16 {
                    for &address in &addresses {
                        let instruction = Instruction {
                            op,
                            cmp,
                            register,
                            address,
                        };

                        assert_eq!(Instruction::decode(instruction.encode()), Some(instruction));
                    }
                }
            }
        }
    }

    #[test]
    fn unknown_opcodes_do_not_decode() {
        for opcode in 10..16u32 {
            assert_eq!(Instruction::decode(opcode << 28), None);
        }
    }

    #[test]
    fn listing() {
        assert_eq!(Instruction::new(MachineOp::Lod, 0x208).to_string(), "LOD        @0x00208");
        assert_eq!(Instruction::compare(Cmp::Less, 0x210).to_string(), "CMP  <     @0x00210");
        assert_eq!(Instruction::jump().to_string(), "JMP     r1 @0x00000");
        assert_eq!(Instruction::new(MachineOp::Hlt, 0).to_string(), "HLT");
    }
}
