//! Espacio de direcciones de la máquina objetivo.
//!
//! La memoria lineal se divide en dos regiones contiguas:
//!
//! - Región de programa: capacidad fija de [`PROGRAM_BYTES`], contiene
//!   palabras de instrucción en orden de escritura.
//! - Región de datos: comienza inmediatamente después de la región de
//!   programa. Cada celda contiene un `f64` y corresponde a una variable
//!   o a un literal. La primera referencia a un nombre o literal le
//!   asigna una celda nueva; las siguientes reutilizan la misma.
//!
//! Los literales se identifican por su forma textual exacta, de manera
//! que `"1"` y `"1.0"` ocupan celdas distintas.

use std::{
    collections::HashMap,
    fmt::{self, Display},
};

use log::trace;
use thiserror::Error;

use crate::machine::Instruction;

/// Tamaño de una palabra de instrucción, en bytes.
pub const WORD_BYTES: u32 = 4;

/// Tamaño de una celda de datos, en bytes.
pub const SLOT_BYTES: u32 = 8;

/// Capacidad fija de la región de programa, en bytes.
pub const PROGRAM_BYTES: u32 = 512;

/// Dirección máxima representable en el campo de 20 bits.
pub const MAX_ADDRESS: u32 = (1 << 20) - 1;

/// Agotamiento de alguna de las dos regiones.
#[non_exhaustive]
#[derive(Error, Debug, PartialEq)]
pub enum MemoryError {
    #[error("Out of program memory, capacity is {} instructions", PROGRAM_BYTES / WORD_BYTES)]
    ProgramExhausted,

    #[error("Out of data memory while allocating `{0}`")]
    DataExhausted(String),

    #[error("Bad numeric literal `{0}`")]
    BadLiteral(String),
}

/// Imagen de memoria de un programa.
#[derive(Default)]
pub struct Memory {
    program: Vec<Instruction>,
    data: Vec<f64>,
    symbols: HashMap<String, usize>,
}

impl Memory {
    pub fn new() -> Self {
        Memory::default()
    }

    /// Agrega una instrucción al final de la región de programa.
    ///
    /// Retorna el índice de palabra en el que quedó.
    pub fn push(&mut self, instruction: Instruction) -> Result<usize, MemoryError> {
        if self.program.len() as u32 >= PROGRAM_BYTES / WORD_BYTES {
            return Err(MemoryError::ProgramExhausted);
        }

        trace!("{:04}: {}", self.program.len(), instruction);
        self.program.push(instruction);

        Ok(self.program.len() - 1)
    }

    /// Dirección de la celda de una variable, asignándola en cero si no existe.
    pub fn variable(&mut self, symbol: &str) -> Result<u32, MemoryError> {
        self.slot_address(symbol, 0.0)
    }

    /// Dirección de la celda de un literal, asignándola con su valor si no existe.
    pub fn literal(&mut self, literal: &str) -> Result<u32, MemoryError> {
        let value = literal
            .parse()
            .map_err(|_| MemoryError::BadLiteral(literal.to_owned()))?;

        self.slot_address(literal, value)
    }

    /// Índice de celda previamente asignado a un símbolo o literal.
    pub fn slot(&self, symbol: &str) -> Option<usize> {
        self.symbols.get(symbol).copied()
    }

    pub fn program(&self) -> &[Instruction] {
        &self.program
    }

    pub(crate) fn program_mut(&mut self) -> &mut Vec<Instruction> {
        &mut self.program
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// Serializa la imagen completa.
    ///
    /// La región de programa se escribe como palabras big-endian y se
    /// rellena con ceros hasta [`PROGRAM_BYTES`]. Le siguen las celdas de
    /// datos, ocho bytes big-endian cada una. No hay encabezado.
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(PROGRAM_BYTES as usize + self.data.len() * 8);
        for instruction in &self.program {
            bytes.extend_from_slice(&instruction.encode().to_be_bytes());
        }

        bytes.resize(PROGRAM_BYTES as usize, 0);
        for &value in &self.data {
            bytes.extend_from_slice(&encode_value(value).to_be_bytes());
        }

        bytes
    }

    fn slot_address(&mut self, symbol: &str, initial: f64) -> Result<u32, MemoryError> {
        let slot = match self.symbols.get(symbol) {
            Some(&slot) => slot,
            None => {
                let slot = self.data.len();
                if address_of(slot) > MAX_ADDRESS as u64 {
                    return Err(MemoryError::DataExhausted(symbol.to_owned()));
                }

                trace!("slot {} <- `{}` = {}", slot, symbol, initial);
                self.data.push(initial);
                self.symbols.insert(symbol.to_owned(), slot);

                slot
            }
        };

        Ok(address_of(slot) as u32)
    }
}

/// Byte de inicio de una celda de datos.
fn address_of(slot: usize) -> u64 {
    slot as u64 * SLOT_BYTES as u64 + PROGRAM_BYTES as u64
}

/// Representación de 8 bytes de un valor de datos.
///
/// Un entero exacto se coloca en los 32 bits altos; cualquier otro
/// valor se escribe según IEEE-754.
fn encode_value(value: f64) -> u64 {
    let integer = value as i32;
    if value.fract() == 0.0 && integer as f64 == value {
        (integer as u32 as u64) << 32
    } else {
        value.to_bits()
    }
}

/// Listado legible de la región de programa.
pub struct Listing<'a>(&'a Memory);

impl Memory {
    pub fn listing(&self) -> Listing<'_> {
        Listing(self)
    }
}

impl Display for Listing<'_> {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Listing(memory) = self;

        for (index, instruction) in memory.program.iter().enumerate() {
            writeln!(
                fmt,
                "{:04x}: {:032b}  {}",
                index as u32 * WORD_BYTES,
                instruction.encode(),
                instruction
            )?;
        }

        let mut symbols: Vec<_> = memory.symbols.iter().collect();
        symbols.sort_by_key(|&(_, &slot)| slot);

        for (symbol, &slot) in symbols {
            writeln!(fmt, "{:04x}: {:<16} {}", address_of(slot), symbol, memory.data[slot])?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::MachineOp;

    #[test]
    fn slots_are_keyed_by_text() {
        let mut memory = Memory::new();

        assert_eq!(memory.literal("1"), Ok(PROGRAM_BYTES));
        assert_eq!(memory.literal("1.0"), Ok(PROGRAM_BYTES + SLOT_BYTES));
        assert_eq!(memory.variable("x"), Ok(PROGRAM_BYTES + 2 * SLOT_BYTES));
        assert_eq!(memory.literal("1"), Ok(PROGRAM_BYTES));
        assert_eq!(memory.variable("x"), Ok(PROGRAM_BYTES + 2 * SLOT_BYTES));

        assert_eq!(memory.data(), &[1.0, 1.0, 0.0]);
        assert_eq!(memory.slot("1.0"), Some(1));
        assert_eq!(memory.slot("y"), None);
    }

    #[test]
    fn bad_literals_are_rejected() {
        let mut memory = Memory::new();
        assert_eq!(memory.literal("1x"), Err(MemoryError::BadLiteral("1x".into())));
    }

    #[test]
    fn program_region_is_bounded() {
        let mut memory = Memory::new();
        let capacity = (PROGRAM_BYTES / WORD_BYTES) as usize;

        for index in 0..capacity {
            assert_eq!(memory.push(Instruction::new(MachineOp::Clr, 0)), Ok(index));
        }

        assert_eq!(
            memory.push(Instruction::new(MachineOp::Hlt, 0)),
            Err(MemoryError::ProgramExhausted)
        );
    }

    #[test]
    fn data_region_is_bounded() {
        let mut memory = Memory::new();
        let capacity = ((MAX_ADDRESS - PROGRAM_BYTES) / SLOT_BYTES + 1) as usize;

        for slot in 0..capacity {
            memory.variable(&format!("v{}", slot)).unwrap();
        }

        assert!(matches!(
            memory.variable("overflow"),
            Err(MemoryError::DataExhausted(_))
        ));

        // Los símbolos existentes se siguen resolviendo
        assert!(memory.variable("v0").is_ok());
    }

    #[test]
    fn serialization_layout() {
        let mut memory = Memory::new();
        memory.push(Instruction::new(MachineOp::Lod, 0x200)).unwrap();
        memory.push(Instruction::new(MachineOp::Hlt, 0)).unwrap();
        memory.literal("5").unwrap();
        memory.literal("2.5").unwrap();
        memory.literal("-3").unwrap();

        let bytes = memory.encode();
        assert_eq!(bytes.len(), PROGRAM_BYTES as usize + 3 * 8);

        assert_eq!(&bytes[0..4], &[0x70, 0x00, 0x02, 0x00]);
        assert_eq!(&bytes[4..8], &[0x90, 0x00, 0x00, 0x00]);
        assert!(bytes[8..PROGRAM_BYTES as usize].iter().all(|&byte| byte == 0));

        let data = &bytes[PROGRAM_BYTES as usize..];
        assert_eq!(&data[0..8], &[0, 0, 0, 5, 0, 0, 0, 0]);
        assert_eq!(&data[8..16], &2.5f64.to_bits().to_be_bytes());
        assert_eq!(&data[16..24], &[0xff, 0xff, 0xff, 0xfd, 0, 0, 0, 0]);
    }
}
