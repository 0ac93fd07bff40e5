//! Generación de código.
//!
//! La traducción de átomos a instrucciones de máquina ocurre en dos
//! pasadas. La primera emite instrucciones en orden, reservando celdas
//! de datos conforme se referencian variables y literales. Los saltos
//! se emiten con dirección desconocida y se anotan en una tabla de
//! referencias, mientras que cada `LBL` anota la posición de escritura
//! actual en una tabla de etiquetas. La segunda pasada reubica: a cada
//! salto pendiente se le escribe la dirección en bytes de su etiqueta.
//!
//! Si se solicita, el optimizador local en [`peephole`] corre entre
//! ambas pasadas, de manera que las direcciones reubicadas siempre
//! corresponden al programa final.

use std::collections::{BTreeMap, HashMap};

use log::{debug, trace, warn};
use thiserror::Error;

use crate::{
    ir::{self, Atom, Cmp, MalformedAtomText, MathOp},
    machine::{Instruction, MachineOp},
    memory::{Memory, MemoryError, WORD_BYTES},
    opt::Optimizations,
};

pub mod peephole;

/// Falla de generación de código.
#[derive(Error, Debug, PartialEq)]
pub enum CodegenError {
    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error(transparent)]
    Malformed(#[from] MalformedAtomText),
}

/// Traduce una lista de átomos a una imagen de memoria.
pub fn emit(atoms: &[Atom], optimizations: Optimizations) -> Result<Memory, CodegenError> {
    let mut cx = Context::default();
    for atom in atoms {
        cx.atom(atom)?;
    }

    emit!(cx, Hlt)?;

    let Context {
        mut memory,
        mut relocations,
    } = cx;

    if optimizations.contains(Optimizations::LOCAL) {
        let removed = peephole::optimize(memory.program_mut(), &mut relocations);
        debug!("Peephole pass removed {} instructions", removed);
    }

    relocations.resolve(memory.program_mut())?;
    debug!(
        "Emitted {} instructions and {} data slots",
        memory.program().len(),
        memory.data().len()
    );

    Ok(memory)
}

/// Tablas de etiquetas y de saltos pendientes.
#[derive(Default, Debug)]
pub struct Relocations {
    labels: HashMap<String, usize>,
    references: BTreeMap<usize, String>,
}

impl Relocations {
    /// Define una etiqueta en un índice de palabra.
    pub fn define(&mut self, label: &str, index: usize) -> Result<(), MalformedAtomText> {
        match self.labels.insert(label.to_owned(), index) {
            Some(_) => Err(MalformedAtomText::DuplicateLabel(label.to_owned())),
            None => Ok(()),
        }
    }

    /// Anota un salto pendiente en `index` hacia `label`.
    pub fn refer(&mut self, index: usize, label: &str) {
        self.references.insert(index, label.to_owned());
    }

    /// Determina si alguna etiqueta apunta a `index`.
    pub fn is_target(&self, index: usize) -> bool {
        self.labels.values().any(|&label| label == index)
    }

    /// Ajusta ambas tablas tras eliminar la instrucción en `at`.
    ///
    /// Una etiqueta que apuntaba a `at` pasa a apuntar a la instrucción
    /// que ocupa su lugar.
    pub fn remove(&mut self, at: usize) {
        debug_assert!(!self.references.contains_key(&at));

        for index in self.labels.values_mut() {
            if *index > at {
                *index -= 1;
            }
        }

        self.references = std::mem::take(&mut self.references)
            .into_iter()
            .map(|(index, label)| if index > at { (index - 1, label) } else { (index, label) })
            .collect();
    }

    /// Escribe la dirección de cada salto pendiente.
    pub fn resolve(self, program: &mut [Instruction]) -> Result<(), MalformedAtomText> {
        for (index, label) in self.references {
            let target = match self.labels.get(&label) {
                Some(&target) => target,
                None => return Err(MalformedAtomText::UnmatchedLabel(label)),
            };

            let address = target as u32 * WORD_BYTES;
            trace!("{:04}: {} -> {:#07x}", index, label, address);

            program[index].address = address;
        }

        Ok(())
    }
}

#[derive(Default)]
struct Context {
    memory: Memory,
    relocations: Relocations,
}

impl Context {
    fn push(&mut self, instruction: Instruction) -> Result<usize, CodegenError> {
        Ok(self.memory.push(instruction)?)
    }

    fn atom(&mut self, atom: &Atom) -> Result<(), CodegenError> {
        trace!("{}", atom);

        match atom {
            Atom::Math {
                op,
                left,
                right,
                result,
            } => {
                let left = self.operand(left)?;
                let right = self.operand(right)?;
                let result = self.memory.variable(result)?;

                let op = match op {
                    MathOp::Add => MachineOp::Add,
                    MathOp::Sub => MachineOp::Sub,
                    MathOp::Mul => MachineOp::Mul,
                    MathOp::Div => MachineOp::Div,
                };

                emit!(self, Lod @ left)?;
                self.push(Instruction::new(op, right))?;
                emit!(self, Sto @ result)?;
            }

            Atom::Neg { left, result } => {
                let zero = self.memory.literal("0")?;
                let left = self.operand(left)?;
                let result = self.memory.variable(result)?;

                emit!(self, Lod @ zero)?;
                emit!(self, Sub @ left)?;
                emit!(self, Sto @ result)?;
            }

            Atom::Mov { source, dest } => {
                if source == "0" {
                    emit!(self, Clr)?;
                } else {
                    let source = self.operand(source)?;
                    emit!(self, Lod @ source)?;
                }

                let dest = self.memory.variable(dest)?;
                emit!(self, Sto @ dest)?;
            }

            Atom::Tst {
                left,
                right,
                cmp,
                dest,
            } => {
                let left = self.operand(left)?;
                let right = self.operand(right)?;

                // TST salta cuando la comparación es falsa
                match cmp.negate() {
                    Some(negated) => {
                        emit!(self, Lod @ left)?;
                        self.push(Instruction::compare(negated, right))?;
                        self.jump(dest)?;
                    }

                    None => warn!("`{}` never jumps, no code emitted", atom),
                }
            }

            Atom::Jmp { dest } => {
                let zero = self.memory.literal("0")?;
                self.push(Instruction::compare(Cmp::Always, zero))?;
                self.jump(dest)?;
            }

            Atom::Lbl { dest } => {
                let index = self.memory.program().len();
                self.relocations.define(dest, index)?;
            }
        }

        Ok(())
    }

    fn operand(&mut self, operand: &str) -> Result<u32, CodegenError> {
        let address = if ir::is_literal(operand) {
            self.memory.literal(operand)?
        } else {
            self.memory.variable(operand)?
        };

        Ok(address)
    }

    fn jump(&mut self, label: &str) -> Result<(), CodegenError> {
        let index = self.push(Instruction::jump())?;
        self.relocations.refer(index, label);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ir::read_atoms, memory::PROGRAM_BYTES};

    fn generate(text: &str) -> Result<Memory, CodegenError> {
        emit(&read_atoms(text).unwrap(), Optimizations::empty())
    }

    fn ops(memory: &Memory) -> Vec<MachineOp> {
        memory.program().iter().map(|instruction| instruction.op).collect()
    }

    #[test]
    fn arithmetic() {
        let memory = generate("MOV, 5, x\nADD, x, 1, x").unwrap();

        use MachineOp::*;
        assert_eq!(ops(&memory), [Lod, Sto, Lod, Add, Sto, Hlt]);

        let addresses: Vec<_> = memory.program().iter().map(|i| i.address).collect();
        assert_eq!(addresses, [512, 520, 520, 528, 520, 0]);
        assert_eq!(memory.data(), &[5.0, 0.0, 1.0]);
    }

    #[test]
    fn clear_and_negate() {
        let memory = generate("MOV, 0, x\nNEG, x, y").unwrap();

        use MachineOp::*;
        assert_eq!(ops(&memory), [Clr, Sto, Lod, Sub, Sto, Hlt]);

        // El literal "0" solo se reserva para NEG
        assert_eq!(memory.slot("x"), Some(0));
        assert_eq!(memory.slot("0"), Some(1));
        assert_eq!(memory.program()[2].address, PROGRAM_BYTES + 8);
        assert_eq!(memory.program()[3].address, PROGRAM_BYTES);
    }

    #[test]
    fn tests_jump_on_negated_comparison() {
        let memory = generate("LBL, top\nTST, x, 10, 5, top").unwrap();
        let program = memory.program();

        assert_eq!(program[0].op, MachineOp::Lod);
        assert_eq!(program[1], Instruction::compare(Cmp::GreaterOrEqual, 520));
        assert_eq!(program[2].op, MachineOp::Jmp);
        assert_eq!(program[2].register, crate::machine::PC);
        assert_eq!(program[2].address, 0);
    }

    #[test]
    fn unconditional_jumps_compare_always() {
        let memory = generate("JMP, end\nMOV, 1, x\nLBL, end").unwrap();
        let program = memory.program();

        assert_eq!(program[0], Instruction::compare(Cmp::Always, 512));
        assert_eq!(program[1].op, MachineOp::Jmp);
        assert_eq!(program[1].address, 4 * WORD_BYTES);
        assert_eq!(program[4].op, MachineOp::Hlt);
    }

    #[test]
    fn relocation_is_total() {
        let text = "LBL, a\nTST, x, 1, 6, b\nJMP, a\nLBL, b\nJMP, c\nLBL, c";
        let memory = generate(text).unwrap();

        let jumps: Vec<_> = memory
            .program()
            .iter()
            .filter(|instruction| instruction.op == MachineOp::Jmp)
            .map(|instruction| instruction.address)
            .collect();

        // a = 0, b = 5, c = 7 (HLT)
        assert_eq!(jumps, [5 * WORD_BYTES, 0, 7 * WORD_BYTES]);
    }

    #[test]
    fn missing_labels_fail() {
        let atoms = vec![Atom::Jmp {
            dest: "nowhere".into(),
        }];

        assert_eq!(
            emit(&atoms, Optimizations::all()).err(),
            Some(CodegenError::Malformed(MalformedAtomText::UnmatchedLabel(
                "nowhere".into()
            )))
        );
    }

    #[test]
    fn duplicate_labels_fail() {
        let atoms = vec![
            Atom::Lbl { dest: "a".into() },
            Atom::Lbl { dest: "a".into() },
        ];

        assert!(matches!(
            emit(&atoms, Optimizations::empty()),
            Err(CodegenError::Malformed(MalformedAtomText::DuplicateLabel(_)))
        ));
    }

    #[test]
    fn program_overflow() {
        let text = "ADD, x, 1, x\n".repeat(43);
        assert_eq!(
            generate(&text).err(),
            Some(CodegenError::Memory(MemoryError::ProgramExhausted))
        );
    }
}
