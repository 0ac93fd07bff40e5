//! Optimización local sobre pares adyacentes de instrucciones.
//!
//! Corre antes de la reubicación. Cada eliminación se refleja en
//! [`Relocations`] para que las etiquetas y los saltos pendientes sigan
//! apuntando a las mismas instrucciones.

use log::trace;

use super::Relocations;
use crate::machine::{Instruction, MachineOp};

/// Aplica las reglas hasta agotar los pares. Retorna cuántas
/// instrucciones se eliminaron.
///
/// - `LOD a; STO a` pierde el `LOD`.
/// - `STO a; LOD a` se elimina por completo.
///
/// Un par cuya segunda instrucción es destino de una etiqueta no se toca,
/// ya que es posible llegar a ella sin pasar por la primera.
pub fn optimize(program: &mut Vec<Instruction>, relocations: &mut Relocations) -> usize {
    let mut removed = 0;
    let mut index = 0;

    while index + 1 < program.len() {
        let (first, second) = (program[index], program[index + 1]);
        if first.address != second.address || relocations.is_target(index + 1) {
            index += 1;
            continue;
        }

        match (first.op, second.op) {
            (MachineOp::Lod, MachineOp::Sto) => {
                trace!("{:04}: {}; {} -> {}", index, first, second, second);
                remove(program, relocations, index);
                removed += 1;
            }

            (MachineOp::Sto, MachineOp::Lod) => {
                trace!("{:04}: {}; {} -> nothing", index, first, second);
                remove(program, relocations, index + 1);
                remove(program, relocations, index);
                removed += 2;
            }

            _ => index += 1,
        }
    }

    removed
}

fn remove(program: &mut Vec<Instruction>, relocations: &mut Relocations, index: usize) {
    program.remove(index);
    relocations.remove(index);
}
