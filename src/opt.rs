//! Optimización global sobre la lista de átomos.
//!
//! Dos pasadas lineales, sin iterar hasta un punto fijo:
//!
//! 1. [`remove_unreachable`] elimina todo átomo que sigue a un `JMP`
//!    incondicional y precede a la siguiente etiqueta.
//! 2. [`fold_branches`] propaga constantes y elimina las ramas cuya
//!    condición es estáticamente falsa.
//!
//! Ninguna pasada edita átomos; solamente los elimina.

use std::collections::{HashMap, HashSet};

use bitflags::bitflags;
use log::{debug, trace};

use crate::ir::{self, Atom};

bitflags! {
    /// Optimizaciones habilitadas para una compilación.
    pub struct Optimizations: u32 {
        /// Pasadas sobre la lista de átomos, ver [`optimize`].
        const GLOBAL = 0x01;

        /// Pasada de mirilla sobre las instrucciones de máquina.
        const LOCAL = 0x02;
    }
}

/// Máximo de átomos a ejecutar al simular un ciclo cuya condición
/// de entrada es verdadera.
///
/// Al agotarse, el ciclo se trata como si su condición fuera desconocida.
pub const SIMULATION_STEPS: usize = 10_000;

/// Etiquetas que encabezan un ciclo.
const LOOP_ENTRIES: &[&str] = &["before_while", "before_for"];

/// Aplica ambas pasadas globales.
pub fn optimize(atoms: &mut Vec<Atom>) {
    let unreachable = remove_unreachable(atoms);
    let folded = fold_branches(atoms);

    debug!(
        "Global optimization removed {} unreachable and {} dead-branch atoms",
        unreachable, folded
    );
}

/// Elimina código inalcanzable tras saltos incondicionales.
///
/// Una etiqueta vuelve a hacer alcanzable el código que le sigue.
/// Retorna la cantidad de átomos eliminados.
pub fn remove_unreachable(atoms: &mut Vec<Atom>) -> usize {
    let before = atoms.len();
    let mut reachable = true;

    atoms.retain(|atom| match atom {
        Atom::Lbl { .. } => {
            reachable = true;
            true
        }

        Atom::Jmp { .. } if reachable => {
            reachable = false;
            true
        }

        _ => {
            if !reachable {
                trace!("unreachable: {}", atom);
            }

            reachable
        }
    });

    before - atoms.len()
}

/// Elimina ramas y ciclos que nunca se ejecutan.
///
/// Se recorre la lista en orden llevando el valor de cada variable que
/// se conoce en tiempo de compilación. Un `TST` cuya condición es
/// estáticamente falsa se elimina junto con todo lo que hay hasta su
/// etiqueta destino, además de la etiqueta de entrada si se trata de un
/// ciclo. Un ciclo cuya condición de entrada es verdadera se simula
/// para conocer los valores a su salida, sin alterar sus átomos.
///
/// Retorna la cantidad de átomos eliminados.
pub fn fold_branches(atoms: &mut Vec<Atom>) -> usize {
    let before = atoms.len();

    let mut walk = Walk::default();
    let mut index = 0;

    while index < atoms.len() {
        index = walk.step(atoms, index);
    }

    before - atoms.len()
}

/// Valores conocidos de variables.
///
/// Una variable que nunca se ha asignado vale cero. Una que se asignó
/// de forma incierta no tiene valor conocido.
#[derive(Clone, Default)]
struct Values {
    known: HashMap<String, f64>,
    unknown: HashSet<String>,
}

impl Values {
    fn get(&self, operand: &str) -> Option<f64> {
        if ir::is_literal(operand) {
            operand.parse().ok()
        } else if self.unknown.contains(operand) {
            None
        } else {
            Some(self.known.get(operand).copied().unwrap_or(0.0))
        }
    }

    fn set(&mut self, name: &str, value: Option<f64>) {
        match value {
            Some(value) => {
                self.unknown.remove(name);
                self.known.insert(name.to_owned(), value);
            }

            None => self.forget(name),
        }
    }

    fn forget(&mut self, name: &str) {
        self.known.remove(name);
        self.unknown.insert(name.to_owned());
    }

    /// Valor que asigna un átomo, si es computable.
    fn eval(&self, atom: &Atom) -> Option<f64> {
        match atom {
            Atom::Math {
                op, left, right, ..
            } => op.apply(self.get(left)?, self.get(right)?),

            Atom::Neg { left, .. } => Some(-self.get(left)?),
            Atom::Mov { source, .. } => self.get(source),
            _ => None,
        }
    }

    /// Ejecuta un ciclo completo, desde su etiqueta de entrada hasta su
    /// etiqueta de salida, que deben ser el primer y el último átomo.
    fn simulate(&self, atoms: &[Atom]) -> Option<Values> {
        let labels: HashMap<&str, usize> = atoms
            .iter()
            .enumerate()
            .filter_map(|(index, atom)| atom.label().map(|label| (label, index)))
            .collect();

        let exit = atoms.len() - 1;
        let mut values = self.clone();
        let mut pc = 0;

        for _ in 0..SIMULATION_STEPS {
            if pc >= exit {
                return Some(values);
            }

            let atom = &atoms[pc];
            pc = match atom {
                Atom::Tst {
                    left,
                    right,
                    cmp,
                    dest,
                } => {
                    if cmp.holds(values.get(left)?, values.get(right)?) {
                        pc + 1
                    } else {
                        *labels.get(dest.as_str())?
                    }
                }

                Atom::Jmp { dest } => *labels.get(dest.as_str())?,
                Atom::Lbl { .. } => pc + 1,

                _ => {
                    let value = values.eval(atom)?;
                    if let Some(target) = atom.target() {
                        values.set(target, Some(value));
                    }

                    pc + 1
                }
            };
        }

        None
    }
}

#[derive(Default)]
struct Walk {
    values: Values,

    /// Destinos de saltos hacia adelante que aún no se alcanzan.
    ///
    /// Mientras exista alguno, el código recorrido puede no ejecutarse.
    pending: HashSet<String>,

    /// Etiquetas ya recorridas. Un salto hacia ellas es hacia atrás.
    seen: HashSet<String>,
}

impl Walk {
    fn certain(&self) -> bool {
        self.pending.is_empty()
    }

    /// Procesa el átomo en `index` y retorna el índice del siguiente.
    fn step(&mut self, atoms: &mut Vec<Atom>, index: usize) -> usize {
        if let Atom::Tst { .. } = atoms[index] {
            return self.test(atoms, index);
        }

        match &atoms[index] {
            Atom::Lbl { dest } => {
                self.pending.remove(dest);
                self.seen.insert(dest.clone());

                // Un ciclo que no sigue la forma usual se trata como incierto
                if !is_loop_head(atoms, index) {
                    let end = atoms
                        .iter()
                        .rposition(|atom| atom.jump_target() == Some(dest.as_str()));

                    if let Some(end) = end.filter(|&end| end > index) {
                        self.forget_targets(&atoms[index..end]);
                    }
                }

                index + 1
            }

            Atom::Jmp { dest } => {
                if !self.seen.contains(dest) {
                    self.pending.insert(dest.clone());
                }

                index + 1
            }

            atom => {
                let value = if self.certain() {
                    self.values.eval(atom)
                } else {
                    None
                };

                if let Some(target) = atom.target() {
                    trace!("{} := {:?}", target, value);
                    self.values.set(target, value);
                }

                index + 1
            }
        }
    }

    fn test(&mut self, atoms: &mut Vec<Atom>, index: usize) -> usize {
        let (outcome, dest) = match &atoms[index] {
            Atom::Tst {
                left,
                right,
                cmp,
                dest,
            } => {
                let outcome = match (self.values.get(left), self.values.get(right)) {
                    (Some(left), Some(right)) => Some(cmp.holds(left, right)),
                    _ => None,
                };

                (outcome, dest.clone())
            }

            _ => return index + 1,
        };

        // Etiqueta destino; un salto hacia atrás no delimita un cuerpo
        let end = match atoms[index + 1..]
            .iter()
            .position(|atom| atom.label() == Some(dest.as_str()))
        {
            Some(offset) => index + 1 + offset,
            None => return index + 1,
        };

        let head = if index > 0 && is_loop_head(atoms, index - 1) {
            Some(index - 1)
        } else {
            None
        };

        let start = head.unwrap_or(index);
        let outcome = match outcome {
            Some(false) if is_entered_elsewhere(atoms, start, end) => {
                debug!("Dead branch `{}` is entered from outside", atoms[index]);
                None
            }

            outcome => outcome,
        };

        match (outcome, head) {
            (Some(false), _) => {
                debug!("Removing dead branch `{}` ({} atoms)", atoms[index], end + 1 - start);

                atoms.drain(start..=end);
                return start;
            }

            (Some(true), None) => return index + 1,

            (Some(true), Some(head)) if self.certain() => {
                if let Some(values) = self.values.simulate(&atoms[head..=end]) {
                    trace!("Loop `{}` simulated to completion", atoms[head]);

                    self.values = values;
                    self.seen.insert(dest);
                    return end + 1;
                }

                debug!("Gave up simulating loop `{}`", atoms[head]);
            }

            _ => (),
        }

        self.forget_targets(&atoms[index + 1..end]);
        self.pending.insert(dest);

        index + 1
    }

    fn forget_targets(&mut self, atoms: &[Atom]) {
        for target in atoms.iter().filter_map(Atom::target) {
            self.values.forget(target);
        }
    }
}

/// Determina si algún salto fuera de `start..=end` apunta a una etiqueta
/// definida dentro de ese rango.
fn is_entered_elsewhere(atoms: &[Atom], start: usize, end: usize) -> bool {
    let inner: HashSet<&str> = atoms[start..=end].iter().filter_map(Atom::label).collect();

    atoms[..start]
        .iter()
        .chain(&atoms[end + 1..])
        .filter_map(Atom::jump_target)
        .any(|target| inner.contains(target))
}

/// Determina si el átomo en `index` es la etiqueta de entrada de un ciclo,
/// seguida por la prueba que salta a la etiqueta de salida del mismo ciclo.
fn is_loop_head(atoms: &[Atom], index: usize) -> bool {
    let (label, dest) = match (atoms.get(index), atoms.get(index + 1)) {
        (Some(Atom::Lbl { dest: label }), Some(Atom::Tst { dest, .. })) => (label, dest),
        _ => return false,
    };

    match (label.rsplit_once('_'), dest.rsplit_once('_')) {
        (Some((base, suffix)), Some((_, dest_suffix))) => {
            LOOP_ENTRIES.contains(&base) && suffix == dest_suffix
        }

        _ => false,
    }
}
