//! Representación intermedia.
//!
//! El parser traduce el programa fuente directamente a una lista
//! ordenada de [`Atom`]s (código de tres direcciones). Los campos de un
//! átomo son textuales: nombres de variables, literales numéricos tal
//! como aparecen en el fuente, o nombres de etiquetas.
//!
//! # Formato textual
//! Los átomos pueden escribirse y leerse en un formato de una línea
//! por átomo, `OPCODE, campo, campo, ...`, el cual sirve de frontera
//! entre las fases delanteras y traseras del compilador:
//!
//! ```text
//! MOV, 5, x
//! LBL, before_while_1
//! TST, x, 10, 5, after_while_1
//! ADD, x, 1, x
//! JMP, before_while_1
//! LBL, after_while_1
//! ```

use std::{
    collections::HashSet,
    fmt::{self, Display},
    io::{self, Write},
    str::FromStr,
};

use thiserror::Error;
use unicase::Ascii as NoCase;

/// Una instrucción de código de tres direcciones.
#[derive(Clone, Debug, PartialEq)]
pub enum Atom {
    /// `result = left <op> right`
    Math {
        op: MathOp,
        left: String,
        right: String,
        result: String,
    },

    /// `result = -left`
    Neg { left: String, result: String },

    /// `dest = source`
    Mov { source: String, dest: String },

    /// Salta a `dest` si la comparación `left <cmp> right` es falsa.
    Tst {
        left: String,
        right: String,
        cmp: Cmp,
        dest: String,
    },

    /// Salto incondicional.
    Jmp { dest: String },

    /// Define una etiqueta en esta posición.
    Lbl { dest: String },
}

impl Atom {
    pub fn opcode(&self) -> Opcode {
        match self {
            Atom::Math { op, .. } => match op {
                MathOp::Add => Opcode::Add,
                MathOp::Sub => Opcode::Sub,
                MathOp::Mul => Opcode::Mul,
                MathOp::Div => Opcode::Div,
            },

            Atom::Neg { .. } => Opcode::Neg,
            Atom::Mov { .. } => Opcode::Mov,
            Atom::Tst { .. } => Opcode::Tst,
            Atom::Jmp { .. } => Opcode::Jmp,
            Atom::Lbl { .. } => Opcode::Lbl,
        }
    }

    /// Variable que este átomo asigna, si alguna.
    pub fn target(&self) -> Option<&str> {
        match self {
            Atom::Math { result, .. } | Atom::Neg { result, .. } => Some(result),
            Atom::Mov { dest, .. } => Some(dest),
            _ => None,
        }
    }

    /// Etiqueta a la que este átomo puede saltar.
    pub fn jump_target(&self) -> Option<&str> {
        match self {
            Atom::Tst { dest, .. } | Atom::Jmp { dest } => Some(dest),
            _ => None,
        }
    }

    /// Etiqueta que este átomo define.
    pub fn label(&self) -> Option<&str> {
        match self {
            Atom::Lbl { dest } => Some(dest),
            _ => None,
        }
    }
}

impl Display for Atom {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}", self.opcode())?;

        match self {
            Atom::Math {
                left,
                right,
                result,
                ..
            } => write!(fmt, ", {}, {}, {}", left, right, result),

            Atom::Neg { left, result } => write!(fmt, ", {}, {}", left, result),
            Atom::Mov { source, dest } => write!(fmt, ", {}, {}", source, dest),

            Atom::Tst {
                left,
                right,
                cmp,
                dest,
            } => write!(fmt, ", {}, {}, {}, {}", left, right, cmp.code(), dest),

            Atom::Jmp { dest } | Atom::Lbl { dest } => write!(fmt, ", {}", dest),
        }
    }
}

/// Operación aritmética binaria.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MathOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl MathOp {
    /// Evalúa la operación en tiempo de compilación.
    ///
    /// La división entre cero no tiene un resultado constante.
    pub fn apply(self, left: f64, right: f64) -> Option<f64> {
        match self {
            MathOp::Add => Some(left + right),
            MathOp::Sub => Some(left - right),
            MathOp::Mul => Some(left * right),
            MathOp::Div if right == 0.0 => None,
            MathOp::Div => Some(left / right),
        }
    }
}

/// Código de operación de un átomo, tal como aparece en el formato textual.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Opcode {
    Add,
    Sub,
    Mul,
    Div,
    Neg,
    Mov,
    Tst,
    Jmp,
    Lbl,
}

const OPCODES: &[(NoCase<&str>, Opcode)] = &[
    (NoCase::new("ADD"), Opcode::Add),
    (NoCase::new("SUB"), Opcode::Sub),
    (NoCase::new("MUL"), Opcode::Mul),
    (NoCase::new("DIV"), Opcode::Div),
    (NoCase::new("NEG"), Opcode::Neg),
    (NoCase::new("MOV"), Opcode::Mov),
    (NoCase::new("TST"), Opcode::Tst),
    (NoCase::new("JMP"), Opcode::Jmp),
    (NoCase::new("LBL"), Opcode::Lbl),
];

impl Opcode {
    /// Número de campos que siguen al opcode en el formato textual.
    pub fn arity(self) -> usize {
        match self {
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div => 3,
            Opcode::Neg | Opcode::Mov => 2,
            Opcode::Tst => 4,
            Opcode::Jmp | Opcode::Lbl => 1,
        }
    }
}

impl Display for Opcode {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (name, _) = OPCODES[*self as usize];
        fmt.write_str(name.into_inner())
    }
}

impl FromStr for Opcode {
    type Err = ();

    fn from_str(string: &str) -> Result<Self, Self::Err> {
        OPCODES
            .iter()
            .find(|&&(name, _)| name == NoCase::new(string))
            .map(|&(_, opcode)| opcode)
            .ok_or(())
    }
}

/// Código de comparación.
///
/// Esta es la única tabla que relaciona operadores de comparación con
/// su código numérico. Tanto el parser como el generador de código y
/// el campo `cmp` de las instrucciones de máquina la utilizan.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Cmp {
    Always = 0,
    NotEqual = 1,
    GreaterOrEqual = 2,
    LessOrEqual = 3,
    Greater = 4,
    Less = 5,
    Equal = 6,
}

impl Cmp {
    const ALL: [Cmp; 7] = [
        Cmp::Always,
        Cmp::NotEqual,
        Cmp::GreaterOrEqual,
        Cmp::LessOrEqual,
        Cmp::Greater,
        Cmp::Less,
        Cmp::Equal,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Cmp> {
        Cmp::ALL.get(code as usize).copied()
    }

    /// Evalúa la comparación.
    pub fn holds(self, left: f64, right: f64) -> bool {
        match self {
            Cmp::Always => true,
            Cmp::NotEqual => left != right,
            Cmp::GreaterOrEqual => left >= right,
            Cmp::LessOrEqual => left <= right,
            Cmp::Greater => left > right,
            Cmp::Less => left < right,
            Cmp::Equal => left == right,
        }
    }

    /// Comparación complementaria. `Always` no tiene complemento en la tabla.
    pub fn negate(self) -> Option<Cmp> {
        let negated = match self {
            Cmp::Always => return None,
            Cmp::NotEqual => Cmp::Equal,
            Cmp::GreaterOrEqual => Cmp::Less,
            Cmp::LessOrEqual => Cmp::Greater,
            Cmp::Greater => Cmp::LessOrEqual,
            Cmp::Less => Cmp::GreaterOrEqual,
            Cmp::Equal => Cmp::NotEqual,
        };

        Some(negated)
    }

    /// Símbolo del operador fuente.
    pub fn symbol(self) -> &'static str {
        match self {
            Cmp::Always => "*",
            Cmp::NotEqual => "!=",
            Cmp::GreaterOrEqual => ">=",
            Cmp::LessOrEqual => "<=",
            Cmp::Greater => ">",
            Cmp::Less => "<",
            Cmp::Equal => "==",
        }
    }
}

/// Determina si un operando es un literal numérico en vez de una variable.
///
/// Los literales comienzan con un dígito, o con `-` seguido de un dígito.
pub fn is_literal(operand: &str) -> bool {
    let digits = operand.strip_prefix('-').unwrap_or(operand);
    digits.starts_with(|c: char| c.is_ascii_digit())
}

/// Error en una lista de átomos leída de texto, o cuyas etiquetas no cuadran.
#[non_exhaustive]
#[derive(Error, Debug, PartialEq)]
pub enum MalformedAtomText {
    #[error("line {line}: unknown opcode `{opcode}`")]
    UnknownOpcode { line: usize, opcode: String },

    #[error("line {line}: `{opcode}` takes {expected} fields, found {found}")]
    Arity {
        line: usize,
        opcode: Opcode,
        expected: usize,
        found: usize,
    },

    #[error("line {line}: bad comparison code `{code}`")]
    BadComparison { line: usize, code: String },

    #[error("line {line}: empty field")]
    EmptyField { line: usize },

    #[error("Jump target `{0}` has no matching label")]
    UnmatchedLabel(String),

    #[error("Label `{0}` is defined more than once")]
    DuplicateLabel(String),
}

/// Lee una lista de átomos en formato textual.
///
/// Las líneas en blanco se ignoran. Además de la sintaxis de cada línea,
/// se verifica que todo salto tenga exactamente una etiqueta destino.
pub fn read_atoms(text: &str) -> Result<Vec<Atom>, MalformedAtomText> {
    let atoms = text
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| parse_atom(index + 1, line.trim_end()))
        .collect::<Result<Vec<_>, _>>()?;

    check_labels(&atoms)?;
    Ok(atoms)
}

/// Escribe una lista de átomos en formato textual, uno por línea.
pub fn write_atoms<W: Write>(atoms: &[Atom], output: &mut W) -> io::Result<()> {
    for atom in atoms {
        writeln!(output, "{}", atom)?;
    }

    Ok(())
}

/// Verifica que cada `JMP`/`TST` tenga exactamente un `LBL` correspondiente.
pub fn check_labels(atoms: &[Atom]) -> Result<(), MalformedAtomText> {
    let mut labels = HashSet::new();
    for label in atoms.iter().filter_map(Atom::label) {
        if !labels.insert(label) {
            return Err(MalformedAtomText::DuplicateLabel(label.to_owned()));
        }
    }

    match atoms
        .iter()
        .filter_map(Atom::jump_target)
        .find(|target| !labels.contains(target))
    {
        Some(target) => Err(MalformedAtomText::UnmatchedLabel(target.to_owned())),
        None => Ok(()),
    }
}

fn parse_atom(line: usize, text: &str) -> Result<Atom, MalformedAtomText> {
    let mut fields = text.split(", ");

    let name = fields.next().unwrap_or_default();
    let opcode = Opcode::from_str(name).map_err(|()| MalformedAtomText::UnknownOpcode {
        line,
        opcode: name.to_owned(),
    })?;

    let fields: Vec<String> = fields.map(str::to_owned).collect();
    if fields.len() != opcode.arity() {
        return Err(MalformedAtomText::Arity {
            line,
            opcode,
            expected: opcode.arity(),
            found: fields.len(),
        });
    } else if fields.iter().any(String::is_empty) {
        return Err(MalformedAtomText::EmptyField { line });
    }

    let mut fields = fields.into_iter();
    let mut field = || fields.next().unwrap_or_default();

    let math = |op, left, right, result| Atom::Math {
        op,
        left,
        right,
        result,
    };

    let atom = match opcode {
        Opcode::Add => math(MathOp::Add, field(), field(), field()),
        Opcode::Sub => math(MathOp::Sub, field(), field(), field()),
        Opcode::Mul => math(MathOp::Mul, field(), field(), field()),
        Opcode::Div => math(MathOp::Div, field(), field(), field()),

        Opcode::Neg => Atom::Neg {
            left: field(),
            result: field(),
        },

        Opcode::Mov => Atom::Mov {
            source: field(),
            dest: field(),
        },

        Opcode::Tst => {
            let (left, right, code) = (field(), field(), field());
            let cmp = code
                .parse()
                .ok()
                .and_then(Cmp::from_code)
                .ok_or(MalformedAtomText::BadComparison { line, code })?;

            Atom::Tst {
                left,
                right,
                cmp,
                dest: field(),
            }
        }

        Opcode::Jmp => Atom::Jmp { dest: field() },
        Opcode::Lbl => Atom::Lbl { dest: field() },
    };

    Ok(atom)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<Atom> {
        vec![
            Atom::Mov {
                source: "5".into(),
                dest: "x".into(),
            },
            Atom::Lbl {
                dest: "before_while_1".into(),
            },
            Atom::Tst {
                left: "x".into(),
                right: "10.5".into(),
                cmp: Cmp::Less,
                dest: "after_while_1".into(),
            },
            Atom::Math {
                op: MathOp::Div,
                left: "x".into(),
                right: "-2".into(),
                result: "y".into(),
            },
            Atom::Neg {
                left: "y".into(),
                result: "x".into(),
            },
            Atom::Jmp {
                dest: "before_while_1".into(),
            },
            Atom::Lbl {
                dest: "after_while_1".into(),
            },
        ]
    }

    #[test]
    fn text_format() {
        let mut text = Vec::new();
        write_atoms(&sample(), &mut text).unwrap();

        let expected = "MOV, 5, x\n\
                        LBL, before_while_1\n\
                        TST, x, 10.5, 5, after_while_1\n\
                        DIV, x, -2, y\n\
                        NEG, y, x\n\
                        JMP, before_while_1\n\
                        LBL, after_while_1\n";

        assert_eq!(String::from_utf8(text).unwrap(), expected);
    }

    #[test]
    fn text_round_trip() {
        let atoms = sample();
        let text: String = atoms.iter().map(|atom| format!("{}\n", atom)).collect();

        assert_eq!(read_atoms(&text).unwrap(), atoms);
    }

    #[test]
    fn opcodes_are_case_insensitive() {
        let atoms = read_atoms("mov, 0, x\n\nLbl, end\n").unwrap();
        assert_eq!(atoms[0].opcode(), Opcode::Mov);
        assert_eq!(atoms[1].label(), Some("end"));
    }

    #[test]
    fn malformed_lines() {
        assert_eq!(
            read_atoms("POP, x"),
            Err(MalformedAtomText::UnknownOpcode {
                line: 1,
                opcode: "POP".into()
            })
        );

        assert_eq!(
            read_atoms("MOV, 1, x\nADD, x, 1"),
            Err(MalformedAtomText::Arity {
                line: 2,
                opcode: Opcode::Add,
                expected: 3,
                found: 2
            })
        );

        assert!(matches!(
            read_atoms("TST, x, 1, 9, l\nLBL, l"),
            Err(MalformedAtomText::BadComparison { line: 1, .. })
        ));
    }

    #[test]
    fn jumps_need_exactly_one_label() {
        assert_eq!(
            read_atoms("JMP, nowhere"),
            Err(MalformedAtomText::UnmatchedLabel("nowhere".into()))
        );

        assert_eq!(
            read_atoms("LBL, a\nLBL, a"),
            Err(MalformedAtomText::DuplicateLabel("a".into()))
        );
    }

    #[test]
    fn comparison_table() {
        for code in 0..7 {
            assert_eq!(Cmp::from_code(code).map(Cmp::code), Some(code));
        }

        assert_eq!(Cmp::from_code(7), None);
        assert!(Cmp::Always.holds(1.0, 2.0));
        assert!(Cmp::Less.holds(1.0, 2.0));
        assert!(!Cmp::Less.negate().unwrap().holds(1.0, 2.0));
        assert_eq!(Cmp::Always.negate(), None);
    }

    #[test]
    fn literal_detection() {
        assert!(is_literal("1"));
        assert!(is_literal("1.0"));
        assert!(is_literal("-3"));
        assert!(!is_literal("x1"));
        assert!(!is_literal("-x"));
        assert!(!is_literal(""));
    }
}
