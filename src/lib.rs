//! Compilador de un lenguaje imperativo pequeño hacia una máquina de
//! acumulador con palabras de instrucción de 32 bits.
//!
//! # Front end
//! El código fuente se somete primero a análisis léxico en [`lex`], de
//! lo cual se obtiene un flujo de tokens. El análisis sintáctico en
//! [`parse`] traduce ese flujo directamente a una lista de átomos,
//! código de tres direcciones descrito en [`ir`], sin pasar por un AST.
//! Opcionalmente, [`opt`] elimina código muerto de esa lista.
//!
//! # Back end
//! [`codegen`] traduce átomos a instrucciones de [`machine`] dentro de
//! una imagen de [`memory`], reservando celdas de datos para variables
//! y literales y reubicando saltos a etiquetas. La imagen se serializa
//! tal cual, sin encabezado.
//!
//! La lista de átomos tiene además un formato textual, ver
//! [`ir::read_atoms()`], que permite correr cada mitad por separado.

#[macro_use]
mod macros;

pub mod codegen;
pub mod error;
pub mod ir;
pub mod lex;
pub mod machine;
pub mod memory;
pub mod opt;
pub mod parse;
pub mod source;
