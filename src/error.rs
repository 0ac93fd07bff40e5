//! Reporte de errores ubicados en el código fuente.
//!
//! Los errores léxicos y sintácticos se acumulan en [`Diagnostics`],
//! cuya representación textual señala cada error sobre un extracto
//! del archivo original.

use crate::source::{Located, Location};
use std::{
    error::Error,
    fmt::{self, Display},
};

mod sealed {
    pub trait Sealed {}
}

/// Un error con una ubicación en el código fuente.
pub trait LocatedError: sealed::Sealed {
    fn source(&self) -> &dyn Error;
    fn location(&self) -> &Location;
}

/// Colección de errores lista para presentarse al usuario.
pub struct Diagnostics {
    kind: &'static str,
    errors: Vec<Box<dyn 'static + LocatedError>>,
}

impl Diagnostics {
    /// Cambia la etiqueta con la que se presenta cada error.
    pub fn kind(self, kind: &'static str) -> Self {
        Diagnostics { kind, ..self }
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Diagnostics {
            kind: "error",
            errors: Default::default(),
        }
    }
}

impl<E: 'static + LocatedError> From<E> for Diagnostics {
    fn from(error: E) -> Self {
        Diagnostics {
            errors: vec![Box::new(error)],
            ..Default::default()
        }
    }
}

impl<E: 'static + LocatedError> From<Vec<E>> for Diagnostics {
    fn from(errors: Vec<E>) -> Self {
        Diagnostics {
            errors: errors
                .into_iter()
                .map(|error| Box::new(error) as Box<dyn LocatedError>)
                .collect(),
            ..Default::default()
        }
    }
}

impl Display for Diagnostics {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.errors.is_empty() {
            return writeln!(fmt, "No errors were reported");
        }

        for error in &self.errors {
            writeln!(fmt, "{}: {}", self.kind, error.source())?;
            excerpt(fmt, error.location())?;
        }

        match self.errors.len() {
            1 => writeln!(fmt, "Build failed with 1 error"),
            count => writeln!(fmt, "Build failed with {} errors", count),
        }
    }
}

/// Muestra las líneas que abarca `location` y subraya el rango.
fn excerpt(fmt: &mut fmt::Formatter<'_>, location: &Location) -> fmt::Result {
    let (start, end) = (location.start(), location.end());
    let width = end.line().to_string().len();

    writeln!(fmt, " --> {}", location)?;
    writeln!(fmt, "{:width$} |", "", width = width)?;

    for number in start.line()..=end.line() {
        let line = location.source().line(number).unwrap_or_default();
        writeln!(fmt, "{:>width$} | {}", number, line, width = width)?;
    }

    // Columnas inclusivas
    let first = start.column().min(end.column());
    let last = start.column().max(end.column());
    let carets = "^".repeat((last - first + 1) as usize);

    writeln!(
        fmt,
        "{:width$} | {:skip$}{}",
        "",
        "",
        carets,
        width = width,
        skip = (first - 1) as usize
    )?;

    writeln!(fmt)
}

impl<E: Error> sealed::Sealed for Located<E> {}

impl<E: Error> LocatedError for Located<E> {
    fn source(&self) -> &dyn Error {
        self.as_ref()
    }

    fn location(&self) -> &Location {
        Located::location(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{lex, parse, source::Source};

    #[test]
    fn lexer_errors_are_excerpted() {
        let source = Source::new("prog.c", "int x = 5;\nx = x # 1;\n");
        let errors = lex::tokenize(&source).unwrap_err();

        let diagnostics = Diagnostics::from(errors);
        assert_eq!(diagnostics.len(), 1);

        let text = diagnostics.to_string();
        assert!(text.starts_with("error: Bad character '#' in input stream\n --> prog.c:2:7\n"));
        assert!(text.contains("2 | x = x # 1;\n  |       ^\n"));
        assert!(text.ends_with("Build failed with 1 error\n"));
    }

    #[test]
    fn parser_errors_use_the_given_kind() {
        let source = Source::new("prog.c", "while (x) { }");
        let tokens = lex::tokenize(&source).unwrap();
        let error = parse::parse(tokens.iter(), source.start()).unwrap_err();

        let text = Diagnostics::from(error).kind("syntax error").to_string();
        assert!(text.starts_with("syntax error: Expected a comparison operator"));
    }
}
