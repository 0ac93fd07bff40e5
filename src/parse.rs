//! Análisis sintáctico y construcción de IR.
//!
//! El parser es descendente recursivo con un solo token de lookahead.
//! No se construye un AST: cada regla emite átomos directamente a la
//! lista de salida conforme reconoce la sintaxis. Las estructuras de
//! control se traducen a saltos y etiquetas en ese mismo recorrido.
//!
//! ```text
//! program    := stmt*
//! stmt       := ifStmt | whileStmt | forStmt | assignment ';'
//! ifStmt     := 'if' '(' condition ')' block ('else' (ifStmt | block))?
//! whileStmt  := 'while' '(' condition ')' block
//! forStmt    := 'for' '(' assignment ';' condition ';' assignment ')' block
//! block      := '{' stmt* '}'
//! assignment := type? IDENT ( '++' | '--' | '=' expr )
//! expr       := '-' IDENT | factor (mathOp factor)?
//! condition  := factor cmpOp factor
//! factor     := '-'? (INT | DOUBLE) | IDENT
//! ```
//!
//! Cualquier token inesperado aborta el análisis con un único error.

use log::debug;
use std::{iter::Peekable, marker::PhantomData};
use thiserror::Error;

use crate::{
    ir::{Atom, Cmp, MathOp},
    lex::{Keyword, Token, TokenKind},
    source::{Located, Location},
};

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ParserError {
    #[error("Expected {0}, found {1} instead")]
    UnexpectedToken(TokenKind, Token),

    #[error("Expected {0}, none was found instead")]
    MissingToken(TokenKind),

    #[error("Expected any of `if`, `while`, `for` or an assignment, found {0}")]
    ExpectedStatement(Token),

    #[error("Expected an identifier or a numeric literal, found {0}")]
    ExpectedFactor(Token),

    #[error("Expected a comparison operator, found {0}")]
    ExpectedComparison(Token),

    #[error("Expected `=`, `++` or `--`, found {0}")]
    ExpectedAssignment(Token),

    #[error("Abrupt end of program")]
    UnexpectedEof,
}

/// Flujo de tokens consumido por el parser.
pub trait TokenStream<'a>: Iterator<Item = &'a Located<Token>> {}

impl<'a, I: Iterator<Item = &'a Located<Token>>> TokenStream<'a> for I {}

/// Traduce un flujo de tokens a una lista de átomos.
///
/// `start` es la ubicación que se reporta si el flujo termina antes
/// de haber consumido algún token.
pub fn parse<'a>(tokens: impl TokenStream<'a>, start: Location) -> Result<Vec<Atom>, Located<ParserError>> {
    let mut parser = Parser {
        tokens: tokens.peekable(),
        atoms: Vec::new(),
        last_known: start,
        lifetime_hack: PhantomData,
    };

    parser.program()?;
    debug!("Parsed {} atoms", parser.atoms.len());

    Ok(parser.atoms)
}

/// Tabla de operadores de comparación fuente.
const COMPARISONS: &[(TokenKind, Cmp)] = &[
    (TokenKind::NotEqual,       Cmp::NotEqual),
    (TokenKind::GreaterOrEqual, Cmp::GreaterOrEqual),
    (TokenKind::LessOrEqual,    Cmp::LessOrEqual),
    (TokenKind::Greater,        Cmp::Greater),
    (TokenKind::Less,           Cmp::Less),
    (TokenKind::Equal,          Cmp::Equal),
];

const MATH_OPS: &[(TokenKind, MathOp)] = &[
    (TokenKind::Plus,   MathOp::Add),
    (TokenKind::Minus,  MathOp::Sub),
    (TokenKind::Times,  MathOp::Mul),
    (TokenKind::Divide, MathOp::Div),
];

type Parse<T> = Result<T, Located<ParserError>>;

/// Estado del parser.
///
/// `atoms` es la lista en construcción. Los únicos átomos que se
/// modifican luego de insertarse son los `TST` de un `if`, cuyo destino
/// se redirige al encontrar un `else`.
struct Parser<'a, I: TokenStream<'a>> {
    tokens: Peekable<I>,
    atoms: Vec<Atom>,
    last_known: Location,
    lifetime_hack: PhantomData<&'a ()>,
}

impl<'a, I: TokenStream<'a>> Parser<'a, I> {
    fn program(&mut self) -> Parse<()> {
        while self.tokens.peek().is_some() {
            self.statement()?;
        }

        Ok(())
    }

    fn statement(&mut self) -> Parse<()> {
        use TokenKind::*;

        match self.peek() {
            Some(Keyword(self::Keyword::If)) => self.if_statement(),
            Some(Keyword(self::Keyword::While)) => self.while_statement(),
            Some(Keyword(self::Keyword::For)) => self.for_statement(),

            Some(Id) | Some(Keyword(self::Keyword::Int)) | Some(Keyword(self::Keyword::Double)) => {
                let atom = self.assignment()?;
                self.expect(Semicolon)?;
                self.atoms.push(atom);

                Ok(())
            }

            _ => {
                let token = self.next()?;
                self.fail(ParserError::ExpectedStatement(token))
            }
        }
    }

    fn block(&mut self) -> Parse<()> {
        self.expect(TokenKind::OpenCurly)?;

        while self.peek() != Some(TokenKind::CloseCurly) {
            self.statement()?;
        }

        self.expect(TokenKind::CloseCurly)
    }

    fn if_statement(&mut self) -> Parse<()> {
        self.keyword(Keyword::If)?;
        self.expect(TokenKind::OpenParen)?;

        let after = self.label("after_if");
        let test = self.test(&after)?;

        self.expect(TokenKind::CloseParen)?;
        self.block()?;

        if self.peek() == Some(TokenKind::Keyword(Keyword::Else)) {
            self.keyword(Keyword::Else)?;
            self.atoms.push(Atom::Jmp {
                dest: after.clone(),
            });

            // El salto por condición falsa ahora cae al inicio del `else`
            let before_else = self.label("before_else");
            self.redirect(test, &before_else);
            self.atoms.push(Atom::Lbl { dest: before_else });

            if self.peek() == Some(TokenKind::Keyword(Keyword::If)) {
                self.if_statement()?;
            } else {
                self.block()?;
            }
        }

        self.atoms.push(Atom::Lbl { dest: after });
        Ok(())
    }

    fn while_statement(&mut self) -> Parse<()> {
        self.keyword(Keyword::While)?;
        self.expect(TokenKind::OpenParen)?;

        let before = self.label("before_while");
        let after = self.label("after_while");
        self.atoms.push(Atom::Lbl {
            dest: before.clone(),
        });

        self.test(&after)?;
        self.expect(TokenKind::CloseParen)?;
        self.block()?;

        self.atoms.push(Atom::Jmp { dest: before });
        self.atoms.push(Atom::Lbl { dest: after });

        Ok(())
    }

    fn for_statement(&mut self) -> Parse<()> {
        self.keyword(Keyword::For)?;
        self.expect(TokenKind::OpenParen)?;

        let init = self.assignment()?;
        self.atoms.push(init);
        self.expect(TokenKind::Semicolon)?;

        let before = self.label("before_for");
        let after = self.label("after_for");
        self.atoms.push(Atom::Lbl {
            dest: before.clone(),
        });

        self.test(&after)?;
        self.expect(TokenKind::Semicolon)?;

        // El incremento se reconoce aquí pero se emite tras el cuerpo
        let step = self.assignment()?;
        self.expect(TokenKind::CloseParen)?;
        self.block()?;

        self.atoms.push(step);
        self.atoms.push(Atom::Jmp { dest: before });
        self.atoms.push(Atom::Lbl { dest: after });

        Ok(())
    }

    /// Emite un `TST` para la condición que sigue y retorna su índice.
    fn test(&mut self, dest: &str) -> Parse<usize> {
        let (left, cmp, right) = self.condition()?;

        self.atoms.push(Atom::Tst {
            left,
            right,
            cmp,
            dest: dest.to_owned(),
        });

        Ok(self.atoms.len() - 1)
    }

    fn redirect(&mut self, test: usize, label: &str) {
        if let Some(Atom::Tst { dest, .. }) = self.atoms.get_mut(test) {
            *dest = label.to_owned();
        }
    }

    fn assignment(&mut self) -> Parse<Atom> {
        if let Some(TokenKind::Keyword(Keyword::Int | Keyword::Double)) = self.peek() {
            self.next()?;
        }

        let target = self.id()?;

        let token = self.next()?;
        match token.kind() {
            TokenKind::Increment => Ok(Atom::Math {
                op: MathOp::Add,
                left: target.clone(),
                right: String::from("1"),
                result: target,
            }),

            TokenKind::Decrement => Ok(Atom::Math {
                op: MathOp::Sub,
                left: target.clone(),
                right: String::from("1"),
                result: target,
            }),

            TokenKind::Assign => self.expr(target),
            _ => self.fail(ParserError::ExpectedAssignment(token)),
        }
    }

    fn expr(&mut self, result: String) -> Parse<Atom> {
        let left = if self.peek() == Some(TokenKind::Minus) {
            self.next()?;

            let token = self.next()?;
            match token.kind() {
                TokenKind::Id => {
                    return Ok(Atom::Neg {
                        left: token.lexeme().to_owned(),
                        result,
                    })
                }

                TokenKind::IntLiteral | TokenKind::DoubleLiteral => format!("-{}", token.lexeme()),
                _ => return self.fail(ParserError::ExpectedFactor(token)),
            }
        } else {
            self.factor()?
        };

        let op = self
            .peek()
            .and_then(|kind| MATH_OPS.iter().find(|&&(token, _)| token == kind))
            .map(|&(_, op)| op);

        match op {
            Some(op) => {
                self.next()?;
                let right = self.factor()?;

                Ok(Atom::Math {
                    op,
                    left,
                    right,
                    result,
                })
            }

            None => Ok(Atom::Mov {
                source: left,
                dest: result,
            }),
        }
    }

    fn condition(&mut self) -> Parse<(String, Cmp, String)> {
        let left = self.factor()?;

        let token = self.next()?;
        let cmp = match COMPARISONS.iter().find(|&&(kind, _)| kind == token.kind()) {
            Some(&(_, cmp)) => cmp,
            None => return self.fail(ParserError::ExpectedComparison(token)),
        };

        let right = self.factor()?;
        Ok((left, cmp, right))
    }

    fn factor(&mut self) -> Parse<String> {
        let token = self.next()?;
        match token.kind() {
            TokenKind::Id | TokenKind::IntLiteral | TokenKind::DoubleLiteral => {
                Ok(token.lexeme().to_owned())
            }

            TokenKind::Minus => {
                let literal = self.next()?;
                match literal.kind() {
                    TokenKind::IntLiteral | TokenKind::DoubleLiteral => {
                        Ok(format!("-{}", literal.lexeme()))
                    }

                    _ => self.fail(ParserError::ExpectedFactor(literal)),
                }
            }

            _ => self.fail(ParserError::ExpectedFactor(token)),
        }
    }

    fn id(&mut self) -> Parse<String> {
        let token = self.next()?;
        match token.kind() {
            TokenKind::Id => Ok(token.lexeme().to_owned()),
            _ => self.fail(ParserError::UnexpectedToken(TokenKind::Id, token)),
        }
    }

    /// Genera un nombre de etiqueta único dentro de la unidad de compilación.
    fn label(&self, base: &str) -> String {
        format!("{}_{}", base, self.atoms.len())
    }

    fn keyword(&mut self, keyword: Keyword) -> Parse<()> {
        self.expect(TokenKind::Keyword(keyword))
    }

    fn expect(&mut self, kind: TokenKind) -> Parse<()> {
        match self.tokens.peek() {
            None => self.fail(ParserError::MissingToken(kind)),
            Some(_) => {
                let found = self.next()?;
                if found.kind() == kind {
                    Ok(())
                } else {
                    self.fail(ParserError::UnexpectedToken(kind, found))
                }
            }
        }
    }

    fn peek(&mut self) -> Option<TokenKind> {
        self.tokens.peek().map(|token| token.val().kind())
    }

    fn next(&mut self) -> Parse<Token> {
        match self.tokens.next() {
            Some(token) => {
                self.last_known = token.location().clone();
                Ok(token.val().clone())
            }

            None => self.fail(ParserError::UnexpectedEof),
        }
    }

    fn fail<T>(&self, error: ParserError) -> Parse<T> {
        Err(Located::at(error, self.last_known.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{lex, source::Source};

    fn atoms(text: &str) -> Vec<String> {
        try_parse(text)
            .expect("parsing failed")
            .iter()
            .map(Atom::to_string)
            .collect()
    }

    fn try_parse(text: &str) -> Result<Vec<Atom>, Located<ParserError>> {
        let source = Source::new("<test>", text);
        let tokens = lex::tokenize(&source).expect("lexing failed");
        parse(tokens.iter(), source.start())
    }

    #[test]
    fn declaration_and_update() {
        assert_eq!(atoms("int x = 5; x = x + 1;"), ["MOV, 5, x", "ADD, x, 1, x"]);
    }

    #[test]
    fn unary_forms() {
        assert_eq!(
            atoms("x++; y--; z = -x; w = -2.5; v = -3 * y;"),
            [
                "ADD, x, 1, x",
                "SUB, y, 1, y",
                "NEG, x, z",
                "MOV, -2.5, w",
                "MUL, -3, y, v"
            ]
        );
    }

    #[test]
    fn if_without_else() {
        assert_eq!(
            atoms("if (x < 3) { x = 1; }"),
            ["TST, x, 3, 5, after_if_0", "MOV, 1, x", "LBL, after_if_0"]
        );
    }

    #[test]
    fn if_with_else() {
        assert_eq!(
            atoms("if (x == y) { a = 1; } else { a = 2; }"),
            [
                "TST, x, y, 6, before_else_3",
                "MOV, 1, a",
                "JMP, after_if_0",
                "LBL, before_else_3",
                "MOV, 2, a",
                "LBL, after_if_0"
            ]
        );
    }

    #[test]
    fn else_if_chain() {
        let atoms = atoms("if (x > 1) { a = 1; } else if (x > 0) { a = 2; } else { a = 3; }");
        assert_eq!(atoms.iter().filter(|atom| atom.starts_with("TST")).count(), 2);
        assert_eq!(atoms.iter().filter(|atom| atom.starts_with("LBL")).count(), 4);

        let parsed = try_parse("if (x > 1) { a = 1; } else if (x > 0) { a = 2; } else { a = 3; }");
        assert!(crate::ir::check_labels(&parsed.unwrap()).is_ok());
    }

    #[test]
    fn while_loop() {
        assert_eq!(
            atoms("while (i <= 10) { i++; }"),
            [
                "LBL, before_while_0",
                "TST, i, 10, 3, after_while_0",
                "ADD, i, 1, i",
                "JMP, before_while_0",
                "LBL, after_while_0"
            ]
        );
    }

    #[test]
    fn for_loop_moves_step_after_body() {
        assert_eq!(
            atoms("for (int i = 0; i != 3; i++) { s = s + i; }"),
            [
                "MOV, 0, i",
                "LBL, before_for_1",
                "TST, i, 3, 1, after_for_1",
                "ADD, s, i, s",
                "ADD, i, 1, i",
                "JMP, before_for_1",
                "LBL, after_for_1"
            ]
        );
    }

    #[test]
    fn nested_labels_are_unique() {
        let atoms = try_parse("while (a < 1) { while (b < 1) { b++; } if (a > 0) { a--; } }").unwrap();
        assert!(crate::ir::check_labels(&atoms).is_ok());
    }

    #[test]
    fn syntax_errors() {
        assert!(matches!(
            try_parse("x = 1").unwrap_err().into_inner(),
            ParserError::MissingToken(TokenKind::Semicolon)
        ));

        assert!(matches!(
            try_parse("x + 1;").unwrap_err().into_inner(),
            ParserError::ExpectedAssignment(_)
        ));

        assert!(matches!(
            try_parse("if (x = 1) { }").unwrap_err().into_inner(),
            ParserError::ExpectedComparison(_)
        ));

        assert!(matches!(
            try_parse("} x = 1;").unwrap_err().into_inner(),
            ParserError::ExpectedStatement(_)
        ));

        assert!(matches!(
            try_parse("while (x < 1) { x++;").unwrap_err().into_inner(),
            ParserError::UnexpectedEof
        ));
    }

    #[test]
    fn error_location_points_at_offending_token() {
        let error = try_parse("x = 1;\ny = ;").unwrap_err();
        assert_eq!(error.location().start().line(), 2);
        assert_eq!(error.location().start().column(), 5);
    }
}
