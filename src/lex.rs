//! Análisis léxico.
//!
//! # Tokenization
//! Esta es la primera fase del compilador. Descompone el texto de un
//! [`Source`] en unidades léxicas denominadas tokens. Los espacios en
//! blanco y los comentarios de línea (`// ...`) se descartan durante
//! esta operación. Cada token emitido está asociado a una ubicación en
//! el código fuente original.
//!
//! # Contenido de un token
//! A diferencia de otras fases, aquí sí se preserva el lexema exacto de
//! cada token, incluyendo literales numéricos. La generación de código
//! asigna memoria a cada literal según su forma textual, por lo cual
//! `1` y `1.0` son constantes distintas y no deben normalizarse.
//!
//! # Errores
//! El lexer es capaz de recuperarse parcialmente de condiciones de error:
//! se descarta el resto de la línea y se continúa. Esto permite reportar
//! más de un error por ejecución, pero no avanzar a las demás fases.

use crate::source::{Located, Location, Position, Source};
use std::{
    fmt::{self, Display},
    iter::Peekable,
    rc::Rc,
};

use thiserror::Error;

/// Error de escaneo.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum LexerError {
    /// Carácter desconocido o inesperado en el flujo de entrada.
    #[error("Bad character {0:?} in input stream")]
    BadChar(char),

    /// Se esperaba un carácter específico en esta posición.
    #[error("Expected {0:?}")]
    Expected(char),

    /// Un literal de punto flotante sin dígitos fraccionarios, como `1.`.
    #[error("Double literal requires at least one digit after the decimal point")]
    MalformedDouble,
}

/// Objeto resultante del análisis léxico.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    kind: TokenKind,
    lexeme: String,
}

impl Token {
    pub fn new<L: Into<String>>(kind: TokenKind, lexeme: L) -> Self {
        Token {
            kind,
            lexeme: lexeme.into(),
        }
    }

    pub fn kind(&self) -> TokenKind {
        self.kind
    }

    /// Texto original del token.
    pub fn lexeme(&self) -> &str {
        &self.lexeme
    }
}

impl Display for Token {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        use TokenKind::*;

        match self.kind {
            Id => write!(fmt, "identifier `{}`", self.lexeme),
            IntLiteral | DoubleLiteral => write!(fmt, "literal `{}`", self.lexeme),
            kind => Display::fmt(&kind, fmt),
        }
    }
}

/// Clase de un token.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TokenKind {
    /// Identificador.
    Id,

    /// Palabra clave.
    Keyword(Keyword),

    /// Literal entero, como `42`.
    IntLiteral,

    /// Literal de punto flotante, como `4.2`.
    DoubleLiteral,

    /// `=`
    Assign,

    /// `==`
    Equal,

    /// `!=`
    NotEqual,

    /// `<`
    Less,

    /// `<=`
    LessOrEqual,

    /// `>`
    Greater,

    /// `>=`
    GreaterOrEqual,

    /// `+`
    Plus,

    /// `-`
    Minus,

    /// `*`
    Times,

    /// `/`
    Divide,

    /// `++`
    Increment,

    /// `--`
    Decrement,

    /// `;`
    Semicolon,

    /// `(`
    OpenParen,

    /// `)`
    CloseParen,

    /// `{`
    OpenCurly,

    /// `}`
    CloseCurly,
}

impl Display for TokenKind {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        use TokenKind::*;

        let string = match self {
            Id => "identifier",
            Keyword(keyword) => return write!(fmt, "keyword `{}`", keyword),
            IntLiteral => "integer literal",
            DoubleLiteral => "double literal",
            Assign => "`=`",
            Equal => "`==`",
            NotEqual => "`!=`",
            Less => "`<`",
            LessOrEqual => "`<=`",
            Greater => "`>`",
            GreaterOrEqual => "`>=`",
            Plus => "`+`",
            Minus => "`-`",
            Times => "`*`",
            Divide => "`/`",
            Increment => "`++`",
            Decrement => "`--`",
            Semicolon => "`;`",
            OpenParen => "`(`",
            CloseParen => "`)`",
            OpenCurly => "`{`",
            CloseCurly => "`}`",
        };

        fmt.write_str(string)
    }
}

/// Una palabra clave.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Keyword {
    If,
    Else,
    While,
    For,
    Int,
    Double,
}

const KEYWORDS: &[(&str, Keyword)] = &[
    ("if",     Keyword::If),
    ("else",   Keyword::Else),
    ("while",  Keyword::While),
    ("for",    Keyword::For),
    ("int",    Keyword::Int),
    ("double", Keyword::Double),
];

impl Keyword {
    fn lookup(word: &str) -> Option<Keyword> {
        KEYWORDS
            .iter()
            .find(|&&(name, _)| name == word)
            .map(|&(_, keyword)| keyword)
    }
}

impl Display for Keyword {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Keyword::*;
        let string = match self {
            If => "if",
            Else => "else",
            While => "while",
            For => "for",
            Int => "int",
            Double => "double",
        };

        fmt.write_str(string)
    }
}

/// Escanea un archivo fuente completo.
pub fn tokenize(source: &Rc<Source>) -> Result<Vec<Located<Token>>, Vec<Located<LexerError>>> {
    Lexer::new(source, source.text().chars()).try_exhaustive()
}

/// Máquina de estados para análisis léxico.
///
/// La salida del lexer, así como su siguiente estado, se define
/// a partir de tanto su estado actual como el siguiente carácter
/// encontrado en el flujo de entrada.
pub struct Lexer<S: Iterator<Item = char>> {
    source: Rc<Source>,
    chars: Peekable<S>,
    state: State,
    lexeme: String,
    start: Position,
    next: Position,
    last: Position,
}

/// Posibles estados del lexer.
enum State {
    /// Estado que ocurre antes de encontrar el inicio de un token.
    Start,

    /// Estado de error, se descarta hasta el final de la línea.
    Error,

    /// Estado de completitud; emite el token sin consumir más entrada.
    Complete(TokenKind),

    /// Se encontró `/`. Puede ser una división o el inicio de `//`.
    Slash,

    /// Comentario de línea.
    Comment,

    /// Se encontró un carácter que podría extenderse a un operador de
    /// dos caracteres: `=`, `!`, `<`, `>`, `+` o `-`.
    Operator(char),

    /// Dígitos enteros.
    Integer,

    /// Parte fraccionaria; indica si ya se vio algún dígito tras el punto.
    Fraction(bool),

    /// Término que puede ser un identificador o una palabra clave.
    Word,
}

impl<S: Iterator<Item = char>> Lexer<S> {
    /// Crea un lexer en estado inicial a partir de un flujo.
    pub fn new(source: &Rc<Source>, chars: S) -> Self {
        Lexer {
            source: Rc::clone(source),
            chars: chars.peekable(),
            state: State::Start,
            lexeme: String::new(),
            start: Position::default(),
            next: Position::default(),
            last: Position::default(),
        }
    }

    /// Reduce la entrada a sea una secuencia de tokens o una secuencia de errores.
    ///
    /// En caso de que ocurra al menos un error, el lexer dejará de
    /// acumular tokens y continuará únicamente para recolectar errores.
    pub fn try_exhaustive(mut self) -> Result<Vec<Located<Token>>, Vec<Located<LexerError>>> {
        let mut tokens = Vec::new();

        while let Some(result) = self.next() {
            match result {
                Ok(token) => tokens.push(token),
                Err(error) => {
                    let mut errors = vec![error];
                    errors.extend(self.filter_map(Result::err));

                    return Err(errors);
                }
            }
        }

        Ok(tokens)
    }

    /// Intenta construir un siguiente token.
    fn lex(&mut self) -> Result<Option<TokenKind>, LexerError> {
        use {State::*, TokenKind::*};

        loop {
            let next_char = self.chars.peek().copied();

            // Fuera de un token no se acumula lexema
            if let Start = self.state {
                self.start = self.next;
                self.lexeme.clear();
            }

            match (&mut self.state, next_char) {
                // Se descarta la línea donde ocurrió el error
                (Error, None) => return Ok(None),
                (Error, Some('\n')) => self.state = Start,
                (Error, Some(_)) => (),

                (Start, None) => return Ok(None),
                (Start, Some(';')) => self.state = Complete(Semicolon),
                (Start, Some('(')) => self.state = Complete(OpenParen),
                (Start, Some(')')) => self.state = Complete(CloseParen),
                (Start, Some('{')) => self.state = Complete(OpenCurly),
                (Start, Some('}')) => self.state = Complete(CloseCurly),
                (Start, Some('*')) => self.state = Complete(Times),
                (Start, Some('/')) => self.state = Slash,
                (Start, Some(c @ ('=' | '!' | '<' | '>' | '+' | '-'))) => self.state = Operator(c),
                (Start, Some(c)) if c.is_ascii_alphabetic() => self.state = Word,
                (Start, Some(c)) if c.is_ascii_digit() => self.state = Integer,
                (Start, Some(c)) if c.is_ascii_whitespace() => (),
                (Start, Some(c)) => {
                    self.consume();
                    return Err(LexerError::BadChar(c));
                }

                (Complete(kind), _) => return Ok(Some(*kind)),

                (Slash, Some('/')) => self.state = Comment,
                (Slash, _) => return Ok(Some(Divide)),

                (Comment, None) => self.state = Start,
                (Comment, Some('\n')) => self.state = Start,
                (Comment, Some(_)) => (),

                (Operator('='), Some('=')) => self.state = Complete(Equal),
                (Operator('!'), Some('=')) => self.state = Complete(NotEqual),
                (Operator('<'), Some('=')) => self.state = Complete(LessOrEqual),
                (Operator('>'), Some('=')) => self.state = Complete(GreaterOrEqual),
                (Operator('+'), Some('+')) => self.state = Complete(Increment),
                (Operator('-'), Some('-')) => self.state = Complete(Decrement),
                (Operator(c), _) => {
                    return match *c {
                        '=' => Ok(Some(Assign)),
                        '<' => Ok(Some(Less)),
                        '>' => Ok(Some(Greater)),
                        '+' => Ok(Some(Plus)),
                        '-' => Ok(Some(Minus)),
                        _ => Err(LexerError::Expected('=')),
                    };
                }

                (Integer, Some(c)) if c.is_ascii_digit() => (),
                (Integer, Some('.')) => self.state = Fraction(false),
                (Integer, _) => return Ok(Some(IntLiteral)),

                (Fraction(digits), Some(c)) if c.is_ascii_digit() => *digits = true,
                (Fraction(true), _) => return Ok(Some(DoubleLiteral)),
                (Fraction(false), _) => return Err(LexerError::MalformedDouble),

                (Word, Some(c)) if is_word_char(c) => (),
                (Word, _) => {
                    let kind = self::Keyword::lookup(&self.lexeme).map_or(Id, TokenKind::Keyword);
                    return Ok(Some(kind));
                }
            }

            self.consume();
        }
    }

    /// Consume el carácter observado con lookahead.
    fn consume(&mut self) {
        if let Some(c) = self.chars.next() {
            self.lexeme.push(c);
            self.last = self.next;
            self.next = self.next.after(c);
        }
    }
}

impl<S: Iterator<Item = char>> Iterator for Lexer<S> {
    type Item = Result<Located<Token>, Located<LexerError>>;

    fn next(&mut self) -> Option<Self::Item> {
        let result = self.lex();
        let location = Location::new(&self.source, self.start, self.last);

        match result {
            Ok(None) => None,
            Ok(Some(kind)) => {
                self.state = State::Start;

                let token = Token::new(kind, std::mem::take(&mut self.lexeme));
                Some(Ok(Located::at(token, location)))
            }

            Err(error) => {
                self.state = State::Error;
                Some(Err(Located::at(error, location)))
            }
        }
    }
}

/// Determina si un carácter puede pertenecer a un término.
fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(text: &str) -> Vec<(TokenKind, String)> {
        let source = Source::new("<test>", text);
        tokenize(&source)
            .expect("lexing failed")
            .into_iter()
            .map(|token| {
                let token = token.into_inner();
                (token.kind(), token.lexeme().to_owned())
            })
            .collect()
    }

    #[test]
    fn declaration_and_increment() {
        use TokenKind::*;

        let tokens = kinds("int x = 5; x++;");
        let expected = [
            (Keyword(self::Keyword::Int), "int"),
            (Id, "x"),
            (Assign, "="),
            (IntLiteral, "5"),
            (Semicolon, ";"),
            (Id, "x"),
            (Increment, "++"),
            (Semicolon, ";"),
        ];

        let expected: Vec<_> = expected
            .iter()
            .map(|&(kind, lexeme)| (kind, lexeme.to_owned()))
            .collect();

        assert_eq!(tokens, expected);
    }

    #[test]
    fn two_character_operators() {
        use TokenKind::*;

        let tokens: Vec<_> = kinds("== != <= >= < > = -- - + / *")
            .into_iter()
            .map(|(kind, _)| kind)
            .collect();

        assert_eq!(
            tokens,
            [
                Equal,
                NotEqual,
                LessOrEqual,
                GreaterOrEqual,
                Less,
                Greater,
                Assign,
                Decrement,
                Minus,
                Plus,
                Divide,
                Times
            ]
        );
    }

    #[test]
    fn literals_keep_their_text() {
        let tokens = kinds("1 1.0 10.25");
        assert_eq!(tokens[0], (TokenKind::IntLiteral, "1".to_owned()));
        assert_eq!(tokens[1], (TokenKind::DoubleLiteral, "1.0".to_owned()));
        assert_eq!(tokens[2], (TokenKind::DoubleLiteral, "10.25".to_owned()));
    }

    #[test]
    fn comments_and_keywords() {
        let tokens = kinds("while // if for\nwhile_1 doubles");
        assert_eq!(tokens.len(), 3);
        assert_eq!(tokens[0].0, TokenKind::Keyword(Keyword::While));
        assert_eq!(tokens[1], (TokenKind::Id, "while_1".to_owned()));
        assert_eq!(tokens[2], (TokenKind::Id, "doubles".to_owned()));
    }

    #[test]
    fn token_locations() {
        let source = Source::new("<test>", "x\n  yy");
        let tokens = tokenize(&source).unwrap();

        let location = tokens[1].location();
        assert_eq!((location.start().line(), location.start().column()), (2, 3));
        assert_eq!((location.end().line(), location.end().column()), (2, 4));
    }

    #[test]
    fn errors_are_collected_per_line() {
        let source = Source::new("<test>", "x = $;\ny = 1.;\nz ! 3;");
        let errors = tokenize(&source).unwrap_err();

        assert_eq!(errors.len(), 3);
        assert!(matches!(errors[0].val(), LexerError::BadChar('$')));
        assert!(matches!(errors[1].val(), LexerError::MalformedDouble));
        assert!(matches!(errors[2].val(), LexerError::Expected('=')));
    }
}
