use super::*;
use crate::symtab::{TypeNameOracle, TypeNames};

struct NoTypes;
impl TypeNameOracle for NoTypes {
    fn is_type_name(&self, _: &str) -> bool {
        false
    }
}

fn lex_all(input: &str) -> Vec<TokenKind> {
    let mut lexer = Lexer::new(input);
    let mut kinds = Vec::new();
    loop {
        let token = lexer.lex(&NoTypes).expect("lexing should succeed");
        if token.kind == TokenKind::Eof {
            return kinds;
        }
        kinds.push(token.kind);
    }
}

#[test]
fn test_basic_module() {
    let kinds = lex_all("module a;\nint x;");
    let expected = vec![
        TokenKind::Module,
        TokenKind::Id(String::from("a")),
        TokenKind::Semicolon,
        TokenKind::Int,
        TokenKind::Id(String::from("x")),
        TokenKind::Semicolon,
    ];
    assert_eq!(expected, kinds);
}

#[test]
fn test_bad_atsign() {
    let mut lexer = Lexer::new("int x @ 3;");
    lexer.lex(&NoTypes).unwrap();
    lexer.lex(&NoTypes).unwrap();
    let err = lexer.lex(&NoTypes).unwrap_err();
    assert_eq!(LexErrorKind::UnexpectedChar('@'), err.kind);
    assert_eq!(7, err.loc.column);
}

#[test]
fn test_shift_operators() {
    let kinds = lex_all("a << b >> c >>> d <=> e");
    let expected = vec![
        TokenKind::Id(String::from("a")),
        TokenKind::LShift,
        TokenKind::Id(String::from("b")),
        TokenKind::LRShift,
        TokenKind::Id(String::from("c")),
        TokenKind::ARShift,
        TokenKind::Id(String::from("d")),
        TokenKind::Spaceship,
        TokenKind::Id(String::from("e")),
    ];
    assert_eq!(expected, kinds);
}

#[test]
fn test_compound_assignments() {
    let kinds = lex_all("x >>>= 1; x &&= y; x ||= y;");
    let expected = vec![
        TokenKind::Id(String::from("x")),
        TokenKind::ARShiftAssign,
        TokenKind::IntLit(1),
        TokenKind::Semicolon,
        TokenKind::Id(String::from("x")),
        TokenKind::LAndAssign,
        TokenKind::Id(String::from("y")),
        TokenKind::Semicolon,
        TokenKind::Id(String::from("x")),
        TokenKind::LOrAssign,
        TokenKind::Id(String::from("y")),
        TokenKind::Semicolon,
    ];
    assert_eq!(expected, kinds);
}

#[test]
fn test_integer_radixes() {
    let kinds = lex_all("10 0x1F 017 0b101 0");
    let expected = vec![
        TokenKind::IntLit(10),
        TokenKind::IntLit(0x1F),
        TokenKind::IntLit(0o17),
        TokenKind::IntLit(0b101),
        TokenKind::IntLit(0),
    ];
    assert_eq!(expected, kinds);
}

#[test]
fn test_signed_literal_after_operator() {
    // `= -5` folds the sign into the literal; `x - 5` keeps a minus token
    let kinds = lex_all("x = -5; y = x - 5;");
    let expected = vec![
        TokenKind::Id(String::from("x")),
        TokenKind::Assign,
        TokenKind::IntLit(-5),
        TokenKind::Semicolon,
        TokenKind::Id(String::from("y")),
        TokenKind::Assign,
        TokenKind::Id(String::from("x")),
        TokenKind::Minus,
        TokenKind::IntLit(5),
        TokenKind::Semicolon,
    ];
    assert_eq!(expected, kinds);
}

#[test]
fn test_float_literal() {
    let kinds = lex_all("3.25 0.5");
    let expected = vec![TokenKind::FloatLit(3.25), TokenKind::FloatLit(0.5)];
    assert_eq!(expected, kinds);
}

#[test]
fn test_string_escapes() {
    let kinds = lex_all(r#""a\n\x41\0""#);
    let expected = vec![TokenKind::StringLit(vec![b'a', b'\n', 0x41, 0])];
    assert_eq!(expected, kinds);
}

#[test]
fn test_wide_string_and_char() {
    let kinds = lex_all(r#""wide\u00012345"w 'q' 'z'w"#);
    let expected = vec![
        TokenKind::WStringLit(vec![
            u32::from(b'w'),
            u32::from(b'i'),
            u32::from(b'd'),
            u32::from(b'e'),
            0x0001_2345,
        ]),
        TokenKind::CharLit(b'q'),
        TokenKind::WCharLit(u32::from(b'z')),
    ];
    assert_eq!(expected, kinds);
}

#[test]
fn test_unterminated_string() {
    let mut lexer = Lexer::new("\"abc");
    let err = lexer.lex(&NoTypes).unwrap_err();
    assert_eq!(LexErrorKind::UnterminatedString, err.kind);
}

#[test]
fn test_comments_skipped() {
    let kinds = lex_all("a // line\n/* block\nstill */ b");
    let expected = vec![
        TokenKind::Id(String::from("a")),
        TokenKind::Id(String::from("b")),
    ];
    assert_eq!(expected, kinds);
}

#[test]
fn test_scoped_identifier() {
    let kinds = lex_all("foo::bar::baz x");
    let expected = vec![
        TokenKind::ScopedId(String::from("foo::bar::baz")),
        TokenKind::Id(String::from("x")),
    ];
    assert_eq!(expected, kinds);
}

#[test]
fn test_type_classification() {
    let mut types = TypeNames::new();
    types.insert("Point");
    types.insert("geo::Point");

    let mut lexer = Lexer::new("Point geo::Point other");
    assert_eq!(
        TokenKind::TypeId(String::from("Point")),
        lexer.lex(&types).unwrap().kind
    );
    assert_eq!(
        TokenKind::ScopedTypeId(String::from("geo::Point")),
        lexer.lex(&types).unwrap().kind
    );
    assert_eq!(
        TokenKind::Id(String::from("other")),
        lexer.lex(&types).unwrap().kind
    );
}

#[test]
fn test_unlex_roundtrip() {
    let mut lexer = Lexer::new("while (x)");
    let first = lexer.lex(&NoTypes).unwrap();
    lexer.unlex(first.clone());
    let again = lexer.lex(&NoTypes).unwrap();
    assert_eq!(first, again);
    assert_eq!(TokenKind::LParen, lexer.lex(&NoTypes).unwrap().kind);
}

#[test]
fn test_positions_are_one_based() {
    let mut lexer = Lexer::new("int\n  x;");
    let int = lexer.lex(&NoTypes).unwrap();
    assert_eq!((1, 1), (int.loc.line, int.loc.column));
    let x = lexer.lex(&NoTypes).unwrap();
    assert_eq!((2, 3), (x.loc.line, x.loc.column));
}
