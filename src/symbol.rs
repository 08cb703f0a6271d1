/// Well-known symbol names. Symbols are not interned: every symbol cell owns
/// its text and two symbols are equal when their text is.
pub mod sym {
    pub const QUOTE: &str = "quote";
    pub const SETB: &str = "set!";
    pub const DEFINE: &str = "define";
    pub const LAMBDA: &str = "lambda";
    pub const IF: &str = "if";
    pub const BEGIN: &str = "begin";
    pub const COND: &str = "cond";
    pub const ELSE: &str = "else";
    pub const TRUE: &str = "true";
    pub const FALSE: &str = "false";
    pub const OK: &str = "ok";
    pub const PROCEDURE: &str = "procedure";
    pub const PRIMITIVE: &str = "primitive";
}

/// Syntactic forms with their own evaluation rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialForm {
    Quote,
    Set,
    Define,
    If,
    Lambda,
    Begin,
    Cond,
}

impl SpecialForm {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            sym::QUOTE => Some(SpecialForm::Quote),
            sym::SETB => Some(SpecialForm::Set),
            sym::DEFINE => Some(SpecialForm::Define),
            sym::IF => Some(SpecialForm::If),
            sym::LAMBDA => Some(SpecialForm::Lambda),
            sym::BEGIN => Some(SpecialForm::Begin),
            sym::COND => Some(SpecialForm::Cond),
            _ => None,
        }
    }
}
