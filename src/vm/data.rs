use std::fmt;

/// A tagged word decoded into something printable: the observable
/// form of a program result, used by the REPL and the tests.
/// Compound symbols pull their payloads out of the const-table or
/// heap; functions and closures stay opaque.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Data {
    Number(i32),
    Symbol(String),
    Compound(String, Vec<Data>),
    Str(String),
    Function,
    Closure,
}

impl fmt::Display for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Data::Number(n) => write!(f, "{}", n),
            Data::Symbol(name) => write!(f, ":{}", name),
            Data::Compound(name, payload) => {
                write!(f, ":{}", name)?;
                for value in payload {
                    match value {
                        Data::Compound(..) => write!(f, " ({})", value)?,
                        _ => write!(f, " {}", value)?,
                    }
                }
                Ok(())
            }
            Data::Str(text) => write!(f, "{:?}", text),
            Data::Function => write!(f, "<function>"),
            Data::Closure => write!(f, "<closure>"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn display_forms() {
        let compound = Data::Compound(
            "pair".to_string(),
            vec![
                Data::Number(1),
                Data::Compound("pair".to_string(), vec![Data::Number(2), Data::Number(3)]),
            ],
        );

        assert_eq!(format!("{}", compound), ":pair 1 (:pair 2 3)");
        assert_eq!(format!("{}", Data::Symbol("spot".to_string())), ":spot");
        assert_eq!(format!("{}", Data::Str("hi".to_string())), "\"hi\"");
    }
}
