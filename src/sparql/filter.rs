use crate::core::Bindings;
use oxrdf::vocab::xsd;
use oxrdf::{Literal, NamedNodeRef, Term};
use spargebra::algebra::Expression;
use std::cmp::Ordering;
use thiserror::Error;

/// A filter could not be evaluated against a candidate solution. The
/// engine treats this as rejection: the candidate is dropped and the
/// error logged.
#[derive(Error, Debug)]
pub enum FilterError {
    #[error("variable ?{0} is not bound")]
    UnboundVariable(String),

    #[error("{0} is not supported in filter expressions")]
    Unsupported(&'static str),

    #[error("cannot order {0} against {1}")]
    Incomparable(String, String),

    #[error("{0} has no effective boolean value")]
    NotABoolean(String),
}

const NUMERIC_DATATYPES: [NamedNodeRef<'static>; 13] = [
    xsd::INTEGER,
    xsd::DECIMAL,
    xsd::DOUBLE,
    xsd::FLOAT,
    xsd::LONG,
    xsd::INT,
    xsd::SHORT,
    xsd::BYTE,
    xsd::NON_NEGATIVE_INTEGER,
    xsd::NON_POSITIVE_INTEGER,
    xsd::NEGATIVE_INTEGER,
    xsd::POSITIVE_INTEGER,
    xsd::UNSIGNED_LONG,
];

/// Evaluates the supported subset of SPARQL filter expressions against
/// the pre-projection bindings of a candidate solution: boolean
/// connectives, BOUND, sameTerm, IN, and equality/ordering comparisons
/// with numeric promotion across the XSD numeric datatypes.
pub struct FilterEvaluator;

impl FilterEvaluator {
    /// The filter's effective boolean value under `bindings`
    pub fn apply(expr: &Expression, bindings: &Bindings<Term>) -> Result<bool, FilterError> {
        Self::boolean(expr, bindings)
    }

    fn boolean(expr: &Expression, b: &Bindings<Term>) -> Result<bool, FilterError> {
        match expr {
            // SPARQL's ternary logic: one errored operand is forgiven
            // when the other side decides the outcome.
            Expression::Or(left, right) => match Self::boolean(left, b) {
                Ok(true) => Ok(true),
                Ok(false) => Self::boolean(right, b),
                Err(e) => match Self::boolean(right, b) {
                    Ok(true) => Ok(true),
                    _ => Err(e),
                },
            },
            Expression::And(left, right) => match Self::boolean(left, b) {
                Ok(false) => Ok(false),
                Ok(true) => Self::boolean(right, b),
                Err(e) => match Self::boolean(right, b) {
                    Ok(false) => Ok(false),
                    _ => Err(e),
                },
            },
            Expression::Not(inner) => Self::boolean(inner, b).map(|v| !v),
            Expression::Bound(v) => Ok(b.get(v.as_str()).is_some()),
            Expression::Equal(left, right) => {
                Self::equals(&Self::term(left, b)?, &Self::term(right, b)?)
            }
            Expression::SameTerm(left, right) => {
                Ok(Self::term(left, b)? == Self::term(right, b)?)
            }
            Expression::Greater(left, right) => {
                Self::compare(left, right, b).map(|o| o == Ordering::Greater)
            }
            Expression::GreaterOrEqual(left, right) => {
                Self::compare(left, right, b).map(|o| o != Ordering::Less)
            }
            Expression::Less(left, right) => {
                Self::compare(left, right, b).map(|o| o == Ordering::Less)
            }
            Expression::LessOrEqual(left, right) => {
                Self::compare(left, right, b).map(|o| o != Ordering::Greater)
            }
            Expression::In(needle, haystack) => {
                let needle = Self::term(needle, b)?;
                for candidate in haystack {
                    if Self::equals(&needle, &Self::term(candidate, b)?)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Expression::Exists(_) => Err(FilterError::Unsupported("EXISTS")),
            other => Self::effective_boolean(&Self::term(other, b)?),
        }
    }

    fn term(expr: &Expression, b: &Bindings<Term>) -> Result<Term, FilterError> {
        match expr {
            Expression::NamedNode(n) => Ok(n.clone().into()),
            Expression::Literal(l) => Ok(l.clone().into()),
            Expression::Variable(v) => b
                .get(v.as_str())
                .cloned()
                .ok_or_else(|| FilterError::UnboundVariable(v.as_str().to_string())),
            Expression::FunctionCall(..) => Err(FilterError::Unsupported("function calls")),
            Expression::Add(..)
            | Expression::Subtract(..)
            | Expression::Multiply(..)
            | Expression::Divide(..)
            | Expression::UnaryPlus(..)
            | Expression::UnaryMinus(..) => Err(FilterError::Unsupported("arithmetic")),
            Expression::If(..) => Err(FilterError::Unsupported("IF")),
            Expression::Coalesce(..) => Err(FilterError::Unsupported("COALESCE")),
            boolean => Ok(Literal::from(Self::boolean(boolean, b)?).into()),
        }
    }

    fn equals(left: &Term, right: &Term) -> Result<bool, FilterError> {
        if let (Some(l), Some(r)) = (Self::numeric(left), Self::numeric(right)) {
            return Ok(l == r);
        }
        Ok(left == right)
    }

    fn compare(
        left: &Expression,
        right: &Expression,
        b: &Bindings<Term>,
    ) -> Result<Ordering, FilterError> {
        let left = Self::term(left, b)?;
        let right = Self::term(right, b)?;

        if let (Some(l), Some(r)) = (Self::numeric(&left), Self::numeric(&right)) {
            return l
                .partial_cmp(&r)
                .ok_or_else(|| FilterError::Incomparable(left.to_string(), right.to_string()));
        }

        if let (Term::Literal(l), Term::Literal(r)) = (&left, &right) {
            if l.datatype() == xsd::STRING && r.datatype() == xsd::STRING {
                return Ok(l.value().cmp(r.value()));
            }
            if l.datatype() == xsd::BOOLEAN && r.datatype() == xsd::BOOLEAN {
                if let (Ok(lv), Ok(rv)) = (l.value().parse::<bool>(), r.value().parse::<bool>()) {
                    return Ok(lv.cmp(&rv));
                }
            }
        }

        Err(FilterError::Incomparable(
            left.to_string(),
            right.to_string(),
        ))
    }

    fn numeric(term: &Term) -> Option<f64> {
        match term {
            Term::Literal(l) if is_numeric(l.datatype()) => l.value().parse().ok(),
            _ => None,
        }
    }

    fn effective_boolean(term: &Term) -> Result<bool, FilterError> {
        match term {
            Term::Literal(l) if l.datatype() == xsd::BOOLEAN => match l.value() {
                "true" | "1" => Ok(true),
                "false" | "0" => Ok(false),
                other => Err(FilterError::NotABoolean(other.to_string())),
            },
            Term::Literal(l) if is_numeric(l.datatype()) => {
                Ok(l.value().parse::<f64>().map(|v| v != 0.0).unwrap_or(false))
            }
            Term::Literal(l) if l.datatype() == xsd::STRING => Ok(!l.value().is_empty()),
            other => Err(FilterError::NotABoolean(other.to_string())),
        }
    }
}

fn is_numeric(datatype: NamedNodeRef<'_>) -> bool {
    NUMERIC_DATATYPES.iter().any(|numeric| *numeric == datatype)
}
