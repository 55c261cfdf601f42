use crate::binding_set::BindingSet;
use crate::core::{Bindings, Pattern, Term as PatternTerm};
use crate::error::{StreamError, StreamResult};
use crate::sparql::modifier::SolutionSequenceModifier;
use crate::TUPLE_SIZE;
use oxrdf::Term;
use spargebra::algebra::{Expression, GraphPattern};
use spargebra::term::{NamedNodePattern, TermPattern, TriplePattern};
use std::collections::HashMap;

/// What one projected name resolves to when a solution is assembled
#[derive(Debug, Clone)]
enum Projected {
    /// Copy the (possibly differently named) variable's binding
    Variable { target: String, source: String },
    /// A constant bound by the query itself, added after filtering
    Constant { target: String, value: Term },
}

/// The evaluatable form of a SPARQL SELECT query: the triple patterns of
/// its basic graph pattern, its filters, its projection (with renames and
/// constant bindings), and its solution-sequence modifiers.
///
/// Translation accepts the conjunctive SELECT fragment and reports
/// everything else as [`StreamError::IncompatibleQuery`], naming the
/// offending algebra node.
#[derive(Debug, Clone)]
pub struct SparqlSelect {
    projected: Vec<Projected>,
    filters: Vec<Expression>,
    patterns: Vec<Pattern<Term, TUPLE_SIZE>>,
    modifier: SolutionSequenceModifier,
}

impl SparqlSelect {
    /// Parses SPARQL text and translates it. Parse failures are
    /// [`StreamError::InvalidQuery`].
    pub fn parse(text: &str) -> StreamResult<Self> {
        let query = spargebra::Query::parse(text, None)
            .map_err(|e| StreamError::InvalidQuery(e.to_string()))?;
        Self::new(query)
    }

    /// Translates a parsed query. Only the SELECT form is evaluatable.
    pub fn new(query: spargebra::Query) -> StreamResult<Self> {
        let pattern = match query {
            spargebra::Query::Select { pattern, .. } => pattern,
            spargebra::Query::Ask { .. } => {
                return Err(incompatible("the ASK query form is not supported"))
            }
            spargebra::Query::Construct { .. } => {
                return Err(incompatible("the CONSTRUCT query form is not supported"))
            }
            spargebra::Query::Describe { .. } => {
                return Err(incompatible("the DESCRIBE query form is not supported"))
            }
        };

        let mut select = SparqlSelect {
            projected: Vec::new(),
            filters: Vec::new(),
            patterns: Vec::new(),
            modifier: SolutionSequenceModifier::default(),
        };
        select.translate_root(pattern)?;

        if select.patterns.is_empty() {
            return Err(incompatible("query has no triple patterns"));
        }
        Ok(select)
    }

    /// Solution modifiers sit above the projection in the algebra tree
    fn translate_root(&mut self, node: GraphPattern) -> StreamResult<()> {
        match node {
            GraphPattern::Slice {
                inner,
                start,
                length,
            } => {
                self.modifier.set_offset(start as u64);
                if let Some(length) = length {
                    self.modifier.set_limit(length as u64);
                }
                self.translate_root(*inner)
            }
            GraphPattern::Distinct { inner } => {
                self.modifier.make_distinct();
                self.translate_root(*inner)
            }
            GraphPattern::Reduced { inner } => {
                self.modifier.make_reduced();
                self.translate_root(*inner)
            }
            GraphPattern::Project { inner, variables } => {
                self.translate_projection(*inner, variables)
            }
            other => Err(incompatible(format!(
                "expected a projection at the root of the query; found {}",
                node_name(&other)
            ))),
        }
    }

    /// Peels `Extend` nodes (projection renames and constant bindings)
    /// off the projection body, then records the projected names in
    /// SELECT order.
    fn translate_projection(
        &mut self,
        inner: GraphPattern,
        variables: Vec<spargebra::term::Variable>,
    ) -> StreamResult<()> {
        let mut renames: HashMap<String, String> = HashMap::new();
        let mut constants: HashMap<String, Term> = HashMap::new();

        let mut body = inner;
        while let GraphPattern::Extend {
            inner,
            variable,
            expression,
        } = body
        {
            let target = variable.as_str().to_string();
            match expression {
                Expression::Variable(source) => {
                    renames.insert(target, source.as_str().to_string());
                }
                Expression::Literal(value) => {
                    constants.insert(target, value.into());
                }
                Expression::NamedNode(value) => {
                    constants.insert(target, value.into());
                }
                other => {
                    return Err(incompatible(format!(
                        "only variables and constants may be bound in a projection; found {other:?}"
                    )))
                }
            }
            body = *inner;
        }

        for variable in variables {
            let target = variable.as_str().to_string();
            self.projected.push(match constants.remove(&target) {
                Some(value) => Projected::Constant { target, value },
                None => {
                    let source = renames.remove(&target).unwrap_or_else(|| target.clone());
                    Projected::Variable { target, source }
                }
            });
        }

        self.translate_body(body)
    }

    /// The conjunctive body: joins of basic graph patterns under filters
    fn translate_body(&mut self, node: GraphPattern) -> StreamResult<()> {
        match node {
            GraphPattern::Bgp { patterns } => {
                for triple in patterns {
                    let pattern = to_pattern(triple)?;
                    self.patterns.push(pattern);
                }
                Ok(())
            }
            GraphPattern::Join { left, right } => {
                self.translate_body(*left)?;
                self.translate_body(*right)
            }
            GraphPattern::Filter { expr, inner } => {
                reject_exists(&expr)?;
                self.filters.push(expr);
                self.translate_body(*inner)
            }
            other => Err(incompatible(format!(
                "{} is not supported",
                node_name(&other)
            ))),
        }
    }

    /// The triple patterns of the query's basic graph pattern
    pub fn patterns(&self) -> &[Pattern<Term, TUPLE_SIZE>] {
        &self.patterns
    }

    pub fn filters(&self) -> &[Expression] {
        &self.filters
    }

    /// A fresh sequence-modifier instance for a new subscription
    pub fn sequence_modifier(&self) -> &SolutionSequenceModifier {
        &self.modifier
    }

    /// Projects the accumulated bindings of a completed solution into the
    /// result delivered to the handler: selected variables only, renamed
    /// per the projection, with query constants added afterwards.
    /// Projected variables that ended up unbound are omitted.
    pub fn project(&self, bindings: &Bindings<Term>) -> BindingSet {
        let mut solution = BindingSet::new();
        for projected in &self.projected {
            match projected {
                Projected::Variable { target, source } => {
                    if let Some(value) = bindings.get(source) {
                        solution.push(target.clone(), value.clone());
                    }
                }
                Projected::Constant { target, value } => {
                    solution.push(target.clone(), value.clone());
                }
            }
        }
        solution
    }
}

fn incompatible(message: impl Into<String>) -> StreamError {
    StreamError::IncompatibleQuery(message.into())
}

/// EXISTS embeds a graph pattern inside an expression; it is rejected at
/// admission rather than failing every candidate at evaluation time.
fn reject_exists(expr: &Expression) -> StreamResult<()> {
    match expr {
        Expression::Exists(_) => Err(incompatible("EXISTS and NOT EXISTS are not supported")),
        Expression::Or(l, r)
        | Expression::And(l, r)
        | Expression::Equal(l, r)
        | Expression::SameTerm(l, r)
        | Expression::Greater(l, r)
        | Expression::GreaterOrEqual(l, r)
        | Expression::Less(l, r)
        | Expression::LessOrEqual(l, r)
        | Expression::Add(l, r)
        | Expression::Subtract(l, r)
        | Expression::Multiply(l, r)
        | Expression::Divide(l, r) => {
            reject_exists(l)?;
            reject_exists(r)
        }
        Expression::Not(e) | Expression::UnaryPlus(e) | Expression::UnaryMinus(e) => {
            reject_exists(e)
        }
        Expression::In(e, list) => {
            reject_exists(e)?;
            list.iter().try_for_each(reject_exists)
        }
        Expression::If(a, b, c) => {
            reject_exists(a)?;
            reject_exists(b)?;
            reject_exists(c)
        }
        Expression::Coalesce(list) => list.iter().try_for_each(reject_exists),
        Expression::FunctionCall(_, args) => args.iter().try_for_each(reject_exists),
        Expression::NamedNode(_)
        | Expression::Literal(_)
        | Expression::Variable(_)
        | Expression::Bound(_) => Ok(()),
    }
}

fn to_pattern(triple: TriplePattern) -> StreamResult<Pattern<Term, TUPLE_SIZE>> {
    let subject = term_pattern(triple.subject)?;
    let predicate = match triple.predicate {
        NamedNodePattern::NamedNode(n) => PatternTerm::Constant(n.into()),
        NamedNodePattern::Variable(v) => PatternTerm::Variable(v.as_str().to_string()),
    };
    let object = term_pattern(triple.object)?;
    Ok(Pattern::new([subject, predicate, object]))
}

fn term_pattern(term: TermPattern) -> StreamResult<PatternTerm<Term>> {
    match term {
        TermPattern::NamedNode(n) => Ok(PatternTerm::Constant(n.into())),
        TermPattern::Literal(l) => Ok(PatternTerm::Constant(l.into())),
        // blank nodes act as non-projected join variables
        TermPattern::BlankNode(b) => Ok(PatternTerm::Variable(format!("_:{}", b.as_str()))),
        TermPattern::Variable(v) => Ok(PatternTerm::Variable(v.as_str().to_string())),
        other => Err(incompatible(format!(
            "unsupported term in a triple pattern: {other:?}"
        ))),
    }
}

fn node_name(node: &GraphPattern) -> &'static str {
    match node {
        GraphPattern::Bgp { .. } => "a basic graph pattern",
        GraphPattern::Path { .. } => "a property path",
        GraphPattern::Join { .. } => "JOIN",
        GraphPattern::LeftJoin { .. } => "OPTIONAL",
        GraphPattern::Filter { .. } => "FILTER",
        GraphPattern::Union { .. } => "UNION",
        GraphPattern::Graph { .. } => "GRAPH",
        GraphPattern::Extend { .. } => "BIND",
        GraphPattern::Minus { .. } => "MINUS",
        GraphPattern::Values { .. } => "VALUES",
        GraphPattern::OrderBy { .. } => "the ORDER BY modifier",
        GraphPattern::Project { .. } => "a projection",
        GraphPattern::Distinct { .. } => "DISTINCT",
        GraphPattern::Reduced { .. } => "REDUCED",
        GraphPattern::Slice { .. } => "OFFSET/LIMIT",
        GraphPattern::Group { .. } => "GROUP BY",
        GraphPattern::Service { .. } => "SERVICE",
        _ => "an unsupported algebra node",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translates_patterns_projection_and_modifiers() {
        let select = SparqlSelect::parse(
            r#"
            PREFIX ex: <http://example.org/>
            SELECT DISTINCT ?x ?y
            WHERE {
                ?x ex:knows ?y .
                ?y ex:age ?a .
                FILTER(?a > 25)
            }
            LIMIT 10
            "#,
        )
        .unwrap();

        assert_eq!(select.patterns().len(), 2);
        assert_eq!(select.filters().len(), 1);

        let mut modifier = select.sequence_modifier().clone();
        let mut solution = BindingSet::new();
        solution.push(
            "x".to_string(),
            oxrdf::NamedNode::new("http://example.org/a").unwrap().into(),
        );
        assert!(modifier.try_solution(&solution));
        assert!(!modifier.try_solution(&solution));
    }

    #[test]
    fn projection_renames_and_constants() {
        let select = SparqlSelect::parse(
            r#"
            PREFIX ex: <http://example.org/>
            SELECT (?s AS ?who) ("yes" AS ?tag)
            WHERE { ?s ex:p ex:o }
            "#,
        )
        .unwrap();

        let bindings = Bindings::new().bind(
            "s".to_string(),
            oxrdf::NamedNode::new("http://example.org/a").unwrap().into(),
        );
        let solution = select.project(&bindings);
        assert!(solution.get("who").is_some());
        assert_eq!(
            solution.get("tag"),
            Some(&oxrdf::Literal::new_simple_literal("yes").into())
        );
        assert!(solution.get("s").is_none());
    }

    #[test]
    fn rejects_unsupported_features_by_name() {
        let union = SparqlSelect::parse(
            "SELECT ?s WHERE { { ?s <http://example.org/p> ?o } UNION { ?s <http://example.org/q> ?o } }",
        );
        assert!(matches!(union, Err(StreamError::IncompatibleQuery(m)) if m.contains("UNION")));

        let order = SparqlSelect::parse(
            "SELECT ?s WHERE { ?s <http://example.org/p> ?o } ORDER BY ?s",
        );
        assert!(matches!(order, Err(StreamError::IncompatibleQuery(m)) if m.contains("ORDER BY")));

        let exists = SparqlSelect::parse(
            "SELECT ?s WHERE { ?s <http://example.org/p> ?o . FILTER EXISTS { ?s <http://example.org/q> ?o } }",
        );
        assert!(matches!(exists, Err(StreamError::IncompatibleQuery(m)) if m.contains("EXISTS")));

        let ask = SparqlSelect::parse("ASK { ?s <http://example.org/p> ?o }");
        assert!(matches!(ask, Err(StreamError::IncompatibleQuery(m)) if m.contains("ASK")));

        let invalid = SparqlSelect::parse("this is not sparql");
        assert!(matches!(invalid, Err(StreamError::InvalidQuery(_))));
    }
}
