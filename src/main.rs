use oxrdf::{Literal, NamedNode, Triple};
use sesamestream::{EngineConfig, QueryEngine};

fn iri(suffix: &str) -> NamedNode {
    NamedNode::new(format!("http://example.org/{suffix}")).unwrap()
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let engine = QueryEngine::with_config(EngineConfig {
        performance_metrics: true,
        compact_log: true,
    });

    // Who knows someone 30 or older? Registered before any data exists.
    let query = r#"
        PREFIX ex: <http://example.org/>
        SELECT ?person ?friend
        WHERE {
            ?person ex:knows ?friend .
            ?friend ex:age ?age .
            FILTER(?age >= 30)
        }
    "#;

    let subscription = engine.add_query(0, query, |solution| {
        println!("answer: {solution}");
    })?;

    let people = [("alice", "bob", 34), ("bob", "carol", 28), ("carol", "alice", 41)];
    for (person, friend, age) in people {
        engine.add_statement(0, Triple::new(iri(person), iri("knows"), iri(friend)));
        engine.add_statement(
            0,
            Triple::new(
                iri(friend),
                iri("age"),
                Literal::new_typed_literal(age.to_string(), oxrdf::vocab::xsd::INTEGER),
            ),
        );
    }

    subscription.cancel();
    engine.shut_down();
    Ok(())
}
