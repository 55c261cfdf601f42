//! Whole-index properties exercised under randomized workloads: arrival
//! order independence, agreement with a naive join, monotonic emission,
//! and the index's structural invariants under interleaved operations.

use oxrdf::{NamedNode, Triple};
use rand::seq::SliceRandom;
use rand::rngs::StdRng;
use rand::SeedableRng;
use sesamestream::{BindingSet, ManualClock, QueryEngine};
use std::sync::{Arc, Mutex};

fn iri(suffix: &str) -> NamedNode {
    NamedNode::new(format!("http://example.org/{suffix}")).unwrap()
}

fn triple(s: &str, p: &str, o: &str) -> Triple {
    Triple::new(iri(s), iri(p), iri(o))
}

fn collector() -> (
    Arc<Mutex<Vec<BindingSet>>>,
    impl Fn(&BindingSet) + Send + Sync + 'static,
) {
    let collected = Arc::new(Mutex::new(Vec::new()));
    let sink = collected.clone();
    (collected, move |solution: &BindingSet| {
        sink.lock().unwrap().push(solution.clone())
    })
}

const CHAIN_QUERY: &str = r#"
    PREFIX ex: <http://example.org/>
    SELECT ?a ?b ?c
    WHERE {
        ?a ex:knows ?b .
        ?b ex:knows ?c .
        ?c ex:likes ?a .
    }
"#;

fn chain_workload() -> Vec<Triple> {
    let people = ["p0", "p1", "p2", "p3"];
    let mut triples = Vec::new();
    for (i, a) in people.iter().enumerate() {
        triples.push(triple(a, "knows", people[(i + 1) % people.len()]));
        triples.push(triple(a, "likes", people[(i + 2) % people.len()]));
        triples.push(triple(a, "likes", people[(i + 3) % people.len()]));
    }
    triples
}

fn solution_multiset(solutions: &[BindingSet]) -> Vec<String> {
    let mut rendered: Vec<String> = solutions.iter().map(|s| s.to_string()).collect();
    rendered.sort();
    rendered
}

#[test]
fn solutions_are_independent_of_arrival_order() {
    let mut reference: Option<Vec<String>> = None;
    let mut rng = StdRng::seed_from_u64(42);

    for _ in 0..8 {
        let mut triples = chain_workload();
        triples.shuffle(&mut rng);

        let engine = QueryEngine::new();
        let (collected, handler) = collector();
        engine.add_query(0, CHAIN_QUERY, handler).unwrap();
        engine.add_statements(0, triples);
        engine.check_invariants().unwrap();

        let multiset = solution_multiset(&collected.lock().unwrap());
        assert!(!multiset.is_empty(), "workload should produce solutions");
        match &reference {
            None => reference = Some(multiset),
            Some(reference) => assert_eq!(reference, &multiset),
        }
    }
}

#[test]
fn join_agrees_with_naive_evaluation() {
    let query = r#"
        PREFIX ex: <http://example.org/>
        SELECT ?x ?y ?z
        WHERE {
            ?x ex:knows ?y .
            ?y ex:worksAt ?z .
        }
    "#;

    let knows = [("a", "b"), ("a", "c"), ("b", "c"), ("d", "a")];
    let works_at = [("b", "w1"), ("c", "w1"), ("c", "w2"), ("e", "w3")];

    // every (x knows y) joined with every (y worksAt z)
    let mut expected = Vec::new();
    for (x, y) in knows {
        for (y2, z) in works_at {
            if y == y2 {
                expected.push(format!(
                    "x:{}, y:{}, z:{}",
                    iri(x), iri(y), iri(z)
                ));
            }
        }
    }
    expected.sort();

    let engine = QueryEngine::new();
    let (collected, handler) = collector();
    engine.add_query(0, query, handler).unwrap();

    for (x, y) in knows {
        engine.add_statement(0, triple(x, "knows", y));
    }
    for (y, z) in works_at {
        engine.add_statement(0, triple(y, "worksAt", z));
    }

    assert_eq!(solution_multiset(&collected.lock().unwrap()), expected);
    engine.check_invariants().unwrap();
}

#[test]
fn new_statements_only_add_solutions() {
    let engine = QueryEngine::new();
    let (collected, handler) = collector();
    engine.add_query(0, CHAIN_QUERY, handler).unwrap();

    let mut emitted_so_far: Vec<BindingSet> = Vec::new();
    for statement in chain_workload() {
        engine.add_statement(0, statement);

        let solutions = collected.lock().unwrap();
        assert!(solutions.len() >= emitted_so_far.len());
        assert_eq!(&solutions[..emitted_so_far.len()], &emitted_so_far[..]);
        emitted_so_far = solutions.clone();
    }
}

#[test]
fn index_invariants_hold_under_interleaved_operations() {
    let mut rng = StdRng::seed_from_u64(7);
    let clock = Arc::new(ManualClock::new(0));

    let engine = QueryEngine::new();
    engine.set_clock(clock.clone());

    let queries = [
        CHAIN_QUERY,
        "PREFIX ex: <http://example.org/> SELECT ?s WHERE { ?s ex:knows ex:p1 }",
        "PREFIX ex: <http://example.org/> SELECT ?s ?o WHERE { ?s ex:likes ?o }",
    ];

    let mut subscriptions = Vec::new();
    let mut triples = chain_workload();
    triples.shuffle(&mut rng);

    for (round, statement) in triples.into_iter().enumerate() {
        clock.advance(500);

        if round % 3 == 0 {
            let query = queries[(round / 3) % queries.len()];
            // alternate finite and infinite query TTLs
            let ttl = if round % 2 == 0 { 4 } else { 0 };
            subscriptions.push(engine.add_query(ttl, query, |_| {}).unwrap());
        }

        let statement_ttl = if round % 2 == 0 { 2 } else { 0 };
        engine.add_statement(statement_ttl, statement);
        engine.check_invariants().unwrap();

        if round % 4 == 3 {
            engine.cleanup_now();
            engine.check_invariants().unwrap();
        }
        if round % 5 == 4 {
            if let Some(subscription) = subscriptions.pop() {
                subscription.cancel();
                engine.check_invariants().unwrap();
            }
        }
    }

    // a reap far in the future still leaves a coherent index; anything
    // with a finite TTL is gone by now
    clock.advance(3_600_000);
    engine.cleanup_now();
    engine.check_invariants().unwrap();
}
