//! Integration tests for snapshot isolation and optimistic commit

mod common;

use common::Universe;
use std::sync::{Arc, Barrier};
use std::thread;
use tardis::{DatabaseConfig, ErrorKind, GraphDatabase, GraphError, GraphRead, PropertyValue, TxState};

#[test]
fn test_conflicting_writes_first_committer_wins() {
    let universe = Universe::new();
    let db = &universe.db;
    let rose = universe.companions["Rose Tyler"];

    let mut first = db.begin_transaction().unwrap();
    let mut second = db.begin_transaction().unwrap();
    first.set_property(rose, "status", "trapped in Pete's World").unwrap();
    second.set_property(rose, "status", "Bad Wolf").unwrap();

    first.mark_success();
    assert_eq!(first.finish().unwrap(), TxState::Committed);

    second.mark_success();
    let err = second.finish().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(matches!(err, GraphError::WriteConflict(_)));

    assert_eq!(
        db.get_property(rose, "status").unwrap(),
        PropertyValue::from("trapped in Pete's World")
    );
}

#[test]
fn test_disjoint_writes_both_commit() {
    let universe = Universe::new();
    let db = &universe.db;

    let mut first = db.begin_transaction().unwrap();
    let mut second = db.begin_transaction().unwrap();
    first.set_property(universe.companions["Amy Pond"], "age", 21).unwrap();
    second.set_property(universe.companions["Rory Williams"], "age", 22).unwrap();
    first.mark_success();
    second.mark_success();
    first.finish().unwrap();
    second.finish().unwrap();

    assert_eq!(db.get_property(universe.companions["Rory Williams"], "age").unwrap().as_integer(), Some(22));
}

#[test]
fn test_relationship_to_concurrently_deleted_node_is_rejected() {
    let universe = Universe::new();
    let db = &universe.db;
    let skarasen = universe.species["Skarasen"];

    let mut linking = db.begin_transaction().unwrap();
    linking
        .create_relationship(universe.companions["Amy Pond"], skarasen, "ENEMY_OF")
        .unwrap();

    db.with_transaction(|tx| tx.delete_node(skarasen)).unwrap();

    linking.mark_success();
    let err = linking.finish().unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::DanglingReference | ErrorKind::Conflict));
    assert!(!db.node_exists(skarasen).unwrap());
}

#[test]
fn test_snapshot_isolation() {
    let universe = Universe::new();
    let db = &universe.db;
    let doctor = universe.doctor;

    let snapshot = db.snapshot().unwrap();
    let reader = db.begin_transaction().unwrap();

    db.with_transaction(|tx| {
        tx.set_property(doctor, "regenerations", 12)?;
        let companion = tx.create_node()?;
        tx.set_property(companion, "character", "Clara Oswald")?;
        tx.create_relationship(companion, doctor, "COMPANION_OF")?;
        Ok(())
    })
    .unwrap();

    // Both older views still see the state before the commit
    assert!(!snapshot.has_property(doctor, "regenerations").unwrap());
    assert!(!reader.has_property(doctor, "regenerations").unwrap());
    let companions = snapshot
        .get_relationships(doctor, tardis::Direction::Incoming, &["COMPANION_OF".into()])
        .unwrap();
    assert_eq!(companions.len(), 5);

    assert_eq!(db.get_property(doctor, "regenerations").unwrap().as_integer(), Some(12));
    assert_eq!(
        db.get_relationships(doctor, tardis::Direction::Incoming, &["COMPANION_OF".into()])
            .unwrap()
            .len(),
        6
    );

    // Old versions survive a vacuum while the snapshot is alive
    db.vacuum().unwrap();
    assert!(!snapshot.has_property(doctor, "regenerations").unwrap());
}

#[test]
fn test_concurrent_increments_never_lose_updates() {
    common::init_tracing();
    let db = GraphDatabase::open_in_memory(DatabaseConfig::default());
    let counter = db
        .with_transaction(|tx| {
            let node = tx.create_node()?;
            tx.set_property(node, "count", 0)?;
            Ok(node)
        })
        .unwrap();

    let threads = 4;
    let per_thread = 25;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let db = db.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let mut conflicts = 0;
                let mut done = 0;
                while done < per_thread {
                    let result = db.with_transaction(|tx| {
                        let current = tx.get_property(counter, "count")?.as_integer().unwrap_or_default();
                        tx.set_property(counter, "count", current + 1)
                    });
                    match result {
                        Ok(_) => done += 1,
                        Err(e) if e.is_conflict() => conflicts += 1,
                        Err(e) => panic!("unexpected error: {}", e),
                    }
                }
                conflicts
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(
        db.get_property(counter, "count").unwrap().as_integer(),
        Some((threads * per_thread) as i64)
    );
}

#[test]
fn test_queries_run_alongside_writers() {
    let universe = Universe::new();
    let db = universe.db.clone();
    let doctor = universe.doctor;

    let writer = {
        let db = db.clone();
        thread::spawn(move || {
            for i in 0..20 {
                db.with_transaction(|tx| {
                    let companion = tx.create_node()?;
                    tx.set_property(companion, "character", format!("Companion {}", i))?;
                    tx.create_relationship(companion, doctor, "COMPANION_OF")?;
                    Ok(())
                })
                .unwrap();
            }
        })
    };

    let query = "start d=node:characters(character = 'Doctor') match (d)<-[:COMPANION_OF]-(c) return count(c)";
    let mut last = 0;
    for _ in 0..20 {
        let row = db.execute(query).unwrap().next().unwrap().unwrap();
        let count = row["count(c)"].as_integer().unwrap();
        assert!(count >= last, "counts only grow: {} after {}", count, last);
        assert!((5..=25).contains(&count));
        last = count;
    }
    writer.join().unwrap();

    let row = db.execute(query).unwrap().next().unwrap().unwrap();
    assert_eq!(row["count(c)"].as_integer(), Some(25));
}
