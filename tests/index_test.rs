//! Integration tests for explicit and automatic indexes

mod common;

use common::Universe;
use tardis::{DatabaseConfig, ErrorKind, GraphError, GraphRead, NodeId};

fn species_names(universe: &Universe, ids: impl IntoIterator<Item = NodeId>) -> Vec<String> {
    let mut names: Vec<String> = ids
        .into_iter()
        .map(|id| {
            universe
                .db
                .get_property(id, "species")
                .unwrap()
                .as_string()
                .unwrap()
                .to_string()
        })
        .collect();
    names.sort();
    names
}

#[test]
fn test_exact_lookup() {
    let universe = Universe::new();
    let hits = universe.db.index_for_nodes("characters").get("character", "Doctor").unwrap();
    assert_eq!(hits.single().unwrap(), Some(universe.doctor));

    let none = universe.db.index_for_nodes("characters").get("character", "Davros").unwrap();
    assert!(none.is_empty());
    assert_eq!(none.single().unwrap(), None);

    // Unknown indexes have no hits
    assert!(universe.db.index_for_nodes("planets").get("planet", "Gallifrey").unwrap().is_empty());
}

#[test]
fn test_wildcard_query() {
    let universe = Universe::new();
    let index = universe.db.index_for_nodes("species");

    let hits = index.query("species", "S*n").unwrap();
    assert_eq!(species_names(&universe, hits), vec!["Silurian", "Skarasen", "Slitheen", "Sontaran"]);

    let hits = index.query_string("species:Dal?k").unwrap();
    assert_eq!(species_names(&universe, hits), vec!["Dalek"]);

    let hits = index.query("species", "*").unwrap();
    assert_eq!(hits.len(), 6);

    let err = index.query_string("no colon here").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::QuerySyntax);
}

#[test]
fn test_single_rejects_many_hits() {
    let universe = Universe::new();
    let hits = universe.db.index_for_nodes("species").query("species", "S*").unwrap();
    assert_eq!(hits.len(), 4);
    assert!(matches!(hits.single(), Err(GraphError::NotUnique(4))));
}

#[test]
fn test_deleting_an_entity_removes_its_entries() {
    let universe = Universe::new();
    let db = &universe.db;
    let dalek = universe.species["Dalek"];

    let mut tx = db.begin_transaction().unwrap();
    tx.detach_delete_node(dalek).unwrap();
    // Gone inside the transaction already
    assert!(tx.index_for_nodes("species").get("species", "Dalek").unwrap().is_empty());
    // Still there for everybody else
    assert!(db.index_for_nodes("species").get("species", "Dalek").unwrap().contains(dalek));
    tx.mark_success();
    tx.finish().unwrap();

    assert!(db.index_for_nodes("species").get("species", "Dalek").unwrap().is_empty());
    assert_eq!(db.index_for_nodes("species").query("species", "*").unwrap().len(), 5);
}

#[test]
fn test_index_updates_are_transactional() {
    let universe = Universe::new();
    let db = &universe.db;
    let rose = universe.companions["Rose Tyler"];

    let mut tx = db.begin_transaction().unwrap();
    let mut index = tx.index_for_nodes("characters");
    index.remove(rose, "character", "Rose Tyler").unwrap();
    index.add(rose, "character", "Bad Wolf").unwrap();
    assert_eq!(index.get("character", "Bad Wolf").unwrap().single().unwrap(), Some(rose));
    assert!(index.get("character", "Rose Tyler").unwrap().is_empty());
    drop(tx);

    // Rolled back
    let index = db.index_for_nodes("characters");
    assert_eq!(index.get("character", "Rose Tyler").unwrap().single().unwrap(), Some(rose));
    assert!(index.get("character", "Bad Wolf").unwrap().is_empty());

    db.with_transaction(|tx| {
        let mut index = tx.index_for_nodes("characters");
        index.remove_key(rose, "character")?;
        index.add(rose, "character", "Bad Wolf")
    })
    .unwrap();
    assert_eq!(index.get("character", "Bad Wolf").unwrap().single().unwrap(), Some(rose));
    assert!(index.get("character", "Rose Tyler").unwrap().is_empty());
}

#[test]
fn test_remove_entity_clears_every_key() {
    let universe = Universe::new();
    let db = &universe.db;
    let tennant = universe.actors["David Tennant"];

    db.with_transaction(|tx| {
        let mut index = tx.index_for_nodes("actors");
        index.add(tennant, "surname", "Tennant")?;
        index.remove_entity(tennant)
    })
    .unwrap();

    let index = db.index_for_nodes("actors");
    assert!(index.get("actor", "David Tennant").unwrap().is_empty());
    assert!(index.get("surname", "Tennant").unwrap().is_empty());
    assert!(index.get("actor", "Matt Smith").unwrap().contains(universe.actors["Matt Smith"]));
}

#[test]
fn test_adding_a_missing_entity_fails() {
    let universe = Universe::new();
    let mut tx = universe.db.begin_transaction().unwrap();
    let err = tx
        .index_for_nodes("characters")
        .add(NodeId::new(10_000), "character", "Nobody")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn test_relationship_index() {
    let universe = Universe::new();
    let db = &universe.db;
    let last = *universe.regenerations.last().unwrap();

    db.with_transaction(|tx| tx.index_for_relationships("regenerations").add(last, "year", 2010))
        .unwrap();
    let hits = db.index_for_relationships("regenerations").get("year", 2010).unwrap();
    assert_eq!(hits.single().unwrap(), Some(last));
    let hits = db.index_for_relationships("regenerations").query("year", "20*").unwrap();
    assert_eq!(hits.len(), 1);
}

#[test]
fn test_auto_index_follows_properties() {
    let universe = Universe::with_config(DatabaseConfig::default().with_node_auto_index(["character"]));
    let db = &universe.db;
    let auto = db.index_for_nodes(tardis::index::NODE_AUTO_INDEX);

    assert_eq!(auto.get("character", "Doctor").unwrap().single().unwrap(), Some(universe.doctor));
    assert_eq!(auto.query("character", "R*").unwrap().len(), 2);

    let rory = universe.companions["Rory Williams"];
    db.with_transaction(|tx| {
        tx.set_property(rory, "character", "The Last Centurion")?;
        Ok(())
    })
    .unwrap();
    assert!(auto.get("character", "Rory Williams").unwrap().is_empty());
    assert_eq!(auto.get("character", "The Last Centurion").unwrap().single().unwrap(), Some(rory));

    db.with_transaction(|tx| tx.remove_property(rory, "character")).unwrap();
    assert!(auto.query("character", "The*").unwrap().is_empty());
}
