//! Shared Doctor Who universe used by the integration tests
#![allow(dead_code)]

use std::collections::HashMap;
use tardis::{DatabaseConfig, GraphDatabase, GraphResult, NodeId, RelationshipId, Transaction};

/// (actor, regeneration year into the next actor, salary)
pub const DOCTOR_ACTORS: &[(&str, Option<i64>, Option<i64>)] = &[
    ("William Hartnell", Some(1966), None),
    ("Patrick Troughton", Some(1969), None),
    ("Jon Pertwee", Some(1974), None),
    ("Tom Baker", Some(1981), None),
    ("Peter Davison", Some(1984), None),
    ("Colin Baker", Some(1987), None),
    ("Sylvester McCoy", Some(1996), None),
    ("Paul McGann", Some(2005), None),
    ("Christopher Eccleston", Some(2005), Some(400000)),
    ("David Tennant", Some(2010), Some(1000000)),
    ("Matt Smith", None, Some(400000)),
    ("Richard Hurndall", None, None),
];

/// (companion, wikipedia page)
pub const COMPANIONS: &[(&str, Option<&str>)] = &[
    ("Rose Tyler", Some("http://en.wikipedia.org/wiki/Rose_Tyler")),
    ("Martha Jones", None),
    ("Donna Noble", None),
    ("Amy Pond", Some("http://en.wikipedia.org/wiki/Amy_Pond")),
    ("Rory Williams", Some("http://en.wikipedia.org/wiki/Rory_Williams")),
];

pub const SPECIES: &[&str] = &["Silurian", "Slitheen", "Sontaran", "Skarasen", "Dalek", "Cyberman"];

/// (number, title)
pub const EPISODES: &[(&str, &str)] = &[
    ("157", "Rose"),
    ("161", "Dalek"),
    ("167", "The Parting of the Ways"),
    ("177", "Army of Ghosts"),
    ("179", "Smith and Jones"),
    ("186", "The Stolen Earth"),
    ("218", "Closing Time"),
];

/// (subject, episode number) for `APPEARED_IN`
const APPEARANCES: &[(&str, &str)] = &[
    ("Christopher Eccleston", "157"),
    ("Christopher Eccleston", "161"),
    ("Christopher Eccleston", "167"),
    ("David Tennant", "177"),
    ("David Tennant", "179"),
    ("David Tennant", "186"),
    ("Matt Smith", "218"),
    ("Rose Tyler", "157"),
    ("Rose Tyler", "161"),
    ("Rose Tyler", "167"),
    ("Rose Tyler", "177"),
    ("Rose Tyler", "186"),
    ("Martha Jones", "179"),
    ("Martha Jones", "186"),
    ("Dalek", "161"),
    ("Dalek", "167"),
    ("Dalek", "177"),
    ("Dalek", "186"),
    ("Cyberman", "177"),
    ("Cyberman", "218"),
    ("Slitheen", "157"),
];

/// Handles on the fixture's entities
pub struct Universe {
    pub db: GraphDatabase,
    pub doctor: NodeId,
    pub actors: HashMap<&'static str, NodeId>,
    pub companions: HashMap<&'static str, NodeId>,
    pub species: HashMap<&'static str, NodeId>,
    pub episodes: HashMap<&'static str, NodeId>,
    pub regenerations: Vec<RelationshipId>,
}

impl Universe {
    pub fn new() -> Universe {
        Self::with_config(DatabaseConfig::default())
    }

    pub fn with_config(config: DatabaseConfig) -> Universe {
        init_tracing();
        let db = GraphDatabase::open_in_memory(config);
        Self::load(db).unwrap()
    }

    /// Fill `db` with the universe in one transaction
    pub fn load(db: GraphDatabase) -> GraphResult<Universe> {
        let mut universe = Universe {
            db: db.clone(),
            doctor: NodeId::new(0),
            actors: HashMap::new(),
            companions: HashMap::new(),
            species: HashMap::new(),
            episodes: HashMap::new(),
            regenerations: Vec::new(),
        };
        db.with_transaction(|tx| universe.build(tx))?;
        Ok(universe)
    }

    fn build(&mut self, tx: &mut Transaction) -> GraphResult<()> {
        self.doctor = character(tx, "Doctor")?;

        let mut previous: Option<(NodeId, Option<i64>)> = None;
        for (name, regenerated, salary) in DOCTOR_ACTORS {
            let actor = tx.create_node()?;
            tx.set_property(actor, "actor", *name)?;
            if let Some(salary) = salary {
                tx.set_property(actor, "salary", *salary)?;
            }
            tx.index_for_nodes("actors").add(actor, "actor", *name)?;
            tx.create_relationship(actor, self.doctor, "PLAYED")?;

            // Hurndall stood in for Hartnell and is not part of the chain
            if *name != "Richard Hurndall" {
                if let Some((from, Some(year))) = previous {
                    let regen = tx.create_relationship(from, actor, "REGENERATED_TO")?;
                    tx.set_property(regen, "year", year)?;
                    self.regenerations.push(regen);
                }
                previous = Some((actor, *regenerated));
            }
            self.actors.insert(name, actor);
        }

        for (name, wikipedia) in COMPANIONS {
            let companion = character(tx, name)?;
            if let Some(page) = wikipedia {
                tx.set_property(companion, "wikipedia", *page)?;
            }
            tx.create_relationship(companion, self.doctor, "COMPANION_OF")?;
            self.companions.insert(name, companion);
        }

        let freema = tx.create_node()?;
        tx.set_property(freema, "actor", "Freema Agyeman")?;
        tx.index_for_nodes("actors").add(freema, "actor", "Freema Agyeman")?;
        tx.create_relationship(freema, self.companions["Martha Jones"], "PLAYED")?;
        self.actors.insert("Freema Agyeman", freema);

        for name in SPECIES {
            let species = tx.create_node()?;
            tx.set_property(species, "species", *name)?;
            tx.index_for_nodes("species").add(species, "species", *name)?;
            self.species.insert(name, species);
        }

        for (number, title) in EPISODES {
            let episode = tx.create_node()?;
            tx.set_property(episode, "episode", *number)?;
            tx.set_property(episode, "title", *title)?;
            tx.index_for_nodes("episodes").add(episode, "episode", *number)?;
            self.episodes.insert(number, episode);
        }

        for (subject, episode) in APPEARANCES {
            let from = self
                .actors
                .get(subject)
                .or_else(|| self.companions.get(subject))
                .or_else(|| self.species.get(subject))
                .copied()
                .unwrap_or_else(|| panic!("unknown subject {}", subject));
            tx.create_relationship(from, self.episodes[episode], "APPEARED_IN")?;
        }

        let rose = self.companions["Rose Tyler"];
        let enemies = tx.create_relationship(rose, self.species["Dalek"], "ENEMY_OF")?;
        tx.set_property(enemies, "since", 2005)?;
        tx.create_relationship(rose, self.species["Cyberman"], "ENEMY_OF")?;
        Ok(())
    }
}

fn character(tx: &mut Transaction, name: &str) -> GraphResult<NodeId> {
    let node = tx.create_node()?;
    tx.set_property(node, "character", name)?;
    tx.index_for_nodes("characters").add(node, "character", name)?;
    Ok(node)
}

/// Install a test subscriber once; `RUST_LOG` controls the level
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Run a query and collect one column as strings
pub fn column_strings(db: &GraphDatabase, query: &str, column: &str) -> Vec<String> {
    db.execute(query)
        .unwrap()
        .column_as(column)
        .unwrap()
        .map(|value| {
            let value = value.unwrap();
            value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string())
        })
        .collect()
}
