//! Fake people records and the schema that holds them

use serde_json::{json, Value};
use stash_core::{CollectionOptions, IndexOptions, LogSink, StorageHandle, UpgradeError};
use uuid::Uuid;

pub const COLLECTION: &str = "people";

const FIRST_NAMES: &[&str] = &["Amihan", "Bayani", "Dalisay", "Ligaya", "Tala", "Malaya"];
const LAST_NAMES: &[&str] = &["Santos", "Reyes", "Cruz", "Bautista", "Garcia"];
const LOCATIONS: &[&str] = &["Baguio City", "Benguet", "La Trinidad", "Sagada", "Bontoc"];
const STREETS: &[&str] = &["Session Road", "Magsaysay Avenue", "Kisad Road", "Leonard Wood Road"];
const GOODS_TYPES: &[&str] = &["produce", "textile", "coffee", "handicraft"];
const DOMAINS: &[&str] = &["example.com", "example.org", "example.net"];

/// Build `count` people. Bar codes are unique per record.
pub fn generate(count: usize) -> Vec<Value> {
    (0..count)
        .map(|i| {
            let first = FIRST_NAMES[i % FIRST_NAMES.len()];
            let last = LAST_NAMES[i % LAST_NAMES.len()];

            json!({
                "id": Uuid::new_v4().to_string(),
                "location": LOCATIONS[i % LOCATIONS.len()],
                "name": format!("{} {}", 100 + i * 7, STREETS[i % STREETS.len()]),
                "nameGoods": format!(
                    "{}.{}@{}",
                    first.to_lowercase(),
                    last.to_lowercase(),
                    DOMAINS[i % DOMAINS.len()]
                ),
                "type": GOODS_TYPES[i % GOODS_TYPES.len()],
                "barCode": format!("480{:010}", 1_000_003 * (i + 1)),
            })
        })
        .collect()
}

/// Upgrade step: create the collection and its indexes, then load `records`
pub fn create_schema(
    db: &StorageHandle,
    records: Vec<Value>,
    sink: &dyn LogSink,
) -> Result<(), UpgradeError> {
    let people = db.create_collection(COLLECTION, CollectionOptions::key_path("id"))?;
    sink.success("Object Store Created");

    for field in ["location", "name", "nameGoods", "type"] {
        people.create_index(field, field, IndexOptions::default())?;
    }
    people.create_index("barCode", "barCode", IndexOptions::unique())?;

    for record in records {
        people.add(record)?;
    }
    sink.success("Data Added");

    Ok(())
}
