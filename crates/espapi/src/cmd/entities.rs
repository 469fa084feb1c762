use std::collections::BTreeMap;
use std::sync::Arc;

use espapi_client::{Entities, Entity, EntityKind};
use serde::Serialize;

use crate::cmd::{parse_duration, settle, EntitiesArgs};
use crate::exit::{client_error, CliResult, SUCCESS};
use crate::output::{print_json, state_cell, table, OutputFormat};

#[derive(Debug, Serialize)]
struct EntityRow {
    kind: &'static str,
    object_id: String,
    name: String,
    key: u32,
    unique_id: String,
    valid: bool,
    state: serde_json::Value,
}

fn push_rows<K: EntityKind>(map: &BTreeMap<String, Arc<Entity<K>>>, rows: &mut Vec<EntityRow>) {
    for entity in map.values() {
        rows.push(EntityRow {
            kind: K::LABEL,
            object_id: entity.object_id().to_string(),
            name: entity.name().to_string(),
            key: entity.key(),
            unique_id: entity.unique_id().to_string(),
            valid: entity.is_valid(),
            state: serde_json::to_value(&*entity.state()).unwrap_or_default(),
        });
    }
}

fn rows(entities: &Entities) -> Vec<EntityRow> {
    let mut rows = Vec::with_capacity(entities.len());
    push_rows(&entities.binary_sensors, &mut rows);
    push_rows(&entities.cameras, &mut rows);
    push_rows(&entities.climates, &mut rows);
    push_rows(&entities.covers, &mut rows);
    push_rows(&entities.fans, &mut rows);
    push_rows(&entities.lights, &mut rows);
    push_rows(&entities.sensors, &mut rows);
    push_rows(&entities.switches, &mut rows);
    push_rows(&entities.text_sensors, &mut rows);
    rows
}

/// Cameras never receive state pushes, so they don't hold up the listing.
fn all_reported(entities: &Entities) -> bool {
    fn reported<K: EntityKind>(map: &BTreeMap<String, Arc<Entity<K>>>) -> bool {
        map.values().all(|entity| entity.is_valid())
    }
    reported(&entities.binary_sensors)
        && reported(&entities.climates)
        && reported(&entities.covers)
        && reported(&entities.fans)
        && reported(&entities.lights)
        && reported(&entities.sensors)
        && reported(&entities.switches)
        && reported(&entities.text_sensors)
}

pub fn run(args: EntitiesArgs, format: OutputFormat) -> CliResult<i32> {
    let wait = parse_duration(&args.settle)?;
    let client = args.device.connect()?;
    let entities = client.entities();
    settle(wait, || all_reported(&entities));

    let rows = rows(&entities);
    match format {
        OutputFormat::Json => print_json(&rows),
        OutputFormat::Table => {
            let mut out = table(vec!["KIND", "OBJECT ID", "NAME", "KEY", "STATE"]);
            for row in &rows {
                out.add_row(vec![
                    row.kind.to_string(),
                    row.object_id.clone(),
                    row.name.clone(),
                    row.key.to_string(),
                    state_text(row),
                ]);
            }
            println!("{out}");
        }
        OutputFormat::Pretty => {
            for row in &rows {
                println!("{} {} ({}): {}", row.kind, row.object_id, row.name, state_text(row));
            }
        }
        OutputFormat::Raw => {
            for row in &rows {
                println!("{}", row.object_id);
            }
        }
    }

    client
        .close()
        .map_err(|err| client_error("disconnect failed", err))?;
    Ok(SUCCESS)
}

fn state_text(row: &EntityRow) -> String {
    if row.valid {
        state_cell(&row.state)
    } else {
        "unknown".to_string()
    }
}
