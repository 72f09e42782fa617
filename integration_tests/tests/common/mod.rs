#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use flatbuffers::FlatBufferBuilder;
use snapshot_export::{ExportOptions, JsonStyle, Pipeline};
use snapshot_schema::{SchemaDescriptor, SchemaRegistry};

pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// Every schema in `tests/fixtures`.
pub fn registry() -> Arc<SchemaRegistry> {
    let registry =
        SchemaRegistry::load_path(&fixture_path("")).expect("fixture schemas should load");
    Arc::new(registry)
}

pub fn profile_schema() -> SchemaDescriptor {
    SchemaDescriptor::from_file(&fixture_path("player_profile.schema.json"))
        .expect("player profile schema should load")
}

pub fn legacy_profile_schema() -> SchemaDescriptor {
    SchemaDescriptor::from_file(&fixture_path("v1/player_profile.schema.json"))
        .expect("v1 player profile schema should load")
}

pub fn compact_options() -> ExportOptions {
    ExportOptions {
        json_style: JsonStyle::Compact,
        ..ExportOptions::default()
    }
}

pub fn pipeline(options: ExportOptions) -> Pipeline {
    Pipeline::new(registry(), options)
}

#[derive(Debug, Clone)]
pub struct UnitSpec {
    pub kind: Option<&'static str>,
    pub hp: i32,
    pub veteran: bool,
}

#[derive(Debug, Clone)]
pub enum EventSpec {
    None,
    Battle { winner: &'static str, losses: i32 },
    Trade { partner: u32, amount: f64 },
    /// A Battle payload under an arbitrary discriminant.
    RawTag(u8),
}

/// Inputs for a `PlayerProfile` buffer.
#[derive(Debug, Clone)]
pub struct ProfileSpec {
    pub id: u64,
    pub name: Option<&'static str>,
    pub faction: i16,
    pub computer_player: bool,
    pub stats: Option<(i32, u8)>,
    pub tags: Vec<&'static str>,
    pub units: Vec<UnitSpec>,
    pub resources: Vec<i32>,
    pub event: EventSpec,
    pub identifier: &'static str,
    /// Write only the fields the v1 schema knows about.
    pub legacy: bool,
}

impl Default for ProfileSpec {
    fn default() -> Self {
        Self {
            id: 42,
            name: Some("Governor"),
            faction: 3,
            computer_player: false,
            stats: Some((1200, 2)),
            tags: vec!["north", "coastal"],
            units: vec![
                UnitSpec {
                    kind: Some("infantry"),
                    hp: 80,
                    veteran: false,
                },
                UnitSpec {
                    kind: Some("armor"),
                    hp: 120,
                    veteran: true,
                },
            ],
            resources: vec![5, 10, 15],
            event: EventSpec::Battle {
                winner: "Blue",
                losses: 4,
            },
            identifier: "FBPP",
            legacy: false,
        }
    }
}

/// Compact JSON of the default profile, `_type` key included.
pub const PROFILE_JSON: &str = concat!(
    r#"{"_type":"PlayerProfile","id":42,"name":"Governor","faction":3,"computer_player":false,"#,
    r#""stats":{"score":1200,"rank":2},"tags":["north","coastal"],"#,
    r#""units":[{"kind":"infantry","hp":80,"veteran":false},{"kind":"armor","hp":120,"veteran":true}],"#,
    r#""resources":[5,10,15],"last_event_type":"Battle","last_event":{"winner":"Blue","losses":4}}"#
);

pub fn profile_buffer(spec: &ProfileSpec) -> Vec<u8> {
    let mut fbb = FlatBufferBuilder::new();

    let stats = spec.stats.map(|(score, rank)| {
        let start = fbb.start_table();
        fbb.push_slot::<i32>(4, score, 0);
        fbb.push_slot::<u8>(6, rank, 0);
        fbb.end_table(start)
    });

    let tags: Vec<_> = spec.tags.iter().map(|tag| fbb.create_string(tag)).collect();
    let tags = fbb.create_vector(&tags);

    let mut units = Vec::with_capacity(spec.units.len());
    for unit in &spec.units {
        let kind = unit.kind.map(|kind| fbb.create_string(kind));
        let start = fbb.start_table();
        if let Some(kind) = kind {
            fbb.push_slot_always(4, kind);
        }
        fbb.push_slot::<i32>(6, unit.hp, 0);
        fbb.push_slot::<bool>(8, unit.veteran, false);
        units.push(fbb.end_table(start));
    }
    let units = fbb.create_vector(&units);
    let resources = fbb.create_vector(&spec.resources);

    let event = match spec.event {
        EventSpec::None => None,
        EventSpec::Battle { winner, losses } => {
            let winner = fbb.create_string(winner);
            let start = fbb.start_table();
            fbb.push_slot_always(4, winner);
            fbb.push_slot::<i32>(6, losses, 0);
            Some((1u8, fbb.end_table(start)))
        }
        EventSpec::Trade { partner, amount } => {
            let start = fbb.start_table();
            fbb.push_slot::<u32>(4, partner, 0);
            fbb.push_slot::<f64>(6, amount, 0.0);
            Some((2u8, fbb.end_table(start)))
        }
        EventSpec::RawTag(tag) => {
            let start = fbb.start_table();
            fbb.push_slot::<i32>(6, 1, 0);
            Some((tag, fbb.end_table(start)))
        }
    };

    let name = spec.name.map(|name| fbb.create_string(name));

    let start = fbb.start_table();
    fbb.push_slot::<u64>(4, spec.id, 0);
    if let Some(name) = name {
        fbb.push_slot_always(6, name);
    }
    fbb.push_slot::<i16>(8, spec.faction, 1);
    fbb.push_slot::<bool>(10, spec.computer_player, false);
    if let Some(stats) = stats {
        fbb.push_slot_always(12, stats);
    }
    if !spec.legacy {
        fbb.push_slot_always(14, tags);
        fbb.push_slot_always(16, units);
        fbb.push_slot_always(18, resources);
        if let Some((tag, event)) = event {
            fbb.push_slot::<u8>(20, tag, 0);
            fbb.push_slot_always(22, event);
        }
    }
    let root = fbb.end_table(start);
    fbb.finish(root, Some(spec.identifier));
    fbb.finished_data().to_vec()
}

/// A `Node` whose `parent` points back at itself.
pub fn self_referencing_node() -> Vec<u8> {
    let mut bytes = Vec::with_capacity(28);
    bytes.extend_from_slice(&16u32.to_le_bytes());
    bytes.extend_from_slice(b"NODE");
    // vtable: 8 bytes, table 12 bytes, label at +4, parent at +8
    bytes.extend_from_slice(&[8, 0, 12, 0, 4, 0, 8, 0]);
    bytes.extend_from_slice(&8i32.to_le_bytes());
    bytes.extend_from_slice(&7i32.to_le_bytes());
    bytes.extend_from_slice(&(-8i32).to_le_bytes());
    bytes
}

/// `Node { label: labels[0], parent: Node { label: labels[1], … } }`.
pub fn node_chain(labels: &[i32]) -> Vec<u8> {
    let mut fbb = FlatBufferBuilder::new();
    let mut parent = None;
    for &label in labels.iter().rev() {
        let start = fbb.start_table();
        fbb.push_slot::<i32>(4, label, 0);
        if let Some(parent) = parent {
            fbb.push_slot_always(6, parent);
        }
        parent = Some(fbb.end_table(start));
    }
    if let Some(root) = parent {
        fbb.finish(root, Some("NODE"));
    }
    fbb.finished_data().to_vec()
}

/// Byte position of the `parent` offset in [`self_referencing_node`].
pub const NODE_PARENT_OFFSET: usize = 24;

/// A `Marker` with an inline `Vec2 { x: 1.5, y: -2.0 }` and id 9.
pub fn marker_buffer() -> Vec<u8> {
    let mut bytes = Vec::with_capacity(32);
    bytes.extend_from_slice(&16u32.to_le_bytes());
    bytes.extend_from_slice(b"MRKR");
    // vtable: 8 bytes, table 16 bytes, position at +4, id at +12
    bytes.extend_from_slice(&[8, 0, 16, 0, 4, 0, 12, 0]);
    bytes.extend_from_slice(&8i32.to_le_bytes());
    bytes.extend_from_slice(&1.5f32.to_le_bytes());
    bytes.extend_from_slice(&(-2.0f32).to_le_bytes());
    bytes.extend_from_slice(&9u16.to_le_bytes());
    bytes.extend_from_slice(&[0, 0]);
    bytes
}

pub fn utf8(bytes: Vec<u8>) -> String {
    String::from_utf8(bytes).expect("export output should be UTF-8")
}
