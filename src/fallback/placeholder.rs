//! Placeholder Generator
//!
//! Deterministic, domain-plausible rows used whenever neither the cache nor
//! the completion service produced usable data. Seeded from the normalized
//! query so the same question always gets the same rows.

use crate::dump_store::Row;
use crate::fallback::domain::Domain;
use crate::normalize::normalize_query;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde_json::json;

pub const PLACEHOLDER_ROWS: usize = 3;

const DEALERS: &[&str] = &[
    "Apex Motors",
    "Northline Auto",
    "Summit Dealers",
    "Metro Wheels",
    "Coastal Cars",
];
const REGIONS: &[&str] = &["Northeast", "South", "West", "Midwest"];
const PLANTS: &[&str] = &["Pune", "Chennai", "Sanand", "Pantnagar"];
const COMPONENTS: &[&str] = &[
    "Battery pack",
    "Brake assembly",
    "Infotainment unit",
    "Drive motor",
    "Wiring harness",
];
const MODELS: &[&str] = &["Falcon", "Vega EV", "Orion", "Kestrel", "Nova"];
const CLAIMS: &[&str] = &["Electrical", "Powertrain", "Body & trim", "Software", "Suspension"];
const KPIS: &[&str] = &[
    "Retail volume",
    "Stock turns",
    "Claim rate",
    "Dealer NPS",
    "On-time delivery",
];
const LABELS: &[&str] = &["Item A", "Item B", "Item C", "Item D"];

/// FNV-1a; stable across builds, unlike `DefaultHasher`
fn seed_for(query: &str) -> u64 {
    normalize_query(query)
        .bytes()
        .fold(0xcbf2_9ce4_8422_2325u64, |hash, b| {
            (hash ^ b as u64).wrapping_mul(0x0000_0100_0000_01b3)
        })
}

/// Pick `n` distinct entries from `pool`
fn pick<'a>(rng: &mut StdRng, pool: &[&'a str], n: usize) -> Vec<&'a str> {
    pool.choose_multiple(rng, n).copied().collect()
}

pub fn placeholder_rows(query: &str, domain: Domain) -> Vec<Row> {
    let mut rng = StdRng::seed_from_u64(seed_for(query));
    let n = PLACEHOLDER_ROWS;

    let rows: Vec<serde_json::Value> = match domain {
        Domain::Sales => {
            let dealers = pick(&mut rng, DEALERS, n);
            (0..n)
                .map(|i| {
                    json!({
                        "dealer": dealers[i],
                        "region": REGIONS[rng.gen_range(0..REGIONS.len())],
                        "volume": rng.gen_range(40..480),
                    })
                })
                .collect()
        }
        Domain::Inventory => {
            let components = pick(&mut rng, COMPONENTS, n);
            (0..n)
                .map(|i| {
                    json!({
                        "plant": PLANTS[rng.gen_range(0..PLANTS.len())],
                        "component": components[i],
                        "stock": rng.gen_range(100..5_000),
                    })
                })
                .collect()
        }
        Domain::Warranty => {
            let models = pick(&mut rng, MODELS, n);
            (0..n)
                .map(|i| {
                    json!({
                        "model": models[i],
                        "claim": CLAIMS[rng.gen_range(0..CLAIMS.len())],
                        "count": rng.gen_range(5..250),
                    })
                })
                .collect()
        }
        Domain::Kpi => {
            let kpis = pick(&mut rng, KPIS, n);
            (0..n)
                .map(|i| {
                    let target: u32 = rng.gen_range(50..100);
                    json!({
                        "kpi": kpis[i],
                        "value": rng.gen_range(target / 2..target + 20),
                        "target": target,
                    })
                })
                .collect()
        }
        Domain::Generic => {
            let labels = pick(&mut rng, LABELS, n);
            (0..n)
                .map(|i| json!({"label": labels[i], "value": rng.gen_range(10..100)}))
                .collect()
        }
    };

    rows.into_iter()
        .filter_map(|v| match v {
            serde_json::Value::Object(map) => Some(map),
            _ => None,
        })
        .collect()
}
