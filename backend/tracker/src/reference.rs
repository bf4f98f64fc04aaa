//! Read-only reference data that constrains waypoint selection.
//!
//! Containment: `Family ⊂ Village ⊂ Governorate`. Programs are orthogonal and
//! list the governorates they cover.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{info, warn};

use crate::remote::{Collection, Filter, RemoteStore};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Governorate {
    pub id: String,
    pub name: String,
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub id: String,
    pub name: String,
    /// Ids of the governorates this program delivers in.
    #[serde(default)]
    pub governorates: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Village {
    pub id: String,
    pub name: String,
    pub governorate_id: String,
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Family {
    pub id: String,
    pub name: String,
    pub village_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReferenceData {
    pub governorates: Vec<Governorate>,
    pub programs: Vec<Program>,
    pub villages: Vec<Village>,
    pub families: Vec<Family>,
}

impl ReferenceData {
    /// Look a governorate up by id or (case-insensitive) name.
    pub fn find_governorate(&self, key: &str) -> Option<&Governorate> {
        let key = key.trim();
        self.governorates
            .iter()
            .find(|g| g.id == key || g.name.eq_ignore_ascii_case(key))
    }

    /// Look a program up by id or (case-insensitive) name.
    pub fn find_program(&self, key: &str) -> Option<&Program> {
        let key = key.trim();
        self.programs
            .iter()
            .find(|p| p.id == key || p.name.eq_ignore_ascii_case(key))
    }

    pub fn programs_for<'a>(&'a self, governorate_id: &'a str) -> impl Iterator<Item = &'a Program> {
        self.programs
            .iter()
            .filter(move |p| p.governorates.iter().any(|g| g == governorate_id))
    }

    pub fn villages_in<'a>(&'a self, governorate_id: &'a str) -> impl Iterator<Item = &'a Village> {
        self.villages
            .iter()
            .filter(move |v| v.governorate_id == governorate_id)
    }

    pub fn families_in<'a>(&'a self, village_id: &'a str) -> impl Iterator<Item = &'a Family> {
        self.families.iter().filter(move |f| f.village_id == village_id)
    }

    pub fn is_empty(&self) -> bool {
        self.governorates.is_empty() || self.programs.is_empty() || self.villages.is_empty()
    }

    /// Built-in dataset used when the remote reference tables are empty.
    pub fn seed() -> Self {
        let gov = |id: &str, name: &str, lat: f64, lon: f64| Governorate {
            id: id.to_string(),
            name: name.to_string(),
            lat,
            lon,
        };
        let prog = |id: &str, name: &str, govs: &[&str]| Program {
            id: id.to_string(),
            name: name.to_string(),
            governorates: govs.iter().map(|g| g.to_string()).collect(),
        };
        let village = |id: &str, name: &str, gov: &str, lat: f64, lon: f64| Village {
            id: id.to_string(),
            name: name.to_string(),
            governorate_id: gov.to_string(),
            lat,
            lon,
        };
        let family = |id: &str, name: &str, village: &str| Family {
            id: id.to_string(),
            name: name.to_string(),
            village_id: village.to_string(),
        };

        Self {
            governorates: vec![
                gov("cairo", "Cairo", 30.0444, 31.2357),
                gov("giza", "Giza", 30.0131, 31.2089),
                gov("alexandria", "Alexandria", 31.2001, 29.9187),
                gov("minya", "Minya", 28.1099, 30.7503),
                gov("sohag", "Sohag", 26.5591, 31.6957),
                gov("aswan", "Aswan", 24.0889, 32.8998),
                // Villages but no program coverage yet.
                gov("matrouh", "Matrouh", 31.3543, 27.2373),
            ],
            programs: vec![
                prog(
                    "feeding",
                    "Feeding Program",
                    &["cairo", "giza", "alexandria", "minya", "sohag", "aswan"],
                ),
                prog("school-meals", "School Meals", &["minya", "sohag", "aswan"]),
                prog("ramadan", "Ramadan Boxes", &["cairo", "giza", "alexandria"]),
                prog("orphan-care", "Orphan Care", &[]),
            ],
            villages: vec![
                village("v-shubra", "Shubra", "cairo", 30.0907, 31.2447),
                village("v-helwan", "Helwan", "cairo", 29.8414, 31.3008),
                village("v-abu-rawash", "Abu Rawash", "giza", 30.0492, 31.0894),
                village("v-saqqara", "Saqqara", "giza", 29.8711, 31.2165),
                village("v-borg", "Borg El Arab", "alexandria", 30.8555, 29.5800),
                village("v-mallawi", "Mallawi", "minya", 27.7314, 30.8417),
                village("v-samalut", "Samalut", "minya", 28.3121, 30.7101),
                village("v-akhmim", "Akhmim", "sohag", 26.5622, 31.7470),
                village("v-tahta", "Tahta", "sohag", 26.7693, 31.5021),
                village("v-kom-ombo", "Kom Ombo", "aswan", 24.4527, 32.9283),
                village("v-siwa", "Siwa", "matrouh", 29.2032, 25.5195),
            ],
            families: vec![
                family("f-1", "Hassan", "v-shubra"),
                family("f-2", "Mahmoud", "v-helwan"),
                family("f-3", "Ibrahim", "v-abu-rawash"),
                family("f-4", "Saleh", "v-saqqara"),
                family("f-5", "Farouk", "v-borg"),
                family("f-6", "Abdelrahman", "v-mallawi"),
                family("f-7", "Youssef", "v-samalut"),
                family("f-8", "Mostafa", "v-akhmim"),
                family("f-9", "Khalil", "v-tahta"),
                family("f-10", "Nour", "v-kom-ombo"),
                family("f-11", "Amin", "v-siwa"),
            ],
        }
    }
}

/// Read the four reference tables from the remote store, falling back to
/// [`ReferenceData::seed`] when they are unreachable or incomplete.
pub async fn load_reference_data(remote: &dyn RemoteStore) -> ReferenceData {
    let loaded = async {
        Ok::<_, crate::errors::TrackerError>(ReferenceData {
            governorates: list_as(remote, Collection::Governorates).await?,
            programs: list_as(remote, Collection::Programs).await?,
            villages: list_as(remote, Collection::Villages).await?,
            families: list_as(remote, Collection::Families).await?,
        })
    }
    .await;

    match loaded {
        Ok(data) if !data.is_empty() => {
            info!(
                "Loaded reference data from {}: {} governorates, {} programs, {} villages",
                remote.name(),
                data.governorates.len(),
                data.programs.len(),
                data.villages.len()
            );
            data
        }
        Ok(_) => {
            info!("Remote reference tables are empty — using built-in seed");
            ReferenceData::seed()
        }
        Err(e) => {
            warn!("Could not read reference data ({e}) — using built-in seed");
            ReferenceData::seed()
        }
    }
}

async fn list_as<T: DeserializeOwned>(
    remote: &dyn RemoteStore,
    collection: Collection,
) -> crate::errors::Result<Vec<T>> {
    remote
        .list(collection, &Filter::all())
        .await?
        .into_iter()
        .map(|doc| serde_json::from_value(doc).map_err(Into::into))
        .collect()
}
