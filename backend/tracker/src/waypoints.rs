//! Waypoint generator: donation request + reference data → five stops.
//!
//! Pure apart from the injected RNG, so a seeded RNG reproduces a route.

use rand::seq::SliceRandom;
use rand::Rng;

use crate::errors::{Result, TrackerError};
use crate::journey::{RouteRequest, StageKind, Waypoint, STAGE_COUNT};
use crate::reference::{Governorate, Program, ReferenceData, Village};

/// Every journey departs from the central warehouse.
pub const WAREHOUSE_LABEL: &str = "Central Warehouse";
pub const WAREHOUSE_LAT: f64 = 30.0626;
pub const WAREHOUSE_LON: f64 = 31.2497;

/// Offset between the village distribution point and the household.
const DOORSTEP_OFFSET: f64 = 0.002;

/// Resolve a route for `route` and lay out its five waypoints.
pub fn generate_waypoints<R: Rng + ?Sized>(
    route: &RouteRequest,
    reference: &ReferenceData,
    rng: &mut R,
) -> Result<[Waypoint; STAGE_COUNT]> {
    let (governorate, program) = select_delivery_context(route, reference, rng)?;

    let villages: Vec<&Village> = reference.villages_in(&governorate.id).collect();
    let village = *villages.choose(rng).ok_or_else(|| {
        TrackerError::NoRouteAvailable(format!("governorate {} has no villages", governorate.name))
    })?;

    let families: Vec<_> = reference.families_in(&village.id).collect();
    let family = families.choose(rng).map(|f| f.name.clone());

    Ok(StageKind::ALL.map(|kind| {
        let (label, lat, lon) = match kind {
            StageKind::Collection => (WAREHOUSE_LABEL.to_string(), WAREHOUSE_LAT, WAREHOUSE_LON),
            StageKind::Transport => (
                format!("En route to {}", governorate.name),
                (WAREHOUSE_LAT + governorate.lat) / 2.0,
                (WAREHOUSE_LON + governorate.lon) / 2.0,
            ),
            StageKind::RegionalHub => (
                format!("{} regional hub", governorate.name),
                governorate.lat,
                governorate.lon,
            ),
            StageKind::LocalDistribution => (
                format!("{} distribution point", village.name),
                village.lat,
                village.lon,
            ),
            StageKind::FinalDelivery => (
                match &family {
                    Some(name) => format!("{name} family, {}", village.name),
                    None => format!("Household in {}", village.name),
                },
                village.lat + DOORSTEP_OFFSET,
                village.lon + DOORSTEP_OFFSET,
            ),
        };
        let local = matches!(kind, StageKind::LocalDistribution | StageKind::FinalDelivery);
        Waypoint {
            stage: kind.stage(),
            kind,
            label,
            lat,
            lon,
            governorate: Some(governorate.name.clone()),
            program: Some(program.name.clone()),
            village: local.then(|| village.name.clone()),
            family: if kind == StageKind::FinalDelivery {
                family.clone()
            } else {
                None
            },
        }
    }))
}

/// Pick the (governorate, program) pair the journey delivers under.
fn select_delivery_context<'a, R: Rng + ?Sized>(
    route: &RouteRequest,
    reference: &'a ReferenceData,
    rng: &mut R,
) -> Result<(&'a Governorate, &'a Program)> {
    let has_villages = |g: &Governorate| reference.villages_in(&g.id).next().is_some();

    match route {
        RouteRequest::General => {
            let candidates: Vec<(&Governorate, &Program)> = reference
                .governorates
                .iter()
                .filter(|g| has_villages(g))
                .flat_map(|g| reference.programs_for(&g.id).map(move |p| (g, p)))
                .collect();
            candidates.choose(rng).copied().ok_or_else(|| {
                TrackerError::NoRouteAvailable("reference data has no covered governorate".into())
            })
        }
        RouteRequest::LocationFixed { governorate } => {
            let gov = reference.find_governorate(governorate).ok_or_else(|| {
                TrackerError::NoRouteAvailable(format!("unknown governorate {governorate}"))
            })?;
            if !has_villages(gov) {
                return Err(TrackerError::NoRouteAvailable(format!(
                    "governorate {} has no villages",
                    gov.name
                )));
            }
            let programs: Vec<&Program> = reference.programs_for(&gov.id).collect();
            let program = programs.choose(rng).copied().ok_or_else(|| {
                TrackerError::NoRouteAvailable(format!(
                    "no program covers governorate {}",
                    gov.name
                ))
            })?;
            Ok((gov, program))
        }
        RouteRequest::ProgramFixed { program } => {
            let prog = reference.find_program(program).ok_or_else(|| {
                TrackerError::NoRouteAvailable(format!("unknown program {program}"))
            })?;
            let governorates: Vec<&Governorate> = prog
                .governorates
                .iter()
                .filter_map(|id| reference.find_governorate(id))
                .filter(|g| has_villages(g))
                .collect();
            let gov = governorates.choose(rng).copied().ok_or_else(|| {
                TrackerError::NoRouteAvailable(format!(
                    "program {} covers no reachable governorate",
                    prog.name
                ))
            })?;
            Ok((gov, prog))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    #[test]
    fn general_route_has_five_ordered_stops() {
        let data = ReferenceData::seed();
        let wps = generate_waypoints(&RouteRequest::General, &data, &mut rng()).unwrap();

        assert_eq!(wps.len(), 5);
        for (i, wp) in wps.iter().enumerate() {
            assert_eq!(usize::from(wp.stage), i + 1);
            assert_eq!(wp.kind, StageKind::ALL[i]);
        }
        assert_eq!(wps[0].label, WAREHOUSE_LABEL);
        assert!(wps[4].village.is_some());
        assert!(wps[0].village.is_none());
    }

    #[test]
    fn same_seed_same_route() {
        let data = ReferenceData::seed();
        let a = generate_waypoints(&RouteRequest::General, &data, &mut rng()).unwrap();
        let b = generate_waypoints(&RouteRequest::General, &data, &mut rng()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn location_fixed_delivers_inside_governorate() {
        let data = ReferenceData::seed();
        let route = RouteRequest::LocationFixed {
            governorate: "Sohag".to_string(),
        };
        for seed in 0..20 {
            let wps = generate_waypoints(&route, &data, &mut StdRng::seed_from_u64(seed)).unwrap();
            let last = &wps[4];
            assert_eq!(last.governorate.as_deref(), Some("Sohag"));
            let village = data
                .villages
                .iter()
                .find(|v| Some(v.name.as_str()) == last.village.as_deref())
                .unwrap();
            assert_eq!(village.governorate_id, "sohag");
        }
    }

    #[test]
    fn program_fixed_references_program() {
        let data = ReferenceData::seed();
        let route = RouteRequest::ProgramFixed {
            program: "school-meals".to_string(),
        };
        for seed in 0..20 {
            let wps = generate_waypoints(&route, &data, &mut StdRng::seed_from_u64(seed)).unwrap();
            assert!(wps.iter().all(|w| w.program.as_deref() == Some("School Meals")));
            let gov = wps[2].governorate.as_deref().unwrap();
            assert!(["Minya", "Sohag", "Aswan"].contains(&gov));
        }
    }

    #[test]
    fn uncovered_governorate_has_no_route() {
        let data = ReferenceData::seed();
        let route = RouteRequest::LocationFixed {
            governorate: "Matrouh".to_string(),
        };
        let err = generate_waypoints(&route, &data, &mut rng()).unwrap_err();
        assert!(matches!(err, TrackerError::NoRouteAvailable(_)));
    }

    #[test]
    fn unknown_or_empty_program_has_no_route() {
        let data = ReferenceData::seed();
        for program in ["Orphan Care", "Does Not Exist"] {
            let route = RouteRequest::ProgramFixed {
                program: program.to_string(),
            };
            assert!(matches!(
                generate_waypoints(&route, &data, &mut rng()),
                Err(TrackerError::NoRouteAvailable(_))
            ));
        }
    }

    #[test]
    fn general_route_never_picks_uncovered_governorate() {
        let data = ReferenceData::seed();
        for seed in 0..50 {
            let wps = generate_waypoints(
                &RouteRequest::General,
                &data,
                &mut StdRng::seed_from_u64(seed),
            )
            .unwrap();
            assert_ne!(wps[2].governorate.as_deref(), Some("Matrouh"));
        }
    }

    #[test]
    fn empty_reference_data_has_no_route() {
        let err = generate_waypoints(&RouteRequest::General, &ReferenceData::default(), &mut rng())
            .unwrap_err();
        assert!(matches!(err, TrackerError::NoRouteAvailable(_)));
    }
}
