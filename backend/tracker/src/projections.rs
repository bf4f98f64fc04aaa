//! Read-only views derived from the store's journey list.
//!
//! Every UI surface (map, admin HUD, SMS inbox, journey viewer) renders from
//! the same `list()` snapshot, so they cannot disagree about a journey's stage.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::journey::{JourneyRecord, JourneyStatus, StageKind, Waypoint, STAGE_COUNT};
use crate::records::SmsLog;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HudSummary {
    pub active: usize,
    pub completed: usize,
    pub total: usize,
    pub total_amount: Decimal,
}

pub fn hud(journeys: &[JourneyRecord]) -> HudSummary {
    journeys.iter().fold(HudSummary::default(), |mut hud, j| {
        match j.status {
            JourneyStatus::Active => hud.active += 1,
            JourneyStatus::Completed => hud.completed += 1,
        }
        hud.total += 1;
        hud.total_amount += j.amount;
        hud
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MapMarker {
    pub journey_id: String,
    pub stage: u8,
    pub kind: StageKind,
    pub status: JourneyStatus,
    pub label: String,
    pub lat: f64,
    pub lon: f64,
}

/// One marker per journey, placed at its current waypoint.
pub fn map_markers(journeys: &[JourneyRecord]) -> Vec<MapMarker> {
    journeys
        .iter()
        .map(|j| {
            let wp = j.current_waypoint();
            MapMarker {
                journey_id: j.id.clone(),
                stage: j.current_stage,
                kind: wp.kind,
                status: j.status,
                label: wp.label.clone(),
                lat: wp.lat,
                lon: wp.lon,
            }
        })
        .collect()
}

/// Every message sent so far, newest first. Optionally scoped to one donor.
pub fn sms_inbox(journeys: &[JourneyRecord], donor_id: Option<&str>) -> Vec<SmsLog> {
    let mut inbox: Vec<SmsLog> = journeys
        .iter()
        .filter(|j| donor_id.map_or(true, |d| j.donor_id.as_deref() == Some(d)))
        .flat_map(SmsLog::history)
        .collect();
    inbox.sort_by(|a, b| b.sent_at.cmp(&a.sent_at).then_with(|| b.id.cmp(&a.id)));
    inbox
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StopView {
    #[serde(flatten)]
    pub waypoint: Waypoint,
    pub reached: bool,
    pub current: bool,
    pub reached_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JourneyView {
    pub id: String,
    pub status: JourneyStatus,
    pub current_stage: u8,
    pub progress_percent: u8,
    pub amount: Decimal,
    pub donor_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub stops: Vec<StopView>,
}

pub fn journey_view(journey: &JourneyRecord) -> JourneyView {
    let completed = journey.status == JourneyStatus::Completed;
    let progress_percent = if completed {
        100
    } else {
        // Stage 1 is 0%, stage 5 (arrived, not yet delivered) is 80%.
        ((journey.current_stage.saturating_sub(1)) as usize * 100 / STAGE_COUNT) as u8
    };

    let stops = journey
        .waypoints
        .iter()
        .map(|wp| StopView {
            waypoint: wp.clone(),
            reached: wp.stage <= journey.current_stage,
            current: !completed && wp.stage == journey.current_stage,
            reached_at: journey.reached_at(wp.stage),
        })
        .collect();

    JourneyView {
        id: journey.id.clone(),
        status: journey.status,
        current_stage: journey.current_stage,
        progress_percent,
        amount: journey.amount,
        donor_name: journey.donor_name.clone(),
        created_at: journey.created_at,
        completed_at: journey.completed_at,
        stops,
    }
}
