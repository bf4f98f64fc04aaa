//! Journey records and the per-journey stage state machine.
//!
//! ```text
//! active(1) ─tick─► active(2) ─► … ─► active(5) ─tick─► completed
//!                                                         │
//!                                                   tick ─┘ (no-op)
//! ```

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, TrackerError};

/// Number of waypoints (and stages) in every journey.
pub const STAGE_COUNT: usize = 5;

/// Which selection constraint was applied when the route was generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JourneyType {
    General,
    LocationFixed,
    ProgramFixed,
}

impl JourneyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::General => "general",
            Self::LocationFixed => "location_fixed",
            Self::ProgramFixed => "program_fixed",
        }
    }
}

/// Route constraint carried by a donation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RouteRequest {
    General,
    LocationFixed { governorate: String },
    ProgramFixed { program: String },
}

impl RouteRequest {
    pub fn journey_type(&self) -> JourneyType {
        match self {
            Self::General => JourneyType::General,
            Self::LocationFixed { .. } => JourneyType::LocationFixed,
            Self::ProgramFixed { .. } => JourneyType::ProgramFixed,
        }
    }
}

/// Everything the store needs to open a new journey.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DonationRequest {
    #[serde(flatten)]
    pub route: RouteRequest,
    pub amount: Decimal,
    #[serde(default)]
    pub donor_id: Option<String>,
    #[serde(default)]
    pub donor_name: Option<String>,
}

impl DonationRequest {
    pub fn general(amount: Decimal) -> Self {
        Self {
            route: RouteRequest::General,
            amount,
            donor_id: None,
            donor_name: None,
        }
    }

    pub fn with_route(mut self, route: RouteRequest) -> Self {
        self.route = route;
        self
    }

    pub fn with_donor(mut self, id: impl Into<String>, name: impl Into<String>) -> Self {
        self.donor_id = Some(id.into());
        self.donor_name = Some(name.into());
        self
    }

    /// Boundary validation, run before the waypoint generator sees the request.
    pub fn validate(&self) -> Result<()> {
        if self.amount <= Decimal::ZERO {
            return Err(TrackerError::InvalidRequest(
                "amount must be positive".to_string(),
            ));
        }
        match &self.route {
            RouteRequest::LocationFixed { governorate } if governorate.trim().is_empty() => Err(
                TrackerError::InvalidRequest("governorate must not be empty".to_string()),
            ),
            RouteRequest::ProgramFixed { program } if program.trim().is_empty() => Err(
                TrackerError::InvalidRequest("program must not be empty".to_string()),
            ),
            _ => Ok(()),
        }
    }
}

/// The five logical stops of a journey, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Collection,
    Transport,
    RegionalHub,
    LocalDistribution,
    FinalDelivery,
}

impl StageKind {
    pub const ALL: [StageKind; STAGE_COUNT] = [
        Self::Collection,
        Self::Transport,
        Self::RegionalHub,
        Self::LocalDistribution,
        Self::FinalDelivery,
    ];

    /// 1-based stage number.
    pub fn stage(&self) -> u8 {
        match self {
            Self::Collection => 1,
            Self::Transport => 2,
            Self::RegionalHub => 3,
            Self::LocalDistribution => 4,
            Self::FinalDelivery => 5,
        }
    }

    pub fn from_stage(stage: u8) -> Option<Self> {
        Self::ALL.get(usize::from(stage).checked_sub(1)?).copied()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Collection => "collection",
            Self::Transport => "transport",
            Self::RegionalHub => "regional_hub",
            Self::LocalDistribution => "local_distribution",
            Self::FinalDelivery => "final_delivery",
        }
    }

    /// Donor-facing text for the SMS sent when a journey reaches this stage.
    pub fn sms_text(&self, place: &str) -> String {
        match self {
            Self::Collection => format!("Your donation has been received at {place}."),
            Self::Transport => format!("Your donation is on the road: {place}."),
            Self::RegionalHub => format!("Your donation arrived at {place}."),
            Self::LocalDistribution => format!("Your donation reached {place} for distribution."),
            Self::FinalDelivery => format!("Your donation is being delivered: {place}."),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub stage: u8,
    pub kind: StageKind,
    pub label: String,
    pub lat: f64,
    pub lon: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub governorate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub village: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JourneyStatus {
    Active,
    Completed,
}

/// Result of asking a journey (or the store) to move one stage forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// Moved to the given stage.
    Advanced(u8),
    /// Was at the last stage and is now completed.
    Completed,
    /// Already completed; nothing changed.
    Unchanged,
    /// No journey with that id is tracked.
    Unknown,
}

impl AdvanceOutcome {
    pub fn changed(&self) -> bool {
        matches!(self, Self::Advanced(_) | Self::Completed)
    }
}

/// One donation's simulated delivery progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JourneyRecord {
    pub id: String,
    #[serde(default)]
    pub donor_id: Option<String>,
    #[serde(default)]
    pub donor_name: Option<String>,
    pub journey_type: JourneyType,
    pub waypoints: [Waypoint; STAGE_COUNT],
    pub current_stage: u8,
    pub status: JourneyStatus,
    pub amount: Decimal,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Instant of the last stage transition (creation for stage 1).
    pub stage_changed_at: DateTime<Utc>,
    /// When each stage was reached; index 0 is stage 1.
    #[serde(default)]
    pub stage_reached_at: Vec<DateTime<Utc>>,
}

impl JourneyRecord {
    pub fn new(
        id: String,
        request: &DonationRequest,
        waypoints: [Waypoint; STAGE_COUNT],
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            donor_id: request.donor_id.clone(),
            donor_name: request.donor_name.clone(),
            journey_type: request.route.journey_type(),
            waypoints,
            current_stage: 1,
            status: JourneyStatus::Active,
            amount: request.amount,
            created_at: now,
            completed_at: None,
            stage_changed_at: now,
            stage_reached_at: vec![now],
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == JourneyStatus::Active
    }

    pub fn current_waypoint(&self) -> &Waypoint {
        let index = usize::from(self.current_stage.clamp(1, STAGE_COUNT as u8)) - 1;
        &self.waypoints[index]
    }

    /// Apply one tick to this journey.
    pub fn advance(&mut self, now: DateTime<Utc>) -> AdvanceOutcome {
        debug_assert!(
            self.stage_in_range(),
            "journey {} at out-of-range stage {}",
            self.id,
            self.current_stage
        );
        match self.status {
            JourneyStatus::Completed => AdvanceOutcome::Unchanged,
            JourneyStatus::Active if usize::from(self.current_stage) < STAGE_COUNT => {
                self.current_stage += 1;
                self.stage_changed_at = now;
                self.stage_reached_at.push(now);
                AdvanceOutcome::Advanced(self.current_stage)
            }
            JourneyStatus::Active => {
                self.status = JourneyStatus::Completed;
                self.completed_at = Some(now);
                self.stage_changed_at = now;
                AdvanceOutcome::Completed
            }
        }
    }

    fn stage_in_range(&self) -> bool {
        (1..=STAGE_COUNT as u8).contains(&self.current_stage)
    }

    /// Check a record read back from a cache or the remote before it is
    /// tracked again. A completed record without `completed_at` is given its
    /// last transition instant; an active one loses a stray `completed_at`.
    /// A stage outside `1..=5` cannot be repaired.
    pub fn repair_loaded(&mut self) -> Result<()> {
        if !self.stage_in_range() {
            return Err(TrackerError::CorruptRecord {
                id: self.id.clone(),
                reason: format!("stage {} out of range", self.current_stage),
            });
        }
        match self.status {
            JourneyStatus::Completed if self.completed_at.is_none() => {
                self.completed_at = Some(self.stage_changed_at);
            }
            JourneyStatus::Active if self.completed_at.is_some() => {
                self.completed_at = None;
            }
            _ => {}
        }
        Ok(())
    }

    /// Read-repair after a restart: replay the ticks that would have fired
    /// since the last known transition. Returns how many were applied.
    pub fn fast_forward(&mut self, now: DateTime<Utc>, step: Duration) -> u32 {
        if step <= Duration::zero() {
            return 0;
        }
        let mut applied = 0;
        while self.is_active() {
            let due = self.stage_changed_at + step;
            if due > now {
                break;
            }
            self.advance(due);
            applied += 1;
        }
        applied
    }

    /// Whether a completed journey has outlived its display window.
    pub fn grace_expired(&self, now: DateTime<Utc>, grace: Duration) -> bool {
        match self.completed_at {
            Some(done) if self.status == JourneyStatus::Completed => done + grace <= now,
            _ => false,
        }
    }

    /// When `stage` was reached, if it has been.
    pub fn reached_at(&self, stage: u8) -> Option<DateTime<Utc>> {
        let index = usize::from(stage).checked_sub(1)?;
        self.stage_reached_at.get(index).copied()
    }

    /// Stage/status ordering used to merge two copies of the same journey.
    pub fn progress_rank(&self) -> (bool, u8) {
        (self.status == JourneyStatus::Completed, self.current_stage)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;

    pub(crate) fn sample_waypoints() -> [Waypoint; STAGE_COUNT] {
        StageKind::ALL.map(|kind| Waypoint {
            stage: kind.stage(),
            kind,
            label: format!("Stop {}", kind.stage()),
            lat: 30.0 + f64::from(kind.stage()),
            lon: 31.0,
            governorate: None,
            program: None,
            village: None,
            family: None,
        })
    }

    pub(crate) fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn sample() -> JourneyRecord {
        JourneyRecord::new(
            "TRK-1".to_string(),
            &DonationRequest::general(Decimal::new(2500, 2)),
            sample_waypoints(),
            t0(),
        )
    }

    #[test]
    fn new_journey_starts_at_stage_one() {
        let j = sample();
        assert_eq!(j.current_stage, 1);
        assert_eq!(j.status, JourneyStatus::Active);
        assert_eq!(j.waypoints.len(), 5);
        assert!(j.completed_at.is_none());
        assert_eq!(j.current_waypoint().kind, StageKind::Collection);
    }

    #[test]
    fn advance_walks_all_stages_then_completes_once() {
        let mut j = sample();
        for expected in 2..=5 {
            assert_eq!(j.advance(t0()), AdvanceOutcome::Advanced(expected));
        }
        assert!(j.is_active());
        let done_at = t0() + Duration::seconds(9);
        assert_eq!(j.advance(done_at), AdvanceOutcome::Completed);
        assert_eq!(j.completed_at, Some(done_at));
        assert_eq!(j.current_stage, 5);

        assert_eq!(j.advance(done_at + Duration::seconds(1)), AdvanceOutcome::Unchanged);
        assert_eq!(j.completed_at, Some(done_at));
        assert_eq!(j.current_stage, 5);
    }

    #[test]
    fn fast_forward_replays_elapsed_ticks() {
        let mut j = sample();
        let applied = j.fast_forward(t0() + Duration::milliseconds(2_500), Duration::seconds(1));
        assert_eq!(applied, 2);
        assert_eq!(j.current_stage, 3);
        assert_eq!(j.stage_changed_at, t0() + Duration::seconds(2));
        assert_eq!(j.reached_at(2), Some(t0() + Duration::seconds(1)));
        assert_eq!(j.reached_at(3), Some(t0() + Duration::seconds(2)));
        assert_eq!(j.reached_at(4), None);
    }

    #[test]
    fn fast_forward_completes_with_exact_timestamp() {
        let mut j = sample();
        j.fast_forward(t0() + Duration::seconds(60), Duration::seconds(2));
        assert_eq!(j.status, JourneyStatus::Completed);
        assert_eq!(j.completed_at, Some(t0() + Duration::seconds(10)));
    }

    #[test]
    fn fast_forward_never_moves_backwards() {
        let mut j = sample();
        j.current_stage = 4;
        j.stage_changed_at = t0() + Duration::seconds(30);
        j.fast_forward(t0() + Duration::seconds(10), Duration::seconds(1));
        assert_eq!(j.current_stage, 4);
    }

    #[test]
    fn loaded_record_with_bad_stage_is_rejected() {
        let mut j = sample();
        j.current_stage = 9;
        assert!(matches!(j.repair_loaded(), Err(TrackerError::CorruptRecord { .. })));
        j.current_stage = 0;
        assert!(j.repair_loaded().is_err());
        j.current_stage = 5;
        assert!(j.repair_loaded().is_ok());
    }

    #[test]
    fn loaded_completed_record_gets_completion_time() {
        let mut j = sample();
        j.status = JourneyStatus::Completed;
        j.stage_changed_at = t0() + Duration::seconds(7);
        j.repair_loaded().unwrap();
        assert_eq!(j.completed_at, Some(t0() + Duration::seconds(7)));
        assert!(j.grace_expired(t0() + Duration::seconds(10), Duration::seconds(3)));

        let mut active = sample();
        active.completed_at = Some(t0());
        active.repair_loaded().unwrap();
        assert_eq!(active.completed_at, None);
    }

    #[test]
    fn grace_expiry_only_applies_to_completed() {
        let mut j = sample();
        assert!(!j.grace_expired(t0() + Duration::days(1), Duration::seconds(5)));
        for _ in 0..5 {
            j.advance(t0());
        }
        assert!(!j.grace_expired(t0() + Duration::seconds(4), Duration::seconds(5)));
        assert!(j.grace_expired(t0() + Duration::seconds(5), Duration::seconds(5)));
    }

    #[test]
    fn request_validation() {
        assert!(DonationRequest::general(Decimal::ZERO).validate().is_err());
        let blank = DonationRequest::general(Decimal::ONE).with_route(RouteRequest::LocationFixed {
            governorate: "  ".to_string(),
        });
        assert!(matches!(blank.validate(), Err(TrackerError::InvalidRequest(_))));
        assert!(DonationRequest::general(Decimal::ONE).validate().is_ok());
    }

    #[test]
    fn request_deserializes_from_tagged_json() {
        let req: DonationRequest = serde_json::from_str(
            r#"{"type":"program_fixed","program":"School Meals","amount":"10.50","donor_id":"d1"}"#,
        )
        .unwrap();
        assert_eq!(
            req.route,
            RouteRequest::ProgramFixed {
                program: "School Meals".to_string()
            }
        );
        assert_eq!(req.amount, Decimal::new(1050, 2));
        assert_eq!(req.donor_id.as_deref(), Some("d1"));
        assert_eq!(req.route.journey_type(), JourneyType::ProgramFixed);
    }

    #[test]
    fn stage_kind_lookup() {
        assert_eq!(StageKind::from_stage(1), Some(StageKind::Collection));
        assert_eq!(StageKind::from_stage(5), Some(StageKind::FinalDelivery));
        assert_eq!(StageKind::from_stage(0), None);
        assert_eq!(StageKind::from_stage(6), None);
    }
}
