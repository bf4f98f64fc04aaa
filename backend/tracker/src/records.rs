//! Side records mirrored to the remote store next to each journey.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::journey::{JourneyRecord, JourneyType, StageKind};

/// One row per triggered donation, keyed by the journey id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DonationRecord {
    pub id: String,
    pub amount: Decimal,
    pub journey_type: JourneyType,
    pub donor_id: Option<String>,
    pub donor_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl DonationRecord {
    pub fn from_journey(journey: &JourneyRecord) -> Self {
        Self {
            id: journey.id.clone(),
            amount: journey.amount,
            journey_type: journey.journey_type,
            donor_id: journey.donor_id.clone(),
            donor_name: journey.donor_name.clone(),
            created_at: journey.created_at,
        }
    }
}

/// A donor-facing progress message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmsLog {
    /// `<journey id>-<stage>` or `<journey id>-done`.
    pub id: String,
    pub journey_id: String,
    pub donor_id: Option<String>,
    pub stage: u8,
    pub delivered: bool,
    pub message: String,
    pub sent_at: DateTime<Utc>,
}

impl SmsLog {
    /// Message for reaching `stage`. `None` for a stage outside 1..=5.
    pub fn for_stage(journey: &JourneyRecord, stage: u8, sent_at: DateTime<Utc>) -> Option<Self> {
        let kind = StageKind::from_stage(stage)?;
        let waypoint = &journey.waypoints[usize::from(stage) - 1];
        Some(Self {
            id: format!("{}-{stage}", journey.id),
            journey_id: journey.id.clone(),
            donor_id: journey.donor_id.clone(),
            stage,
            delivered: false,
            message: kind.sms_text(&waypoint.label),
            sent_at,
        })
    }

    pub fn for_completion(journey: &JourneyRecord, sent_at: DateTime<Utc>) -> Self {
        let last = journey.waypoints.last().map_or("its destination", |w| w.label.as_str());
        Self {
            id: format!("{}-done", journey.id),
            journey_id: journey.id.clone(),
            donor_id: journey.donor_id.clone(),
            stage: journey.current_stage,
            delivered: true,
            message: format!("Delivered! Your donation of {} reached {last}. Thank you.", journey.amount),
            sent_at,
        }
    }

    /// Every message a journey has produced so far, oldest first.
    pub fn history(journey: &JourneyRecord) -> Vec<Self> {
        let mut logs: Vec<Self> = (1..=journey.current_stage)
            .filter_map(|stage| {
                let at = journey.reached_at(stage).unwrap_or(journey.stage_changed_at);
                Self::for_stage(journey, stage, at)
            })
            .collect();
        if let Some(done) = journey.completed_at {
            logs.push(Self::for_completion(journey, done));
        }
        logs
    }
}

/// Running totals per donor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DonorProfile {
    pub id: String,
    pub name: Option<String>,
    pub total_donated: Decimal,
    pub donation_count: u32,
    pub last_donation_at: DateTime<Utc>,
}

impl DonorProfile {
    pub fn first(journey: &JourneyRecord, donor_id: &str) -> Self {
        Self {
            id: donor_id.to_string(),
            name: journey.donor_name.clone(),
            total_donated: journey.amount,
            donation_count: 1,
            last_donation_at: journey.created_at,
        }
    }

    pub fn record(&mut self, journey: &JourneyRecord) {
        self.total_donated += journey.amount;
        self.donation_count += 1;
        self.last_donation_at = journey.created_at;
        if journey.donor_name.is_some() {
            self.name = journey.donor_name.clone();
        }
    }
}
