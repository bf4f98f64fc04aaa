//! TruPath journey tracker.
//!
//! Simulates the delivery journey of each food-bank donation: a donation
//! opens a journey with five waypoints, a shared timer advances every active
//! journey one stage per tick, and completed journeys linger for a grace
//! period before leaving the active set.
//!
//! | Concern              | Module                                   |
//! |----------------------|------------------------------------------|
//! | Journey state machine| [`journey`]                              |
//! | Route generation     | [`waypoints`], [`reference`]             |
//! | Authoritative state  | [`store`]                                |
//! | Timer                | [`scheduler`]                            |
//! | Mirrors              | [`sync`], [`cache`], [`remote`], [`db`], [`rest`] |
//! | UI read models       | [`projections`], [`api`]                 |

pub mod api;
pub mod cache;
pub mod clock;
pub mod config;
pub mod db;
pub mod errors;
pub mod journey;
pub mod projections;
pub mod records;
pub mod reference;
pub mod remote;
pub mod rest;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod sync;
pub mod waypoints;

pub use errors::{Result, TrackerError};
pub use journey::{
    AdvanceOutcome, DonationRequest, JourneyRecord, JourneyStatus, JourneyType, RouteRequest,
    Waypoint,
};
pub use scheduler::{ConsumerLease, ProgressionScheduler};
pub use store::{JourneyStore, StoreSnapshot};
