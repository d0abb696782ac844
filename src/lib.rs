//! Geolockr - lock to a geographic zone and get notified on enter or exit.
//!
//! # Overview
//!
//! A position stream is fed into a [`monitor::GeofenceMonitor`], which keeps
//! a registry of circular regions and the last known containment of each.
//! Whenever a fix moves a region from inside to outside (or back) and that
//! direction is watched, a [`model::TransitionEvent`] is produced and handed
//! to a notification sink.
//!
//! ```text
//! fixes ──► TransitionDetector ──► Dispatcher ──► NotificationSink
//!               │
//!          RegionRegistry
//! ```
//!
//! The first fix after a region is registered only classifies it; it never
//! emits.
//!
//! # Modules
//!
//! - [`model`]: Regions, fixes, transitions and HTTP bodies
//! - [`geo`]: Haversine distance and containment
//! - [`registry`]: Region registry with expiration
//! - [`detector`]: Per-region containment state machine
//! - [`dispatch`]: Notification sinks and best-effort delivery
//! - [`monitor`]: Lock-guarded front for detector and dispatcher
//! - [`lock`]: Current-location and destination lock modes
//! - [`storage`]: SQLite persistence for regions and event history
//! - [`api`]: HTTP API handlers

pub mod api;
pub mod detector;
pub mod dispatch;
pub mod error;
pub mod geo;
pub mod lock;
pub mod model;
pub mod monitor;
pub mod registry;
pub mod storage;

pub use error::{GeofenceError, SinkError};
