//! Geometry: position fixes, distances, geohash keys and the movement gate.
//!
//! ```rust
//! use noise_mapper::geo::{GateEvent, MovementGate, PositionFix};
//!
//! let mut gate = MovementGate::new(200.0);
//! assert_eq!(gate.observe(PositionFix::new(0.0, 0.0, 5.0)), GateEvent::Seeded);
//! assert!(matches!(
//!     gate.observe(PositionFix::new(0.0, 0.0018, 5.0)),
//!     GateEvent::Trigger { .. }
//! ));
//! ```

pub mod distance;
pub mod gate;
pub mod geohash;
pub mod position;

pub use distance::{haversine_m, vincenty_m, DistanceFormula};
pub use gate::{GateEvent, GateState, MovementGate};
pub use geohash::{GeohashCell, GeohashError};
pub use position::PositionFix;
