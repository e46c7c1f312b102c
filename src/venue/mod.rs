//! Venue seam
//!
//! [`VenueClient`] is the raw exchange API, [`GuardedVenue`] wraps it with
//! rate limiting and retries, and [`PaperVenue`] is the in-memory client
//! used for dry runs.

mod guarded;
mod paper;
mod traits;

pub use guarded::{GuardedVenue, OrderOutcome};
pub use paper::PaperVenue;
pub use traits::{AccountState, OpenOrder, OrderAck, VenueClient, VenuePosition, VenueResult};
