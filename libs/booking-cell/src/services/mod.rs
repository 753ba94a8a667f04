pub mod events;
pub mod payment;
pub mod reclaim;
pub mod reservation;
