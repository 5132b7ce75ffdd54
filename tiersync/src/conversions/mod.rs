//! Text conversions between value representations of the three tiers.

pub mod hex;
pub mod numeric;
pub mod temporal;
pub mod watermark;
