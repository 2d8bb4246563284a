//! Shared primitive types used across the control layer.

/// Customer identity — the normalized phone number.
pub type CustomerId = String;

/// A stable, unique order identifier.
pub type OrderId = String;

/// Carrier tracking number for a physical shipment.
pub type Ttn = String;

/// Opaque city reference from the carrier's settlement directory.
pub type CityRef = String;
