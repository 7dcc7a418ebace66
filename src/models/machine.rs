use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Longest a single machine booking may run.
pub const MAX_SLOT_HOURS: i64 = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MachineType {
    Washer,
    Dryer,
}

/// A half-open booking interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Slot {
    pub fn overlaps(&self, other: &Slot) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), ApiError> {
        if self.start >= self.end {
            return Err(ApiError::bad_request("Slot must end after it starts"));
        }
        if self.start < now {
            return Err(ApiError::bad_request("Slot must start in the future"));
        }
        if self.end - self.start > Duration::hours(MAX_SLOT_HOURS) {
            return Err(ApiError::bad_request(format!(
                "Slot may not exceed {} hours",
                MAX_SLOT_HOURS
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    pub order_id: String,
    pub customer_id: String,
    #[serde(flatten)]
    pub slot: Slot,
}

/// A rentable machine in a self-service shop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Machine {
    #[serde(rename = "_id")]
    pub id: String,
    pub shop_id: String,
    pub label: String,
    pub machine_type: MachineType,
    pub available: bool,
    /// Customer whose order is currently running on this machine.
    pub current_customer_id: Option<String>,
    #[serde(default)]
    pub appointments: Vec<Appointment>,
    /// Bumped on every booking change; writes are conditional on it.
    #[serde(default)]
    pub version: i64,
    pub created_at: DateTime<Utc>,
}

impl Machine {
    /// Returns the first appointment that collides with `slot`.
    pub fn conflicting(&self, slot: &Slot) -> Option<&Appointment> {
        self.appointments.iter().find(|a| a.slot.overlaps(slot))
    }

    pub fn can_book(&self, slot: &Slot) -> Result<(), ApiError> {
        if !self.available {
            return Err(ApiError::conflict("Machine is not available for booking"));
        }
        if let Some(existing) = self.conflicting(slot) {
            return Err(ApiError::conflict(format!(
                "Machine is already booked from {} to {}",
                existing.slot.start, existing.slot.end
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 5, 4, hour, min, 0).unwrap()
    }

    fn slot(a: (u32, u32), b: (u32, u32)) -> Slot {
        Slot { start: at(a.0, a.1), end: at(b.0, b.1) }
    }

    fn machine(appointments: Vec<Appointment>) -> Machine {
        Machine {
            id: "m1".into(),
            shop_id: "s1".into(),
            label: "Washer 1".into(),
            machine_type: MachineType::Washer,
            available: true,
            current_customer_id: None,
            appointments,
            version: 0,
            created_at: at(0, 0),
        }
    }

    #[test]
    fn touching_slots_do_not_overlap() {
        let morning = slot((9, 0), (10, 0));
        let next = slot((10, 0), (11, 0));
        assert!(!morning.overlaps(&next));
        assert!(!next.overlaps(&morning));
    }

    #[test]
    fn contained_and_partial_slots_overlap() {
        let long = slot((9, 0), (12, 0));
        assert!(long.overlaps(&slot((10, 0), (10, 30))));
        assert!(long.overlaps(&slot((11, 30), (13, 0))));
        assert!(slot((8, 0), (9, 1)).overlaps(&long));
    }

    #[test]
    fn second_customer_cannot_book_overlapping_slot() {
        let m = machine(vec![Appointment {
            order_id: "o1".into(),
            customer_id: "alice".into(),
            slot: slot((9, 0), (10, 0)),
        }]);
        let err = m.can_book(&slot((9, 30), (10, 30))).unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
        assert!(m.can_book(&slot((10, 0), (11, 0))).is_ok());
    }

    #[test]
    fn unavailable_machine_rejects_bookings() {
        let mut m = machine(vec![]);
        m.available = false;
        assert!(m.can_book(&slot((9, 0), (10, 0))).is_err());
    }

    #[test]
    fn slot_validation() {
        let now = at(8, 0);
        assert!(slot((9, 0), (10, 0)).validate(now).is_ok());
        assert!(slot((10, 0), (9, 0)).validate(now).is_err());
        assert!(slot((7, 0), (9, 0)).validate(now).is_err());
        assert!(slot((9, 0), (22, 0)).validate(now).is_err());
    }
}
