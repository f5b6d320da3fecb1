use serde::{Deserialize, Serialize};

use crate::coord::role::{Role, SessionRole};
use crate::core::{Error, Result};

/// Shared description of one session: where the producer publishes and which
/// role each consumer slot carries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoordinationRecord {
    pub transport_address: String,
    pub stream_id: i32,
    pub role_assignments: Vec<Role>,
    pub remaining_slots: u32,
}

/// The immutable part of a record, persisted as JSON after the atomic header.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct RecordBody {
    pub transport_address: String,
    pub stream_id: i32,
    pub role_assignments: Vec<Role>,
}

impl CoordinationRecord {
    pub fn create(
        transport_address: impl Into<String>,
        stream_id: i32,
        role_assignments: Vec<Role>,
    ) -> Self {
        let remaining_slots = u32::try_from(role_assignments.len()).unwrap_or(u32::MAX);
        Self {
            transport_address: transport_address.into(),
            stream_id,
            role_assignments,
            remaining_slots,
        }
    }

    pub fn slot_count(&self) -> u32 {
        u32::try_from(self.role_assignments.len()).unwrap_or(u32::MAX)
    }

    pub fn role_at(&self, ordinal: u32) -> Option<Role> {
        self.role_assignments.get(ordinal as usize).copied()
    }

    /// Claims the next slot of a record owned by this process alone.
    ///
    /// Records shared between processes are claimed through
    /// [`RecordStore::claim_next_role`](crate::coord::RecordStore::claim_next_role).
    pub fn claim_next_role(&mut self) -> Result<SessionRole> {
        if self.remaining_slots == 0 {
            return Err(Error::NoSlotsRemaining);
        }
        let ordinal = self.remaining_slots - 1;
        let role = self
            .role_at(ordinal)
            .ok_or(Error::Corrupt("remaining slots exceed role assignments"))?;
        self.remaining_slots = ordinal;
        Ok(SessionRole { ordinal, role })
    }

    pub(crate) fn body(&self) -> RecordBody {
        RecordBody {
            transport_address: self.transport_address.clone(),
            stream_id: self.stream_id,
            role_assignments: self.role_assignments.clone(),
        }
    }

    pub(crate) fn from_body(body: RecordBody, remaining_slots: u32) -> Result<Self> {
        let record = Self {
            transport_address: body.transport_address,
            stream_id: body.stream_id,
            role_assignments: body.role_assignments,
            remaining_slots,
        };
        if remaining_slots > record.slot_count() {
            return Err(Error::Corrupt("remaining slots exceed role assignments"));
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_sets_remaining_to_role_count() {
        let record = CoordinationRecord::create("/dev/shm/pulse", 10, vec![Role::Fast; 3]);
        assert_eq!(record.remaining_slots, 3);
        assert_eq!(record.slot_count(), 3);
    }

    #[test]
    fn local_claims_count_down_to_zero() {
        let mut record =
            CoordinationRecord::create("addr", 1, vec![Role::Slow, Role::Fast, Role::Fast]);
        let ordinals: Vec<u32> = (0..3)
            .map(|_| record.claim_next_role().expect("claim").ordinal)
            .collect();
        assert_eq!(ordinals, vec![2, 1, 0]);
        assert!(matches!(record.claim_next_role(), Err(Error::NoSlotsRemaining)));
        assert_eq!(record.remaining_slots, 0);
    }

    #[test]
    fn from_body_rejects_inconsistent_counter() {
        let body = RecordBody {
            transport_address: "addr".into(),
            stream_id: 1,
            role_assignments: vec![Role::Fast],
        };
        assert!(matches!(
            CoordinationRecord::from_body(body, 2),
            Err(Error::Corrupt(_))
        ));
    }
}
