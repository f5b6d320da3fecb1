use std::fmt;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::core::{Error, Result};

/// Speed class assigned to a consumer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Fast,
    Slow,
}

impl Role {
    pub fn is_slow(self) -> bool {
        matches!(self, Role::Slow)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Fast => write!(f, "FAST"),
            Role::Slow => write!(f, "SLOW"),
        }
    }
}

/// The slot a consumer process won: its ordinal and the role stored there.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionRole {
    pub ordinal: u32,
    pub role: Role,
}

impl fmt::Display for SessionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} consumer #{}", self.role, self.ordinal)
    }
}

/// Builds `count` role assignments with exactly `slow` SLOW entries at random
/// positions.
pub fn generate_roles<R: Rng + ?Sized>(count: usize, slow: usize, rng: &mut R) -> Result<Vec<Role>> {
    if count == 0 {
        return Err(Error::InvalidConfig("at least one consumer role is required".into()));
    }
    if slow > count {
        return Err(Error::InvalidConfig(format!(
            "slow roles ({slow}) exceed consumer roles ({count})"
        )));
    }
    let mut roles = vec![Role::Fast; count];
    roles[..slow].fill(Role::Slow);
    roles.shuffle(rng);
    Ok(roles)
}

/// Renders roles the way the outcome check prints them: `[FAST, SLOW]`.
pub fn format_roles(roles: &[Role]) -> String {
    let names: Vec<String> = roles.iter().map(Role::to_string).collect();
    format!("[{}]", names.join(", "))
}
