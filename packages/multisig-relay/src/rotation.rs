//! Signer rotation and the role each position plays.

use std::collections::HashSet;
use std::fmt;

/// Ordered, duplicate-free list of participating accounts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rotation {
    members: Vec<String>,
}

/// What a node does each hour, derived from its position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Position 0 of a multi-member rotation: builds the draft, signs first.
    Initiator,
    /// Positions 1..n-2: appends to the previous member's signatures.
    Intermediate { position: usize },
    /// Last position: collects everything, co-signs, broadcasts.
    Finalizer,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Initiator => f.write_str("initiator"),
            Role::Intermediate { position } => write!(f, "intermediate#{position}"),
            Role::Finalizer => f.write_str("finalizer"),
        }
    }
}

impl Rotation {
    pub fn new(members: Vec<String>) -> Result<Self, crate::Error> {
        let members: Vec<String> = members
            .into_iter()
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .collect();
        if members.is_empty() {
            return Err(crate::Error::Config("rotation has no members".into()));
        }
        let mut seen = HashSet::new();
        for m in &members {
            if !seen.insert(m.as_str()) {
                return Err(crate::Error::Config(format!(
                    "account {m} appears more than once in the rotation"
                )));
            }
        }
        Ok(Self { members })
    }

    pub fn members(&self) -> &[String] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn position(&self, account: &str) -> Option<usize> {
        self.members.iter().position(|m| m == account)
    }

    pub fn member(&self, position: usize) -> Option<&str> {
        self.members.get(position).map(String::as_str)
    }

    pub fn role_at(&self, position: usize) -> Option<Role> {
        let last = self.members.len().checked_sub(1)?;
        if position > last {
            None
        } else if position == last {
            Some(Role::Finalizer)
        } else if position == 0 {
            Some(Role::Initiator)
        } else {
            Some(Role::Intermediate { position })
        }
    }

    pub fn role_of(&self, account: &str) -> Option<Role> {
        self.position(account).and_then(|p| self.role_at(p))
    }

    /// Every member except `account`, in rotation order.
    pub fn peers_of(&self, account: &str) -> Vec<String> {
        self.members
            .iter()
            .filter(|m| m.as_str() != account)
            .cloned()
            .collect()
    }
}
