use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Currencies the platform settles in. GHS is the default for all wallets.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Ghs,
    Ngn,
    Usd,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Ghs => "GHS",
            Currency::Ngn => "NGN",
            Currency::Usd => "USD",
        }
    }
}

impl Default for Currency {
    fn default() -> Self {
        Currency::Ghs
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Currency {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "GHS" => Ok(Currency::Ghs),
            "NGN" => Ok(Currency::Ngn),
            "USD" => Ok(Currency::Usd),
            _ => Err(anyhow::anyhow!("Unsupported currency: {}", s)),
        }
    }
}

/// Actor roles carried in JWT claims and checked per route.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Hirer,
    Worker,
    Moderator,
    Admin,
}

impl Role {
    pub fn is_staff(&self) -> bool {
        matches!(self, Role::Moderator | Role::Admin)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Hirer => write!(f, "hirer"),
            Role::Worker => write!(f, "worker"),
            Role::Moderator => write!(f, "moderator"),
            Role::Admin => write!(f, "admin"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "hirer" => Ok(Role::Hirer),
            "worker" => Ok(Role::Worker),
            "moderator" => Ok(Role::Moderator),
            "admin" => Ok(Role::Admin),
            _ => Err(anyhow::anyhow!("Invalid role: {}", s)),
        }
    }
}

/// Who is performing an operation. Scheduled jobs act as `system`, which
/// carries admin privileges and the nil user id.
#[derive(Debug, Clone, Copy)]
pub struct Actor {
    pub user_id: super::entity_ids::UserId,
    pub role: Role,
}

impl Actor {
    pub fn new(user_id: super::entity_ids::UserId, role: Role) -> Self {
        Self { user_id, role }
    }

    pub fn system() -> Self {
        Self {
            user_id: super::entity_ids::UserId::from_uuid(uuid::Uuid::nil()),
            role: Role::Admin,
        }
    }

    pub fn is_staff(&self) -> bool {
        self.role.is_staff()
    }

    pub fn is_admin(&self) -> bool {
        matches!(self.role, Role::Admin)
    }
}

/// Amounts are stored as NUMERIC(12,2); one cedi-pesewa (0.01) is the
/// tolerance unit for split-resolution arithmetic.
pub fn money_tolerance() -> rust_decimal::Decimal {
    rust_decimal::Decimal::new(1, 2)
}
