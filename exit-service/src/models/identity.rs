//! Principals, roles, halls and role-specific profiles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// The single role a principal may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Student,
    HallAdmin,
    Security,
    SuperAdmin,
}

impl Role {
    pub const ALL: [Role; 4] = [
        Role::Student,
        Role::HallAdmin,
        Role::Security,
        Role::SuperAdmin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::HallAdmin => "hall_admin",
            Role::Security => "security",
            Role::SuperAdmin => "super_admin",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "student" => Ok(Role::Student),
            "hall_admin" => Ok(Role::HallAdmin),
            "security" => Ok(Role::Security),
            "super_admin" => Ok(Role::SuperAdmin),
            other => Err(format!("Invalid role: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Hall {
    pub hall_id: Uuid,
    pub name: String,
}

/// Authenticated identity, provisioned outside this service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Principal {
    pub principal_id: Uuid,
    pub display_name: String,
    pub email: String,
    pub created_utc: DateTime<Utc>,
}

/// Raw profile row shared by every role.
///
/// `local_id` is the student number, staff number or badge number depending on
/// the role it is read for. `hall_name` is joined in on read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ProfileRecord {
    pub principal_id: Uuid,
    pub full_name: Option<String>,
    pub local_id: Option<String>,
    pub phone: Option<String>,
    pub hall_id: Option<Uuid>,
    pub hall_name: Option<String>,
}

impl ProfileRecord {
    pub fn hall(&self) -> Option<Hall> {
        self.hall_id.map(|hall_id| Hall {
            hall_id,
            name: self.hall_name.clone().unwrap_or_default(),
        })
    }
}

/// Role-specific view of a profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Profile {
    Student {
        full_name: Option<String>,
        student_number: Option<String>,
        phone: Option<String>,
        hall: Option<Hall>,
    },
    HallAdmin {
        full_name: Option<String>,
        staff_number: Option<String>,
        phone: Option<String>,
        hall: Option<Hall>,
    },
    Security {
        full_name: Option<String>,
        badge_number: Option<String>,
        phone: Option<String>,
    },
    SuperAdmin {
        full_name: Option<String>,
    },
}

impl Profile {
    pub fn from_record(role: Role, record: ProfileRecord) -> Self {
        let hall = record.hall();
        match role {
            Role::Student => Profile::Student {
                full_name: record.full_name,
                student_number: record.local_id,
                phone: record.phone,
                hall,
            },
            Role::HallAdmin => Profile::HallAdmin {
                full_name: record.full_name,
                staff_number: record.local_id,
                phone: record.phone,
                hall,
            },
            Role::Security => Profile::Security {
                full_name: record.full_name,
                badge_number: record.local_id,
                phone: record.phone,
            },
            Role::SuperAdmin => Profile::SuperAdmin {
                full_name: record.full_name,
            },
        }
    }

    pub fn full_name(&self) -> Option<&str> {
        match self {
            Profile::Student { full_name, .. }
            | Profile::HallAdmin { full_name, .. }
            | Profile::Security { full_name, .. }
            | Profile::SuperAdmin { full_name } => full_name.as_deref(),
        }
    }

    pub fn hall(&self) -> Option<&Hall> {
        match self {
            Profile::Student { hall, .. } | Profile::HallAdmin { hall, .. } => hall.as_ref(),
            Profile::Security { .. } | Profile::SuperAdmin { .. } => None,
        }
    }
}

/// Partial profile update; absent fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct ProfileUpdate {
    #[validate(length(min = 1, max = 100, message = "Full name must be 1 to 100 characters"))]
    pub full_name: Option<String>,

    #[validate(length(max = 50, message = "Identifier must be at most 50 characters"))]
    pub local_id: Option<String>,

    #[validate(length(max = 20, message = "Phone number must be at most 20 characters"))]
    pub phone: Option<String>,

    pub hall_id: Option<Uuid>,
}

impl ProfileUpdate {
    pub const FIELD_ORDER: [&'static str; 3] = ["full_name", "local_id", "phone"];
}

/// Principal with its role and display fields, as listed by oversight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub principal_id: Uuid,
    pub display_name: String,
    pub email: String,
    pub role: Option<Role>,
    pub full_name: Option<String>,
    pub hall: Option<Hall>,
}
