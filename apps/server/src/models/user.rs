//! Acting user identity as supplied by the external authentication layer

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub company_id: i64,
    pub username: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub email: String,
    /// IANA timezone name, e.g. `America/New_York`.
    #[serde(default = "default_time_zone")]
    pub time_zone: String,
    #[serde(default)]
    pub admin: bool,
    #[serde(default)]
    pub sys_admin: bool,
    /// Integration identity. Search definitions it owns are locked against user edits.
    #[serde(default)]
    pub system: bool,
    #[serde(default)]
    pub permissions: BTreeSet<String>,
}

fn default_time_zone() -> String {
    "UTC".to_string()
}

impl User {
    /// Parsed timezone; unknown names fall back to UTC.
    pub fn tz(&self) -> Tz {
        match self.time_zone.parse::<Tz>() {
            Ok(tz) => tz,
            Err(_) => {
                tracing::warn!(
                    user_id = self.id,
                    time_zone = %self.time_zone,
                    "Unknown user timezone, falling back to UTC"
                );
                Tz::UTC
            }
        }
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.sys_admin || self.permissions.contains(permission)
    }

    pub fn display_name(&self) -> &str {
        if self.full_name.is_empty() {
            &self.username
        } else {
            &self.full_name
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(tz: &str) -> User {
        User {
            id: 1,
            company_id: 1,
            username: "jdoe".into(),
            full_name: String::new(),
            email: String::new(),
            time_zone: tz.into(),
            admin: false,
            sys_admin: false,
            system: false,
            permissions: BTreeSet::new(),
        }
    }

    #[test]
    fn unknown_timezone_falls_back_to_utc() {
        assert_eq!(user("Mars/Olympus").tz(), Tz::UTC);
        assert_eq!(user("America/New_York").tz(), Tz::America__New_York);
    }

    #[test]
    fn display_name_prefers_full_name() {
        let mut u = user("UTC");
        assert_eq!(u.display_name(), "jdoe");
        u.full_name = "Jane Doe".into();
        assert_eq!(u.display_name(), "Jane Doe");
    }
}
