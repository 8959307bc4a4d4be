//! Authenticated principal, as forwarded by the upstream auth gateway.

use std::collections::HashSet;
use std::str::FromStr;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use serde::Serialize;
use uuid::Uuid;

use crate::error::Error;

pub const HEADER_USER_ID: &str = "x-user-id";
pub const HEADER_ORGANIZATION_ID: &str = "x-organization-id";
pub const HEADER_ROLE: &str = "x-user-role";
pub const HEADER_PERMISSIONS: &str = "x-user-permissions";

pub const PERM_TRIPS_READ: &str = "trips:read";
pub const PERM_TRIPS_DELETE: &str = "trips:delete";
pub const PERM_NOTIFICATIONS_STREAM: &str = "notifications:stream";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    SchoolStaff,
    Driver,
    Parent,
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "school_staff" | "staff" => Ok(Role::SchoolStaff),
            "driver" => Ok(Role::Driver),
            "parent" => Ok(Role::Parent),
            other => Err(Error::Unauthorized(format!("unknown role '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: Uuid,
    pub organization_id: Uuid,
    pub role: Role,
    pub permissions: HashSet<String>,
}

impl Principal {
    pub fn new(user_id: Uuid, organization_id: Uuid, role: Role) -> Self {
        Self {
            user_id,
            organization_id,
            role,
            permissions: HashSet::new(),
        }
    }

    pub fn with_permission(mut self, permission: &str) -> Self {
        self.permissions.insert(permission.to_string());
        self
    }

    /// Admins hold every permission.
    pub fn can(&self, permission: &str) -> bool {
        self.role == Role::Admin || self.permissions.contains(permission)
    }

    pub fn is_driver(&self) -> bool {
        self.role == Role::Driver
    }

    pub fn from_headers(headers: &HeaderMap) -> Result<Self, Error> {
        let user_id = uuid_header(headers, HEADER_USER_ID)?;
        let organization_id = uuid_header(headers, HEADER_ORGANIZATION_ID)?;
        let role = header_str(headers, HEADER_ROLE)?.parse()?;
        let permissions = headers
            .get(HEADER_PERMISSIONS)
            .and_then(|v| v.to_str().ok())
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            user_id,
            organization_id,
            role,
            permissions,
        })
    }
}

impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Principal::from_headers(&parts.headers)
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, Error> {
    headers
        .get(name)
        .ok_or_else(|| Error::Unauthorized(format!("missing {}", name)))?
        .to_str()
        .map_err(|_| Error::Unauthorized(format!("malformed {}", name)))
}

fn uuid_header(headers: &HeaderMap, name: &str) -> Result<Uuid, Error> {
    header_str(headers, name)?
        .trim()
        .parse()
        .map_err(|_| Error::Unauthorized(format!("malformed {}", name)))
}
