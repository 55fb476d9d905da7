//! Decoded token payload with role and scope indexes.
//!
//! [`Claims`] keeps every claim of the payload as a raw JSON map and, at
//! construction, derives two lookup sets:
//!
//! - the scope set, split from the space-delimited `scope` claim
//! - the role set, the union of `realm_access.roles` and every
//!   `resource_access.<client>.roles`
//!
//! Both sets are computed once and cannot be mutated afterwards. An empty
//! role or scope name is always satisfied, which lets callers express
//! "authenticated, no specific permission required".

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::AuthError;

/// Role list as it appears under `realm_access` or a `resource_access` entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roles {
    /// Role names.
    #[serde(default)]
    pub roles: Vec<String>,
}

impl Roles {
    /// Returns `true` if the list contains `role`.
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// Claims decoded from a verified or introspected token.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Claims {
    subject: Option<String>,
    issuer: Option<String>,
    audience: Vec<String>,
    expires_at: Option<i64>,
    issued_at: Option<i64>,
    not_before: Option<i64>,
    jwt_id: Option<String>,
    authorized_party: Option<String>,
    preferred_username: Option<String>,
    scope: String,
    realm_access: Roles,
    resource_access: HashMap<String, Roles>,
    scope_set: HashSet<String>,
    role_set: HashSet<String>,
    roles: Vec<String>,
    raw: Map<String, Value>,
}

impl Claims {
    /// Builds claims from a decoded JSON payload.
    ///
    /// # Errors
    ///
    /// Returns `InvalidToken` if a registered claim has the wrong JSON type.
    pub fn from_map(raw: Map<String, Value>) -> Result<Self, AuthError> {
        let subject = string_claim(&raw, "sub")?;
        let issuer = string_claim(&raw, "iss")?;
        let jwt_id = string_claim(&raw, "jti")?;
        let authorized_party = string_claim(&raw, "azp")?;
        let preferred_username = string_claim(&raw, "preferred_username")?;
        let scope = string_claim(&raw, "scope")?.unwrap_or_default();

        let audience = match raw.get("aud") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::String(aud)) => vec![aud.clone()],
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| malformed("aud"))
                })
                .collect::<Result<_, _>>()?,
            Some(_) => return Err(malformed("aud")),
        };

        let realm_access: Roles = match raw.get("realm_access") {
            None | Some(Value::Null) => Roles::default(),
            Some(value) => {
                serde_json::from_value(value.clone()).map_err(|_| malformed("realm_access"))?
            }
        };

        let resource_access: HashMap<String, Roles> = match raw.get("resource_access") {
            None | Some(Value::Null) => HashMap::new(),
            Some(value) => {
                serde_json::from_value(value.clone()).map_err(|_| malformed("resource_access"))?
            }
        };

        let scope_set: HashSet<String> = scope.split_whitespace().map(str::to_string).collect();

        // Realm roles first, then resources in name order, for a stable role string.
        let mut resources: Vec<&String> = resource_access.keys().collect();
        resources.sort();

        let mut role_set = HashSet::new();
        let mut roles = Vec::new();
        let resource_roles = resources
            .into_iter()
            .filter_map(|name| resource_access.get(name))
            .flat_map(|r| r.roles.iter());
        for role in realm_access.roles.iter().chain(resource_roles) {
            if role_set.insert(role.clone()) {
                roles.push(role.clone());
            }
        }

        Ok(Self {
            subject,
            issuer,
            audience,
            expires_at: numeric_claim(&raw, "exp")?,
            issued_at: numeric_claim(&raw, "iat")?,
            not_before: numeric_claim(&raw, "nbf")?,
            jwt_id,
            authorized_party,
            preferred_username,
            scope,
            realm_access,
            resource_access,
            scope_set,
            role_set,
            roles,
            raw,
        })
    }

    /// Parses claims from a JSON payload.
    ///
    /// # Errors
    ///
    /// Returns `InvalidToken` if the payload is not a JSON object or a
    /// registered claim has the wrong type.
    pub fn from_json(payload: &[u8]) -> Result<Self, AuthError> {
        let raw: Map<String, Value> = serde_json::from_slice(payload)
            .map_err(|e| AuthError::invalid_token(format!("malformed payload: {e}")))?;
        Self::from_map(raw)
    }

    /// Returns `true` if the token carries `role` at realm or resource level.
    ///
    /// An empty role name is always satisfied.
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        role.is_empty() || self.role_set.contains(role)
    }

    /// Returns `true` if the token was granted `scope`.
    ///
    /// An empty scope name is always satisfied.
    #[must_use]
    pub fn has_scope(&self, scope: &str) -> bool {
        scope.is_empty() || self.scope_set.contains(scope)
    }

    /// Returns `true` if at least one of `roles` is held. An empty list is satisfied.
    #[must_use]
    pub fn has_any_role<S: AsRef<str>>(&self, roles: &[S]) -> bool {
        roles.is_empty() || roles.iter().any(|r| self.has_role(r.as_ref()))
    }

    /// Returns `true` if at least one of `scopes` is granted. An empty list is satisfied.
    #[must_use]
    pub fn has_any_scope<S: AsRef<str>>(&self, scopes: &[S]) -> bool {
        scopes.is_empty() || scopes.iter().any(|s| self.has_scope(s.as_ref()))
    }

    /// Subject (`sub`).
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    /// Issuer (`iss`).
    #[must_use]
    pub fn issuer(&self) -> Option<&str> {
        self.issuer.as_deref()
    }

    /// Audience (`aud`), normalized to a list.
    #[must_use]
    pub fn audience(&self) -> &[String] {
        &self.audience
    }

    /// Expiry (`exp`) in Unix seconds.
    #[must_use]
    pub fn expires_at(&self) -> Option<i64> {
        self.expires_at
    }

    /// Issued-at (`iat`) in Unix seconds.
    #[must_use]
    pub fn issued_at(&self) -> Option<i64> {
        self.issued_at
    }

    /// Not-before (`nbf`) in Unix seconds.
    #[must_use]
    pub fn not_before(&self) -> Option<i64> {
        self.not_before
    }

    /// Token id (`jti`).
    #[must_use]
    pub fn jwt_id(&self) -> Option<&str> {
        self.jwt_id.as_deref()
    }

    /// Client that obtained the token (`azp`).
    #[must_use]
    pub fn authorized_party(&self) -> Option<&str> {
        self.authorized_party.as_deref()
    }

    /// User name (`preferred_username`).
    #[must_use]
    pub fn preferred_username(&self) -> Option<&str> {
        self.preferred_username.as_deref()
    }

    /// Raw space-delimited scope string.
    #[must_use]
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Derived scope set.
    #[must_use]
    pub fn scope_set(&self) -> &HashSet<String> {
        &self.scope_set
    }

    /// Derived role set.
    #[must_use]
    pub fn role_set(&self) -> &HashSet<String> {
        &self.role_set
    }

    /// Roles in a stable order: realm roles, then resource roles by resource name.
    #[must_use]
    pub fn roles(&self) -> &[String] {
        &self.roles
    }

    /// Space-joined role list.
    #[must_use]
    pub fn role_str(&self) -> String {
        self.roles.join(" ")
    }

    /// Realm-level roles.
    #[must_use]
    pub fn realm_access(&self) -> &Roles {
        &self.realm_access
    }

    /// Roles granted for a single resource (client).
    #[must_use]
    pub fn resource_roles(&self, resource: &str) -> &[String] {
        self.resource_access
            .get(resource)
            .map(|r| r.roles.as_slice())
            .unwrap_or_default()
    }

    /// Returns a raw claim by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.raw.get(name)
    }

    /// Returns a raw claim by name if it is a string.
    #[must_use]
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.raw.get(name).and_then(Value::as_str)
    }

    /// All raw claims.
    #[must_use]
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.raw
    }
}

impl<'de> Deserialize<'de> for Claims {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Map::<String, Value>::deserialize(deserializer)?;
        Self::from_map(raw).map_err(serde::de::Error::custom)
    }
}

impl Serialize for Claims {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.raw.serialize(serializer)
    }
}

fn malformed(name: &str) -> AuthError {
    AuthError::invalid_token(format!("malformed claim '{name}'"))
}

fn string_claim(raw: &Map<String, Value>, name: &str) -> Result<Option<String>, AuthError> {
    match raw.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(malformed(name)),
    }
}

fn numeric_claim(raw: &Map<String, Value>, name: &str) -> Result<Option<i64>, AuthError> {
    match raw.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .map(Some)
            .ok_or_else(|| malformed(name)),
        Some(_) => Err(malformed(name)),
    }
}
