use crate::error::LockError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Partition of the lock space, so subsystems sharing one store never collide
/// on identical resource keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceNamespace {
    Payment,
    Invoice,
    Account,
}

impl ServiceNamespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Payment => "PAYMENT",
            Self::Invoice => "INVOICE",
            Self::Account => "ACCOUNT",
        }
    }
}

impl fmt::Display for ServiceNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceNamespace {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "payment" => Ok(Self::Payment),
            "invoice" => Ok(Self::Invoice),
            "account" => Ok(Self::Account),
            other => Err(format!("unknown service namespace: {other}")),
        }
    }
}

/// Identifier of the protected entity, typically an account's external key.
///
/// Always non-empty. Uniqueness of the underlying account is assumed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ResourceKey(String);

impl ResourceKey {
    pub fn new(key: impl Into<String>) -> Result<Self, LockError> {
        let key = key.into();
        if key.is_empty() {
            return Err(LockError::InvalidResourceKey);
        }
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for ResourceKey {
    type Error = LockError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<String> for ResourceKey {
    type Error = LockError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl FromStr for ResourceKey {
    type Err = LockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl<'de> Deserialize<'de> for ResourceKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::new(raw).map_err(serde::de::Error::custom)
    }
}

/// Proof of a granted lease, as handed back by a [`LockStore`](super::ports::LockStore).
///
/// The `owner` token is unique per grant, so a store can refuse to release a
/// lease that has since expired and been granted to someone else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseToken {
    pub namespace: ServiceNamespace,
    pub key: ResourceKey,
    pub owner: Uuid,
}

impl LeaseToken {
    pub fn new(namespace: ServiceNamespace, key: ResourceKey) -> Self {
        Self {
            namespace,
            key,
            owner: Uuid::new_v4(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_key_rejects_empty() {
        assert!(matches!(
            ResourceKey::new(""),
            Err(LockError::InvalidResourceKey)
        ));
        assert_eq!(ResourceKey::new("acct-123").unwrap().as_str(), "acct-123");
    }

    #[test]
    fn test_resource_key_deserialization_validates() {
        let ok: ResourceKey = serde_json::from_str("\"acct-1\"").unwrap();
        assert_eq!(ok.to_string(), "acct-1");
        assert!(serde_json::from_str::<ResourceKey>("\"\"").is_err());
    }

    #[test]
    fn test_namespace_parsing() {
        assert_eq!(
            "PAYMENT".parse::<ServiceNamespace>().unwrap(),
            ServiceNamespace::Payment
        );
        assert_eq!(
            "invoice".parse::<ServiceNamespace>().unwrap(),
            ServiceNamespace::Invoice
        );
        assert!("billing".parse::<ServiceNamespace>().is_err());
    }

    #[test]
    fn test_lease_tokens_are_unique_per_grant() {
        let key = ResourceKey::new("acct-1").unwrap();
        let a = LeaseToken::new(ServiceNamespace::Payment, key.clone());
        let b = LeaseToken::new(ServiceNamespace::Payment, key);
        assert_ne!(a.owner, b.owner);
    }
}
