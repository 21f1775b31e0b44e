// Queue Domain Model

use super::error::{DomainError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// AMQP short-string limit for queue names (bytes)
pub const MAX_QUEUE_NAME_BYTES: usize = 255;

/// Suffix stripped from shop hosts when deriving tenant queue names
pub const SHOP_DOMAIN_SUFFIX: &str = ".myshopify.com";

/// Validated broker queue name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QueueName(String);

impl QueueName {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();

        if name.is_empty() {
            return Err(DomainError::InvalidQueueName(
                "queue name is empty".to_string(),
            ));
        }

        if name.len() > MAX_QUEUE_NAME_BYTES {
            return Err(DomainError::InvalidQueueName(format!(
                "queue name too long: {} bytes (max {})",
                name.len(),
                MAX_QUEUE_NAME_BYTES
            )));
        }

        if name.chars().any(char::is_control) {
            return Err(DomainError::InvalidQueueName(
                "queue name contains control characters".to_string(),
            ));
        }

        Ok(Self(name))
    }

    /// Build a tenant queue name: `<prefix>.<tenant_id>.<shop>`
    ///
    /// `shop_domain` may be a full shop host; the `.myshopify.com` suffix is dropped.
    ///
    /// # Example
    /// ```text
    /// QueueName::for_tenant("Shopify", "5f1c", "acme.myshopify.com") // "Shopify.5f1c.acme"
    /// ```
    pub fn for_tenant(prefix: &str, tenant_id: &str, shop_domain: &str) -> Result<Self> {
        let shop = shop_domain
            .trim()
            .split(SHOP_DOMAIN_SUFFIX)
            .next()
            .unwrap_or_default();

        if tenant_id.trim().is_empty() {
            return Err(DomainError::InvalidQueueName("tenant id is empty".to_string()));
        }
        if shop.is_empty() {
            return Err(DomainError::InvalidQueueName(format!(
                "shop domain not usable: {:?}",
                shop_domain
            )));
        }

        Self::new(format!("{}.{}.{}", prefix, tenant_id.trim(), shop))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for QueueName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for QueueName {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl TryFrom<&str> for QueueName {
    type Error = DomainError;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

impl From<QueueName> for String {
    fn from(value: QueueName) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_empty_name() {
        assert!(matches!(
            QueueName::new(""),
            Err(DomainError::InvalidQueueName(_))
        ));
    }

    #[test]
    fn test_rejects_oversized_name() {
        let result = QueueName::new("q".repeat(MAX_QUEUE_NAME_BYTES + 1));
        assert!(result.unwrap_err().to_string().contains("too long"));
    }

    #[test]
    fn test_rejects_control_characters() {
        assert!(QueueName::new("tenant\nqueue").is_err());
    }

    #[test]
    fn test_accepts_max_length_name() {
        assert!(QueueName::new("q".repeat(MAX_QUEUE_NAME_BYTES)).is_ok());
    }

    #[test]
    fn test_tenant_name_strips_shop_suffix() {
        let queue = QueueName::for_tenant("Shopify", "5f1c", "acme.myshopify.com").unwrap();
        assert_eq!(queue.as_str(), "Shopify.5f1c.acme");

        let bare = QueueName::for_tenant("Shopify", "5f1c", "acme").unwrap();
        assert_eq!(bare, queue);
    }

    #[test]
    fn test_tenant_name_requires_shop() {
        assert!(QueueName::for_tenant("Shopify", "5f1c", ".myshopify.com").is_err());
        assert!(QueueName::for_tenant("Shopify", " ", "acme").is_err());
    }

    #[test]
    fn test_deserialize_validates() {
        let ok: std::result::Result<QueueName, _> = serde_json::from_str("\"Shopify.1.acme\"");
        assert!(ok.is_ok());

        let bad: std::result::Result<QueueName, _> = serde_json::from_str("\"\"");
        assert!(bad.is_err());
    }
}
