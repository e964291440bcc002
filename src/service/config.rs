//! Service and endpoint configuration

use std::collections::BTreeMap;

use crate::bus::subject;
use crate::error::{Error, Result};

/// Queue group used when an endpoint doesn't name one
///
/// Every peer registering the same endpoint with the default group shares
/// it, so each request reaches exactly one of them.
pub const DEFAULT_QUEUE_GROUP: &str = "q";

/// Free-form string metadata
pub type Metadata = BTreeMap<String, String>;

/// Service definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Service name (letters, digits, `-` and `_`)
    pub name: String,
    /// Semantic version, e.g. "0.0.1"
    pub version: String,
    /// Human-readable description
    pub description: String,
    /// Service metadata
    pub metadata: Metadata,
}

impl ServiceConfig {
    /// Create a service definition
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: String::new(),
            metadata: Metadata::new(),
        }
    }

    /// Set the description
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Add a metadata entry
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        validate_name("service", &self.name)?;
        if !is_semver(&self.version) {
            return Err(Error::Registration(format!(
                "invalid version '{}' for service '{}'",
                self.version, self.name
            )));
        }
        Ok(())
    }
}

/// Endpoint definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    /// Subject (or pattern) the endpoint listens on
    pub subject: String,
    /// Queue group; `None` selects `DEFAULT_QUEUE_GROUP`
    pub queue_group: Option<String>,
    /// Endpoint metadata
    pub metadata: Metadata,
}

impl EndpointConfig {
    /// Create an endpoint definition in the default queue group
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            queue_group: None,
            metadata: Metadata::new(),
        }
    }

    /// Set the queue group
    ///
    /// Passing the service id makes the endpoint private to this peer.
    pub fn queue_group(mut self, group: impl Into<String>) -> Self {
        self.queue_group = Some(group.into());
        self
    }

    /// Set the description metadata entry
    pub fn description(self, description: impl Into<String>) -> Self {
        self.metadata("description", description)
    }

    /// Add a metadata entry
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Effective queue group
    pub fn effective_queue_group(&self) -> &str {
        self.queue_group.as_deref().unwrap_or(DEFAULT_QUEUE_GROUP)
    }

    pub(crate) fn validate(&self, endpoint: &str) -> Result<()> {
        validate_name("endpoint", endpoint)?;
        subject::validate_pattern(&self.subject)
            .map_err(|_| Error::Registration(format!("invalid subject '{}' for endpoint '{}'", self.subject, endpoint)))?;
        let group = self.effective_queue_group();
        if group.is_empty() || group.contains(char::is_whitespace) {
            return Err(Error::Registration(format!(
                "invalid queue group '{}' for endpoint '{}'",
                group, endpoint
            )));
        }
        Ok(())
    }
}

fn validate_name(kind: &str, name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(Error::Registration(format!("invalid {} name '{}'", kind, name)))
    }
}

/// Check `major.minor.patch` with optional `-pre` / `+build` suffix
fn is_semver(version: &str) -> bool {
    let core = version
        .split_once(['-', '+'])
        .map_or(version, |(core, _)| core);
    let parts: Vec<&str> = core.split('.').collect();
    parts.len() == 3
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_validation() {
        assert!(ServiceConfig::new("kubecon", "0.0.1").validate().is_ok());
        assert!(ServiceConfig::new("ai_detect", "1.2.3-beta+7").validate().is_ok());
        assert!(ServiceConfig::new("bad name", "0.0.1").validate().is_err());
        assert!(ServiceConfig::new("", "0.0.1").validate().is_err());
        assert!(ServiceConfig::new("kubecon", "1.0").validate().is_err());
        assert!(ServiceConfig::new("kubecon", "a.b.c").validate().is_err());
    }

    #[test]
    fn test_endpoint_validation() {
        assert!(EndpointConfig::new("kubecon.device_info").validate("device_info").is_ok());
        assert!(EndpointConfig::new("kubecon..x").validate("x").is_err());
        assert!(EndpointConfig::new("kubecon.x").validate("has.dot").is_err());
        assert!(EndpointConfig::new("kubecon.x")
            .queue_group("has space")
            .validate("x")
            .is_err());
    }

    #[test]
    fn test_effective_queue_group() {
        let config = EndpointConfig::new("kubecon.nickname");
        assert_eq!(config.effective_queue_group(), DEFAULT_QUEUE_GROUP);

        let config = EndpointConfig::new("kubecon.handoff").queue_group("svc-1");
        assert_eq!(config.effective_queue_group(), "svc-1");
    }

    #[test]
    fn test_builder_metadata() {
        let config = EndpointConfig::new("kubecon.quickdraw")
            .description("Pops a dialog for attendees to reply to.");
        assert_eq!(
            config.metadata.get("description").map(String::as_str),
            Some("Pops a dialog for attendees to reply to.")
        );
    }
}
