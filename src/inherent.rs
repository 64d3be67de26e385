//! Inherent driver capabilities.
//!
//! Every driver owns an [`Inherent`] describing who it is (prefix, vendor,
//! class specification) and which [`CapabilityGroup`]s it implements. Feature
//! code asks the [`CapabilitySet`] before issuing commands instead of relying
//! on a type hierarchy.
//!
//! The [`Instrument`] trait adds the operations common to every ASCII
//! instrument: identification, reset and status clearing.

use crate::error::{IviError, IviResult};
use crate::transport::Transport;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

// =============================================================================
// Capability Groups
// =============================================================================

/// Optional feature groups a driver may implement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityGroup {
    /// Mandatory operations of the instrument class (connect, disconnect, ...)
    Base,
    /// Single reading acquisition
    Measurement,
    /// Triggered acquisition
    Trigger,
    /// Repeated triggered acquisition
    Multipoint,
    /// Scan lists stepped through by triggers
    Scanner,
    /// Trigger issued by software command
    SoftwareTrigger,
}

impl CapabilityGroup {
    /// Human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Base => "Base",
            Self::Measurement => "Measurement",
            Self::Trigger => "Trigger",
            Self::Multipoint => "Multipoint",
            Self::Scanner => "Scanner",
            Self::SoftwareTrigger => "Software Trigger",
        }
    }
}

impl fmt::Display for CapabilityGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Set of capability groups supported by one driver.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet(BTreeSet<CapabilityGroup>);

impl CapabilitySet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a group.
    pub fn with(mut self, group: CapabilityGroup) -> Self {
        self.0.insert(group);
        self
    }

    /// Whether `group` is supported.
    pub fn supports(&self, group: CapabilityGroup) -> bool {
        self.0.contains(&group)
    }

    /// Fail with [`IviError::CapabilityNotSupported`] unless `group` is supported.
    pub fn require(&self, group: CapabilityGroup) -> IviResult<()> {
        if self.supports(group) {
            Ok(())
        } else {
            Err(IviError::CapabilityNotSupported(group.name().to_string()))
        }
    }

    /// Groups in a stable order.
    pub fn iter(&self) -> impl Iterator<Item = CapabilityGroup> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<CapabilityGroup> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = CapabilityGroup>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

// =============================================================================
// Inherent
// =============================================================================

/// Static identity and capabilities of a driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inherent {
    /// Short driver prefix (e.g. "acme_sw").
    pub prefix: String,
    /// Driver vendor.
    pub vendor: String,
    /// Free-form description.
    pub description: String,
    /// Instrument class implemented (e.g. "IviSwtch").
    pub class_spec: String,
    /// Class specification revision as `(major, minor)`.
    pub class_spec_revision: (u32, u32),
    /// Models this driver is known to work with. Empty means any.
    pub supported_models: Vec<String>,
    /// Implemented capability groups.
    pub capabilities: CapabilitySet,
}

impl Inherent {
    /// Identity with only the `Base` group.
    pub fn new(
        prefix: impl Into<String>,
        vendor: impl Into<String>,
        class_spec: impl Into<String>,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            vendor: vendor.into(),
            description: String::new(),
            class_spec: class_spec.into(),
            class_spec_revision: (1, 0),
            supported_models: Vec::new(),
            capabilities: CapabilitySet::new().with(CapabilityGroup::Base),
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Add a supported model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.supported_models.push(model.into());
        self
    }

    /// Add a capability group.
    pub fn with_capability(mut self, group: CapabilityGroup) -> Self {
        self.capabilities = self.capabilities.with(group);
        self
    }

    /// Whether `model` is in the supported list (an empty list accepts all).
    pub fn supports_model(&self, model: &str) -> bool {
        self.supported_models.is_empty()
            || self
                .supported_models
                .iter()
                .any(|m| m.eq_ignore_ascii_case(model))
    }
}

// =============================================================================
// Identification
// =============================================================================

/// Reply to `*IDN?`: `manufacturer,model,serial,firmware`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentIdentity {
    /// Manufacturer name.
    pub manufacturer: String,
    /// Model designation.
    pub model: String,
    /// Serial number, `0` when not reported.
    pub serial_number: String,
    /// Firmware revision.
    pub firmware: String,
}

impl InstrumentIdentity {
    /// Parse an `*IDN?` reply.
    pub fn parse(reply: &str) -> IviResult<Self> {
        let fields: Vec<&str> = reply.trim().split(',').map(str::trim).collect();
        match fields.as_slice() {
            [manufacturer, model, serial_number, firmware, ..] if !manufacturer.is_empty() => {
                Ok(Self {
                    manufacturer: manufacturer.to_string(),
                    model: model.to_string(),
                    serial_number: serial_number.to_string(),
                    firmware: firmware.to_string(),
                })
            }
            _ => Err(IviError::InvalidResponse {
                command: "*IDN?".into(),
                response: reply.to_string(),
            }),
        }
    }
}

/// Operations shared by every ASCII instrument driver.
#[async_trait]
pub trait Instrument: Send + Sync {
    /// Static identity and capabilities.
    fn inherent(&self) -> &Inherent;

    /// Transport used for instrument I/O.
    fn transport(&self) -> &dyn Transport;

    /// Query and parse the instrument identity.
    ///
    /// A model outside [`Inherent::supported_models`] is logged, not refused.
    async fn identify(&self) -> IviResult<InstrumentIdentity> {
        let reply = self
            .transport()
            .query("*IDN?")
            .await
            .map_err(IviError::transport)?;
        let identity = InstrumentIdentity::parse(&reply)?;
        if !self.inherent().supports_model(&identity.model) {
            tracing::warn!(
                driver = %self.inherent().prefix,
                model = %identity.model,
                "Instrument model is not in the supported list"
            );
        }
        Ok(identity)
    }

    /// Return the instrument to its power-on state.
    async fn reset(&self) -> IviResult<()> {
        self.transport()
            .command("*RST")
            .await
            .map_err(IviError::transport)
    }

    /// Clear the status registers and error queue.
    async fn clear_status(&self) -> IviResult<()> {
        self.transport()
            .command("*CLS")
            .await
            .map_err(IviError::transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_reports_missing_group() {
        let caps = CapabilitySet::new().with(CapabilityGroup::Base);
        assert!(caps.require(CapabilityGroup::Base).is_ok());
        match caps.require(CapabilityGroup::Scanner) {
            Err(IviError::CapabilityNotSupported(name)) => assert_eq!(name, "Scanner"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn capability_set_deserializes_from_snake_case() {
        let caps: CapabilitySet = serde_json::from_str(r#"["base", "software_trigger"]"#).unwrap();
        assert!(caps.supports(CapabilityGroup::SoftwareTrigger));
        assert_eq!(caps.iter().count(), 2);
    }

    #[test]
    fn parses_idn_reply() {
        let identity =
            InstrumentIdentity::parse("ACME Instruments, SW-100, 0042, 2.1.0\n").unwrap();
        assert_eq!(identity.manufacturer, "ACME Instruments");
        assert_eq!(identity.model, "SW-100");
        assert_eq!(identity.serial_number, "0042");
        assert_eq!(identity.firmware, "2.1.0");

        assert!(InstrumentIdentity::parse("garbage").is_err());
    }

    #[test]
    fn model_matching_ignores_case() {
        let inherent = Inherent::new("acme_sw", "ACME", "IviSwtch").with_model("SW-100");
        assert!(inherent.supports_model("sw-100"));
        assert!(!inherent.supports_model("SW-200"));
        assert!(Inherent::new("any", "ACME", "IviSwtch").supports_model("whatever"));
    }
}
