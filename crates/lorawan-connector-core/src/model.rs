//! Upstream platform model: identities and the device registry view.

use serde::{Deserialize, Serialize};

/// Attribute marking a device type as owned by this connector.
pub const MANAGED_BY_KEY: &str = "senergy/managed-by";
pub const MANAGED_BY_VALUE: &str = "lorawan-platform-connector";

/// Device-type attribute naming the control-plane device profile.
pub const DEVICE_PROFILE_ID_KEY: &str = "senergy/lora/device-profile-id";

/// Device attributes carrying LoRaWAN settings.
pub mod attributes {
    pub const JOIN_EUI: &str = "senergy/lora/join-eui";
    pub const DEV_ADDR: &str = "senergy/lora/dev-addr";
    // Session keys keep the names the device registry already stores.
    pub const APP_S_KEY: &str = "senergy/lora/app-key";
    pub const NWK_S_ENC_KEY: &str = "senergy/lora/nwk-enc-key";
    pub const S_NWK_S_INT_KEY: &str = "senergy/lora/s-nwk-int-key";
    pub const F_NWK_S_INT_KEY: &str = "senergy/lora/f-nwk-int-key";
    pub const APP_KEY: &str = "senergy/lora/root-app-key";
    pub const GEN_APP_KEY: &str = "senergy/lora/gen-app-key";
    pub const NWK_KEY: &str = "senergy/lora/nwk-key";
}

/// An upstream user account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl Identity {
    /// Email, treating an empty string like a missing one.
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref().filter(|e| !e.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub key: String,
    #[serde(default)]
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

impl Attribute {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            origin: None,
        }
    }
}

/// Lookup of the first attribute value for `key`.
pub fn attribute_value<'a>(attributes: &'a [Attribute], key: &str) -> Option<&'a str> {
    attributes
        .iter()
        .find(|a| a.key == key)
        .map(|a| a.value.as_str())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceType {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
}

impl DeviceType {
    pub fn is_managed(&self) -> bool {
        self.attributes
            .iter()
            .any(|a| a.key == MANAGED_BY_KEY && a.value == MANAGED_BY_VALUE)
    }

    pub fn device_profile_id(&self) -> Option<&str> {
        attribute_value(&self.attributes, DEVICE_PROFILE_ID_KEY).filter(|v| !v.is_empty())
    }
}

/// A registry device together with its (optionally expanded) device type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedDevice {
    pub id: String,
    /// Device EUI on the network side.
    #[serde(default)]
    pub local_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub owner_id: String,
    #[serde(default)]
    pub device_type_id: String,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
    #[serde(default)]
    pub device_type: Option<DeviceType>,
}

impl ManagedDevice {
    /// Display name when set, otherwise the plain name.
    pub fn effective_name(&self) -> &str {
        match self.display_name.as_deref() {
            Some(n) if !n.is_empty() => n,
            _ => &self.name,
        }
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        attribute_value(&self.attributes, key)
    }

    pub fn is_managed(&self) -> bool {
        self.device_type.as_ref().is_some_and(DeviceType::is_managed)
    }
}

/// Attribute filter for device-type listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeFilter {
    pub key: String,
    pub value: String,
}

impl AttributeFilter {
    /// Filter selecting device types owned by this connector.
    pub fn managed() -> Self {
        Self {
            key: MANAGED_BY_KEY.to_string(),
            value: MANAGED_BY_VALUE.to_string(),
        }
    }
}
