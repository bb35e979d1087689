use dashmap::DashMap;
use dooh_core::types::{CreativeType, DeviceClass, DeviceId, PartnerId};

/// Content descriptor served when no `SCHEDULED` delivery is promotable.
/// Fallback plays never produce a `Delivery` row or a billing event (§4.6).
#[derive(Debug, Clone)]
pub struct FallbackContent {
    pub url: String,
    pub format: String,
    pub media_type: CreativeType,
}

/// Resolves fallback content in the order device override → partner
/// override → device-class default (§4.6).
#[derive(Default)]
pub struct FallbackRegistry {
    device_overrides: DashMap<DeviceId, FallbackContent>,
    partner_overrides: DashMap<PartnerId, FallbackContent>,
}

impl FallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_device_override(&self, device_id: DeviceId, content: FallbackContent) {
        self.device_overrides.insert(device_id, content);
    }

    pub fn set_partner_override(&self, partner_id: PartnerId, content: FallbackContent) {
        self.partner_overrides.insert(partner_id, content);
    }

    pub fn resolve(&self, device_id: DeviceId, partner_id: PartnerId, class: DeviceClass) -> FallbackContent {
        if let Some(content) = self.device_overrides.get(&device_id) {
            return content.clone();
        }
        if let Some(content) = self.partner_overrides.get(&partner_id) {
            return content.clone();
        }
        device_class_default(class)
    }
}

fn device_class_default(class: DeviceClass) -> FallbackContent {
    match class {
        DeviceClass::InteractiveKiosk => FallbackContent {
            url: "https://cdn.dooh.internal/fallback/kiosk-default.html".into(),
            format: "html".into(),
            media_type: CreativeType::Html,
        },
        DeviceClass::AndroidTv | DeviceClass::VehicleMounted | DeviceClass::RetailDisplay => {
            FallbackContent {
                url: "https://cdn.dooh.internal/fallback/display-default.mp4".into(),
                format: "mp4".into(),
                media_type: CreativeType::Video,
            }
        }
        DeviceClass::DigitalSignage => FallbackContent {
            url: "https://cdn.dooh.internal/fallback/billboard-default.jpg".into(),
            format: "jpg".into(),
            media_type: CreativeType::Image,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn falls_through_to_device_class_default() {
        let registry = FallbackRegistry::new();
        let content = registry.resolve(Uuid::new_v4(), Uuid::new_v4(), DeviceClass::DigitalSignage);
        assert_eq!(content.media_type, CreativeType::Image);
    }

    #[test]
    fn device_override_takes_precedence() {
        let registry = FallbackRegistry::new();
        let device_id = Uuid::new_v4();
        registry.set_device_override(
            device_id,
            FallbackContent {
                url: "https://cdn.dooh.internal/special.mp4".into(),
                format: "mp4".into(),
                media_type: CreativeType::Video,
            },
        );
        let content = registry.resolve(device_id, Uuid::new_v4(), DeviceClass::DigitalSignage);
        assert_eq!(content.url, "https://cdn.dooh.internal/special.mp4");
    }
}
