use ash::vk;

pub struct Queue {
    pub family: QueueFamily,
    pub handle: vk::Queue,
}

impl Queue {
    pub fn new(
        family: QueueFamily,
        handle: vk::Queue,
    ) -> Self {
        Self {
            family,
            handle,
        }
    }
}

#[derive(Clone)]
pub struct QueueFamily {
    pub index: u32,
    pub properties: vk::QueueFamilyProperties,
}

impl QueueFamily {
    pub fn new(
        index: u32,
        properties: vk::QueueFamilyProperties,
    ) -> Self {
        Self {
            index,
            properties,
        }
    }

    pub fn supports_graphics(&self) -> bool {
        self.properties.queue_flags.contains(vk::QueueFlags::GRAPHICS)
    }

    pub fn supports_compute(&self) -> bool {
        self.properties.queue_flags.contains(vk::QueueFlags::COMPUTE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_reports_capabilities_from_flags() {
        let properties = vk::QueueFamilyProperties::default()
            .queue_flags(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER);
        let family = QueueFamily::new(0, properties);
        assert!(family.supports_graphics());
        assert!(!family.supports_compute());
    }
}
