use parking_lot::Mutex;

/// Serial ports seen by the last discovery poll.
#[derive(Debug, Default)]
pub struct PortRegistry {
    ports: Mutex<Vec<String>>,
}

impl PortRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the list; returns `true` if it changed.
    pub fn update(&self, mut ports: Vec<String>) -> bool {
        ports.sort();
        ports.dedup();
        let mut current = self.ports.lock();
        if *current == ports {
            return false;
        }
        *current = ports;
        true
    }

    pub fn ports(&self) -> Vec<String> {
        self.ports.lock().clone()
    }

    pub fn first(&self) -> Option<String> {
        self.ports.lock().first().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_changes_only() {
        let registry = PortRegistry::new();
        assert!(registry.update(vec!["/dev/ttyUSB1".into(), "/dev/ttyACM0".into()]));
        assert!(!registry.update(vec!["/dev/ttyACM0".into(), "/dev/ttyUSB1".into()]));
        assert_eq!(registry.first().as_deref(), Some("/dev/ttyACM0"));
        assert!(registry.update(Vec::new()));
        assert!(registry.ports().is_empty());
    }
}
