use crate::domain::HrSource;
use parking_lot::RwLock;
use tracing::info;

/// Runtime-switchable heart-rate source, written by the command layer and
/// read by the consumer once per drain loop.
#[derive(Debug, Default)]
pub struct HrSourceSelector {
    source: RwLock<HrSource>,
}

impl HrSourceSelector {
    pub fn new(source: HrSource) -> Self {
        Self {
            source: RwLock::new(source),
        }
    }

    pub fn get(&self) -> HrSource {
        *self.source.read()
    }

    pub fn set(&self, source: HrSource) {
        let mut current = self.source.write();
        if *current != source {
            info!(from = %*current, to = %source, "Heart-rate source changed");
            *current = source;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_set_visible_to_other_handles() {
        let selector = Arc::new(HrSourceSelector::new(HrSource::Ecg));
        let reader = selector.clone();
        assert_eq!(reader.get(), HrSource::Ecg);

        let writer = std::thread::spawn(move || selector.set(HrSource::Ppg));
        writer.join().unwrap();
        assert_eq!(reader.get(), HrSource::Ppg);
    }
}
