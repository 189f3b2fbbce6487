// Dirtiness of one acceleration structure, tracked as versions so that
// several observers can each tell whether they have seen the latest build
#[derive(Clone, Copy, Default)]
#[derive(Debug, PartialEq, Eq)]
pub struct Acceleration {
    version: u64,
    built: Option<u64>,
}

impl Acceleration {
    pub fn mark_dirty(&mut self) {
        self.version += 1;
    }

    pub fn mark_built(&mut self) {
        self.built = Some(self.version);
    }

    pub fn is_dirty(&self) -> bool {
        self.built != Some(self.version)
    }

    pub fn version(&self) -> u64 { self.version }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_structure_needs_a_build() {
        let mut accel = Acceleration::default();
        assert!(accel.is_dirty());

        accel.mark_built();
        assert!(!accel.is_dirty());

        accel.mark_dirty();
        accel.mark_dirty();
        assert!(accel.is_dirty());
        assert_eq!(accel.version(), 2);
    }
}
