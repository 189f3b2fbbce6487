// Scalars the host renderer may tweak by name between frames
#[derive(Clone, Copy)]
#[derive(Debug, PartialEq)]
#[derive(serde::Serialize)]
pub struct Settings {
    pub geometry_epsilon: f32,
    pub clamp_value: f32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            geometry_epsilon: 1e-4,
            clamp_value: 10.,
        }
    }
}

impl Settings {
    // Returns true only when a recognized value actually changed,
    // so callers republish kernel symbols at most once per change
    pub fn apply(&mut self, name: &str, value: f32) -> bool {
        let slot = match name {
            "epsilon" => &mut self.geometry_epsilon,
            "clampValue" => &mut self.clamp_value,
            _ => {
                log::debug!("ignoring unknown setting `{}`", name);
                return false;
            },
        };

        if slot.to_bits() == value.to_bits() {
            return false;
        }

        *slot = value;

        true
    }
}
