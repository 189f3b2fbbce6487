use crate::geom::V3Ops as _;

// The camera as the host renderer hands it over: an eye position plus
// three corners of the virtual screen (top-left, top-right, bottom-left)
#[derive(Clone, Copy)]
#[derive(serde::Serialize)]
#[derive(Debug, PartialEq)]
pub struct ViewPyramid {
    pub pos: [f32; 3],
    pub p1: [f32; 3],
    pub p2: [f32; 3],
    pub p3: [f32; 3],
    pub aperture: f32,
    pub spread_angle: f32,
}

impl ViewPyramid {
    // Pinhole camera looking from `pos` towards `at` with vertical fov in radians
    pub fn look_at(pos: [f32; 3], at: [f32; 3], fov: f32, (width, height): (u32, u32)) -> Self {
        let forward = at.sub(pos).normalize();

        // Looking straight up or down leaves the world up axis useless
        let mut right = forward.cross([0., 1., 0.]).normalize();
        if right.mag() == 0. {
            right = [1., 0., 0.];
        }

        let up = right.cross(forward);

        let half_height = (fov * 0.5).tan();
        let half_width = half_height * width as f32 / height.max(1) as f32;

        let center = pos.add(forward);
        let right = right.scale(half_width);
        let up = up.scale(half_height);

        Self {
            pos,
            p1: center.sub(right).add(up),
            p2: center.add(right).add(up),
            p3: center.sub(right).sub(up),
            aperture: 0.,
            spread_angle: 2. * half_height / height.max(1) as f32,
        }
    }

    pub fn right(&self) -> [f32; 3] { self.p2.sub(self.p1) }

    pub fn up(&self) -> [f32; 3] { self.p3.sub(self.p1) }

    // Kernels take the eye position and lens size packed together
    pub fn pos_lens_size(&self) -> [f32; 4] {
        let [x, y, z] = self.pos;

        [x, y, z, self.aperture]
    }

    // Point on the virtual screen for normalized coordinates in [0, 1]
    pub fn screen_point(&self, u: f32, v: f32) -> [f32; 3] {
        self.p1.add(self.right().scale(u)).add(self.up().scale(v))
    }
}

impl<'de> serde::Deserialize<'de> for ViewPyramid {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
        where D: serde::Deserializer<'de> {

        #[derive(serde::Deserialize)]
        struct Intermediate {
            pos: Vec<f32>,
            p1: Vec<f32>,
            p2: Vec<f32>,
            p3: Vec<f32>,
            #[serde(default)]
            aperture: f32,
            #[serde(default)]
            spread_angle: f32,
        }

        fn triplet<E: serde::de::Error>(v: Vec<f32>) -> Result<[f32; 3], E> {
            match v.len() {
                3 => Ok([v[0], v[1], v[2]]),
                len => Err(E::invalid_length(len, &"an array of len 3")),
            }
        }

        let Intermediate {
            pos, p1, p2, p3, aperture, spread_angle,
        } = Intermediate::deserialize(deserializer)?;

        Ok(Self {
            pos: triplet(pos)?,
            p1: triplet(p1)?,
            p2: triplet(p2)?,
            p3: triplet(p3)?,
            aperture,
            spread_angle,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::V3Ops as _;

    fn close(a: [f32; 3], b: [f32; 3]) -> bool {
        a.dist(b) < 1e-5
    }

    #[test]
    fn corners_span_the_screen() {
        let view = ViewPyramid::look_at([0., 0., 0.], [0., 0., -1.], std::f32::consts::FRAC_PI_2, (2, 2));

        assert!(close(view.p1, [-1., 1., -1.]));
        assert!(close(view.right(), [2., 0., 0.]));
        assert!(close(view.up(), [0., -2., 0.]));
        assert!(close(view.screen_point(0.5, 0.5), [0., 0., -1.]));
    }

    #[test]
    fn deserialize_checks_lengths() {
        let json = r#"{ "pos": [0, 0, 0], "p1": [0, 1, 1], "p2": [1, 1, 1], "p3": [0, 0, 1] }"#;

        let view: ViewPyramid = serde_json::from_str(json).unwrap();
        assert_eq!(view.right(), [1., 0., 0.]);
        assert_eq!(view.aperture, 0.);

        let bad = r#"{ "pos": [0, 0], "p1": [0, 1, 1], "p2": [1, 1, 1], "p3": [0, 0, 1] }"#;
        assert!(serde_json::from_str::<ViewPyramid>(bad).is_err());
    }
}
