// Vectors crossing into kernel-facing records stay plain arrays,
// so they remain Pod without any wrapper. The ops live on a trait
// that only needs to be imported where the math happens.
pub type V3<T> = [T; 3];

pub trait V3Ops {
    type Ty: Default + num_traits::real::Real;

    fn add(self, b: Self) -> Self;
    fn sub(self, b: Self) -> Self;
    fn cross(self, b: Self) -> Self;
    fn dot(self, b: Self) -> Self::Ty;
    fn scale(self, s: Self::Ty) -> Self;
    fn mag(self) -> Self::Ty;
    fn normalize(self) -> Self;
    fn dist(self, b: Self) -> Self::Ty;
    fn min(self, b: Self) -> Self;
    fn max(self, b: Self) -> Self;
}

impl<T: Default + num_traits::real::Real> V3Ops for V3<T> {
    type Ty = T;

    fn add(self, b: Self) -> Self {
        [self[0] + b[0], self[1] + b[1], self[2] + b[2]]
    }

    fn sub(self, b: Self) -> Self {
        [self[0] - b[0], self[1] - b[1], self[2] - b[2]]
    }

    fn cross(self, b: Self) -> Self {
        [
            self[1] * b[2] - self[2] * b[1],
            self[2] * b[0] - self[0] * b[2],
            self[0] * b[1] - self[1] * b[0],
        ]
    }

    fn dot(self, b: Self) -> Self::Ty {
        self.into_iter()
            .zip(b)
            .fold(Self::Ty::default(), |dot, (a, b)| dot + a * b)
    }

    fn scale(self, s: Self::Ty) -> Self {
        self.map(|c| c * s)
    }

    fn mag(self) -> Self::Ty {
        self.dot(self).sqrt()
    }

    // A zero vector stays zero instead of turning into NaNs
    fn normalize(self) -> Self {
        let mag = self.mag();

        if mag == Self::Ty::default() { self } else { self.scale(mag.recip()) }
    }

    fn dist(self, b: Self) -> Self::Ty {
        self.sub(b).mag()
    }

    fn min(self, b: Self) -> Self {
        [self[0].min(b[0]), self[1].min(b[1]), self[2].min(b[2])]
    }

    fn max(self, b: Self) -> Self {
        [self[0].max(b[0]), self[1].max(b[1]), self[2].max(b[2])]
    }
}
