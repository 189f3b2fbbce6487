use once_cell::sync::OnceCell;

use crate::geom;

#[repr(C)]
#[derive(Clone, Copy)]
#[derive(bytemuck::Pod, bytemuck::Zeroable)]
#[derive(serde::Serialize)]
#[derive(Debug, PartialEq)]
pub struct Bounds {
    pub min: [f32; 3],
    #[serde(skip)]
    _p0: u32,
    pub max: [f32; 3],
    #[serde(skip)]
    _p1: u32,
}

impl Bounds {
    pub fn new<'a, T>(tris: T) -> Self
        where T: Iterator<Item = &'a geom::CoreTri> {

        let mut min = [f32::MAX; 3];
        let mut max = [f32::MAX * -1.; 3];

        for vertex in tris.flat_map(|tri| tri.vertices()) {
            use geom::V3Ops as _;

            min = min.min(vertex);
            max = max.max(vertex);
        }

        Self { min, _p0: 0, max, _p1: 0 }
    }

    fn contains(&self, point: [f32; 3]) -> bool {
        (0..3).all(|axis| (self.min[axis]..=self.max[axis]).contains(&point[axis]))
    }

    // Slab test; the entry distance when the ray overlaps [t_min, t_max]
    pub fn hit(&self, origin: [f32; 3], dir: [f32; 3], t_min: f32, t_max: f32) -> Option<f32> {
        let mut near = t_min;
        let mut far = t_max;

        for axis in 0..3 {
            let inv = 1. / dir[axis];

            let mut t0 = (self.min[axis] - origin[axis]) * inv;
            let mut t1 = (self.max[axis] - origin[axis]) * inv;

            if inv < 0. {
                std::mem::swap(&mut t0, &mut t1);
            }

            near = near.max(t0);
            far = far.min(t1);

            if far < near {
                return None;
            }
        }

        Some(near)
    }
}

#[derive(Debug)]
pub struct Aabb {
    pub fst: OnceCell<Box<Aabb>>,
    pub snd: OnceCell<Box<Aabb>>,
    pub bounds: Bounds,
    pub items: Vec<usize>,
}

impl Aabb {
    fn leaf(bounds: Bounds) -> Self {
        Self {
            fst: OnceCell::new(),
            snd: OnceCell::new(),
            bounds,
            items: Vec::new(),
        }
    }

    // Halves the longest axis until a node holds at most two triangles
    fn split(&mut self, eps: f32, tris: &[geom::CoreTri]) {
        use geom::V3Ops as _;

        if self.items.len() <= 2 {
            return;
        }

        let d = self.bounds.max.sub(self.bounds.min);

        let axis = if d[0] >= d[1] && d[0] >= d[2] {
            0
        } else if d[1] >= d[2] {
            1
        } else {
            2
        };

        if d[axis] < eps * 0.5 { return; }

        let mut fst = Self::leaf(self.bounds);
        let mut snd = Self::leaf(self.bounds);

        fst.bounds.max[axis] = self.bounds.min[axis] + d[axis] * 0.5;
        snd.bounds.min[axis] = fst.bounds.max[axis];

        let centroid = |tri: &geom::CoreTri| -> [f32; 3] {
            let [a, b, c] = tri.vertices();

            a.add(b).add(c).scale(1. / 3.)
        };

        for idx in self.items.iter().copied() {
            if fst.bounds.contains(centroid(&tris[idx])) {
                fst.items.push(idx);
            } else {
                snd.items.push(idx);
            }
        }

        if fst.items.is_empty() {
            self.bounds = snd.bounds;

            self.split(eps, tris);
        } else if snd.items.is_empty() {
            self.bounds = fst.bounds;

            self.split(eps, tris);
        } else {
            self.items.clear();

            fst.bounds = Bounds::new(fst.items.iter().map(|&i| &tris[i]));
            snd.bounds = Bounds::new(snd.items.iter().map(|&i| &tris[i]));

            fst.split(eps, tris);
            snd.split(eps, tris);

            // Both cells were empty on entry
            let _ = self.fst.set(Box::new(fst));
            let _ = self.snd.set(Box::new(snd));
        }
    }

    pub fn new(eps: f32, tris: &[geom::CoreTri]) -> Self {
        let mut root = Self::leaf(Bounds::new(tris.iter()));
        root.items = (0..tris.len()).collect();

        root.split(eps, tris);
        root
    }
}
