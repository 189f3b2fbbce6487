mod aabb;

pub use aabb::{Aabb, Bounds};

use crate::geom;

// The Aabb tree gets rendered down into an array of BvhNode structs
// so a backend can upload or walk it without pointer chasing
#[repr(C)]
#[derive(Clone, Copy)]
#[derive(serde::Serialize)]
#[derive(bytemuck::Pod, bytemuck::Zeroable)]
#[derive(Debug)]
pub struct BvhNode {
    pub fst: u32,
    pub snd: u32,
    pub item_idx: u32,
    pub item_count: u32,
    pub bounds: Bounds,
}

#[derive(Clone, Copy)]
#[derive(Debug, PartialEq)]
pub struct TriHit {
    pub tri: u32,
    pub t: f32,
}

// Bottom-level structure over one mesh, built on the host.
// Node 0 is the root; a child index of 0 means "no child"
#[derive(Clone, Debug, Default)]
#[derive(serde::Serialize)]
pub struct BvhData {
    pub nodes: Vec<BvhNode>,
    pub indices: Vec<u32>,
}

impl BvhData {
    pub fn new(eps: f32, tris: &[geom::CoreTri]) -> Self {
        let mut data = Self::default();

        fn into_node(data: &mut BvhData, aabb: &Aabb) -> u32 {
            let node = data.nodes.len();

            data.nodes.push(BvhNode {
                fst: 0,
                snd: 0,
                bounds: aabb.bounds,
                item_idx: data.indices.len() as u32,
                item_count: aabb.items.len() as u32,
            });

            data.indices.extend(aabb.items.iter().map(|&i| i as u32));

            if let Some(fst) = aabb.fst.get() {
                data.nodes[node].fst = into_node(data, fst);
            }

            if let Some(snd) = aabb.snd.get() {
                data.nodes[node].snd = into_node(data, snd);
            }

            node as u32
        }

        into_node(&mut data, &Aabb::new(eps, tris));

        data
    }

    // Closest triangle hit with t in (t_min, t_max)
    pub fn intersect(
        &self,
        tris: &[geom::CoreTri],
        origin: [f32; 3],
        dir: [f32; 3],
        t_min: f32,
        t_max: f32,
    ) -> Option<TriHit> {
        let mut closest: Option<TriHit> = None;
        let mut stack = vec![0u32];

        while let Some(node) = stack.pop() {
            let Some(node) = self.nodes.get(node as usize) else { continue; };

            let reach = closest.map(|hit| hit.t).unwrap_or(t_max);
            if node.bounds.hit(origin, dir, t_min, reach).is_none() {
                continue;
            }

            let items = node.item_idx as usize..(node.item_idx + node.item_count) as usize;
            for &tri in &self.indices[items] {
                let reach = closest.map(|hit| hit.t).unwrap_or(t_max);

                if let Some(t) = intersect_tri(&tris[tri as usize], origin, dir, t_min, reach) {
                    closest = Some(TriHit { tri, t });
                }
            }

            if node.fst != 0 { stack.push(node.fst); }
            if node.snd != 0 { stack.push(node.snd); }
        }

        closest
    }
}

// Möller-Trumbore
pub fn intersect_tri(
    tri: &geom::CoreTri,
    origin: [f32; 3],
    dir: [f32; 3],
    t_min: f32,
    t_max: f32,
) -> Option<f32> {
    use geom::V3Ops as _;

    let [a, b, c] = tri.vertices();

    let e1 = b.sub(a);
    let e2 = c.sub(a);

    let p = dir.cross(e2);
    let det = e1.dot(p);
    if det.abs() < 1e-8 {
        return None;
    }

    let inv = 1. / det;

    let s = origin.sub(a);
    let u = s.dot(p) * inv;
    if !(0. ..=1.).contains(&u) {
        return None;
    }

    let q = s.cross(e1);
    let v = dir.dot(q) * inv;
    if v < 0. || u + v > 1. {
        return None;
    }

    let t = e2.dot(q) * inv;

    (t > t_min && t < t_max).then_some(t)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strip(count: usize) -> Vec<geom::CoreTri> {
        (0..count).map(|i| {
            let x = i as f32 * 2.;

            geom::CoreTri::new([[x, 0., 1.], [x + 1., 0., 1.], [x, 1., 1.]], 0)
        }).collect()
    }

    #[test]
    fn every_triangle_lands_in_one_leaf() {
        let tris = strip(9);
        let data = BvhData::new(1e-4, &tris);

        let mut indices = data.indices.clone();
        indices.sort();

        assert_eq!(indices, (0..9).collect::<Vec<u32>>());
        assert!(data.nodes.len() > 1);
    }

    #[test]
    fn traversal_finds_the_closest_triangle() {
        let mut tris = strip(6);
        tris.push(geom::CoreTri::new([[8., 0., 3.], [9., 0., 3.], [8., 1., 3.]], 0));

        let data = BvhData::new(1e-4, &tris);

        let hit = data.intersect(&tris, [8.25, 0.25, 0.], [0., 0., 1.], 0., f32::MAX).unwrap();
        assert_eq!(hit, TriHit { tri: 4, t: 1. });

        assert!(data.intersect(&tris, [1.5, 0.75, 0.], [0., 0., 1.], 0., f32::MAX).is_none());
    }

    #[test]
    fn empty_mesh_has_a_root_and_no_hits() {
        let data = BvhData::new(1e-4, &[]);

        assert_eq!(data.nodes.len(), 1);
        assert!(data.intersect(&[], [0.; 3], [0., 0., 1.], 0., f32::MAX).is_none());
    }
}
