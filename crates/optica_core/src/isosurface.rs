//! Iso-surface extraction from a scalar grid.
//!
//! Each cell is handled on its own. The six cell faces are cut into directed
//! segments between sign changes, and the segments are chained into closed
//! loops that get triangulated. Vertices on shared edges are reused so the
//! result is watertight across cells.

use optica_math::DVec3;

use crate::mesh::Mesh;

/// Corners of each cell face, counter-clockwise seen from outside the cell.
///
/// Corner `c` sits at `(c & 1, (c >> 1) & 1, (c >> 2) & 1)`.
const FACES: [[usize; 4]; 6] = [
    [0, 4, 6, 2],
    [1, 3, 7, 5],
    [0, 1, 5, 4],
    [2, 6, 7, 3],
    [0, 2, 3, 1],
    [4, 5, 7, 6],
];

const NO_EDGE: u8 = u8::MAX;

const LEVEL_TOLERANCE: f64 = 1e-12;

// Local edge id in 0..12: axis * 4 plus the two remaining corner bits.
fn local_edge(a: usize, b: usize) -> usize {
    let lo = a.min(b);
    let axis = (a ^ b).trailing_zeros() as usize;
    let rest = match axis {
        0 => lo >> 1,
        1 => (lo & 1) | ((lo >> 2) << 1),
        _ => lo & 3,
    };
    axis * 4 + rest
}

// Lower corner and axis of a local edge.
fn edge_origin(edge: usize) -> (usize, usize) {
    let axis = edge / 4;
    let rest = edge % 4;
    let lo = match axis {
        0 => rest << 1,
        1 => (rest & 1) | ((rest >> 1) << 2),
        _ => rest,
    };
    (lo, axis)
}

// Bit set of the two cell faces containing a local edge, indexed like `FACES`.
fn edge_faces(edge: usize) -> u8 {
    let (lo, axis) = edge_origin(edge);
    (0..3)
        .filter(|&a| a != axis)
        .fold(0, |set, a| set | 1 << (a * 2 + ((lo >> a) & 1)))
}

// Trilinear value and gradient at `p` in unit cell coordinates.
fn trilinear(values: &[f64; 8], p: DVec3) -> (f64, DVec3) {
    let mut value = 0.0;
    let mut gradient = DVec3::ZERO;
    for (c, &v) in values.iter().enumerate() {
        let high = |axis: usize| (c >> axis) & 1 == 1;
        let w = |axis: usize| if high(axis) { p[axis] } else { 1.0 - p[axis] };
        let dw = |axis: usize| if high(axis) { 1.0 } else { -1.0 };
        let (wx, wy, wz) = (w(0), w(1), w(2));
        value += v * wx * wy * wz;
        gradient += v * DVec3::new(dw(0) * wy * wz, wx * dw(1) * wz, wx * wy * dw(2));
    }
    (value, gradient)
}

/// Move a point of the unit cell onto the threshold level of the trilinear
/// field, staying inside the cell.
///
/// Newton steps along the gradient go first. If they stall, the segment
/// towards the nearest corner on the other side of the level is bisected.
fn onto_level(values: &[f64; 8], threshold: f64, mut p: DVec3) -> DVec3 {
    for _ in 0..8 {
        let (value, gradient) = trilinear(values, p);
        let residual = value - threshold;
        let norm = gradient.length_squared();
        if residual.abs() < LEVEL_TOLERANCE || norm < 1e-24 {
            break;
        }
        p = (p - gradient * (residual / norm)).clamp(DVec3::ZERO, DVec3::ONE);
    }

    let residual = trilinear(values, p).0 - threshold;
    if residual.abs() < LEVEL_TOLERANCE {
        return p;
    }
    let corner = (0..8)
        .filter(|&c| (values[c] - threshold) * residual <= 0.0)
        .map(|c| DVec3::new((c & 1) as f64, ((c >> 1) & 1) as f64, ((c >> 2) & 1) as f64))
        .min_by(|a, b| a.distance_squared(p).total_cmp(&b.distance_squared(p)));
    let Some(corner) = corner else {
        return p;
    };
    let (mut near, mut far) = (p, corner);
    for _ in 0..60 {
        let mid = (near + far) * 0.5;
        if (trilinear(values, mid).0 - threshold) * residual > 0.0 {
            near = mid;
        } else {
            far = mid;
        }
    }
    (near + far) * 0.5
}

struct Extractor<'a, T> {
    field: &'a [T],
    dims: [usize; 3],
    threshold: f64,
    positions: Vec<DVec3>,
    indices: Vec<u32>,
    // Vertex per grid point and axis, u32::MAX where none was created yet
    edge_vertices: [Vec<u32>; 3],
}

impl<T: Copy + Into<f64>> Extractor<'_, T> {
    fn point_index(&self, p: [usize; 3]) -> usize {
        (p[2] * self.dims[1] + p[1]) * self.dims[0] + p[0]
    }

    fn value(&self, p: [usize; 3]) -> f64 {
        self.field[self.point_index(p)].into()
    }

    fn vertex(&mut self, cell: [usize; 3], edge: usize) -> u32 {
        let (lo, axis) = edge_origin(edge);
        let a = [
            cell[0] + (lo & 1),
            cell[1] + ((lo >> 1) & 1),
            cell[2] + ((lo >> 2) & 1),
        ];
        let key = self.point_index(a);
        let cached = self.edge_vertices[axis][key];
        if cached != u32::MAX {
            return cached;
        }

        let mut b = a;
        b[axis] += 1;
        let va = self.value(a);
        let vb = self.value(b);
        let t = ((self.threshold - va) / (vb - va)).clamp(0.0, 1.0);
        let mut position = DVec3::new(a[0] as f64, a[1] as f64, a[2] as f64);
        position[axis] += t;

        let index = self.positions.len() as u32;
        self.positions.push(position);
        self.edge_vertices[axis][key] = index;
        index
    }

    fn cell(&mut self, cell: [usize; 3]) {
        let mut values = [0.0f64; 8];
        let mut mask = 0u8;
        for (c, value) in values.iter_mut().enumerate() {
            *value = self.value([
                cell[0] + (c & 1),
                cell[1] + ((c >> 1) & 1),
                cell[2] + ((c >> 2) & 1),
            ]);
            if *value < self.threshold {
                mask |= 1 << c;
            }
        }
        if mask == 0 || mask == u8::MAX {
            return;
        }
        let inside = |c: usize| mask & (1 << c) != 0;

        // Successor of each crossing edge along its loop
        let mut next = [NO_EDGE; 12];
        for face in FACES {
            // (edge, leaves the inside region) in face order
            let mut crossings = [(0usize, false); 4];
            let mut count = 0;
            for i in 0..4 {
                let a = face[i];
                let b = face[(i + 1) % 4];
                if inside(a) != inside(b) {
                    crossings[count] = (local_edge(a, b), inside(a));
                    count += 1;
                }
            }
            match count {
                2 => {
                    let (exit, entry) = if crossings[0].1 {
                        (crossings[0].0, crossings[1].0)
                    } else {
                        (crossings[1].0, crossings[0].0)
                    };
                    next[exit] = entry as u8;
                }
                4 => {
                    if !crossings[0].1 {
                        crossings.rotate_left(1);
                    }
                    let [(x0, _), (n0, _), (x1, _), (n1, _)] = crossings;
                    let centre = face.iter().map(|&c| values[c]).sum::<f64>() * 0.25;
                    if centre < self.threshold {
                        // Outside corners are cut off one by one
                        next[x0] = n0 as u8;
                        next[x1] = n1 as u8;
                    } else {
                        // Inside corners are cut off one by one
                        next[x0] = n1 as u8;
                        next[x1] = n0 as u8;
                    }
                }
                _ => {}
            }
        }

        let mut visited = [false; 12];
        let mut ring: Vec<(usize, u32)> = Vec::with_capacity(12);
        for start in 0..12 {
            if next[start] == NO_EDGE || visited[start] {
                continue;
            }
            ring.clear();
            let mut edge = start;
            while !visited[edge] && next[edge] != NO_EDGE {
                visited[edge] = true;
                ring.push((edge, self.vertex(cell, edge)));
                edge = next[edge] as usize;
            }
            if ring.len() < 3 {
                log::debug!("Open iso-surface loop in cell {:?}", cell);
                continue;
            }
            self.triangulate(cell, &values, &ring);
        }
    }

    /// Triangles of a closed loop, wound so normals point towards values
    /// above the threshold.
    ///
    /// A fan is used when some start vertex gives chords that stay off the
    /// cell faces; otherwise the loop is fanned around its centroid, moved
    /// onto the level. Chords on a face would not be matched by the
    /// neighbouring cell.
    fn triangulate(&mut self, cell: [usize; 3], values: &[f64; 8], ring: &[(usize, u32)]) {
        let n = ring.len();
        let start = (0..n).find(|&s| {
            (2..n - 1).all(|k| edge_faces(ring[s].0) & edge_faces(ring[(s + k) % n].0) == 0)
        });
        match start {
            Some(s) => {
                let v = |k: usize| ring[(s + k) % n].1;
                for k in 1..n - 1 {
                    self.indices.extend_from_slice(&[v(0), v(k + 1), v(k)]);
                }
            }
            None => {
                let origin = DVec3::new(cell[0] as f64, cell[1] as f64, cell[2] as f64);
                let centroid = ring
                    .iter()
                    .map(|&(_, v)| self.positions[v as usize] - origin)
                    .sum::<DVec3>()
                    / n as f64;
                let c = self.positions.len() as u32;
                self.positions
                    .push(origin + onto_level(values, self.threshold, centroid));
                for k in 0..n {
                    self.indices
                        .extend_from_slice(&[c, ring[(k + 1) % n].1, ring[k].1]);
                }
            }
        }
    }
}

/// Triangulate the level set `field == threshold` of a `width x height x depth`
/// grid, x fastest.
///
/// Vertices are in grid-point coordinates, `(0, 0, 0)` to
/// `(width - 1, height - 1, depth - 1)`. Values below the threshold are inside;
/// triangle normals point outwards.
pub fn volume_to_mesh<T: Copy + Into<f64>>(
    field: &[T],
    width: usize,
    height: usize,
    depth: usize,
    threshold: f64,
) -> Mesh {
    let len = width * height * depth;
    if field.len() < len {
        log::warn!(
            "Field has {} values, expected {} for {}x{}x{}",
            field.len(),
            len,
            width,
            height,
            depth
        );
        return Mesh::default();
    }

    let mut extractor = Extractor {
        field,
        dims: [width, height, depth],
        threshold,
        positions: Vec::new(),
        indices: Vec::new(),
        edge_vertices: [vec![u32::MAX; len], vec![u32::MAX; len], vec![u32::MAX; len]],
    };

    for z in 0..depth.saturating_sub(1) {
        for y in 0..height.saturating_sub(1) {
            for x in 0..width.saturating_sub(1) {
                extractor.cell([x, y, z]);
            }
        }
    }

    Mesh::new(extractor.positions, extractor.indices, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corner_field(pattern: u8) -> Vec<f64> {
        (0..8)
            .map(|c| if pattern & (1 << c) != 0 { -1.0 } else { 1.0 })
            .collect()
    }

    #[test]
    fn test_local_edges_roundtrip() {
        let mut seen = [false; 12];
        for a in 0..8 {
            for axis in 0..3 {
                let b = a | (1 << axis);
                if b == a {
                    continue;
                }
                let edge = local_edge(a, b);
                assert_eq!(local_edge(b, a), edge);
                assert_eq!(edge_origin(edge), (a, axis));
                seen[edge] = true;
            }
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn test_single_corner_emits_one_triangle() {
        for corner in 0..8 {
            let mut field = vec![10.0; 8];
            field[corner] = -10.0;
            let mesh = volume_to_mesh(&field, 2, 2, 2, 0.0);
            assert_eq!(mesh.indices.len(), 3, "corner {}", corner);
            assert_eq!(mesh.positions.len(), 3, "corner {}", corner);

            // Vertices halfway along the edges at the corner, normal facing away from it
            let c = DVec3::new(
                (corner & 1) as f64,
                ((corner >> 1) & 1) as f64,
                ((corner >> 2) & 1) as f64,
            );
            for p in &mesh.positions {
                assert!((p.distance(c) - 0.5).abs() < 1e-12);
            }
            let [a, b, d] = [0, 1, 2].map(|i| mesh.positions[mesh.indices[i] as usize]);
            let normal = (b - a).cross(d - a);
            assert!(normal.dot(a - c) > 0.0, "corner {}", corner);
        }
    }

    #[test]
    fn test_all_sign_patterns() {
        for pattern in 0..=255u8 {
            let field = corner_field(pattern);
            let mesh = volume_to_mesh(&field, 2, 2, 2, 0.0);
            assert_eq!(mesh.indices.len() % 3, 0);
            assert!(mesh
                .indices
                .iter()
                .all(|&i| (i as usize) < mesh.positions.len()));

            // One vertex per edge with a sign change
            let mut crossings = 0;
            for a in 0..8 {
                for axis in 0..3 {
                    let b = a | (1 << axis);
                    if b != a && (field[a] < 0.0) != (field[b] < 0.0) {
                        crossings += 1;
                    }
                }
            }
            assert_eq!(mesh.positions.len(), crossings, "pattern {:#010b}", pattern);
            if crossings > 0 {
                assert!(mesh.triangle_count() >= 1);
            }
            for p in &mesh.positions {
                assert!(p.min_element() >= 0.0 && p.max_element() <= 1.0);
            }
        }
    }

    #[test]
    fn test_vertices_on_trilinear_level() {
        let field = [0.3f32, -0.2, 0.7, 0.1, -0.5, 0.4, 0.9, -0.8];
        let mesh = volume_to_mesh(&field, 2, 2, 2, 0.0);
        for p in &mesh.positions {
            let v = |c: usize| field[c] as f64;
            let lerp = |a: f64, b: f64, t: f64| a + (b - a) * t;
            let x0 = lerp(v(0), v(1), p.x);
            let x1 = lerp(v(2), v(3), p.x);
            let x2 = lerp(v(4), v(5), p.x);
            let x3 = lerp(v(6), v(7), p.x);
            let value = lerp(lerp(x0, x1, p.y), lerp(x2, x3, p.y), p.z);
            assert!(value.abs() < 1e-6, "{:?} -> {}", p, value);
        }
    }

    #[test]
    fn test_random_fields_stay_on_level() {
        use rand::{Rng, SeedableRng};

        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        let mut fans = 0;
        for _ in 0..1000 {
            let mut values = [0.0f64; 8];
            for v in values.iter_mut() {
                *v = rng.gen_range(-1.0..1.0);
            }
            let mesh = volume_to_mesh(&values, 2, 2, 2, 0.0);
            let crossings = (0..12)
                .filter(|&edge| {
                    let (lo, axis) = edge_origin(edge);
                    (values[lo] < 0.0) != (values[lo | (1 << axis)] < 0.0)
                })
                .count();
            fans += mesh.positions.len() - crossings;
            for p in &mesh.positions {
                assert!(p.min_element() >= 0.0 && p.max_element() <= 1.0);
                let value = trilinear(&values, *p).0;
                assert!(value.abs() < 1e-6, "{:?} in {:?} -> {}", p, values, value);
            }
        }
        // Some loops needed a centre vertex
        assert!(fans > 0);
    }

    #[test]
    fn test_onto_level_from_off_level_point() {
        let values = [0.3, -0.2, 0.7, 0.1, -0.5, 0.4, 0.9, -0.8];
        let p = onto_level(&values, 0.0, DVec3::new(0.6317, 0.3730, 0.5355));
        assert!(trilinear(&values, p).0.abs() < 1e-9);
        assert!(p.min_element() >= 0.0 && p.max_element() <= 1.0);

        // Corners keep their values
        for (c, &v) in values.iter().enumerate() {
            let corner = DVec3::new((c & 1) as f64, ((c >> 1) & 1) as f64, ((c >> 2) & 1) as f64);
            assert!((trilinear(&values, corner).0 - v).abs() < 1e-12);
        }
    }

    #[test]
    fn test_sphere_surface() {
        let n = 20;
        let centre = DVec3::splat(9.5);
        let radius = 6.0;
        let mut field = Vec::with_capacity(n * n * n);
        for z in 0..n {
            for y in 0..n {
                for x in 0..n {
                    field.push(DVec3::new(x as f64, y as f64, z as f64).distance(centre));
                }
            }
        }
        let mesh = volume_to_mesh(&field, n, n, n, radius);
        assert!(mesh.triangle_count() > 100);
        for p in &mesh.positions {
            assert!((p.distance(centre) - radius).abs() < 0.05);
        }
        for face in 0..mesh.triangle_count() {
            let [a, b, c] = mesh.triangle(face).unwrap();
            let normal = (b - a).cross(c - a);
            assert!(normal.dot(a - centre) > 0.0);
        }

        // Closed surface: every edge is shared by exactly two triangles
        let mut edges = std::collections::HashMap::new();
        for tri in mesh.indices.chunks(3) {
            for k in 0..3 {
                let (a, b) = (tri[k], tri[(k + 1) % 3]);
                *edges.entry((a.min(b), a.max(b))).or_insert(0) += 1;
            }
        }
        assert!(edges.values().all(|&count| count == 2));
    }

    #[test]
    fn test_noise_field_is_manifold() {
        use rand::{Rng, SeedableRng};

        let n = 6;
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        for _ in 0..10 {
            let field: Vec<f64> = (0..n * n * n).map(|_| rng.gen_range(-1.0..1.0)).collect();
            let mesh = volume_to_mesh(&field, n, n, n, 0.0);

            let mut edges = std::collections::HashMap::new();
            for tri in mesh.indices.chunks(3) {
                for k in 0..3 {
                    let (a, b) = (tri[k], tri[(k + 1) % 3]);
                    *edges.entry((a.min(b), a.max(b))).or_insert(0) += 1;
                }
            }
            let limit = (n - 1) as f64;
            for (&(a, b), &count) in &edges {
                if count == 2 {
                    continue;
                }
                // Open edges only on the grid border
                let (pa, pb) = (mesh.positions[a as usize], mesh.positions[b as usize]);
                let on_border = (0..3).any(|axis| {
                    (pa[axis] == 0.0 && pb[axis] == 0.0) || (pa[axis] == limit && pb[axis] == limit)
                });
                assert!(count == 1 && on_border, "{:?} {:?} used {} times", pa, pb, count);
            }
        }
    }

    #[test]
    fn test_short_field_is_rejected() {
        let mesh = volume_to_mesh(&[0.0f64; 4], 2, 2, 2, 0.5);
        assert_eq!(mesh.triangle_count(), 0);
    }
}
