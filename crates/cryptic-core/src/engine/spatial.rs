use kiddo::{ImmutableKdTree, SquaredEuclidean};
use nalgebra::Point3;

/// A neighbor hit: index into the indexed point list and the Euclidean distance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub index: usize,
    pub distance: f64,
}

/// Fixed-radius neighbor lookup over a set of points.
///
/// Results are always returned sorted by point index so that any reduction
/// over them is independent of tree layout. The tree is built once from the
/// full point set, so any number of points may share a coordinate on an axis
/// (planar or idealized structures).
pub struct PointIndex {
    tree: Option<ImmutableKdTree<f64, 3>>,
    points: Vec<Point3<f64>>,
}

impl PointIndex {
    pub fn new(points: Vec<Point3<f64>>) -> Self {
        let coords: Vec<[f64; 3]> = points.iter().map(|p| [p.x, p.y, p.z]).collect();
        let tree = (!coords.is_empty()).then(|| ImmutableKdTree::new_from_slice(&coords));
        Self { tree, points }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    #[inline]
    pub fn point(&self, index: usize) -> &Point3<f64> {
        &self.points[index]
    }

    pub fn within(&self, center: &Point3<f64>, radius: f64) -> Vec<Neighbor> {
        let Some(tree) = &self.tree else {
            return Vec::new();
        };
        let query = [center.x, center.y, center.z];
        let mut hits: Vec<Neighbor> = tree
            .within_unsorted::<SquaredEuclidean>(&query, radius * radius)
            .into_iter()
            .map(|n| Neighbor {
                index: n.item as usize,
                distance: n.distance.sqrt(),
            })
            .collect();
        hits.sort_unstable_by_key(|n| n.index);
        hits
    }

    pub fn count_within(&self, center: &Point3<f64>, radius: f64) -> usize {
        let Some(tree) = &self.tree else {
            return 0;
        };
        let query = [center.x, center.y, center.z];
        tree.within_unsorted::<SquaredEuclidean>(&query, radius * radius)
            .len()
    }
}
