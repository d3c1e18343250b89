/// Axis-aligned bounding box in `[x, y]` order (lon/lat for geographic data).
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Aabb2 {
    pub min: [f64; 2],
    pub max: [f64; 2],
}

impl Aabb2 {
    pub fn new(min: [f64; 2], max: [f64; 2]) -> Self {
        Aabb2 { min, max }
    }

    pub fn from_point(x: f64, y: f64) -> Self {
        Aabb2::new([x, y], [x, y])
    }

    pub fn extend(&mut self, x: f64, y: f64) {
        self.min[0] = self.min[0].min(x);
        self.min[1] = self.min[1].min(y);
        self.max[0] = self.max[0].max(x);
        self.max[1] = self.max[1].max(y);
    }

    pub fn union(&self, other: &Aabb2) -> Aabb2 {
        let mut out = *self;
        out.extend(other.min[0], other.min[1]);
        out.extend(other.max[0], other.max[1]);
        out
    }

    pub fn center(&self) -> [f64; 2] {
        [
            0.5 * (self.min[0] + self.max[0]),
            0.5 * (self.min[1] + self.max[1]),
        ]
    }

    pub fn width(&self) -> f64 {
        self.max[0] - self.min[0]
    }

    pub fn height(&self) -> f64 {
        self.max[1] - self.min[1]
    }

    /// `[min_x, min_y, max_x, max_y]`, the layout GeoJSON and GeoParquet use.
    pub fn to_array(&self) -> [f64; 4] {
        [self.min[0], self.min[1], self.max[0], self.max[1]]
    }
}

/// Folds an iterator of boxes into one; `None` when the iterator is empty.
pub fn union_all(boxes: impl IntoIterator<Item = Aabb2>) -> Option<Aabb2> {
    boxes.into_iter().reduce(|acc, b| acc.union(&b))
}
