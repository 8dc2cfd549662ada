/// An axis-aligned bounding box around one connected foreground blob.
///
/// `area` is the scalar that decided whether the blob survived the
/// noise floor; it is not necessarily `width * height`.
#[derive(Clone, Debug, PartialEq)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub area: f64,
}

impl Region {
    pub fn new(x: i32, y: i32, width: i32, height: i32, area: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
            area,
        }
    }

    /// Exclusive right edge.
    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    /// Exclusive bottom edge.
    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }

    pub fn same_bounds(&self, other: &Region) -> bool {
        self.x == other.x
            && self.y == other.y
            && self.width == other.width
            && self.height == other.height
    }

    pub fn intersects(&self, other: &Region) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }
}
