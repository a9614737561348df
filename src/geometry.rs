// SPDX-License-Identifier: GPL-3.0-or-later
//! Bounding boxes tagged with the coordinate space they are measured in.
//!
//! Three spaces are in play: the raw sensor grid, the grid of the image handed to the detector,
//! and the display window. They are related by fixed per-session scale factors, and the type
//! parameter on [`BoundingBox`] keeps them from being mixed up.
use std::fmt;
use std::marker::PhantomData;

/// The raw temperature grid, one unit per sensor pixel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RawGrid {}

/// The image given to the detector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum DetectorGrid {}

/// The display window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum DisplayGrid {}

/// An axis-aligned rectangle. `right` and `bottom` are exclusive.
pub(crate) struct BoundingBox<Space> {
    pub(crate) left: f32,
    pub(crate) top: f32,
    pub(crate) right: f32,
    pub(crate) bottom: f32,
    space: PhantomData<Space>,
}

impl<Space> BoundingBox<Space> {
    pub(crate) fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
            space: PhantomData,
        }
    }

    /// Convert this box into another coordinate space.
    pub(crate) fn scale<To>(&self, scale: &GridScale<Space, To>) -> BoundingBox<To> {
        BoundingBox::new(
            self.left * scale.x,
            self.top * scale.y,
            self.right * scale.x,
            self.bottom * scale.y,
        )
    }
}

// Manual impls so that the marker types do not need to implement these traits.
impl<Space> Clone for BoundingBox<Space> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<Space> Copy for BoundingBox<Space> {}

impl<Space> PartialEq for BoundingBox<Space> {
    fn eq(&self, other: &Self) -> bool {
        self.left == other.left
            && self.top == other.top
            && self.right == other.right
            && self.bottom == other.bottom
    }
}

impl<Space> fmt::Debug for BoundingBox<Space> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundingBox")
            .field("left", &self.left)
            .field("top", &self.top)
            .field("right", &self.right)
            .field("bottom", &self.bottom)
            .field("space", &std::any::type_name::<Space>())
            .finish()
    }
}

/// Fixed scale factors from one coordinate space to another.
pub(crate) struct GridScale<Src, Dst> {
    x: f32,
    y: f32,
    spaces: PhantomData<(Src, Dst)>,
}

impl<Src, Dst> GridScale<Src, Dst> {
    /// The scale between a grid of `from` `(width, height)` and one of `to` `(width, height)`.
    pub(crate) fn between(from: (u32, u32), to: (u32, u32)) -> Self {
        Self {
            x: to.0 as f32 / from.0 as f32,
            y: to.1 as f32 / from.1 as f32,
            spaces: PhantomData,
        }
    }
}

impl<Src, Dst> Clone for GridScale<Src, Dst> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<Src, Dst> Copy for GridScale<Src, Dst> {}

impl<Src, Dst> fmt::Debug for GridScale<Src, Dst> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GridScale")
            .field("x", &self.x)
            .field("y", &self.y)
            .finish()
    }
}
