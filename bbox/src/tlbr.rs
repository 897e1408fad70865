use super::{Rect, HW};
use crate::{common::*, Transform};

/// Bounding box in TLBR format.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TLBR<T> {
    pub(crate) t: T,
    pub(crate) l: T,
    pub(crate) b: T,
    pub(crate) r: T,
}

impl<T> TLBR<T> {
    /// Build a box from corners as they are written in annotation files.
    ///
    /// Unlike [Rect::try_from_tlbr], the corner order is not checked, so
    /// `b < t` or `r < l` are preserved as-is.
    pub fn from_tlbr_raw(tlbr: [T; 4]) -> Self {
        let [t, l, b, r] = tlbr;
        Self { t, l, b, r }
    }
}

impl<T> TLBR<T>
where
    T: Copy + Num + PartialOrd,
{
    pub fn transform(&self, transform: &Transform<T>) -> Self {
        TLBR {
            t: self.t * transform.sy,
            l: self.l * transform.sx,
            b: self.b * transform.sy,
            r: self.r * transform.sx,
        }
    }

    /// Divide vertical coordinates by the height and horizontal ones by the width of `size`.
    pub fn normalize_by(&self, size: &HW<T>) -> Self {
        TLBR {
            t: self.t / size.h(),
            l: self.l / size.w(),
            b: self.b / size.h(),
            r: self.r / size.w(),
        }
    }
}

impl<T> Rect for TLBR<T>
where
    T: Copy + Num + PartialOrd,
{
    type Type = T;

    fn t(&self) -> Self::Type {
        self.t
    }

    fn l(&self) -> Self::Type {
        self.l
    }

    fn b(&self) -> Self::Type {
        self.b
    }

    fn r(&self) -> Self::Type {
        self.r
    }

    fn h(&self) -> Self::Type {
        self.b - self.t
    }

    fn w(&self) -> Self::Type {
        self.r - self.l
    }

    fn try_from_tlbr(tlbr: [Self::Type; 4]) -> Result<Self> {
        let [t, l, b, r] = tlbr;
        ensure!(b >= t && r >= l, "b >= t and r >= l must hold");

        Ok(Self { t, l, b, r })
    }
}
