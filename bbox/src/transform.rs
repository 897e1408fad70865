use super::TLBR;
use crate::{common::*, HW};

/// Axis-aligned scaling between two image sizes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Transform<T> {
    pub sy: T,
    pub sx: T,
}

impl<T> Transform<T>
where
    T: Copy + Num + PartialOrd,
{
    /// The scaling that stretches `src_size` onto `tgt_size` without keeping aspect ratio.
    pub fn try_from_sizes_exact(src_size: &HW<T>, tgt_size: &HW<T>) -> Result<Self> {
        ensure!(
            !src_size.is_empty(),
            "source height and width must be positive"
        );
        let sy = tgt_size.h() / src_size.h();
        let sx = tgt_size.w() / src_size.w();
        Ok(Self { sy, sx })
    }

    pub fn from_sizes_exact(src_size: &HW<T>, tgt_size: &HW<T>) -> Self {
        Self::try_from_sizes_exact(src_size, tgt_size).unwrap()
    }

    pub fn is_identity(&self) -> bool {
        self.sy == T::one() && self.sx == T::one()
    }
}

impl<T> Mul<&TLBR<T>> for &Transform<T>
where
    T: Copy + Num + PartialOrd,
{
    type Output = TLBR<T>;

    fn mul(self, rhs: &TLBR<T>) -> Self::Output {
        rhs.transform(self)
    }
}
