//! 拖拽刚体变换
//!
//! 拖拽过程中累计的平移与绕中心的 Z 轴旋转，
//! 可转换为 4x4 齐次矩阵与宿主的场景节点变换对接。

use crate::math::{rotate_about_z, Matrix4, Point3, Vector3, EPSILON};
use serde::{Deserialize, Serialize};

/// 平移 + 绕 `center` 的旋转
///
/// 作用顺序：先绕 `center` 旋转，再平移。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DragTransform {
    pub translation: Vector3,
    /// 旋转角（弧度，逆时针为正）
    pub rotation: f64,
    pub center: Point3,
}

impl DragTransform {
    pub fn identity() -> Self {
        Self::with_center(Point3::origin())
    }

    pub fn with_center(center: Point3) -> Self {
        Self {
            translation: Vector3::zeros(),
            rotation: 0.0,
            center,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.translation.norm() < EPSILON && self.rotation.abs() < EPSILON
    }

    /// 变换单个点
    pub fn apply(&self, point: &Point3) -> Point3 {
        rotate_about_z(point, &self.center, self.rotation) + self.translation
    }

    /// 齐次变换矩阵 `T(t) * T(c) * Rz(θ) * T(-c)`
    pub fn to_matrix(&self) -> Matrix4 {
        let to_center = Matrix4::new_translation(&self.center.coords);
        let from_center = Matrix4::new_translation(&-self.center.coords);
        let rotation = Matrix4::from_axis_angle(&Vector3::z_axis(), self.rotation);

        Matrix4::new_translation(&self.translation) * to_center * rotation * from_center
    }
}

impl Default for DragTransform {
    fn default() -> Self {
        Self::identity()
    }
}

/// 用齐次矩阵变换点列表，不修改输入
pub fn apply_points(points: &[Point3], matrix: &Matrix4) -> Vec<Point3> {
    points.iter().map(|p| matrix.transform_point(p)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn test_matrix_matches_apply() {
        let transform = DragTransform {
            translation: Vector3::new(1.0, -2.0, 0.5),
            rotation: FRAC_PI_2,
            center: Point3::new(3.0, 1.0, 0.0),
        };
        let matrix = transform.to_matrix();

        for p in [Point3::new(0.0, 0.0, 0.0), Point3::new(4.0, 1.0, 2.0)] {
            let a = transform.apply(&p);
            let b = matrix.transform_point(&p);
            assert!((a - b).norm() < 1e-9);
        }
    }

    #[test]
    fn test_identity() {
        let t = DragTransform::with_center(Point3::new(5.0, 5.0, 0.0));
        assert!(t.is_identity());

        let points = vec![Point3::new(1.0, 2.0, 3.0)];
        assert_eq!(apply_points(&points, &t.to_matrix()), points);
    }
}
