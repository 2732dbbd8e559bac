//! 数学类型与向量工具
//!
//! 三维点/向量直接使用 nalgebra 的 `f64` 类型，
//! 这里补充拖拽与联动传播需要的纯函数：投影、方位角、量化等。

use std::f64::consts::{PI, TAU};

pub type Point2 = nalgebra::Point2<f64>;
pub type Point3 = nalgebra::Point3<f64>;
pub type Vector3 = nalgebra::Vector3<f64>;
pub type Matrix4 = nalgebra::Matrix4<f64>;

/// 几何比较容差
pub const EPSILON: f64 = 1e-10;

/// 点加向量
pub fn add(point: &Point3, delta: &Vector3) -> Point3 {
    point + delta
}

/// 两点相减得到位移向量
pub fn subtract(lhs: &Point3, rhs: &Point3) -> Vector3 {
    lhs - rhs
}

/// 向量缩放
pub fn scale(vector: &Vector3, factor: f64) -> Vector3 {
    vector * factor
}

/// 单位向量，零向量返回 `None`
pub fn unit(vector: &Vector3) -> Option<Vector3> {
    let length = vector.norm();
    if length < EPSILON {
        None
    } else {
        Some(vector / length)
    }
}

/// 将 `vector` 投影到 `axis` 上（`axis` 无需归一化）
///
/// 退化的零长度轴不做约束，原样返回。
pub fn project(vector: &Vector3, axis: &Vector3) -> Vector3 {
    let length_sq = axis.norm_squared();
    if length_sq < EPSILON {
        return *vector;
    }
    axis * (vector.dot(axis) / length_sq)
}

/// 向量在 XY 平面内的方位角
///
/// 从 +Y（北）方向顺时针量取，范围 `[0, 2π)`。
/// 零长度向量没有方位，返回 `None`。
pub fn bearing(vector: &Vector3) -> Option<f64> {
    if vector.x.hypot(vector.y) < EPSILON {
        return None;
    }

    let mut angle = vector.x.atan2(vector.y);
    if angle < 0.0 {
        angle += TAU;
    }
    Some(angle)
}

/// 把角度归一化到 `(-π, π]`
pub fn normalize_angle(angle: f64) -> f64 {
    let mut result = angle.rem_euclid(TAU);
    if result > PI {
        result -= TAU;
    }
    result
}

/// 把数值量化到 `increment` 的最近整数倍，`increment <= 0` 或非有限值表示连续
pub fn quantize(value: f64, increment: f64) -> f64 {
    if !(increment > 0.0 && increment.is_finite()) {
        return value;
    }
    (value / increment).round() * increment
}

/// 按长度量化向量，方向保持不变
pub fn quantize_vector(vector: &Vector3, increment: f64) -> Vector3 {
    if !(increment > 0.0 && increment.is_finite()) {
        return *vector;
    }

    let length = vector.norm();
    if length < EPSILON {
        return Vector3::zeros();
    }
    vector * (quantize(length, increment) / length)
}

/// 绕过 `center` 的 +Z 轴旋转点（逆时针为正）
pub fn rotate_about_z(point: &Point3, center: &Point3, angle: f64) -> Point3 {
    let (sin, cos) = angle.sin_cos();
    let offset = point - center;
    Point3::new(
        center.x + offset.x * cos - offset.y * sin,
        center.y + offset.x * sin + offset.y * cos,
        point.z,
    )
}

/// 坐标列表的算术平均值
pub fn mean(points: &[Point3]) -> Option<Point3> {
    if points.is_empty() {
        return None;
    }

    let sum = points
        .iter()
        .fold(Vector3::zeros(), |acc, p| acc + p.coords);
    Some(Point3::from(sum / points.len() as f64))
}

/// 逐点求差 `new - old`，长度取两者较短者
pub fn coordinate_deltas(new: &[Point3], old: &[Point3]) -> Vec<Vector3> {
    new.iter().zip(old).map(|(n, o)| n - o).collect()
}

/// 两点的曼哈顿距离
pub fn manhattan(lhs: &Point3, rhs: &Point3) -> f64 {
    (lhs.x - rhs.x).abs() + (lhs.y - rhs.y).abs() + (lhs.z - rhs.z).abs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_4;

    #[test]
    fn test_project_onto_axis() {
        let projected = project(&Vector3::new(3.0, 4.0, 0.0), &Vector3::new(1.0, 0.0, 0.0));
        assert!((projected - Vector3::new(3.0, 0.0, 0.0)).norm() < EPSILON);

        // 非单位轴
        let projected = project(&Vector3::new(3.0, 4.0, 0.0), &Vector3::new(0.0, 2.0, 0.0));
        assert!((projected - Vector3::new(0.0, 4.0, 0.0)).norm() < EPSILON);
    }

    #[test]
    fn test_bearing_clockwise_from_north() {
        assert!((bearing(&Vector3::new(0.0, 1.0, 0.0)).unwrap()).abs() < EPSILON);
        assert!((bearing(&Vector3::new(1.0, 0.0, 0.0)).unwrap() - PI / 2.0).abs() < EPSILON);
        assert!((bearing(&Vector3::new(-1.0, 0.0, 0.0)).unwrap() - 1.5 * PI).abs() < EPSILON);
        assert!(bearing(&Vector3::zeros()).is_none());
    }

    #[test]
    fn test_quantize_rotate_increment() {
        assert_eq!(quantize(0.3, FRAC_PI_4), 0.0);
        assert!((quantize(0.9, FRAC_PI_4) - FRAC_PI_4).abs() < EPSILON);
        assert_eq!(quantize(0.3, 0.0), 0.3);
        assert_eq!(quantize(0.3, f64::INFINITY), 0.3);
    }

    #[test]
    fn test_quantize_vector_keeps_direction() {
        let q = quantize_vector(&Vector3::new(3.0, 4.0, 0.0), 2.0);
        // 长度 5 -> 6
        assert!((q.norm() - 6.0).abs() < EPSILON);
        assert!((q.x / q.y - 0.75).abs() < EPSILON);
    }

    #[test]
    fn test_normalize_angle() {
        assert!((normalize_angle(1.5 * PI) + 0.5 * PI).abs() < EPSILON);
        assert!((normalize_angle(-1.5 * PI) - 0.5 * PI).abs() < EPSILON);
        assert!((normalize_angle(PI) - PI).abs() < EPSILON);
    }

    #[test]
    fn test_rotate_about_z() {
        let p = rotate_about_z(&Point3::new(2.0, 1.0, 5.0), &Point3::new(1.0, 1.0, 0.0), PI / 2.0);
        assert!((p - Point3::new(1.0, 2.0, 5.0)).norm() < 1e-9);
    }

    #[test]
    fn test_mean() {
        let m = mean(&[Point3::new(0.0, 0.0, 0.0), Point3::new(2.0, 4.0, 6.0)]).unwrap();
        assert!((m - Point3::new(1.0, 2.0, 3.0)).norm() < EPSILON);
        assert!(mean(&[]).is_none());
    }
}
