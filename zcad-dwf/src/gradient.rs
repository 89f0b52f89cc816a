//! Gouraud 三角形到渐变填充的换算。

use std::f64::consts::TAU;

use glam::DVec2;
use zcad_core::document::HatchGradient;
use zcad_core::geometry::Point2;

use crate::ImportError;
use crate::opcode::Rgba;

/// 单个三角形的填充方式。
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TriangleFill {
    /// 两端颜色相同，退化为实心填充。
    Solid(Rgba),
    /// 线性渐变：`angle` 指向颜色增大的方向，`start` 为较小的颜色。
    Linear { angle: f64, start: Rgba, end: Rgba },
}

impl TriangleFill {
    pub fn to_gradient(self) -> Option<HatchGradient> {
        match self {
            TriangleFill::Solid(_) => None,
            TriangleFill::Linear { angle, start, end } => Some(HatchGradient {
                name: "LINEAR".to_string(),
                angle,
                shift: None,
                tint: None,
                is_single_color: false,
                color1: Some(start.to_rgb24()),
                color2: Some(end.to_rgb24()),
            }),
        }
    }
}

/// 按颜色（R、G、B 字典序）排序三个角点后求渐变方向。
///
/// 只有三种颜色两两不同且几何退化时才返回错误；颜色相同的情形按策略处理。
pub fn triangle_fill(corners: [(Point2, Rgba); 3]) -> Result<TriangleFill, ImportError> {
    let mut sorted = corners;
    sorted.sort_by_key(|(_, color)| color.rgb_key());
    let [(p0, c0), (p1, c1), (p2, c2)] = sorted;

    if c0.rgb_key() == c2.rgb_key() {
        return Ok(TriangleFill::Solid(c0));
    }

    let (v0, v1, v2) = (p0.as_vec2(), p1.as_vec2(), p2.as_vec2());
    let direction = if c0.rgb_key() == c1.rgb_key() {
        // 等色线 p0-p1，朝向 p2
        oriented_normal(v1 - v0, v2 - v0).unwrap_or(v2 - v0)
    } else if c1.rgb_key() == c2.rgb_key() {
        // 等色线 p1-p2，背离 p0
        oriented_normal(v2 - v1, v1 - v0).unwrap_or(v1 - v0)
    } else {
        // 插值通道两端颜色必须不同；优先取后两色也不同的通道
        let outer_differs = |k: usize| c0.channel(k) != c2.channel(k);
        let channel = (0..3)
            .find(|&k| outer_differs(k) && c1.channel(k) != c2.channel(k))
            .or_else(|| (0..3).find(|&k| outer_differs(k)));
        let Some(channel) = channel else {
            return Ok(TriangleFill::Solid(c0));
        };
        let low = f64::from(c0.channel(channel));
        let t = (f64::from(c1.channel(channel)) - low) / (f64::from(c2.channel(channel)) - low);
        // p0-p2 上与 p1 同色的点
        let iso = v0 + (v2 - v0) * t;
        oriented_normal(iso - v1, v2 - v0).ok_or_else(|| {
            ImportError::MalformedGradient("三角形退化，无法确定渐变方向".to_string())
        })?
    };

    if direction.length_squared() == 0.0 {
        return Ok(TriangleFill::Solid(c0));
    }
    Ok(TriangleFill::Linear {
        angle: direction.y.atan2(direction.x).rem_euclid(TAU),
        start: c0,
        end: c2,
    })
}

/// `iso` 的法向，取与 `toward` 同向的一侧；无法确定时返回 `None`。
fn oriented_normal(iso: DVec2, toward: DVec2) -> Option<DVec2> {
    if iso.length_squared() == 0.0 {
        return None;
    }
    let normal = iso.perp();
    let side = normal.dot(toward);
    if side > 0.0 {
        Some(normal)
    } else if side < 0.0 {
        Some(-normal)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::{FRAC_PI_2, FRAC_PI_4, PI};

    const A: Rgba = Rgba::opaque(0, 0, 0);
    const B: Rgba = Rgba::opaque(100, 0, 0);
    const C: Rgba = Rgba::opaque(200, 0, 0);

    fn linear(fill: TriangleFill) -> (f64, Rgba, Rgba) {
        match fill {
            TriangleFill::Linear { angle, start, end } => (angle, start, end),
            other => panic!("linear gradient expected, got {other:?}"),
        }
    }

    #[test]
    fn equal_extremes_give_solid_fill() {
        let fill = triangle_fill([
            (Point2::new(0.0, 0.0), B),
            (Point2::new(1.0, 0.0), B),
            (Point2::new(0.0, 1.0), B),
        ])
        .expect("solid");
        assert_eq!(fill, TriangleFill::Solid(B));
        assert!(fill.to_gradient().is_none());
    }

    #[test]
    fn first_two_equal_points_gradient_toward_third() {
        let fill = triangle_fill([
            (Point2::new(0.0, 0.0), A),
            (Point2::new(10.0, 0.0), A),
            (Point2::new(5.0, 10.0), C),
        ])
        .expect("linear");
        let (angle, start, end) = linear(fill);
        assert!((angle - FRAC_PI_2).abs() < 1e-12);
        assert_eq!(start, A);
        assert_eq!(end, C);
    }

    #[test]
    fn last_two_equal_points_away_from_first() {
        let fill = triangle_fill([
            (Point2::new(0.0, 0.0), A),
            (Point2::new(10.0, -5.0), C),
            (Point2::new(10.0, 5.0), C),
        ])
        .expect("linear");
        let (angle, _, _) = linear(fill);
        assert!(angle.abs() < 1e-12);
    }

    #[test]
    fn swapping_outer_colors_reverses_gradient() {
        let (p0, p1, p2) = (
            Point2::new(0.0, 0.0),
            Point2::new(0.0, 10.0),
            Point2::new(10.0, 0.0),
        );
        let forward = triangle_fill([(p0, A), (p1, B), (p2, C)]).expect("linear");
        let reversed = triangle_fill([(p0, C), (p1, B), (p2, A)]).expect("linear");
        let (angle_f, start_f, end_f) = linear(forward);
        let (angle_r, start_r, end_r) = linear(reversed);

        let diff = (angle_f - angle_r).rem_euclid(TAU);
        assert!((diff - PI).abs() < 1e-9);
        assert_eq!((start_f, end_f), (start_r, end_r));

        // 沿渐变方向，首角点一侧的端点颜色互换
        let project = |angle: f64, point: Point2| point.x() * angle.cos() + point.y() * angle.sin();
        let p0_color = |angle: f64, start: Rgba, end: Rgba| {
            if project(angle, p0) < project(angle, p2) {
                start
            } else {
                end
            }
        };
        assert_eq!(p0_color(angle_f, start_f, end_f), A);
        assert_eq!(p0_color(angle_r, start_r, end_r), C);
    }

    #[test]
    fn collinear_distinct_colors_are_malformed() {
        let err = triangle_fill([
            (Point2::new(0.0, 0.0), A),
            (Point2::new(5.0, 0.0), B),
            (Point2::new(10.0, 0.0), C),
        ])
        .unwrap_err();
        assert!(matches!(err, ImportError::MalformedGradient(_)));
    }

    #[test]
    fn distinct_colors_use_channel_that_differs_between_extremes() {
        // 后两色只在蓝通道不同，而首尾两色蓝通道相同
        let low = Rgba::opaque(0, 0, 5);
        let mid = Rgba::opaque(0, 5, 0);
        let high = Rgba::opaque(0, 5, 5);
        let fill = triangle_fill([
            (Point2::new(0.0, 0.0), low),
            (Point2::new(10.0, 0.0), mid),
            (Point2::new(0.0, 10.0), high),
        ])
        .expect("linear");
        let (angle, start, end) = linear(fill);
        assert!((angle - FRAC_PI_4).abs() < 1e-12);
        assert_eq!(start, low);
        assert_eq!(end, high);
    }

    #[test]
    fn gradient_carries_sorted_endpoint_colors() {
        let fill = triangle_fill([
            (Point2::new(0.0, 0.0), C),
            (Point2::new(10.0, 0.0), A),
            (Point2::new(0.0, 10.0), A),
        ])
        .expect("linear");
        let gradient = fill.to_gradient().expect("gradient");
        assert_eq!(gradient.name, "LINEAR");
        assert_eq!(gradient.color1, Some(A.to_rgb24()));
        assert_eq!(gradient.color2, Some(C.to_rgb24()));
    }
}
