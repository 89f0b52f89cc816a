//! 图元分类与填充边界环构建。
//!
//! 这里的函数都工作在流坐标（或调用方已变换好的坐标）上，不接触数据库。

use std::f64::consts::{FRAC_PI_2, TAU};

use zcad_core::geometry::{Point2, Vector2};

use crate::opcode::{ANGLE_PERIOD, EllipseRecord, quantized_to_radians};

/// 椭圆族图元的分类结果（流坐标，角度为弧度）。
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EllipseShape {
    /// 两轴皆为零：退化为两个重合点组成的多段线。
    Dot(Point2),
    /// 短轴为零：沿主轴的线段。
    Segment { start: Point2, end: Point2 },
    Circle { center: Point2, radius: f64 },
    Arc {
        center: Point2,
        radius: f64,
        start_angle: f64,
        end_angle: f64,
    },
    /// `major_axis` 恒为较长的轴，参数相对主轴计量。
    Ellipse {
        center: Point2,
        major_axis: Vector2,
        ratio: f64,
        start_parameter: f64,
        end_parameter: f64,
    },
}

/// 起止角在量化周期内相等即为整圈。
#[inline]
pub fn is_full_sweep(record: &EllipseRecord) -> bool {
    record.start % ANGLE_PERIOD == record.end % ANGLE_PERIOD
}

pub fn classify_ellipse(record: &EllipseRecord) -> EllipseShape {
    let center = record.center;
    let full = is_full_sweep(record);
    let mut major = record.major.abs();
    let mut minor = record.minor.abs();
    let mut tilt = quantized_to_radians(record.tilt);
    let mut start = quantized_to_radians(record.start);
    let mut end = quantized_to_radians(record.end);

    // 主轴必须是较长的轴
    if major < minor {
        std::mem::swap(&mut major, &mut minor);
        tilt += FRAC_PI_2;
        if !full {
            start -= FRAC_PI_2;
            end -= FRAC_PI_2;
        }
    }

    let direction = Vector2::from_angle(tilt);
    if minor == 0.0 {
        if major == 0.0 {
            return EllipseShape::Dot(center);
        }
        return EllipseShape::Segment {
            start: center.translate(direction.scale(-major)),
            end: center.translate(direction.scale(major)),
        };
    }

    let is_round = (major - minor).abs() <= f64::EPSILON * major.max(1.0);
    match (full, is_round) {
        (true, true) => EllipseShape::Circle {
            center,
            radius: major,
        },
        (true, false) => EllipseShape::Ellipse {
            center,
            major_axis: direction.scale(major),
            ratio: minor / major,
            start_parameter: 0.0,
            end_parameter: TAU,
        },
        (false, true) => EllipseShape::Arc {
            center,
            radius: major,
            start_angle: (start + tilt).rem_euclid(TAU),
            end_angle: (end + tilt).rem_euclid(TAU),
        },
        (false, false) => EllipseShape::Ellipse {
            center,
            major_axis: direction.scale(major),
            ratio: minor / major,
            start_parameter: start.rem_euclid(TAU),
            end_parameter: end.rem_euclid(TAU),
        },
    }
}

/// 只移除相邻的重复点；后续环的顶点序号有位置意义，不做全局去重。
pub fn dedup_consecutive(points: &[Point2]) -> Vec<Point2> {
    let mut result: Vec<Point2> = Vec::with_capacity(points.len());
    for point in points {
        if result.last() != Some(point) {
            result.push(*point);
        }
    }
    result
}

/// 三角形带展开为单个轮廓：偶数序号正向、奇数序号反向。
pub fn unroll_triangle_strip(points: &[Point2]) -> Vec<Point2> {
    let forward = points.iter().step_by(2);
    let backward = points.iter().skip(1).step_by(2).rev();
    forward.chain(backward).copied().collect()
}

/// 构建填充边界环。去重后不足三点的环是退化环，返回 `None`。
pub fn hatch_loop(points: &[Point2]) -> Option<Vec<Point2>> {
    let deduped = dedup_consecutive(points);
    (deduped.len() > 2).then_some(deduped)
}

/// 整圆的凸度环：直径两端两个顶点，凸度均为 1。
pub fn circle_loop(center: Point2, radius: f64) -> ([Point2; 2], [f64; 2]) {
    (
        [
            Point2::new(center.x() - radius, center.y()),
            Point2::new(center.x() + radius, center.y()),
        ],
        [1.0, 1.0],
    )
}
