//! 文字重建：由字体标志恢复多行文字格式码，由外框四边形恢复沿路径文字的
//! 旋转、倾斜、字高与宽度比例。

use zcad_core::document::TextExtents;
use zcad_core::geometry::{Point2, Vector2};

use crate::ImportError;
use crate::database::FontResolution;
use crate::opcode::{
    ANGLE_PERIOD, FontRecord, HorizontalAlignment, TextOptions, TextRecord, quantized_to_radians,
};
use crate::resolver::Resolver;

/// 字距与宽度比例以 1024 为 1.0，等于哨兵值表示未设置。
pub const SPACING_NOOP: u16 = 1024;
pub const WIDTH_SCALE_NOOP: u16 = 1024;

const MIN_SPACING: f64 = 0.75;
const MAX_SPACING: f64 = 4.0;

/// 多行文字前缀格式码。输出顺序固定：下划线、上划线、字距、倾斜、宽度比例。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextFormat {
    underline: bool,
    overline: bool,
    spacing: Option<f64>,
    /// 倾斜角（度）。
    oblique: Option<f64>,
    width_factor: Option<f64>,
}

impl TextFormat {
    pub fn from_font(font: &FontRecord, options: &TextOptions) -> Self {
        let spacing = (font.spacing != SPACING_NOOP).then(|| {
            (f64::from(font.spacing) / f64::from(SPACING_NOOP)).clamp(MIN_SPACING, MAX_SPACING)
        });
        let oblique = (font.oblique % ANGLE_PERIOD != 0)
            .then(|| normalize_degrees(quantized_to_radians(font.oblique).to_degrees()));
        let width_factor = (font.width_scale != WIDTH_SCALE_NOOP)
            .then(|| f64::from(font.width_scale) / f64::from(WIDTH_SCALE_NOOP));
        Self {
            underline: font.style.underline || options.underscore,
            overline: options.overscore,
            spacing,
            oblique,
            width_factor,
        }
    }

    pub fn with_oblique(mut self, degrees: f64) -> Self {
        self.oblique = Some(degrees);
        self
    }

    pub fn with_width_factor(mut self, factor: f64) -> Self {
        self.width_factor = Some(factor);
        self
    }

    #[inline]
    pub fn width_factor(&self) -> Option<f64> {
        self.width_factor
    }

    pub fn prefix(&self) -> String {
        let mut prefix = String::new();
        if self.underline {
            prefix.push_str("\\L");
        }
        if self.overline {
            prefix.push_str("\\O");
        }
        if let Some(spacing) = self.spacing {
            prefix.push_str(&format!("\\T{};", format_number(spacing)));
        }
        if let Some(oblique) = self.oblique {
            prefix.push_str(&format!("\\Q{};", format_number(oblique)));
        }
        if let Some(width) = self.width_factor {
            prefix.push_str(&format!("\\W{};", format_number(width)));
        }
        prefix
    }

    /// 格式码前缀加转义后的正文。
    pub fn apply(&self, text: &str) -> String {
        let mut content = self.prefix();
        content.push_str(&escape_mtext(text));
        content
    }
}

pub fn escape_mtext(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '\\' | '{' | '}') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

fn format_number(value: f64) -> String {
    let text = format!("{value:.4}");
    let trimmed = text.trim_end_matches('0').trim_end_matches('.');
    if trimmed == "-0" {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

/// 归一化到 (-180, 180]。
fn normalize_degrees(degrees: f64) -> f64 {
    let wrapped = degrees.rem_euclid(360.0);
    if wrapped > 180.0 { wrapped - 360.0 } else { wrapped }
}

/// 由外框四边形恢复的沿路径排列参数（目标坐标）。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathAlignment {
    /// 基线方向（弧度）。
    pub rotation: f64,
    /// 倾斜角（度），位于 [-90, 90]。
    pub oblique: f64,
    pub height: f64,
    /// 基线方向上的实测长度。
    pub measured_width: f64,
    pub insert: Point2,
}

/// 四边形依次为左下、右下、右上、左上；任意相邻两点重合时返回 `None`。
pub fn path_alignment(quad: &[Point2; 4]) -> Option<PathAlignment> {
    for index in 0..4 {
        if quad[index] == quad[(index + 1) % 4] {
            return None;
        }
    }
    let baseline = Vector2::from_points(quad[0], quad[1]);
    let left = Vector2::from_points(quad[0], quad[3]);

    let mut horizontal = baseline.angle().to_degrees();
    let vertical = left.angle().to_degrees();
    let mut oblique = normalize_degrees(90.0 - (vertical - horizontal));
    let mut insert = quad[0];
    if oblique.abs() > 90.0 {
        horizontal += 180.0;
        oblique = normalize_degrees(oblique + 180.0);
        insert = quad[1];
    }

    let direction = baseline.as_vec2().normalize();
    let height = direction.perp_dot(left.as_vec2()).abs();
    Some(PathAlignment {
        rotation: horizontal.to_radians(),
        oblique,
        height,
        measured_width: baseline.length(),
        insert,
    })
}

/// 基线定位字体的插入点偏移（未旋转）：上移下沉量，水平方向按对齐方式偏移实测宽度。
pub fn anchor_offset(extents: &TextExtents, alignment: HorizontalAlignment) -> Vector2 {
    let width = extents.width;
    let dx = if width > 0.0 {
        match alignment {
            HorizontalAlignment::Left => 0.0,
            HorizontalAlignment::Center => -width * 0.5,
            HorizontalAlignment::Right => -width,
        }
    } else {
        0.0
    };
    Vector2::new(dx, extents.descent)
}

/// 重建后的文字：目标坐标的插入点、方向与字高，以及带格式码的正文。
#[derive(Debug, Clone, PartialEq)]
pub struct TextPlacement {
    pub insert: Point2,
    pub rotation: f64,
    pub height: f64,
    pub content: String,
}

/// 重建一条文字记录。`extents` 按已解析样式估算正文范围。
pub fn reconstruct_text(
    record: &TextRecord,
    font: &FontRecord,
    style: &FontResolution,
    resolver: &Resolver,
    extents: impl Fn(&str, f64) -> Option<TextExtents>,
) -> Result<TextPlacement, ImportError> {
    let format = TextFormat::from_font(font, &record.options);

    if record.options.path_aligned {
        if let Some(quad) = &record.bounds {
            let mapped = [
                resolver.transform_point2(quad[0])?,
                resolver.transform_point2(quad[1])?,
                resolver.transform_point2(quad[2])?,
                resolver.transform_point2(quad[3])?,
            ];
            if let Some(alignment) = path_alignment(&mapped) {
                let mut format = format.with_oblique(alignment.oblique);
                let natural = extents(&record.content, alignment.height)
                    .map(|extents| extents.width)
                    .filter(|width| *width > 0.0);
                if let Some(natural) = natural {
                    format = format.with_width_factor(alignment.measured_width / natural);
                }
                return Ok(TextPlacement {
                    insert: alignment.insert,
                    rotation: alignment.rotation,
                    height: alignment.height,
                    content: format.apply(&record.content),
                });
            }
        }
    }

    let mut insert = resolver.transform_point2(record.position)?;
    let height = resolver.transform_size(font.height)?;
    let font_rotation = quantized_to_radians(font.rotation);
    let rotation = if resolver.is_mirrored()? {
        resolver.rotation()? - font_rotation
    } else {
        resolver.rotation()? + font_rotation
    };

    if style.anchors_at_baseline {
        if let Some(mut measured) = extents(&record.content, height) {
            measured.width *= format.width_factor().unwrap_or(1.0);
            let offset = anchor_offset(&measured, record.options.alignment);
            let rotated = Vector2::from(glam::DVec2::from_angle(rotation).rotate(offset.as_vec2()));
            insert = insert.translate(rotated);
        }
    }

    Ok(TextPlacement {
        insert,
        rotation,
        height,
        content: format.apply(&record.content),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::{FontStyleFlags, UnitsRecord};
    use std::f64::consts::PI;

    fn identity_resolver() -> Resolver {
        let mut resolver = Resolver::new(1e-10);
        resolver.calibrate();
        resolver
    }

    fn extents(text: &str, height: f64) -> Option<TextExtents> {
        Some(TextExtents {
            width: text.chars().count() as f64 * height * 0.5,
            ascent: height,
            descent: height * 0.25,
        })
    }

    #[test]
    fn format_codes_follow_fixed_order() {
        let font = FontRecord {
            spacing: 2048,
            oblique: 4096,
            width_scale: 512,
            style: FontStyleFlags {
                underline: true,
                ..FontStyleFlags::default()
            },
            ..FontRecord::default()
        };
        let options = TextOptions {
            overscore: true,
            ..TextOptions::default()
        };
        let format = TextFormat::from_font(&font, &options);
        assert_eq!(format.prefix(), "\\L\\O\\T2;\\Q22.5;\\W0.5;");
        assert_eq!(format.apply("a{b}"), "\\L\\O\\T2;\\Q22.5;\\W0.5;a\\{b\\}");
    }

    #[test]
    fn sentinel_values_emit_nothing() {
        let format = TextFormat::from_font(&FontRecord::default(), &TextOptions::default());
        assert_eq!(format.prefix(), "");
    }

    #[test]
    fn spacing_is_clamped() {
        let tight = FontRecord {
            spacing: 100,
            ..FontRecord::default()
        };
        let loose = FontRecord {
            spacing: 8192,
            ..FontRecord::default()
        };
        let options = TextOptions::default();
        assert_eq!(TextFormat::from_font(&tight, &options).prefix(), "\\T0.75;");
        assert_eq!(TextFormat::from_font(&loose, &options).prefix(), "\\T4;");
    }

    #[test]
    fn slanted_quad_recovers_oblique_and_height() {
        let quad = [
            Point2::new(0.0, 0.0),
            Point2::new(10.0, 0.0),
            Point2::new(11.0, 2.0),
            Point2::new(1.0, 2.0),
        ];
        let alignment = path_alignment(&quad).expect("non-degenerate");
        assert!(alignment.rotation.abs() < 1e-12);
        let expected = 90.0 - 2.0f64.atan2(1.0).to_degrees();
        assert!((alignment.oblique - expected).abs() < 1e-9);
        assert!((alignment.height - 2.0).abs() < 1e-12);
        assert!((alignment.measured_width - 10.0).abs() < 1e-12);
        assert_eq!(alignment.insert, quad[0]);
    }

    #[test]
    fn mirrored_quad_is_flipped_upright() {
        let quad = [
            Point2::new(0.0, 0.0),
            Point2::new(10.0, 0.0),
            Point2::new(10.0, -2.0),
            Point2::new(0.0, -2.0),
        ];
        let alignment = path_alignment(&quad).expect("non-degenerate");
        assert!((alignment.rotation - PI).abs() < 1e-12);
        assert!(alignment.oblique.abs() < 1e-9);
        assert_eq!(alignment.insert, quad[1]);
        assert!((alignment.height - 2.0).abs() < 1e-12);
    }

    #[test]
    fn flipped_slanted_quad_keeps_signed_oblique() {
        // 左边沿 -60°：倾斜 150° 超出范围，翻转后为 -30°
        let drop = 3.0_f64.sqrt();
        let record = TextRecord {
            position: Point2::new(0.0, 0.0),
            content: "abcd".to_string(),
            bounds: Some([
                Point2::new(0.0, 0.0),
                Point2::new(10.0, 0.0),
                Point2::new(11.0, -drop),
                Point2::new(1.0, -drop),
            ]),
            options: TextOptions {
                path_aligned: true,
                ..TextOptions::default()
            },
        };
        let quad = record.bounds.expect("quad");
        let alignment = path_alignment(&quad).expect("non-degenerate");
        assert!((alignment.rotation - PI).abs() < 1e-12);
        assert!((alignment.oblique + 30.0).abs() < 1e-9);
        assert!((alignment.height - drop).abs() < 1e-12);
        assert_eq!(alignment.insert, quad[1]);

        let style = FontResolution {
            style: "Arial".to_string(),
            anchors_at_baseline: true,
        };
        let placement = reconstruct_text(
            &record,
            &FontRecord::default(),
            &style,
            &identity_resolver(),
            extents,
        )
        .expect("resolved");
        // 自然宽度 4×√3×0.5，实测 10
        assert_eq!(placement.content, "\\Q-30;\\W2.8868;abcd");
        assert!((placement.rotation - PI).abs() < 1e-12);
    }

    #[test]
    fn degenerate_quad_is_rejected() {
        let quad = [
            Point2::new(0.0, 0.0),
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 1.0),
            Point2::new(0.0, 1.0),
        ];
        assert!(path_alignment(&quad).is_none());
    }

    #[test]
    fn baseline_fonts_shift_by_descent_and_alignment() {
        let measured = TextExtents {
            width: 4.0,
            ascent: 2.0,
            descent: 0.5,
        };
        let offset = anchor_offset(&measured, HorizontalAlignment::Center);
        assert_eq!(offset, Vector2::new(-2.0, 0.5));
        let right = anchor_offset(&measured, HorizontalAlignment::Right);
        assert_eq!(right.x(), -4.0);
        let empty = TextExtents {
            width: 0.0,
            ..measured
        };
        assert_eq!(
            anchor_offset(&empty, HorizontalAlignment::Right),
            Vector2::new(0.0, 0.5)
        );
    }

    #[test]
    fn path_aligned_text_gets_oblique_and_width_codes() {
        let resolver = identity_resolver();
        let record = TextRecord {
            position: Point2::new(0.0, 0.0),
            content: "abcd".to_string(),
            bounds: Some([
                Point2::new(0.0, 0.0),
                Point2::new(8.0, 0.0),
                Point2::new(8.0, 2.0),
                Point2::new(0.0, 2.0),
            ]),
            options: TextOptions {
                path_aligned: true,
                ..TextOptions::default()
            },
        };
        let style = FontResolution {
            style: "Arial".to_string(),
            anchors_at_baseline: true,
        };
        let placement =
            reconstruct_text(&record, &FontRecord::default(), &style, &resolver, extents)
                .expect("resolved");
        // 自然宽度 4×2×0.5 = 4，实测 8
        assert_eq!(placement.content, "\\Q0;\\W2;abcd");
        assert!((placement.height - 2.0).abs() < 1e-12);
        assert_eq!(placement.insert, Point2::new(0.0, 0.0));
    }

    #[test]
    fn plain_text_is_scaled_and_anchored() {
        let mut resolver = Resolver::new(1e-10);
        resolver.update_units(&UnitsRecord {
            units: "in".to_string(),
            matrix: [
                [0.5, 0.0, 0.0, 0.0],
                [0.0, 0.5, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
                [0.0, 0.0, 0.0, 1.0],
            ],
        });
        let record = TextRecord {
            position: Point2::new(10.0, 10.0),
            content: "ab".to_string(),
            bounds: None,
            options: TextOptions {
                alignment: HorizontalAlignment::Right,
                ..TextOptions::default()
            },
        };
        let font = FontRecord {
            height: 1.0,
            ..FontRecord::default()
        };
        let style = FontResolution {
            style: "Arial".to_string(),
            anchors_at_baseline: true,
        };
        let placement =
            reconstruct_text(&record, &font, &style, &resolver, extents).expect("resolved");
        // 字高 2，宽 2×2×0.5 = 2，下沉 0.5
        assert!((placement.height - 2.0).abs() < 1e-12);
        assert!((placement.insert.x() - 18.0).abs() < 1e-12);
        assert!((placement.insert.y() - 20.5).abs() < 1e-12);
        assert_eq!(placement.content, "ab");

        let boxed = FontResolution {
            anchors_at_baseline: false,
            ..style
        };
        let placement =
            reconstruct_text(&record, &font, &boxed, &resolver, extents).expect("resolved");
        assert_eq!(placement.insert, Point2::new(20.0, 20.0));
    }
}
