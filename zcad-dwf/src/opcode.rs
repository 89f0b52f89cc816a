//! 已解码的矢量流操作码。
//!
//! 字节流分词器在上游完成解码，这里只定义类型化的记录。每个变体都能报告自己在
//! 流坐标系中的范围，供第一遍收集全局边界。

use std::f64::consts::TAU;

use serde::{Deserialize, Serialize};
use zcad_core::document::{PaperUnits, PixelFormat};
use zcad_core::geometry::{Bounds3D, Point2};

/// 角度量化周期：一整圈对应 65536 个单位。
pub const ANGLE_PERIOD: u32 = 65_536;

/// 量化角度转弧度，结果位于 `[0, 2π)`。
#[inline]
pub fn quantized_to_radians(value: u32) -> f64 {
    (value % ANGLE_PERIOD) as f64 * TAU / ANGLE_PERIOD as f64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    #[inline]
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    #[inline]
    pub const fn opaque(r: u8, g: u8, b: u8) -> Self {
        Self::new(r, g, b, 255)
    }

    /// 按 R、G、B 字典序比较时使用的键，忽略 alpha。
    #[inline]
    pub fn rgb_key(self) -> (u8, u8, u8) {
        (self.r, self.g, self.b)
    }

    #[inline]
    pub fn channel(self, index: usize) -> u8 {
        match index {
            0 => self.r,
            1 => self.g,
            _ => self.b,
        }
    }

    /// `0x00RRGGBB`，数据库中颜色的存储格式。
    #[inline]
    pub fn to_rgb24(self) -> u32 {
        (u32::from(self.r) << 16) | (u32::from(self.g) << 8) | u32::from(self.b)
    }
}

impl Default for Rgba {
    fn default() -> Self {
        Self::opaque(255, 255, 255)
    }
}

/// 单位记录。`matrix` 按行主序给出（行向量约定），把目标单位映射到流坐标。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitsRecord {
    pub units: String,
    pub matrix: [[f64; 4]; 4],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlotInfoRecord {
    pub paper_width: f64,
    pub paper_height: f64,
    pub paper_center: Point2,
    pub units: PaperUnits,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedViewRecord {
    pub name: String,
    pub min: Point2,
    pub max: Point2,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewRecord {
    pub min: Point2,
    pub max: Point2,
}

/// 图层记录：名称只在首次出现时给出，之后仅以编号引用。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerRecord {
    pub number: i32,
    pub name: Option<String>,
}

/// 对象编组记录，编号为负表示退出编组。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectNodeRecord {
    pub number: i32,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FontStyleFlags {
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
}

/// 字体记录。`spacing` 与 `width_scale` 以 1024 为 1.0；等于 1024 时视为未设置。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FontRecord {
    pub name: String,
    pub height: f64,
    pub rotation: u32,
    pub width_scale: u16,
    pub spacing: u16,
    pub oblique: u32,
    #[serde(default)]
    pub style: FontStyleFlags,
}

impl Default for FontRecord {
    fn default() -> Self {
        Self {
            name: "Arial".to_string(),
            height: 1.0,
            rotation: 0,
            width_scale: 1024,
            spacing: 1024,
            oblique: 0,
            style: FontStyleFlags::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HorizontalAlignment {
    #[default]
    Left,
    Center,
    Right,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextOptions {
    pub underscore: bool,
    pub overscore: bool,
    /// 文字沿路径排列，由 `bounds` 四边形恢复旋转、倾斜与字高。
    pub path_aligned: bool,
    pub alignment: HorizontalAlignment,
}

/// 文字记录。`bounds` 依次为左下、右下、右上、左上四个角点。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextRecord {
    pub position: Point2,
    pub content: String,
    pub bounds: Option<[Point2; 4]>,
    #[serde(default)]
    pub options: TextOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipRectRecord {
    pub min: Point2,
    pub max: Point2,
}

/// 逐顶点着色的三角形带，`colors` 与 `points` 一一对应。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GouraudRecord {
    pub points: Vec<Point2>,
    pub colors: Vec<Rgba>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContourSetRecord {
    pub contours: Vec<Vec<Point2>>,
}

/// 椭圆记录。`start`/`end`/`tilt` 为量化角度，起止相等（模周期）表示整圈。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EllipseRecord {
    pub center: Point2,
    pub major: f64,
    pub minor: f64,
    pub start: u32,
    pub end: u32,
    pub tilt: u32,
    #[serde(default)]
    pub filled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub identifier: u32,
    pub format: PixelFormat,
    pub columns: u32,
    pub rows: u32,
    pub min: Point2,
    pub max: Point2,
    #[serde(default)]
    pub palette: Vec<Rgba>,
    #[serde(default)]
    pub data: Vec<u8>,
}

/// 视口记录：`boundary` 为 `None` 表示关闭视口；为空列表表示沿用裁剪矩形。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewportRecord {
    pub name: String,
    pub boundary: Option<Vec<Point2>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "data", rename_all = "snake_case")]
pub enum Opcode {
    Units(UnitsRecord),
    PlotInfo(PlotInfoRecord),
    NamedView(NamedViewRecord),
    View(ViewRecord),
    Layer(LayerRecord),
    ObjectNode(ObjectNodeRecord),
    Color(Rgba),
    Visibility(bool),
    Fill(bool),
    Font(FontRecord),
    ClipRect(ClipRectRecord),
    Polyline(Vec<Point2>),
    Polygon(Vec<Point2>),
    Polytriangle(Vec<Point2>),
    GouraudPolytriangle(GouraudRecord),
    ContourSet(ContourSetRecord),
    Ellipse(EllipseRecord),
    Polymarker(Vec<Point2>),
    Text(TextRecord),
    Image(ImageRecord),
    Viewport(ViewportRecord),
}

impl Opcode {
    pub fn name(&self) -> &'static str {
        match self {
            Opcode::Units(_) => "units",
            Opcode::PlotInfo(_) => "plot_info",
            Opcode::NamedView(_) => "named_view",
            Opcode::View(_) => "view",
            Opcode::Layer(_) => "layer",
            Opcode::ObjectNode(_) => "object_node",
            Opcode::Color(_) => "color",
            Opcode::Visibility(_) => "visibility",
            Opcode::Fill(_) => "fill",
            Opcode::Font(_) => "font",
            Opcode::ClipRect(_) => "clip_rect",
            Opcode::Polyline(_) => "polyline",
            Opcode::Polygon(_) => "polygon",
            Opcode::Polytriangle(_) => "polytriangle",
            Opcode::GouraudPolytriangle(_) => "gouraud_polytriangle",
            Opcode::ContourSet(_) => "contour_set",
            Opcode::Ellipse(_) => "ellipse",
            Opcode::Polymarker(_) => "polymarker",
            Opcode::Text(_) => "text",
            Opcode::Image(_) => "image",
            Opcode::Viewport(_) => "viewport",
        }
    }

    /// 图元在流坐标系中的范围；属性类操作码返回 `None`。
    pub fn extents(&self) -> Option<Bounds3D> {
        match self {
            Opcode::Polyline(points)
            | Opcode::Polygon(points)
            | Opcode::Polytriangle(points)
            | Opcode::Polymarker(points) => points_extents(points),
            Opcode::GouraudPolytriangle(record) => points_extents(&record.points),
            Opcode::ContourSet(record) => points_extents(record.contours.iter().flatten()),
            Opcode::Ellipse(record) => {
                let reach = record.major.abs().max(record.minor.abs());
                let center = record.center;
                points_extents(&[
                    Point2::new(center.x() - reach, center.y() - reach),
                    Point2::new(center.x() + reach, center.y() + reach),
                ])
            }
            Opcode::Text(record) => {
                let mut bounds = Bounds3D::from_point(record.position.to_point3());
                if let Some(quad) = &record.bounds {
                    for corner in quad {
                        bounds.include_point(corner.to_point3());
                    }
                }
                Some(bounds)
            }
            Opcode::Image(record) => points_extents(&[record.min, record.max]),
            Opcode::Viewport(record) => record.boundary.as_deref().and_then(points_extents),
            Opcode::Units(_)
            | Opcode::PlotInfo(_)
            | Opcode::NamedView(_)
            | Opcode::View(_)
            | Opcode::Layer(_)
            | Opcode::ObjectNode(_)
            | Opcode::Color(_)
            | Opcode::Visibility(_)
            | Opcode::Fill(_)
            | Opcode::Font(_)
            | Opcode::ClipRect(_) => None,
        }
    }
}

fn points_extents<'a>(points: impl IntoIterator<Item = &'a Point2>) -> Option<Bounds3D> {
    let mut iter = points.into_iter();
    let first = iter.next()?;
    let mut bounds = Bounds3D::from_point(first.to_point3());
    for point in iter {
        bounds.include_point(point.to_point3());
    }
    Some(bounds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantized_angles_wrap_at_period() {
        assert!(quantized_to_radians(0).abs() < 1e-12);
        assert!(quantized_to_radians(ANGLE_PERIOD).abs() < 1e-12);
        assert!((quantized_to_radians(16_384) - TAU / 4.0).abs() < 1e-12);
    }

    #[test]
    fn ellipse_extents_cover_longest_axis() {
        let opcode = Opcode::Ellipse(EllipseRecord {
            center: Point2::new(10.0, 10.0),
            major: 2.0,
            minor: 5.0,
            start: 0,
            end: 0,
            tilt: 0,
            filled: false,
        });
        let bounds = opcode.extents().expect("ellipse has extents");
        assert_eq!(bounds.min().x(), 5.0);
        assert_eq!(bounds.max().y(), 15.0);
    }

    #[test]
    fn attribute_opcodes_have_no_extents() {
        assert!(Opcode::Color(Rgba::opaque(1, 2, 3)).extents().is_none());
        assert!(
            Opcode::Viewport(ViewportRecord {
                name: String::new(),
                boundary: None,
            })
            .extents()
            .is_none()
        );
    }

    #[test]
    fn opcodes_deserialize_from_tagged_json() {
        let json = r#"[
            {"op": "layer", "data": {"number": 3, "name": "WALLS"}},
            {"op": "polyline", "data": [[0.0, 0.0], [4.0, 0.0]]},
            {"op": "fill", "data": true}
        ]"#;
        let opcodes: Vec<Opcode> = serde_json::from_str(json).expect("parse opcodes");
        assert_eq!(opcodes.len(), 3);
        assert_eq!(opcodes[1].name(), "polyline");
        assert!(matches!(opcodes[2], Opcode::Fill(true)));
    }
}
