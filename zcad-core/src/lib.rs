pub mod geometry {
    use glam::{DVec2, DVec3};
    use serde::{Deserialize, Serialize};

    /// 二维点，内部以 `glam::DVec2` 表示。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Point2(pub DVec2);

    impl Point2 {
        #[inline]
        pub fn new(x: f64, y: f64) -> Self {
            Self(DVec2::new(x, y))
        }

        #[inline]
        pub fn from_vec(vec: DVec2) -> Self {
            Self(vec)
        }

        #[inline]
        pub fn x(self) -> f64 {
            self.0.x
        }

        #[inline]
        pub fn y(self) -> f64 {
            self.0.y
        }

        #[inline]
        pub fn translate(self, offset: Vector2) -> Self {
            Self(self.0 + offset.0)
        }

        #[inline]
        pub fn as_vec2(self) -> DVec2 {
            self.0
        }

        /// 提升为 z = 0 的三维点。
        #[inline]
        pub fn to_point3(self) -> Point3 {
            Point3::new(self.0.x, self.0.y, 0.0)
        }
    }

    impl From<DVec2> for Point2 {
        fn from(value: DVec2) -> Self {
            Self::from_vec(value)
        }
    }

    /// 二维向量。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Vector2(pub DVec2);

    impl Vector2 {
        #[inline]
        pub fn new(x: f64, y: f64) -> Self {
            Self(DVec2::new(x, y))
        }

        #[inline]
        pub fn from_points(start: Point2, end: Point2) -> Self {
            Self(end.0 - start.0)
        }

        #[inline]
        pub fn from_angle(angle: f64) -> Self {
            Self(DVec2::new(angle.cos(), angle.sin()))
        }

        #[inline]
        pub fn length(self) -> f64 {
            self.0.length()
        }

        /// 相对 +X 轴的方向角（弧度，范围 (-π, π]）。
        #[inline]
        pub fn angle(self) -> f64 {
            self.0.y.atan2(self.0.x)
        }

        #[inline]
        pub fn scale(self, factor: f64) -> Self {
            Self(self.0 * factor)
        }

        #[inline]
        pub fn as_vec2(self) -> DVec2 {
            self.0
        }

        #[inline]
        pub fn x(self) -> f64 {
            self.0.x
        }

        #[inline]
        pub fn y(self) -> f64 {
            self.0.y
        }
    }

    impl From<DVec2> for Vector2 {
        fn from(value: DVec2) -> Self {
            Self(value)
        }
    }

    /// 三维点。矢量流中的 2D 图元在变换前统一提升为三维点。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Point3(pub DVec3);

    impl Point3 {
        #[inline]
        pub fn new(x: f64, y: f64, z: f64) -> Self {
            Self(DVec3::new(x, y, z))
        }

        #[inline]
        pub fn x(self) -> f64 {
            self.0.x
        }

        #[inline]
        pub fn y(self) -> f64 {
            self.0.y
        }

        #[inline]
        pub fn as_vec3(self) -> DVec3 {
            self.0
        }

        /// 丢弃 Z 分量。
        #[inline]
        pub fn to_point2(self) -> Point2 {
            Point2::new(self.0.x, self.0.y)
        }
    }

    impl From<DVec3> for Point3 {
        fn from(value: DVec3) -> Self {
            Self(value)
        }
    }

    /// 轴对齐边界框，用于估算文档/实体范围。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Bounds2D {
        min: Point2,
        max: Point2,
    }

    impl Bounds2D {
        #[inline]
        pub fn new(min: Point2, max: Point2) -> Self {
            Self { min, max }
        }

        /// 由任意两个角点构造，自动排序分量。
        pub fn from_corners(a: Point2, b: Point2) -> Self {
            Self {
                min: Point2::from_vec(a.as_vec2().min(b.as_vec2())),
                max: Point2::from_vec(a.as_vec2().max(b.as_vec2())),
            }
        }

        #[inline]
        pub fn empty() -> Self {
            Self {
                min: Point2::new(f64::INFINITY, f64::INFINITY),
                max: Point2::new(f64::NEG_INFINITY, f64::NEG_INFINITY),
            }
        }

        #[inline]
        pub fn is_empty(&self) -> bool {
            self.min.x() > self.max.x() || self.min.y() > self.max.y()
        }

        #[inline]
        pub fn min(&self) -> Point2 {
            self.min
        }

        #[inline]
        pub fn max(&self) -> Point2 {
            self.max
        }

        #[inline]
        pub fn width(&self) -> f64 {
            self.max.x() - self.min.x()
        }

        #[inline]
        pub fn height(&self) -> f64 {
            self.max.y() - self.min.y()
        }

        pub fn include_point(&mut self, point: Point2) {
            if self.is_empty() {
                self.min = point;
                self.max = point;
                return;
            }
            let min_vec = self.min.as_vec2().min(point.as_vec2());
            let max_vec = self.max.as_vec2().max(point.as_vec2());
            self.min = Point2::from_vec(min_vec);
            self.max = Point2::from_vec(max_vec);
        }

        #[inline]
        pub fn center(&self) -> Point2 {
            debug_assert!(!self.is_empty());
            let min_vec = self.min.as_vec2();
            let max_vec = self.max.as_vec2();
            let center = (min_vec + max_vec) * 0.5;
            Point2::from_vec(center)
        }

        /// 逆时针顺序的四个角点，从左下角开始。
        pub fn corners(&self) -> [Point2; 4] {
            [
                self.min,
                Point2::new(self.max.x(), self.min.y()),
                self.max,
                Point2::new(self.min.x(), self.max.y()),
            ]
        }
    }

    /// 三维轴对齐边界框，两遍导入的第一遍以此累积全局范围。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Bounds3D {
        min: Point3,
        max: Point3,
    }

    impl Bounds3D {
        #[inline]
        pub fn from_point(point: Point3) -> Self {
            Self {
                min: point,
                max: point,
            }
        }

        #[inline]
        pub fn min(&self) -> Point3 {
            self.min
        }

        #[inline]
        pub fn max(&self) -> Point3 {
            self.max
        }

        pub fn include_point(&mut self, point: Point3) {
            self.min = Point3::from(self.min.as_vec3().min(point.as_vec3()));
            self.max = Point3::from(self.max.as_vec3().max(point.as_vec3()));
        }

        pub fn include_bounds(&mut self, other: &Bounds3D) {
            self.include_point(other.min);
            self.include_point(other.max);
        }

        /// 投影到 XY 平面。
        pub fn to_bounds2d(&self) -> Bounds2D {
            Bounds2D::new(self.min.to_point2(), self.max.to_point2())
        }
    }
}

pub mod document {
    use std::collections::{BTreeMap, HashMap};

    use serde::{Deserialize, Serialize};

    use crate::geometry::{Point2, Vector2};

    /// 文字宽度估算：每个字符的平均前进量（相对字高）。
    const CHAR_ADVANCE_RATIO: f64 = 0.6;
    /// TrueType 字体下沉部分（相对字高）。
    const DESCENT_RATIO: f64 = 0.25;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct EntityId(u64);

    impl EntityId {
        #[inline]
        pub fn new(raw: u64) -> Self {
            Self(raw)
        }

        /// 提供原始数值，便于序列化或日志输出。
        #[inline]
        pub fn get(self) -> u64 {
            self.0
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct BlockId(usize);

    impl BlockId {
        #[inline]
        pub fn get(self) -> usize {
            self.0
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct LayoutId(usize);

    impl LayoutId {
        #[inline]
        pub fn get(self) -> usize {
            self.0
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct Layer {
        pub name: String,
        pub is_visible: bool,
    }

    impl Layer {
        #[inline]
        pub fn new(name: impl Into<String>) -> Self {
            Self {
                name: name.into(),
                is_visible: true,
            }
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub enum Entity {
        Line(Line),
        Circle(Circle),
        Arc(Arc),
        Ellipse(Ellipse),
        Polyline(Polyline),
        Point(PointEntity),
        MText(MText),
        BlockReference(BlockReference),
        Hatch(Hatch),
        RasterImage(RasterImage),
    }

    impl Entity {
        #[inline]
        pub fn layer_name(&self) -> &str {
            match self {
                Entity::Line(line) => &line.layer,
                Entity::Circle(circle) => &circle.layer,
                Entity::Arc(arc) => &arc.layer,
                Entity::Ellipse(ellipse) => &ellipse.layer,
                Entity::Polyline(polyline) => &polyline.layer,
                Entity::Point(point) => &point.layer,
                Entity::MText(mtext) => &mtext.layer,
                Entity::BlockReference(reference) => &reference.layer,
                Entity::Hatch(hatch) => &hatch.layer,
                Entity::RasterImage(image) => &image.layer,
            }
        }

        /// 实体类型名，便于日志输出。
        pub fn kind_name(&self) -> &'static str {
            match self {
                Entity::Line(_) => "line",
                Entity::Circle(_) => "circle",
                Entity::Arc(_) => "arc",
                Entity::Ellipse(_) => "ellipse",
                Entity::Polyline(_) => "polyline",
                Entity::Point(_) => "point",
                Entity::MText(_) => "mtext",
                Entity::BlockReference(_) => "block_reference",
                Entity::Hatch(_) => "hatch",
                Entity::RasterImage(_) => "raster_image",
            }
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct Line {
        pub start: Point2,
        pub end: Point2,
        pub color: Option<u32>,
        pub layer: String,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct Circle {
        pub center: Point2,
        pub radius: f64,
        pub color: Option<u32>,
        pub layer: String,
    }

    /// 圆弧实体，角度以弧度形式储存，遵循数学正方向。
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct Arc {
        pub center: Point2,
        pub radius: f64,
        pub start_angle: f64,
        pub end_angle: f64,
        pub color: Option<u32>,
        pub layer: String,
    }

    /// 椭圆实体，记录主轴向量与参数范围（单位为弧度）。
    ///
    /// `ratio` 为短轴/主轴之比，必须满足 `0 < ratio <= 1`。
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct Ellipse {
        pub center: Point2,
        pub major_axis: Vector2,
        pub ratio: f64,
        pub start_parameter: f64,
        pub end_parameter: f64,
        pub color: Option<u32>,
        pub layer: String,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct Polyline {
        pub vertices: Vec<PolylineVertex>,
        pub is_closed: bool,
        pub color: Option<u32>,
        pub layer: String,
    }

    impl Polyline {
        /// 不含凸度的普通多段线。
        pub fn is_plain(&self) -> bool {
            self.vertices.iter().all(|vertex| vertex.bulge == 0.0)
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct PolylineVertex {
        pub position: Point2,
        pub bulge: f64,
    }

    impl PolylineVertex {
        #[inline]
        pub fn new(position: Point2) -> Self {
            Self {
                position,
                bulge: 0.0,
            }
        }

        #[inline]
        pub fn with_bulge(position: Point2, bulge: f64) -> Self {
            Self { position, bulge }
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct PointEntity {
        pub position: Point2,
        pub color: Option<u32>,
        pub layer: String,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct MText {
        pub insert: Point2,
        pub content: String,
        pub height: f64,
        pub reference_width: Option<f64>,
        pub direction: Vector2,
        pub attachment_point: i16,
        pub drawing_direction: i16,
        pub style: Option<String>,
        pub color: Option<u32>,
        pub layer: String,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum HatchLoopKind {
        External,
        Default,
    }

    /// 填充边界环：按顺序排列的顶点（可带凸度）。
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct HatchLoop {
        pub kind: HatchLoopKind,
        pub vertices: Vec<PolylineVertex>,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct HatchGradient {
        pub name: String,
        pub angle: f64,
        pub shift: Option<f64>,
        pub tint: Option<f64>,
        pub is_single_color: bool,
        pub color1: Option<u32>,
        pub color2: Option<u32>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct Hatch {
        pub pattern_name: String,
        pub is_solid: bool,
        pub loops: Vec<HatchLoop>,
        pub gradient: Option<HatchGradient>,
        pub color: Option<u32>,
        pub layer: String,
    }

    impl Hatch {
        /// 实心单色填充（非渐变）。
        pub fn is_plain_solid(&self) -> bool {
            self.is_solid && self.gradient.is_none()
        }
    }

    /// 多边形裁剪边界，附着于单个块参照，创建后不再修改。
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct ClipRegion {
        pub vertices: Vec<Point2>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct BlockReference {
        pub block: BlockId,
        pub name: String,
        pub insert: Point2,
        pub scale: Vector2,
        pub rotation: f64,
        pub clip: Option<ClipRegion>,
        pub layer: String,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum PixelFormat {
        Bitonal,
        Group3X,
        Indexed,
        Mapped,
        Rgb,
        Rgba,
        Jpeg,
        Png,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct RasterImage {
        pub layer: String,
        pub image_def_handle: String,
        pub insert: Point2,
        pub u_vector: Vector2,
        pub v_vector: Vector2,
        pub image_size: Vector2,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct RasterImageDefinition {
        pub handle: String,
        pub name: Option<String>,
        pub pixel_format: PixelFormat,
        pub width: u32,
        pub height: u32,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        pub palette: Vec<u32>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        pub pixels: Vec<u8>,
    }

    /// 文字样式。`anchors_at_baseline` 为真时文字以基线而非外框定位。
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct TextStyle {
        pub name: String,
        pub font_name: String,
        pub width_factor: f64,
        pub is_bold: bool,
        pub is_italic: bool,
        pub anchors_at_baseline: bool,
    }

    /// 按样式与字高估算的文字范围。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct TextExtents {
        pub width: f64,
        pub ascent: f64,
        pub descent: f64,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct ViewportGeometry {
        pub center: Point2,
        pub size: Vector2,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct NamedView {
        pub name: String,
        pub center: Point2,
        pub size: Vector2,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum PaperUnits {
        Inches,
        Millimeters,
    }

    impl PaperUnits {
        /// 换算到毫米的倍数。
        #[inline]
        pub fn to_millimeters(self) -> f64 {
            match self {
                PaperUnits::Inches => 25.4,
                PaperUnits::Millimeters => 1.0,
            }
        }
    }

    /// 布局：图纸尺寸以毫米记录，`block` 为布局所属的块。
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct Layout {
        pub name: String,
        pub block: BlockId,
        pub paper_width: f64,
        pub paper_height: f64,
        pub plot_units: PaperUnits,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct Group {
        pub id: i32,
        pub name: String,
        pub entities: Vec<EntityId>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct StoredEntity {
        pub id: EntityId,
        pub entity: Entity,
        pub is_visible: bool,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct BlockDefinition {
        pub name: String,
        pub base_point: Point2,
        pub entities: Vec<StoredEntity>,
        pub viewport: Option<ViewportGeometry>,
    }

    impl BlockDefinition {
        fn new(name: impl Into<String>) -> Self {
            Self {
                name: name.into(),
                base_point: Point2::new(0.0, 0.0),
                entities: Vec::new(),
                viewport: None,
            }
        }
    }

    /// 目标图形数据库。
    ///
    /// 实体按块存放；模型空间与每个布局各自拥有一个块。“当前块/当前编组/当前可见性”
    /// 是游标式状态，新实体总是写入当前块。
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct Document {
        layers: HashMap<String, Layer>,
        blocks: Vec<BlockDefinition>,
        layouts: Vec<Layout>,
        current_layout: LayoutId,
        current_block: BlockId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        current_group: Option<i32>,
        current_visibility: bool,
        #[serde(default)]
        groups: BTreeMap<i32, Group>,
        #[serde(default)]
        text_styles: HashMap<String, TextStyle>,
        image_definitions: HashMap<String, RasterImageDefinition>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        named_views: Vec<NamedView>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model_viewport: Option<ViewportGeometry>,
        next_entity_id: u64,
    }

    impl Default for Document {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Document {
        /// 新建文档：图层 "0"、模型空间块与一个 A4 横向（297×210mm）的 "Model" 布局。
        pub fn new() -> Self {
            let mut doc = Self {
                layers: HashMap::new(),
                blocks: vec![BlockDefinition::new("*Model_Space")],
                layouts: Vec::new(),
                current_layout: LayoutId(0),
                current_block: BlockId(0),
                current_group: None,
                current_visibility: true,
                groups: BTreeMap::new(),
                text_styles: HashMap::new(),
                image_definitions: HashMap::new(),
                named_views: Vec::new(),
                model_viewport: None,
                next_entity_id: 0,
            };
            doc.layouts.push(Layout {
                name: "Model".to_string(),
                block: BlockId(0),
                paper_width: 297.0,
                paper_height: 210.0,
                plot_units: PaperUnits::Millimeters,
            });
            doc.ensure_layer("0");
            doc
        }

        pub fn ensure_layer(&mut self, name: impl AsRef<str>) {
            let key = name.as_ref();
            self.layers
                .entry(key.to_string())
                .or_insert_with(|| Layer::new(key));
        }

        #[inline]
        pub fn layer(&self, name: &str) -> Option<&Layer> {
            self.layers.get(name)
        }

        #[inline]
        pub fn layers(&self) -> impl Iterator<Item = &Layer> {
            self.layers.values()
        }

        pub fn add_line(
            &mut self,
            start: Point2,
            end: Point2,
            layer: impl Into<String>,
        ) -> EntityId {
            self.add_entity(Entity::Line(Line {
                start,
                end,
                color: None,
                layer: layer.into(),
            }))
        }

        pub fn add_circle(
            &mut self,
            center: Point2,
            radius: f64,
            layer: impl Into<String>,
        ) -> EntityId {
            self.add_entity(Entity::Circle(Circle {
                center,
                radius,
                color: None,
                layer: layer.into(),
            }))
        }

        pub fn add_polyline<I>(
            &mut self,
            points: I,
            is_closed: bool,
            layer: impl Into<String>,
        ) -> EntityId
        where
            I: IntoIterator<Item = Point2>,
        {
            let vertices = points.into_iter().map(PolylineVertex::new).collect();
            self.add_entity(Entity::Polyline(Polyline {
                vertices,
                is_closed,
                color: None,
                layer: layer.into(),
            }))
        }

        /// 创建一个不含边界环的填充实体，边界随后通过 [`Document::append_hatch_loop`] 追加。
        pub fn add_hatch(
            &mut self,
            is_solid: bool,
            gradient: Option<HatchGradient>,
            color: Option<u32>,
            layer: impl Into<String>,
        ) -> EntityId {
            let pattern_name = if gradient.is_some() {
                "GRADIENT".to_string()
            } else {
                "SOLID".to_string()
            };
            self.add_entity(Entity::Hatch(Hatch {
                pattern_name,
                is_solid,
                loops: Vec::new(),
                gradient,
                color,
                layer: layer.into(),
            }))
        }

        /// 为已有填充追加边界环。`bulges` 可为空，否则长度需与 `points` 一致。
        pub fn append_hatch_loop(
            &mut self,
            hatch: EntityId,
            kind: HatchLoopKind,
            points: &[Point2],
            bulges: &[f64],
        ) -> bool {
            if !bulges.is_empty() && bulges.len() != points.len() {
                return false;
            }
            let Some(Entity::Hatch(hatch)) = self.entity_mut(hatch) else {
                return false;
            };
            let vertices = points
                .iter()
                .enumerate()
                .map(|(index, point)| {
                    PolylineVertex::with_bulge(*point, bulges.get(index).copied().unwrap_or(0.0))
                })
                .collect();
            hatch.loops.push(HatchLoop { kind, vertices });
            true
        }

        /// 在当前块中插入对 `block` 的引用。
        pub fn add_block_reference(
            &mut self,
            block: BlockId,
            insert: Point2,
            layer: impl Into<String>,
        ) -> Option<EntityId> {
            let name = self.blocks.get(block.0)?.name.clone();
            Some(self.add_entity(Entity::BlockReference(BlockReference {
                block,
                name,
                insert,
                scale: Vector2::new(1.0, 1.0),
                rotation: 0.0,
                clip: None,
                layer: layer.into(),
            })))
        }

        /// 为块参照附着裁剪边界。目标不是块参照或已有裁剪时返回 false。
        pub fn attach_clip_region(&mut self, reference: EntityId, region: ClipRegion) -> bool {
            match self.entity_mut(reference) {
                Some(Entity::BlockReference(reference)) if reference.clip.is_none() => {
                    reference.clip = Some(region);
                    true
                }
                _ => false,
            }
        }

        pub fn add_raster_image_definition(&mut self, definition: RasterImageDefinition) {
            self.image_definitions
                .insert(definition.handle.clone(), definition);
        }

        pub fn raster_image_definition(&self, handle: &str) -> Option<&RasterImageDefinition> {
            self.image_definitions.get(handle)
        }

        /// 写入当前块；实体继承当前可见性，并登记到当前编组。
        pub fn add_entity(&mut self, entity: Entity) -> EntityId {
            self.ensure_layer(entity.layer_name());
            let id = self.next_id();
            if let Some(group) = self
                .current_group
                .and_then(|group| self.groups.get_mut(&group))
            {
                group.entities.push(id);
            }
            let is_visible = self.current_visibility;
            self.blocks[self.current_block.0].entities.push(StoredEntity {
                id,
                entity,
                is_visible,
            });
            id
        }

        /// 删除实体，返回实体是否存在。
        pub fn erase(&mut self, id: EntityId) -> bool {
            let mut erased = false;
            for block in &mut self.blocks {
                let before = block.entities.len();
                block.entities.retain(|stored| stored.id != id);
                if block.entities.len() != before {
                    erased = true;
                    break;
                }
            }
            if erased {
                for group in self.groups.values_mut() {
                    group.entities.retain(|member| *member != id);
                }
            }
            erased
        }

        /// 所有块中的实体。
        pub fn entities(&self) -> impl Iterator<Item = &StoredEntity> {
            self.blocks.iter().flat_map(|block| block.entities.iter())
        }

        pub fn entities_in(&self, block: BlockId) -> impl Iterator<Item = &StoredEntity> {
            self.blocks
                .get(block.0)
                .into_iter()
                .flat_map(|block| block.entities.iter())
        }

        #[inline]
        pub fn entity(&self, id: EntityId) -> Option<&Entity> {
            self.stored_entity(id).map(|stored| &stored.entity)
        }

        pub fn stored_entity(&self, id: EntityId) -> Option<&StoredEntity> {
            self.entities().find(|stored| stored.id == id)
        }

        fn entity_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
            self.blocks
                .iter_mut()
                .flat_map(|block| block.entities.iter_mut())
                .find(|stored| stored.id == id)
                .map(|stored| &mut stored.entity)
        }

        /// 新建块。名称冲突时追加序号保证唯一。
        pub fn create_block(&mut self, name: &str) -> BlockId {
            let mut candidate = name.to_string();
            let mut suffix = 1;
            while self.block_by_name(&candidate).is_some() {
                candidate = format!("{name}{suffix}");
                suffix += 1;
            }
            self.blocks.push(BlockDefinition::new(candidate));
            BlockId(self.blocks.len() - 1)
        }

        #[inline]
        pub fn block(&self, id: BlockId) -> Option<&BlockDefinition> {
            self.blocks.get(id.0)
        }

        pub fn block_by_name(&self, name: &str) -> Option<BlockId> {
            self.blocks
                .iter()
                .position(|block| block.name.eq_ignore_ascii_case(name))
                .map(BlockId)
        }

        #[inline]
        pub fn blocks(&self) -> impl Iterator<Item = &BlockDefinition> {
            self.blocks.iter()
        }

        #[inline]
        pub fn model_space(&self) -> BlockId {
            BlockId(0)
        }

        #[inline]
        pub fn layout(&self, id: LayoutId) -> Option<&Layout> {
            self.layouts.get(id.0)
        }

        pub fn layout_mut(&mut self, id: LayoutId) -> Option<&mut Layout> {
            self.layouts.get_mut(id.0)
        }

        #[inline]
        pub fn current_layout(&self) -> LayoutId {
            self.current_layout
        }

        #[inline]
        pub fn current_block(&self) -> BlockId {
            self.current_block
        }

        pub fn set_current_block(&mut self, block: BlockId) -> bool {
            if block.0 >= self.blocks.len() {
                return false;
            }
            self.current_block = block;
            true
        }

        /// 设置当前编组；`None` 表示后续实体不归入任何编组。
        pub fn set_current_group(&mut self, group: Option<(i32, &str)>) {
            match group {
                Some((id, name)) => {
                    let entry = self.groups.entry(id).or_insert_with(|| Group {
                        id,
                        name: name.to_string(),
                        entities: Vec::new(),
                    });
                    if !name.is_empty() {
                        entry.name = name.to_string();
                    }
                    self.current_group = Some(id);
                }
                None => self.current_group = None,
            }
        }

        #[inline]
        pub fn current_group(&self) -> Option<i32> {
            self.current_group
        }

        pub fn group(&self, id: i32) -> Option<&Group> {
            self.groups.get(&id)
        }

        #[inline]
        pub fn current_visibility(&self) -> bool {
            self.current_visibility
        }

        #[inline]
        pub fn set_current_visibility(&mut self, is_visible: bool) {
            self.current_visibility = is_visible;
        }

        /// 登记文字样式，同名样式被覆盖。
        pub fn ensure_text_style(&mut self, style: TextStyle) -> &TextStyle {
            let name = style.name.clone();
            self.text_styles.insert(name.clone(), style);
            &self.text_styles[&name]
        }

        pub fn text_style(&self, name: &str) -> Option<&TextStyle> {
            self.text_styles.get(name)
        }

        /// 等宽近似的文字范围。基线定位字体带下沉部分，形文件字体没有。
        pub fn text_extents(&self, style: &str, text: &str, height: f64) -> Option<TextExtents> {
            let style = self.text_styles.get(style)?;
            let count = text.chars().count() as f64;
            let descent = if style.anchors_at_baseline {
                height * DESCENT_RATIO
            } else {
                0.0
            };
            Some(TextExtents {
                width: count * height * CHAR_ADVANCE_RATIO * style.width_factor,
                ascent: height,
                descent,
            })
        }

        #[inline]
        pub fn set_model_viewport(&mut self, viewport: ViewportGeometry) {
            self.model_viewport = Some(viewport);
        }

        #[inline]
        pub fn model_viewport(&self) -> Option<ViewportGeometry> {
            self.model_viewport
        }

        pub fn set_block_viewport(&mut self, block: BlockId, viewport: ViewportGeometry) -> bool {
            match self.blocks.get_mut(block.0) {
                Some(definition) => {
                    definition.viewport = Some(viewport);
                    true
                }
                None => false,
            }
        }

        pub fn add_named_view(&mut self, view: NamedView) {
            self.named_views.push(view);
        }

        pub fn named_views(&self) -> impl Iterator<Item = &NamedView> {
            self.named_views.iter()
        }

        #[inline]
        fn next_id(&mut self) -> EntityId {
            let id = self.next_entity_id;
            self.next_entity_id += 1;
            EntityId(id)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::geometry::Point2;

        #[test]
        fn document_stores_entities_in_current_block() {
            let mut doc = Document::new();
            let line = doc.add_line(Point2::new(0.0, 0.0), Point2::new(10.0, 0.0), "0");
            let circle = doc.add_circle(Point2::new(5.0, 5.0), 2.0, "ANNOT");

            let block = doc.create_block("*VP");
            assert!(doc.set_current_block(block));
            let polyline = doc.add_polyline(
                [
                    Point2::new(0.0, 0.0),
                    Point2::new(2.0, 2.0),
                    Point2::new(4.0, 0.0),
                ],
                true,
                "SHAPE",
            );

            assert_eq!(line.get(), 0);
            assert_eq!(circle.get(), 1);
            assert_eq!(polyline.get(), 2);
            assert_eq!(doc.entities_in(doc.model_space()).count(), 2);
            assert_eq!(doc.entities_in(block).count(), 1);
            assert_eq!(doc.entities().count(), 3);

            let layers: Vec<_> = doc.layers().map(|l| l.name.clone()).collect();
            assert!(layers.contains(&"ANNOT".to_string()));
            assert!(layers.contains(&"SHAPE".to_string()));
        }

        #[test]
        fn erase_removes_entity_and_group_membership() {
            let mut doc = Document::new();
            doc.set_current_group(Some((7, "walls")));
            let id = doc.add_line(Point2::new(0.0, 0.0), Point2::new(1.0, 0.0), "0");
            assert_eq!(doc.group(7).map(|g| g.entities.len()), Some(1));

            assert!(doc.erase(id));
            assert!(doc.entity(id).is_none());
            assert_eq!(doc.group(7).map(|g| g.entities.len()), Some(0));
            assert!(!doc.erase(id));
        }

        #[test]
        fn hatch_loops_are_appended_with_bulges() {
            let mut doc = Document::new();
            let hatch = doc.add_hatch(true, None, Some(0xff0000), "FILL");
            let points = [Point2::new(-1.0, 0.0), Point2::new(1.0, 0.0)];
            assert!(doc.append_hatch_loop(hatch, HatchLoopKind::External, &points, &[1.0, 1.0]));
            assert!(!doc.append_hatch_loop(hatch, HatchLoopKind::External, &points, &[1.0]));

            match doc.entity(hatch) {
                Some(Entity::Hatch(hatch)) => {
                    assert!(hatch.is_plain_solid());
                    assert_eq!(hatch.loops.len(), 1);
                    assert_eq!(hatch.loops[0].vertices[1].bulge, 1.0);
                }
                other => panic!("unexpected entity: {other:?}"),
            }
        }

        #[test]
        fn clip_region_attaches_once() {
            let mut doc = Document::new();
            let block = doc.create_block("*VP");
            let reference = doc
                .add_block_reference(block, Point2::new(0.0, 0.0), "0")
                .expect("block exists");
            let region = ClipRegion {
                vertices: vec![
                    Point2::new(0.0, 0.0),
                    Point2::new(1.0, 0.0),
                    Point2::new(1.0, 1.0),
                ],
            };
            assert!(doc.attach_clip_region(reference, region.clone()));
            assert!(!doc.attach_clip_region(reference, region));
        }

        #[test]
        fn create_block_keeps_names_unique() {
            let mut doc = Document::new();
            let first = doc.create_block("*VP");
            let second = doc.create_block("*VP");
            assert_ne!(first, second);
            assert_eq!(doc.block(second).map(|b| b.name.as_str()), Some("*VP1"));
        }

        #[test]
        fn text_extents_depend_on_font_kind() {
            let mut doc = Document::new();
            doc.ensure_text_style(TextStyle {
                name: "Arial".to_string(),
                font_name: "arial.ttf".to_string(),
                width_factor: 1.0,
                is_bold: false,
                is_italic: false,
                anchors_at_baseline: true,
            });
            let extents = doc.text_extents("Arial", "abcd", 2.0).expect("style exists");
            assert!((extents.width - 4.8).abs() < 1e-9);
            assert!((extents.descent - 0.5).abs() < 1e-9);
            assert!(doc.text_extents("missing", "abcd", 2.0).is_none());
        }
    }
}
