//! 导入引擎使用的目标数据库门面，以及 [`Document`] 对它的实现。

use zcad_core::document::{
    BlockId, ClipRegion, Document, Entity, EntityId, HatchGradient, HatchLoopKind,
    NamedView, PaperUnits, PixelFormat, RasterImage, RasterImageDefinition, TextExtents,
    TextStyle, ViewportGeometry,
};
use zcad_core::geometry::{Bounds2D, Point2, Vector2};

use crate::ImportError;

/// 字体描述：由字体操作码生成，交给数据库解析为文字样式。
#[derive(Debug, Clone, PartialEq)]
pub struct FontDescriptor {
    name: String,
    is_bold: bool,
    is_italic: bool,
}

impl FontDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_bold: false,
            is_italic: false,
        }
    }

    pub fn bold(mut self, is_bold: bool) -> Self {
        self.is_bold = is_bold;
        self
    }

    pub fn italic(mut self, is_italic: bool) -> Self {
        self.is_italic = is_italic;
        self
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// 字体解析结果。
#[derive(Debug, Clone, PartialEq)]
pub struct FontResolution {
    pub style: String,
    /// 样式按基线（而非外框）定位文字。
    pub anchors_at_baseline: bool,
}

/// 填充实体的描述，边界环随后逐个追加。
#[derive(Debug, Clone, PartialEq)]
pub struct HatchDescriptor {
    gradient: Option<HatchGradient>,
    color: Option<u32>,
    layer: String,
}

impl HatchDescriptor {
    pub fn solid(color: Option<u32>, layer: impl Into<String>) -> Self {
        Self {
            gradient: None,
            color,
            layer: layer.into(),
        }
    }

    pub fn gradient(gradient: HatchGradient, layer: impl Into<String>) -> Self {
        Self {
            gradient: Some(gradient),
            color: None,
            layer: layer.into(),
        }
    }

    #[inline]
    pub fn gradient_fill(&self) -> Option<&HatchGradient> {
        self.gradient.as_ref()
    }

    #[inline]
    pub fn color(&self) -> Option<u32> {
        self.color
    }

    #[inline]
    pub fn layer(&self) -> &str {
        &self.layer
    }
}

/// 光栅图像描述：像素已按存储格式整理，`bounds` 为目标坐标范围。
#[derive(Debug, Clone, PartialEq)]
pub struct ImageDescriptor {
    identifier: u32,
    pixel_format: PixelFormat,
    width: u32,
    height: u32,
    palette: Vec<u32>,
    pixels: Vec<u8>,
    bounds: Bounds2D,
    layer: String,
}

impl ImageDescriptor {
    pub fn new(
        identifier: u32,
        pixel_format: PixelFormat,
        width: u32,
        height: u32,
        bounds: Bounds2D,
    ) -> Self {
        Self {
            identifier,
            pixel_format,
            width,
            height,
            palette: Vec::new(),
            pixels: Vec::new(),
            bounds,
            layer: "0".to_string(),
        }
    }

    pub fn with_palette(mut self, palette: Vec<u32>) -> Self {
        self.palette = palette;
        self
    }

    pub fn with_pixels(mut self, pixels: Vec<u8>) -> Self {
        self.pixels = pixels;
        self
    }

    pub fn on_layer(mut self, layer: impl Into<String>) -> Self {
        self.layer = layer.into();
        self
    }

    #[inline]
    pub fn identifier(&self) -> u32 {
        self.identifier
    }

    #[inline]
    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    #[inline]
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    #[inline]
    pub fn bounds(&self) -> Bounds2D {
        self.bounds
    }
}

/// 目标图形数据库门面。
///
/// 块、编组与可见性是游标式状态：新实体写入当前块，归入当前编组并继承当前可见性。
pub trait DrawingDatabase {
    /// 当前布局所属的块。
    fn layout_block(&self) -> BlockId;
    /// 当前布局的图纸尺寸（毫米）。
    fn layout_paper(&self) -> (f64, f64);
    fn set_layout_paper(&mut self, width_mm: f64, height_mm: f64, units: PaperUnits);

    fn current_block(&self) -> BlockId;
    fn set_current_block(&mut self, block: BlockId) -> Result<(), ImportError>;
    fn set_current_group(&mut self, group: Option<(i32, &str)>);
    fn set_current_layer(&mut self, name: &str);
    fn current_visibility(&self) -> bool;
    fn set_current_visibility(&mut self, is_visible: bool);

    fn set_font_style(&mut self, font: &FontDescriptor) -> FontResolution;
    fn text_extents(&self, style: &str, text: &str, height: f64) -> Option<TextExtents>;

    fn add_entity(&mut self, entity: Entity) -> EntityId;
    fn erase(&mut self, id: EntityId) -> bool;
    fn entity(&self, id: EntityId) -> Option<&Entity>;
    fn block_entities(&self, block: BlockId) -> Vec<EntityId>;

    fn add_hatch(&mut self, hatch: HatchDescriptor) -> EntityId;
    fn append_loop(
        &mut self,
        hatch: EntityId,
        kind: HatchLoopKind,
        points: &[Point2],
        bulges: &[f64],
    ) -> Result<(), ImportError>;

    fn create_block(&mut self, name: &str) -> BlockId;
    fn add_block_reference(
        &mut self,
        block: BlockId,
        insert: Point2,
        layer: &str,
    ) -> Result<EntityId, ImportError>;
    fn attach_clip_region(
        &mut self,
        reference: EntityId,
        region: ClipRegion,
    ) -> Result<(), ImportError>;

    fn set_model_viewport(&mut self, viewport: ViewportGeometry);
    fn set_block_viewport(
        &mut self,
        block: BlockId,
        viewport: ViewportGeometry,
    ) -> Result<(), ImportError>;
    fn add_named_view(&mut self, view: NamedView);

    fn add_image(&mut self, image: ImageDescriptor) -> EntityId;
}

fn database_error(operation: &'static str, message: impl Into<String>) -> ImportError {
    ImportError::Database {
        operation,
        message: message.into(),
    }
}

impl DrawingDatabase for Document {
    fn layout_block(&self) -> BlockId {
        self.layout(self.current_layout())
            .map(|layout| layout.block)
            .unwrap_or_else(|| self.model_space())
    }

    fn layout_paper(&self) -> (f64, f64) {
        self.layout(self.current_layout())
            .map(|layout| (layout.paper_width, layout.paper_height))
            .unwrap_or((0.0, 0.0))
    }

    fn set_layout_paper(&mut self, width_mm: f64, height_mm: f64, units: PaperUnits) {
        let current = self.current_layout();
        if let Some(layout) = self.layout_mut(current) {
            layout.paper_width = width_mm;
            layout.paper_height = height_mm;
            layout.plot_units = units;
        }
    }

    fn current_block(&self) -> BlockId {
        Document::current_block(self)
    }

    fn set_current_block(&mut self, block: BlockId) -> Result<(), ImportError> {
        if Document::set_current_block(self, block) {
            Ok(())
        } else {
            Err(database_error(
                "set_current_block",
                format!("块 {} 不存在", block.get()),
            ))
        }
    }

    fn set_current_group(&mut self, group: Option<(i32, &str)>) {
        Document::set_current_group(self, group);
    }

    fn set_current_layer(&mut self, name: &str) {
        self.ensure_layer(name);
    }

    fn current_visibility(&self) -> bool {
        Document::current_visibility(self)
    }

    fn set_current_visibility(&mut self, is_visible: bool) {
        Document::set_current_visibility(self, is_visible);
    }

    fn set_font_style(&mut self, font: &FontDescriptor) -> FontResolution {
        // 形文件字体以外框定位，其余字体以基线定位
        let name = font.name();
        let anchors_at_baseline = !name.to_ascii_lowercase().ends_with(".shx");
        let style = self.ensure_text_style(TextStyle {
            name: name.to_string(),
            font_name: name.to_string(),
            width_factor: 1.0,
            is_bold: font.is_bold,
            is_italic: font.is_italic,
            anchors_at_baseline,
        });
        FontResolution {
            style: style.name.clone(),
            anchors_at_baseline: style.anchors_at_baseline,
        }
    }

    fn text_extents(&self, style: &str, text: &str, height: f64) -> Option<TextExtents> {
        Document::text_extents(self, style, text, height)
    }

    fn add_entity(&mut self, entity: Entity) -> EntityId {
        Document::add_entity(self, entity)
    }

    fn erase(&mut self, id: EntityId) -> bool {
        Document::erase(self, id)
    }

    fn entity(&self, id: EntityId) -> Option<&Entity> {
        Document::entity(self, id)
    }

    fn block_entities(&self, block: BlockId) -> Vec<EntityId> {
        self.entities_in(block).map(|stored| stored.id).collect()
    }

    fn add_hatch(&mut self, hatch: HatchDescriptor) -> EntityId {
        let gradient = hatch.gradient_fill().cloned();
        Document::add_hatch(self, gradient.is_none(), gradient, hatch.color(), hatch.layer())
    }

    fn append_loop(
        &mut self,
        hatch: EntityId,
        kind: HatchLoopKind,
        points: &[Point2],
        bulges: &[f64],
    ) -> Result<(), ImportError> {
        if self.append_hatch_loop(hatch, kind, points, bulges) {
            Ok(())
        } else {
            Err(database_error(
                "append_loop",
                format!("无法向实体 {} 追加边界环", hatch.get()),
            ))
        }
    }

    fn create_block(&mut self, name: &str) -> BlockId {
        Document::create_block(self, name)
    }

    fn add_block_reference(
        &mut self,
        block: BlockId,
        insert: Point2,
        layer: &str,
    ) -> Result<EntityId, ImportError> {
        Document::add_block_reference(self, block, insert, layer).ok_or_else(|| {
            database_error("add_block_reference", format!("块 {} 不存在", block.get()))
        })
    }

    fn attach_clip_region(
        &mut self,
        reference: EntityId,
        region: ClipRegion,
    ) -> Result<(), ImportError> {
        if Document::attach_clip_region(self, reference, region) {
            Ok(())
        } else {
            Err(database_error(
                "attach_clip_region",
                format!("实体 {} 不是未裁剪的块参照", reference.get()),
            ))
        }
    }

    fn set_model_viewport(&mut self, viewport: ViewportGeometry) {
        Document::set_model_viewport(self, viewport);
    }

    fn set_block_viewport(
        &mut self,
        block: BlockId,
        viewport: ViewportGeometry,
    ) -> Result<(), ImportError> {
        if Document::set_block_viewport(self, block, viewport) {
            Ok(())
        } else {
            Err(database_error(
                "set_block_viewport",
                format!("块 {} 不存在", block.get()),
            ))
        }
    }

    fn add_named_view(&mut self, view: NamedView) {
        Document::add_named_view(self, view);
    }

    fn add_image(&mut self, image: ImageDescriptor) -> EntityId {
        let handle = format!("IMG{:X}", image.identifier());
        let (width, height) = image.size();
        let bounds = image.bounds();
        self.add_raster_image_definition(RasterImageDefinition {
            handle: handle.clone(),
            name: None,
            pixel_format: image.pixel_format(),
            width,
            height,
            palette: image.palette,
            pixels: image.pixels,
        });
        self.add_entity(Entity::RasterImage(RasterImage {
            layer: image.layer,
            image_def_handle: handle,
            insert: bounds.min(),
            u_vector: Vector2::new(bounds.width(), 0.0),
            v_vector: Vector2::new(0.0, bounds.height()),
            image_size: Vector2::new(f64::from(width), f64::from(height)),
        }))
    }
}

/// 是否为上游留下的占位裁剪可视化：恰好一条普通多段线加一个实心填充。
pub fn is_placeholder_pair(first: &Entity, second: &Entity) -> bool {
    let is_polyline = |entity: &Entity| matches!(entity, Entity::Polyline(p) if p.is_plain());
    let is_solid = |entity: &Entity| matches!(entity, Entity::Hatch(h) if h.is_plain_solid());
    (is_polyline(first) && is_solid(second)) || (is_solid(first) && is_polyline(second))
}
