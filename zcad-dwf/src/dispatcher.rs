//! 操作码分发：每种操作码一个处理分支，把分类、文字与视口组件的结果写入数据库。
//!
//! 收集模式下所有图元只扩展全局边界，不写数据库；单位、绘图信息与命名视图在
//! 收集模式下写入解析器状态，在激活模式下不做任何事。

use std::collections::HashMap;
use std::f64::consts::TAU;

use tracing::{debug, warn};
use zcad_config::ImportConfig;
use zcad_core::document::{
    Arc, Circle, Ellipse, Entity, EntityId, HatchLoopKind, Line, MText, NamedView, PointEntity,
    Polyline, PolylineVertex, ViewportGeometry,
};
use zcad_core::geometry::{Bounds2D, Point2, Vector2};

use crate::ImportError;
use crate::database::{
    DrawingDatabase, FontDescriptor, FontResolution, HatchDescriptor, ImageDescriptor,
};
use crate::geometry::{
    EllipseShape, circle_loop, classify_ellipse, hatch_loop, is_full_sweep, unroll_triangle_strip,
};
use crate::gradient::{TriangleFill, triangle_fill};
use crate::image::prepare_image;
use crate::opcode::{
    EllipseRecord, FontRecord, GouraudRecord, ImageRecord, LayerRecord, ObjectNodeRecord, Opcode,
    Rgba, TextRecord, ViewRecord,
};
use crate::resolver::{PaperInfo, Resolver, UnitsOutcome};
use crate::text::reconstruct_text;
use crate::viewport::{ViewportChange, ViewportExtractor};

/// 导入过程中的软断言与策略性跳过计数。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportDiagnostics {
    pub tolerance_fallbacks: usize,
    pub heuristic_mismatches: usize,
    pub image_swaps: usize,
    pub placeholders_erased: usize,
    pub degenerate_primitives: usize,
    pub malformed_gradients: usize,
}

/// 第二遍的游标状态：当前图层、颜色、填充、字体，以及编号到名称的映射。
#[derive(Debug, Clone)]
pub struct ImportContext {
    pub layer: String,
    pub color: Option<Rgba>,
    pub fill: bool,
    pub font: FontRecord,
    pub font_style: Option<FontResolution>,
    pub view_seen: bool,
    pub entities_created: usize,
    layer_names: HashMap<i32, String>,
    group_names: HashMap<i32, String>,
}

impl Default for ImportContext {
    fn default() -> Self {
        Self {
            layer: "0".to_string(),
            color: None,
            fill: false,
            font: FontRecord::default(),
            font_style: None,
            view_seen: false,
            entities_created: 0,
            layer_names: HashMap::new(),
            group_names: HashMap::new(),
        }
    }
}

impl ImportContext {
    /// 图层名只在首次出现时给出；从未命名的编号使用 `LAYER_<n>`。
    pub fn resolve_layer(&mut self, record: &LayerRecord) -> String {
        if let Some(name) = record.name.as_ref().filter(|name| !name.is_empty()) {
            self.layer_names.insert(record.number, name.clone());
            return name.clone();
        }
        self.layer_names
            .entry(record.number)
            .or_insert_with(|| format!("LAYER_{}", record.number))
            .clone()
    }

    pub fn resolve_group(&mut self, record: &ObjectNodeRecord) -> String {
        if let Some(name) = &record.name {
            self.group_names.insert(record.number, name.clone());
            return name.clone();
        }
        self.group_names
            .get(&record.number)
            .cloned()
            .unwrap_or_default()
    }
}

pub struct Dispatcher<'a, D: DrawingDatabase> {
    db: &'a mut D,
    resolver: &'a mut Resolver,
    config: &'a ImportConfig,
    diagnostics: &'a mut ImportDiagnostics,
    viewports: ViewportExtractor,
    context: ImportContext,
}

impl<'a, D: DrawingDatabase> Dispatcher<'a, D> {
    pub fn new(
        db: &'a mut D,
        resolver: &'a mut Resolver,
        config: &'a ImportConfig,
        diagnostics: &'a mut ImportDiagnostics,
    ) -> Self {
        Self {
            db,
            resolver,
            config,
            diagnostics,
            viewports: ViewportExtractor::new(config.viewport_block_prefix.clone()),
            context: ImportContext::default(),
        }
    }

    #[inline]
    pub fn context(&self) -> &ImportContext {
        &self.context
    }

    /// 登记一个因可恢复错误而跳过的操作码。
    pub fn record_failure(&mut self, err: &ImportError) {
        if matches!(err, ImportError::MalformedGradient(_)) {
            self.diagnostics.malformed_gradients += 1;
        }
    }

    pub fn dispatch(&mut self, opcode: &Opcode) -> Result<(), ImportError> {
        if self.resolver.is_collecting() {
            self.collect(opcode);
            return Ok(());
        }

        match opcode {
            Opcode::Units(_) | Opcode::PlotInfo(_) | Opcode::NamedView(_) => Ok(()),
            Opcode::View(record) => self.handle_view(record),
            Opcode::Layer(record) => {
                let name = self.context.resolve_layer(record);
                self.db.set_current_layer(&name);
                self.context.layer = name;
                Ok(())
            }
            Opcode::ObjectNode(record) => {
                if record.number < 0 {
                    self.db.set_current_group(None);
                } else {
                    let name = self.context.resolve_group(record);
                    self.db.set_current_group(Some((record.number, &name)));
                }
                Ok(())
            }
            Opcode::Color(color) => {
                self.context.color = Some(*color);
                Ok(())
            }
            Opcode::Visibility(is_visible) => {
                self.db.set_current_visibility(*is_visible);
                Ok(())
            }
            Opcode::Fill(fill) => {
                self.context.fill = *fill;
                Ok(())
            }
            Opcode::Font(record) => {
                self.handle_font(record);
                Ok(())
            }
            Opcode::ClipRect(record) => {
                self.resolver
                    .set_clip_rect(Bounds2D::from_corners(record.min, record.max));
                Ok(())
            }
            Opcode::Polyline(points) => self.handle_polyline(points, false),
            Opcode::Polygon(points) => {
                if self.context.fill {
                    self.filled_region(std::slice::from_ref(points)).map(drop)
                } else {
                    self.handle_polyline(points, true)
                }
            }
            Opcode::Polytriangle(points) => self
                .filled_region(&[unroll_triangle_strip(points)])
                .map(drop),
            Opcode::GouraudPolytriangle(record) => self.handle_gouraud(record),
            Opcode::ContourSet(record) => self.filled_region(&record.contours).map(drop),
            Opcode::Ellipse(record) => self.handle_ellipse(record),
            Opcode::Polymarker(points) => self.handle_polymarker(points),
            Opcode::Text(record) => self.handle_text(record),
            Opcode::Image(record) => self.handle_image(record),
            Opcode::Viewport(record) => {
                let layer = self.context.layer.clone();
                let change = self
                    .viewports
                    .apply(&mut *self.db, self.resolver, record, &layer)?;
                if let ViewportChange::Opened {
                    placeholders_erased,
                    ..
                } = change
                {
                    // 块参照
                    self.context.entities_created += 1;
                    self.diagnostics.placeholders_erased += placeholders_erased;
                }
                Ok(())
            }
        }
    }

    /// 第一遍：单位、绘图信息、命名视图写入解析器，其余操作码只扩展边界。
    fn collect(&mut self, opcode: &Opcode) {
        match opcode {
            Opcode::Units(record) => {
                if self.resolver.update_units(record) == UnitsOutcome::ResolvedCoarse {
                    self.diagnostics.tolerance_fallbacks += 1;
                }
            }
            Opcode::PlotInfo(record) => self.resolver.set_paper_info(PaperInfo::from(record)),
            Opcode::NamedView(record) => self.resolver.record_named_view(
                record.name.clone(),
                Bounds2D::from_corners(record.min, record.max),
            ),
            other => self.resolver.update_bounds(other.extents()),
        }
    }

    /// 第二遍结束：写出命名视图；流中没有视图操作码时按全局边界设置模型视口。
    pub fn finish(&mut self) -> Result<(), ImportError> {
        let views = self.resolver.state().named_views.clone();
        for (name, bounds) in views {
            let mapped = self.map_rect(&bounds)?;
            self.db.add_named_view(NamedView {
                name,
                center: mapped.center(),
                size: Vector2::new(mapped.width(), mapped.height()),
            });
        }

        if !self.context.view_seen {
            if let Some(bounds) = self.resolver.bounds() {
                let mapped = self.map_rect(&bounds.to_bounds2d())?;
                self.db.set_model_viewport(ViewportGeometry {
                    center: mapped.center(),
                    size: Vector2::new(mapped.width(), mapped.height()),
                });
            }
        }
        Ok(())
    }

    fn color(&self) -> Option<u32> {
        self.context.color.map(Rgba::to_rgb24)
    }

    fn add(&mut self, entity: Entity) -> EntityId {
        self.context.entities_created += 1;
        self.db.add_entity(entity)
    }

    fn map_points(&self, points: &[Point2]) -> Result<Vec<Point2>, ImportError> {
        points
            .iter()
            .map(|point| self.resolver.transform_point2(*point))
            .collect()
    }

    /// 填充几何使用列长度归一化的变换。
    fn map_fill_points(&self, points: &[Point2]) -> Result<Vec<Point2>, ImportError> {
        points
            .iter()
            .map(|point| self.resolver.transform_point_normalized(*point))
            .collect()
    }

    fn map_rect(&self, bounds: &Bounds2D) -> Result<Bounds2D, ImportError> {
        let mut mapped = Bounds2D::empty();
        for corner in bounds.corners() {
            mapped.include_point(self.resolver.transform_point2(corner)?);
        }
        Ok(mapped)
    }

    fn map_angles(&self, start: f64, end: f64) -> Result<(f64, f64), ImportError> {
        let rotation = self.resolver.rotation()?;
        Ok(if self.resolver.is_mirrored()? {
            ((rotation - end).rem_euclid(TAU), (rotation - start).rem_euclid(TAU))
        } else {
            ((start + rotation).rem_euclid(TAU), (end + rotation).rem_euclid(TAU))
        })
    }

    fn handle_view(&mut self, record: &ViewRecord) -> Result<(), ImportError> {
        let mapped = self.map_rect(&Bounds2D::from_corners(record.min, record.max))?;
        self.db.set_model_viewport(ViewportGeometry {
            center: mapped.center(),
            size: Vector2::new(mapped.width(), mapped.height()),
        });
        self.context.view_seen = true;
        Ok(())
    }

    fn handle_font(&mut self, record: &FontRecord) {
        let descriptor = FontDescriptor::new(record.name.clone())
            .bold(record.style.bold)
            .italic(record.style.italic);
        self.context.font_style = Some(self.db.set_font_style(&descriptor));
        self.context.font = record.clone();
    }

    fn handle_polyline(&mut self, points: &[Point2], is_closed: bool) -> Result<(), ImportError> {
        if points.len() < 2 {
            self.diagnostics.degenerate_primitives += 1;
            return Ok(());
        }
        let vertices = self
            .map_points(points)?
            .into_iter()
            .map(PolylineVertex::new)
            .collect();
        let entity = Entity::Polyline(Polyline {
            vertices,
            is_closed,
            color: self.color(),
            layer: self.context.layer.clone(),
        });
        self.add(entity);
        Ok(())
    }

    /// 由若干轮廓生成一个实心填充。退化环被丢弃；全部退化时不创建填充。
    fn filled_region(&mut self, contours: &[Vec<Point2>]) -> Result<Option<EntityId>, ImportError> {
        let mut loops = Vec::with_capacity(contours.len());
        for contour in contours {
            match hatch_loop(&self.map_fill_points(contour)?) {
                Some(ring) => loops.push(ring),
                None => self.diagnostics.degenerate_primitives += 1,
            }
        }
        if loops.is_empty() {
            return Ok(None);
        }

        let descriptor = HatchDescriptor::solid(self.color(), self.context.layer.clone());
        self.context.entities_created += 1;
        let hatch = self.db.add_hatch(descriptor);
        for (index, ring) in loops.iter().enumerate() {
            let kind = if index == 0 {
                HatchLoopKind::External
            } else {
                HatchLoopKind::Default
            };
            self.db.append_loop(hatch, kind, ring, &[])?;
        }
        Ok(Some(hatch))
    }

    fn handle_gouraud(&mut self, record: &GouraudRecord) -> Result<(), ImportError> {
        if !self.config.gradient_triangles {
            debug!(points = record.points.len(), "渐变三角形已禁用，跳过");
            return Ok(());
        }
        if record.colors.len() != record.points.len() {
            return Err(ImportError::MalformedGradient(format!(
                "顶点 {} 个，颜色 {} 个",
                record.points.len(),
                record.colors.len()
            )));
        }

        for (points, colors) in record.points.windows(3).zip(record.colors.windows(3)) {
            let mapped = self.map_fill_points(points)?;
            let Some(ring) = hatch_loop(&mapped) else {
                self.diagnostics.degenerate_primitives += 1;
                continue;
            };
            let fill = match triangle_fill([
                (mapped[0], colors[0]),
                (mapped[1], colors[1]),
                (mapped[2], colors[2]),
            ]) {
                Ok(fill) => fill,
                Err(err) => {
                    // 坏三角形只丢弃自身，条带其余部分照常生成
                    warn!(error = %err, "渐变三角形无法换算，已跳过");
                    self.diagnostics.malformed_gradients += 1;
                    continue;
                }
            };
            let layer = self.context.layer.clone();
            let descriptor = match fill {
                TriangleFill::Solid(color) => HatchDescriptor::solid(Some(color.to_rgb24()), layer),
                TriangleFill::Linear { .. } => match fill.to_gradient() {
                    Some(gradient) => HatchDescriptor::gradient(gradient, layer),
                    None => continue,
                },
            };
            self.context.entities_created += 1;
            let hatch = self.db.add_hatch(descriptor);
            self.db
                .append_loop(hatch, HatchLoopKind::External, &ring, &[])?;
        }
        Ok(())
    }

    /// 半径按 X 轴缩放、椭圆保留原长短轴比，默认单位变换各向同性。
    fn handle_ellipse(&mut self, record: &EllipseRecord) -> Result<(), ImportError> {
        let color = self.color();
        let layer = self.context.layer.clone();
        let entity = match classify_ellipse(record) {
            EllipseShape::Dot(center) => {
                self.diagnostics.degenerate_primitives += 1;
                let point = self.resolver.transform_point2(center)?;
                Entity::Polyline(Polyline {
                    vertices: vec![PolylineVertex::new(point), PolylineVertex::new(point)],
                    is_closed: false,
                    color,
                    layer,
                })
            }
            EllipseShape::Segment { start, end } => {
                self.diagnostics.degenerate_primitives += 1;
                Entity::Line(Line {
                    start: self.resolver.transform_point2(start)?,
                    end: self.resolver.transform_point2(end)?,
                    color,
                    layer,
                })
            }
            EllipseShape::Circle { center, radius } => {
                let center = self.resolver.transform_point2(center)?;
                let radius = self.resolver.transform_size(radius)?;
                if record.filled && is_full_sweep(record) {
                    self.fill_circle(center, radius)?;
                }
                Entity::Circle(Circle {
                    center,
                    radius,
                    color,
                    layer,
                })
            }
            EllipseShape::Arc {
                center,
                radius,
                start_angle,
                end_angle,
            } => {
                let (start_angle, end_angle) = self.map_angles(start_angle, end_angle)?;
                Entity::Arc(Arc {
                    center: self.resolver.transform_point2(center)?,
                    radius: self.resolver.transform_size(radius)?,
                    start_angle,
                    end_angle,
                    color,
                    layer,
                })
            }
            EllipseShape::Ellipse {
                center,
                major_axis,
                ratio,
                start_parameter,
                end_parameter,
            } => {
                let full = is_full_sweep(record);
                let (start_parameter, end_parameter) = if !full && self.resolver.is_mirrored()? {
                    // 镜像后参数方向反转
                    ((-end_parameter).rem_euclid(TAU), (-start_parameter).rem_euclid(TAU))
                } else {
                    (start_parameter, end_parameter)
                };
                Entity::Ellipse(Ellipse {
                    center: self.resolver.transform_point2(center)?,
                    major_axis: self.resolver.transform_vector2(major_axis)?,
                    ratio,
                    start_parameter,
                    end_parameter,
                    color,
                    layer,
                })
            }
        };
        self.add(entity);
        Ok(())
    }

    /// 实心整圆：两个凸度为 1 的顶点组成的填充环。
    fn fill_circle(&mut self, center: Point2, radius: f64) -> Result<(), ImportError> {
        if radius <= 0.0 {
            self.diagnostics.degenerate_primitives += 1;
            return Ok(());
        }
        let (points, bulges) = circle_loop(center, radius);
        let descriptor = HatchDescriptor::solid(self.color(), self.context.layer.clone());
        self.context.entities_created += 1;
        let hatch = self.db.add_hatch(descriptor);
        self.db
            .append_loop(hatch, HatchLoopKind::External, &points, &bulges)
    }

    fn handle_polymarker(&mut self, points: &[Point2]) -> Result<(), ImportError> {
        for position in self.map_points(points)? {
            let entity = Entity::Point(PointEntity {
                position,
                color: self.color(),
                layer: self.context.layer.clone(),
            });
            self.add(entity);
        }
        Ok(())
    }

    fn handle_text(&mut self, record: &TextRecord) -> Result<(), ImportError> {
        if record.content.is_empty() {
            self.diagnostics.degenerate_primitives += 1;
            return Ok(());
        }
        let style = match &self.context.font_style {
            Some(style) => style.clone(),
            None => {
                let font = self.context.font.clone();
                self.handle_font(&font);
                self.context
                    .font_style
                    .clone()
                    .ok_or_else(|| ImportError::Database {
                        operation: "set_font_style",
                        message: "字体样式未能解析".to_string(),
                    })?
            }
        };

        let placement = {
            let db = &*self.db;
            reconstruct_text(
                record,
                &self.context.font,
                &style,
                self.resolver,
                |text, height| db.text_extents(&style.style, text, height),
            )?
        };

        let entity = Entity::MText(MText {
            insert: placement.insert,
            content: placement.content,
            height: placement.height,
            reference_width: None,
            direction: Vector2::from_angle(placement.rotation),
            attachment_point: 7,
            drawing_direction: 1,
            style: Some(style.style),
            color: self.color(),
            layer: self.context.layer.clone(),
        });
        self.add(entity);
        Ok(())
    }

    fn handle_image(&mut self, record: &ImageRecord) -> Result<(), ImportError> {
        if record.columns == 0 || record.rows == 0 {
            self.diagnostics.degenerate_primitives += 1;
            return Ok(());
        }
        let target = self.map_rect(&Bounds2D::from_corners(record.min, record.max))?;
        let prepared = prepare_image(record, &target, self.config.source_extension.as_deref());
        if prepared.swapped {
            self.diagnostics.image_swaps += 1;
        }
        if prepared.marker_mismatch {
            self.diagnostics.heuristic_mismatches += 1;
        }
        if prepared.pixels.is_empty() {
            warn!(identifier = prepared.identifier, "图像没有像素数据");
        }

        let descriptor = ImageDescriptor::new(
            prepared.identifier,
            prepared.format,
            prepared.width,
            prepared.height,
            target,
        )
        .with_palette(prepared.palette)
        .with_pixels(prepared.pixels)
        .on_layer(self.context.layer.clone());
        self.context.entities_created += 1;
        self.db.add_image(descriptor);
        Ok(())
    }
}
