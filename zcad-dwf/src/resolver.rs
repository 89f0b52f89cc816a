//! 坐标/范围解析器。
//!
//! 持有整个导入过程中唯一的 [`RunState`]：第一遍（收集模式）累积全局边界、
//! 解析单位矩阵；第一遍结束后标定变换；第二遍（激活模式）只读变换用于映射坐标。

use glam::{DMat4, DVec3, DVec4};
use tracing::{debug, warn};
use zcad_core::document::PaperUnits;
use zcad_core::geometry::{Bounds2D, Bounds3D, Point2, Point3, Vector2};

use crate::ImportError;
use crate::opcode::{PlotInfoRecord, UnitsRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Collecting,
    Active,
}

/// 图纸标定信息，仅在第一遍由绘图信息操作码写入。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PaperInfo {
    pub width: f64,
    pub height: f64,
    pub center: Point2,
    pub units: PaperUnits,
}

impl From<&PlotInfoRecord> for PaperInfo {
    fn from(record: &PlotInfoRecord) -> Self {
        Self {
            width: record.paper_width,
            height: record.paper_height,
            center: record.paper_center,
            units: record.units,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunState {
    pub mode: RunMode,
    pub transform: DMat4,
    pub resolved: bool,
    pub bounds: Option<Bounds3D>,
    pub clip_rect: Option<Bounds2D>,
    pub paper_info: Option<PaperInfo>,
    /// 第一遍收集的命名视图（流坐标）。
    pub named_views: Vec<(String, Bounds2D)>,
    units_failed: bool,
}

impl RunState {
    fn collecting() -> Self {
        Self {
            mode: RunMode::Collecting,
            transform: DMat4::IDENTITY,
            resolved: false,
            bounds: None,
            clip_rect: None,
            paper_info: None,
            named_views: Vec::new(),
            units_failed: false,
        }
    }
}

/// 单位记录的处理结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitsOutcome {
    /// 变换此前已解析，记录被忽略。
    AlreadyResolved,
    Resolved,
    /// 机器精度下求逆失败，粗容差重试成功。
    ResolvedCoarse,
    /// 两次求逆都失败，变换保持原状。
    Failed,
}

/// 第一遍结束后的标定方式。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Calibration {
    FromUnits,
    FittedToPaper,
    Identity,
}

#[derive(Debug, Clone)]
pub struct Resolver {
    state: RunState,
    coarse_tolerance: f64,
}

impl Resolver {
    pub fn new(coarse_tolerance: f64) -> Self {
        Self {
            state: RunState::collecting(),
            coarse_tolerance,
        }
    }

    #[inline]
    pub fn state(&self) -> &RunState {
        &self.state
    }

    #[inline]
    pub fn is_collecting(&self) -> bool {
        self.state.mode == RunMode::Collecting
    }

    #[inline]
    pub fn is_resolved(&self) -> bool {
        self.state.resolved
    }

    /// 对单位矩阵的转置求逆，得到流坐标到目标坐标的变换。每次导入至多解析一次。
    pub fn update_units(&mut self, record: &UnitsRecord) -> UnitsOutcome {
        if self.state.resolved {
            return UnitsOutcome::AlreadyResolved;
        }
        // 记录按行主序给出，按列读入即为转置
        let raw = DMat4::from_cols_array_2d(&record.matrix);

        if let Some(inverse) = invert_with_tolerance(raw, f64::MIN_POSITIVE) {
            self.state.transform = inverse;
            self.state.resolved = true;
            debug!(units = %record.units, "单位矩阵求逆成功");
            return UnitsOutcome::Resolved;
        }

        if let Some(inverse) = invert_scaled(raw, self.coarse_tolerance) {
            warn!(
                units = %record.units,
                tolerance = self.coarse_tolerance,
                "单位矩阵在机器精度下不可逆，已使用粗容差重试"
            );
            self.state.transform = inverse;
            self.state.resolved = true;
            return UnitsOutcome::ResolvedCoarse;
        }

        warn!(units = %record.units, "单位矩阵不可逆，坐标变换保持原状");
        self.state.units_failed = true;
        UnitsOutcome::Failed
    }

    /// 扩展全局边界。只在收集模式下有效；并集运算不会收缩已有边界。
    pub fn update_bounds(&mut self, extents: Option<Bounds3D>) {
        if !self.is_collecting() {
            warn!("激活模式下忽略边界更新");
            return;
        }
        let Some(extents) = extents else {
            return;
        };
        match &mut self.state.bounds {
            Some(bounds) => bounds.include_bounds(&extents),
            None => self.state.bounds = Some(extents),
        }
    }

    pub fn set_clip_rect(&mut self, clip: Bounds2D) {
        self.state.clip_rect = Some(clip);
    }

    #[inline]
    pub fn clip_rect(&self) -> Option<Bounds2D> {
        self.state.clip_rect
    }

    pub fn set_paper_info(&mut self, info: PaperInfo) {
        self.state.paper_info = Some(info);
    }

    #[inline]
    pub fn paper_info(&self) -> Option<PaperInfo> {
        self.state.paper_info
    }

    pub fn record_named_view(&mut self, name: impl Into<String>, bounds: Bounds2D) {
        self.state.named_views.push((name.into(), bounds));
    }

    #[inline]
    pub fn bounds(&self) -> Option<Bounds3D> {
        self.state.bounds
    }

    /// 第一遍结束后的标定。单位记录未解析时：有图纸信息则把边界等比缩放到图纸中，
    /// 否则使用单位变换。单位求逆彻底失败属于已知的降级模式，同样使用单位变换。
    pub fn calibrate(&mut self) -> Calibration {
        if self.state.resolved {
            return Calibration::FromUnits;
        }
        self.state.resolved = true;

        let fitted = match (self.state.paper_info, self.state.bounds) {
            (Some(paper), Some(bounds)) if !self.state.units_failed => {
                fit_to_paper(&bounds.to_bounds2d(), &paper)
            }
            _ => None,
        };
        match fitted {
            Some(transform) => {
                self.state.transform = transform;
                Calibration::FittedToPaper
            }
            None => {
                self.state.transform = DMat4::IDENTITY;
                Calibration::Identity
            }
        }
    }

    /// 以同一对象重新初始化进入第二遍：保留变换与第一遍的收集结果，清空裁剪矩形。
    pub fn begin_active(&mut self) -> Result<(), ImportError> {
        if !self.state.resolved {
            return Err(ImportError::TransformUnresolved);
        }
        self.state.mode = RunMode::Active;
        self.state.clip_rect = None;
        Ok(())
    }

    fn transform(&self) -> Result<&DMat4, ImportError> {
        if self.state.resolved {
            Ok(&self.state.transform)
        } else {
            Err(ImportError::TransformUnresolved)
        }
    }

    pub fn transform_point(&self, point: Point2) -> Result<Point3, ImportError> {
        let mapped = self
            .transform()?
            .transform_point3(DVec3::new(point.x(), point.y(), 0.0));
        Ok(Point3::from(mapped))
    }

    #[inline]
    pub fn transform_point2(&self, point: Point2) -> Result<Point2, ImportError> {
        self.transform_point(point).map(Point3::to_point2)
    }

    /// 只应用线性部分（不含平移）。
    pub fn transform_vector2(&self, vector: Vector2) -> Result<Vector2, ImportError> {
        let mapped = self
            .transform()?
            .transform_vector3(DVec3::new(vector.x(), vector.y(), 0.0));
        Ok(Vector2::new(mapped.x, mapped.y))
    }

    /// 只应用缩放分量，用于半径、字高等标量。
    pub fn transform_size(&self, size: f64) -> Result<f64, ImportError> {
        Ok(size * self.transform()?.x_axis.truncate().length())
    }

    /// 变换的旋转角（弧度）。
    pub fn rotation(&self) -> Result<f64, ImportError> {
        let x_axis = self.transform()?.x_axis;
        Ok(x_axis.y.atan2(x_axis.x))
    }

    /// XY 平面内是否含镜像。
    pub fn is_mirrored(&self) -> Result<bool, ImportError> {
        let transform = self.transform()?;
        let det = transform.x_axis.x * transform.y_axis.y - transform.y_axis.x * transform.x_axis.y;
        Ok(det < 0.0)
    }

    /// 列向量长度统一为 X、Y 列长度均值的变换，渐变/填充几何使用。
    pub fn normalized_transform(&self) -> Result<DMat4, ImportError> {
        Ok(normalize_columns(self.transform()?))
    }

    pub fn transform_point_normalized(&self, point: Point2) -> Result<Point2, ImportError> {
        let mapped = self
            .normalized_transform()?
            .transform_point3(DVec3::new(point.x(), point.y(), 0.0));
        Ok(Point2::new(mapped.x, mapped.y))
    }
}

/// 比较流中的图纸尺寸与目标布局尺寸（毫米），判定流尺寸的单位。
///
/// 声明单位优先；两种单位在容差内都不匹配时返回 `None`。横竖方向均接受。
pub fn reconcile_paper_units(
    info: &PaperInfo,
    layout_width_mm: f64,
    layout_height_mm: f64,
    tolerance: f64,
) -> Option<PaperUnits> {
    let alternative = match info.units {
        PaperUnits::Inches => PaperUnits::Millimeters,
        PaperUnits::Millimeters => PaperUnits::Inches,
    };
    [info.units, alternative].into_iter().find(|units| {
        let width = info.width * units.to_millimeters();
        let height = info.height * units.to_millimeters();
        let straight = within(width, layout_width_mm, tolerance)
            && within(height, layout_height_mm, tolerance);
        let rotated = within(width, layout_height_mm, tolerance)
            && within(height, layout_width_mm, tolerance);
        straight || rotated
    })
}

fn within(value: f64, reference: f64, tolerance: f64) -> bool {
    let scale = value.abs().max(reference.abs());
    if scale <= f64::EPSILON {
        return true;
    }
    (value - reference).abs() / scale <= tolerance
}

fn fit_to_paper(bounds: &Bounds2D, paper: &PaperInfo) -> Option<DMat4> {
    let width = bounds.width();
    let height = bounds.height();
    let scale = match (width > f64::EPSILON, height > f64::EPSILON) {
        (true, true) => (paper.width / width).min(paper.height / height),
        (true, false) => paper.width / width,
        (false, true) => paper.height / height,
        (false, false) => 1.0,
    };
    if !(scale.is_finite() && scale > 0.0) {
        return None;
    }
    let center = bounds.center();
    Some(
        DMat4::from_translation(DVec3::new(paper.center.x(), paper.center.y(), 0.0))
            * DMat4::from_scale(DVec3::new(scale, scale, 1.0))
            * DMat4::from_translation(DVec3::new(-center.x(), -center.y(), 0.0)),
    )
}

fn normalize_columns(transform: &DMat4) -> DMat4 {
    let x_len = transform.x_axis.truncate().length();
    let y_len = transform.y_axis.truncate().length();
    let target = (x_len + y_len) * 0.5;
    let rescale = |column: DVec4| {
        let length = column.truncate().length();
        if length <= f64::EPSILON {
            column
        } else {
            (column.truncate() * (target / length)).extend(column.w)
        }
    };
    DMat4::from_cols(
        rescale(transform.x_axis),
        rescale(transform.y_axis),
        rescale(transform.z_axis),
        transform.w_axis,
    )
}

/// 行列式低于 `tolerance` 视为奇异。
fn invert_with_tolerance(matrix: DMat4, tolerance: f64) -> Option<DMat4> {
    let det = matrix.determinant();
    if !det.is_finite() || det.abs() <= tolerance {
        return None;
    }
    let inverse = matrix.inverse();
    inverse.is_finite().then_some(inverse)
}

/// 带行缩放的高斯-约当消元。主元相对其所在行的最大元素低于 `tolerance` 时失败，
/// 因此整体缩放极小（行列式下溢）的矩阵仍可求逆。
fn invert_scaled(matrix: DMat4, tolerance: f64) -> Option<DMat4> {
    // 按行存放，rows[r][c]
    let cols = matrix.to_cols_array_2d();
    let mut rows = [[0.0f64; 8]; 4];
    for (r, row) in rows.iter_mut().enumerate() {
        for c in 0..4 {
            row[c] = cols[c][r];
        }
        row[4 + r] = 1.0;
    }

    for pivot_col in 0..4 {
        let mut best = None;
        let mut best_ratio = 0.0;
        for (r, row) in rows.iter().enumerate().skip(pivot_col) {
            let scale = row[..4].iter().fold(0.0f64, |acc, v| acc.max(v.abs()));
            if scale <= 0.0 {
                return None;
            }
            let ratio = row[pivot_col].abs() / scale;
            if ratio > best_ratio {
                best_ratio = ratio;
                best = Some(r);
            }
        }
        let pivot_row = best?;
        if best_ratio <= tolerance {
            return None;
        }
        rows.swap(pivot_col, pivot_row);

        let pivot = rows[pivot_col][pivot_col];
        for value in rows[pivot_col].iter_mut() {
            *value /= pivot;
        }
        let normalized = rows[pivot_col];
        for (r, row) in rows.iter_mut().enumerate() {
            if r == pivot_col {
                continue;
            }
            let factor = row[pivot_col];
            if factor != 0.0 {
                for (value, pivot_value) in row.iter_mut().zip(normalized.iter()) {
                    *value -= factor * pivot_value;
                }
            }
        }
    }

    let mut out = [[0.0f64; 4]; 4];
    for (c, column) in out.iter_mut().enumerate() {
        for (r, value) in column.iter_mut().enumerate() {
            *value = rows[r][4 + c];
        }
    }
    let inverse = DMat4::from_cols_array_2d(&out);
    inverse.is_finite().then_some(inverse)
}
