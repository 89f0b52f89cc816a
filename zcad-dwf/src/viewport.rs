//! 视口提取：把视口操作码转换为块、块参照与多边形裁剪区域。

use tracing::debug;
use zcad_core::document::{BlockId, ClipRegion, ViewportGeometry};
use zcad_core::geometry::{Bounds2D, Point2, Vector2};

use crate::ImportError;
use crate::database::{DrawingDatabase, is_placeholder_pair};
use crate::opcode::ViewportRecord;
use crate::resolver::Resolver;

/// 一次视口操作的结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewportChange {
    Opened {
        block: BlockId,
        placeholders_erased: usize,
        clipped: bool,
    },
    Closed,
}

#[derive(Debug, Clone)]
pub struct ViewportExtractor {
    block_prefix: String,
}

impl ViewportExtractor {
    pub fn new(block_prefix: impl Into<String>) -> Self {
        Self {
            block_prefix: block_prefix.into(),
        }
    }

    pub fn apply<D: DrawingDatabase>(
        &self,
        db: &mut D,
        resolver: &Resolver,
        record: &ViewportRecord,
        layer: &str,
    ) -> Result<ViewportChange, ImportError> {
        let layout_block = db.layout_block();
        let Some(boundary) = &record.boundary else {
            db.set_current_block(layout_block)?;
            db.set_current_group(None);
            return Ok(ViewportChange::Closed);
        };

        let previous = db.current_block();
        let placeholders_erased = if previous != layout_block {
            erase_placeholder(db, previous)
        } else {
            0
        };

        let block = db.create_block(&format!("{}{}", self.block_prefix, record.name));
        db.set_current_block(layout_block)?;
        let visibility = db.current_visibility();
        db.set_current_visibility(true);
        let reference = db.add_block_reference(block, Point2::new(0.0, 0.0), layer);
        db.set_current_visibility(visibility);
        let reference = reference?;

        db.set_current_block(block)?;
        db.set_current_group(None);

        let ring = if boundary.is_empty() {
            resolver
                .clip_rect()
                .map(|clip| clip.corners().to_vec())
                .unwrap_or_default()
        } else {
            close_ring(boundary)
        };
        let mapped = ring
            .iter()
            .map(|point| resolver.transform_point2(*point))
            .collect::<Result<Vec<_>, _>>()?;

        let clipped = mapped.len() >= 3;
        if clipped {
            let mut extent = Bounds2D::empty();
            for point in &mapped {
                extent.include_point(*point);
            }
            db.set_block_viewport(
                block,
                ViewportGeometry {
                    center: extent.center(),
                    size: Vector2::new(extent.width(), extent.height()),
                },
            )?;
            db.attach_clip_region(reference, ClipRegion { vertices: mapped })?;
        }

        debug!(
            name = %record.name,
            block = block.get(),
            placeholders_erased,
            clipped,
            "打开视口"
        );
        Ok(ViewportChange::Opened {
            block,
            placeholders_erased,
            clipped,
        })
    }
}

/// 闭合环的末点与首点重复时去掉末点。
pub fn close_ring(points: &[Point2]) -> Vec<Point2> {
    let mut ring = points.to_vec();
    if ring.len() > 1 && ring.first() == ring.last() {
        ring.pop();
    }
    ring
}

/// 块中恰好只有一条普通多段线和一个实心填充时，两者都是占位裁剪可视化，删除之。
fn erase_placeholder<D: DrawingDatabase>(db: &mut D, block: BlockId) -> usize {
    let ids = db.block_entities(block);
    let [first, second] = ids.as_slice() else {
        return 0;
    };
    let is_placeholder = match (db.entity(*first), db.entity(*second)) {
        (Some(a), Some(b)) => is_placeholder_pair(a, b),
        _ => false,
    };
    if !is_placeholder {
        return 0;
    }
    let (first, second) = (*first, *second);
    usize::from(db.erase(first)) + usize::from(db.erase(second))
}
