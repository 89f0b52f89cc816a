//! 矢量流导入引擎。
//!
//! 上游分词器把字节流解码为 [`opcode::Opcode`]，本 crate 对同一操作码序列执行两遍：
//! 第一遍收集全局边界并标定坐标变换，第二遍把图元转换为目标数据库中的实体。

pub mod database;
pub mod dispatcher;
pub mod geometry;
pub mod gradient;
pub mod image;
pub mod opcode;
pub mod resolver;
pub mod text;
pub mod viewport;

use thiserror::Error;
use tracing::{debug, info, warn};
use zcad_config::{AppConfig, ImportConfig};

use crate::database::DrawingDatabase;
use crate::dispatcher::{Dispatcher, ImportDiagnostics};
use crate::opcode::Opcode;
use crate::resolver::{Calibration, Resolver, reconcile_paper_units};

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("coordinate transform requested before it was resolved")]
    TransformUnresolved,
    #[error("malformed gradient triangle: {0}")]
    MalformedGradient(String),
    #[error("opcode source failed: {0}")]
    Source(String),
    #[error("database rejected {operation}: {message}")]
    Database {
        operation: &'static str,
        message: String,
    },
}

impl ImportError {
    /// 只影响当前操作码的错误；导入继续进行。
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ImportError::MalformedGradient(_) | ImportError::Database { .. }
        )
    }
}

/// 可重放的操作码来源。两遍之间调用 [`OpcodeSource::rewind`]，两遍的操作码顺序必须一致。
pub trait OpcodeSource {
    fn rewind(&mut self) -> Result<(), ImportError>;
    fn next_opcode(&mut self) -> Result<Option<Opcode>, ImportError>;
}

/// 内存中的操作码序列。
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    opcodes: Vec<Opcode>,
    cursor: usize,
}

impl MemorySource {
    pub fn new(opcodes: Vec<Opcode>) -> Self {
        Self { opcodes, cursor: 0 }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.opcodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.opcodes.is_empty()
    }
}

impl From<Vec<Opcode>> for MemorySource {
    fn from(opcodes: Vec<Opcode>) -> Self {
        Self::new(opcodes)
    }
}

impl OpcodeSource for MemorySource {
    fn rewind(&mut self) -> Result<(), ImportError> {
        self.cursor = 0;
        Ok(())
    }

    fn next_opcode(&mut self) -> Result<Option<Opcode>, ImportError> {
        let opcode = self.opcodes.get(self.cursor).cloned();
        if opcode.is_some() {
            self.cursor += 1;
        }
        Ok(opcode)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportSummary {
    pub opcodes: usize,
    pub entities_created: usize,
    /// 因可恢复错误跳过的操作码数。
    pub skipped: usize,
    pub calibration: Calibration,
    pub diagnostics: ImportDiagnostics,
}

#[derive(Debug, Clone, Default)]
pub struct DwfImporter {
    config: ImportConfig,
}

impl DwfImporter {
    pub fn new(config: ImportConfig) -> Self {
        Self { config }
    }

    pub fn from_app_config(config: &AppConfig) -> Self {
        Self::new(config.import.clone())
    }

    #[inline]
    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    /// 对 `source` 执行两遍导入，把实体写入 `db`。
    ///
    /// 单个操作码的可恢复错误只记入 [`ImportSummary::skipped`]；变换未解析等时序错误会中止导入。
    pub fn import<S, D>(&self, source: &mut S, db: &mut D) -> Result<ImportSummary, ImportError>
    where
        S: OpcodeSource,
        D: DrawingDatabase,
    {
        let mut resolver = Resolver::new(self.config.coarse_inversion_tolerance);
        let mut diagnostics = ImportDiagnostics::default();

        source.rewind()?;
        let mut opcodes = 0;
        {
            let mut dispatcher = Dispatcher::new(db, &mut resolver, &self.config, &mut diagnostics);
            while let Some(opcode) = source.next_opcode()? {
                opcodes += 1;
                dispatcher.dispatch(&opcode)?;
            }
        }

        let calibration = resolver.calibrate();
        info!(opcodes, ?calibration, "第一遍完成");
        resolver.begin_active()?;
        self.reconcile_paper(&resolver, db);

        source.rewind()?;
        let mut replayed = 0;
        let mut skipped = 0;
        let entities_created = {
            let mut dispatcher = Dispatcher::new(db, &mut resolver, &self.config, &mut diagnostics);
            while let Some(opcode) = source.next_opcode()? {
                replayed += 1;
                match dispatcher.dispatch(&opcode) {
                    Ok(()) => {}
                    Err(err) if err.is_recoverable() => {
                        warn!(opcode = opcode.name(), error = %err, "跳过操作码");
                        dispatcher.record_failure(&err);
                        skipped += 1;
                    }
                    Err(err) => return Err(err),
                }
            }
            dispatcher.finish()?;
            dispatcher.context().entities_created
        };

        if replayed != opcodes {
            warn!(first = opcodes, second = replayed, "两遍读取的操作码数量不一致");
        }
        info!(entities_created, skipped, "第二遍完成");

        Ok(ImportSummary {
            opcodes,
            entities_created,
            skipped,
            calibration,
            diagnostics,
        })
    }

    /// 判定流中图纸尺寸是英寸还是毫米，并写回当前布局。
    fn reconcile_paper<D: DrawingDatabase>(&self, resolver: &Resolver, db: &mut D) {
        let Some(info) = resolver.paper_info() else {
            return;
        };
        let (width, height) = db.layout_paper();
        match reconcile_paper_units(&info, width, height, self.config.paper_tolerance) {
            Some(units) => {
                if units != info.units {
                    debug!(declared = ?info.units, detected = ?units, "图纸单位与声明不符");
                }
                db.set_layout_paper(width, height, units);
            }
            None => {
                let scale = info.units.to_millimeters();
                debug!(
                    width = info.width * scale,
                    height = info.height * scale,
                    "布局图纸尺寸按流中的绘图信息更新"
                );
                db.set_layout_paper(info.width * scale, info.height * scale, info.units);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zcad_core::geometry::Point2;

    #[test]
    fn memory_source_replays_after_rewind() {
        let mut source = MemorySource::new(vec![Opcode::Fill(true), Opcode::Visibility(false)]);
        assert!(matches!(source.next_opcode(), Ok(Some(Opcode::Fill(true)))));
        assert!(matches!(source.next_opcode(), Ok(Some(Opcode::Visibility(false)))));
        assert!(matches!(source.next_opcode(), Ok(None)));
        source.rewind().expect("rewind");
        assert!(matches!(source.next_opcode(), Ok(Some(Opcode::Fill(true)))));
    }

    #[test]
    fn recoverable_errors_are_classified() {
        assert!(ImportError::MalformedGradient("x".to_string()).is_recoverable());
        assert!(!ImportError::TransformUnresolved.is_recoverable());
        assert!(!ImportError::Source("eof".to_string()).is_recoverable());
    }

    #[test]
    fn empty_stream_imports_nothing() {
        let mut doc = zcad_core::document::Document::new();
        let summary = DwfImporter::default()
            .import(&mut MemorySource::default(), &mut doc)
            .expect("import");
        assert_eq!(summary.opcodes, 0);
        assert_eq!(summary.entities_created, 0);
        assert_eq!(summary.calibration, Calibration::Identity);
        assert!(doc.model_viewport().is_none());
    }

    #[test]
    fn polyline_survives_both_passes() {
        let mut doc = zcad_core::document::Document::new();
        let mut source = MemorySource::from(vec![Opcode::Polyline(vec![
            Point2::new(0.0, 0.0),
            Point2::new(3.0, 4.0),
        ])]);
        let summary = DwfImporter::default()
            .import(&mut source, &mut doc)
            .expect("import");
        assert_eq!(summary.opcodes, 1);
        assert_eq!(summary.entities_created, 1);
        assert_eq!(doc.entities().count(), 1);
        let viewport = doc.model_viewport().expect("fitted viewport");
        assert_eq!(viewport.center, Point2::new(1.5, 2.0));
    }
}
