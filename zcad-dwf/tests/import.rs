use std::fs;
use std::path::PathBuf;

use zcad_config::ImportConfig;
use zcad_core::document::{Document, Entity, PaperUnits, PixelFormat};
use zcad_core::geometry::Point2;
use zcad_dwf::dispatcher::{Dispatcher, ImportDiagnostics};
use zcad_dwf::opcode::{
    GouraudRecord, LayerRecord, ObjectNodeRecord, Opcode, Rgba, UnitsRecord, ViewportRecord,
};
use zcad_dwf::resolver::{Calibration, Resolver};
use zcad_dwf::{DwfImporter, ImportError, MemorySource, OpcodeSource};

fn load_fixture(name: &str) -> Vec<Opcode> {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests/data");
    path.push(name);
    let content = fs::read_to_string(&path).expect("读取操作码样例失败");
    serde_json::from_str(&content).expect("解析操作码样例失败")
}

fn import(opcodes: Vec<Opcode>) -> (Document, zcad_dwf::ImportSummary) {
    let mut doc = Document::new();
    let summary = DwfImporter::default()
        .import(&mut MemorySource::new(opcodes), &mut doc)
        .expect("导入失败");
    (doc, summary)
}

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

#[test]
fn site_plan_imports_expected_entities() {
    let (doc, summary) = import(load_fixture("site_plan.json"));

    assert_eq!(summary.opcodes, 19);
    assert_eq!(summary.calibration, Calibration::FromUnits);
    assert_eq!(summary.skipped, 0);
    assert_eq!(summary.entities_created, 8);

    let model: Vec<&str> = doc
        .entities_in(doc.model_space())
        .map(|stored| stored.entity.kind_name())
        .collect();
    assert_eq!(
        model,
        vec![
            "polyline",
            "hatch",
            "circle",
            "mtext",
            "block_reference",
            "hatch",
            "raster_image"
        ]
    );

    let first = doc.entities().next().expect("polyline");
    match &first.entity {
        Entity::Polyline(polyline) => {
            assert_eq!(polyline.layer, "WALLS");
            assert_eq!(polyline.color, Some(0xff0000));
            let last = polyline.vertices.last().expect("vertex").position;
            assert!(approx(last.x(), 100.0) && approx(last.y(), 50.0));
        }
        other => panic!("polyline expected, got {other:?}"),
    }

    let circle = doc
        .entities()
        .find_map(|stored| match &stored.entity {
            Entity::Circle(circle) => Some(circle.clone()),
            _ => None,
        })
        .expect("circle");
    assert!(approx(circle.center.x(), 50.0) && approx(circle.center.y(), 50.0));
    assert!(approx(circle.radius, 5.0));

    // Arial 以基线定位：插入点上移下沉量 2.5 × 0.25
    let text = doc
        .entities()
        .find_map(|stored| match &stored.entity {
            Entity::MText(text) => Some(text.clone()),
            _ => None,
        })
        .expect("mtext");
    assert_eq!(text.content, "Plan");
    assert!(approx(text.height, 2.5));
    assert!(approx(text.insert.x(), 20.0));
    assert!(approx(text.insert.y(), 20.625));

    let gradient = doc
        .entities()
        .filter_map(|stored| match &stored.entity {
            Entity::Hatch(hatch) => hatch.gradient.clone(),
            _ => None,
        })
        .next()
        .expect("gradient hatch");
    assert_eq!(gradient.name, "LINEAR");
    assert_eq!(gradient.color1, Some(0x000000));
    assert_eq!(gradient.color2, Some(0xc80000));
}

#[test]
fn site_plan_viewport_becomes_clipped_block() {
    let (doc, _) = import(load_fixture("site_plan.json"));

    let block = doc.block_by_name("*VPDetail").expect("viewport block");
    let inside: Vec<&Entity> = doc.entities_in(block).map(|stored| &stored.entity).collect();
    assert_eq!(inside.len(), 1);
    assert_eq!(inside[0].layer_name(), "DETAIL");

    let reference = doc
        .entities()
        .find_map(|stored| match &stored.entity {
            Entity::BlockReference(reference) => Some(reference.clone()),
            _ => None,
        })
        .expect("block reference");
    assert_eq!(reference.block, block);
    let clip = reference.clip.expect("clip region");
    assert_eq!(clip.vertices.len(), 4);
    assert!(approx(clip.vertices[2].x(), 40.0) && approx(clip.vertices[2].y(), 30.0));

    let viewport = doc.block(block).and_then(|b| b.viewport).expect("block viewport");
    assert!(approx(viewport.center.x(), 20.0) && approx(viewport.center.y(), 15.0));
    assert_eq!(doc.current_block(), doc.model_space());
}

#[test]
fn site_plan_views_and_paper_are_reconciled() {
    let (doc, _) = import(load_fixture("site_plan.json"));

    let views: Vec<_> = doc.named_views().collect();
    assert_eq!(views.len(), 1);
    assert_eq!(views[0].name, "Overview");
    assert!(approx(views[0].center.x(), 100.0) && approx(views[0].center.y(), 50.0));
    assert!(approx(views[0].size.x(), 200.0));

    // 没有视图操作码时模型视口贴合第一遍的全局边界
    let viewport = doc.model_viewport().expect("model viewport");
    assert!(approx(viewport.center.x(), 50.0));
    assert!(approx(viewport.center.y(), 27.5));

    let layout = doc.layout(doc.current_layout()).expect("layout");
    assert_eq!(layout.plot_units, PaperUnits::Millimeters);
    assert!(approx(layout.paper_width, 297.0));

    let definition = doc.raster_image_definition("IMG1").expect("image definition");
    assert_eq!(definition.pixel_format, PixelFormat::Rgba);
    assert_eq!(definition.pixels, vec![3, 2, 1, 255, 6, 5, 4, 255]);
}

#[test]
fn site_plan_document_serializes() {
    let (doc, _) = import(load_fixture("site_plan.json"));
    let value = serde_json::to_value(&doc).expect("序列化文档失败");
    assert_eq!(value["named_views"][0]["name"], "Overview");
    assert!(value["blocks"].as_array().map(|b| b.len()) == Some(2));
}

#[test]
fn first_pass_bounds_ignore_layer_and_group_state() {
    let primitives = vec![
        Opcode::Polyline(vec![Point2::new(-5.0, 2.0), Point2::new(7.0, 9.0)]),
        Opcode::Polymarker(vec![Point2::new(3.0, -4.0)]),
    ];
    let mut decorated = vec![
        Opcode::Layer(LayerRecord {
            number: 4,
            name: Some("X".to_string()),
        }),
        Opcode::ObjectNode(ObjectNodeRecord {
            number: 2,
            name: Some("g".to_string()),
        }),
    ];
    decorated.extend(primitives.clone());

    let collect = |opcodes: &[Opcode]| {
        let mut doc = Document::new();
        let mut resolver = Resolver::new(1e-10);
        let config = ImportConfig::default();
        let mut diagnostics = ImportDiagnostics::default();
        let mut dispatcher = Dispatcher::new(&mut doc, &mut resolver, &config, &mut diagnostics);
        for opcode in opcodes {
            dispatcher.dispatch(opcode).expect("collect");
        }
        assert_eq!(doc.entities().count(), 0);
        resolver.bounds().expect("bounds")
    };

    let plain = collect(&primitives);
    assert_eq!(plain, collect(&primitives));
    assert_eq!(plain, collect(&decorated));
    assert_eq!(plain.min().y(), -4.0);
    assert_eq!(plain.max().x(), 7.0);
}

#[test]
fn malformed_gradient_triangle_is_dropped_alone() {
    let black = Rgba::opaque(0, 0, 0);
    let (doc, summary) = import(vec![
        Opcode::GouraudPolytriangle(GouraudRecord {
            points: vec![
                Point2::new(0.0, 0.0),
                Point2::new(5.0, 0.0),
                Point2::new(10.0, 0.0),
            ],
            colors: vec![black, Rgba::opaque(100, 0, 0), Rgba::opaque(200, 0, 0)],
        }),
        Opcode::Polyline(vec![Point2::new(0.0, 0.0), Point2::new(1.0, 1.0)]),
    ]);
    assert_eq!(summary.skipped, 0);
    assert_eq!(summary.diagnostics.malformed_gradients, 1);
    assert_eq!(doc.entities().count(), 1);
}

#[test]
fn coarse_inversion_is_reported() {
    let (_, summary) = import(vec![
        Opcode::Units(UnitsRecord {
            units: "m".to_string(),
            matrix: [
                [1e-160, 0.0, 0.0, 0.0],
                [0.0, 1e-160, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
                [0.0, 0.0, 0.0, 1.0],
            ],
        }),
        Opcode::Polyline(vec![Point2::new(0.0, 0.0), Point2::new(1e-160, 0.0)]),
    ]);
    assert_eq!(summary.diagnostics.tolerance_fallbacks, 1);
    assert_eq!(summary.calibration, Calibration::FromUnits);
}

#[test]
fn placeholder_left_in_viewport_block_is_removed() {
    let square = vec![
        Point2::new(0.0, 0.0),
        Point2::new(10.0, 0.0),
        Point2::new(10.0, 10.0),
        Point2::new(0.0, 10.0),
    ];
    let (doc, summary) = import(vec![
        Opcode::Viewport(ViewportRecord {
            name: "A".to_string(),
            boundary: Some(square.clone()),
        }),
        // 上游留下的占位：一条多段线与一个实心填充
        Opcode::Polygon(square.clone()),
        Opcode::Fill(true),
        Opcode::Polygon(square.clone()),
        Opcode::Viewport(ViewportRecord {
            name: "B".to_string(),
            boundary: Some(square),
        }),
    ]);
    assert_eq!(summary.diagnostics.placeholders_erased, 2);
    let first = doc.block_by_name("*VPA").expect("first viewport block");
    assert_eq!(doc.entities_in(first).count(), 0);
    assert!(doc.block_by_name("*VPB").is_some());
}

struct FailingSource {
    served: bool,
}

impl OpcodeSource for FailingSource {
    fn rewind(&mut self) -> Result<(), ImportError> {
        Ok(())
    }

    fn next_opcode(&mut self) -> Result<Option<Opcode>, ImportError> {
        if self.served {
            return Err(ImportError::Source("unexpected end of stream".to_string()));
        }
        self.served = true;
        Ok(Some(Opcode::Fill(true)))
    }
}

#[test]
fn source_failures_abort_the_import() {
    let mut doc = Document::new();
    let err = DwfImporter::default()
        .import(&mut FailingSource { served: false }, &mut doc)
        .unwrap_err();
    assert!(matches!(err, ImportError::Source(_)));
}
