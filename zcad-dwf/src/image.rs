//! 图像像素格式整理与二值压缩图像的宽高交换判定。

use tracing::warn;
use zcad_core::document::PixelFormat;
use zcad_core::geometry::Bounds2D;

use crate::opcode::ImageRecord;

/// 标识符最高位：写入方声明宽高已交换。
pub const SWAP_MARKER: u32 = 1 << 31;

/// 不写交换标记的来源扩展名，这类文件跳过标记校验。
const UNMARKED_EXTENSION: &str = "w2d";

#[derive(Debug, Clone, PartialEq)]
pub struct PreparedImage {
    pub identifier: u32,
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub palette: Vec<u32>,
    pub pixels: Vec<u8>,
    pub swapped: bool,
    /// 交换判定与标识符中的标记不一致（仅作提示，仍按判定结果处理）。
    pub marker_mismatch: bool,
}

/// 整理图像记录。`target` 为图像在目标坐标下的范围。
pub fn prepare_image(
    record: &ImageRecord,
    target: &Bounds2D,
    source_extension: Option<&str>,
) -> PreparedImage {
    let mut width = record.columns;
    let mut height = record.rows;
    let mut swapped = false;
    let mut marker_mismatch = false;

    if record.format == PixelFormat::Group3X {
        let target_portrait = target.height() > target.width();
        let raw_portrait = height > width;
        swapped = target_portrait != raw_portrait;
        if swapped {
            std::mem::swap(&mut width, &mut height);
        }
        let marked = record.identifier & SWAP_MARKER != 0;
        let exempt = source_extension
            .map(|ext| ext.trim_start_matches('.').eq_ignore_ascii_case(UNMARKED_EXTENSION))
            .unwrap_or(false);
        if marked != swapped && !exempt {
            warn!(
                identifier = record.identifier & !SWAP_MARKER,
                marked, swapped, "图像宽高交换判定与标记不一致"
            );
            marker_mismatch = true;
        }
    }

    let (format, pixels) = match record.format {
        PixelFormat::Rgb => (PixelFormat::Rgba, expand_packed_bgr(&record.data)),
        other => (other, record.data.clone()),
    };

    PreparedImage {
        identifier: record.identifier & !SWAP_MARKER,
        format,
        width,
        height,
        palette: record.palette.iter().map(|color| color.to_rgb24()).collect(),
        pixels,
        swapped,
        marker_mismatch,
    }
}

/// 旧式紧凑 BGR 像素展开为不透明 RGBA；末尾不足一个像素的字节被丢弃。
fn expand_packed_bgr(data: &[u8]) -> Vec<u8> {
    data.chunks_exact(3)
        .flat_map(|bgr| [bgr[2], bgr[1], bgr[0], 255])
        .collect()
}
