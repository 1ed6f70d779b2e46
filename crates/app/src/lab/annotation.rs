//! Drawing primitives for the live HUD and preview overlays.
//!
//! Text uses a built-in 5×7 bitmap font so overlays need no font files.

use codecs::PerCodec;
use face_detect::BoundingBox;
use image::{Rgb, RgbImage};
use video_ingest::{Frame, FrameError};

use crate::lab::data::CodecReading;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const HUD_TEXT: Rgb<u8> = Rgb([255, 255, 255]);
const HUD_BACKDROP: Rgb<u8> = Rgb([0, 0, 0]);
const PSNR_COLOR: Rgb<u8> = Rgb([0, 0, 255]);
const SSIM_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const GLYPH_WIDTH: i32 = 5;
const GLYPH_HEIGHT: i32 = 7;
const GLYPH_ADVANCE: i32 = 6;

/// Text describing one live frame.
pub(crate) struct HudInfo<'a> {
    pub(crate) frame_number: u64,
    pub(crate) quality: u8,
    pub(crate) codec_names: PerCodec<&'static str>,
    pub(crate) readings: Option<&'a PerCodec<CodecReading>>,
}

/// Live-stream frame: face box, per-codec readings top left, frame counter
/// bottom right.
pub(crate) fn annotate_live(
    frame: &Frame,
    face: Option<BoundingBox>,
    hud: &HudInfo<'_>,
) -> Result<Frame, FrameError> {
    let mut image = frame.to_rgb_image();
    let scale = text_scale(image.width());
    if let Some(bbox) = face {
        outline_face(&mut image, bbox, scale);
    }

    if let Some(readings) = hud.readings {
        let line = format!(
            "{} {:.1}DB {:.3}  {} {:.1}DB {:.3}",
            hud.codec_names.fast,
            readings.fast.psnr_db,
            readings.fast.ssim,
            hud.codec_names.alternate,
            readings.alternate.psnr_db,
            readings.alternate.ssim,
        );
        boxed_label(&mut image, 4, 4, &line, HUD_TEXT, scale);
    }

    let info = format!("FRAME {:06}  Q{}", hud.frame_number, hud.quality);
    let info_width = text_width(&info, scale).min(image.width() as i32);
    let info_x = (image.width() as i32 - info_width - 4).max(0);
    let info_y = (image.height() as i32 - GLYPH_HEIGHT * scale - 4).max(0);
    boxed_label(&mut image, info_x, info_y, &info, HUD_TEXT, scale);

    Frame::from_rgb_image(image)
}

/// Frame with the detected face outlined, or unchanged when there is none.
pub(crate) fn draw_detection(frame: &Frame, face: Option<BoundingBox>) -> Result<Frame, FrameError> {
    let mut image = frame.to_rgb_image();
    let scale = text_scale(image.width());
    if let Some(bbox) = face {
        outline_face(&mut image, bbox, scale);
    }
    Frame::from_rgb_image(image)
}

/// Write PSNR and SSIM in the top-left corner.
pub(crate) fn overlay_metrics(frame: &Frame, psnr_db: f64, ssim: f64) -> Result<Frame, FrameError> {
    let mut image = frame.to_rgb_image();
    let scale = text_scale(image.width()) + 1;
    let line_height = (GLYPH_HEIGHT + 3) * scale;
    draw_label(&mut image, 10, 10, &format!("PSNR: {psnr_db:.2}"), PSNR_COLOR, scale);
    draw_label(
        &mut image,
        10,
        10 + line_height,
        &format!("SSIM: {ssim:.3}"),
        SSIM_COLOR,
        scale,
    );
    Frame::from_rgb_image(image)
}

fn text_scale(width: u32) -> i32 {
    if width >= 480 { 2 } else { 1 }
}

fn text_width(text: &str, scale: i32) -> i32 {
    text.chars().count() as i32 * GLYPH_ADVANCE * scale
}

fn outline_face(image: &mut RgbImage, bbox: BoundingBox, scale: i32) {
    let left = bbox.x as i32;
    let top = bbox.y as i32;
    draw_rectangle(
        image,
        left,
        top,
        bbox.right() as i32 - 1,
        bbox.bottom() as i32 - 1,
        BOX_COLOR,
        scale,
    );
    let label_y = (top - GLYPH_HEIGHT * scale - 4).max(0);
    boxed_label(image, left, label_y, "FACE", BOX_COLOR, scale);
}

fn boxed_label(image: &mut RgbImage, x: i32, y: i32, text: &str, color: Rgb<u8>, scale: i32) {
    fill_rect(
        image,
        x,
        y,
        x + text_width(text, scale) + 2,
        y + GLYPH_HEIGHT * scale + 2,
        HUD_BACKDROP,
    );
    draw_label(image, x + 2, y + 1, text, color, scale);
}

fn draw_rectangle(
    image: &mut RgbImage,
    left: i32,
    top: i32,
    right: i32,
    bottom: i32,
    color: Rgb<u8>,
    thickness: i32,
) {
    for inset in 0..thickness.max(1) {
        let (l, t, r, b) = (left + inset, top + inset, right - inset, bottom - inset);
        if l > r || t > b {
            break;
        }
        fill_rect(image, l, t, r, t, color);
        fill_rect(image, l, b, r, b, color);
        fill_rect(image, l, t, l, b, color);
        fill_rect(image, r, t, r, b, color);
    }
}

/// Fill the inclusive rectangle, clipped to the image.
fn fill_rect(image: &mut RgbImage, left: i32, top: i32, right: i32, bottom: i32, color: Rgb<u8>) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    if width == 0 || height == 0 || right < 0 || bottom < 0 || left >= width || top >= height {
        return;
    }
    let left = left.clamp(0, width - 1);
    let right = right.clamp(0, width - 1);
    let top = top.clamp(0, height - 1);
    let bottom = bottom.clamp(0, height - 1);

    for y in top..=bottom {
        for x in left..=right {
            image.put_pixel(x as u32, y as u32, color);
        }
    }
}

fn draw_label(image: &mut RgbImage, mut x: i32, y: i32, text: &str, color: Rgb<u8>, scale: i32) {
    for ch in text.chars().flat_map(|c| c.to_uppercase()) {
        if let Some(glyph) = glyph_bits(ch) {
            for (row, pattern) in glyph.iter().enumerate() {
                for col in 0..GLYPH_WIDTH {
                    if (pattern >> (GLYPH_WIDTH - 1 - col)) & 1 == 1 {
                        let px = x + col * scale;
                        let py = y + row as i32 * scale;
                        fill_rect(image, px, py, px + scale - 1, py + scale - 1, color);
                    }
                }
            }
        }
        x += GLYPH_ADVANCE * scale;
    }
}

fn glyph_bits(ch: char) -> Option<[u8; 7]> {
    match ch {
        'A' => Some([
            0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001,
        ]),
        'B' => Some([
            0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110,
        ]),
        'C' => Some([
            0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110,
        ]),
        'D' => Some([
            0b11110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b11110,
        ]),
        'E' => Some([
            0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b11111,
        ]),
        'F' => Some([
            0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b10000,
        ]),
        'G' => Some([
            0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111,
        ]),
        'H' => Some([
            0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001,
        ]),
        'I' => Some([
            0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110,
        ]),
        'J' => Some([
            0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100,
        ]),
        'K' => Some([
            0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001,
        ]),
        'L' => Some([
            0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111,
        ]),
        'M' => Some([
            0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001,
        ]),
        'N' => Some([
            0b10001, 0b11001, 0b10101, 0b10101, 0b10011, 0b10001, 0b10001,
        ]),
        'O' => Some([
            0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110,
        ]),
        'P' => Some([
            0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000,
        ]),
        'Q' => Some([
            0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101,
        ]),
        'R' => Some([
            0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001,
        ]),
        'S' => Some([
            0b01111, 0b10000, 0b01110, 0b00001, 0b00001, 0b10001, 0b01110,
        ]),
        'T' => Some([
            0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100,
        ]),
        'U' => Some([
            0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110,
        ]),
        'V' => Some([
            0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100,
        ]),
        'W' => Some([
            0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b10101, 0b01010,
        ]),
        'X' => Some([
            0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001,
        ]),
        'Y' => Some([
            0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100, 0b00100,
        ]),
        'Z' => Some([
            0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111,
        ]),
        '0' => Some([
            0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110,
        ]),
        '1' => Some([
            0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110,
        ]),
        '2' => Some([
            0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111,
        ]),
        '3' => Some([
            0b11110, 0b00001, 0b00001, 0b01110, 0b00001, 0b00001, 0b11110,
        ]),
        '4' => Some([
            0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010,
        ]),
        '5' => Some([
            0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110,
        ]),
        '6' => Some([
            0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110,
        ]),
        '7' => Some([
            0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000,
        ]),
        '8' => Some([
            0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110,
        ]),
        '9' => Some([
            0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100,
        ]),
        ':' => Some([0, 0b00110, 0b00110, 0, 0b00110, 0b00110, 0]),
        '-' => Some([0, 0, 0, 0b11111, 0, 0, 0]),
        '%' => Some([
            0b10001, 0b10010, 0b00100, 0b01000, 0b10010, 0b10001, 0b00000,
        ]),
        '.' => Some([0, 0, 0, 0, 0, 0b00110, 0b00110]),
        ' ' => Some([0, 0, 0, 0, 0, 0, 0]),
        _ => None,
    }
}
