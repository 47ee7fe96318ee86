//! ESC/POS encoding of print primitives
//!
//! Turns the sequencer's typed primitives into the byte stream an Epson-style
//! thermal printer understands. Text is sent as Shift_JIS with kanji mode on.

use bytes::{BufMut, Bytes, BytesMut};
use std::path::Path;
use tracing::{info, instrument, warn};

use crate::receipt::{Alignment, Bitmap, ErrorCorrection, Font, Language, PrintPrimitive, Symbology};

const ESC: u8 = 0x1B;
const GS: u8 = 0x1D;
const FS: u8 = 0x1C;
const DLE: u8 = 0x10;
const EOT: u8 = 0x04;

/// Widest logo the 80mm head prints without clipping
pub const MAX_LOGO_WIDTH: u32 = 400;

pub const MAX_LOGO_HEIGHT: u32 = 600;

/// GS ( k carries a two-byte length that includes the 3 function bytes
const MAX_SYMBOL_PAYLOAD: usize = u16::MAX as usize - 3;

/// ESC @
pub const INITIALIZE: [u8; 2] = [ESC, 0x40];

/// DLE EOT 1: real-time printer status
pub const STATUS_PRINTER: [u8; 3] = [DLE, EOT, 0x01];

/// DLE EOT 4: real-time roll paper sensor status
pub const STATUS_PAPER: [u8; 3] = [DLE, EOT, 0x04];

/// Every real-time status byte has bit 1 and bit 4 set, bit 0 and bit 7 clear.
pub fn is_status_byte(b: u8) -> bool {
    b & 0b1001_0011 == 0b0001_0010
}

/// Paper-end bits of the DLE EOT 4 response
pub fn paper_out(b: u8) -> bool {
    b & 0b0110_0000 != 0
}

/// Encode a full job. Starts with `ESC @` so each job begins from a known state.
pub fn encode(primitives: &[PrintPrimitive]) -> Bytes {
    let mut buf = BytesMut::with_capacity(4096);
    buf.put_slice(&INITIALIZE);
    for primitive in primitives {
        encode_one(&mut buf, primitive);
    }
    buf.freeze()
}

fn encode_one(buf: &mut BytesMut, primitive: &PrintPrimitive) {
    match primitive {
        PrintPrimitive::SetAlignment(alignment) => {
            let n = match alignment {
                Alignment::Left => 0,
                Alignment::Center => 1,
                Alignment::Right => 2,
            };
            buf.put_slice(&[ESC, b'a', n]);
        }
        PrintPrimitive::SetFont(font) => {
            let n = match font {
                Font::A => 0,
                Font::B => 1,
                Font::C => 2,
            };
            buf.put_slice(&[ESC, b'M', n]);
        }
        PrintPrimitive::SetLanguage(Language::Japanese) => {
            // International set Japan, Shift_JIS code system, kanji mode on
            buf.put_slice(&[ESC, b'R', 8]);
            buf.put_slice(&[FS, b'C', 1]);
            buf.put_slice(&[FS, b'&']);
        }
        PrintPrimitive::SetSmoothing(on) => {
            buf.put_slice(&[GS, b'b', u8::from(*on)]);
        }
        PrintPrimitive::SetTextStyle {
            emphasis,
            underline,
        } => {
            buf.put_slice(&[ESC, b'E', u8::from(*emphasis)]);
            buf.put_slice(&[ESC, b'-', u8::from(*underline)]);
        }
        PrintPrimitive::SetTextSize { width, height } => {
            let w = (*width).clamp(1, 8) - 1;
            let h = (*height).clamp(1, 8) - 1;
            buf.put_slice(&[GS, b'!', (w << 4) | h]);
        }
        PrintPrimitive::EmitText(text) => {
            let (encoded, _, had_errors) = encoding_rs::SHIFT_JIS.encode(text);
            if had_errors {
                warn!("Text contains characters outside Shift_JIS: {:?}", text);
            }
            buf.put_slice(&encoded);
        }
        PrintPrimitive::EmitSymbol { payload, symbology } => {
            encode_symbol(buf, payload, symbology);
        }
        PrintPrimitive::DrawImage(bitmap) => encode_raster(buf, bitmap),
        PrintPrimitive::FeedLines(n) => {
            buf.put_slice(&[ESC, b'd', *n]);
        }
        PrintPrimitive::Cut => {
            // GS V 66 0: feed to the cutter, then full cut
            buf.put_slice(&[GS, b'V', 66, 0]);
        }
    }
}

fn encode_symbol(buf: &mut BytesMut, payload: &str, symbology: &Symbology) {
    match symbology {
        Symbology::QrModel2 { module_size, level } => {
            let size = (*module_size).clamp(1, 16);
            let level = match level {
                ErrorCorrection::L => 48,
                ErrorCorrection::M => 49,
                ErrorCorrection::Q => 50,
                ErrorCorrection::H => 51,
            };

            let data = payload.as_bytes();
            if data.len() > MAX_SYMBOL_PAYLOAD {
                warn!("Skipping QR code: {} byte payload is too large", data.len());
                return;
            }

            // Function 165: model 2
            buf.put_slice(&[GS, b'(', b'k', 4, 0, 49, 65, 50, 0]);
            // Function 167: module size
            buf.put_slice(&[GS, b'(', b'k', 3, 0, 49, 67, size]);
            // Function 169: error correction level
            buf.put_slice(&[GS, b'(', b'k', 3, 0, 49, 69, level]);
            // Function 180: store data
            buf.put_slice(&[GS, b'(', b'k']);
            buf.put_u16_le((data.len() + 3) as u16);
            buf.put_slice(&[49, 80, 48]);
            buf.put_slice(data);
            // Function 181: print
            buf.put_slice(&[GS, b'(', b'k', 3, 0, 49, 81, 48]);
        }
    }
}

fn encode_raster(buf: &mut BytesMut, bitmap: &Bitmap) {
    let (Ok(x_bytes), Ok(height)) = (
        u16::try_from(bitmap.bytes_per_row()),
        u16::try_from(bitmap.height),
    ) else {
        warn!(
            "Skipping image: {}x{} does not fit a raster header",
            bitmap.width, bitmap.height
        );
        return;
    };
    let expected = usize::from(x_bytes) * usize::from(height);
    if bitmap.data.len() != expected {
        warn!(
            "Skipping image: {} bytes of raster data, expected {}",
            bitmap.data.len(),
            expected
        );
        return;
    }

    // GS v 0 m xL xH yL yH
    buf.put_slice(&[GS, b'v', b'0', 0]);
    buf.put_u16_le(x_bytes);
    buf.put_u16_le(height);
    buf.put_slice(&bitmap.data);
    buf.put_u8(b'\n');
}

// ============================================================================
// Logo processing
// ============================================================================

/// Load an image and convert it to a 1-bit bitmap with error diffusion.
///
/// The image is scaled down to fit [`MAX_LOGO_WIDTH`] x [`MAX_LOGO_HEIGHT`]
/// dots. Transparent pixels print as white.
#[instrument]
pub fn process_logo(path: &Path) -> Option<Bitmap> {
    let img = match image::open(path) {
        Ok(img) => img,
        Err(e) => {
            warn!("Failed to open logo {}: {}", path.display(), e);
            return None;
        }
    };
    let bitmap = dither(&img);
    info!(
        width = bitmap.width,
        height = bitmap.height,
        "Logo converted to bitmap"
    );
    Some(bitmap)
}

/// Floyd–Steinberg dithering onto a white background
pub fn dither(img: &image::DynamicImage) -> Bitmap {
    use image::imageops::{self, BiLevel, FilterType};
    use image::{GenericImageView, GrayImage, Luma};

    let (w, h) = img.dimensions();
    let img = if w > MAX_LOGO_WIDTH || h > MAX_LOGO_HEIGHT {
        img.resize(MAX_LOGO_WIDTH, MAX_LOGO_HEIGHT, FilterType::Triangle)
    } else {
        img.clone()
    };
    let rgba = img.to_rgba8();
    let (width, height) = rgba.dimensions();

    let mut gray = GrayImage::from_fn(width, height, |x, y| {
        let p = rgba.get_pixel(x, y);
        let alpha = p[3] as f32 / 255.0;
        let l = 0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32;
        Luma([(l * alpha + 255.0 * (1.0 - alpha)).round().clamp(0.0, 255.0) as u8])
    });
    imageops::dither(&mut gray, &BiLevel);

    let x_bytes = width.div_ceil(8) as usize;
    let mut data = vec![0u8; x_bytes * height as usize];
    for (x, y, pixel) in gray.enumerate_pixels() {
        if pixel[0] == 0 {
            data[y as usize * x_bytes + x as usize / 8] |= 0x80 >> (x % 8);
        }
    }

    Bitmap {
        width,
        height,
        data: Bytes::from(data),
    }
}
