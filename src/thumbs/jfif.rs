//! Reconstruction of Type 1 thumbnail payloads into valid CMYK JPEGs.
//!
//! Type 1 streams carry JPEG-compressed sample planes with the framing
//! stripped: no SOI, APP segments, quantization or Huffman tables, and no
//! frame/scan headers. The planes are inverted CMY plus an alpha plane,
//! stored Y-M-C first. Supplying the standard markers and tables is the
//! minimum change that makes a conformant decoder consume the data; the
//! component declarations are arranged so the stream decodes as
//! (C, M, Y, K), the key plane reading full.

/// Zigzag order used when emitting quantization tables.
const ZIGZAG: [usize; 64] = [
    0, 1, 8, 16, 9, 2, 3, 10, 17, 24, 32, 25, 18, 11, 4, 5, 12, 19, 26, 33, 40, 48, 41, 34, 27,
    20, 13, 6, 7, 14, 21, 28, 35, 42, 49, 56, 57, 50, 43, 36, 29, 22, 15, 23, 30, 37, 44, 51, 58,
    59, 52, 45, 38, 31, 39, 46, 53, 60, 61, 54, 47, 55, 62, 63,
];

/// Standard luminance quantization table, natural order.
const QUANT_LUMINANCE: [u8; 64] = [
    16, 11, 10, 16, 24, 40, 51, 61, 12, 12, 14, 19, 26, 58, 60, 55, 14, 13, 16, 24, 40, 57, 69,
    56, 14, 17, 22, 29, 51, 87, 80, 62, 18, 22, 37, 56, 68, 109, 103, 77, 24, 35, 55, 64, 81, 104,
    113, 92, 49, 64, 78, 87, 103, 121, 120, 101, 72, 92, 95, 98, 112, 100, 103, 99,
];

/// Standard chrominance quantization table, natural order.
const QUANT_CHROMINANCE: [u8; 64] = [
    17, 18, 24, 47, 99, 99, 99, 99, 18, 21, 26, 66, 99, 99, 99, 99, 24, 26, 56, 99, 99, 99, 99,
    99, 47, 66, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99,
    99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99,
];

/// Standard DC luminance Huffman table (code counts, then values).
const DC_LUMINANCE_BITS: [u8; 16] = [0, 1, 5, 1, 1, 1, 1, 1, 1, 0, 0, 0, 0, 0, 0, 0];
const DC_LUMINANCE_VALUES: [u8; 12] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11];

const DC_CHROMINANCE_BITS: [u8; 16] = [0, 3, 1, 1, 1, 1, 1, 1, 1, 1, 1, 0, 0, 0, 0, 0];
const DC_CHROMINANCE_VALUES: [u8; 12] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11];

const AC_LUMINANCE_BITS: [u8; 16] = [0, 2, 1, 3, 3, 2, 4, 3, 5, 5, 4, 4, 0, 0, 1, 0x7D];
const AC_LUMINANCE_VALUES: [u8; 162] = [
    0x01, 0x02, 0x03, 0x00, 0x04, 0x11, 0x05, 0x12, 0x21, 0x31, 0x41, 0x06, 0x13, 0x51, 0x61,
    0x07, 0x22, 0x71, 0x14, 0x32, 0x81, 0x91, 0xA1, 0x08, 0x23, 0x42, 0xB1, 0xC1, 0x15, 0x52,
    0xD1, 0xF0, 0x24, 0x33, 0x62, 0x72, 0x82, 0x09, 0x0A, 0x16, 0x17, 0x18, 0x19, 0x1A, 0x25,
    0x26, 0x27, 0x28, 0x29, 0x2A, 0x34, 0x35, 0x36, 0x37, 0x38, 0x39, 0x3A, 0x43, 0x44, 0x45,
    0x46, 0x47, 0x48, 0x49, 0x4A, 0x53, 0x54, 0x55, 0x56, 0x57, 0x58, 0x59, 0x5A, 0x63, 0x64,
    0x65, 0x66, 0x67, 0x68, 0x69, 0x6A, 0x73, 0x74, 0x75, 0x76, 0x77, 0x78, 0x79, 0x7A, 0x83,
    0x84, 0x85, 0x86, 0x87, 0x88, 0x89, 0x8A, 0x92, 0x93, 0x94, 0x95, 0x96, 0x97, 0x98, 0x99,
    0x9A, 0xA2, 0xA3, 0xA4, 0xA5, 0xA6, 0xA7, 0xA8, 0xA9, 0xAA, 0xB2, 0xB3, 0xB4, 0xB5, 0xB6,
    0xB7, 0xB8, 0xB9, 0xBA, 0xC2, 0xC3, 0xC4, 0xC5, 0xC6, 0xC7, 0xC8, 0xC9, 0xCA, 0xD2, 0xD3,
    0xD4, 0xD5, 0xD6, 0xD7, 0xD8, 0xD9, 0xDA, 0xE1, 0xE2, 0xE3, 0xE4, 0xE5, 0xE6, 0xE7, 0xE8,
    0xE9, 0xEA, 0xF1, 0xF2, 0xF3, 0xF4, 0xF5, 0xF6, 0xF7, 0xF8, 0xF9, 0xFA,
];

const AC_CHROMINANCE_BITS: [u8; 16] = [0, 2, 1, 2, 4, 4, 3, 4, 7, 5, 4, 4, 0, 1, 2, 0x77];
const AC_CHROMINANCE_VALUES: [u8; 162] = [
    0x00, 0x01, 0x02, 0x03, 0x11, 0x04, 0x05, 0x21, 0x31, 0x06, 0x12, 0x41, 0x51, 0x07, 0x61,
    0x71, 0x13, 0x22, 0x32, 0x81, 0x08, 0x14, 0x42, 0x91, 0xA1, 0xB1, 0xC1, 0x09, 0x23, 0x33,
    0x52, 0xF0, 0x15, 0x62, 0x72, 0xD1, 0x0A, 0x16, 0x24, 0x34, 0xE1, 0x25, 0xF1, 0x17, 0x18,
    0x19, 0x1A, 0x26, 0x27, 0x28, 0x29, 0x2A, 0x35, 0x36, 0x37, 0x38, 0x39, 0x3A, 0x43, 0x44,
    0x45, 0x46, 0x47, 0x48, 0x49, 0x4A, 0x53, 0x54, 0x55, 0x56, 0x57, 0x58, 0x59, 0x5A, 0x63,
    0x64, 0x65, 0x66, 0x67, 0x68, 0x69, 0x6A, 0x73, 0x74, 0x75, 0x76, 0x77, 0x78, 0x79, 0x7A,
    0x82, 0x83, 0x84, 0x85, 0x86, 0x87, 0x88, 0x89, 0x8A, 0x92, 0x93, 0x94, 0x95, 0x96, 0x97,
    0x98, 0x99, 0x9A, 0xA2, 0xA3, 0xA4, 0xA5, 0xA6, 0xA7, 0xA8, 0xA9, 0xAA, 0xB2, 0xB3, 0xB4,
    0xB5, 0xB6, 0xB7, 0xB8, 0xB9, 0xBA, 0xC2, 0xC3, 0xC4, 0xC5, 0xC6, 0xC7, 0xC8, 0xC9, 0xCA,
    0xD2, 0xD3, 0xD4, 0xD5, 0xD6, 0xD7, 0xD8, 0xD9, 0xDA, 0xE2, 0xE3, 0xE4, 0xE5, 0xE6, 0xE7,
    0xE8, 0xE9, 0xEA, 0xF2, 0xF3, 0xF4, 0xF5, 0xF6, 0xF7, 0xF8, 0xF9, 0xFA,
];

/// SOF component declarations: ids 1..4 read as C, M, Y, K under the Adobe
/// transform-0 convention; quantization selectors 0,1,1,0.
const SOF_QUANT_SELECTORS: [u8; 4] = [0, 1, 1, 0];

/// SOS interleave order: the source stores its planes Y-M-C then alpha, so
/// the scan lists component ids 3, 2, 1, 4 to land each plane on the right
/// output channel.
const SOS_COMPONENT_ORDER: [u8; 4] = [3, 2, 1, 4];

/// Build a complete CMYK JPEG around a raw Type 1 scan body.
pub fn reconstruct(scan: &[u8], width: u32, height: u32) -> Vec<u8> {
    let width = width.min(u16::MAX as u32) as u16;
    let height = height.min(u16::MAX as u32) as u16;

    let mut out = Vec::with_capacity(scan.len() + 1024);
    out.extend_from_slice(&[0xFF, 0xD8]); // SOI
    emit_app0(&mut out);
    emit_app14(&mut out);
    emit_dqt(&mut out, 0, &QUANT_LUMINANCE);
    emit_dqt(&mut out, 1, &QUANT_CHROMINANCE);
    emit_dht(&mut out, 0x00, &DC_LUMINANCE_BITS, &DC_LUMINANCE_VALUES);
    emit_dht(&mut out, 0x10, &AC_LUMINANCE_BITS, &AC_LUMINANCE_VALUES);
    emit_dht(&mut out, 0x01, &DC_CHROMINANCE_BITS, &DC_CHROMINANCE_VALUES);
    emit_dht(&mut out, 0x11, &AC_CHROMINANCE_BITS, &AC_CHROMINANCE_VALUES);
    emit_sof0(&mut out, width, height);
    emit_sos(&mut out);
    out.extend_from_slice(scan);
    out.extend_from_slice(&[0xFF, 0xD9]); // EOI
    out
}

fn emit_segment(out: &mut Vec<u8>, marker: u8, body: &[u8]) {
    out.push(0xFF);
    out.push(marker);
    let length = (body.len() + 2) as u16;
    out.extend_from_slice(&length.to_be_bytes());
    out.extend_from_slice(body);
}

/// APP0/JFIF: version 1.01, dots-per-inch, 96x96 density, no thumbnail.
fn emit_app0(out: &mut Vec<u8>) {
    let mut body = Vec::with_capacity(14);
    body.extend_from_slice(b"JFIF\0");
    body.extend_from_slice(&[0x01, 0x01, 0x01]);
    body.extend_from_slice(&96u16.to_be_bytes());
    body.extend_from_slice(&96u16.to_be_bytes());
    body.extend_from_slice(&[0, 0]);
    emit_segment(out, 0xE0, &body);
}

/// APP14/Adobe with color transform 0: four components are plain CMYK,
/// not YCCK.
fn emit_app14(out: &mut Vec<u8>) {
    let mut body = Vec::with_capacity(12);
    body.extend_from_slice(b"Adobe");
    body.extend_from_slice(&100u16.to_be_bytes()); // DCTEncode version
    body.extend_from_slice(&0u16.to_be_bytes()); // flags0
    body.extend_from_slice(&0u16.to_be_bytes()); // flags1
    body.push(0); // transform
    emit_segment(out, 0xEE, &body);
}

fn emit_dqt(out: &mut Vec<u8>, table_id: u8, table: &[u8; 64]) {
    let mut body = Vec::with_capacity(65);
    body.push(table_id); // 8-bit precision, table id in the low nibble
    for &index in &ZIGZAG {
        body.push(table[index]);
    }
    emit_segment(out, 0xDB, &body);
}

fn emit_dht(out: &mut Vec<u8>, class_and_id: u8, bits: &[u8; 16], values: &[u8]) {
    let mut body = Vec::with_capacity(17 + values.len());
    body.push(class_and_id);
    body.extend_from_slice(bits);
    body.extend_from_slice(values);
    emit_segment(out, 0xC4, &body);
}

fn emit_sof0(out: &mut Vec<u8>, width: u16, height: u16) {
    let mut body = Vec::with_capacity(6 + 3 * 4);
    body.push(8); // sample precision
    body.extend_from_slice(&height.to_be_bytes());
    body.extend_from_slice(&width.to_be_bytes());
    body.push(4);
    for (index, &quant) in SOF_QUANT_SELECTORS.iter().enumerate() {
        body.push(index as u8 + 1); // component id
        body.push(0x11); // 1x1 sampling
        body.push(quant);
    }
    emit_segment(out, 0xC0, &body);
}

fn emit_sos(out: &mut Vec<u8>) {
    let mut body = Vec::with_capacity(2 + 2 * 4 + 3);
    body.push(4);
    for &id in &SOS_COMPONENT_ORDER {
        body.push(id);
        // Components on the chrominance quantization table also use the
        // chrominance Huffman pair.
        let table = if SOF_QUANT_SELECTORS[id as usize - 1] == 1 {
            0x11
        } else {
            0x00
        };
        body.push(table);
    }
    body.extend_from_slice(&[0, 0x3F, 0]); // spectral selection, approximation
    emit_segment(out, 0xDA, &body);
}

/// Builds decodable flat entropy-coded scans against the tables above.
///
/// Every block carries a DC coefficient and an immediate end-of-block, so
/// each plane decodes to one constant sample value. The bit patterns are
/// the canonical codes derived from the DC/AC table definitions.
#[cfg(test)]
pub(crate) mod testscan {
    struct BitWriter {
        out: Vec<u8>,
        acc: u8,
        nbits: u32,
    }

    impl BitWriter {
        fn new() -> Self {
            BitWriter {
                out: Vec::new(),
                acc: 0,
                nbits: 0,
            }
        }

        fn put(&mut self, value: u32, bits: u32) {
            for i in (0..bits).rev() {
                self.acc = (self.acc << 1) | ((value >> i) & 1) as u8;
                self.nbits += 1;
                if self.nbits == 8 {
                    self.out.push(self.acc);
                    if self.acc == 0xFF {
                        self.out.push(0x00); // byte stuffing
                    }
                    self.acc = 0;
                    self.nbits = 0;
                }
            }
        }

        fn finish(mut self) -> Vec<u8> {
            while self.nbits != 0 {
                self.put(1, 1);
            }
            self.out
        }
    }

    /// A scan of `mcu_count` MCUs whose C, M and Y planes decode to the
    /// mid-level sample 128. With `key_plane_full` the fourth plane's DC
    /// is offset so it saturates to 0xFF; otherwise it is mid-level too.
    pub fn flat_scan(mcu_count: usize, key_plane_full: bool) -> Vec<u8> {
        let mut w = BitWriter::new();
        for mcu in 0..mcu_count {
            // First two scan components ride the chrominance tables:
            // DC category 0 is 00, EOB is 00.
            for _ in 0..2 {
                w.put(0b00, 2);
                w.put(0b00, 2);
            }
            // Third component, luminance tables: DC category 0, EOB 1010.
            w.put(0b00, 2);
            w.put(0b1010, 4);
            // Fourth (key) component, luminance tables.
            if mcu == 0 && key_plane_full {
                // DC category 7 (11110) with diff +80: 128 + 80*16/8
                // clamps to 255 on every sample of the plane.
                w.put(0b11110, 5);
                w.put(80, 7);
            } else {
                w.put(0b00, 2);
            }
            w.put(0b1010, 4);
        }
        w.finish()
    }
}

/// Decode a reconstructed JPEG and re-encode it as PNG.
#[cfg(feature = "imgconv")]
pub fn to_png(jpeg: &[u8]) -> crate::common::error::Result<Vec<u8>> {
    use crate::common::error::Error;
    let img = image::load_from_memory_with_format(jpeg, image::ImageFormat::Jpeg)
        .map_err(|e| Error::UnknownEntryType(format!("undecodable reconstruction: {e}")))?;
    let mut buffer = std::io::Cursor::new(Vec::new());
    img.write_to(&mut buffer, image::ImageFormat::Png)
        .map_err(|e| Error::UnknownEntryType(format!("PNG re-encode failed: {e}")))?;
    Ok(buffer.into_inner())
}


#[cfg(all(test, feature = "imgconv"))]
mod decode_tests {
    use super::testscan::flat_scan;
    use super::*;
    use image::ImageDecoder;

    // 96x96 with four 1x1 components is 12x12 MCUs.
    const MCUS_96: usize = 144;

    #[test]
    fn reconstruction_parses_as_cmyk_96x96() {
        let jpeg = reconstruct(&flat_scan(MCUS_96, true), 96, 96);

        let decoder =
            image::codecs::jpeg::JpegDecoder::new(std::io::Cursor::new(jpeg.as_slice())).unwrap();
        assert_eq!(decoder.dimensions(), (96, 96));
        assert_eq!(
            decoder.original_color_type(),
            image::ExtendedColorType::Cmyk8
        );

        let img = image::load_from_memory_with_format(&jpeg, image::ImageFormat::Jpeg).unwrap();
        assert_eq!((img.width(), img.height()), (96, 96));
        // Flat source planes must stay flat through decode.
        let rgb = img.to_rgb8();
        let first = *rgb.get_pixel(0, 0);
        assert!(rgb.pixels().all(|p| *p == first));
    }

    #[test]
    fn full_key_plane_reaches_the_decoded_output() {
        // Identical C, M and Y planes; the key plane saturated to 0xFF in
        // one stream and left mid-level in the other. The decoded pixels
        // must differ, pinning the fourth scan plane to the key channel
        // whichever CMYK-to-RGB convention the decoder applies.
        let full = reconstruct(&flat_scan(MCUS_96, true), 96, 96);
        let mid = reconstruct(&flat_scan(MCUS_96, false), 96, 96);

        let full = image::load_from_memory_with_format(&full, image::ImageFormat::Jpeg)
            .unwrap()
            .to_rgb8();
        let mid = image::load_from_memory_with_format(&mid, image::ImageFormat::Jpeg)
            .unwrap()
            .to_rgb8();
        assert_ne!(*full.get_pixel(0, 0), *mid.get_pixel(0, 0));
        assert!(full.pixels().all(|p| *p == *full.get_pixel(0, 0)));
    }

    #[test]
    fn png_re_encode_round_trips() {
        let jpeg = reconstruct(&flat_scan(MCUS_96, true), 96, 96);
        let png = to_png(&jpeg).unwrap();
        assert!(png.starts_with(&[0x89, 0x50, 0x4E, 0x47]));
        let img = image::load_from_memory_with_format(&png, image::ImageFormat::Png).unwrap();
        assert_eq!((img.width(), img.height()), (96, 96));
    }
}
