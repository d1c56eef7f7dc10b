//! BGRA frame transforms applied by the capture connection

use bytes::Bytes;

const BYTES_PER_PIXEL: usize = 4;

/// Rotate a tightly packed BGRA frame 90 degrees clockwise.
/// Returns the rotated pixels and the new (width, height).
pub fn rotate_cw(pixels: &[u8], width: u32, height: u32) -> (Vec<u8>, u32, u32) {
    let (w, h) = (width as usize, height as usize);
    let mut out = vec![0u8; pixels.len()];

    for y in 0..h {
        for x in 0..w {
            // (x, y) lands at column (h - 1 - y), row x of the rotated frame
            let src = (y * w + x) * BYTES_PER_PIXEL;
            let dst = (x * h + (h - 1 - y)) * BYTES_PER_PIXEL;
            out[dst..dst + BYTES_PER_PIXEL].copy_from_slice(&pixels[src..src + BYTES_PER_PIXEL]);
        }
    }

    (out, height, width)
}

/// Flip a BGRA frame around its vertical axis in place
pub fn mirror_horizontal(pixels: &mut [u8], width: u32, height: u32) {
    if width == 0 || height == 0 {
        return;
    }
    let row_len = width as usize * BYTES_PER_PIXEL;
    for row in pixels.chunks_exact_mut(row_len).take(height as usize) {
        let w = width as usize;
        for x in 0..w / 2 {
            let left = x * BYTES_PER_PIXEL;
            let right = (w - 1 - x) * BYTES_PER_PIXEL;
            for i in 0..BYTES_PER_PIXEL {
                row.swap(left + i, right + i);
            }
        }
    }
}

/// Apply `quarter_turns` clockwise rotations and an optional mirror.
///
/// Empty frames and payloads whose length does not match
/// `width * height * 4` are returned untouched together with the original
/// dimensions.
pub fn reorient(
    payload: &Bytes,
    width: u32,
    height: u32,
    quarter_turns: u8,
    mirror: bool,
) -> (Bytes, u32, u32) {
    let expected = width as usize * height as usize * BYTES_PER_PIXEL;
    if expected == 0 || payload.len() != expected || (quarter_turns % 4 == 0 && !mirror) {
        return (payload.clone(), width, height);
    }

    let mut pixels = payload.to_vec();
    let (mut w, mut h) = (width, height);
    for _ in 0..quarter_turns % 4 {
        let (rotated, rw, rh) = rotate_cw(&pixels, w, h);
        pixels = rotated;
        w = rw;
        h = rh;
    }
    if mirror {
        mirror_horizontal(&mut pixels, w, h);
    }

    (Bytes::from(pixels), w, h)
}
