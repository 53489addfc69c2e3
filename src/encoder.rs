use crate::errors::EncoderError;
use crate::types::FrameSurface;

/// Parameters for one encode pass.
#[derive(Debug, Clone, Copy)]
pub struct EncodeOptions {
    /// The longer spatial dimension of the output never exceeds this cap.
    pub max_dimension: u32,
    /// Flip the frame horizontally (selfie view for camera frames).
    pub mirror: bool,
}

/// Turns a captured surface into a compact transmissible payload.
pub trait FrameEncoder: Send + Sync {
    fn encode(&self, surface: &FrameSurface, options: &EncodeOptions) -> Result<Vec<u8>, EncoderError>;
}

/// Downscaling encoder: nearest-neighbour resample so the longer dimension
/// fits the cap (aspect preserved, never upscaled), optional horizontal
/// mirror, output framed as an 8-byte dimension header plus packed RGB.
pub struct DownscaleEncoder;

impl DownscaleEncoder {
    pub fn new() -> Self {
        Self
    }

    /// Output dimensions for a surface under a cap. No upscaling.
    pub fn scaled_dimensions(width: u32, height: u32, max_dimension: u32) -> (u32, u32) {
        let longer = width.max(height);
        if longer <= max_dimension {
            return (width, height);
        }
        let scale = max_dimension as f64 / longer as f64;
        let out_w = ((width as f64 * scale).round() as u32).max(1);
        let out_h = ((height as f64 * scale).round() as u32).max(1);
        (out_w, out_h)
    }
}

impl Default for DownscaleEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameEncoder for DownscaleEncoder {
    fn encode(&self, surface: &FrameSurface, options: &EncodeOptions) -> Result<Vec<u8>, EncoderError> {
        if surface.width == 0 || surface.height == 0 || surface.data.is_empty() {
            return Err(EncoderError::EmptySurface);
        }
        let expected = surface.width as usize * surface.height as usize * 3;
        if surface.data.len() != expected {
            return Err(EncoderError::DimensionMismatch {
                expected,
                actual: surface.data.len(),
            });
        }

        let (out_w, out_h) =
            Self::scaled_dimensions(surface.width, surface.height, options.max_dimension.max(1));

        let mut payload = Vec::with_capacity(8 + (out_w * out_h * 3) as usize);
        payload.extend_from_slice(&out_w.to_le_bytes());
        payload.extend_from_slice(&out_h.to_le_bytes());

        let src_w = surface.width as usize;
        for oy in 0..out_h as usize {
            let sy = oy * surface.height as usize / out_h as usize;
            for ox in 0..out_w as usize {
                let mut sx = ox * src_w / out_w as usize;
                if options.mirror {
                    sx = src_w - 1 - sx;
                }
                let offset = (sy * src_w + sx) * 3;
                payload.extend_from_slice(&surface.data[offset..offset + 3]);
            }
        }

        Ok(payload)
    }
}

/// Read back the dimension header of an encoded payload.
pub fn decode_dimensions(payload: &[u8]) -> Option<(u32, u32)> {
    if payload.len() < 8 {
        return None;
    }
    let width = u32::from_le_bytes(payload[0..4].try_into().ok()?);
    let height = u32::from_le_bytes(payload[4..8].try_into().ok()?);
    Some((width, height))
}
