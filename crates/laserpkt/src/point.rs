//! Single projector command and its 6-byte encoding.

/// Largest value a 12-bit DAC coordinate can take.
pub const DAC_MAX: u16 = 4095;

/// One steering/colour command for one laser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LaserPoint {
    pub laser_id: u8,
    /// DAC x in [0, 4095].
    pub x: u16,
    /// DAC y in [0, 4095].
    pub y: u16,
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl LaserPoint {
    #[inline]
    pub fn new(laser_id: u8, x: u16, y: u16, r: u8, g: u8, b: u8) -> Self {
        Self {
            laser_id,
            x,
            y,
            r,
            g,
            b,
        }
    }

    /// Beam off at the DAC origin.
    #[inline]
    pub fn blank(laser_id: u8) -> Self {
        Self {
            laser_id,
            ..Self::default()
        }
    }

    /// Builds a point from unbounded floating-point values, clamping each
    /// channel into its valid range. NaN maps to 0.
    pub fn clamped(laser_id: u8, x: f64, y: f64, r: f64, g: f64, b: f64) -> Self {
        Self {
            laser_id,
            x: clamp_dac(x),
            y: clamp_dac(y),
            r: clamp_channel(r),
            g: clamp_channel(g),
            b: clamp_channel(b),
        }
    }

    /// Same position with the beam switched off.
    #[inline]
    pub fn blanked(self) -> Self {
        Self {
            r: 0,
            g: 0,
            b: 0,
            ..self
        }
    }

    #[inline]
    pub fn is_blank(&self) -> bool {
        self.r == 0 && self.g == 0 && self.b == 0
    }

    #[inline]
    pub fn rgb(&self) -> [u8; 3] {
        [self.r, self.g, self.b]
    }
}

#[inline]
fn clamp_dac(v: f64) -> u16 {
    // `as` saturates and maps NaN to 0.
    v.clamp(0.0, DAC_MAX as f64) as u16
}

#[inline]
fn clamp_channel(v: f64) -> u8 {
    v.clamp(0.0, 255.0) as u8
}

/// Packs a point into 6 bytes.
///
/// No range validation happens here: coordinates above 4095 silently lose
/// their high bits. Callers clamp before encoding.
#[inline(always)]
pub fn encode(p: &LaserPoint) -> [u8; 6] {
    [
        (p.x >> 4) as u8,
        (((p.x & 0x0F) << 4) | ((p.y >> 8) & 0x0F)) as u8,
        (p.y & 0xFF) as u8,
        p.r,
        p.g,
        p.b,
    ]
}

/// Unpacks 6 bytes produced by [`encode`].
#[inline(always)]
pub fn decode(laser_id: u8, bytes: &[u8; 6]) -> LaserPoint {
    let x = (bytes[0] as u16) << 4 | (bytes[1] as u16) >> 4;
    let y = ((bytes[1] as u16) & 0x0F) << 8 | bytes[2] as u16;

    LaserPoint {
        laser_id,
        x,
        y,
        r: bytes[3],
        g: bytes[4],
        b: bytes[5],
    }
}
