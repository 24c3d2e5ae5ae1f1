//! Decoded camera frames handed out by a [`SumoDriver`][crate::driver::SumoDriver].

/// Native width of the robot's MJPEG stream.
pub const FRAME_WIDTH: u32 = 640;
/// Native height of the robot's MJPEG stream.
pub const FRAME_HEIGHT: u32 = 480;

/// A decoded BGR8 frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoFrame {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Packed BGR8 pixel data, `width * height * 3` bytes.
    pub data: Vec<u8>,
}

impl VideoFrame {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self { width, height, data }
    }

    /// A frame with no pixels, returned when nothing has been decoded yet.
    pub fn empty() -> Self {
        Self::default()
    }

    /// `true` when the frame carries no usable pixels.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.data.is_empty()
    }

    /// Uniform frame of the native size, handy for simulation.
    pub fn solid(b: u8, g: u8, r: u8) -> Self {
        let pixels = (FRAME_WIDTH * FRAME_HEIGHT) as usize;
        let data = [b, g, r].repeat(pixels);
        Self::new(FRAME_WIDTH, FRAME_HEIGHT, data)
    }
}
