use anyhow::Context;
use memory_game::{majority_vote, Label};
use serde::{Deserialize, Serialize};

/// Number of frames taken of each unknown tile.
pub const FRAMES_PER_DISCOVERY: usize = 3;

/// Bytes per pixel of a [`Frame`].
pub const CHANNELS: usize = 3;

/// An RGB8 image, row-major.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}

/// The region of a sensor frame that shows the tile held at the camera.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roi {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for Roi {
    fn default() -> Self {
        Self {
            x: 380,
            y: 170,
            width: 224,
            height: 224,
        }
    }
}

impl Frame {
    /// A frame of a single color.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let pixels = rgb
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * CHANNELS)
            .collect();
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let start = (y as usize * self.width as usize + x as usize) * CHANNELS;
        let px = self.pixels.get(start..start + CHANNELS)?;
        Some([px[0], px[1], px[2]])
    }

    /// Cuts out `roi`, or returns `None` if it does not fit inside the frame.
    pub fn crop(&self, roi: Roi) -> Option<Frame> {
        if roi.x.checked_add(roi.width)? > self.width || roi.y.checked_add(roi.height)? > self.height
        {
            return None;
        }
        if self.pixels.len() != self.width as usize * self.height as usize * CHANNELS {
            return None;
        }
        let row_len = roi.width as usize * CHANNELS;
        let mut pixels = Vec::with_capacity(row_len * roi.height as usize);
        for y in roi.y..roi.y + roi.height {
            let start = (y as usize * self.width as usize + roi.x as usize) * CHANNELS;
            pixels.extend_from_slice(&self.pixels[start..start + row_len]);
        }
        Some(Frame {
            width: roi.width,
            height: roi.height,
            pixels,
        })
    }
}

/// The camera looking at the tile held by the robot.
pub trait Camera: Send {
    fn start(&mut self) -> anyhow::Result<()>;
    /// Takes one picture, already cropped to the tile.
    fn capture(&mut self) -> anyhow::Result<Frame>;
    fn stop(&mut self);
}

/// The vision model.
pub trait Classifier: Send {
    /// The single most likely label for one frame.
    fn top_prediction(&mut self, frame: &Frame) -> anyhow::Result<Label>;

    /// Combines the predictions for several frames of the same tile.
    fn classify(&mut self, frames: &[Frame; FRAMES_PER_DISCOVERY]) -> anyhow::Result<Label> {
        let mut predictions = Vec::with_capacity(FRAMES_PER_DISCOVERY);
        for (idx, frame) in frames.iter().enumerate() {
            let label = self
                .top_prediction(frame)
                .with_context(|| format!("Could not classify frame {}", idx))?;
            predictions.push(label);
        }
        Ok(majority_vote(predictions).expect("at least one prediction"))
    }
}

impl<T: Camera + ?Sized> Camera for Box<T> {
    fn start(&mut self) -> anyhow::Result<()> {
        (**self).start()
    }

    fn capture(&mut self) -> anyhow::Result<Frame> {
        (**self).capture()
    }

    fn stop(&mut self) {
        (**self).stop()
    }
}

impl<T: Classifier + ?Sized> Classifier for Box<T> {
    fn top_prediction(&mut self, frame: &Frame) -> anyhow::Result<Label> {
        (**self).top_prediction(frame)
    }

    fn classify(&mut self, frames: &[Frame; FRAMES_PER_DISCOVERY]) -> anyhow::Result<Label> {
        (**self).classify(frames)
    }
}
