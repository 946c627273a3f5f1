//! Region text recognition through the Tesseract command-line tool.
//!
//! - `setup`: locating the Tesseract executable and its `tessdata`
//! - `engine`: running it on an image and returning the text

mod engine;
mod setup;

pub use engine::TesseractOcr;
