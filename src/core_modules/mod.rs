// Image algebra and support tables
pub mod bbox;
pub mod blob;
pub mod image;
pub mod roi;
pub mod toolkit;

// Depth geometry
pub mod camera;
pub mod overhead;
pub mod plane_fit;

// People
pub mod body;
pub mod face_probe;
pub mod person_finder;
pub mod tracker;

// Colour scene
pub mod background;
