pub mod media;
pub mod normalize;
