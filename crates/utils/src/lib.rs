pub mod assets;
pub mod fs;
