mod frontmatter;
mod render;

pub use frontmatter::*;
pub use render::*;
