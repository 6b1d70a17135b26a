mod site;
mod renderer;

pub use site::*;
pub use renderer::*;
