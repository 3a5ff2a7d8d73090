pub mod renderer;

pub use renderer::Renderer;
pub use renderer::config::RenderConfig;
