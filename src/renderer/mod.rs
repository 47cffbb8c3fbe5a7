pub mod components;
pub mod formatter;
pub mod renderer;
pub mod stream;
pub mod traits;

pub use components::*;
pub use formatter::*;
pub use renderer::*;
pub use stream::*;
pub use traits::*;
