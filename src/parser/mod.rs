pub mod catalogue;
pub mod node;
pub mod text;
pub mod xml;

pub use catalogue::*;
pub use node::*;
pub use text::*;
pub use xml::*;
