pub mod handler;

pub use handler::ViewerHandler;
