mod load_error;
mod runtime_error;

pub use load_error::LoadError;
pub use runtime_error::RuntimeError;
