pub mod delayed;
pub mod runtime;

pub use runtime::NativeReadRuntime;
