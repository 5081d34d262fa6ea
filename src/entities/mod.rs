pub mod goal;
pub mod plan;
pub mod session_binding;
pub mod step;
