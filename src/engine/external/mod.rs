pub mod blackbox;
pub mod interp_tool;
